//! # LogWriter: event logger
//!
//! A subscriber that writes incoming [`Event`]s to `tracing`, at the level the
//! event carries. Register it for every type with
//! [`EventBus::subscribe_all`](crate::EventBus::subscribe_all).
//!
//! | Event level            | tracing level |
//! |------------------------|---------------|
//! | `Debug`                | `DEBUG`       |
//! | `Info`                 | `INFO`        |
//! | `Warning`              | `WARN`        |
//! | `Error`, `Critical`    | `ERROR`       |

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use crate::error::TaskError;
use crate::events::{Event, Level};
use crate::subscribers::Subscribe;

/// Event logging subscriber.
#[derive(Default)]
pub struct LogWriter;

impl LogWriter {
    /// Construct a new [`LogWriter`].
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Subscribe for LogWriter {
    async fn on_event(&self, e: &Event) -> Result<(), TaskError> {
        match e.level {
            Level::Debug => {
                debug!(id = %e.id, kind = %e.kind, source = %e.source, priority = e.priority, "{}", e.message)
            }
            Level::Info => {
                info!(id = %e.id, kind = %e.kind, source = %e.source, priority = e.priority, "{}", e.message)
            }
            Level::Warning => {
                warn!(id = %e.id, kind = %e.kind, source = %e.source, priority = e.priority, "{}", e.message)
            }
            Level::Error | Level::Critical => error!(
                id = %e.id,
                kind = %e.kind,
                source = %e.source,
                priority = e.priority,
                critical = e.level == Level::Critical,
                "{}",
                e.message
            ),
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "LogWriter"
    }
}
