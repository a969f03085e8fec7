//! # Manager registry: non-owning handles to the runtime's managers.
//!
//! A [`Manager`] is one polling component of the surrounding application
//! (CPU governor, fan curve, GPU profile...). Managers own themselves; the
//! registry only keeps [`Weak`] handles keyed by name so the runtime can look
//! them up and shut them down without extending their lifetime.
//!
//! ## Rules
//! - One live manager per name: registering a second one under a live name is refused.
//! - Dead handles (manager dropped by its owner) are pruned on lookup and on shutdown.
//! - [`ManagerRegistry::shutdown_all`] deregisters every manager, then shuts the live ones
//!   down concurrently, bounded by `grace`. Errors are logged, never propagated.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, Weak};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{FuturesUnordered, StreamExt};
use tracing::{debug, info, warn};

use crate::error::{RuntimeError, TaskError};
use crate::scheduler::Scheduler;

/// # A component driven by the runtime.
///
/// # Example
/// ```
/// use std::time::Duration;
/// use async_trait::async_trait;
/// use tunevisor::{JobFn, Manager, Scheduler, TaskError};
///
/// struct FanManager;
///
/// #[async_trait]
/// impl Manager for FanManager {
///     fn name(&self) -> &str { "fan" }
///
///     fn register_tasks(&self, scheduler: &Scheduler) {
///         scheduler.every(Duration::from_secs(5), JobFn::arc("fan.poll", || async {
///             Ok::<_, TaskError>(())
///         }));
///     }
/// }
/// ```
#[async_trait]
pub trait Manager: Send + Sync + 'static {
    /// Unique, stable manager name.
    fn name(&self) -> &str;

    /// Registers the manager's periodic work. Called once on registration with the runtime.
    fn register_tasks(&self, _scheduler: &Scheduler) {}

    /// Releases the manager's resources; called once during runtime shutdown.
    async fn shutdown(&self) -> Result<(), TaskError> {
        Ok(())
    }
}

/// Name-keyed registry of weak manager handles.
#[derive(Default)]
pub struct ManagerRegistry {
    managers: RwLock<HashMap<String, Weak<dyn Manager>>>,
}

impl ManagerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `manager` under its name; `false` if a live manager already holds that name.
    pub fn register(&self, manager: &Arc<dyn Manager>) -> bool {
        let name = manager.name().to_string();
        let mut map = self.write();
        if map.get(&name).is_some_and(|w| w.strong_count() > 0) {
            warn!(manager = %name, "manager name already registered");
            return false;
        }
        map.insert(name.clone(), Arc::downgrade(manager));
        info!(manager = %name, "manager registered");
        true
    }

    /// Live manager registered as `name`.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Manager>> {
        let found = self.read().get(name).map(Weak::upgrade);
        match found {
            Some(Some(m)) => Some(m),
            Some(None) => {
                self.write().remove(name);
                debug!(manager = name, "pruned dropped manager");
                None
            }
            None => None,
        }
    }

    /// Removes `name`; `true` if it was registered.
    pub fn deregister(&self, name: &str) -> bool {
        let removed = self.write().remove(name).is_some();
        if removed {
            info!(manager = name, "manager deregistered");
        }
        removed
    }

    /// Registered names whose managers are still alive, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .read()
            .iter()
            .filter(|(_, w)| w.strong_count() > 0)
            .map(|(n, _)| n.clone())
            .collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.names().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deregisters everything and shuts down the live managers, bounded by `grace`.
    pub async fn shutdown_all(&self, grace: Duration) -> Result<(), RuntimeError> {
        let live: Vec<Arc<dyn Manager>> = self
            .write()
            .drain()
            .filter_map(|(_, w)| w.upgrade())
            .collect();
        let total = live.len();

        let mut pending: FuturesUnordered<_> = live
            .into_iter()
            .map(|m| async move {
                let res = m.shutdown().await;
                (m, res)
            })
            .collect();

        let mut done = 0usize;
        let drained = tokio::time::timeout(grace, async {
            while let Some((m, res)) = pending.next().await {
                done += 1;
                match res {
                    Ok(()) => debug!(manager = m.name(), "manager shut down"),
                    Err(e) => warn!(manager = m.name(), error = %e, "manager shutdown failed"),
                }
            }
        })
        .await;

        match drained {
            Ok(()) => {
                info!(managers = total, "managers shut down");
                Ok(())
            }
            Err(_) => {
                let pending = total - done;
                warn!(pending, "manager shutdown exceeded grace");
                Err(RuntimeError::GraceExceeded {
                    component: "managers",
                    grace,
                    pending,
                })
            }
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, Weak<dyn Manager>>> {
        self.managers.read().unwrap_or_else(|p| p.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, Weak<dyn Manager>>> {
        self.managers.write().unwrap_or_else(|p| p.into_inner())
    }
}

impl std::fmt::Debug for ManagerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagerRegistry")
            .field("managers", &self.names())
            .finish()
    }
}
