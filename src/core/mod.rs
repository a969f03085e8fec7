//! Runtime core: assembly and lifecycle.
//!
//! - [`RuntimeBuilder`] constructs every shared component once;
//! - [`Runtime`] hands them out and shuts them down in dependency order;
//! - [`Manager`] / [`ManagerRegistry`] track the application's managers through weak handles;
//! - `shutdown`: cross-platform termination signal handling.

mod builder;
mod registry;
mod runtime;
mod shutdown;

pub use builder::RuntimeBuilder;
pub use registry::{Manager, ManagerRegistry};
pub use runtime::{Runtime, RuntimeStats};
