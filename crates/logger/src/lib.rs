//! Workspace-wide tracing setup shared by the service and the read server.

mod tracing;

pub use self::tracing::{LogFormat, init_tracing, init_tracing_with};
pub use ::tracing::level_filters::LevelFilter;
