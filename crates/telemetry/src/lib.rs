//! Observability for the psyst matchmaking tool.

pub mod audit;
pub mod logging;
pub mod metrics;

pub use logging::init_logging;
pub use metrics::Metrics;
