//! Ingestion and matchmaking drivers for the psyst tool.

pub mod compas;
pub mod engine;
pub mod mesa;

pub use engine::{MatchEngine, MatchJobSpec, MatchSummary};
pub use mesa::MesaDatabase;
