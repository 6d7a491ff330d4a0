//! Database models and types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// One detailed stellar-evolution model from the MESA grid database.
///
/// Lives in the `MESArun` table of the MESA SQLite database. The four
/// coordinate columns span the same space the matchmaking runs in.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct MesaRun {
    pub run_name: String,
    pub m1i: f64,
    pub m2i: f64,
    pub porbi: f64,
    pub ei: f64,
}

/// Accumulated weight of a MESA run in the results database.
///
/// `weight` counts how often (and how strongly) the COMPAS population
/// reproduced this run during matchmaking.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct WeightedRun {
    pub run_name: String,
    pub weight: f64,
}

/// Bookkeeping row for one matchmaking pass.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct MatchmakeJob {
    pub id: i64,
    pub compas_database: String,
    pub mesa_database: String,
    pub mesa_grid: String,
    pub method: String,
    pub binary_count: i64,
    pub matched_count: i64,
    pub failed_count: i64,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}
