//! MESA grid database access.

use anyhow::Result;
use psyst_db::models::MesaRun;
use psyst_db::DbPool;
use psyst_matchmaking::BinaryPoint;
use sqlx::Row;
use tracing::info;

/// Read-side wrapper around the MESA SQLite database.
///
/// The database is produced by the MESA grid pipeline and holds one row per
/// detailed model in the `MESArun` table.
#[derive(Clone)]
pub struct MesaDatabase {
    db: DbPool,
}

impl MesaDatabase {
    /// Open an existing MESA database, failing when the file is missing.
    pub async fn open(db_path: &str) -> Result<Self> {
        let db = DbPool::open_existing(db_path).await?;
        info!("Opened MESA database at {}", db_path);
        Ok(Self { db })
    }

    pub fn from_pool(db: DbPool) -> Self {
        Self { db }
    }

    /// List the grid runs, optionally limited. SQLite treats a negative
    /// limit as "no limit".
    pub async fn runs(&self, limit: Option<i64>) -> Result<Vec<MesaRun>> {
        let runs = sqlx::query_as::<_, MesaRun>(
            "SELECT run_name, m1i, m2i, porbi, ei FROM MESArun LIMIT ?",
        )
        .bind(limit.unwrap_or(-1))
        .fetch_all(self.db.pool())
        .await?;
        Ok(runs)
    }

    /// Resolve a neighbour point to the closest MESA run by squared
    /// distance over the four grid coordinates.
    ///
    /// Returns the run name and the squared distance to it.
    pub async fn closest_run(&self, point: &BinaryPoint) -> Result<(String, f64)> {
        let row = sqlx::query(
            "SELECT run_name, \
             (m1i - ?1)*(m1i - ?1) + (m2i - ?2)*(m2i - ?2) + \
             (porbi - ?3)*(porbi - ?3) + (ei - ?4)*(ei - ?4) AS dist \
             FROM MESArun ORDER BY dist ASC LIMIT 1",
        )
        .bind(point.m1i)
        .bind(point.m2i)
        .bind(point.porbi)
        .bind(point.ei)
        .fetch_optional(self.db.pool())
        .await?;

        let row = row.ok_or_else(|| anyhow::anyhow!("MESA database has no runs"))?;
        Ok((row.try_get("run_name")?, row.try_get("dist")?))
    }
}
