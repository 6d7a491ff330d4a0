//! The matchmaking engine.
//!
//! Fans the COMPAS population out over worker tasks, resolves every grid
//! neighbour to a MESA run, and funnels `(run_name, weight)` pairs through
//! a channel into a single aggregator. Only the aggregator touches the
//! results database, and it writes once after all workers are done.

use crate::compas;
use crate::mesa::MesaDatabase;
use anyhow::Result;
use chrono::Utc;
use psyst_db::DbPool;
use psyst_matchmaking::{BinaryPoint, MatchMaker};
use psyst_telemetry::{audit, Metrics};
use serde::Serialize;
use sqlx::Row;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{error, info, warn};

/// Labels recorded with each matchmaking pass.
#[derive(Debug, Clone)]
pub struct MatchJobSpec {
    pub compas_database: String,
    pub mesa_database: String,
    pub mesa_grid: String,
}

/// Outcome of one matchmaking pass.
#[derive(Debug, Clone, Serialize)]
pub struct MatchSummary {
    pub job_id: i64,
    pub binary_count: usize,
    pub matched_count: usize,
    pub failed_count: usize,
    pub run_count: usize,
}

#[derive(Debug, Serialize)]
struct AuditMatch {
    binary: BinaryPoint,
    run_name: String,
    weight: f64,
    distance: f64,
}

/// Matchmaking engine for one COMPAS population against one MESA grid.
pub struct MatchEngine {
    compas: DbPool,
    mesa: MesaDatabase,
    results: DbPool,
    matcher: Arc<MatchMaker>,
    metrics: Metrics,
    spec: MatchJobSpec,
    workers: usize,
    sample_output_path: Option<String>,
}

impl MatchEngine {
    /// Create a new engine.
    ///
    /// # Arguments
    /// * `compas` - Pool for the imported COMPAS database
    /// * `mesa` - MESA grid database
    /// * `results` - Pool for the (migrated) results database
    /// * `matcher` - Grid matcher
    /// * `metrics` - Metrics collector
    /// * `spec` - Job labels for bookkeeping
    /// * `workers` - Number of worker tasks
    /// * `sample_output_path` - Optional path for audit samples
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        compas: DbPool,
        mesa: MesaDatabase,
        results: DbPool,
        matcher: MatchMaker,
        metrics: Metrics,
        spec: MatchJobSpec,
        workers: usize,
        sample_output_path: Option<String>,
    ) -> Self {
        Self {
            compas,
            mesa,
            results,
            matcher: Arc::new(matcher),
            metrics,
            spec,
            workers: workers.max(1),
            sample_output_path,
        }
    }

    /// Run the full matchmaking pass and write the weighted results.
    pub async fn run(&self) -> Result<MatchSummary> {
        info!("start matchmaking process");

        let binaries = compas::load_population(&self.compas).await?;
        let job_id = self.record_job_start(binaries.len()).await?;

        let (tx, mut rx) = mpsc::channel::<(String, f64)>(1024);

        let chunk_size = binaries.len().div_ceil(self.workers).max(1);
        let mut handles = Vec::new();
        for chunk in binaries.chunks(chunk_size) {
            let chunk = chunk.to_vec();
            let matcher = Arc::clone(&self.matcher);
            let mesa = self.mesa.clone();
            let metrics = self.metrics.clone();
            let tx = tx.clone();
            let sample_path = self.sample_output_path.clone();

            handles.push(tokio::spawn(async move {
                run_worker(chunk, matcher, mesa, metrics, tx, sample_path).await
            }));
        }
        drop(tx);

        // aggregate while the workers run; the loop ends once every sender
        // is dropped
        let mut weights: HashMap<String, f64> = HashMap::new();
        while let Some((run_name, weight)) = rx.recv().await {
            *weights.entry(run_name).or_insert(0.0) += weight;
        }

        let mut matched_count = 0usize;
        let mut failed_count = 0usize;
        for handle in handles {
            let (matched, failed) = handle.await?;
            matched_count += matched;
            failed_count += failed;
        }

        self.write_weights(&weights).await?;
        self.record_job_end(job_id, matched_count, failed_count)
            .await?;

        let summary = MatchSummary {
            job_id,
            binary_count: binaries.len(),
            matched_count,
            failed_count,
            run_count: weights.len(),
        };
        info!(
            "matchmaking finished: {} binaries, {} matched, {} failed, {} distinct MESA runs",
            summary.binary_count, summary.matched_count, summary.failed_count, summary.run_count
        );
        Ok(summary)
    }

    async fn record_job_start(&self, binary_count: usize) -> Result<i64> {
        let job_id = sqlx::query(
            "INSERT INTO matchmake_jobs (
                compas_database, mesa_database, mesa_grid, method,
                binary_count, started_at
            ) VALUES (?, ?, ?, ?, ?, ?)
            RETURNING id",
        )
        .bind(&self.spec.compas_database)
        .bind(&self.spec.mesa_database)
        .bind(&self.spec.mesa_grid)
        .bind(self.matcher.method().as_str())
        .bind(binary_count as i64)
        .bind(Utc::now().to_rfc3339())
        .fetch_one(self.results.pool())
        .await?
        .get::<i64, _>(0);

        Ok(job_id)
    }

    async fn record_job_end(&self, job_id: i64, matched: usize, failed: usize) -> Result<()> {
        sqlx::query(
            "UPDATE matchmake_jobs SET matched_count = ?, failed_count = ?, finished_at = ?
             WHERE id = ?",
        )
        .bind(matched as i64)
        .bind(failed as i64)
        .bind(Utc::now().to_rfc3339())
        .bind(job_id)
        .execute(self.results.pool())
        .await?;
        Ok(())
    }

    /// Replace the `MESAweighted` table contents in one transaction, so a
    /// rerun against the same results database stays idempotent.
    async fn write_weights(&self, weights: &HashMap<String, f64>) -> Result<()> {
        let mut tx = self.results.pool().begin().await?;
        sqlx::query("DELETE FROM MESAweighted")
            .execute(&mut *tx)
            .await?;
        for (run_name, weight) in weights {
            sqlx::query("INSERT INTO MESAweighted (run_name, weight) VALUES (?, ?)")
                .bind(run_name)
                .bind(weight)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        info!("Wrote {} weighted MESA runs", weights.len());
        Ok(())
    }
}

async fn run_worker(
    chunk: Vec<BinaryPoint>,
    matcher: Arc<MatchMaker>,
    mesa: MesaDatabase,
    metrics: Metrics,
    tx: mpsc::Sender<(String, f64)>,
    sample_path: Option<String>,
) -> (usize, usize) {
    let mut matched = 0usize;
    let mut failed = 0usize;

    for binary in &chunk {
        let neighbours = match matcher.match_binary(binary) {
            Ok(neighbours) => neighbours,
            Err(e) => {
                warn!(
                    "failed to match binary ({}, {}, {}, {}): {}",
                    binary.m1i, binary.m2i, binary.porbi, binary.ei, e
                );
                metrics.inc_match_failures();
                failed += 1;
                continue;
            }
        };
        metrics.inc_neighbour_lookups(neighbours.len() as u64);

        // a binary's weights reach the aggregator only once every one of
        // its neighbours resolved, a partial batch must never land in
        // MESAweighted
        let mut batch: Vec<(String, f64, f64)> = Vec::with_capacity(neighbours.len());
        let mut resolved = true;
        for neighbour in &neighbours {
            let start = Instant::now();
            match mesa.closest_run(&neighbour.point).await {
                Ok((run_name, distance)) => {
                    metrics.observe_db_latency("closest_run", start.elapsed().as_secs_f64());
                    batch.push((run_name, neighbour.weight, distance));
                }
                Err(e) => {
                    error!("failed to resolve a grid neighbour to a MESA run: {}", e);
                    resolved = false;
                    break;
                }
            }
        }

        if resolved {
            for (run_name, weight, distance) in batch {
                if sample_path.is_some() {
                    let sample = AuditMatch {
                        binary: *binary,
                        run_name: run_name.clone(),
                        weight,
                        distance,
                    };
                    if let Err(e) = audit::write_audit_sample(sample_path.as_ref(), &sample) {
                        warn!("Failed to write audit sample: {}", e);
                    }
                }

                if tx.send((run_name, weight)).await.is_err() {
                    resolved = false;
                    break;
                }
            }
        }

        if resolved {
            matched += 1;
            metrics.inc_binaries_matched();
        } else {
            failed += 1;
            metrics.inc_match_failures();
        }
    }

    (matched, failed)
}
