//! Integration tests for the psyst import and matchmaking pipeline.

use psyst_db::DbPool;
use psyst_ingestion::{compas, MatchEngine, MatchJobSpec, MesaDatabase};
use psyst_matchmaking::{Grid, InterpolationMethod, MatchMaker};
use psyst_telemetry::Metrics;
use sqlx::Row;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const COMPAS_OUTPUT: &str = "\
COMPAS SSE/BSE output
-----------------------------------------------------------------------------
Mass@ZAMS(1) Mass@ZAMS(2) Eccentricity@ZAMS Mass(SN) Mass(CP) SemiMajorAxis Eccentricity
20.0 10.0 0.10 1.4 8.0 0.5 0.45
30.0 12.0 0.20 2.0 9.0 1.0 0.10
";

const GRID_TOML: &str = "\
[axes]
m1i = [5.0, 10.0, 20.0]
m2i = [1.0, 2.0, 4.0]
porbi = [10.0, 100.0, 1000.0]
ei = [0.0, 0.25, 0.5]
";

fn write_file(dir: &TempDir, name: &str, content: &str) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, content).unwrap();
    path
}

fn db_path(dir: &TempDir, name: &str) -> String {
    dir.path().join(name).to_string_lossy().into_owned()
}

async fn create_mesa_db(path: &str) -> MesaDatabase {
    let db = DbPool::new(path).await.unwrap();
    sqlx::query(
        "CREATE TABLE MESArun (run_name TEXT, m1i REAL, m2i REAL, porbi REAL, ei REAL)",
    )
    .execute(db.pool())
    .await
    .unwrap();

    let runs = [
        ("run_a", 10.0, 1.0, 10.0, 0.5),
        ("run_b", 10.0, 2.0, 100.0, 0.25),
        ("run_c", 5.0, 1.0, 10.0, 0.0),
    ];
    for (name, m1i, m2i, porbi, ei) in runs {
        sqlx::query("INSERT INTO MESArun (run_name, m1i, m2i, porbi, ei) VALUES (?, ?, ?, ?, ?)")
            .bind(name)
            .bind(m1i)
            .bind(m2i)
            .bind(porbi)
            .bind(ei)
            .execute(db.pool())
            .await
            .unwrap();
    }
    MesaDatabase::from_pool(db)
}

#[tokio::test]
async fn import_derives_orbital_periods() {
    let dir = TempDir::new().unwrap();
    let compas_file = write_file(&dir, "compas.txt", COMPAS_OUTPUT);

    let db = DbPool::new(&db_path(&dir, "compas.db")).await.unwrap();
    let count = compas::import_compas(&db, &compas_file).await.unwrap();
    assert_eq!(count, 2);

    let binaries = compas::load_population(&db).await.unwrap();
    assert_eq!(binaries.len(), 2);

    // the first binary maps (companion_mass, remnant_mass) onto (m1i, m2i)
    let first = &binaries[0];
    assert_eq!(first.m1i, 8.0);
    assert_eq!(first.m2i, 1.4);
    assert_eq!(first.ei, 0.45);
    // 0.5 AU around 9.4 Msun is about 42 days
    assert!(
        first.porbi > 41.0 && first.porbi < 43.0,
        "derived period was {}",
        first.porbi
    );
}

#[tokio::test]
async fn import_rejects_unknown_columns() {
    let dir = TempDir::new().unwrap();
    let compas_file = write_file(
        &dir,
        "compas.txt",
        "preamble\npreamble\nMass@ZAMS(1) NotAColumn\n1.0 2.0\n",
    );

    let db = DbPool::new(&db_path(&dir, "compas.db")).await.unwrap();
    let err = compas::import_compas(&db, &compas_file).await.unwrap_err();
    assert!(err.to_string().contains("unknown COMPAS column"));
}

#[tokio::test]
async fn open_existing_rejects_missing_database() {
    let dir = TempDir::new().unwrap();
    let missing = db_path(&dir, "not-there.db");
    assert!(DbPool::open_existing(&missing).await.is_err());
}

#[tokio::test]
async fn matchmake_end_to_end_accumulates_weights() {
    let dir = TempDir::new().unwrap();
    let compas_file = write_file(&dir, "compas.txt", COMPAS_OUTPUT);
    let grid_file = write_file(&dir, "grid.toml", GRID_TOML);

    let compas_db = DbPool::new(&db_path(&dir, "compas.db")).await.unwrap();
    compas::import_compas(&compas_db, &compas_file)
        .await
        .unwrap();

    let mesa = create_mesa_db(&db_path(&dir, "mesa.db")).await;

    let results = DbPool::new(&db_path(&dir, "results.db")).await.unwrap();
    results.migrate().await.unwrap();

    let grid = Grid::load(Path::new(&grid_file)).unwrap();
    let matcher = MatchMaker::new(grid, InterpolationMethod::NearestNeighbour).unwrap();
    let metrics = Metrics::new().unwrap();

    let engine = MatchEngine::new(
        compas_db,
        mesa,
        results.clone(),
        matcher,
        metrics,
        MatchJobSpec {
            compas_database: "compas.db".into(),
            mesa_database: "mesa.db".into(),
            mesa_grid: "grid.toml".into(),
        },
        2,
        None,
    );

    let summary = engine.run().await.unwrap();
    assert_eq!(summary.binary_count, 2);
    assert_eq!(summary.matched_count, 2);
    assert_eq!(summary.failed_count, 0);

    // both binaries resolve to run_b with nearest-neighbour weight 1 each
    let rows = sqlx::query("SELECT run_name, weight FROM MESAweighted")
        .fetch_all(results.pool())
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    let run_name: String = rows[0].get(0);
    let weight: f64 = rows[0].get(1);
    assert_eq!(run_name, "run_b");
    assert!((weight - 2.0).abs() < 1e-9, "weight was {}", weight);

    // job bookkeeping is closed out
    let finished: Option<String> =
        sqlx::query_scalar("SELECT finished_at FROM matchmake_jobs WHERE id = ?")
            .bind(summary.job_id)
            .fetch_one(results.pool())
            .await
            .unwrap();
    assert!(finished.is_some());
}

#[tokio::test]
async fn reimport_replaces_population() {
    let dir = TempDir::new().unwrap();
    let compas_file = write_file(&dir, "compas.txt", COMPAS_OUTPUT);

    let db = DbPool::new(&db_path(&dir, "compas.db")).await.unwrap();
    assert_eq!(compas::import_compas(&db, &compas_file).await.unwrap(), 2);
    assert_eq!(compas::import_compas(&db, &compas_file).await.unwrap(), 2);

    // the second import replaced the table instead of appending
    let binaries = compas::load_population(&db).await.unwrap();
    assert_eq!(binaries.len(), 2);
}

#[tokio::test]
async fn matchmake_weighted_neighbours_conserves_total_weight() {
    let dir = TempDir::new().unwrap();
    let compas_file = write_file(&dir, "compas.txt", COMPAS_OUTPUT);
    let grid_file = write_file(&dir, "grid.toml", GRID_TOML);

    let compas_db = DbPool::new(&db_path(&dir, "compas.db")).await.unwrap();
    compas::import_compas(&compas_db, &compas_file)
        .await
        .unwrap();

    let mesa = create_mesa_db(&db_path(&dir, "mesa.db")).await;

    let results = DbPool::new(&db_path(&dir, "results.db")).await.unwrap();
    results.migrate().await.unwrap();

    let grid = Grid::load(Path::new(&grid_file)).unwrap();
    let matcher = MatchMaker::new(grid, InterpolationMethod::WeightedNeighbours).unwrap();

    let engine = MatchEngine::new(
        compas_db,
        mesa,
        results.clone(),
        matcher,
        Metrics::new().unwrap(),
        MatchJobSpec {
            compas_database: "compas.db".into(),
            mesa_database: "mesa.db".into(),
            mesa_grid: "grid.toml".into(),
        },
        2,
        None,
    );

    let summary = engine.run().await.unwrap();
    assert_eq!(summary.matched_count, 2);
    assert_eq!(summary.failed_count, 0);

    // every binary spreads 16 neighbour weights that sum to 1, so the
    // total weight in MESAweighted equals the matched binaries
    let rows = sqlx::query("SELECT run_name, weight FROM MESAweighted")
        .fetch_all(results.pool())
        .await
        .unwrap();
    assert!(!rows.is_empty());
    let total: f64 = rows.iter().map(|row| row.get::<f64, _>(1)).sum();
    assert!((total - 2.0).abs() < 1e-9, "total weight was {}", total);
    for row in &rows {
        assert!(row.get::<f64, _>(1) > 0.0);
    }
}

#[tokio::test]
async fn mid_binary_resolution_failure_leaves_no_partial_weights() {
    let dir = TempDir::new().unwrap();
    let grid_file = write_file(
        &dir,
        "grid.toml",
        "[axes]\nm1i = [1.0, 2.0]\nm2i = [1.0, 2.0]\nporbi = [1.0, 2.0]\nei = [0.0, 1.0]\n",
    );

    // one binary inside the only grid cell
    let compas_db = DbPool::new(&db_path(&dir, "compas.db")).await.unwrap();
    sqlx::query(
        "CREATE TABLE COMPASrun (companion_mass REAL, remnant_mass REAL, porb_pm REAL, e_pm REAL)",
    )
    .execute(compas_db.pool())
    .await
    .unwrap();
    sqlx::query("INSERT INTO COMPASrun VALUES (1.1, 1.1, 1.1, 0.1)")
        .execute(compas_db.pool())
        .await
        .unwrap();

    // the lower cell corners resolve to a valid run, the upper corners to
    // a row whose run_name cannot be decoded
    let mesa_pool = DbPool::new(&db_path(&dir, "mesa.db")).await.unwrap();
    sqlx::query("CREATE TABLE MESArun (run_name TEXT, m1i REAL, m2i REAL, porbi REAL, ei REAL)")
        .execute(mesa_pool.pool())
        .await
        .unwrap();
    sqlx::query("INSERT INTO MESArun VALUES ('ok_run', 1.0, 1.0, 1.0, 0.0)")
        .execute(mesa_pool.pool())
        .await
        .unwrap();
    sqlx::query("INSERT INTO MESArun VALUES (NULL, 2.0, 2.0, 2.0, 1.0)")
        .execute(mesa_pool.pool())
        .await
        .unwrap();

    let results = DbPool::new(&db_path(&dir, "results.db")).await.unwrap();
    results.migrate().await.unwrap();

    let grid = Grid::load(Path::new(&grid_file)).unwrap();
    let matcher = MatchMaker::new(grid, InterpolationMethod::WeightedNeighbours).unwrap();

    let engine = MatchEngine::new(
        compas_db,
        MesaDatabase::from_pool(mesa_pool),
        results.clone(),
        matcher,
        Metrics::new().unwrap(),
        MatchJobSpec {
            compas_database: "compas.db".into(),
            mesa_database: "mesa.db".into(),
            mesa_grid: "grid.toml".into(),
        },
        1,
        None,
    );

    let summary = engine.run().await.unwrap();
    assert_eq!(summary.matched_count, 0);
    assert_eq!(summary.failed_count, 1);

    // the neighbours that resolved to ok_run before the failure must not
    // have reached the results table
    let rows = sqlx::query("SELECT run_name, weight FROM MESAweighted")
        .fetch_all(results.pool())
        .await
        .unwrap();
    assert!(rows.is_empty(), "partial weights were written: {} rows", rows.len());
}
