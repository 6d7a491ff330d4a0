//! CLI application for the psyst matchmaking tool.

use anyhow::Context;
use clap::{Parser, Subcommand};
use psyst_db::models::WeightedRun;
use psyst_db::DbPool;
use psyst_ingestion::{compas, MatchEngine, MatchJobSpec, MesaDatabase};
use psyst_matchmaking::{Grid, InterpolationMethod, MatchMaker};
use psyst_telemetry::{init_logging, Metrics};
use sqlx::Row;
use std::path::Path;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "psyst")]
#[command(
    about = "Matchmake a population of stars from a population synthesis code to a detailed stellar evolution grid of models"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Import a raw COMPAS output file into a SQLite database
    ImportCompas {
        /// Database path for the imported COMPASrun table
        #[arg(long, default_value = "compas.db")]
        database_path: String,

        /// Raw COMPAS supernova output file
        #[arg(long)]
        compas_output: String,

        /// Log level
        #[arg(long)]
        log_level: Option<String>,
    },
    /// Run the matchmaking process between the COMPAS and MESA databases
    Matchmake {
        /// TOML configuration file with matchmaking options
        #[arg(short = 'C', long)]
        config_file: Option<String>,

        /// COMPAS population database (overrides `pop_synth_database`)
        #[arg(long)]
        compas_database: Option<String>,

        /// MESA grid database (overrides `mesa_database`)
        #[arg(long)]
        mesa_database: Option<String>,

        /// MESA grid file with the regular axes (overrides `mesa_grid`)
        #[arg(long)]
        mesa_grid: Option<String>,

        /// Results database (overrides `interpolated_results_name`)
        #[arg(long)]
        results_database: Option<String>,

        /// Interpolation method: nearest_neighbour or weighted_neighbours
        #[arg(long)]
        method: Option<String>,

        /// Number of worker tasks (defaults to the CPU count)
        #[arg(long)]
        workers: Option<usize>,

        /// Metrics bind address
        #[arg(long, default_value = "0.0.0.0:9090")]
        metrics_bind_address: String,

        /// Log level
        #[arg(long)]
        log_level: Option<String>,

        /// Sample output path for audit logs
        #[arg(long)]
        sample_output_path: Option<String>,
    },
    /// Display the COMPAS database in standard output
    ShowCompas {
        /// Database path
        #[arg(long, default_value = "compas.db")]
        database_path: String,

        /// Maximum number of rows to print
        #[arg(long)]
        limit: Option<i64>,
    },
    /// Display the MESA database in standard output
    ShowMesa {
        /// Database path
        #[arg(long)]
        database_path: String,

        /// Maximum number of rows to print
        #[arg(long)]
        limit: Option<i64>,
    },
    /// Export the weighted MESA runs to CSV
    ExportWeights {
        /// Results database path
        #[arg(long)]
        database_path: String,

        /// Output CSV path
        #[arg(long)]
        output: String,
    },
}

/// Matchmaking options loaded from the TOML configuration file. Every
/// field can be overridden on the command line.
#[derive(Debug, Default, serde::Deserialize)]
struct MatchConfig {
    pop_synth_database: Option<String>,
    mesa_database: Option<String>,
    mesa_grid: Option<String>,
    interpolation_method: Option<String>,
    interpolated_results_name: Option<String>,
    workers: Option<usize>,
}

impl MatchConfig {
    fn load(path: &str) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("no such configuration file: `{}`", path))?;
        toml::from_str(&text).with_context(|| format!("failed to parse `{}`", path))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::ImportCompas {
            database_path,
            compas_output,
            log_level,
        } => {
            init_logging(log_level.as_deref())?;
            let db = DbPool::new(&database_path).await?;
            let count = compas::import_compas(&db, Path::new(&compas_output)).await?;
            println!("imported {} binaries into `{}`", count, database_path);
        }
        Commands::Matchmake {
            config_file,
            compas_database,
            mesa_database,
            mesa_grid,
            results_database,
            method,
            workers,
            metrics_bind_address,
            log_level,
            sample_output_path,
        } => {
            init_logging(log_level.as_deref())?;
            let config = match config_file {
                Some(path) => MatchConfig::load(&path)?,
                None => MatchConfig::default(),
            };
            let options = resolve_options(
                config,
                compas_database,
                mesa_database,
                mesa_grid,
                results_database,
                method,
                workers,
            )?;
            run_matchmake(options, &metrics_bind_address, sample_output_path).await?;
        }
        Commands::ShowCompas {
            database_path,
            limit,
        } => {
            init_logging(None)?;
            show_compas(&database_path, limit).await?;
        }
        Commands::ShowMesa {
            database_path,
            limit,
        } => {
            init_logging(None)?;
            show_mesa(&database_path, limit).await?;
        }
        Commands::ExportWeights {
            database_path,
            output,
        } => {
            init_logging(None)?;
            export_weights(&database_path, &output).await?;
        }
    }

    Ok(())
}

/// Fully resolved matchmaking options, after layering command-line flags
/// over the configuration file.
#[derive(Debug)]
struct MatchOptions {
    compas_database: String,
    mesa_database: String,
    mesa_grid: String,
    results_database: String,
    method: InterpolationMethod,
    workers: usize,
}

/// Merge the configuration file and the command-line flags, flags take
/// precedence.
fn resolve_options(
    config: MatchConfig,
    compas_database: Option<String>,
    mesa_database: Option<String>,
    mesa_grid: Option<String>,
    results_database: Option<String>,
    method: Option<String>,
    workers: Option<usize>,
) -> anyhow::Result<MatchOptions> {
    let compas_database = compas_database
        .or(config.pop_synth_database)
        .context("no COMPAS database given, use --compas-database or `pop_synth_database`")?;
    let mesa_database = mesa_database
        .or(config.mesa_database)
        .context("no MESA database given, use --mesa-database or `mesa_database`")?;
    let mesa_grid = mesa_grid
        .or(config.mesa_grid)
        .context("no MESA grid file given, use --mesa-grid or `mesa_grid`")?;
    let results_database = results_database
        .or(config.interpolated_results_name)
        .context(
            "no results database given, use --results-database or `interpolated_results_name`",
        )?;
    let method: InterpolationMethod = method
        .or(config.interpolation_method)
        .unwrap_or_default()
        .parse()?;
    let workers = workers
        .or(config.workers)
        .unwrap_or_else(num_cpus::get)
        .max(1);

    Ok(MatchOptions {
        compas_database,
        mesa_database,
        mesa_grid,
        results_database,
        method,
        workers,
    })
}

async fn run_matchmake(
    options: MatchOptions,
    metrics_addr: &str,
    sample_output_path: Option<String>,
) -> anyhow::Result<()> {
    info!("Starting psyst matchmaking");

    // Open inputs and initialize the results database
    let compas = DbPool::open_existing(&options.compas_database).await?;
    let mesa = MesaDatabase::open(&options.mesa_database).await?;
    let results = DbPool::new(&options.results_database).await?;
    results.migrate().await?;

    let grid = Grid::load(Path::new(&options.mesa_grid))?;
    let matcher = MatchMaker::new(grid, options.method)?;

    let metrics = Metrics::new()?;
    start_metrics_server(metrics_addr, metrics.clone()).await?;

    let spec = MatchJobSpec {
        compas_database: options.compas_database,
        mesa_database: options.mesa_database,
        mesa_grid: options.mesa_grid,
    };
    let engine = MatchEngine::new(
        compas,
        mesa,
        results,
        matcher,
        metrics,
        spec,
        options.workers,
        sample_output_path,
    );

    let summary = engine.run().await?;
    println!(
        "matchmaking finished: {} binaries, {} matched, {} failed, {} distinct MESA runs (job {})",
        summary.binary_count,
        summary.matched_count,
        summary.failed_count,
        summary.run_count,
        summary.job_id
    );

    Ok(())
}

async fn show_compas(db_path: &str, limit: Option<i64>) -> anyhow::Result<()> {
    let db = DbPool::open_existing(db_path).await?;

    let rows = sqlx::query(
        "SELECT m1i, m2i, ei, remnant_mass, companion_mass, porb_pm, e_pm \
         FROM COMPASrun LIMIT ?",
    )
    .bind(limit.unwrap_or(-1))
    .fetch_all(db.pool())
    .await?;

    println!(
        "{:>14} {:>14} {:>14} {:>14} {:>14} {:>14} {:>14}",
        "m1i", "m2i", "ei", "remnant_mass", "companion_mass", "porb_pm", "e_pm"
    );
    for row in &rows {
        let porb_pm: Option<f64> = row.try_get(5)?;
        println!(
            "{:>14.6} {:>14.6} {:>14.6} {:>14.6} {:>14.6} {:>14.6} {:>14.6}",
            row.try_get::<f64, _>(0)?,
            row.try_get::<f64, _>(1)?,
            row.try_get::<f64, _>(2)?,
            row.try_get::<f64, _>(3)?,
            row.try_get::<f64, _>(4)?,
            porb_pm.unwrap_or(f64::NAN),
            row.try_get::<f64, _>(6)?,
        );
    }
    println!("{} binaries", rows.len());

    Ok(())
}

async fn show_mesa(db_path: &str, limit: Option<i64>) -> anyhow::Result<()> {
    let mesa = MesaDatabase::open(db_path).await?;
    let runs = mesa.runs(limit).await?;

    println!(
        "{:>20} {:>14} {:>14} {:>14} {:>14}",
        "run_name", "m1i", "m2i", "porbi", "ei"
    );
    for run in &runs {
        println!(
            "{:>20} {:>14.6} {:>14.6} {:>14.6} {:>14.6}",
            run.run_name, run.m1i, run.m2i, run.porbi, run.ei
        );
    }
    println!("{} runs", runs.len());

    Ok(())
}

async fn export_weights(db_path: &str, output: &str) -> anyhow::Result<()> {
    let db = DbPool::open_existing(db_path).await?;

    let runs = sqlx::query_as::<_, WeightedRun>(
        "SELECT run_name, weight FROM MESAweighted ORDER BY weight DESC",
    )
    .fetch_all(db.pool())
    .await?;

    let mut writer = csv::Writer::from_path(output)
        .with_context(|| format!("failed to create `{}`", output))?;
    for run in &runs {
        writer.serialize(run)?;
    }
    writer.flush()?;

    info!("Exported {} weighted runs to {}", runs.len(), output);
    println!("exported {} weighted runs to `{}`", runs.len(), output);

    Ok(())
}

async fn start_metrics_server(addr: &str, metrics: Metrics) -> anyhow::Result<()> {
    use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Router};
    use std::sync::Arc;

    let metrics = Arc::new(metrics);

    async fn metrics_handler(
        State(metrics): State<Arc<Metrics>>,
    ) -> Result<impl IntoResponse, StatusCode> {
        match metrics.gather() {
            Ok(body) => Ok((StatusCode::OK, body)),
            Err(_) => Err(StatusCode::INTERNAL_SERVER_ERROR),
        }
    }

    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(metrics);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Metrics server listening on http://{}", addr);

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("Metrics server error: {}", e);
        }
    });

    Ok(())
}
