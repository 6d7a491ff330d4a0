//! COMPAS population import and access.
//!
//! Raw COMPAS supernova output is a whitespace-separated text table: two
//! preamble lines, a header line of COMPAS column names, then one numeric
//! row per binary. Import renames the columns to the short forms below and
//! stores the rows in the `COMPASrun` SQLite table.

use anyhow::{Context, Result};
use psyst_db::DbPool;
use psyst_matchmaking::BinaryPoint;
use sqlx::Row;
use std::path::Path;
use tracing::{info, warn};

/// COMPAS column names and their short forms in `COMPASrun`.
const COLUMN_MAP: [(&str, &str); 20] = [
    ("Mass@ZAMS(1)", "m1i"),
    ("Mass@ZAMS(2)", "m2i"),
    ("Eccentricity@ZAMS", "ei"),
    ("SemiMajorAxis@ZAMS", "ai"),
    ("Age(SN)", "age_pre_cc"),
    ("Mass_CO_Core@CO(SN)", "c_core_mass_pre_cc"),
    ("Eccentricity<SN", "e_pre_cc"),
    ("SemiMajorAxis<SN", "a_pre_cc"),
    ("Orb_Velocity<SN", "v_orb_pre_cc"),
    ("Drawn_Kick_Magnitude(SN)", "w_kick"),
    ("Applied_Kick_Magnitude(SN)", "w_kick_applied"),
    ("SN_Kick_Theta(SN)", "theta_kick"),
    ("SN_Kick_Phi(SN)", "phi_kick"),
    ("Fallback_Fraction(SN)", "f_fb"),
    ("Supernova_State", "sn_state"),
    ("Mass(SN)", "remnant_mass"),
    ("Mass(CP)", "companion_mass"),
    ("Stellar_Type(CP)", "companion_stellar_type"),
    ("SemiMajorAxis", "a_pm"),
    ("Eccentricity", "e_pm"),
];

/// Days per Julian year, for Kepler's third law.
const DAYS_PER_YEAR: f64 = 365.25;

/// Orbital period in days from a semi-major axis in AU and two masses in
/// solar masses.
///
/// COMPAS reports the post-supernova orbit as a semi-major axis, while the
/// MESA grid is period-spaced, so the period is derived at import time and
/// stored as `porb_pm`.
pub fn orbital_period_days(a_au: f64, m1: f64, m2: f64) -> Option<f64> {
    let total_mass = m1 + m2;
    if a_au <= 0.0 || total_mass <= 0.0 {
        return None;
    }
    Some(DAYS_PER_YEAR * (a_au.powi(3) / total_mass).sqrt())
}

fn short_name(compas_name: &str) -> Option<&'static str> {
    COLUMN_MAP
        .iter()
        .find(|(long, _)| *long == compas_name)
        .map(|(_, short)| *short)
}

/// Import a raw COMPAS output file into the `COMPASrun` table, replacing
/// any previously imported population.
///
/// Returns the number of imported binaries. Unknown header columns and
/// rows with the wrong field count are errors.
pub async fn import_compas(db: &DbPool, path: &Path) -> Result<u64> {
    info!("Importing COMPAS population from {}", path.display());

    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read COMPAS output `{}`", path.display()))?;
    let mut lines = text.lines().enumerate();

    // two preamble lines before the header
    lines.next();
    lines.next();
    let (_, header_line) = lines
        .next()
        .ok_or_else(|| anyhow::anyhow!("COMPAS output `{}` has no header line", path.display()))?;

    let mut columns: Vec<&'static str> = Vec::new();
    for name in header_line.split_whitespace() {
        let short = short_name(name)
            .ok_or_else(|| anyhow::anyhow!("unknown COMPAS column `{}`", name))?;
        columns.push(short);
    }
    if columns.is_empty() {
        anyhow::bail!("COMPAS output `{}` has an empty header line", path.display());
    }

    let has_orbit = ["a_pm", "remnant_mass", "companion_mass"]
        .iter()
        .all(|c| columns.contains(c));
    if !has_orbit {
        warn!("COMPAS output lacks the post-SN orbit columns, `porb_pm` will be empty");
    }

    let column_defs: Vec<String> = columns.iter().map(|c| format!("{} REAL", c)).collect();
    let ddl = format!(
        "CREATE TABLE COMPASrun ({}, porb_pm REAL)",
        column_defs.join(", ")
    );

    let placeholders: Vec<&str> = columns.iter().map(|_| "?").collect();
    let insert = format!(
        "INSERT INTO COMPASrun ({}, porb_pm) VALUES ({}, ?)",
        columns.join(", "),
        placeholders.join(", ")
    );

    let index_of = |name: &str| columns.iter().position(|c| *c == name);
    let a_pm_idx = index_of("a_pm");
    let remnant_idx = index_of("remnant_mass");
    let companion_idx = index_of("companion_mass");

    // the import and the table swap commit atomically, a re-import never
    // appends to an older population
    let mut tx = db.pool().begin().await?;
    sqlx::query("DROP TABLE IF EXISTS COMPASrun")
        .execute(&mut *tx)
        .await?;
    sqlx::query(&ddl).execute(&mut *tx).await?;

    let mut count = 0u64;
    for (line_idx, line) in lines {
        if line.trim().is_empty() {
            continue;
        }

        let mut values = Vec::with_capacity(columns.len());
        for field in line.split_whitespace() {
            let value: f64 = field.parse().with_context(|| {
                format!("bad numeric value `{}` on line {}", field, line_idx + 1)
            })?;
            values.push(value);
        }
        if values.len() != columns.len() {
            anyhow::bail!(
                "line {} has {} fields, expected {}",
                line_idx + 1,
                values.len(),
                columns.len()
            );
        }

        let porb_pm = match (a_pm_idx, remnant_idx, companion_idx) {
            (Some(a), Some(m1), Some(m2)) => {
                orbital_period_days(values[a], values[m1], values[m2])
            }
            _ => None,
        };

        let mut query = sqlx::query(&insert);
        for value in &values {
            query = query.bind(*value);
        }
        query = query.bind(porb_pm);
        query.execute(&mut *tx).await?;

        count += 1;
    }
    tx.commit().await?;

    info!("Imported {} binaries into COMPASrun", count);
    Ok(count)
}

/// Load the COMPAS population as match-space points.
///
/// The post-supernova state `(companion_mass, remnant_mass, porb_pm, e_pm)`
/// maps onto the MESA axes `(m1i, m2i, porbi, ei)`. Binaries without a
/// derived period are skipped with a warning.
pub async fn load_population(db: &DbPool) -> Result<Vec<BinaryPoint>> {
    let rows = sqlx::query("SELECT companion_mass, remnant_mass, porb_pm, e_pm FROM COMPASrun")
        .fetch_all(db.pool())
        .await?;

    let mut binaries = Vec::with_capacity(rows.len());
    for row in rows {
        let porb_pm: Option<f64> = row.try_get(2)?;
        let Some(porbi) = porb_pm else {
            warn!("skipping binary without a post-SN orbital period");
            continue;
        };
        binaries.push(BinaryPoint {
            m1i: row.try_get(0)?,
            m2i: row.try_get(1)?,
            porbi,
            ei: row.try_get(3)?,
        });
    }

    info!("Loaded {} binaries from the COMPAS database", binaries.len());
    Ok(binaries)
}
