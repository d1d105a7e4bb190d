// =============================================================================
// SNAPSHOT WRITER
// =============================================================================

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::imbalance::ImbalanceHealth;
use crate::pipeline::BatchOutput;

pub const SWEEPS_FILE: &str = "liquidity_sweeps.json";
pub const IMBALANCE_FILE: &str = "volume_imbalance.json";
pub const STRUCTURE_FILE: &str = "market_structure.json";
pub const PROFILES_FILE: &str = "edge_profiles.json";
pub const SCM_FILE: &str = "scm_state.json";
pub const ADVICE_FILE: &str = "tuning_advice.json";

#[derive(Serialize)]
struct Snapshot<'a, T: Serialize> {
    generated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    health: Option<&'a ImbalanceHealth>,
    symbols: &'a BTreeMap<String, T>,
}

fn write_snapshot<T: Serialize>(
    dir: &Path,
    name: &str,
    generated_at: DateTime<Utc>,
    health: Option<&ImbalanceHealth>,
    symbols: &BTreeMap<String, T>,
) -> Result<PathBuf> {
    let path = dir.join(name);
    let body = serde_json::to_string_pretty(&Snapshot {
        generated_at,
        health,
        symbols,
    })
    .with_context(|| format!("serializing {}", name))?;
    fs::write(&path, body).with_context(|| format!("writing {}", path.display()))?;
    Ok(path)
}

/// Writes all six snapshots into `dir`, creating it if needed.
pub fn write_snapshots(dir: &Path, out: &BatchOutput) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    let at = out.generated_at;

    let written = vec![
        write_snapshot(dir, SWEEPS_FILE, at, None, &out.sweeps)?,
        write_snapshot(dir, IMBALANCE_FILE, at, Some(&out.imbalance_health), &out.imbalance)?,
        write_snapshot(dir, STRUCTURE_FILE, at, None, &out.structure)?,
        write_snapshot(dir, PROFILES_FILE, at, None, &out.profiles)?,
        write_snapshot(dir, SCM_FILE, at, None, &out.scm)?,
        write_snapshot(dir, ADVICE_FILE, at, None, &out.advice)?,
    ];

    info!("💾 Wrote {} snapshots to {}", written.len(), dir.display());
    Ok(written)
}
