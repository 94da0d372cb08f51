use std::collections::HashMap;
use std::path::Path;

use anyhow::Context;
use config::{Config, Environment, File};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub database: DatabaseSettings,
    pub risk: RiskPolicy,
    pub warnings: WarningPolicy,
    pub training: TrainingPolicy,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseSettings {
    pub max_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RiskPolicy {
    /// CPA (4-scale) below which a student is at risk.
    pub threshold: f64,
    /// Per-cohort replacements for `threshold`.
    #[serde(default)]
    pub cohort_thresholds: HashMap<String, f64>,
    pub high_margin: f64,
    pub critical_cpa: f64,
    pub failed_medium: usize,
    pub failed_high: usize,
    pub failed_critical: usize,
}

impl RiskPolicy {
    pub fn threshold_for(&self, cohort: &str) -> f64 {
        self.cohort_thresholds
            .get(&cohort.to_lowercase())
            .copied()
            .unwrap_or(self.threshold)
    }
}

impl Default for RiskPolicy {
    fn default() -> Self {
        Self {
            threshold: 2.0,
            cohort_thresholds: HashMap::new(),
            high_margin: 0.5,
            critical_cpa: 1.0,
            failed_medium: 2,
            failed_high: 4,
            failed_critical: 6,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct WarningPolicy {
    /// Accumulated warnings that move a student to `dropped`.
    pub drop_after: i32,
}

impl Default for WarningPolicy {
    fn default() -> Self {
        Self { drop_after: 3 }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct TrainingPolicy {
    pub max_points: i32,
}

impl Default for TrainingPolicy {
    fn default() -> Self {
        Self { max_points: 100 }
    }
}

/// Defaults, then `academic.toml` (or `path`) if present, then `ACADEMIC__*` variables.
pub fn load(path: Option<&Path>) -> anyhow::Result<Settings> {
    let file = match path {
        Some(path) => File::from(path).required(true),
        None => File::with_name("academic").required(false),
    };

    let risk = RiskPolicy::default();
    let settings = Config::builder()
        .set_default("database.max_connections", 5)?
        .set_default("risk.threshold", risk.threshold)?
        .set_default("risk.high_margin", risk.high_margin)?
        .set_default("risk.critical_cpa", risk.critical_cpa)?
        .set_default("risk.failed_medium", risk.failed_medium as u64)?
        .set_default("risk.failed_high", risk.failed_high as u64)?
        .set_default("risk.failed_critical", risk.failed_critical as u64)?
        .set_default("warnings.drop_after", WarningPolicy::default().drop_after)?
        .set_default("training.max_points", TrainingPolicy::default().max_points)?
        .add_source(file)
        .add_source(Environment::with_prefix("ACADEMIC").separator("__"))
        .build()
        .context("failed to assemble configuration")?;

    let mut settings: Settings = settings
        .try_deserialize()
        .context("invalid configuration")?;

    if settings.warnings.drop_after < 1 {
        anyhow::bail!("warnings.drop_after must be at least 1");
    }
    if settings.training.max_points < 0 {
        anyhow::bail!("training.max_points must not be negative");
    }

    // Environment keys arrive lowercased, so cohort lookups are case-insensitive.
    settings.risk.cohort_thresholds = settings
        .risk
        .cohort_thresholds
        .into_iter()
        .map(|(cohort, threshold)| (cohort.to_lowercase(), threshold))
        .collect();

    Ok(settings)
}
