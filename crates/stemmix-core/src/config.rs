//! Pipeline configuration.
//!
//! Load order: built-in defaults, then an optional JSON file, then
//! `STEMMIX_*` environment overrides. The result is a plain value; the
//! environment is not consulted again after loading.

use crate::error::{Result, StemmixError};
use crate::profile::OptimizationLevel;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

/// Default cache retention in days.
pub const DEFAULT_RETENTION_DAYS: u64 = 7;

/// Configuration for the whole pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StemmixConfig {
    /// Root of the on-disk result cache.
    pub cache_dir: PathBuf,
    /// Parent directory for per-job temp workspaces.
    pub work_dir: PathBuf,
    /// Where finished mixes are placed.
    pub output_dir: PathBuf,

    pub ffmpeg: Option<PathBuf>,
    pub ffprobe: Option<PathBuf>,
    pub python: Option<PathBuf>,
    pub separator_script: Option<PathBuf>,
    pub analyzer_script: Option<PathBuf>,

    /// Pin the optimization level instead of detecting it per job.
    pub force_level: Option<OptimizationLevel>,
    /// Keep job workspaces for diagnostics.
    pub retain_artifacts: bool,
    pub cache_retention_days: u64,
    pub max_running_jobs: usize,
    pub max_queued_jobs: usize,
}

impl Default for StemmixConfig {
    fn default() -> Self {
        let cache_dir = dirs::cache_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("stemmix");
        Self {
            work_dir: std::env::temp_dir(),
            output_dir: cache_dir.join("output"),
            cache_dir,
            ffmpeg: None,
            ffprobe: None,
            python: None,
            separator_script: None,
            analyzer_script: None,
            force_level: None,
            retain_artifacts: false,
            cache_retention_days: DEFAULT_RETENTION_DAYS,
            max_running_jobs: 2,
            max_queued_jobs: 8,
        }
    }
}

impl StemmixConfig {
    /// Load defaults, an optional JSON file and environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        info!(cache = %config.cache_dir.display(), "Configuration loaded");
        Ok(config)
    }

    /// Read a JSON config file; missing fields keep their defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path).map_err(|e| {
            StemmixError::Config(format!("Cannot read {}: {e}", path.display()))
        })?;
        serde_json::from_str(&data).map_err(|e| {
            StemmixError::Config(format!("Invalid config {}: {e}", path.display()))
        })
    }

    /// Apply `STEMMIX_*` overrides using `lookup` as the environment.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        let path = |key: &str| lookup(key).filter(|v| !v.is_empty()).map(PathBuf::from);

        if let Some(p) = path("STEMMIX_CACHE_DIR") {
            self.cache_dir = p;
        }
        if let Some(p) = path("STEMMIX_WORK_DIR") {
            self.work_dir = p;
        }
        if let Some(p) = path("STEMMIX_OUTPUT_DIR") {
            self.output_dir = p;
        }
        if let Some(p) = path("STEMMIX_FFMPEG") {
            self.ffmpeg = Some(p);
        }
        if let Some(p) = path("STEMMIX_FFPROBE") {
            self.ffprobe = Some(p);
        }
        if let Some(p) = path("STEMMIX_PYTHON") {
            self.python = Some(p);
        }
        if let Some(p) = path("STEMMIX_SEPARATOR_SCRIPT") {
            self.separator_script = Some(p);
        }
        if let Some(p) = path("STEMMIX_ANALYZER_SCRIPT") {
            self.analyzer_script = Some(p);
        }
        if let Some(level) = lookup("STEMMIX_FORCE_LEVEL").filter(|v| !v.is_empty()) {
            self.force_level = Some(level.parse()?);
        }
        if let Some(v) = lookup("STEMMIX_RETAIN_ARTIFACTS") {
            self.retain_artifacts = matches!(v.as_str(), "1" | "true" | "yes");
        }
        if let Some(v) = lookup("STEMMIX_MAX_RUNNING_JOBS") {
            self.max_running_jobs = parse_count("STEMMIX_MAX_RUNNING_JOBS", &v)?;
        }
        Ok(())
    }

    /// Cache retention as a duration.
    pub fn cache_retention(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.cache_retention_days.max(1) * 24 * 60 * 60)
    }
}

fn parse_count(key: &str, value: &str) -> Result<usize> {
    value
        .parse::<usize>()
        .ok()
        .filter(|n| *n > 0)
        .ok_or_else(|| StemmixError::Config(format!("{key} must be a positive integer")))
}
