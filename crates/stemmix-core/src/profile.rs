//! Host resource detection and the optimization profile derived from it.
//!
//! A [`HostProfile`] is computed per job (host load changes between jobs)
//! and handed to every stage explicitly.

use crate::config::StemmixConfig;
use crate::error::StemmixError;
use crate::tools::ToolPaths;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::info;

const GIB: u64 = 1024 * 1024 * 1024;

/// Below this much available memory the host runs in light mode.
pub const LIGHT_MODE_MEMORY_BYTES: u64 = 2 * GIB;
/// At or below this many CPUs the host runs in light mode.
pub const LIGHT_MODE_MAX_CPUS: usize = 2;

/// Coarse quality/performance switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptimizationLevel {
    Standard,
    Light,
}

impl OptimizationLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::Light => "light",
        }
    }

    pub fn is_light(&self) -> bool {
        matches!(self, Self::Light)
    }
}

impl std::fmt::Display for OptimizationLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for OptimizationLevel {
    type Err = StemmixError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "standard" => Ok(Self::Standard),
            "light" => Ok(Self::Light),
            other => Err(StemmixError::Config(format!(
                "unknown optimization level '{other}'"
            ))),
        }
    }
}

/// Point-in-time view of host memory and CPUs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceSnapshot {
    pub total_memory_bytes: u64,
    pub available_memory_bytes: u64,
    pub cpu_count: usize,
}

impl ResourceSnapshot {
    /// Read current memory and CPU figures from the host.
    pub fn detect() -> Self {
        let mut sys = sysinfo::System::new();
        sys.refresh_memory();
        let snapshot = Self {
            total_memory_bytes: sys.total_memory(),
            available_memory_bytes: sys.available_memory(),
            cpu_count: num_cpus::get(),
        };
        info!(
            total_gb = snapshot.total_memory_bytes as f64 / GIB as f64,
            available_gb = snapshot.available_memory_bytes as f64 / GIB as f64,
            cpus = snapshot.cpu_count,
            "Host resources detected"
        );
        snapshot
    }

    /// Light mode when memory is short or CPUs are few.
    pub fn level(&self) -> OptimizationLevel {
        if self.available_memory_bytes < LIGHT_MODE_MEMORY_BYTES
            || self.cpu_count <= LIGHT_MODE_MAX_CPUS
        {
            OptimizationLevel::Light
        } else {
            OptimizationLevel::Standard
        }
    }

    /// Heap budget for buffer sizing: a quarter of available memory, capped at 4 GiB.
    pub fn max_heap_bytes(&self) -> u64 {
        (self.available_memory_bytes / 4).clamp(64 * 1024 * 1024, 4 * GIB)
    }

    /// Memory flag for ML children, by total host memory.
    pub fn child_memory_limit(&self) -> Option<&'static str> {
        if self.total_memory_bytes < 8 * GIB {
            Some("2G")
        } else if self.total_memory_bytes < 16 * GIB {
            Some("4G")
        } else {
            None
        }
    }
}

/// Parameters every stage reads from, derived from the level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizationProfile {
    pub level: OptimizationLevel,
    /// Sample rate of intermediate files.
    pub sample_rate: u32,
    /// PCM bit depth of intermediate WAVs (standard only).
    pub bit_depth: u16,
    /// Lossy bitrate for intermediates in light mode.
    pub intermediate_bitrate_kbps: Option<u32>,
    /// Frames per processing chunk hint for children.
    pub chunk_frames: usize,
    pub max_heap_bytes: u64,
    pub child_memory_limit: Option<String>,
    pub separation_timeout: Duration,
    pub ffmpeg_timeout: Duration,
    pub probe_timeout: Duration,
}

impl OptimizationProfile {
    /// Derive a profile for `level` with resource-dependent limits from `snapshot`.
    pub fn new(level: OptimizationLevel, snapshot: &ResourceSnapshot) -> Self {
        let (sample_rate, separation_secs, ffmpeg_secs) = match level {
            OptimizationLevel::Standard => (44_100, 600, 240),
            OptimizationLevel::Light => (22_050, 300, 180),
        };
        let chunk_secs = if level.is_light() { 5 } else { 10 };
        Self {
            level,
            sample_rate,
            bit_depth: if level.is_light() { 16 } else { 24 },
            intermediate_bitrate_kbps: level.is_light().then_some(96),
            chunk_frames: sample_rate as usize * chunk_secs,
            max_heap_bytes: snapshot.max_heap_bytes(),
            child_memory_limit: snapshot.child_memory_limit().map(str::to_string),
            separation_timeout: Duration::from_secs(separation_secs),
            ffmpeg_timeout: Duration::from_secs(ffmpeg_secs),
            probe_timeout: Duration::from_secs(30),
        }
    }

    /// Extension of intermediate stem files.
    pub fn intermediate_extension(&self) -> &'static str {
        if self.intermediate_bitrate_kbps.is_some() {
            "mp3"
        } else {
            "wav"
        }
    }

    /// Environment hints passed to every child process.
    pub fn child_env(&self, cpu_count: usize) -> Vec<(String, String)> {
        let mut env = vec![
            (
                "STEMMIX_LIGHT_MODE".to_string(),
                if self.level.is_light() { "1" } else { "0" }.to_string(),
            ),
            ("STEMMIX_CPU_COUNT".to_string(), cpu_count.to_string()),
            (
                "STEMMIX_MAX_HEAP_MB".to_string(),
                (self.max_heap_bytes / (1024 * 1024)).to_string(),
            ),
            ("STEMMIX_CHUNK_FRAMES".to_string(), self.chunk_frames.to_string()),
        ];
        if let Some(limit) = &self.child_memory_limit {
            env.push(("TF_FORCE_GPU_ALLOW_GROWTH".to_string(), "true".to_string()));
            env.push(("TF_MEM_LIMIT".to_string(), limit.clone()));
        }
        env
    }
}

/// Everything a job needs to know about the machine it runs on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostProfile {
    pub resources: ResourceSnapshot,
    pub profile: OptimizationProfile,
    pub tools: ToolPaths,
}

impl HostProfile {
    /// Detect resources and tools now.
    pub fn detect(config: &StemmixConfig) -> Self {
        let resources = ResourceSnapshot::detect();
        let level = config.force_level.unwrap_or_else(|| resources.level());
        Self::from_parts(resources, level, ToolPaths::discover(config))
    }

    /// Build from explicit parts.
    pub fn from_parts(
        resources: ResourceSnapshot,
        level: OptimizationLevel,
        tools: ToolPaths,
    ) -> Self {
        Self {
            profile: OptimizationProfile::new(level, &resources),
            resources,
            tools,
        }
    }

    /// Shorthand for the optimization level.
    pub fn level(&self) -> OptimizationLevel {
        self.profile.level
    }

    /// Child environment hints for this host.
    pub fn child_env(&self) -> Vec<(String, String)> {
        self.profile.child_env(self.resources.cpu_count)
    }
}
