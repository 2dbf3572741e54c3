//! Source tracks and their analyzed features.

use crate::error::{Result, StemmixError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Musical features derived from a track by the analyzer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Features {
    /// Detected tempo in beats per minute.
    pub bpm: f64,
    /// Detected key, e.g. "A Minor".
    pub key: String,
    /// Perceived energy (0.0 to 1.0).
    pub energy: f32,
    /// Spectral brightness (0.0 to 1.0).
    pub clarity: f32,
}

impl Default for Features {
    fn default() -> Self {
        Self {
            bpm: 120.0,
            key: "C Major".into(),
            energy: 0.5,
            clarity: 0.5,
        }
    }
}

impl Features {
    /// Clamp values into their documented ranges. Non-finite or
    /// non-positive tempos fall back to the default.
    pub fn sanitized(mut self) -> Self {
        if !self.bpm.is_finite() || self.bpm <= 0.0 {
            self.bpm = Self::default().bpm;
        }
        self.energy = clamp_unit(self.energy);
        self.clarity = clamp_unit(self.clarity);
        if self.key.trim().is_empty() {
            self.key = Self::default().key;
        }
        self
    }
}

fn clamp_unit(v: f32) -> f32 {
    if v.is_nan() {
        0.5
    } else {
        v.clamp(0.0, 1.0)
    }
}

/// Which side of the mix a track is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackSlot {
    /// The track whose tempo is authoritative.
    Primary,
    /// The track that gets tempo-matched to the primary.
    Secondary,
}

impl TrackSlot {
    /// Directory-safe name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Secondary => "secondary",
        }
    }
}

/// An input recording plus its immutable features.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Track {
    source: PathBuf,
    features: Features,
    /// Whether the features came from the result cache.
    #[serde(default)]
    features_cached: bool,
}

impl Track {
    /// Create a track with the given features.
    pub fn new(source: impl Into<PathBuf>, features: Features) -> Self {
        Self {
            source: source.into(),
            features: features.sanitized(),
            features_cached: false,
        }
    }

    /// Create a track whose features were read from the cache.
    pub fn from_cache(source: impl Into<PathBuf>, features: Features) -> Self {
        Self {
            features_cached: true,
            ..Self::new(source, features)
        }
    }

    /// Path to the source audio.
    pub fn source(&self) -> &Path {
        &self.source
    }

    /// Analyzed features.
    pub fn features(&self) -> &Features {
        &self.features
    }

    /// Whether features were cache-sourced.
    pub fn features_cached(&self) -> bool {
        self.features_cached
    }

    /// Base file name without extension, used for cache keys and directory names.
    pub fn base_name(&self) -> String {
        self.source
            .file_stem()
            .and_then(|s| s.to_str())
            .map(|s| s.split('.').next().unwrap_or(s).to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "track".into())
    }

    /// Ensure the source exists, is a regular file and can be opened.
    pub fn validate(&self) -> Result<()> {
        let meta = std::fs::metadata(&self.source).map_err(|e| {
            StemmixError::InvalidInput(format!(
                "Track not readable: {} ({e})",
                self.source.display()
            ))
        })?;
        if !meta.is_file() {
            return Err(StemmixError::InvalidInput(format!(
                "Track is not a file: {}",
                self.source.display()
            )));
        }
        if meta.len() == 0 {
            return Err(StemmixError::InvalidInput(format!(
                "Track is empty: {}",
                self.source.display()
            )));
        }
        std::fs::File::open(&self.source)?;
        Ok(())
    }
}
