//! Musical feature analysis.
//!
//! The analyzer script prints one JSON object with `bpm`, `key`, `energy`
//! and `clarity` (extra fields such as waveform previews are ignored).
//! Analysis never fails a job: any problem yields default features.

use crate::cache::{cache_key, EntryKind, ResultCache};
use serde::Deserialize;
use std::path::Path;
use stemmix_core::{Features, Result, StemmixError, Tool, Track};
use stemmix_media::{ProcessBridge, ProcessRunner};
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Deserialize)]
struct RawFeatures {
    bpm: Option<f64>,
    key: Option<String>,
    energy: Option<f32>,
    clarity: Option<f32>,
}

impl From<RawFeatures> for Features {
    fn from(raw: RawFeatures) -> Self {
        let defaults = Features::default();
        Features {
            bpm: raw.bpm.unwrap_or(defaults.bpm),
            key: raw.key.unwrap_or(defaults.key),
            energy: raw.energy.unwrap_or(defaults.energy),
            clarity: raw.clarity.unwrap_or(defaults.clarity),
        }
        .sanitized()
    }
}

/// Derives [`Features`] for source files.
pub struct FeatureAnalyzer<'a, R> {
    bridge: &'a ProcessBridge<R>,
    cache: &'a ResultCache,
}

impl<'a, R: ProcessRunner> FeatureAnalyzer<'a, R> {
    pub fn new(bridge: &'a ProcessBridge<R>, cache: &'a ResultCache) -> Self {
        Self { bridge, cache }
    }

    /// Build a [`Track`] for `source`, from cache when possible.
    ///
    /// Fails only when `source` itself is unusable.
    #[instrument(skip(self), fields(source = %source.display()))]
    pub async fn analyze(&self, source: &Path) -> Result<Track> {
        let probe = Track::new(source, Features::default());
        probe.validate()?;

        let key = cache_key(&probe.base_name());
        if let Some(features) = self.cache.read::<Features>(EntryKind::Features, &key) {
            debug!(key, "Using cached features");
            return Ok(Track::from_cache(source, features));
        }

        let features = match self.run_analyzer(source).await {
            Ok(features) => {
                if let Err(e) = self.cache.write(EntryKind::Features, &key, &features) {
                    warn!(key, error = %e, "Failed to cache features");
                }
                features
            }
            Err(e) => {
                warn!(error = %e, "Analysis failed; using default features");
                Features::default()
            }
        };
        info!(bpm = features.bpm, key = %features.key, "Features ready");
        Ok(Track::new(source, features))
    }

    async fn run_analyzer(&self, source: &Path) -> Result<Features> {
        let out = self
            .bridge
            .invoke(
                Tool::Analyzer,
                vec![source.to_string_lossy().into_owned()],
                &[],
            )
            .await?;
        let raw: RawFeatures = out.parse_json().map_err(|e| {
            StemmixError::Validation(format!("unreadable analyzer output: {e}"))
        })?;
        Ok(raw.into())
    }
}
