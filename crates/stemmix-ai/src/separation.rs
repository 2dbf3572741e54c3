//! Source separation into vocals, drums, bass and other.
//!
//! Strategies are tried best-first until one yields four usable layers:
//!
//! 1. The external ML separator script, with progress reporting.
//! 2. Frequency-band filtering of the original through ffmpeg.
//! 3. Identity: the original copied into every layer.
//!
//! ML and filter results are cached; identity results are not, so a later
//! run with a healthier host can still reach a better tier.

use crate::cache::{cache_key, ResultCache};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, Ordering};
use stemmix_core::{
    FallbackChain, OptimizationProfile, Result, StemKind, StemSet, StemmixError, Tool, Track,
};
use stemmix_media::{
    run_ffmpeg, AudioEncoding, FfmpegCommand, Filter, FilterChain, ProcessBridge, ProcessRunner,
    ToolOutput,
};
use tracing::{info, instrument, warn};

/// Which strategy produced a stem set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeparationMethod {
    /// External ML model.
    Ml,
    /// FFmpeg band filters.
    Filter,
    /// Original copied into every layer.
    Identity,
}

impl SeparationMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ml => "ml",
            Self::Filter => "filter",
            Self::Identity => "identity",
        }
    }

    /// Whether results from this method may be cached.
    pub fn is_cacheable(&self) -> bool {
        !matches!(self, Self::Identity)
    }
}

/// Result of separating one track.
#[derive(Debug, Clone, PartialEq)]
pub struct SeparationOutcome {
    pub stems: StemSet,
    pub method: SeparationMethod,
    pub from_cache: bool,
}

/// Band filter approximating one layer.
pub fn band_filter(kind: StemKind) -> FilterChain {
    let compressor = |threshold: &str, ratio: u32, attack: u32, release: u32| {
        Filter::new("acompressor")
            .arg("threshold", threshold)
            .arg("ratio", ratio)
            .arg("attack", attack)
            .arg("release", release)
    };
    match kind {
        StemKind::Vocals => FilterChain::new()
            .then(
                Filter::new("bandpass")
                    .arg("f", 2000)
                    .arg("width_type", "h")
                    .arg("width", 4800),
            )
            .then(compressor("-20dB", 4, 20, 100)),
        StemKind::Drums => FilterChain::new()
            .then(Filter::new("highpass").arg("f", 200))
            .then(Filter::new("lowpass").arg("f", 8000))
            .then(compressor("-15dB", 5, 5, 50)),
        StemKind::Bass => FilterChain::new()
            .then(Filter::new("lowpass").arg("f", 250))
            .then(compressor("-10dB", 6, 10, 80)),
        StemKind::Other => FilterChain::new()
            .then(
                Filter::new("bandreject")
                    .arg("f", 2000)
                    .arg("width_type", "h")
                    .arg("width", 4800),
            )
            .then(
                Filter::new("bandreject")
                    .arg("f", 100)
                    .arg("width_type", "h")
                    .arg("width", 300),
            ),
    }
}

/// Separates tracks for one job.
pub struct StemSeparator<'a, R> {
    bridge: &'a ProcessBridge<R>,
    cache: &'a ResultCache,
    profile: &'a OptimizationProfile,
}

impl<'a, R: ProcessRunner> StemSeparator<'a, R> {
    pub fn new(
        bridge: &'a ProcessBridge<R>,
        cache: &'a ResultCache,
        profile: &'a OptimizationProfile,
    ) -> Self {
        Self {
            bridge,
            cache,
            profile,
        }
    }

    /// Separate `track` into `output_dir`.
    pub async fn separate(&self, track: &Track, output_dir: &Path) -> Result<SeparationOutcome> {
        self.separate_with_progress(track, output_dir, &|_| {}).await
    }

    /// Separate `track`, reporting ML progress (0-100) to `on_progress`.
    #[instrument(skip_all, fields(track = %track.source().display()))]
    pub async fn separate_with_progress(
        &self,
        track: &Track,
        output_dir: &Path,
        on_progress: &(dyn Fn(u8) + Send + Sync),
    ) -> Result<SeparationOutcome> {
        track.validate()?;
        let key = cache_key(&track.base_name());
        if let Some(hit) = self.cache.read_stems(&key) {
            match claim_cached(&hit.stems, &output_dir.join("cached")).await {
                Ok(stems) => {
                    info!(key, method = hit.method.as_str(), "Using cached stems");
                    on_progress(100);
                    return Ok(SeparationOutcome {
                        stems,
                        method: hit.method,
                        from_cache: true,
                    });
                }
                Err(e) => warn!(key, error = %e, "Cached stems vanished; separating again"),
            }
        }

        tokio::fs::create_dir_all(output_dir).await?;
        let resolved = FallbackChain::new("separate")
            .tier(SeparationMethod::Ml.as_str(), || {
                self.separate_ml(track, output_dir, on_progress)
            })
            .tier(SeparationMethod::Filter.as_str(), || {
                self.separate_filter(track, output_dir, on_progress)
            })
            .tier(SeparationMethod::Identity.as_str(), || {
                self.separate_identity(track, output_dir)
            })
            .run(|(_, stems): &(SeparationMethod, StemSet)| stems.validate())
            .await?;
        let (method, stems) = resolved.value;
        on_progress(100);

        if method.is_cacheable() {
            // A cache failure costs only a future re-separation.
            if let Err(e) = self.cache.store_stems(&key, &stems, method).await {
                warn!(key, error = %e, "Failed to cache stems");
            }
        }
        Ok(SeparationOutcome {
            stems,
            method,
            from_cache: false,
        })
    }

    async fn separate_ml(
        &self,
        track: &Track,
        output_dir: &Path,
        on_progress: &(dyn Fn(u8) + Send + Sync),
    ) -> Result<(SeparationMethod, StemSet)> {
        let ml_dir = output_dir.join("ml");
        tokio::fs::create_dir_all(&ml_dir).await?;
        let mut args = vec![
            track.source().to_string_lossy().into_owned(),
            ml_dir.to_string_lossy().into_owned(),
        ];
        if self.profile.level.is_light() {
            args.push("--light".into());
        }
        let out = self
            .bridge
            .invoke_with_progress(Tool::Separator, args, on_progress)
            .await?;
        let stems = StemSet::from_map(&stem_map(&out, &ml_dir)?)?;
        Ok((SeparationMethod::Ml, stems))
    }

    /// Approximate each layer with a band filter; progress advances by a
    /// quarter per finished band.
    async fn separate_filter(
        &self,
        track: &Track,
        output_dir: &Path,
        on_progress: &(dyn Fn(u8) + Send + Sync),
    ) -> Result<(SeparationMethod, StemSet)> {
        let dir = output_dir.join("filter");
        tokio::fs::create_dir_all(&dir).await?;
        let stems = StemSet::from_fn(|kind| {
            dir.join(format!(
                "{}.{}",
                kind.as_str(),
                self.profile.intermediate_extension()
            ))
        });

        let encoding = AudioEncoding::intermediate(self.profile);
        let finished = AtomicU8::new(0);
        let finished = &finished;
        let run = |kind: StemKind| {
            let cmd = FfmpegCommand::new(stems.get(kind))
                .input(track.source())
                .audio_filter(band_filter(kind))
                .encoding(encoding);
            async move {
                run_ffmpeg(self.bridge, &cmd).await?;
                let done = finished.fetch_add(1, Ordering::SeqCst) + 1;
                on_progress(done * 25);
                Ok::<_, StemmixError>(())
            }
        };
        let (vocals, drums, bass, other) = tokio::join!(
            run(StemKind::Vocals),
            run(StemKind::Drums),
            run(StemKind::Bass),
            run(StemKind::Other)
        );
        vocals?;
        drums?;
        bass?;
        other?;
        Ok((SeparationMethod::Filter, stems))
    }

    async fn separate_identity(
        &self,
        track: &Track,
        output_dir: &Path,
    ) -> Result<(SeparationMethod, StemSet)> {
        let dir = output_dir.join("identity");
        tokio::fs::create_dir_all(&dir).await?;
        let ext = track
            .source()
            .extension()
            .map(|e| e.to_string_lossy().into_owned())
            .unwrap_or_else(|| "audio".into());
        let stems = StemSet::from_fn(|kind| dir.join(format!("{}.{ext}", kind.as_str())));
        for (_, path) in stems.iter() {
            tokio::fs::copy(track.source(), path).await?;
        }
        warn!("Using the original audio for every layer");
        Ok((SeparationMethod::Identity, stems))
    }
}

/// Copy a cached stem set into the job's own `dir`.
///
/// Later stages read only these copies, so a concurrent purge or eviction
/// of the cache entry cannot pull files out from under the job.
async fn claim_cached(cached: &StemSet, dir: &Path) -> Result<StemSet> {
    tokio::fs::create_dir_all(dir).await?;
    let mut stems = cached.clone();
    for (kind, source) in cached.iter() {
        let target = match source.extension() {
            Some(ext) => dir.join(kind.as_str()).with_extension(ext),
            None => dir.join(kind.as_str()),
        };
        tokio::fs::copy(source, &target).await?;
        *stems.get_mut(kind) = target;
    }
    stems.validate()?;
    Ok(stems)
}

/// Extract the layer map from a separator result, optionally nested under
/// `"stems"`. Relative paths are taken relative to `base_dir`.
fn stem_map(out: &ToolOutput, base_dir: &Path) -> Result<HashMap<String, PathBuf>> {
    let json = out.json().ok_or_else(|| {
        StemmixError::Validation("separator produced no JSON stem map".into())
    })?;
    let obj = json
        .get("stems")
        .unwrap_or(json)
        .as_object()
        .ok_or_else(|| StemmixError::Validation("stem map is not an object".into()))?;
    Ok(obj
        .iter()
        .filter_map(|(name, v)| v.as_str().map(|p| (name.clone(), p)))
        .map(|(name, p)| {
            let path = PathBuf::from(p);
            let path = if path.is_relative() {
                base_dir.join(path)
            } else {
                path
            };
            (name, path)
        })
        .collect())
}
