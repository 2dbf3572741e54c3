//! Tempo matching of the secondary track.
//!
//! A single uniform `atempo` factor is applied to every layer in place
//! (written beside the layer, then renamed over it). A layer that fails
//! keeps its original timing and is reported; the stage never fails a job.

use crate::processor::check_output;
use serde::Serialize;
use std::path::{Path, PathBuf};
use stemmix_core::{OptimizationProfile, ProcessedStemSet, Result, StemKind, StemmixError};
use stemmix_media::{
    run_ffmpeg, AudioEncoding, FfmpegCommand, Filter, FilterChain, ProcessBridge, ProcessRunner,
};
use tracing::{info, instrument, warn};

/// Bounds of the `atempo` factor.
pub const TEMPO_FACTOR_RANGE: (f64, f64) = (0.5, 1.5);

/// Clamp a stretch factor into [`TEMPO_FACTOR_RANGE`]; NaN means unchanged.
pub fn clamp_factor(factor: f64) -> f64 {
    if factor.is_nan() {
        1.0
    } else {
        factor.clamp(TEMPO_FACTOR_RANGE.0, TEMPO_FACTOR_RANGE.1)
    }
}

/// Ratio that would align `secondary_bpm` with `primary_bpm`.
///
/// Reported alongside the applied factor; never applied by itself.
pub fn bpm_ratio(primary_bpm: f64, secondary_bpm: f64) -> Option<f64> {
    (primary_bpm > 0.0 && secondary_bpm > 0.0).then(|| clamp_factor(primary_bpm / secondary_bpm))
}

pub fn tempo_chain(factor: f64) -> FilterChain {
    FilterChain::new().then(Filter::new("atempo").num("tempo", clamp_factor(factor)))
}

/// What the stage did.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TempoOutcome {
    pub factor: f64,
    pub adjusted: Vec<StemKind>,
    pub failed: Vec<StemKind>,
}

impl TempoOutcome {
    pub fn degraded(&self) -> bool {
        !self.failed.is_empty()
    }
}

pub struct TempoMatcher<'a, R> {
    bridge: &'a ProcessBridge<R>,
    profile: &'a OptimizationProfile,
}

impl<'a, R: ProcessRunner> TempoMatcher<'a, R> {
    pub fn new(bridge: &'a ProcessBridge<R>, profile: &'a OptimizationProfile) -> Self {
        Self { bridge, profile }
    }

    /// Stretch every layer of `stems` by `factor`, in place.
    #[instrument(skip_all, fields(slot = stems.slot.as_str(), factor = factor))]
    pub async fn match_tempo(&self, stems: &ProcessedStemSet, factor: f64) -> TempoOutcome {
        let factor = clamp_factor(factor);
        let mut outcome = TempoOutcome {
            factor,
            adjusted: Vec::new(),
            failed: Vec::new(),
        };
        if (factor - 1.0).abs() < 1e-6 {
            return outcome;
        }

        let layer = |kind: StemKind| self.stretch(stems.stems.get(kind), factor);
        let (vocals, drums, bass, other) = tokio::join!(
            layer(StemKind::Vocals),
            layer(StemKind::Drums),
            layer(StemKind::Bass),
            layer(StemKind::Other)
        );
        for (kind, result) in StemKind::ALL.into_iter().zip([vocals, drums, bass, other]) {
            match result {
                Ok(()) => outcome.adjusted.push(kind),
                Err(e) => {
                    warn!(layer = kind.as_str(), error = %e, "Tempo change failed; layer left as is");
                    outcome.failed.push(kind);
                }
            }
        }
        info!(
            adjusted = outcome.adjusted.len(),
            failed = outcome.failed.len(),
            "Tempo matched"
        );
        outcome
    }

    async fn stretch(&self, path: &Path, factor: f64) -> Result<()> {
        let tmp = stretch_target(path);
        let cmd = FfmpegCommand::new(&tmp)
            .input(path)
            .audio_filter(tempo_chain(factor))
            .encoding(AudioEncoding::intermediate(self.profile));
        let result = async {
            run_ffmpeg(self.bridge, &cmd).await?;
            check_output(&tmp)?;
            tokio::fs::rename(&tmp, path).await?;
            Ok::<(), StemmixError>(())
        }
        .await;
        if result.is_err() {
            let _ = tokio::fs::remove_file(&tmp).await;
        }
        result
    }
}

/// `vocals.wav` -> `vocals.tempo.wav`, keeping the extension ffmpeg infers from.
fn stretch_target(path: &Path) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    match path.extension() {
        Some(ext) => path.with_file_name(format!("{stem}.tempo.{}", ext.to_string_lossy())),
        None => path.with_file_name(format!("{stem}.tempo")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{host, layers};
    use std::sync::Arc;
    use stemmix_core::{OptimizationLevel, Tool, TrackSlot};
    use stemmix_media::fake::FakeRunner;

    #[test]
    fn test_factor_clamping() {
        assert_eq!(clamp_factor(2.0), 1.5);
        assert_eq!(clamp_factor(0.1), 0.5);
        assert_eq!(clamp_factor(f64::NAN), 1.0);
        assert_eq!(tempo_chain(1.25).to_string(), "atempo=tempo=1.250");
        assert_eq!(bpm_ratio(128.0, 120.0).map(|r| (r * 1000.0).round()), Some(1067.0));
        assert_eq!(bpm_ratio(0.0, 120.0), None);
    }

    #[test]
    fn test_stretch_target_keeps_extension() {
        assert_eq!(
            stretch_target(Path::new("/w/p/bass.mp3")),
            PathBuf::from("/w/p/bass.tempo.mp3")
        );
    }

    #[tokio::test]
    async fn test_layers_stretched_in_place() {
        let tmp = tempfile::tempdir().expect("failed to create tempdir");
        let host = host(tmp.path(), OptimizationLevel::Standard);
        let runner = Arc::new(FakeRunner::new());
        let bridge = ProcessBridge::new(runner.clone(), &host);
        let set = ProcessedStemSet {
            slot: TrackSlot::Secondary,
            stems: layers(&tmp.path().join("proc")),
            gain_only: Vec::new(),
        };

        let outcome = TempoMatcher::new(&bridge, &host.profile)
            .match_tempo(&set, 1.2)
            .await;
        assert_eq!(outcome.adjusted.len(), 4);
        assert!(!outcome.degraded());
        assert!(set.stems.is_usable());
        assert!(!stretch_target(&set.stems.bass).exists());
        assert_eq!(runner.count(Tool::Ffmpeg), 4);
    }

    #[tokio::test]
    async fn test_unit_factor_is_noop() {
        let tmp = tempfile::tempdir().expect("failed to create tempdir");
        let host = host(tmp.path(), OptimizationLevel::Standard);
        let runner = Arc::new(FakeRunner::new());
        let bridge = ProcessBridge::new(runner.clone(), &host);
        let set = ProcessedStemSet {
            slot: TrackSlot::Secondary,
            stems: layers(&tmp.path().join("proc")),
            gain_only: Vec::new(),
        };
        let outcome = TempoMatcher::new(&bridge, &host.profile).match_tempo(&set, 1.0).await;
        assert!(outcome.adjusted.is_empty());
        assert_eq!(runner.count(Tool::Ffmpeg), 0);
    }

    #[tokio::test]
    async fn test_failure_leaves_layer_untouched() {
        let tmp = tempfile::tempdir().expect("failed to create tempdir");
        let host = host(tmp.path(), OptimizationLevel::Standard);
        let bridge = ProcessBridge::new(FakeRunner::new().fail_ffmpeg_when("drums"), &host);
        let set = ProcessedStemSet {
            slot: TrackSlot::Secondary,
            stems: layers(&tmp.path().join("proc")),
            gain_only: Vec::new(),
        };
        let before = std::fs::read(&set.stems.drums).unwrap();

        let outcome = TempoMatcher::new(&bridge, &host.profile).match_tempo(&set, 0.9).await;
        assert_eq!(outcome.failed, vec![StemKind::Drums]);
        assert!(outcome.degraded());
        assert_eq!(std::fs::read(&set.stems.drums).unwrap(), before);
    }
}
