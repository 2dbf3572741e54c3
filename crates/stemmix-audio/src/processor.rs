//! Per-layer enhancement of separated stems.
//!
//! Each layer gets a fixed enhancement chain followed by its gain. A layer
//! whose chain fails is retried with gain only; only when that also fails
//! does the track fail.

use std::path::Path;
use stemmix_core::{
    is_usable_file, FallbackChain, LayerGains, OptimizationProfile, ProcessedStemSet, Result,
    StemKind, StemSet, StemmixError, TrackSlot,
};
use stemmix_media::{
    run_ffmpeg, AudioEncoding, FfmpegCommand, Filter, FilterChain, ProcessBridge, ProcessRunner,
};
use tracing::{info, instrument, warn};

fn compressor(threshold_db: i32, ratio: f64, attack_ms: u32, release_ms: u32) -> Filter {
    Filter::new("acompressor")
        .arg("threshold", format!("{threshold_db}dB"))
        .num("ratio", ratio)
        .arg("attack", attack_ms)
        .arg("release", release_ms)
}

fn peaking_eq(freq: u32, width_q: f64, gain_db: f64) -> Filter {
    Filter::new("equalizer")
        .arg("f", freq)
        .arg("width_type", "q")
        .num("width", width_q)
        .num("gain", gain_db)
}

fn volume(gain: f64) -> Filter {
    Filter::new("volume").num("volume", gain)
}

/// Enhancement chain for one layer, ending with its gain.
///
/// Light mode skips the EQ stage.
pub fn enhancement_chain(kind: StemKind, gain: f64, light: bool) -> FilterChain {
    let (shape, dynamics, eq) = match kind {
        // high-pass, compression, presence
        StemKind::Vocals => (
            vec![Filter::new("highpass").arg("f", 120)],
            compressor(-18, 3.0, 10, 120),
            Some(peaking_eq(3000, 1.0, 3.0)),
        ),
        // low-pass, compression, transients
        StemKind::Drums => (
            vec![Filter::new("lowpass").arg("f", 12000)],
            compressor(-12, 4.0, 2, 60),
            Some(peaking_eq(5000, 1.2, 2.0)),
        ),
        // low-pass, compression, sub
        StemKind::Bass => (
            vec![Filter::new("lowpass").arg("f", 250)],
            compressor(-15, 5.0, 15, 150),
            Some(peaking_eq(60, 1.0, 3.0)),
        ),
        StemKind::Other => (
            vec![Filter::new("bandpass")
                .arg("f", 1500)
                .arg("width_type", "h")
                .arg("width", 2800)],
            compressor(-20, 2.0, 20, 200),
            None,
        ),
    };

    let mut chain: FilterChain = shape.into_iter().collect();
    chain.push(dynamics);
    if let Some(eq) = eq.filter(|_| !light) {
        chain.push(eq);
    }
    chain.push(volume(gain));
    chain
}

/// Retry chain: gain only.
pub fn gain_only_chain(gain: f64) -> FilterChain {
    FilterChain::new().then(volume(gain))
}

pub(crate) fn check_output(path: &Path) -> Result<()> {
    if is_usable_file(path) {
        Ok(())
    } else {
        Err(StemmixError::Validation(format!(
            "no usable output at {}",
            path.display()
        )))
    }
}

/// Applies enhancement chains to a track's layers.
pub struct StemProcessor<'a, R> {
    bridge: &'a ProcessBridge<R>,
    profile: &'a OptimizationProfile,
}

impl<'a, R: ProcessRunner> StemProcessor<'a, R> {
    pub fn new(bridge: &'a ProcessBridge<R>, profile: &'a OptimizationProfile) -> Self {
        Self { bridge, profile }
    }

    /// Process all four layers of `stems` into `output_dir`, concurrently.
    #[instrument(skip_all, fields(slot = slot.as_str()))]
    pub async fn process(
        &self,
        slot: TrackSlot,
        stems: &StemSet,
        gains: LayerGains,
        output_dir: &Path,
    ) -> Result<ProcessedStemSet> {
        tokio::fs::create_dir_all(output_dir).await?;
        let out = StemSet::from_fn(|kind| {
            output_dir.join(format!(
                "{}.{}",
                kind.as_str(),
                self.profile.intermediate_extension()
            ))
        });

        let layer = |kind: StemKind| {
            self.process_layer(kind, stems.get(kind), gains.get(kind), out.get(kind))
        };
        let (vocals, drums, bass, other) = tokio::join!(
            layer(StemKind::Vocals),
            layer(StemKind::Drums),
            layer(StemKind::Bass),
            layer(StemKind::Other)
        );

        let mut gain_only = Vec::new();
        for (kind, result) in StemKind::ALL.into_iter().zip([vocals, drums, bass, other]) {
            if result? {
                gain_only.push(kind);
            }
        }
        info!(gain_only = gain_only.len(), "Track processed");
        Ok(ProcessedStemSet {
            slot,
            stems: out,
            gain_only,
        })
    }

    /// Returns whether the gain-only retry was needed.
    async fn process_layer(
        &self,
        kind: StemKind,
        input: &Path,
        gain: f64,
        output: &Path,
    ) -> Result<bool> {
        let encoding = AudioEncoding::intermediate(self.profile);
        let light = self.profile.level.is_light();
        let full = FfmpegCommand::new(output)
            .input(input)
            .audio_filter(enhancement_chain(kind, gain, light))
            .encoding(encoding);
        let plain = FfmpegCommand::new(output)
            .input(input)
            .audio_filter(gain_only_chain(gain))
            .encoding(encoding);

        let resolved = FallbackChain::new("process")
            .tier("enhance", || async move {
                run_ffmpeg(self.bridge, &full).await.map(|_| false)
            })
            .tier("gain-only", || async move {
                run_ffmpeg(self.bridge, &plain).await.map(|_| true)
            })
            .run(|_| check_output(output))
            .await?;
        if resolved.value {
            warn!(layer = kind.as_str(), "Layer processed with gain only");
        }
        Ok(resolved.value)
    }
}
