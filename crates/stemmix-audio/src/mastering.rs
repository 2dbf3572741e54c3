//! Final effects chain and encoding.
//!
//! Chain order: echo, EQ, compression, loudness normalization, clarity EQ,
//! stereo widening, then the limiter, which is always last. Mastering
//! degrades instead of failing: a rejected chain falls back to normalize +
//! limit, then to a plain re-encode, then to a byte copy of the mix.

use crate::processor::check_output;
use serde::Serialize;
use std::path::{Path, PathBuf};
use stemmix_core::{FallbackChain, MixSettings, OptimizationProfile, Result};
use stemmix_media::{
    run_ffmpeg, AudioEncoding, FfmpegCommand, Filter, FilterChain, ProcessBridge, ProcessRunner,
};
use tracing::{info, instrument};

/// Which rung of the mastering ladder produced the output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MasterChain {
    Full,
    Minimal,
    Reformat,
    Copy,
}

impl MasterChain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Minimal => "minimal",
            Self::Reformat => "reformat",
            Self::Copy => "copy",
        }
    }

    pub fn degraded(&self) -> bool {
        !matches!(self, Self::Full)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MasterOutcome {
    pub path: PathBuf,
    pub chain: MasterChain,
}

fn loudnorm() -> Filter {
    Filter::new("loudnorm")
        .arg("I", -16)
        .num("TP", -1.5)
        .arg("LRA", 11)
}

fn limiter() -> Filter {
    Filter::new("alimiter").num("limit", 0.95)
}

/// `aecho` rejects decays of zero, so tiny intensities are floored.
fn decay(value: f64) -> String {
    format!("{:.3}", value.max(0.001))
}

fn band(freq: u32, width_q: f64, gain_db: f64) -> Filter {
    Filter::new("equalizer")
        .arg("f", freq)
        .arg("width_type", "q")
        .num("width", width_q)
        .num("gain", gain_db)
}

/// The full effects chain for `settings` under `profile`.
pub fn effects_chain(settings: &MixSettings, profile: &OptimizationProfile) -> FilterChain {
    let light = profile.level.is_light();
    let mut chain = FilterChain::new();

    let echo = settings.echo_intensity();
    if echo > 0.0 {
        let (delays, decays) = if light {
            ("60".to_string(), decay(echo * 0.4))
        } else {
            (
                "60|120".to_string(),
                format!("{}|{}", decay(echo * 0.5), decay(echo * 0.3)),
            )
        };
        chain.push(
            Filter::new("aecho")
                .num("in_gain", 0.8)
                .num("out_gain", 0.9)
                .arg("delays", delays)
                .arg("decays", decays),
        );
    }

    let eq = settings.eq_settings.clamped();
    if settings.eq_enabled && !eq.is_flat() {
        if light {
            chain.push(Filter::new("bass").num("g", eq.low));
            chain.push(Filter::new("treble").num("g", eq.high));
        } else {
            chain.push(band(100, 1.0, eq.low));
            chain.push(band(1000, 1.0, eq.mid));
            chain.push(band(8000, 1.0, eq.high));
        }
    }

    chain.push(if light {
        Filter::new("acompressor")
            .arg("threshold", "-14dB")
            .num("ratio", 2.5)
            .arg("attack", 20)
            .arg("release", 250)
    } else {
        Filter::new("acompressor")
            .arg("threshold", "-16dB")
            .num("ratio", 3.0)
            .arg("attack", 15)
            .arg("release", 200)
            .num("makeup", 2.0)
    });

    if settings.normalize {
        chain.push(loudnorm());
    }
    if settings.enhance_clarity {
        chain.push(band(300, 1.0, -3.0));
        chain.push(band(4000, 1.0, 2.0));
    }
    if settings.stereo_widening && !light {
        chain.push(Filter::new("extrastereo").num("m", 1.5));
    }
    chain.push(limiter());
    chain
}

/// First retry: normalization and limiting only.
pub fn minimal_chain() -> FilterChain {
    FilterChain::new().then(loudnorm()).then(limiter())
}

pub struct EffectsProcessor<'a, R> {
    bridge: &'a ProcessBridge<R>,
    profile: &'a OptimizationProfile,
}

impl<'a, R: ProcessRunner> EffectsProcessor<'a, R> {
    pub fn new(bridge: &'a ProcessBridge<R>, profile: &'a OptimizationProfile) -> Self {
        Self { bridge, profile }
    }

    /// Master `mixed` to `output_stem` plus the format's extension.
    ///
    /// Only fails when even copying the mix fails.
    #[instrument(skip_all, fields(mixed = %mixed.display()))]
    pub async fn finalize(
        &self,
        mixed: &Path,
        settings: &MixSettings,
        output_stem: &Path,
    ) -> Result<MasterOutcome> {
        let encoded = output_stem.with_extension(settings.output_format.extension());
        let copied = match mixed.extension() {
            Some(ext) => output_stem.with_extension(ext),
            None => output_stem.to_path_buf(),
        };
        let encoding = AudioEncoding::final_output(settings, self.profile);
        let command = |chain: FilterChain| {
            FfmpegCommand::new(&encoded)
                .input(mixed)
                .audio_filter(chain)
                .encoding(encoding)
        };
        let full = command(effects_chain(settings, self.profile));
        let minimal = command(minimal_chain());
        let reformat = command(FilterChain::new());

        let copy_target = copied.as_path();
        let resolved = FallbackChain::new("master")
            .tier(MasterChain::Full.as_str(), || async move {
                run_ffmpeg(self.bridge, &full).await?;
                Ok(MasterChain::Full)
            })
            .tier(MasterChain::Minimal.as_str(), || async move {
                run_ffmpeg(self.bridge, &minimal).await?;
                Ok(MasterChain::Minimal)
            })
            .tier(MasterChain::Reformat.as_str(), || async move {
                run_ffmpeg(self.bridge, &reformat).await?;
                Ok(MasterChain::Reformat)
            })
            .tier(MasterChain::Copy.as_str(), move || async move {
                tokio::fs::copy(mixed, copy_target).await?;
                Ok(MasterChain::Copy)
            })
            .run(|chain| match chain {
                MasterChain::Copy => check_output(&copied),
                _ => check_output(&encoded),
            })
            .await?;

        let chain = resolved.value;
        let path = if chain == MasterChain::Copy {
            copied
        } else {
            encoded
        };
        info!(chain = chain.as_str(), path = %path.display(), "Master written");
        Ok(MasterOutcome { path, chain })
    }
}
