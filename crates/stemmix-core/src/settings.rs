//! User-facing mix settings.
//!
//! Values arrive as JSON from callers and are never trusted: every numeric
//! field is read through an accessor that clamps it at the point of use.

use crate::stems::StemKind;
use crate::track::TrackSlot;
use serde::{Deserialize, Serialize};

/// Allowed crossfade range in seconds.
pub const CROSSFADE_RANGE: (f64, f64) = (1.0, 20.0);
/// Allowed tempo offset range.
pub const TEMPO_OFFSET_RANGE: (f64, f64) = (-0.5, 0.5);
/// Allowed EQ gain range in dB.
pub const EQ_GAIN_RANGE: (f64, f64) = (-12.0, 12.0);

/// Container of the final mastered file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Mp3,
    Wav,
    Flac,
}

impl OutputFormat {
    /// File extension for this container.
    pub fn extension(self) -> &'static str {
        match self {
            Self::Mp3 => "mp3",
            Self::Wav => "wav",
            Self::Flac => "flac",
        }
    }
}

/// Three-band EQ gains in dB.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct EqSettings {
    #[serde(default)]
    pub low: f64,
    #[serde(default)]
    pub mid: f64,
    #[serde(default)]
    pub high: f64,
}

impl EqSettings {
    /// Gains clamped into [-12, 12] dB.
    pub fn clamped(&self) -> Self {
        Self {
            low: clamp(self.low, EQ_GAIN_RANGE, 0.0),
            mid: clamp(self.mid, EQ_GAIN_RANGE, 0.0),
            high: clamp(self.high, EQ_GAIN_RANGE, 0.0),
        }
    }

    /// All bands flat.
    pub fn is_flat(&self) -> bool {
        let c = self.clamped();
        c.low == 0.0 && c.mid == 0.0 && c.high == 0.0
    }
}

/// Flat settings record for one mix job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MixSettings {
    pub bpm_match: bool,
    pub key_match: bool,

    pub vocal_level1: f64,
    pub vocal_level2: f64,
    pub drums_level1: f64,
    pub drums_level2: f64,
    pub bass_level1: f64,
    pub bass_level2: f64,
    pub other_level1: f64,
    pub other_level2: f64,

    /// Seconds; clamped into [1, 20].
    pub crossfade_length: f64,
    /// Relative tempo change for the secondary track; clamped into [-0.5, 0.5].
    pub tempo_adjustment: f64,
    /// Echo intensity (0 disables).
    pub echo: f64,

    pub eq_enabled: bool,
    pub eq_settings: EqSettings,
    pub enhance_clarity: bool,
    pub normalize: bool,
    pub stereo_widening: bool,

    pub output_format: OutputFormat,
    pub output_bitrate_kbps: Option<u32>,
}

impl Default for MixSettings {
    fn default() -> Self {
        Self {
            bpm_match: true,
            key_match: false,
            vocal_level1: 0.8,
            vocal_level2: 0.8,
            drums_level1: 0.7,
            drums_level2: 0.7,
            bass_level1: 0.7,
            bass_level2: 0.7,
            other_level1: 0.6,
            other_level2: 0.6,
            crossfade_length: 4.0,
            tempo_adjustment: 0.0,
            echo: 0.0,
            eq_enabled: false,
            eq_settings: EqSettings::default(),
            enhance_clarity: false,
            normalize: true,
            stereo_widening: false,
            output_format: OutputFormat::Mp3,
            output_bitrate_kbps: None,
        }
    }
}

/// Per-layer gains for one track, already clamped into [0, 1].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LayerGains {
    pub vocals: f64,
    pub drums: f64,
    pub bass: f64,
    pub other: f64,
}

impl LayerGains {
    /// Gain for a layer.
    pub fn get(&self, kind: StemKind) -> f64 {
        match kind {
            StemKind::Vocals => self.vocals,
            StemKind::Drums => self.drums,
            StemKind::Bass => self.bass,
            StemKind::Other => self.other,
        }
    }

    /// Unity gain on every layer.
    pub fn unity() -> Self {
        Self {
            vocals: 1.0,
            drums: 1.0,
            bass: 1.0,
            other: 1.0,
        }
    }
}

impl MixSettings {
    /// Parse settings from JSON; unknown fields are ignored, missing ones defaulted.
    pub fn from_json(data: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(data)?)
    }

    /// Crossfade clamped into [1, 20] seconds.
    pub fn crossfade_secs(&self) -> f64 {
        clamp(self.crossfade_length, CROSSFADE_RANGE, CROSSFADE_RANGE.0)
    }

    /// Tempo offset clamped into [-0.5, 0.5].
    pub fn tempo_offset(&self) -> f64 {
        clamp(self.tempo_adjustment, TEMPO_OFFSET_RANGE, 0.0)
    }

    /// Stretch factor for the secondary track.
    pub fn tempo_factor(&self) -> f64 {
        1.0 + self.tempo_offset()
    }

    /// Whether the tempo-match stage should run at all.
    pub fn wants_tempo_match(&self) -> bool {
        self.bpm_match && (self.tempo_factor() - 1.0).abs() > 1e-6
    }

    /// Echo intensity clamped into [0, 1].
    pub fn echo_intensity(&self) -> f64 {
        clamp(self.echo, (0.0, 1.0), 0.0)
    }

    /// Clamped per-layer gains for one track.
    pub fn gains(&self, slot: TrackSlot) -> LayerGains {
        let (v, d, b, o) = match slot {
            TrackSlot::Primary => (
                self.vocal_level1,
                self.drums_level1,
                self.bass_level1,
                self.other_level1,
            ),
            TrackSlot::Secondary => (
                self.vocal_level2,
                self.drums_level2,
                self.bass_level2,
                self.other_level2,
            ),
        };
        LayerGains {
            vocals: clamp(v, (0.0, 1.0), 0.0),
            drums: clamp(d, (0.0, 1.0), 0.0),
            bass: clamp(b, (0.0, 1.0), 0.0),
            other: clamp(o, (0.0, 1.0), 0.0),
        }
    }
}

/// Clamp into `range`, mapping NaN to `fallback`.
fn clamp(v: f64, range: (f64, f64), fallback: f64) -> f64 {
    if v.is_nan() {
        fallback
    } else {
        v.clamp(range.0, range.1)
    }
}
