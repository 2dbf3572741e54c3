//! Output encodings for intermediates and final masters.

use serde::{Deserialize, Serialize};
use stemmix_core::{MixSettings, OptimizationProfile, OutputFormat};

/// Audio codec used for an output file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AudioCodec {
    Mp3,
    Pcm16,
    Pcm24,
    Flac,
}

impl AudioCodec {
    /// FFmpeg encoder name.
    pub fn ffmpeg_encoder(self) -> &'static str {
        match self {
            Self::Mp3 => "libmp3lame",
            Self::Pcm16 => "pcm_s16le",
            Self::Pcm24 => "pcm_s24le",
            Self::Flac => "flac",
        }
    }

    /// Whether the codec takes a bitrate.
    pub fn is_lossy(self) -> bool {
        matches!(self, Self::Mp3)
    }
}

/// Final sample rate of mastered output.
pub const MASTER_SAMPLE_RATE: u32 = 44_100;

/// Codec, rate and channel settings for one output file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioEncoding {
    pub codec: AudioCodec,
    pub sample_rate: u32,
    /// Bitrate in kbps; only used by lossy codecs.
    pub bitrate_kbps: Option<u32>,
    pub channels: u16,
}

impl AudioEncoding {
    /// Encoding for intermediate stem files under `profile`.
    ///
    /// Standard mode keeps PCM at the profile bit depth; light mode writes
    /// low-bitrate MP3 to save disk and memory.
    pub fn intermediate(profile: &OptimizationProfile) -> Self {
        match profile.intermediate_bitrate_kbps {
            Some(kbps) => Self {
                codec: AudioCodec::Mp3,
                sample_rate: profile.sample_rate,
                bitrate_kbps: Some(kbps),
                channels: 1,
            },
            None => Self {
                codec: if profile.bit_depth >= 24 {
                    AudioCodec::Pcm24
                } else {
                    AudioCodec::Pcm16
                },
                sample_rate: profile.sample_rate,
                bitrate_kbps: None,
                channels: 2,
            },
        }
    }

    /// Encoding for the mastered file.
    pub fn final_output(settings: &MixSettings, profile: &OptimizationProfile) -> Self {
        let codec = match settings.output_format {
            OutputFormat::Mp3 => AudioCodec::Mp3,
            OutputFormat::Wav => AudioCodec::Pcm16,
            OutputFormat::Flac => AudioCodec::Flac,
        };
        let default_kbps = if profile.level.is_light() { 192 } else { 320 };
        Self {
            codec,
            sample_rate: MASTER_SAMPLE_RATE,
            bitrate_kbps: codec
                .is_lossy()
                .then(|| settings.output_bitrate_kbps.unwrap_or(default_kbps).clamp(64, 320)),
            channels: 2,
        }
    }

    /// FFmpeg output arguments.
    pub fn args(&self) -> Vec<String> {
        let mut args = vec![
            "-c:a".to_string(),
            self.codec.ffmpeg_encoder().to_string(),
            "-ar".to_string(),
            self.sample_rate.to_string(),
            "-ac".to_string(),
            self.channels.to_string(),
        ];
        if let Some(kbps) = self.bitrate_kbps.filter(|_| self.codec.is_lossy()) {
            args.push("-b:a".into());
            args.push(format!("{kbps}k"));
        }
        args
    }
}
