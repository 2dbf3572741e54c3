//! Stemmix Audio - Stem processing and mixdown
//!
//! Provides:
//! - Per-layer enhancement with a gain-only retry
//! - Tempo matching of the secondary track
//! - Two-track mixing with crossfade and degradation ladder
//! - Mastering (echo, EQ, dynamics, loudness, limiter) with fallbacks

pub mod mastering;
pub mod mixer;
pub mod processor;
pub mod tempo;

pub use mastering::{EffectsProcessor, MasterChain, MasterOutcome};
pub use mixer::{MixOutcome, MixStrategy, StemMixer};
pub use processor::StemProcessor;
pub use tempo::{TempoMatcher, TempoOutcome};

#[cfg(test)]
pub(crate) mod test_util {
    use std::path::Path;
    use stemmix_core::{HostProfile, OptimizationLevel, ResourceSnapshot, StemSet};
    use stemmix_media::fake::fake_tool_paths;

    pub fn host(dir: &Path, level: OptimizationLevel) -> HostProfile {
        HostProfile::from_parts(
            ResourceSnapshot {
                total_memory_bytes: 16 << 30,
                available_memory_bytes: 8 << 30,
                cpu_count: 8,
            },
            level,
            fake_tool_paths(dir).expect("failed to create fake tools"),
        )
    }

    /// Four small layer files under `dir`.
    pub fn layers(dir: &Path) -> StemSet {
        std::fs::create_dir_all(dir).expect("failed to create layer dir");
        StemSet::from_fn(|kind| {
            let path = dir.join(format!("{}.wav", kind.as_str()));
            std::fs::write(&path, format!("layer-{}", kind.as_str())).expect("failed to write layer");
            path
        })
    }
}
