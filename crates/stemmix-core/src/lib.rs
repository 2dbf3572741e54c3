//! Stemmix Core - Foundation types for the mixing pipeline
//!
//! This crate provides the types shared by every stage:
//! - Tracks, features and stem sets
//! - Mix settings with clamped accessors
//! - Host resource detection and optimization profiles
//! - External tool discovery and configuration
//! - The fallback-chain abstraction used by stages with degradation ladders

pub mod config;
pub mod error;
pub mod fallback;
pub mod profile;
pub mod settings;
pub mod stems;
pub mod tools;
pub mod track;

pub use config::StemmixConfig;
pub use error::{Result, StemmixError};
pub use fallback::{FallbackChain, Resolved};
pub use profile::{HostProfile, OptimizationLevel, OptimizationProfile, ResourceSnapshot};
pub use settings::{EqSettings, LayerGains, MixSettings, OutputFormat};
pub use stems::{is_usable_file, ProcessedStemSet, StemKind, StemSet};
pub use tools::{Launch, Tool, ToolPaths};
pub use track::{Features, Track, TrackSlot};

/// Cache layout constants.
pub mod cache_layout {
    /// Subdirectory holding JSON entries.
    pub const ENTRIES_DIR: &str = "entries";

    /// Subdirectory holding persisted stem files.
    pub const STEMS_DIR: &str = "stems";

    /// Length of the hex identity key.
    pub const KEY_HEX_LEN: usize = 16;
}
