//! Stemmix AI - Separation and analysis
//!
//! Provides:
//! - Stem separation with ML, band-filter and identity strategies
//! - Musical feature analysis
//! - The on-disk result cache both of them share
//! - A report of which external tools this host can use

pub mod analysis;
pub mod cache;
pub mod capabilities;
pub mod separation;

pub use analysis::FeatureAnalyzer;
pub use cache::{cache_key, CachedStems, EntryKind, ResultCache};
pub use capabilities::{CapabilityReport, ToolStatus};
pub use separation::{SeparationMethod, SeparationOutcome, StemSeparator};
