//! Stem sets: the four separated layers of a track.

use crate::error::{Result, StemmixError};
use crate::track::TrackSlot;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Identifies which layer is being referred to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StemKind {
    Vocals,
    Drums,
    Bass,
    Other,
}

impl StemKind {
    /// All layers in canonical order.
    pub const ALL: [StemKind; 4] = [
        StemKind::Vocals,
        StemKind::Drums,
        StemKind::Bass,
        StemKind::Other,
    ];

    /// Name used in file names and script output maps.
    pub fn as_str(&self) -> &'static str {
        match self {
            StemKind::Vocals => "vocals",
            StemKind::Drums => "drums",
            StemKind::Bass => "bass",
            StemKind::Other => "other",
        }
    }

    /// Display name for logs and reports.
    pub fn display_name(&self) -> &'static str {
        match self {
            StemKind::Vocals => "Vocals",
            StemKind::Drums => "Drums",
            StemKind::Bass => "Bass",
            StemKind::Other => "Other",
        }
    }

    fn index(self) -> usize {
        match self {
            StemKind::Vocals => 0,
            StemKind::Drums => 1,
            StemKind::Bass => 2,
            StemKind::Other => 3,
        }
    }
}

/// Paths to the four layers of one track.
///
/// A set is only usable when every layer is a non-empty readable file;
/// callers replace an unusable set wholesale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StemSet {
    pub vocals: PathBuf,
    pub drums: PathBuf,
    pub bass: PathBuf,
    pub other: PathBuf,
}

impl StemSet {
    /// Build a set from one path per layer, in `StemKind::ALL` order.
    pub fn from_fn(mut f: impl FnMut(StemKind) -> PathBuf) -> Self {
        Self {
            vocals: f(StemKind::Vocals),
            drums: f(StemKind::Drums),
            bass: f(StemKind::Bass),
            other: f(StemKind::Other),
        }
    }

    /// Build from a layer-name map as emitted by separation scripts.
    ///
    /// Every layer must be present; extra keys are ignored.
    pub fn from_map(map: &HashMap<String, PathBuf>) -> Result<Self> {
        let mut missing = Vec::new();
        let mut paths: [Option<PathBuf>; 4] = Default::default();
        for kind in StemKind::ALL {
            match map.get(kind.as_str()) {
                Some(p) => paths[kind.index()] = Some(p.clone()),
                None => missing.push(kind.as_str()),
            }
        }
        if !missing.is_empty() {
            return Err(StemmixError::Validation(format!(
                "stem map missing layers: {}",
                missing.join(", ")
            )));
        }
        let [Some(vocals), Some(drums), Some(bass), Some(other)] = paths else {
            return Err(StemmixError::Validation("stem map incomplete".into()));
        };
        Ok(Self {
            vocals,
            drums,
            bass,
            other,
        })
    }

    /// Path for one layer.
    pub fn get(&self, kind: StemKind) -> &Path {
        match kind {
            StemKind::Vocals => &self.vocals,
            StemKind::Drums => &self.drums,
            StemKind::Bass => &self.bass,
            StemKind::Other => &self.other,
        }
    }

    /// Mutable path for one layer.
    pub fn get_mut(&mut self, kind: StemKind) -> &mut PathBuf {
        match kind {
            StemKind::Vocals => &mut self.vocals,
            StemKind::Drums => &mut self.drums,
            StemKind::Bass => &mut self.bass,
            StemKind::Other => &mut self.other,
        }
    }

    /// Iterate `(kind, path)` in canonical order.
    pub fn iter(&self) -> impl Iterator<Item = (StemKind, &Path)> {
        StemKind::ALL.into_iter().map(move |k| (k, self.get(k)))
    }

    /// Check that every layer is usable.
    pub fn validate(&self) -> Result<()> {
        let bad: Vec<String> = self
            .iter()
            .filter(|(_, p)| !is_usable_file(p))
            .map(|(k, p)| format!("{} ({})", k.as_str(), p.display()))
            .collect();
        if bad.is_empty() {
            Ok(())
        } else {
            Err(StemmixError::Validation(format!(
                "unusable layers: {}",
                bad.join(", ")
            )))
        }
    }

    /// True when all four layers are usable.
    pub fn is_usable(&self) -> bool {
        self.validate().is_ok()
    }
}

/// Regular, non-empty file that can be opened for reading.
pub fn is_usable_file(path: &Path) -> bool {
    match std::fs::metadata(path) {
        Ok(meta) if meta.is_file() && meta.len() > 0 => std::fs::File::open(path).is_ok(),
        _ => false,
    }
}

/// A track's layers after per-layer processing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessedStemSet {
    pub slot: TrackSlot,
    pub stems: StemSet,
    /// Layers that only received the gain-only retry chain.
    #[serde(default)]
    pub gain_only: Vec<StemKind>,
}
