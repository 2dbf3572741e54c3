//! Per-job scratch directory.

use std::path::{Path, PathBuf};
use stemmix_core::{Result, TrackSlot};
use tempfile::TempDir;
use tracing::{debug, info};

enum Dir {
    /// Removed recursively when dropped.
    Scoped(TempDir),
    Retained(PathBuf),
}

/// A private, randomly named directory under the configured work dir.
///
/// Dropping the workspace deletes it, on success and on every error path,
/// unless it was created with `retain`.
pub struct JobWorkspace {
    dir: Dir,
}

impl JobWorkspace {
    pub fn create(parent: &Path, retain: bool) -> Result<Self> {
        std::fs::create_dir_all(parent)?;
        let temp = tempfile::Builder::new()
            .prefix("stemmix-job-")
            .tempdir_in(parent)?;
        let dir = if retain {
            let path = temp.into_path();
            info!(path = %path.display(), "Retaining job workspace");
            Dir::Retained(path)
        } else {
            debug!(path = %temp.path().display(), "Created job workspace");
            Dir::Scoped(temp)
        };
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        match &self.dir {
            Dir::Scoped(temp) => temp.path(),
            Dir::Retained(path) => path,
        }
    }

    pub fn is_retained(&self) -> bool {
        matches!(self.dir, Dir::Retained(_))
    }

    pub fn separation_dir(&self, slot: TrackSlot) -> PathBuf {
        self.path().join("separated").join(slot.as_str())
    }

    pub fn processed_dir(&self, slot: TrackSlot) -> PathBuf {
        self.path().join("processed").join(slot.as_str())
    }

    pub fn mix_dir(&self) -> PathBuf {
        self.path().join("mix")
    }

    /// Master output path without extension.
    pub fn master_stem(&self) -> PathBuf {
        self.path().join("master").join("final")
    }
}
