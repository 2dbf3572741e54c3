//! Shared fixtures.

use std::path::Path;
use std::sync::Arc;
use stemmix_core::{
    Features, HostProfile, MixSettings, ResourceSnapshot, StemmixConfig, ToolPaths, Track,
};
use stemmix_media::fake::{fake_tool_paths, FakeRunner};
use stemmix_workflow::{MixRequest, Orchestrator};

pub fn roomy_host() -> ResourceSnapshot {
    ResourceSnapshot {
        total_memory_bytes: 16 << 30,
        available_memory_bytes: 8 << 30,
        cpu_count: 8,
    }
}

pub fn tools(dir: &Path) -> ToolPaths {
    let bin = dir.join("bin");
    std::fs::create_dir_all(&bin).expect("failed to create bin dir");
    fake_tool_paths(&bin).expect("failed to create fake tools")
}

/// Host whose level comes from the usual detection rule.
pub fn host(dir: &Path, resources: ResourceSnapshot) -> HostProfile {
    HostProfile::from_parts(resources, resources.level(), tools(dir))
}

pub fn config(dir: &Path) -> StemmixConfig {
    StemmixConfig {
        cache_dir: dir.join("cache"),
        work_dir: dir.join("work"),
        output_dir: dir.join("out"),
        ..Default::default()
    }
}

pub fn orchestrator(
    dir: &Path,
    runner: &Arc<FakeRunner>,
    host: HostProfile,
    retain: bool,
) -> Orchestrator<Arc<FakeRunner>> {
    let config = StemmixConfig {
        retain_artifacts: retain,
        ..config(dir)
    };
    Orchestrator::new(Arc::clone(runner), config).with_host(host)
}

pub fn track(dir: &Path, name: &str) -> Track {
    let path = dir.join(name);
    std::fs::write(&path, format!("source-{name}")).expect("failed to write track");
    Track::new(path, Features::default())
}

pub fn request(dir: &Path, settings: MixSettings) -> MixRequest {
    MixRequest {
        primary: track(dir, "opener.wav"),
        secondary: track(dir, "closer.wav"),
        settings,
    }
}

pub fn dir_entries(dir: &Path) -> usize {
    std::fs::read_dir(dir).map(|d| d.count()).unwrap_or(0)
}
