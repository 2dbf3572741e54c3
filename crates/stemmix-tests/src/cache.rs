//! Cache behaviour across separations and jobs.

use crate::support::{host, orchestrator, request, roomy_host, track};
use std::sync::Arc;
use std::time::Duration;
use stemmix_ai::{cache_key, ResultCache, SeparationMethod, StemSeparator};
use stemmix_core::{MixSettings, StemKind, Tool};
use stemmix_media::fake::FakeRunner;
use stemmix_media::ProcessBridge;

#[tokio::test]
async fn deleting_one_cached_stem_regenerates_all_layers() {
    let tmp = tempfile::tempdir().expect("failed to create tempdir");
    let runner = Arc::new(FakeRunner::new());
    let host = host(tmp.path(), roomy_host());
    let bridge = ProcessBridge::new(Arc::clone(&runner), &host);
    let cache = ResultCache::new(tmp.path().join("cache"), Duration::from_secs(3600));
    let separator = StemSeparator::new(&bridge, &cache, &host.profile);
    let song = track(tmp.path(), "anthem.wav");
    let key = cache_key(&song.base_name());

    separator.separate(&song, &tmp.path().join("sep1")).await.unwrap();
    let cached = cache.read_stems(&key).expect("stems cached");
    assert_eq!(cached.method, SeparationMethod::Ml);

    // Tamper with one layer and delete another.
    std::fs::write(cached.stems.get(StemKind::Vocals), b"stale-vocals").unwrap();
    std::fs::remove_file(cached.stems.get(StemKind::Bass)).unwrap();

    let again = separator.separate(&song, &tmp.path().join("sep2")).await.unwrap();
    assert!(!again.from_cache);
    assert_eq!(runner.count(Tool::Separator), 2);

    let rebuilt = cache.read_stems(&key).expect("stems re-cached");
    assert!(rebuilt.stems.is_usable());
    assert_eq!(
        std::fs::read(rebuilt.stems.get(StemKind::Vocals)).unwrap(),
        b"fake-stem-vocals"
    );
}

#[tokio::test]
async fn warm_cache_returns_identical_stem_sets() {
    let tmp = tempfile::tempdir().expect("failed to create tempdir");
    let runner = Arc::new(FakeRunner::new());
    let host = host(tmp.path(), roomy_host());
    let bridge = ProcessBridge::new(Arc::clone(&runner), &host);
    let cache = ResultCache::new(tmp.path().join("cache"), Duration::from_secs(3600));
    let separator = StemSeparator::new(&bridge, &cache, &host.profile);
    let song = track(tmp.path(), "loop.wav");

    separator.separate(&song, &tmp.path().join("a")).await.unwrap();
    let first = separator.separate(&song, &tmp.path().join("b")).await.unwrap();
    let second = separator.separate(&song, &tmp.path().join("c")).await.unwrap();
    assert!(first.from_cache && second.from_cache);
    assert_ne!(first.stems, second.stems, "each job gets its own copies");
    for kind in StemKind::ALL {
        assert_eq!(
            std::fs::read(first.stems.get(kind)).unwrap(),
            std::fs::read(second.stems.get(kind)).unwrap()
        );
    }
    assert_eq!(runner.count(Tool::Separator), 1);
}

#[tokio::test]
async fn repeat_jobs_build_identical_filter_graphs() {
    let tmp = tempfile::tempdir().expect("failed to create tempdir");
    let runner = Arc::new(FakeRunner::new());
    let orch = orchestrator(tmp.path(), &runner, host(tmp.path(), roomy_host()), false);
    let settings = MixSettings {
        crossfade_length: 12.0,
        echo: 0.3,
        stereo_widening: true,
        ..Default::default()
    };
    let req = request(tmp.path(), settings);

    let graph_of = |runner: &FakeRunner| -> Vec<String> {
        runner
            .calls_for(Tool::Ffmpeg)
            .iter()
            .filter_map(|c| {
                c.args
                    .iter()
                    .position(|a| a == "-filter_complex" || a == "-af")
                    .and_then(|i| c.args.get(i + 1).cloned())
            })
            .collect()
    };

    orch.run(&req, &|_| {}).await.unwrap();
    runner.clear_calls();
    let warm = orch.run(&req, &|_| {}).await.unwrap();
    let mut first = graph_of(&runner);
    runner.clear_calls();
    let again = orch.run(&req, &|_| {}).await.unwrap();
    let mut second = graph_of(&runner);

    assert_eq!(warm.cache_hits, 2);
    assert_eq!(again.cache_hits, 2);
    // Per-layer processing runs concurrently; compare as sets.
    first.sort();
    second.sort();
    assert_eq!(first, second);
    assert!(first.iter().any(|g| g.contains("d=12.000")));
}
