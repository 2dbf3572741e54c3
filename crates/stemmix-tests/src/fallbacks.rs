//! Degradation ladders seen from a whole job.

use crate::support::{dir_entries, host, orchestrator, request, roomy_host, tools};
use std::sync::Arc;
use std::time::Duration;
use stemmix_ai::{ResultCache, SeparationMethod, StemSeparator};
use stemmix_audio::MasterChain;
use stemmix_core::{HostProfile, MixSettings, StemmixError, Tool};
use stemmix_media::fake::{FakeRunner, SeparatorBehaviour};
use stemmix_media::ProcessBridge;
use stemmix_workflow::MixStage;

#[tokio::test]
async fn missing_separator_falls_back_to_filters() {
    let tmp = tempfile::tempdir().expect("failed to create tempdir");
    let runner = Arc::new(FakeRunner::new());
    let mut host = host(tmp.path(), roomy_host());
    host.tools.separator_script = Some(tmp.path().join("nowhere").join("separate.py"));
    let orch = orchestrator(tmp.path(), &runner, host, false);

    let diag = orch
        .run(&request(tmp.path(), MixSettings::default()), &|_| {})
        .await
        .expect("job should degrade, not fail");
    assert_eq!(diag.stem_separation_method_used, SeparationMethod::Filter);
    assert_eq!(diag.separation_methods.primary, SeparationMethod::Filter);
    assert_eq!(diag.separation_methods.secondary, SeparationMethod::Filter);
    assert!(diag.degraded_stages.contains(&MixStage::Separate));
    assert_eq!(runner.count(Tool::Separator), 0);
    assert!(diag.output_path.is_file());
}

#[tokio::test]
async fn hung_separator_times_out_into_filters() {
    let tmp = tempfile::tempdir().expect("failed to create tempdir");
    let runner = Arc::new(FakeRunner::new().with_separator(SeparatorBehaviour::Hang));
    let mut host: HostProfile = host(tmp.path(), roomy_host());
    host.profile.separation_timeout = Duration::from_millis(50);
    let bridge = ProcessBridge::new(Arc::clone(&runner), &host);
    let cache = ResultCache::new(tmp.path().join("cache"), Duration::from_secs(3600));
    let track = crate::support::track(tmp.path(), "slow.wav");

    let outcome = StemSeparator::new(&bridge, &cache, &host.profile)
        .separate(&track, &tmp.path().join("sep"))
        .await
        .unwrap();
    assert_eq!(outcome.method, SeparationMethod::Filter);
    assert!(outcome.stems.is_usable());
}

#[tokio::test]
async fn every_tier_failing_still_yields_four_layers() {
    let tmp = tempfile::tempdir().expect("failed to create tempdir");
    let runner = Arc::new(
        FakeRunner::new()
            .with_separator(SeparatorBehaviour::Incomplete)
            .fail_ffmpeg_when("lowpass")
            .fail_ffmpeg_when("highpass"),
    );
    let host = host(tmp.path(), roomy_host());
    let bridge = ProcessBridge::new(Arc::clone(&runner), &host);
    let cache = ResultCache::new(tmp.path().join("cache"), Duration::from_secs(3600));
    let track = crate::support::track(tmp.path(), "stubborn.wav");

    let outcome = StemSeparator::new(&bridge, &cache, &host.profile)
        .separate(&track, &tmp.path().join("sep"))
        .await
        .unwrap();
    assert_eq!(outcome.method, SeparationMethod::Identity);
    assert!(outcome.stems.is_usable());
    for (_, path) in outcome.stems.iter() {
        assert_eq!(std::fs::read(path).unwrap(), b"source-stubborn.wav");
    }
}

#[tokio::test]
async fn failing_effects_deliver_the_unmastered_mix() {
    let tmp = tempfile::tempdir().expect("failed to create tempdir");
    // Every mastering command writes `master/final.<ext>`.
    let runner = Arc::new(FakeRunner::new().fail_ffmpeg_when("final."));
    let orch = orchestrator(tmp.path(), &runner, host(tmp.path(), roomy_host()), true);
    let settings = MixSettings {
        echo: 0.4,
        enhance_clarity: true,
        ..Default::default()
    };

    let diag = orch
        .run(&request(tmp.path(), settings), &|_| {})
        .await
        .expect("mastering failures must not fail the job");
    assert_eq!(diag.master_chain, MasterChain::Copy);
    assert_eq!(diag.degraded_stages, vec![MixStage::Master]);

    let workspace = diag.retained_workspace.expect("workspace retained");
    let mix = std::fs::read_dir(workspace.join("mix"))
        .unwrap()
        .next()
        .expect("mix file")
        .unwrap()
        .path();
    assert_eq!(std::fs::read(&diag.output_path).unwrap(), std::fs::read(&mix).unwrap());
    assert_eq!(diag.output_path.extension(), mix.extension());
}

#[tokio::test]
async fn mix_failure_aborts_and_cleans_up() {
    let tmp = tempfile::tempdir().expect("failed to create tempdir");
    let runner = Arc::new(FakeRunner::new().fail_ffmpeg_when("-filter_complex"));
    let orch = orchestrator(tmp.path(), &runner, host(tmp.path(), roomy_host()), false);

    let err = orch
        .run(&request(tmp.path(), MixSettings::default()), &|_| {})
        .await
        .unwrap_err();
    assert!(matches!(err, StemmixError::StageFailed { stage: "mix", .. }));
    assert!(err.to_string().contains("mix"));
    assert_eq!(dir_entries(&tmp.path().join("work")), 0);
    assert_eq!(dir_entries(&tmp.path().join("out")), 0);
}

#[tokio::test]
async fn missing_ffmpeg_is_rejected_up_front() {
    let tmp = tempfile::tempdir().expect("failed to create tempdir");
    let runner = Arc::new(FakeRunner::new());
    let mut host = host(tmp.path(), roomy_host());
    host.tools = stemmix_core::ToolPaths {
        ffmpeg: None,
        ..tools(tmp.path())
    };
    let orch = orchestrator(tmp.path(), &runner, host, false);

    let err = orch
        .run(&request(tmp.path(), MixSettings::default()), &|_| {})
        .await
        .unwrap_err();
    assert!(matches!(err, StemmixError::StageFailed { stage: "validate", .. }));
    assert!(runner.calls().is_empty());
}
