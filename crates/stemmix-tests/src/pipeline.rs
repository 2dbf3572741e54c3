//! End-to-end jobs through the orchestrator.

use crate::support::{dir_entries, host, orchestrator, request, roomy_host};
use std::path::Path;
use std::sync::Arc;
use stemmix_ai::SeparationMethod;
use stemmix_audio::{MasterChain, MixStrategy};
use stemmix_core::{MixSettings, OptimizationLevel, ResourceSnapshot, Tool};
use stemmix_media::fake::FakeRunner;
use stemmix_media::ProcessSpec;
use stemmix_workflow::MixStage;

fn joined(call: &ProcessSpec) -> String {
    call.args.join(" ")
}

/// The processing call writing `<slot>/<layer>.*`.
fn processing_call<'a>(calls: &'a [ProcessSpec], slot: &str, layer: &str) -> &'a ProcessSpec {
    calls
        .iter()
        .find(|c| {
            c.args.last().is_some_and(|out| {
                let out = Path::new(out);
                out.parent().and_then(|p| p.file_name()).and_then(|n| n.to_str()) == Some(slot)
                    && out.file_stem().and_then(|n| n.to_str()) == Some(layer)
                    && out.to_string_lossy().contains("processed")
            })
        })
        .expect("processing call not found")
}

#[tokio::test]
async fn two_tracks_mix_with_crossfade_and_echo() {
    let tmp = tempfile::tempdir().expect("failed to create tempdir");
    let runner = Arc::new(FakeRunner::new().with_duration(181.5));
    let resources = roomy_host();
    let orch = orchestrator(tmp.path(), &runner, host(tmp.path(), resources), false);
    let settings = MixSettings {
        bpm_match: true,
        crossfade_length: 8.0,
        echo: 0.2,
        vocal_level1: 0.8,
        vocal_level2: 0.5,
        tempo_adjustment: 0.05,
        ..Default::default()
    };

    let diag = orch
        .run(&request(tmp.path(), settings), &|_| {})
        .await
        .expect("pipeline should complete");

    assert!(diag.output_path.is_file());
    // Reported as probed; real_ffmpeg checks that the mix keeps its length.
    assert_eq!(diag.output_duration_seconds, Some(181.5));
    assert_eq!(diag.optimization_level, resources.level());
    assert_eq!(diag.stem_separation_method_used, SeparationMethod::Ml);
    assert_eq!(diag.mix_strategy, MixStrategy::Graph);
    assert_eq!(diag.master_chain, MasterChain::Full);
    assert!(diag.degraded_stages.is_empty());
    assert_eq!(dir_entries(&tmp.path().join("work")), 0);

    let calls = runner.calls_for(Tool::Ffmpeg);
    assert!(joined(processing_call(&calls, "primary", "vocals")).contains("volume=volume=0.800"));
    assert!(joined(processing_call(&calls, "secondary", "vocals")).contains("volume=volume=0.500"));

    let mix = calls
        .iter()
        .find(|c| c.args.iter().any(|a| a == "-filter_complex"))
        .expect("mix call");
    assert!(joined(mix).contains("afade=t=in:st=0:d=8.000"));
    assert!(!joined(mix).contains("duration=shortest"));

    let master = calls
        .iter()
        .find(|c| joined(c).contains("alimiter"))
        .expect("master call");
    assert!(joined(master).contains("decays=0.100|0.060"));

    // Tempo ran once, on the secondary track only.
    let tempo: Vec<&ProcessSpec> = calls.iter().filter(|c| joined(c).contains("atempo")).collect();
    assert_eq!(tempo.len(), 4);
    assert!(tempo.iter().all(|c| joined(c).contains("secondary")));
    let outcome = diag.tempo.expect("tempo outcome");
    assert!((outcome.factor - 1.05).abs() < 1e-9);
}

#[tokio::test]
async fn constrained_host_runs_light() {
    let tmp = tempfile::tempdir().expect("failed to create tempdir");
    let runner = Arc::new(FakeRunner::new());
    let resources = ResourceSnapshot {
        total_memory_bytes: 4 << 30,
        available_memory_bytes: 1 << 30,
        cpu_count: 4,
    };
    let orch = orchestrator(tmp.path(), &runner, host(tmp.path(), resources), false);

    let diag = orch
        .run(&request(tmp.path(), MixSettings::default()), &|_| {})
        .await
        .unwrap();
    assert_eq!(diag.optimization_level, OptimizationLevel::Light);
    assert_eq!(diag.mix_strategy, MixStrategy::Light);

    let separator = runner.calls_for(Tool::Separator);
    assert!(separator.iter().all(|c| c.args.iter().any(|a| a == "--light")));
    let mix = runner
        .calls_for(Tool::Ffmpeg)
        .into_iter()
        .find(|c| c.args.iter().any(|a| a == "-filter_complex"))
        .expect("mix call");
    assert!(!joined(&mix).contains("afade"));
}

#[tokio::test]
async fn diagnostics_serialize_in_camel_case() {
    let tmp = tempfile::tempdir().expect("failed to create tempdir");
    let runner = Arc::new(FakeRunner::new());
    let orch = orchestrator(tmp.path(), &runner, host(tmp.path(), roomy_host()), false);
    let diag = orch
        .run(&request(tmp.path(), MixSettings::default()), &|_| {})
        .await
        .unwrap();

    let json = diag.to_json().unwrap();
    for key in [
        "outputPath",
        "optimizationLevel",
        "processingTimeSeconds",
        "stemSeparationMethodUsed",
        "stageTimings",
        "outputSizeBytes",
        "degradedStages",
    ] {
        assert!(json.contains(key), "missing {key}");
    }
    assert!(json.contains("\"optimizationLevel\": \"standard\""));
    assert!(diag.stage_timings.iter().all(|t| t.stage != MixStage::Done));
}
