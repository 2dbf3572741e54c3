//! Checks against a real ffmpeg. Run with `--ignored`.

use std::path::{Path, PathBuf};
use stemmix_audio::{EffectsProcessor, StemMixer};
use stemmix_core::{
    HostProfile, MixSettings, ProcessedStemSet, StemSet, StemmixConfig, Tool, TrackSlot,
};
use stemmix_media::{probe_duration, ProcessBridge, SystemRunner};

async fn tone(dir: &Path, name: &str, freq: u32, secs: u32) -> PathBuf {
    let path = dir.join(name);
    let status = tokio::process::Command::new("ffmpeg")
        .args(["-hide_banner", "-loglevel", "error", "-y", "-f", "lavfi", "-i"])
        .arg(format!("sine=frequency={freq}:duration={secs}"))
        .arg(&path)
        .status()
        .await
        .expect("ffmpeg must be installed");
    assert!(status.success());
    path
}

fn processed(slot: TrackSlot, dir: &Path, source: &Path) -> ProcessedStemSet {
    std::fs::create_dir_all(dir).unwrap();
    let stems = StemSet::from_fn(|kind| {
        let path = dir.join(format!("{}.wav", kind.as_str()));
        std::fs::copy(source, &path).unwrap();
        path
    });
    ProcessedStemSet {
        slot,
        stems,
        gain_only: Vec::new(),
    }
}

#[tokio::test]
#[ignore = "needs ffmpeg and ffprobe on PATH"]
async fn mix_is_never_shorter_than_the_shorter_track() {
    let tmp = tempfile::tempdir().expect("failed to create tempdir");
    let host = HostProfile::detect(&StemmixConfig::default());
    assert!(host.tools.is_available(Tool::Ffprobe));
    let bridge = ProcessBridge::new(SystemRunner, &host);

    let short = tone(tmp.path(), "short.wav", 440, 3).await;
    let long = tone(tmp.path(), "long.wav", 330, 5).await;
    let primary = processed(TrackSlot::Primary, &tmp.path().join("p"), &short);
    let secondary = processed(TrackSlot::Secondary, &tmp.path().join("s"), &long);
    let settings = MixSettings {
        crossfade_length: 2.0,
        echo: 0.2,
        ..Default::default()
    };

    let mixed = StemMixer::new(&bridge, &host.profile)
        .mix(&primary, &secondary, &settings, &tmp.path().join("mix"))
        .await
        .unwrap();
    let mixed_secs = probe_duration(&bridge, &mixed.path).await.unwrap();
    assert!(mixed_secs >= 3.0 - 0.05, "mix lasted {mixed_secs}s");

    let master = EffectsProcessor::new(&bridge, &host.profile)
        .finalize(&mixed.path, &settings, &tmp.path().join("final"))
        .await
        .unwrap();
    let master_secs = probe_duration(&bridge, &master.path).await.unwrap();
    assert!(master_secs >= 3.0 - 0.05, "master lasted {master_secs}s");
}
