//! End-to-end mix job.
//!
//! Stages run in a fixed order:
//! 1. Validate inputs and tools
//! 2. Separate both tracks (concurrently)
//! 3. Process both tracks' layers (concurrently)
//! 4. Tempo-match the secondary track (optional, degrades)
//! 5. Mix
//! 6. Master (degrades)
//!
//! Separation, processing and mixing are mandatory: when their own fallback
//! ladders are exhausted the job fails with a [`StemmixError::StageFailed`].
//! Progress is reported through a callback weighted per stage.

use crate::diagnostics::{MixDiagnostics, SlotMethods, StageClock};
use crate::workspace::JobWorkspace;
use parking_lot::Mutex;
use serde::Serialize;
use std::path::{Path, PathBuf};
use stemmix_ai::{FeatureAnalyzer, ResultCache, SeparationMethod, StemSeparator};
use stemmix_audio::tempo::bpm_ratio;
use stemmix_audio::{EffectsProcessor, MixStrategy, StemMixer, StemProcessor, TempoMatcher};
use stemmix_core::{
    HostProfile, MixSettings, Result, StemmixConfig, StemmixError, Tool, Track, TrackSlot,
};
use stemmix_media::{probe_duration, ProcessBridge, ProcessRunner};
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Pipeline stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum MixStage {
    Validate,
    Separate,
    Process,
    TempoMatch,
    Mix,
    Master,
    Done,
}

impl MixStage {
    pub const ORDER: [MixStage; 7] = [
        Self::Validate,
        Self::Separate,
        Self::Process,
        Self::TempoMatch,
        Self::Mix,
        Self::Master,
        Self::Done,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validate => "validate",
            Self::Separate => "separate",
            Self::Process => "process",
            Self::TempoMatch => "tempoMatch",
            Self::Mix => "mix",
            Self::Master => "master",
            Self::Done => "done",
        }
    }

    /// Display name for the stage.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Validate => "Checking inputs",
            Self::Separate => "Separating stems",
            Self::Process => "Enhancing stems",
            Self::TempoMatch => "Matching tempo",
            Self::Mix => "Mixing tracks",
            Self::Master => "Mastering",
            Self::Done => "Mix complete",
        }
    }

    /// Weight of this stage in overall progress (out of 100).
    fn weight(&self) -> f32 {
        match self {
            Self::Validate => 2.0,
            Self::Separate => 45.0,
            Self::Process => 20.0,
            Self::TempoMatch => 5.0,
            Self::Mix => 13.0,
            Self::Master => 15.0,
            Self::Done => 0.0,
        }
    }

    /// Summed weight of the stages before this one.
    fn offset(&self) -> f32 {
        Self::ORDER
            .iter()
            .take_while(|s| *s != self)
            .map(|s| s.weight())
            .sum()
    }
}

/// Progress of a running job.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MixProgress {
    pub stage: MixStage,
    /// Overall progress (0.0 to 1.0).
    pub overall_progress: f32,
    /// Stage-specific progress (0.0 to 1.0).
    pub stage_progress: f32,
    pub message: String,
}

pub type ProgressFn<'a> = dyn Fn(MixProgress) + Send + Sync + 'a;

fn report(on_progress: &ProgressFn<'_>, stage: MixStage, stage_progress: f32) {
    let stage_progress = stage_progress.clamp(0.0, 1.0);
    on_progress(MixProgress {
        stage,
        overall_progress: (stage.offset() + stage.weight() * stage_progress) / 100.0,
        stage_progress,
        message: stage.display_name().to_string(),
    });
}

/// Two analyzed tracks and the settings to mix them with.
#[derive(Debug, Clone)]
pub struct MixRequest {
    pub primary: Track,
    pub secondary: Track,
    pub settings: MixSettings,
}

/// Runs mix jobs against one configuration.
///
/// The host profile is re-detected for every job unless one is pinned
/// with [`Orchestrator::with_host`].
pub struct Orchestrator<R> {
    runner: R,
    config: StemmixConfig,
    host: Option<HostProfile>,
    cache: ResultCache,
}

impl<R: ProcessRunner + Clone> Orchestrator<R> {
    pub fn new(runner: R, config: StemmixConfig) -> Self {
        Self {
            runner,
            cache: ResultCache::from_config(&config),
            config,
            host: None,
        }
    }

    /// Pin the host profile instead of detecting it per job.
    pub fn with_host(mut self, host: HostProfile) -> Self {
        self.host = Some(host);
        self
    }

    pub fn config(&self) -> &StemmixConfig {
        &self.config
    }

    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    pub fn host_profile(&self) -> HostProfile {
        match &self.host {
            Some(host) => host.clone(),
            None => HostProfile::detect(&self.config),
        }
    }

    /// Build a [`Track`] for `source`, analyzing it when features are not cached.
    pub async fn load_track(&self, source: &Path) -> Result<Track> {
        let host = self.host_profile();
        let bridge = ProcessBridge::new(self.runner.clone(), &host);
        FeatureAnalyzer::new(&bridge, &self.cache).analyze(source).await
    }

    /// Run one job to completion.
    ///
    /// On error nothing is left in the output directory and the job
    /// workspace is removed (unless artifacts are retained).
    pub async fn run(
        &self,
        request: &MixRequest,
        on_progress: &ProgressFn<'_>,
    ) -> Result<MixDiagnostics> {
        let job_id = Uuid::new_v4();
        let result = self.execute(job_id, request, on_progress).await;
        if let Err(e) = &result {
            warn!(job = %job_id, error = %e, "Mix job failed");
        }
        result
    }

    #[instrument(skip_all, fields(job = %job_id))]
    async fn execute(
        &self,
        job_id: Uuid,
        request: &MixRequest,
        on_progress: &ProgressFn<'_>,
    ) -> Result<MixDiagnostics> {
        let settings = &request.settings;
        let mut clock = StageClock::start();
        let host = self.host_profile();
        let profile = &host.profile;
        let bridge = ProcessBridge::new(self.runner.clone(), &host);
        info!(level = %profile.level, "Starting mix job");

        clock.enter(MixStage::Validate);
        report(on_progress, MixStage::Validate, 0.0);
        validate(request, &bridge).map_err(|e| e.in_stage(MixStage::Validate.as_str()))?;
        let workspace = JobWorkspace::create(&self.config.work_dir, self.config.retain_artifacts)?;

        clock.enter(MixStage::Separate);
        report(on_progress, MixStage::Separate, 0.0);
        let separator = StemSeparator::new(&bridge, &self.cache, profile);
        let split = Mutex::new([0u8; 2]);
        let track_progress = |slot: TrackSlot| {
            let split = &split;
            move |pct: u8| {
                let overall = {
                    let mut split = split.lock();
                    split[slot_index(slot)] = pct;
                    (f32::from(split[0]) + f32::from(split[1])) / 200.0
                };
                report(on_progress, MixStage::Separate, overall);
            }
        };
        let (primary_progress, secondary_progress) = (
            track_progress(TrackSlot::Primary),
            track_progress(TrackSlot::Secondary),
        );
        let (primary_dir, secondary_dir) = (
            workspace.separation_dir(TrackSlot::Primary),
            workspace.separation_dir(TrackSlot::Secondary),
        );
        let (primary_sep, secondary_sep) = tokio::try_join!(
            separator.separate_with_progress(&request.primary, &primary_dir, &primary_progress),
            separator.separate_with_progress(&request.secondary, &secondary_dir, &secondary_progress),
        )
        .map_err(|e| e.in_stage(MixStage::Separate.as_str()))?;
        let methods = SlotMethods {
            primary: primary_sep.method,
            secondary: secondary_sep.method,
        };
        let cache_hits = [&primary_sep, &secondary_sep]
            .iter()
            .filter(|s| s.from_cache)
            .count();

        clock.enter(MixStage::Process);
        report(on_progress, MixStage::Process, 0.0);
        let processor = StemProcessor::new(&bridge, profile);
        let (primary_dir, secondary_dir) = (
            workspace.processed_dir(TrackSlot::Primary),
            workspace.processed_dir(TrackSlot::Secondary),
        );
        let (primary, secondary) = tokio::try_join!(
            processor.process(
                TrackSlot::Primary,
                &primary_sep.stems,
                settings.gains(TrackSlot::Primary),
                &primary_dir,
            ),
            processor.process(
                TrackSlot::Secondary,
                &secondary_sep.stems,
                settings.gains(TrackSlot::Secondary),
                &secondary_dir,
            ),
        )
        .map_err(|e| e.in_stage(MixStage::Process.as_str()))?;

        let ratio = bpm_ratio(request.primary.features().bpm, request.secondary.features().bpm);
        let tempo = if settings.wants_tempo_match() {
            clock.enter(MixStage::TempoMatch);
            report(on_progress, MixStage::TempoMatch, 0.0);
            let outcome = TempoMatcher::new(&bridge, profile)
                .match_tempo(&secondary, settings.tempo_factor())
                .await;
            Some(outcome)
        } else {
            None
        };

        clock.enter(MixStage::Mix);
        report(on_progress, MixStage::Mix, 0.0);
        let mixed = StemMixer::new(&bridge, profile)
            .mix(&primary, &secondary, settings, &workspace.mix_dir())
            .await
            .map_err(|e| e.in_stage(MixStage::Mix.as_str()))?;

        clock.enter(MixStage::Master);
        report(on_progress, MixStage::Master, 0.0);
        let master_stem = workspace.master_stem();
        if let Some(parent) = master_stem.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mastered = EffectsProcessor::new(&bridge, profile)
            .finalize(&mixed.path, settings, &master_stem)
            .await
            .map_err(|e| e.in_stage(MixStage::Master.as_str()))?;
        clock.close();

        let output_path = self.deliver(job_id, &mastered.path).await?;
        let output_size_bytes = tokio::fs::metadata(&output_path).await?.len();
        let output_duration_seconds = if bridge.is_available(Tool::Ffprobe) {
            match probe_duration(&bridge, &output_path).await {
                Ok(secs) => Some(secs),
                Err(e) => {
                    warn!(error = %e, "Could not probe output duration");
                    None
                }
            }
        } else {
            None
        };

        let mut degraded_stages = Vec::new();
        if methods.worst() != SeparationMethod::Ml {
            degraded_stages.push(MixStage::Separate);
        }
        if !primary.gain_only.is_empty() || !secondary.gain_only.is_empty() {
            degraded_stages.push(MixStage::Process);
        }
        if tempo.as_ref().is_some_and(|t| t.degraded()) {
            degraded_stages.push(MixStage::TempoMatch);
        }
        if matches!(mixed.strategy, MixStrategy::Naive | MixStrategy::Copy) {
            degraded_stages.push(MixStage::Mix);
        }
        if mastered.chain.degraded() {
            degraded_stages.push(MixStage::Master);
        }

        let diagnostics = MixDiagnostics {
            job_id,
            output_path,
            optimization_level: profile.level,
            processing_time_seconds: clock.elapsed().as_secs_f64(),
            stem_separation_method_used: methods.worst(),
            separation_methods: methods,
            cache_hits,
            stage_timings: clock.into_timings(),
            output_size_bytes,
            output_duration_seconds,
            mix_strategy: mixed.strategy,
            master_chain: mastered.chain,
            tempo,
            bpm_ratio: ratio,
            degraded_stages,
            retained_workspace: workspace
                .is_retained()
                .then(|| workspace.path().to_path_buf()),
        };
        report(on_progress, MixStage::Done, 1.0);
        info!(
            output = %diagnostics.output_path.display(),
            seconds = diagnostics.processing_time_seconds,
            method = diagnostics.stem_separation_method_used.as_str(),
            degraded = diagnostics.degraded_stages.len(),
            "Mix job finished"
        );
        Ok(diagnostics)
    }

    /// Move the mastered file into the output directory under the job id.
    async fn deliver(&self, job_id: Uuid, mastered: &Path) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.config.output_dir).await?;
        let name = match mastered.extension() {
            Some(ext) => format!("{job_id}.{}", ext.to_string_lossy()),
            None => job_id.to_string(),
        };
        let dest = self.config.output_dir.join(name);
        // Rename fails across filesystems.
        if tokio::fs::rename(mastered, &dest).await.is_err() {
            tokio::fs::copy(mastered, &dest).await?;
        }
        Ok(dest)
    }
}

fn slot_index(slot: TrackSlot) -> usize {
    match slot {
        TrackSlot::Primary => 0,
        TrackSlot::Secondary => 1,
    }
}

fn validate<R: ProcessRunner>(request: &MixRequest, bridge: &ProcessBridge<R>) -> Result<()> {
    request.primary.validate()?;
    request.secondary.validate()?;
    if !bridge.is_available(Tool::Ffmpeg) {
        return Err(StemmixError::ToolUnavailable {
            tool: Tool::Ffmpeg.name().into(),
            reason: "required by every stage".into(),
        });
    }
    Ok(())
}
