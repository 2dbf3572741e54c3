//! Diagnostic record returned with every finished mix.

use serde::Serialize;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use stemmix_ai::SeparationMethod;
use stemmix_audio::{MasterChain, MixStrategy, TempoOutcome};
use stemmix_core::OptimizationLevel;
use uuid::Uuid;

use crate::orchestrator::MixStage;

/// Wall-clock time spent in one stage.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StageTiming {
    pub stage: MixStage,
    pub seconds: f64,
}

/// Accumulates stage timings for one job.
#[derive(Debug)]
pub(crate) struct StageClock {
    started: Instant,
    current: Option<(MixStage, Instant)>,
    timings: Vec<StageTiming>,
}

impl StageClock {
    pub fn start() -> Self {
        Self {
            started: Instant::now(),
            current: None,
            timings: Vec::new(),
        }
    }

    /// Close the running stage, if any, and open `stage`.
    pub fn enter(&mut self, stage: MixStage) {
        self.close();
        self.current = Some((stage, Instant::now()));
    }

    pub fn close(&mut self) {
        if let Some((stage, since)) = self.current.take() {
            self.timings.push(StageTiming {
                stage,
                seconds: since.elapsed().as_secs_f64(),
            });
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn into_timings(mut self) -> Vec<StageTiming> {
        self.close();
        self.timings
    }
}

/// Separation method per track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotMethods {
    pub primary: SeparationMethod,
    pub secondary: SeparationMethod,
}

impl SlotMethods {
    /// The lower-quality of the two methods.
    pub fn worst(&self) -> SeparationMethod {
        fn rank(m: SeparationMethod) -> u8 {
            match m {
                SeparationMethod::Ml => 0,
                SeparationMethod::Filter => 1,
                SeparationMethod::Identity => 2,
            }
        }
        if rank(self.secondary) > rank(self.primary) {
            self.secondary
        } else {
            self.primary
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MixDiagnostics {
    pub job_id: Uuid,
    pub output_path: PathBuf,
    pub optimization_level: OptimizationLevel,
    pub processing_time_seconds: f64,
    /// Worst method across both tracks.
    pub stem_separation_method_used: SeparationMethod,
    pub separation_methods: SlotMethods,
    /// Tracks whose stems came from the cache.
    pub cache_hits: usize,
    pub stage_timings: Vec<StageTiming>,
    pub output_size_bytes: u64,
    pub output_duration_seconds: Option<f64>,
    pub mix_strategy: MixStrategy,
    pub master_chain: MasterChain,
    pub tempo: Option<TempoOutcome>,
    /// Ratio the detected tempos would suggest; informational.
    pub bpm_ratio: Option<f64>,
    /// Stages that completed on a lower tier.
    pub degraded_stages: Vec<MixStage>,
    pub retained_workspace: Option<PathBuf>,
}

impl MixDiagnostics {
    pub fn to_json(&self) -> stemmix_core::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
