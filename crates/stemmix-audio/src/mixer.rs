//! Two-track stem mixer.
//!
//! Input order for every graph is the primary track's four layers followed
//! by the secondary's, in `StemKind::ALL` order. Every combine uses
//! `duration=longest`; nothing in a mix graph trims.

use crate::processor::check_output;
use serde::Serialize;
use std::path::{Path, PathBuf};
use stemmix_core::{
    is_usable_file, FallbackChain, MixSettings, OptimizationProfile, ProcessedStemSet, Result,
    StemKind, StemmixError,
};
use stemmix_media::{
    run_ffmpeg, AudioEncoding, FfmpegCommand, Filter, FilterChain, FilterGraph, ProcessBridge,
    ProcessRunner,
};
use tracing::{info, instrument, warn};

/// Output label of every mix graph.
pub const MIX_LABEL: &str = "mix";

/// How a mix was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MixStrategy {
    /// Two buses with crossfade and bus processing.
    Graph,
    /// Single flat combine of all layers.
    Light,
    /// Equal-weight combine of whatever layers survived.
    Naive,
    /// Only one usable layer; copied as is.
    Copy,
}

impl MixStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Graph => "graph",
            Self::Light => "light",
            Self::Naive => "naive",
            Self::Copy => "copy",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MixOutcome {
    pub path: PathBuf,
    pub strategy: MixStrategy,
}

fn amix(inputs: usize) -> Filter {
    Filter::new("amix")
        .arg("inputs", inputs)
        .arg("duration", "longest")
}

/// Standard two-bus graph: unity layers, per-track sums, crossfaded
/// secondary, combined bus with corrective EQ and compression.
pub fn standard_graph(settings: &MixSettings) -> FilterGraph {
    let mut graph = FilterGraph::new();
    for i in 0..8 {
        graph.push(
            [format!("{i}:a")],
            FilterChain::new().then(Filter::new("volume").num("volume", 1.0)),
            [format!("l{i}")],
        );
    }
    graph.push(
        (0..4).map(|i| format!("l{i}")),
        FilterChain::new().then(amix(4)),
        ["bus1"],
    );
    graph.push(
        (4..8).map(|i| format!("l{i}")),
        FilterChain::new().then(amix(4)).then(
            Filter::new("afade")
                .arg("t", "in")
                .arg("st", 0)
                .num("d", settings.crossfade_secs()),
        ),
        ["bus2"],
    );

    let mut bus = FilterChain::new()
        .then(amix(2))
        .then(
            Filter::new("equalizer")
                .arg("f", 250)
                .arg("width_type", "q")
                .num("width", 1.0)
                .num("gain", -2.0),
        )
        .then(
            Filter::new("acompressor")
                .arg("threshold", "-14dB")
                .num("ratio", 2.0)
                .arg("attack", 20)
                .arg("release", 250),
        );
    if settings.stereo_widening {
        bus.push(Filter::new("extrastereo").num("m", 1.5));
    }
    graph.push(["bus1", "bus2"], bus, [MIX_LABEL]);
    graph
}

/// Light graph: one unweighted combine of all eight layers.
pub fn light_graph() -> FilterGraph {
    flat_graph(8)
}

/// Equal-weight combine of `inputs` files.
pub fn flat_graph(inputs: usize) -> FilterGraph {
    let mut graph = FilterGraph::new();
    graph.push(
        (0..inputs).map(|i| format!("{i}:a")),
        FilterChain::new().then(amix(inputs)),
        [MIX_LABEL],
    );
    graph
}

pub struct StemMixer<'a, R> {
    bridge: &'a ProcessBridge<R>,
    profile: &'a OptimizationProfile,
}

impl<'a, R: ProcessRunner> StemMixer<'a, R> {
    pub fn new(bridge: &'a ProcessBridge<R>, profile: &'a OptimizationProfile) -> Self {
        Self { bridge, profile }
    }

    fn output_encoding(&self) -> AudioEncoding {
        AudioEncoding {
            channels: 2,
            ..AudioEncoding::intermediate(self.profile)
        }
    }

    /// Mix both tracks into `output_dir`.
    #[instrument(skip_all, fields(level = %self.profile.level))]
    pub async fn mix(
        &self,
        primary: &ProcessedStemSet,
        secondary: &ProcessedStemSet,
        settings: &MixSettings,
        output_dir: &Path,
    ) -> Result<MixOutcome> {
        tokio::fs::create_dir_all(output_dir).await?;
        let output = output_dir.join(format!("mix.{}", self.profile.intermediate_extension()));
        let layers: Vec<&Path> = [primary, secondary]
            .into_iter()
            .flat_map(|set| StemKind::ALL.into_iter().map(|k| set.stems.get(k)))
            .collect();

        let (graph, strategy) = if self.profile.level.is_light() {
            (light_graph(), MixStrategy::Light)
        } else {
            (standard_graph(settings), MixStrategy::Graph)
        };

        let resolved = FallbackChain::new("mix")
            .tier(strategy.as_str(), || {
                let cmd = layers
                    .iter()
                    .fold(FfmpegCommand::new(&output), |cmd, layer| cmd.input(*layer))
                    .filter_complex(graph, MIX_LABEL)
                    .encoding(self.output_encoding());
                async move {
                    run_ffmpeg(self.bridge, &cmd).await?;
                    Ok(strategy)
                }
            })
            .tier(MixStrategy::Naive.as_str(), || self.mix_naive(&layers, &output))
            .run(|_| check_output(&output))
            .await?;

        info!(strategy = resolved.value.as_str(), "Mix complete");
        Ok(MixOutcome {
            path: output,
            strategy: resolved.value,
        })
    }

    async fn mix_naive(&self, layers: &[&Path], output: &Path) -> Result<MixStrategy> {
        let usable: Vec<&Path> = layers.iter().copied().filter(|p| is_usable_file(p)).collect();
        match usable.as_slice() {
            [] => Err(StemmixError::Validation("no usable layers remain to mix".into())),
            [only] => {
                warn!(layer = %only.display(), "Only one usable layer; copying it");
                tokio::fs::copy(only, output).await?;
                Ok(MixStrategy::Copy)
            }
            many => {
                warn!(layers = many.len(), "Falling back to an equal-weight mix");
                let cmd = many
                    .iter()
                    .fold(FfmpegCommand::new(output), |cmd, layer| cmd.input(*layer))
                    .filter_complex(flat_graph(many.len()), MIX_LABEL)
                    .encoding(self.output_encoding());
                run_ffmpeg(self.bridge, &cmd).await?;
                Ok(MixStrategy::Naive)
            }
        }
    }
}
