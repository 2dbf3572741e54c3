//! FFmpeg command construction.
//!
//! Filter graphs are built as values and rendered to strings only at the
//! edge, so stages can compare and test them without running ffmpeg.

use crate::encode::AudioEncoding;
use std::fmt;
use std::path::{Path, PathBuf};

/// Format a filter parameter with fixed precision.
pub fn num(v: f64) -> String {
    format!("{v:.3}")
}

/// One filter with its `key=value` options, e.g. `volume=volume=0.800`.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    name: String,
    options: Vec<(String, String)>,
}

impl Filter {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            options: Vec::new(),
        }
    }

    /// Add an option.
    pub fn arg(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.options.push((key.into(), value.to_string()));
        self
    }

    /// Add a numeric option using the fixed precision.
    pub fn num(self, key: impl Into<String>, value: f64) -> Self {
        self.arg(key, num(value))
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        for (i, (k, v)) in self.options.iter().enumerate() {
            let sep = if i == 0 { '=' } else { ':' };
            write!(f, "{sep}{k}={v}")?;
        }
        Ok(())
    }
}

/// Filters applied in sequence, rendered with `,`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterChain(Vec<Filter>);

impl FilterChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then(mut self, filter: Filter) -> Self {
        self.0.push(filter);
        self
    }

    pub fn push(&mut self, filter: Filter) {
        self.0.push(filter);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn filters(&self) -> &[Filter] {
        &self.0
    }

    /// Whether any filter in the chain has `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.0.iter().any(|f| f.name == name)
    }
}

impl FromIterator<Filter> for FilterChain {
    fn from_iter<I: IntoIterator<Item = Filter>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl fmt::Display for FilterChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, filter) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{filter}")?;
        }
        Ok(())
    }
}

/// A labelled chain inside a complex graph: `[in0][in1]chain[out]`.
#[derive(Debug, Clone, PartialEq)]
struct GraphNode {
    inputs: Vec<String>,
    chain: FilterChain,
    outputs: Vec<String>,
}

/// A `-filter_complex` graph, nodes rendered with `;`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterGraph {
    nodes: Vec<GraphNode>,
}

impl FilterGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node reading `inputs` and producing `outputs` (labels without brackets).
    pub fn push<I, O>(&mut self, inputs: I, chain: FilterChain, outputs: O)
    where
        I: IntoIterator,
        I::Item: Into<String>,
        O: IntoIterator,
        O::Item: Into<String>,
    {
        self.nodes.push(GraphNode {
            inputs: inputs.into_iter().map(Into::into).collect(),
            chain,
            outputs: outputs.into_iter().map(Into::into).collect(),
        });
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Number of filters with `name` across all nodes.
    pub fn count(&self, name: &str) -> usize {
        self.nodes
            .iter()
            .flat_map(|n| n.chain.filters())
            .filter(|f| f.name() == name)
            .count()
    }
}

impl fmt::Display for FilterGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, node) in self.nodes.iter().enumerate() {
            if i > 0 {
                f.write_str(";")?;
            }
            for label in &node.inputs {
                write!(f, "[{label}]")?;
            }
            write!(f, "{}", node.chain)?;
            for label in &node.outputs {
                write!(f, "[{label}]")?;
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Filtering {
    None,
    Simple(FilterChain),
    Complex { graph: FilterGraph, map: String },
}

/// Builder for a single ffmpeg invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct FfmpegCommand {
    inputs: Vec<PathBuf>,
    filtering: Filtering,
    encoding: Option<AudioEncoding>,
    output: PathBuf,
}

impl FfmpegCommand {
    pub fn new(output: impl Into<PathBuf>) -> Self {
        Self {
            inputs: Vec::new(),
            filtering: Filtering::None,
            encoding: None,
            output: output.into(),
        }
    }

    pub fn input(mut self, path: impl Into<PathBuf>) -> Self {
        self.inputs.push(path.into());
        self
    }

    /// Apply a simple `-af` chain. An empty chain means no filtering.
    pub fn audio_filter(mut self, chain: FilterChain) -> Self {
        self.filtering = if chain.is_empty() {
            Filtering::None
        } else {
            Filtering::Simple(chain)
        };
        self
    }

    /// Apply a complex graph and map its `map` label to the output.
    pub fn filter_complex(mut self, graph: FilterGraph, map: impl Into<String>) -> Self {
        self.filtering = Filtering::Complex {
            graph,
            map: map.into(),
        };
        self
    }

    pub fn encoding(mut self, encoding: AudioEncoding) -> Self {
        self.encoding = Some(encoding);
        self
    }

    pub fn output(&self) -> &Path {
        &self.output
    }

    pub fn inputs(&self) -> &[PathBuf] {
        &self.inputs
    }

    /// Rendered filter text, if any.
    pub fn filter_text(&self) -> Option<String> {
        match &self.filtering {
            Filtering::None => None,
            Filtering::Simple(chain) => Some(chain.to_string()),
            Filtering::Complex { graph, .. } => Some(graph.to_string()),
        }
    }

    /// Full argument vector (without the program name).
    pub fn args(&self) -> Vec<String> {
        let mut args: Vec<String> = ["-hide_banner", "-nostdin", "-loglevel", "error", "-y"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        for input in &self.inputs {
            args.push("-i".into());
            args.push(input.to_string_lossy().into_owned());
        }
        match &self.filtering {
            Filtering::None => {}
            Filtering::Simple(chain) => {
                args.push("-af".into());
                args.push(chain.to_string());
            }
            Filtering::Complex { graph, map } => {
                args.push("-filter_complex".into());
                args.push(graph.to_string());
                args.push("-map".into());
                args.push(format!("[{map}]"));
            }
        }
        if let Some(enc) = &self.encoding {
            args.extend(enc.args());
        }
        args.push("-vn".into());
        args.push(self.output.to_string_lossy().into_owned());
        args
    }
}
