//! In-process stand-in for the external tools.
//!
//! [`FakeRunner`] implements [`ProcessRunner`] without spawning anything.
//! It speaks the same output protocol as the real tools so the bridge and
//! every stage above it run unchanged:
//!
//! - ffmpeg copies its first input to its output (the last argument), or
//!   writes placeholder bytes when there is no readable input.
//! - ffprobe prints a fixed duration.
//! - the separator takes `<input> <output-dir>`, writes
//!   `<output-dir>/<base>/<layer>.wav` and prints the layer map as JSON.
//! - the analyzer prints a features object.

use crate::bridge::{ExitInfo, LineSink, ProcessRunner, ProcessSpec, Stream};
use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use std::path::{Path, PathBuf};
use std::time::Duration;
use stemmix_core::{Result, StemKind, Tool, ToolPaths};

/// How the fake separator responds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeparatorBehaviour {
    /// Write all four layers and report them.
    Succeed,
    /// Exit 1 with no result.
    Fail,
    /// Write and report only three layers.
    Incomplete,
    /// Never finish.
    Hang,
}

/// How the fake analyzer responds.
#[derive(Debug, Clone, PartialEq)]
pub enum AnalyzerBehaviour {
    Report(Value),
    Fail,
}

struct State {
    calls: Vec<ProcessSpec>,
    separator: SeparatorBehaviour,
    analyzer: AnalyzerBehaviour,
    ffmpeg_fail_patterns: Vec<String>,
    duration_secs: f64,
}

/// Recording fake for every external tool.
pub struct FakeRunner {
    state: Mutex<State>,
}

impl Default for FakeRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeRunner {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                calls: Vec::new(),
                separator: SeparatorBehaviour::Succeed,
                analyzer: AnalyzerBehaviour::Report(json!({
                    "bpm": 128.0,
                    "key": "A Minor",
                    "energy": 0.7,
                    "clarity": 0.6,
                })),
                ffmpeg_fail_patterns: Vec::new(),
                duration_secs: 180.0,
            }),
        }
    }

    pub fn with_separator(self, behaviour: SeparatorBehaviour) -> Self {
        self.state.lock().separator = behaviour;
        self
    }

    pub fn with_analyzer(self, behaviour: AnalyzerBehaviour) -> Self {
        self.state.lock().analyzer = behaviour;
        self
    }

    pub fn with_duration(self, secs: f64) -> Self {
        self.state.lock().duration_secs = secs;
        self
    }

    /// Make every ffmpeg call whose joined arguments contain `pattern` exit 1.
    pub fn fail_ffmpeg_when(self, pattern: impl Into<String>) -> Self {
        self.state.lock().ffmpeg_fail_patterns.push(pattern.into());
        self
    }

    /// Every invocation so far, in order.
    pub fn calls(&self) -> Vec<ProcessSpec> {
        self.state.lock().calls.clone()
    }

    /// Invocations of one tool.
    pub fn calls_for(&self, tool: Tool) -> Vec<ProcessSpec> {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|c| c.tool == tool)
            .cloned()
            .collect()
    }

    pub fn count(&self, tool: Tool) -> usize {
        self.state.lock().calls.iter().filter(|c| c.tool == tool).count()
    }

    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    fn ffmpeg(&self, spec: &ProcessSpec, on_line: &LineSink<'_>) -> Result<ExitInfo> {
        let joined = spec.args.join(" ");
        let should_fail = self
            .state
            .lock()
            .ffmpeg_fail_patterns
            .iter()
            .any(|p| joined.contains(p.as_str()));
        if should_fail {
            on_line(Stream::Stderr, "Error initializing filter graph");
            return Ok(ExitInfo::failure(1));
        }

        let Some(output) = spec.args.last().map(PathBuf::from) else {
            on_line(Stream::Stderr, "no output file");
            return Ok(ExitInfo::failure(1));
        };
        let input = flag_value(&spec.args, "-i").map(PathBuf::from);
        match input.filter(|p| p.is_file()) {
            Some(input) if input != output => {
                std::fs::copy(&input, &output)?;
            }
            Some(_) => {}
            None => std::fs::write(&output, b"fake-audio")?,
        }
        Ok(ExitInfo::success())
    }

    async fn separator(&self, spec: &ProcessSpec, on_line: &LineSink<'_>) -> Result<ExitInfo> {
        let behaviour = self.state.lock().separator;
        let layer_count = match behaviour {
            SeparatorBehaviour::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                return Ok(ExitInfo::failure(1));
            }
            SeparatorBehaviour::Fail => {
                on_line(Stream::Stderr, "separation failed: model not loaded");
                return Ok(ExitInfo::failure(1));
            }
            SeparatorBehaviour::Succeed => StemKind::ALL.len(),
            SeparatorBehaviour::Incomplete => StemKind::ALL.len() - 1,
        };

        // Positional contract: ... <input> <output-dir> [--light]
        let positional: Vec<&str> = spec
            .args
            .iter()
            .map(String::as_str)
            .filter(|a| !a.starts_with("--"))
            .collect();
        let [.., input, out_dir] = positional.as_slice() else {
            on_line(Stream::Stderr, "usage: separate <input> <output-dir> [--light]");
            return Ok(ExitInfo::failure(2));
        };
        let base = Path::new(input)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "track".into());
        let dir = Path::new(out_dir).join(base);
        std::fs::create_dir_all(&dir)?;

        on_line(Stream::Stderr, "PROGRESS:50");
        let mut map = Map::new();
        for kind in StemKind::ALL.iter().take(layer_count) {
            let path = dir.join(format!("{}.wav", kind.as_str()));
            std::fs::write(&path, format!("fake-stem-{}", kind.as_str()))?;
            map.insert(
                kind.as_str().into(),
                Value::String(path.to_string_lossy().into_owned()),
            );
        }
        on_line(Stream::Stderr, "PROGRESS:100");
        on_line(Stream::Stdout, &Value::Object(map).to_string());
        Ok(ExitInfo::success())
    }

    fn analyzer(&self, on_line: &LineSink<'_>) -> ExitInfo {
        let behaviour = self.state.lock().analyzer.clone();
        match behaviour {
            AnalyzerBehaviour::Report(value) => {
                on_line(Stream::Stdout, &value.to_string());
                ExitInfo::success()
            }
            AnalyzerBehaviour::Fail => {
                on_line(Stream::Stderr, "analysis failed");
                ExitInfo::failure(1)
            }
        }
    }
}

impl ProcessRunner for FakeRunner {
    async fn execute(&self, spec: &ProcessSpec, on_line: &LineSink<'_>) -> Result<ExitInfo> {
        self.state.lock().calls.push(spec.clone());
        match spec.tool {
            Tool::Ffmpeg => self.ffmpeg(spec, on_line),
            Tool::Ffprobe => {
                let secs = self.state.lock().duration_secs;
                on_line(Stream::Stdout, &format!("{secs:.6}"));
                Ok(ExitInfo::success())
            }
            Tool::Separator => self.separator(spec, on_line).await,
            Tool::Analyzer => Ok(self.analyzer(on_line)),
        }
    }
}

fn flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .map(String::as_str)
}

/// Create placeholder tool files in `dir` so every tool resolves.
pub fn fake_tool_paths(dir: &Path) -> std::io::Result<ToolPaths> {
    let touch = |name: &str| -> std::io::Result<PathBuf> {
        let path = dir.join(name);
        std::fs::write(&path, "")?;
        Ok(path)
    };
    Ok(ToolPaths {
        ffmpeg: Some(touch("ffmpeg")?),
        ffprobe: Some(touch("ffprobe")?),
        python: None,
        separator_script: Some(touch("separate")?),
        analyzer_script: Some(touch("analyze")?),
    })
}
