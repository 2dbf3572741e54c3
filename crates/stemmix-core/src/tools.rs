//! External tool discovery.
//!
//! Tool locations are resolved once into a [`ToolPaths`] value that travels
//! inside the host profile, so nothing downstream consults `PATH` or the
//! environment on its own.

use crate::config::StemmixConfig;
use crate::error::{Result, StemmixError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Interpreter for `.sh` wrapper scripts.
const SHELL: &str = "/bin/sh";

/// An external process the pipeline knows how to invoke.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tool {
    /// Audio filtering, mixing and encoding.
    Ffmpeg,
    /// Media metadata probing.
    Ffprobe,
    /// ML source separation script.
    Separator,
    /// Feature analysis script.
    Analyzer,
}

impl Tool {
    /// All known tools.
    pub const ALL: [Tool; 4] = [Tool::Ffmpeg, Tool::Ffprobe, Tool::Separator, Tool::Analyzer];

    /// Short name used in logs and errors.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Ffmpeg => "ffmpeg",
            Self::Ffprobe => "ffprobe",
            Self::Separator => "separator",
            Self::Analyzer => "analyzer",
        }
    }
}

/// How to launch a resolved tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Launch {
    /// Program to execute.
    pub program: PathBuf,
    /// Arguments placed before the caller's arguments (e.g. the script path).
    pub leading_args: Vec<String>,
}

/// Resolved locations of every external tool.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolPaths {
    pub ffmpeg: Option<PathBuf>,
    pub ffprobe: Option<PathBuf>,
    pub python: Option<PathBuf>,
    pub separator_script: Option<PathBuf>,
    pub analyzer_script: Option<PathBuf>,
}

impl ToolPaths {
    /// Resolve tools from config overrides, falling back to a `PATH` search.
    pub fn discover(config: &StemmixConfig) -> Self {
        let paths = Self {
            ffmpeg: override_or_which(config.ffmpeg.as_deref(), &["ffmpeg"]),
            ffprobe: override_or_which(config.ffprobe.as_deref(), &["ffprobe"]),
            python: override_or_which(config.python.as_deref(), &["python3", "python"]),
            separator_script: config.separator_script.clone(),
            analyzer_script: config.analyzer_script.clone(),
        };
        debug!(?paths, "Resolved tool paths");
        paths
    }

    /// Work out how to launch `tool`, failing fast when anything is missing.
    pub fn resolve(&self, tool: Tool) -> Result<Launch> {
        match tool {
            Tool::Ffmpeg => binary(tool, self.ffmpeg.as_deref()),
            Tool::Ffprobe => binary(tool, self.ffprobe.as_deref()),
            Tool::Separator => self.script(tool, self.separator_script.as_deref()),
            Tool::Analyzer => self.script(tool, self.analyzer_script.as_deref()),
        }
    }

    /// Whether `tool` can currently be launched.
    pub fn is_available(&self, tool: Tool) -> bool {
        self.resolve(tool).is_ok()
    }

    fn script(&self, tool: Tool, script: Option<&Path>) -> Result<Launch> {
        let script = script.ok_or_else(|| unavailable(tool, "no script configured"))?;
        if !script.is_file() {
            return Err(unavailable(
                tool,
                &format!("script not found at {}", script.display()),
            ));
        }
        match script.extension().and_then(|e| e.to_str()) {
            Some("py") => {}
            Some("sh") => {
                return Ok(Launch {
                    program: PathBuf::from(SHELL),
                    leading_args: vec![script.to_string_lossy().into_owned()],
                });
            }
            // Directly executable, with its own interpreter line.
            _ => {
                return Ok(Launch {
                    program: script.to_path_buf(),
                    leading_args: Vec::new(),
                });
            }
        }
        let python = self
            .python
            .as_deref()
            .ok_or_else(|| unavailable(tool, "python interpreter not found"))?;
        if !python.exists() {
            return Err(unavailable(
                tool,
                &format!("python not found at {}", python.display()),
            ));
        }
        Ok(Launch {
            program: python.to_path_buf(),
            leading_args: vec![script.to_string_lossy().into_owned()],
        })
    }
}

fn binary(tool: Tool, path: Option<&Path>) -> Result<Launch> {
    let path = path.ok_or_else(|| unavailable(tool, "not found on PATH"))?;
    if !path.exists() {
        return Err(unavailable(
            tool,
            &format!("binary not found at {}", path.display()),
        ));
    }
    Ok(Launch {
        program: path.to_path_buf(),
        leading_args: Vec::new(),
    })
}

fn override_or_which(configured: Option<&Path>, names: &[&str]) -> Option<PathBuf> {
    if let Some(p) = configured {
        return Some(p.to_path_buf());
    }
    names.iter().find_map(|name| which::which(name).ok())
}

fn unavailable(tool: Tool, reason: &str) -> StemmixError {
    StemmixError::ToolUnavailable {
        tool: tool.name().into(),
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_script_is_unavailable() {
        let paths = ToolPaths {
            separator_script: Some("/nope/separate_stems.py".into()),
            ..Default::default()
        };
        let err = paths.resolve(Tool::Separator).unwrap_err();
        assert!(err.is_unavailable());
        assert!(!paths.is_available(Tool::Analyzer));
    }

    #[test]
    fn test_python_script_launches_through_interpreter() {
        let tmp = tempfile::tempdir().expect("failed to create tempdir");
        let script = tmp.path().join("separate.py");
        let python = tmp.path().join("python3");
        std::fs::write(&script, "print('{}')").unwrap();
        std::fs::write(&python, "").unwrap();

        let paths = ToolPaths {
            python: Some(python.clone()),
            separator_script: Some(script.clone()),
            ..Default::default()
        };
        let launch = paths.resolve(Tool::Separator).unwrap();
        assert_eq!(launch.program, python);
        assert_eq!(launch.leading_args, vec![script.to_string_lossy().to_string()]);
    }

    #[test]
    fn test_python_script_without_interpreter() {
        let tmp = tempfile::tempdir().expect("failed to create tempdir");
        let script = tmp.path().join("analyze.py");
        std::fs::write(&script, "").unwrap();
        let paths = ToolPaths {
            analyzer_script: Some(script),
            ..Default::default()
        };
        assert!(paths.resolve(Tool::Analyzer).unwrap_err().is_unavailable());
    }

    #[test]
    fn test_shell_wrapper_runs_through_sh() {
        let tmp = tempfile::tempdir().expect("failed to create tempdir");
        let script = tmp.path().join("separate.sh");
        std::fs::write(&script, "echo '{}'\n").unwrap();
        let paths = ToolPaths {
            separator_script: Some(script.clone()),
            ..Default::default()
        };
        let launch = paths.resolve(Tool::Separator).unwrap();
        assert_eq!(launch.program, PathBuf::from("/bin/sh"));
        assert_eq!(launch.leading_args, vec![script.to_string_lossy().to_string()]);
    }

    #[test]
    fn test_extensionless_script_runs_directly() {
        let tmp = tempfile::tempdir().expect("failed to create tempdir");
        let script = tmp.path().join("separate");
        std::fs::write(&script, "#!/bin/sh\n").unwrap();
        let paths = ToolPaths {
            separator_script: Some(script.clone()),
            ..Default::default()
        };
        let launch = paths.resolve(Tool::Separator).unwrap();
        assert_eq!(launch.program, script);
        assert!(launch.leading_args.is_empty());
    }

    #[test]
    fn test_tool_names() {
        let names: Vec<_> = Tool::ALL.iter().map(|t| t.name()).collect();
        assert_eq!(names, ["ffmpeg", "ffprobe", "separator", "analyzer"]);
    }
}
