//! Media probing via ffprobe.

use crate::bridge::{ProcessBridge, ProcessRunner, ToolResult};
use std::path::Path;
use stemmix_core::{Result, StemmixError, Tool};

/// Arguments asking ffprobe for the container duration only.
pub fn duration_args(path: &Path) -> Vec<String> {
    vec![
        "-v".into(),
        "error".into(),
        "-show_entries".into(),
        "format=duration".into(),
        "-of".into(),
        "default=noprint_wrappers=1:nokey=1".into(),
        path.to_string_lossy().into_owned(),
    ]
}

/// Duration of `path` in seconds.
pub async fn probe_duration<R: ProcessRunner>(
    bridge: &ProcessBridge<R>,
    path: &Path,
) -> Result<f64> {
    let out = bridge.invoke(Tool::Ffprobe, duration_args(path), &[]).await?;
    let secs = match &out.result {
        // A bare number parses as JSON.
        ToolResult::Json(v) => v.as_f64(),
        ToolResult::Text(t) => t.trim().parse::<f64>().ok(),
        ToolResult::Empty => None,
    };
    secs.filter(|s| s.is_finite() && *s >= 0.0).ok_or_else(|| {
        StemmixError::Validation(format!("no duration reported for {}", path.display()))
    })
}
