//! Stemmix Media - External tool plumbing
//!
//! Provides:
//! - The process bridge every external tool call goes through
//! - Typed FFmpeg filter graphs and command lines
//! - Output encodings for intermediates and masters
//! - Duration probing

pub mod bridge;
pub mod encode;
pub mod ffmpeg;
pub mod probe;

#[cfg(any(test, feature = "test-support"))]
pub mod fake;

pub use bridge::{
    parse_progress, parse_result, ExitInfo, LineSink, ProcessBridge, ProcessRunner, ProcessSpec,
    Stream, SystemRunner, ToolOutput, ToolResult,
};
pub use encode::{AudioCodec, AudioEncoding};
pub use ffmpeg::{FfmpegCommand, Filter, FilterChain, FilterGraph};
pub use probe::probe_duration;

use stemmix_core::{Result, Tool};

/// Run a built ffmpeg command through `bridge`.
pub async fn run_ffmpeg<R: ProcessRunner>(
    bridge: &ProcessBridge<R>,
    command: &FfmpegCommand,
) -> Result<ToolOutput> {
    bridge.invoke(Tool::Ffmpeg, command.args(), &[]).await
}
