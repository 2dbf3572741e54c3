//! External process bridge.
//!
//! Every external tool (ffmpeg, ffprobe, the separator and analyzer
//! scripts) is driven through [`ProcessBridge`]. The bridge resolves the
//! tool from the host profile, injects the resource hints, enforces a
//! per-tool timeout and interprets the child's output:
//!
//! - `PROGRESS:<n>` lines on either stream are progress reports.
//! - NDJSON lines of the form `{"event": "progress" | "log" | "result", ...}`
//!   are structured events; an explicit `result` event wins.
//! - Otherwise the last non-sentinel stdout line is the result, parsed as
//!   JSON when possible.
//!
//! A child that exits unsuccessfully *and* produced no JSON result is a
//! failure. A JSON result with a bad exit status is accepted with a warning.

use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::Value;
use std::collections::VecDeque;
use std::future::Future;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use stemmix_core::{HostProfile, OptimizationProfile, Result, StemmixError, Tool, ToolPaths};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Prefix of plain-text progress lines.
pub const PROGRESS_PREFIX: &str = "PROGRESS:";

/// Number of stderr lines kept for error reports.
const STDERR_TAIL_LINES: usize = 20;

/// Output stream a line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Stdout,
    Stderr,
}

/// Callback receiving each output line as it arrives.
pub type LineSink<'a> = dyn Fn(Stream, &str) + Send + Sync + 'a;

/// A fully resolved child process invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessSpec {
    pub tool: Tool,
    pub program: PathBuf,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
}

/// How a child process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitInfo {
    pub code: Option<i32>,
    pub success: bool,
}

impl ExitInfo {
    pub fn success() -> Self {
        Self {
            code: Some(0),
            success: true,
        }
    }

    pub fn failure(code: i32) -> Self {
        Self {
            code: Some(code),
            success: false,
        }
    }

    fn describe(&self) -> String {
        match self.code {
            Some(code) => format!("exit code {code}"),
            None => "signal".to_string(),
        }
    }
}

/// Launches child processes and streams their output lines.
///
/// The production implementation is [`SystemRunner`]; tests substitute an
/// in-process fake. Dropping the returned future must stop the child.
pub trait ProcessRunner: Send + Sync {
    fn execute(
        &self,
        spec: &ProcessSpec,
        on_line: &LineSink<'_>,
    ) -> impl Future<Output = Result<ExitInfo>> + Send;
}

impl<T: ProcessRunner> ProcessRunner for Arc<T> {
    fn execute(
        &self,
        spec: &ProcessSpec,
        on_line: &LineSink<'_>,
    ) -> impl Future<Output = Result<ExitInfo>> + Send {
        (**self).execute(spec, on_line)
    }
}

/// Runs real OS processes with tokio.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl ProcessRunner for SystemRunner {
    async fn execute(&self, spec: &ProcessSpec, on_line: &LineSink<'_>) -> Result<ExitInfo> {
        let mut child = Command::new(&spec.program)
            .args(&spec.args)
            .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| spawn_error(spec, e))?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let read_stdout = async {
            if let Some(out) = stdout {
                let mut lines = BufReader::new(out).lines();
                while let Some(line) = lines.next_line().await? {
                    on_line(Stream::Stdout, &line);
                }
            }
            Ok::<_, std::io::Error>(())
        };
        let read_stderr = async {
            if let Some(err) = stderr {
                let mut lines = BufReader::new(err).lines();
                while let Some(line) = lines.next_line().await? {
                    on_line(Stream::Stderr, &line);
                }
            }
            Ok::<_, std::io::Error>(())
        };

        let (out_res, err_res) = tokio::join!(read_stdout, read_stderr);
        out_res?;
        err_res?;

        let status = child.wait().await?;
        Ok(ExitInfo {
            code: status.code(),
            success: status.success(),
        })
    }
}

fn spawn_error(spec: &ProcessSpec, e: std::io::Error) -> StemmixError {
    match e.kind() {
        std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied => {
            StemmixError::ToolUnavailable {
                tool: spec.tool.name().into(),
                reason: format!("cannot launch {}: {e}", spec.program.display()),
            }
        }
        _ => StemmixError::Io(e),
    }
}

/// Interpreted final result of a tool.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolResult {
    Json(Value),
    Text(String),
    Empty,
}

/// Everything the bridge learned from one invocation.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub tool: Tool,
    pub result: ToolResult,
    pub exit_code: Option<i32>,
    pub stderr_tail: String,
    pub elapsed: Duration,
}

impl ToolOutput {
    /// The JSON result, if there was one.
    pub fn json(&self) -> Option<&Value> {
        match &self.result {
            ToolResult::Json(v) => Some(v),
            _ => None,
        }
    }

    /// Deserialize the JSON result into `T`.
    pub fn parse_json<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        let value = self.json().cloned().ok_or_else(|| {
            StemmixError::Validation(format!("{} produced no JSON result", self.tool.name()))
        })?;
        Ok(serde_json::from_value(value)?)
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
enum ToolEvent {
    Progress {
        value: f64,
    },
    Log {
        #[serde(default)]
        message: String,
    },
    Result {
        data: Value,
    },
}

fn parse_event(line: &str) -> Option<ToolEvent> {
    if !line.starts_with('{') {
        return None;
    }
    serde_json::from_str(line).ok()
}

/// Parse a progress report from a `PROGRESS:<n>` line or a progress event.
pub fn parse_progress(line: &str) -> Option<u8> {
    let line = line.trim();
    let value = if let Some(rest) = line.strip_prefix(PROGRESS_PREFIX) {
        rest.trim().parse::<f64>().ok()?
    } else {
        match parse_event(line)? {
            ToolEvent::Progress { value } => value,
            _ => return None,
        }
    };
    if !value.is_finite() {
        return None;
    }
    Some(value.clamp(0.0, 100.0).round() as u8)
}

/// Streaming result detection over stdout.
///
/// Holds only the latest explicit result event and the latest plain line.
#[derive(Debug, Default)]
struct ResultCollector {
    explicit: Option<Value>,
    last: Option<String>,
}

impl ResultCollector {
    fn push(&mut self, line: &str) {
        let line = line.trim();
        if line.is_empty() || line.starts_with(PROGRESS_PREFIX) {
            return;
        }
        match parse_event(line) {
            Some(ToolEvent::Result { data }) => self.explicit = Some(data),
            Some(_) => {}
            None => self.last = Some(line.to_string()),
        }
    }

    fn finish(self) -> ToolResult {
        if let Some(data) = self.explicit {
            return ToolResult::Json(data);
        }
        match self.last {
            Some(line) => match serde_json::from_str::<Value>(&line) {
                Ok(v) => ToolResult::Json(v),
                Err(_) => ToolResult::Text(line),
            },
            None => ToolResult::Empty,
        }
    }
}

/// Work out the result from collected stdout lines.
pub fn parse_result(stdout: &[String]) -> ToolResult {
    let mut collector = ResultCollector::default();
    for line in stdout {
        collector.push(line);
    }
    collector.finish()
}

#[derive(Default)]
struct Capture {
    result: ResultCollector,
    stderr: VecDeque<String>,
}

#[derive(Debug, Clone, Copy)]
struct Timeouts {
    script: Duration,
    ffmpeg: Duration,
    probe: Duration,
}

impl Timeouts {
    fn from_profile(profile: &OptimizationProfile) -> Self {
        Self {
            script: profile.separation_timeout,
            ffmpeg: profile.ffmpeg_timeout,
            probe: profile.probe_timeout,
        }
    }
}

/// Uniform invocation of external tools for one job.
pub struct ProcessBridge<R> {
    runner: R,
    tools: ToolPaths,
    env: Vec<(String, String)>,
    timeouts: Timeouts,
}

impl<R: ProcessRunner> ProcessBridge<R> {
    /// Create a bridge bound to `host`'s tools, hints and timeouts.
    pub fn new(runner: R, host: &HostProfile) -> Self {
        Self {
            runner,
            tools: host.tools.clone(),
            env: host.child_env(),
            timeouts: Timeouts::from_profile(&host.profile),
        }
    }

    pub fn is_available(&self, tool: Tool) -> bool {
        self.tools.is_available(tool)
    }

    /// Time budget for one invocation of `tool`.
    pub fn timeout_for(&self, tool: Tool) -> Duration {
        match tool {
            Tool::Separator | Tool::Analyzer => self.timeouts.script,
            Tool::Ffmpeg => self.timeouts.ffmpeg,
            Tool::Ffprobe => self.timeouts.probe,
        }
    }

    /// Run `tool` with `args` and extra environment entries.
    pub async fn invoke(
        &self,
        tool: Tool,
        args: Vec<String>,
        env: &[(String, String)],
    ) -> Result<ToolOutput> {
        self.run(tool, args, env, None).await
    }

    /// Run `tool`, forwarding progress reports to `on_progress`.
    pub async fn invoke_with_progress(
        &self,
        tool: Tool,
        args: Vec<String>,
        on_progress: &(dyn Fn(u8) + Send + Sync),
    ) -> Result<ToolOutput> {
        self.run(tool, args, &[], Some(on_progress)).await
    }

    async fn run(
        &self,
        tool: Tool,
        args: Vec<String>,
        extra_env: &[(String, String)],
        on_progress: Option<&(dyn Fn(u8) + Send + Sync)>,
    ) -> Result<ToolOutput> {
        let launch = self.tools.resolve(tool)?;
        let mut full_args = launch.leading_args;
        full_args.extend(args);
        let mut env = self.env.clone();
        env.extend_from_slice(extra_env);
        let spec = ProcessSpec {
            tool,
            program: launch.program,
            args: full_args,
            env,
        };

        let capture = Mutex::new(Capture::default());
        let sink = |stream: Stream, line: &str| {
            if let Some(pct) = parse_progress(line) {
                if let Some(cb) = on_progress {
                    cb(pct);
                }
            }
            match stream {
                Stream::Stdout => capture.lock().result.push(line),
                Stream::Stderr => {
                    debug!(tool = tool.name(), "{line}");
                    let mut cap = capture.lock();
                    if cap.stderr.len() == STDERR_TAIL_LINES {
                        cap.stderr.pop_front();
                    }
                    cap.stderr.push_back(line.to_string());
                }
            }
        };

        let limit = self.timeout_for(tool);
        debug!(tool = tool.name(), program = %spec.program.display(), args = ?spec.args, "Invoking tool");
        let started = Instant::now();
        let exit = match tokio::time::timeout(limit, self.runner.execute(&spec, &sink)).await {
            Ok(res) => res?,
            Err(_) => {
                warn!(tool = tool.name(), secs = limit.as_secs(), "Tool timed out; killed");
                return Err(StemmixError::ToolTimeout {
                    tool: tool.name().into(),
                    after_secs: limit.as_secs(),
                });
            }
        };
        let elapsed = started.elapsed();

        let captured = std::mem::take(&mut *capture.lock());
        let result = captured.result.finish();
        let stderr_tail = Vec::from(captured.stderr).join("\n");

        if !exit.success {
            if matches!(result, ToolResult::Json(_)) {
                warn!(
                    tool = tool.name(),
                    status = %exit.describe(),
                    "Tool exited unsuccessfully but produced a JSON result"
                );
            } else {
                return Err(StemmixError::ToolFailed {
                    tool: tool.name().into(),
                    status: exit.describe(),
                    stderr_tail,
                });
            }
        }

        info!(tool = tool.name(), elapsed_ms = elapsed.as_millis() as u64, "Tool finished");
        Ok(ToolOutput {
            tool,
            result,
            exit_code: exit.code,
            stderr_tail,
            elapsed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_progress_parsing() {
        assert_eq!(parse_progress("PROGRESS:42"), Some(42));
        assert_eq!(parse_progress("  PROGRESS: 99.6 "), Some(100));
        assert_eq!(parse_progress("PROGRESS:250"), Some(100));
        assert_eq!(parse_progress(r#"{"event":"progress","value":12}"#), Some(12));
        assert_eq!(parse_progress("PROGRESS:abc"), None);
        assert_eq!(parse_progress("separating..."), None);
    }

    #[test]
    fn test_last_stdout_line_is_result() {
        let out = lines(&["PROGRESS:10", "loading model", r#"{"bpm":128}"#, "PROGRESS:100"]);
        assert_eq!(
            parse_result(&out),
            ToolResult::Json(serde_json::json!({"bpm": 128}))
        );

        let out = lines(&["step one", "done"]);
        assert_eq!(parse_result(&out), ToolResult::Text("done".into()));
        assert_eq!(parse_result(&lines(&["PROGRESS:5", ""])), ToolResult::Empty);
    }

    #[test]
    fn test_collector_keeps_only_the_latest_line() {
        let mut collector = ResultCollector::default();
        for i in 0..10_000 {
            collector.push(&format!("frame={i}"));
            collector.push("PROGRESS:50");
        }
        assert_eq!(collector.last.as_deref(), Some("frame=9999"));
        assert!(collector.explicit.is_none());
        assert_eq!(collector.finish(), ToolResult::Text("frame=9999".into()));
    }

    #[test]
    fn test_explicit_result_event_wins() {
        let out = lines(&[
            r#"{"event":"result","data":{"vocals":"/a/vocals.wav"}}"#,
            r#"{"event":"log","message":"cleaning up"}"#,
            "trailing chatter",
        ]);
        assert_eq!(
            parse_result(&out),
            ToolResult::Json(serde_json::json!({"vocals": "/a/vocals.wav"}))
        );
    }

    #[cfg(unix)]
    mod process {
        use super::super::*;
        use stemmix_core::{OptimizationLevel, ResourceSnapshot};

        fn host_with_script(script: PathBuf) -> HostProfile {
            let resources = ResourceSnapshot {
                total_memory_bytes: 16 * 1024 * 1024 * 1024,
                available_memory_bytes: 8 * 1024 * 1024 * 1024,
                cpu_count: 8,
            };
            let tools = ToolPaths {
                separator_script: Some(script),
                ..Default::default()
            };
            HostProfile::from_parts(resources, OptimizationLevel::Standard, tools)
        }

        fn write_script(dir: &std::path::Path, body: &str) -> PathBuf {
            let path = dir.join("tool.sh");
            std::fs::write(&path, body).unwrap();
            path
        }

        #[tokio::test]
        async fn test_progress_and_json_result() {
            let tmp = tempfile::tempdir().expect("failed to create tempdir");
            let script = write_script(
                tmp.path(),
                "echo PROGRESS:25 >&2\necho 'working'\necho PROGRESS:75\necho '{\"ok\":true}'\n",
            );
            let bridge = ProcessBridge::new(SystemRunner, &host_with_script(script));

            let seen = Mutex::new(Vec::new());
            let out = bridge
                .invoke_with_progress(Tool::Separator, vec![], &|p| seen.lock().push(p))
                .await
                .unwrap();

            let mut seen = seen.into_inner();
            seen.sort_unstable();
            assert_eq!(seen, vec![25, 75]);
            assert_eq!(out.json(), Some(&serde_json::json!({"ok": true})));
            assert_eq!(out.exit_code, Some(0));
        }

        #[tokio::test]
        async fn test_failure_without_json_is_error() {
            let tmp = tempfile::tempdir().expect("failed to create tempdir");
            let script = write_script(tmp.path(), "echo 'model missing' >&2\necho nope\nexit 3\n");
            let bridge = ProcessBridge::new(SystemRunner, &host_with_script(script));

            let err = bridge.invoke(Tool::Separator, vec![], &[]).await.unwrap_err();
            match err {
                StemmixError::ToolFailed {
                    status, stderr_tail, ..
                } => {
                    assert_eq!(status, "exit code 3");
                    assert!(stderr_tail.contains("model missing"));
                }
                other => panic!("unexpected {other:?}"),
            }
        }

        #[tokio::test]
        async fn test_failure_with_json_is_accepted() {
            let tmp = tempfile::tempdir().expect("failed to create tempdir");
            let script = write_script(tmp.path(), "echo '{\"partial\":1}'\nexit 1\n");
            let bridge = ProcessBridge::new(SystemRunner, &host_with_script(script));

            let out = bridge.invoke(Tool::Separator, vec![], &[]).await.unwrap();
            assert_eq!(out.exit_code, Some(1));
            assert!(out.json().is_some());
        }

        #[tokio::test]
        async fn test_hint_environment_is_passed() {
            let tmp = tempfile::tempdir().expect("failed to create tempdir");
            let script = write_script(tmp.path(), "echo \"$STEMMIX_LIGHT_MODE:$EXTRA\"\n");
            let bridge = ProcessBridge::new(SystemRunner, &host_with_script(script));

            let out = bridge
                .invoke(
                    Tool::Separator,
                    vec![],
                    &[("EXTRA".to_string(), "yes".to_string())],
                )
                .await
                .unwrap();
            assert_eq!(out.result, ToolResult::Text("0:yes".into()));
        }

        #[tokio::test]
        async fn test_timeout_kills_child() {
            let tmp = tempfile::tempdir().expect("failed to create tempdir");
            let script = write_script(tmp.path(), "sleep 5\necho late\n");
            let mut host = host_with_script(script);
            host.profile.separation_timeout = Duration::from_millis(200);
            let bridge = ProcessBridge::new(SystemRunner, &host);

            let started = Instant::now();
            let err = bridge.invoke(Tool::Separator, vec![], &[]).await.unwrap_err();
            assert!(matches!(err, StemmixError::ToolTimeout { .. }));
            assert!(err.is_unavailable());
            assert!(started.elapsed() < Duration::from_secs(4));
        }

        #[tokio::test]
        async fn test_missing_tool_fails_fast() {
            let host = host_with_script(PathBuf::from("/nonexistent/separate.py"));
            let bridge = ProcessBridge::new(SystemRunner, &host);
            let err = bridge.invoke(Tool::Separator, vec![], &[]).await.unwrap_err();
            assert!(err.is_unavailable());
            assert!(!bridge.is_available(Tool::Ffmpeg));
        }
    }
}
