//! Render engine backed by an external command.
//!
//! The program receives `{"spec", "width", "height", "format"}` as JSON on
//! stdin and must write the encoded chart to stdout. Exit status 2 means the
//! spec itself cannot be drawn; any other failure is an engine fault.

use std::io::{self, ErrorKind};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Instant;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::application::render::{
    ChartEngine, EngineError, OutputFormat, RenderOptions, RenderResult,
};

const SOURCE: &str = "infra::engine";
const MAX_STDERR: usize = 2048;
const REJECTED_EXIT_CODE: i32 = 2;

#[derive(Serialize)]
struct EngineInput<'a> {
    spec: &'a Value,
    width: u32,
    height: u32,
    format: OutputFormat,
}

#[derive(Debug, Clone)]
pub struct CommandEngine {
    program: PathBuf,
    args: Vec<String>,
}

impl CommandEngine {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

fn truncate_stderr(raw: &[u8]) -> String {
    let text = String::from_utf8_lossy(raw);
    let text = text.trim();
    if text.len() <= MAX_STDERR {
        return text.to_string();
    }
    let cut = (0..=MAX_STDERR)
        .rev()
        .find(|idx| text.is_char_boundary(*idx))
        .unwrap_or(0);
    format!("{}...", &text[..cut])
}

#[async_trait]
impl ChartEngine for CommandEngine {
    async fn render(
        &self,
        spec: &Value,
        options: RenderOptions,
    ) -> Result<RenderResult, EngineError> {
        let started_at = Instant::now();
        let input = serde_json::to_vec(&EngineInput {
            spec,
            width: options.width,
            height: options.height,
            format: options.format,
        })
        .map_err(|err| EngineError::Io(io::Error::new(ErrorKind::InvalidInput, err)))?;

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| {
                warn!(
                    target_module = SOURCE,
                    op = "engine::render",
                    result = "error",
                    error_code = "spawn_engine",
                    program = %self.program.display(),
                    error = %err,
                    "Failed to spawn render engine"
                );
                if err.kind() == ErrorKind::NotFound {
                    EngineError::Unavailable(err)
                } else {
                    EngineError::Io(err)
                }
            })?;

        let mut stdin = child.stdin.take().ok_or_else(|| {
            EngineError::Io(io::Error::new(ErrorKind::BrokenPipe, "engine stdin unavailable"))
        })?;
        let feed = async move {
            stdin.write_all(&input).await?;
            stdin.shutdown().await
        };
        let (fed, output) = tokio::join!(feed, child.wait_with_output());
        let output = output.map_err(EngineError::Io)?;

        if !output.status.success() {
            let exit_code = output.status.code();
            let stderr = truncate_stderr(&output.stderr);
            warn!(
                target_module = SOURCE,
                op = "engine::render",
                result = "error",
                elapsed_ms = started_at.elapsed().as_millis() as u64,
                exit_code = exit_code.map(i64::from).unwrap_or(-1),
                error_code = "engine_exit",
                stderr = %stderr,
                "Render engine exited with failure"
            );
            if exit_code == Some(REJECTED_EXIT_CODE) {
                return Err(EngineError::Rejected(stderr));
            }
            return Err(EngineError::Failed { exit_code, stderr });
        }
        fed.map_err(EngineError::Io)?;

        if output.stdout.is_empty() {
            return Err(EngineError::EmptyOutput);
        }

        debug!(
            target_module = SOURCE,
            op = "engine::render",
            result = "ok",
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            format = options.format.as_str(),
            bytes = output.stdout.len(),
            "Render engine produced chart"
        );
        Ok(RenderResult::new(
            output.stdout,
            options.format.content_type(),
        ))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;

    use serde_json::json;
    use tempfile::TempDir;

    use super::*;

    fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("write script");
        let mut perms = fs::metadata(&path).expect("metadata").permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&path, perms).expect("set perms");
        path
    }

    fn options(format: OutputFormat) -> RenderOptions {
        RenderOptions {
            width: 400,
            height: 300,
            format,
        }
    }

    #[tokio::test]
    async fn passes_request_on_stdin_and_returns_stdout() {
        let dir = TempDir::new().expect("temp dir");
        let input_log = dir.path().join("input.json");
        let script = write_script(dir.path(), "fake-engine", "cat > \"$1\"\nprintf 'PNGDATA'");
        let engine = CommandEngine::new(script, vec![input_log.display().to_string()]);

        let result = engine
            .render(&json!({"type": "bar", "data": [1, 2]}), options(OutputFormat::Png))
            .await
            .expect("render");

        assert_eq!(result.payload.as_ref(), b"PNGDATA");
        assert_eq!(result.content_type, "image/png");

        let sent: Value =
            serde_json::from_slice(&fs::read(&input_log).expect("input log")).expect("json");
        assert_eq!(
            sent,
            json!({
                "spec": {"type": "bar", "data": [1, 2]},
                "width": 400,
                "height": 300,
                "format": "png"
            })
        );
    }

    #[tokio::test]
    async fn content_type_follows_requested_format() {
        let dir = TempDir::new().expect("temp dir");
        let script = write_script(dir.path(), "svg-engine", "cat > /dev/null\nprintf '<svg/>'");
        let engine = CommandEngine::new(script, Vec::new());

        let result = engine
            .render(&json!({}), options(OutputFormat::Svg))
            .await
            .expect("render");
        assert_eq!(result.content_type, "image/svg+xml");
    }

    #[tokio::test]
    async fn non_zero_exit_reports_stderr() {
        let dir = TempDir::new().expect("temp dir");
        let script = write_script(
            dir.path(),
            "broken-engine",
            "cat > /dev/null\necho 'unknown chart type' >&2\nexit 3",
        );
        let engine = CommandEngine::new(script, Vec::new());

        let err = engine
            .render(&json!({"type": "nope"}), options(OutputFormat::Png))
            .await
            .expect_err("engine fails");
        match err {
            EngineError::Failed { exit_code, stderr } => {
                assert_eq!(exit_code, Some(3));
                assert_eq!(stderr, "unknown chart type");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn rejected_exit_code_reports_unrenderable_spec() {
        let dir = TempDir::new().expect("temp dir");
        let script = write_script(
            dir.path(),
            "picky-engine",
            "cat > /dev/null\necho 'unsupported chart type: nope' >&2\nexit 2",
        );
        let engine = CommandEngine::new(script, Vec::new());

        let err = engine
            .render(&json!({"type": "nope"}), options(OutputFormat::Png))
            .await
            .expect_err("spec rejected");
        match err {
            EngineError::Rejected(message) => {
                assert_eq!(message, "unsupported chart type: nope");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn empty_stdout_is_an_error() {
        let dir = TempDir::new().expect("temp dir");
        let script = write_script(dir.path(), "silent-engine", "cat > /dev/null");
        let engine = CommandEngine::new(script, Vec::new());

        let err = engine
            .render(&json!({}), options(OutputFormat::Png))
            .await
            .expect_err("no output");
        assert!(matches!(err, EngineError::EmptyOutput));
    }

    #[tokio::test]
    async fn missing_program_is_unavailable() {
        let engine = CommandEngine::new("/nonexistent/chartd-engine", Vec::new());
        let err = engine
            .render(&json!({}), options(OutputFormat::Png))
            .await
            .expect_err("missing program");
        assert!(matches!(err, EngineError::Unavailable(_)));
    }
}
