//! Bounded subprocess execution.
//!
//! Every external program the engine drives (archiver, sanitizer, token
//! tool, probes) goes through [`run_tool`]: stdin is closed, output is
//! captured, and the wait is capped. On expiry the child is killed and
//! reaped before the timeout error propagates.

use std::ffi::OsStr;
use std::io::ErrorKind;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;

use crate::error::{truncate_chars, SealError, SealResult};

/// Captured result of a finished tool run
#[derive(Debug)]
pub struct ToolOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl ToolOutput {
    pub fn code(&self) -> Option<i32> {
        self.status.code()
    }

    pub fn success(&self) -> bool {
        self.status.success()
    }

    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }

    /// Turn a non-zero exit into `SealError::Subprocess`, logging stderr locally.
    pub fn ensure_success(self, tool: &str) -> SealResult<Self> {
        if self.success() {
            return Ok(self);
        }
        let code = exit_label(&self.status);
        tracing::warn!(
            tool,
            code = %code,
            stderr = %truncate_chars(self.stderr_lossy().trim(), 500),
            "tool exited with failure"
        );
        Err(SealError::Subprocess {
            tool: tool.to_string(),
            code,
        })
    }
}

/// Exit code as text, or the terminating signal when there is none.
pub fn exit_label(status: &ExitStatus) -> String {
    if let Some(code) = status.code() {
        return code.to_string();
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return format!("signal {signal}");
        }
    }
    "unknown".into()
}

/// Short display name of a program path, used in errors and log fields.
pub fn tool_name(program: &Path) -> String {
    program
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| program.display().to_string())
}

/// Run `program args..` to completion with a bounded wait.
///
/// A missing program maps to `ToolUnavailable`; exceeding `limit` kills the
/// child, waits for it, and maps to `Timeout`. Exit status is not inspected.
pub async fn run_tool<I, S>(program: &Path, args: I, limit: Duration) -> SealResult<ToolOutput>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let name = tool_name(program);

    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| match e.kind() {
            ErrorKind::NotFound | ErrorKind::PermissionDenied => {
                SealError::ToolUnavailable(name.clone())
            }
            _ => SealError::Io(e),
        })?;

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let finished = tokio::time::timeout(limit, async {
        let (status, out, err) = tokio::join!(child.wait(), drain(stdout), drain(stderr));
        Ok::<_, std::io::Error>((status?, out?, err?))
    })
    .await;

    match finished {
        Ok(Ok((status, stdout, stderr))) => Ok(ToolOutput {
            status,
            stdout,
            stderr,
        }),
        Ok(Err(e)) => Err(SealError::Io(e)),
        Err(_) => {
            // kill() also waits, so no zombie is left behind
            if let Err(e) = child.kill().await {
                tracing::warn!(tool = %name, "failed to kill timed-out child: {e}");
            }
            tracing::error!(tool = %name, secs = limit.as_secs(), "tool timed out");
            Err(SealError::timeout(name, limit))
        }
    }
}

/// Availability probe: `program --version` exits zero within `limit`.
pub async fn probe(program: &Path, limit: Duration) -> bool {
    match run_tool(program, ["--version"], limit).await {
        Ok(out) => out.success(),
        Err(e) => {
            tracing::debug!(tool = %tool_name(program), "probe failed: {e}");
            false
        }
    }
}

async fn drain<R: AsyncRead + Unpin>(stream: Option<R>) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    if let Some(mut stream) = stream {
        stream.read_to_end(&mut buf).await?;
    }
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[tokio::test]
    async fn test_run_tool_captures_output() {
        let out = run_tool(Path::new("sh"), ["-c", "echo hello; echo oops >&2"], Duration::from_secs(5))
            .await
            .unwrap();
        assert!(out.success());
        assert_eq!(out.stdout_lossy().trim(), "hello");
        assert_eq!(out.stderr_lossy().trim(), "oops");
    }

    #[tokio::test]
    async fn test_run_tool_missing_program() {
        let err = run_tool(
            &PathBuf::from("/nonexistent/sealbox-no-such-tool"),
            ["--version"],
            Duration::from_secs(1),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, SealError::ToolUnavailable(_)));
    }

    #[tokio::test]
    async fn test_run_tool_timeout_kills_child() {
        let started = std::time::Instant::now();
        let err = run_tool(Path::new("sleep"), ["30"], Duration::from_millis(200))
            .await
            .unwrap_err();
        assert!(matches!(err, SealError::Timeout { .. }));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_ensure_success_maps_exit_code() {
        let out = run_tool(Path::new("sh"), ["-c", "exit 3"], Duration::from_secs(5))
            .await
            .unwrap();
        match out.ensure_success("sh") {
            Err(SealError::Subprocess { tool, code }) => {
                assert_eq!(tool, "sh");
                assert_eq!(code, "3");
            }
            other => panic!("expected subprocess error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_probe() {
        assert!(!probe(Path::new("/nonexistent/sealbox-probe"), Duration::from_secs(1)).await);
    }
}
