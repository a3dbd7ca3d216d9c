//! Passphrase entry over a pseudo-terminal.
//!
//! The encryption tool only accepts a passphrase from an interactive
//! terminal, so it runs on the subordinate side of a PTY and the secret is
//! typed into the controlling side. The secret never appears in argv, the
//! environment, a pipe, or any log; the terminal transcript is discarded
//! unread.
//!
//! ```text
//! openpty ─▶ spawn(tool, slave) ─▶ drop slave
//!   └─ for each prompt: settle ─▶ write "<secret>\n"
//!        └─ poll exit until deadline ─▶ kill + reap on expiry
//!             └─ success = exit 0 && output exists
//! ```

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use portable_pty::{native_pty_system, Child, CommandBuilder, PtySize};
use zeroize::Zeroizing;

use sealbox_core::config::SealConfig;
use sealbox_core::process::tool_name;
use sealbox_core::types::CommandMode;
use sealbox_core::{SealError, SealResult};
use sealbox_secrets::{secure_delete, Passphrase};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone)]
pub struct SecretInjector {
    tool: PathBuf,
    settle: Duration,
    timeout: Duration,
}

impl SecretInjector {
    pub fn new(config: &SealConfig) -> Self {
        Self {
            tool: config.tools.age.clone(),
            settle: Duration::from_millis(config.inject.settle_ms),
            timeout: config.timeouts.inject(),
        }
    }

    /// Run the tool in `mode` on `input`, writing `output`, typing `secret`
    /// at each prompt. On any failure the partial output is removed.
    pub async fn run_with_secret(
        &self,
        mode: CommandMode,
        input: &Path,
        output: &Path,
        secret: &Passphrase,
    ) -> SealResult<()> {
        let line = secret.to_line();
        let this = self.clone();
        let input_owned = input.to_path_buf();
        let output_owned = output.to_path_buf();

        let result = tokio::task::spawn_blocking(move || {
            this.drive(mode, &input_owned, &output_owned, &line)
        })
        .await
        .map_err(|e| SealError::Other(anyhow::anyhow!("injector task failed: {e}")))
        .and_then(|r| r);

        match &result {
            Ok(()) => tracing::debug!(?mode, output = %output.display(), "tool finished"),
            Err(e) => {
                tracing::warn!(?mode, input = %input.display(), "tool run failed: {e}");
                if output.exists() {
                    secure_delete(output);
                }
            }
        }
        result
    }

    fn drive(&self, mode: CommandMode, input: &Path, output: &Path, line: &Zeroizing<Vec<u8>>) -> SealResult<()> {
        let name = tool_name(&self.tool);
        let pair = native_pty_system().openpty(PtySize {
            rows: 24,
            cols: 80,
            pixel_width: 0,
            pixel_height: 0,
        })?;

        let mut cmd = CommandBuilder::new(&self.tool);
        cmd.arg(mode.flag());
        cmd.arg("-o");
        cmd.arg(output);
        cmd.arg(input);
        cmd.cwd(output.parent().unwrap_or_else(|| Path::new("/")));

        let mut child = pair.slave.spawn_command(cmd).map_err(|e| {
            tracing::debug!(tool = %name, "spawn failed: {e}");
            SealError::ToolUnavailable(name.clone())
        })?;
        // Only the child may hold the subordinate side, or EOF never arrives
        drop(pair.slave);

        let mut reader = pair.master.try_clone_reader()?;
        std::thread::spawn(move || {
            let _ = std::io::copy(&mut reader, &mut std::io::sink());
        });
        let mut writer = pair.master.take_writer()?;

        let deadline = Instant::now() + self.timeout;
        let fed = (0..mode.prompt_count()).try_for_each(|_| {
            std::thread::sleep(self.settle);
            writer.write_all(line)?;
            writer.flush()
        });
        if let Err(e) = fed {
            // A tool that already exited is judged by its status below
            if child.try_wait()?.is_none() {
                terminate(child.as_mut());
                return Err(e.into());
            }
        }

        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if Instant::now() >= deadline {
                terminate(child.as_mut());
                tracing::error!(tool = %name, secs = self.timeout.as_secs(), "tool timed out");
                return Err(SealError::timeout(name, self.timeout));
            }
            std::thread::sleep(POLL_INTERVAL);
        };
        drop(writer);

        if !status.success() {
            return Err(SealError::Subprocess {
                tool: name,
                code: status.exit_code().to_string(),
            });
        }
        if !output.exists() {
            return Err(SealError::Subprocess {
                tool: name,
                code: "0, no output written".into(),
            });
        }
        Ok(())
    }
}

fn terminate(child: &mut dyn Child) {
    if let Err(e) = child.kill() {
        tracing::debug!("kill after failure: {e}");
    }
    let _ = child.wait();
}
