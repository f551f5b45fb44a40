//! Control-tool invocation.
//!
//! Kernel MACsec state is driven by shelling out to `ip`. Commands are
//! built as single strings (see [`crate::macsec::commands`]) so they can be
//! logged verbatim, which means every interpolated name must pass through
//! [`shellquote`] first.
//!
//! The [`CommandExecutor`] trait is the seam between provisioning logic and
//! the process table: [`ShellExecutor`] runs commands through `/bin/sh -c`,
//! tests substitute a simulated tool.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::process::Stdio;
use tokio::process::Command;

use crate::error::{MacsecError, MacsecResult};

/// Default path to the `ip` command.
pub const IP_CMD: &str = "/sbin/ip";

/// Shell used to interpret command strings.
const SHELL: &str = "/bin/sh";

/// Characters that keep their meaning inside double quotes: $ ` " \ and newline.
static SHELL_ESCAPE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"([$`"\\\n])"#).expect("Invalid regex pattern"));

/// Quotes a string for safe interpolation into a shell command line.
///
/// The result is wrapped in double quotes with `$`, `` ` ``, `"`, `\` and
/// newline backslash-escaped, so the shell sees exactly one literal word.
///
/// # Example
///
/// ```
/// use sonic_vs_macsec::shell::shellquote;
///
/// assert_eq!(shellquote("macsec0"), "\"macsec0\"");
/// assert_eq!(shellquote("a\"$b"), "\"a\\\"\\$b\"");
/// ```
pub fn shellquote(s: &str) -> String {
    let escaped = SHELL_ESCAPE_RE.replace_all(s, r"\$1");
    format!("\"{}\"", escaped)
}

/// Outcome of one control-tool invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecResult {
    /// Process exit code; -1 when terminated by a signal.
    pub exit_code: i32,
    /// Captured stdout, untrimmed so line-oriented parsers see the layout.
    pub stdout: String,
    /// Captured stderr, trimmed.
    pub stderr: String,
}

impl ExecResult {
    /// Successful result carrying `stdout`.
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// Failed result with the given exit code and stderr.
    pub fn failed(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    /// Returns true if the command exited with status 0.
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Combined output for error messages.
    pub fn combined_output(&self) -> String {
        let stdout = self.stdout.trim();
        match (stdout.is_empty(), self.stderr.is_empty()) {
            (_, true) => stdout.to_string(),
            (true, false) => self.stderr.clone(),
            (false, false) => format!("{}\n{}", stdout, self.stderr),
        }
    }

    /// Converts a non-zero exit into [`MacsecError::ShellCommandFailed`].
    pub fn into_stdout(self, command: &str) -> MacsecResult<String> {
        if self.success() {
            Ok(self.stdout)
        } else {
            Err(MacsecError::ShellCommandFailed {
                command: command.to_string(),
                exit_code: self.exit_code,
                output: self.combined_output(),
            })
        }
    }
}

/// Runs control-tool command lines.
///
/// `exec` only fails when the command could not be run at all; a non-zero
/// exit is reported through [`ExecResult::exit_code`].
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Runs `cmd` to completion and captures its output.
    async fn exec(&self, cmd: &str) -> MacsecResult<ExecResult>;

    /// Runs `cmd` and returns stdout, failing on non-zero exit.
    async fn exec_or_throw(&self, cmd: &str) -> MacsecResult<String> {
        self.exec(cmd).await?.into_stdout(cmd)
    }
}

/// Executes commands through `/bin/sh -c`.
#[derive(Debug, Clone, Default)]
pub struct ShellExecutor;

impl ShellExecutor {
    /// Creates a shell executor.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CommandExecutor for ShellExecutor {
    async fn exec(&self, cmd: &str) -> MacsecResult<ExecResult> {
        // The command line may carry key material, so it is not logged here;
        // callers log a redacted form.
        let output = Command::new(SHELL)
            .arg("-c")
            .arg(cmd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| MacsecError::ShellExec {
                command: cmd.to_string(),
                source: e,
            })?;

        let result = ExecResult {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        };

        if !result.success() {
            tracing::debug!(
                exit_code = result.exit_code,
                stderr = %result.stderr,
                "Command failed"
            );
        }

        Ok(result)
    }
}
