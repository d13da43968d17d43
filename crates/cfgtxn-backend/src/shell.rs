//! Shell command execution for adapters that drive external CLIs.
//!
//! ```ignore
//! use cfgtxn_backend::shell::{self, shellquote, KUBECTL_CMD};
//!
//! let cmd = format!("{} -n {} get configmap {} -o json",
//!     KUBECTL_CMD, shellquote("default"), shellquote("dataplane-config"));
//! let json = shell::exec_or_throw(&cmd).await?;
//! ```

use once_cell::sync::Lazy;
use regex::Regex;
use std::process::Stdio;
use tokio::process::Command;

use crate::error::{BackendError, BackendResult};

/// Default path to the `kubectl` binary.
pub const KUBECTL_CMD: &str = "/usr/local/bin/kubectl";

/// Characters that need escaping inside shell double quotes:
/// `$`, `` ` ``, `"`, `\` and newline.
static SHELL_ESCAPE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"([$`"\\\n])"#).expect("Invalid regex pattern"));

/// Wraps `s` in double quotes, escaping characters the shell would expand.
///
/// ```
/// use cfgtxn_backend::shell::shellquote;
///
/// assert_eq!(shellquote("simple"), "\"simple\"");
/// assert_eq!(shellquote("with$var"), "\"with\\$var\"");
/// assert_eq!(shellquote("{\"a\":1}"), "\"{\\\"a\\\":1}\"");
/// ```
pub fn shellquote(s: &str) -> String {
    let escaped = SHELL_ESCAPE_RE.replace_all(s, r"\$1");
    format!("\"{}\"", escaped)
}

/// Result of a shell command execution.
#[derive(Debug, Clone)]
pub struct ExecResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// stdout and stderr joined, for error messages.
    pub fn combined_output(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else if self.stdout.is_empty() {
            self.stderr.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }
}

/// Runs `cmd` through `/bin/sh -c`.
///
/// Only spawn failures are errors; a non-zero exit is reported in the
/// returned [`ExecResult`].
pub async fn exec(cmd: &str) -> BackendResult<ExecResult> {
    tracing::debug!(command = %cmd, "Executing shell command");

    let output = Command::new("/bin/sh")
        .arg("-c")
        .arg(cmd)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| BackendError::ShellExec {
            command: cmd.to_string(),
            source: e,
        })?;

    let result = ExecResult {
        exit_code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    };

    if !result.success() {
        tracing::warn!(
            command = %cmd,
            exit_code = result.exit_code,
            stderr = %result.stderr,
            "Command failed"
        );
    }

    Ok(result)
}

/// Runs `cmd` and returns stdout, failing on a non-zero exit.
pub async fn exec_or_throw(cmd: &str) -> BackendResult<String> {
    let result = exec(cmd).await?;
    if result.success() {
        Ok(result.stdout)
    } else {
        Err(BackendError::ShellCommandFailed {
            command: cmd.to_string(),
            exit_code: result.exit_code,
            output: result.combined_output(),
        })
    }
}
