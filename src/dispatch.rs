use std::ffi::OsString;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use cassa_print_job::QueueName;
use getset::Getters;
use once_cell::sync::OnceCell;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, warn};

pub const DEFAULT_PRINT_BINARY: &str = "lp";
pub const DEFAULT_DISPATCH_TIMEOUT: Duration = Duration::from_secs(30);
/// `last_error` of a job handed back because the print command is missing.
pub const TOOL_UNAVAILABLE_REASON: &str = "dispatch tool unavailable";

/// Local failures that kept a payload from reaching the printer.
///
/// A print command that ran and exited non-zero is not an error, it is a
/// [`DispatchResult`] with `success == false`.
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Could not write the payload to a temporary file: {0}")]
    TempFile(#[source] std::io::Error),
    #[error("Could not run the print command: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("Print command is not available on this host")]
    ToolUnavailable,
}

/// What the print command said about one payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchResult {
    pub success: bool,
    /// `None` when the command was killed
    pub exit_code: Option<i32>,
    /// stdout followed by stderr
    pub raw_output: String,
}

impl DispatchResult {
    /// Text stored as `last_error` when this result is a failure.
    pub fn failure_message(&self) -> String {
        if !self.raw_output.is_empty() {
            return self.raw_output.clone();
        }
        match self.exit_code {
            Some(code) => format!("print command exited with status {code}"),
            None => "print command was terminated".to_string(),
        }
    }
}

/// Argument vector for printing `file` on `queue`. Each element reaches the OS untouched.
pub fn command_args(binary: &Path, queue: &QueueName, file: &Path) -> Vec<OsString> {
    vec![
        binary.as_os_str().to_owned(),
        OsString::from("-d"),
        OsString::from(queue.as_str()),
        file.as_os_str().to_owned(),
    ]
}

/// Sends payloads to CUPS-style printer queues through an `lp` compatible command.
#[derive(Debug, Getters)]
pub struct DispatchClient {
    #[getset(get = "pub")]
    binary: PathBuf,
    #[getset(get = "pub")]
    timeout: Duration,
    available: OnceCell<bool>,
}

impl Default for DispatchClient {
    fn default() -> Self {
        Self::new(DEFAULT_PRINT_BINARY, DEFAULT_DISPATCH_TIMEOUT)
    }
}

impl DispatchClient {
    pub fn new(binary: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
            available: OnceCell::new(),
        }
    }

    /// Whether the print command can be found. Resolved once per client.
    pub fn is_available(&self) -> bool {
        *self.available.get_or_init(|| {
            let resolved = resolve_binary(&self.binary);
            match &resolved {
                Some(path) => debug!(binary = %path.display(), "Print command resolved"),
                None => warn!(binary = %self.binary.display(), "Print command not found"),
            }
            resolved.is_some()
        })
    }

    /// Prints `payload` on `queue`.
    ///
    /// The payload goes through a temporary file that is removed when this
    /// returns, whatever the outcome.
    #[tracing::instrument(skip(self, payload), fields(queue = %queue, payload_len = payload.len()))]
    pub async fn send(
        &self,
        queue: &QueueName,
        payload: &str,
    ) -> Result<DispatchResult, DispatchError> {
        if !self.is_available() {
            return Err(DispatchError::ToolUnavailable);
        }

        let mut file = tempfile::Builder::new()
            .prefix("comanda_")
            .suffix(".txt")
            .tempfile()
            .map_err(DispatchError::TempFile)?;
        file.write_all(payload.as_bytes())
            .and_then(|_| file.flush())
            .map_err(DispatchError::TempFile)?;

        let args = command_args(&self.binary, queue, file.path());
        let child = Command::new(&args[0])
            .args(&args[1..])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(DispatchError::Spawn)?;

        let result = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(output) => {
                let output = output.map_err(DispatchError::Spawn)?;
                let mut raw_output = String::from_utf8_lossy(&output.stdout).into_owned();
                raw_output.push_str(&String::from_utf8_lossy(&output.stderr));

                DispatchResult {
                    success: output.status.success(),
                    exit_code: output.status.code(),
                    raw_output: raw_output.trim().to_string(),
                }
            }
            Err(_) => DispatchResult {
                success: false,
                exit_code: None,
                raw_output: format!(
                    "print command timed out after {} ms",
                    self.timeout.as_millis()
                ),
            },
        };

        debug!(
            success = result.success,
            exit_code = ?result.exit_code,
            "Print command finished"
        );
        drop(file);

        Ok(result)
    }
}

fn resolve_binary(binary: &Path) -> Option<PathBuf> {
    if binary.components().count() > 1 {
        return is_executable(binary).then(|| binary.to_path_buf());
    }

    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var)
        .map(|dir| dir.join(binary))
        .find(|candidate| is_executable(candidate))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;

    std::fs::metadata(path)
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}
