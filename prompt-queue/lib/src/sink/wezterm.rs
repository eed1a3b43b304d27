//! WezTerm session host.
//!
//! Drives panes through `wezterm cli`. Every command is bounded by
//! [`HOST_COMMAND_TIMEOUT`] and killed if it overruns.

use std::env;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use super::session::{SessionHost, SessionInfo};
use crate::error::SinkError;

/// Upper bound for a single `wezterm cli` invocation.
pub const HOST_COMMAND_TIMEOUT: Duration = Duration::from_secs(10);

/// A pane entry of `wezterm cli list --format json`.
#[derive(Debug, Deserialize)]
struct PaneEntry {
    pane_id: u64,
    #[serde(default)]
    title: String,
    #[serde(default)]
    tab_title: String,
    #[serde(default)]
    is_active: bool,
}

/// [`SessionHost`] backed by the `wezterm` CLI.
#[derive(Debug, Clone)]
pub struct WezTermHost {
    binary: String,
    timeout: Duration,
}

impl Default for WezTermHost {
    fn default() -> Self {
        Self::new()
    }
}

impl WezTermHost {
    /// Uses `wezterm` from `PATH`.
    pub fn new() -> Self {
        Self {
            binary: "wezterm".to_string(),
            timeout: HOST_COMMAND_TIMEOUT,
        }
    }

    /// Uses a different executable.
    #[must_use]
    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    /// Overrides the per-command timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Pane the current process runs in, if started inside WezTerm.
    pub fn current_pane() -> Option<String> {
        env::var("WEZTERM_PANE").ok().filter(|id| !id.is_empty())
    }

    async fn run(&self, args: &[&str], stdin: Option<&str>) -> Result<String, SinkError> {
        let command = args.first().copied().unwrap_or_default().to_string();
        let host_error = |message: String| SinkError::Host {
            command: command.clone(),
            message,
        };

        let mut child = Command::new(&self.binary)
            .arg("cli")
            .args(args)
            .stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| host_error(format!("failed to run {}: {e}", self.binary)))?;

        let io = async move {
            if let (Some(text), Some(mut pipe)) = (stdin, child.stdin.take()) {
                pipe.write_all(text.as_bytes()).await?;
                pipe.shutdown().await?;
            }
            child.wait_with_output().await
        };

        let output = tokio::time::timeout(self.timeout, io)
            .await
            .map_err(|_| SinkError::Timeout {
                command: command.clone(),
                seconds: self.timeout.as_secs(),
            })?
            .map_err(|e| host_error(e.to_string()))?;

        if !output.status.success() {
            return Err(host_error(format!(
                "exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

impl SessionHost for WezTermHost {
    async fn list_sessions(&self) -> Result<Vec<SessionInfo>, SinkError> {
        let json = self.run(&["list", "--format", "json"], None).await?;
        parse_pane_list(&json, Self::current_pane().as_deref())
    }

    async fn send_text(&self, session_id: &str, text: &str) -> Result<(), SinkError> {
        self.run(&["send-text", "--pane-id", session_id], Some(text))
            .await
            .map(drop)
    }

    async fn submit(&self, session_id: &str) -> Result<(), SinkError> {
        self.run(&["send-text", "--pane-id", session_id, "--no-paste", "\r"], None)
            .await
            .map(drop)
    }

    async fn spawn(&self, cwd: &Path, argv: &[String]) -> Result<String, SinkError> {
        let cwd = cwd.display().to_string();
        let mut args = vec!["spawn", "--cwd", cwd.as_str(), "--"];
        args.extend(argv.iter().map(String::as_str));

        let pane_id = self.run(&args, None).await?;
        if pane_id.is_empty() {
            return Err(SinkError::Host {
                command: "spawn".to_string(),
                message: "wezterm did not return a pane id".to_string(),
            });
        }
        Ok(pane_id)
    }
}

/// Converts `wezterm cli list` output into sessions.
///
/// When `focused` names a pane, only that pane counts as active; otherwise
/// WezTerm's own `is_active` flag is used. The tab title wins over the pane
/// title when set.
fn parse_pane_list(json: &str, focused: Option<&str>) -> Result<Vec<SessionInfo>, SinkError> {
    let panes: Vec<PaneEntry> = serde_json::from_str(json).map_err(|e| SinkError::Host {
        command: "list".to_string(),
        message: format!("unexpected output: {e}"),
    })?;

    Ok(panes
        .into_iter()
        .map(|pane| {
            let id = pane.pane_id.to_string();
            let is_active = focused.map_or(pane.is_active, |focused| focused == id);
            let title = if pane.tab_title.is_empty() {
                pane.title
            } else {
                pane.tab_title
            };
            SessionInfo { id, title, is_active }
        })
        .collect())
}
