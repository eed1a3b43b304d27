//! Live-session injection.
//!
//! Finds an open interactive session and types the prompt into it, or starts
//! a new session running the configured program with the prompt as its
//! argument.

use std::future::Future;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{LazyLock, Mutex};

use regex::Regex;
use tracing::{debug, info};

use super::{DeliveryReceipt, DeliverySink};
use crate::config::SessionConfig;
use crate::error::SinkError;
use crate::types::{QueueItem, TerminalAction};

/// CSI, OSC and two-byte escape sequences.
static ESCAPE_SEQUENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\x1b(?:\[[0-?]*[ -/]*[@-~]|\][^\x07\x1b]*(?:\x07|\x1b\\)|[@-Z\\-_])")
        .expect("escape sequence regex")
});

/// An open session as reported by the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    /// Host identifier used to address the session.
    pub id: String,
    /// Human-readable title.
    pub title: String,
    /// Whether the session currently has focus.
    pub is_active: bool,
}

/// The terminal host that owns interactive sessions.
pub trait SessionHost: Send + Sync {
    /// Lists open sessions.
    fn list_sessions(&self) -> impl Future<Output = Result<Vec<SessionInfo>, SinkError>> + Send;

    /// Pastes `text` into a session without submitting it.
    fn send_text(
        &self,
        session_id: &str,
        text: &str,
    ) -> impl Future<Output = Result<(), SinkError>> + Send;

    /// Submits the pending input of a session.
    fn submit(&self, session_id: &str) -> impl Future<Output = Result<(), SinkError>> + Send;

    /// Starts a new session in `cwd` running `argv`, returning its id.
    fn spawn(
        &self,
        cwd: &Path,
        argv: &[String],
    ) -> impl Future<Output = Result<String, SinkError>> + Send;
}

/// Delivers prompts into a live session of a [`SessionHost`].
///
/// The destination is chosen in this order:
///
/// 1. the session named by the routing hint (the item's `session:` origin,
///    otherwise the session used for the previous delivery)
/// 2. a session titled exactly like the configured default name
/// 3. a session whose title contains the configured pattern
/// 4. the focused session
///
/// With no candidate, a new session is started in the item's working
/// directory. Delivered items are removed from the queue.
pub struct SessionSink<H> {
    host: H,
    config: SessionConfig,
    workspace: PathBuf,
    last_session: Mutex<Option<String>>,
}

impl<H: SessionHost> SessionSink<H> {
    /// Creates a sink that starts new sessions in `workspace` unless an item
    /// carries its own working directory.
    pub fn new(host: H, config: SessionConfig, workspace: PathBuf) -> Self {
        Self {
            host,
            config,
            workspace,
            last_session: Mutex::new(None),
        }
    }

    /// The stored routing hint, if a delivery has succeeded before.
    pub fn routing_hint(&self) -> Option<String> {
        self.last_session
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// Replaces the stored routing hint.
    pub fn set_routing_hint(&self, hint: Option<String>) {
        *self
            .last_session
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = hint;
    }

    /// Picks the destination session for `item` among `sessions`.
    pub fn select<'a>(&self, item: &QueueItem, sessions: &'a [SessionInfo]) -> Option<&'a SessionInfo> {
        let stored = self.routing_hint();
        let hint = item.session_hint().or(stored.as_deref());

        let by_hint = hint.and_then(|hint| {
            sessions
                .iter()
                .find(|s| s.id == hint || s.title == hint)
        });
        let by_name = || {
            sessions
                .iter()
                .find(|s| s.title.eq_ignore_ascii_case(&self.config.default_name))
        };
        let by_pattern = || {
            let pattern = self.config.name_pattern.to_lowercase();
            if pattern.is_empty() {
                return None;
            }
            sessions
                .iter()
                .find(|s| s.title.to_lowercase().contains(&pattern))
        };
        let focused = || sessions.iter().find(|s| s.is_active);

        by_hint.or_else(by_name).or_else(by_pattern).or_else(focused)
    }

    fn working_dir(&self, item: &QueueItem) -> PathBuf {
        item.working_dir()
            .map_or_else(|| self.workspace.clone(), PathBuf::from)
    }

    async fn spawn_with_prompt(&self, item: &QueueItem, prompt: &str) -> Result<String, SinkError> {
        let staged = stage_prompt(prompt)?;
        let argv = spawn_argv(&self.config, &staged);
        let cwd = self.working_dir(item);

        match self.host.spawn(&cwd, &argv).await {
            Ok(id) => Ok(id),
            Err(e) => {
                let _ = std::fs::remove_file(&staged);
                Err(e)
            }
        }
    }
}

impl<H: SessionHost> DeliverySink for SessionSink<H> {
    fn name(&self) -> &'static str {
        "session"
    }

    fn terminal_action(&self) -> TerminalAction {
        TerminalAction::Remove
    }

    async fn deliver(&self, item: &QueueItem) -> Result<DeliveryReceipt, SinkError> {
        let prompt = sanitize_prompt(&item.prompt_text);
        if prompt.trim().is_empty() {
            return Err(SinkError::EmptyPrompt);
        }

        let sessions = self.host.list_sessions().await?;
        let target = self.select(item, &sessions).map(|s| s.id.clone());

        let receipt = match target {
            Some(session_id) => {
                debug!(id = %item.id, session = %session_id, "injecting prompt");
                self.host.send_text(&session_id, &prompt).await?;
                self.host.submit(&session_id).await?;
                self.set_routing_hint(Some(session_id.clone()));
                DeliveryReceipt::Injected { session_id }
            }
            None => {
                let session_id = self.spawn_with_prompt(item, &prompt).await?;
                info!(id = %item.id, session = %session_id, "started new session");
                self.set_routing_hint(Some(session_id.clone()));
                DeliveryReceipt::Spawned { session_id }
            }
        };

        Ok(receipt)
    }
}

/// Removes escape sequences and control characters from prompt text.
///
/// Newlines and tabs are kept; carriage returns become newlines so that the
/// destination does not read them as an early submit.
///
/// ## Examples
///
/// ```
/// use prompt_queue_lib::sanitize_prompt;
///
/// assert_eq!(sanitize_prompt("\x1b[31mred\x1b[0m\r\nnext\x07"), "red\nnext");
/// ```
pub fn sanitize_prompt(text: &str) -> String {
    let stripped = ESCAPE_SEQUENCE.replace_all(text, "");
    stripped
        .replace("\r\n", "\n")
        .replace('\r', "\n")
        .chars()
        .filter(|&ch| ch == '\n' || ch == '\t' || !ch.is_control())
        .collect()
}

/// Writes the prompt to a temporary file that outlives this process.
///
/// The spawned shell deletes it after reading.
fn stage_prompt(prompt: &str) -> Result<PathBuf, SinkError> {
    let mut file = tempfile::Builder::new()
        .prefix("prompt-queue-")
        .suffix(".md")
        .tempfile()
        .map_err(SinkError::Staging)?;
    file.write_all(prompt.as_bytes()).map_err(SinkError::Staging)?;
    file.flush().map_err(SinkError::Staging)?;
    file.into_temp_path()
        .keep()
        .map_err(|e| SinkError::Staging(e.error))
}

/// Command line that runs the configured program with the staged prompt.
///
/// The prompt reaches the program through `$(cat "$1")` so its content is
/// never parsed by the shell.
fn spawn_argv(config: &SessionConfig, staged: &Path) -> Vec<String> {
    let mut program = shell_quote(&config.program);
    for arg in &config.program_args {
        program.push(' ');
        program.push_str(&shell_quote(arg));
    }
    let script = format!(r#"{program} "$(cat "$1")"; rm -f "$1""#);

    vec![
        "/bin/sh".to_string(),
        "-c".to_string(),
        script,
        "sh".to_string(),
        staged.display().to_string(),
    ]
}

fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}
