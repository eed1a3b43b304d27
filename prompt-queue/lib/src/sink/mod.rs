//! Delivery sinks.
//!
//! A sink takes one due [`QueueItem`] and makes its prompt available to the
//! user. Two strategies ship with the library:
//!
//! - [`FileDropSink`] writes a Markdown file into a workspace-relative
//!   directory and keeps the item as processed.
//! - [`SessionSink`] injects the prompt into a running terminal session (or
//!   starts one) and removes the item.
//!
//! The processor is generic over [`DeliverySink`]; [`Sink`] picks a strategy
//! at runtime from [`QueueConfig`].

mod file_drop;
mod session;
pub mod wezterm;

use std::future::Future;
use std::path::PathBuf;

pub use file_drop::FileDropSink;
pub use session::{SessionHost, SessionInfo, SessionSink, sanitize_prompt};
pub use wezterm::WezTermHost;

use crate::config::{QueueConfig, SinkKind};
use crate::error::SinkError;
use crate::types::{QueueItem, TerminalAction};

/// Where a delivered prompt ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryReceipt {
    /// The prompt was written to this file.
    File(PathBuf),
    /// The prompt was typed into an existing session.
    Injected {
        /// Host identifier of the session.
        session_id: String,
    },
    /// A new session was started with the prompt.
    Spawned {
        /// Host identifier of the new session.
        session_id: String,
    },
}

impl std::fmt::Display for DeliveryReceipt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::File(path) => write!(f, "{}", path.display()),
            Self::Injected { session_id } => write!(f, "session {session_id}"),
            Self::Spawned { session_id } => write!(f, "new session {session_id}"),
        }
    }
}

/// A strategy for handing a due item to the user.
pub trait DeliverySink: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// What the processor does with an item after a successful delivery.
    fn terminal_action(&self) -> TerminalAction;

    /// Delivers one item.
    ///
    /// ## Errors
    ///
    /// Returns an error describing why the prompt could not be delivered. The
    /// item stays pending and is retried on the next tick.
    fn deliver(
        &self,
        item: &QueueItem,
    ) -> impl Future<Output = Result<DeliveryReceipt, SinkError>> + Send;
}

/// Runtime-selected delivery strategy.
pub enum Sink {
    /// Markdown file drop.
    FileDrop(FileDropSink),
    /// Live terminal session injection through WezTerm.
    Session(SessionSink<WezTermHost>),
}

impl Sink {
    /// Builds the sink selected by `config`.
    ///
    /// Relative output directories and new sessions are rooted at
    /// `workspace`.
    pub fn from_config(config: &QueueConfig, workspace: PathBuf) -> Self {
        match config.sink {
            SinkKind::FileDrop => Self::FileDrop(FileDropSink::from_config(config, workspace)),
            SinkKind::Session => Self::Session(SessionSink::new(
                WezTermHost::new(),
                config.session.clone(),
                workspace,
            )),
        }
    }
}

impl DeliverySink for Sink {
    fn name(&self) -> &'static str {
        match self {
            Self::FileDrop(sink) => sink.name(),
            Self::Session(sink) => sink.name(),
        }
    }

    fn terminal_action(&self) -> TerminalAction {
        match self {
            Self::FileDrop(sink) => sink.terminal_action(),
            Self::Session(sink) => sink.terminal_action(),
        }
    }

    async fn deliver(&self, item: &QueueItem) -> Result<DeliveryReceipt, SinkError> {
        match self {
            Self::FileDrop(sink) => sink.deliver(item).await,
            Self::Session(sink) => sink.deliver(item).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_config_selects_strategy() {
        let workspace = PathBuf::from("/tmp/ws");

        let sink = Sink::from_config(&QueueConfig::default(), workspace.clone());
        assert_eq!(sink.name(), "file-drop");
        assert_eq!(sink.terminal_action(), TerminalAction::MarkProcessed);

        let config = QueueConfig::default().with_sink(SinkKind::Session);
        let sink = Sink::from_config(&config, workspace);
        assert_eq!(sink.name(), "session");
        assert_eq!(sink.terminal_action(), TerminalAction::Remove);
    }

    #[test]
    fn receipt_display() {
        assert_eq!(
            DeliveryReceipt::Injected { session_id: "3".into() }.to_string(),
            "session 3"
        );
        assert_eq!(
            DeliveryReceipt::File(PathBuf::from("/a/b.md")).to_string(),
            "/a/b.md"
        );
    }
}
