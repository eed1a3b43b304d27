//! Markdown file-drop delivery.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Local, Utc};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use super::{DeliveryReceipt, DeliverySink};
use crate::config::QueueConfig;
use crate::error::SinkError;
use crate::time::{format_display, format_timestamp};
use crate::types::{QueueItem, TerminalAction};

/// Writes each delivered prompt to its own Markdown file.
///
/// Files land in `output_directory` (resolved against the workspace when
/// relative). Names come from a template where `{timestamp}` is the local
/// delivery time as `YYYYMMDD_HHMM` and `{id}` is the item id. An existing
/// file is never overwritten: `_2`, `_3`, ... is inserted before the
/// extension until a free name is found.
///
/// ## Examples
///
/// ```no_run
/// use prompt_queue_lib::{DeliverySink, FileDropSink, QueueItem};
///
/// # async fn example() {
/// let sink = FileDropSink::new("/home/me/project".into(), ".prompt-queue", "{timestamp}_{id}.md");
/// let item = QueueItem::after_hours("continue", 0.0, "");
/// let receipt = sink.deliver(&item).await.unwrap();
/// println!("wrote {receipt}");
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct FileDropSink {
    workspace: PathBuf,
    output_directory: PathBuf,
    filename_template: String,
    terminal_action: TerminalAction,
}

impl FileDropSink {
    /// Creates a sink rooted at `workspace`.
    pub fn new(
        workspace: PathBuf,
        output_directory: impl Into<PathBuf>,
        filename_template: impl Into<String>,
    ) -> Self {
        Self {
            workspace,
            output_directory: output_directory.into(),
            filename_template: filename_template.into(),
            terminal_action: TerminalAction::MarkProcessed,
        }
    }

    /// Creates a sink from the file-drop settings of `config`.
    pub fn from_config(config: &QueueConfig, workspace: PathBuf) -> Self {
        Self::new(
            workspace,
            config.output_directory.as_str(),
            config.filename_template.as_str(),
        )
    }

    /// Overrides what happens to an item after it is written.
    #[must_use]
    pub fn with_terminal_action(mut self, action: TerminalAction) -> Self {
        self.terminal_action = action;
        self
    }

    /// The resolved output directory.
    pub fn output_dir(&self) -> PathBuf {
        if self.output_directory.is_absolute() {
            self.output_directory.clone()
        } else {
            self.workspace.join(&self.output_directory)
        }
    }

    /// Renders the base file name for `item` delivered at `at`.
    pub fn file_name(&self, item: &QueueItem, at: &DateTime<Local>) -> String {
        self.filename_template
            .replace("{timestamp}", &format_timestamp(at))
            .replace("{id}", &item.id)
    }

    async fn write_new(dir: &Path, base: &str, content: &str) -> Result<PathBuf, SinkError> {
        let mut attempt = 1;
        loop {
            let path = dir.join(numbered_name(base, attempt));
            let opened = OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await;

            match opened {
                Ok(mut file) => {
                    let written = async {
                        file.write_all(content.as_bytes()).await?;
                        file.flush().await
                    }
                    .await;
                    drop(file);
                    return settle_write(path, written).await;
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    debug!(path = %path.display(), "file exists, trying next suffix");
                    attempt += 1;
                }
                Err(source) => return Err(SinkError::Write { path, source }),
            }
        }
    }
}

/// Keeps a fully written file, or deletes the partial one so that a retry
/// does not leave a truncated copy behind.
async fn settle_write(path: PathBuf, written: std::io::Result<()>) -> Result<PathBuf, SinkError> {
    match written {
        Ok(()) => Ok(path),
        Err(source) => {
            if let Err(e) = tokio::fs::remove_file(&path).await {
                warn!(path = %path.display(), error = %e, "failed to remove partial prompt file");
            }
            Err(SinkError::Write { path, source })
        }
    }
}

impl DeliverySink for FileDropSink {
    fn name(&self) -> &'static str {
        "file-drop"
    }

    fn terminal_action(&self) -> TerminalAction {
        self.terminal_action
    }

    async fn deliver(&self, item: &QueueItem) -> Result<DeliveryReceipt, SinkError> {
        let dir = self.output_dir();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|source| SinkError::CreateDir {
                path: dir.clone(),
                source,
            })?;

        let now = Local::now();
        let base = self.file_name(item, &now);
        let content = render_document(item, now.with_timezone(&Utc));
        let path = Self::write_new(&dir, &base, &content).await?;

        Ok(DeliveryReceipt::File(path))
    }
}

/// Inserts `_n` before the extension for every attempt after the first.
fn numbered_name(base: &str, attempt: u32) -> String {
    if attempt <= 1 {
        return base.to_string();
    }
    match base.rfind('.') {
        Some(dot) if dot > 0 => format!("{}_{attempt}{}", &base[..dot], &base[dot..]),
        _ => format!("{base}_{attempt}"),
    }
}

/// Markdown document for a delivered item: metadata header, then the prompt.
fn render_document(item: &QueueItem, delivered_at: DateTime<Utc>) -> String {
    let local = |at: DateTime<Utc>| format_display(&at.with_timezone(&Local));
    let mut doc = format!(
        "<!--\nid: {}\ncreated: {}\nnot before: {}\ndelivered: {}\n-->\n\n",
        item.id,
        local(item.created_at),
        local(item.not_before),
        local(delivered_at),
    );
    doc.push_str(&item.prompt_text);
    if !doc.ends_with('\n') {
        doc.push('\n');
    }
    doc
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn item(prompt: &str) -> QueueItem {
        QueueItem::new(prompt, Utc::now(), "")
    }

    #[tokio::test]
    async fn failed_write_removes_partial_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("partial.md");
        std::fs::write(&path, "truncated").unwrap();

        let err = settle_write(path.clone(), Err(std::io::Error::other("disk full")))
            .await
            .unwrap_err();

        assert!(matches!(err, SinkError::Write { path: ref p, .. } if *p == path));
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn successful_write_keeps_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("done.md");
        std::fs::write(&path, "prompt").unwrap();

        assert_eq!(settle_write(path.clone(), Ok(())).await.unwrap(), path);
        assert!(path.exists());
    }

    #[test]
    fn numbered_name_inserts_before_extension() {
        assert_eq!(numbered_name("a.md", 1), "a.md");
        assert_eq!(numbered_name("a.md", 2), "a_2.md");
        assert_eq!(numbered_name("a.b.md", 3), "a.b_3.md");
        assert_eq!(numbered_name("noext", 2), "noext_2");
        assert_eq!(numbered_name(".hidden", 2), ".hidden_2");
    }

    #[test]
    fn file_name_substitutes_tokens() {
        let sink = FileDropSink::new(PathBuf::from("/ws"), ".q", "{timestamp}_{id}.md");
        let mut it = item("x");
        it.id = "abc12345".to_string();
        let at = Local.with_ymd_and_hms(2025, 4, 2, 9, 7, 0).unwrap();
        assert_eq!(sink.file_name(&it, &at), "20250402_0907_abc12345.md");
    }

    #[test]
    fn output_dir_resolution() {
        let relative = FileDropSink::new(PathBuf::from("/ws"), ".q", "{id}.md");
        assert_eq!(relative.output_dir(), PathBuf::from("/ws/.q"));

        let absolute = FileDropSink::new(PathBuf::from("/ws"), "/var/drops", "{id}.md");
        assert_eq!(absolute.output_dir(), PathBuf::from("/var/drops"));
    }

    #[test]
    fn document_has_header_and_trailing_newline() {
        let it = item("do the thing");
        let doc = render_document(&it, Utc::now());
        assert!(doc.starts_with("<!--\nid: "));
        assert!(doc.contains(&format!("id: {}\n", it.id)));
        assert!(doc.contains("not before: "));
        assert!(doc.contains("delivered: "));
        assert!(doc.ends_with("-->\n\ndo the thing\n"));

        let doc = render_document(&item("already\n"), Utc::now());
        assert!(doc.ends_with("already\n"));
        assert!(!doc.ends_with("\n\n"));
    }

    #[tokio::test]
    async fn deliver_creates_nested_directory_and_file() {
        let dir = TempDir::new().unwrap();
        let sink = FileDropSink::new(dir.path().to_path_buf(), "a/b/c", "{id}.md");
        let it = item("hello");

        let receipt = sink.deliver(&it).await.unwrap();
        let expected = dir.path().join("a/b/c").join(format!("{}.md", it.id));
        assert_eq!(receipt, DeliveryReceipt::File(expected.clone()));

        let content = std::fs::read_to_string(expected).unwrap();
        assert!(content.ends_with("hello\n"));
    }

    #[tokio::test]
    async fn deliver_never_overwrites() {
        let dir = TempDir::new().unwrap();
        let sink = FileDropSink::new(dir.path().to_path_buf(), "out", "{id}.md");
        let it = item("second");
        let out = dir.path().join("out");
        std::fs::create_dir_all(&out).unwrap();
        std::fs::write(out.join(format!("{}.md", it.id)), "first").unwrap();
        std::fs::write(out.join(format!("{}_2.md", it.id)), "first").unwrap();

        let receipt = sink.deliver(&it).await.unwrap();
        let expected = out.join(format!("{}_3.md", it.id));
        assert_eq!(receipt, DeliveryReceipt::File(expected.clone()));
        assert_eq!(std::fs::read_to_string(out.join(format!("{}.md", it.id))).unwrap(), "first");
        assert!(std::fs::read_to_string(expected).unwrap().ends_with("second\n"));
    }

    #[tokio::test]
    async fn deliver_reports_directory_failure() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "not a dir").unwrap();
        let sink = FileDropSink::new(dir.path().to_path_buf(), "blocker/sub", "{id}.md");

        let err = sink.deliver(&item("x")).await.unwrap_err();
        assert!(matches!(err, SinkError::CreateDir { .. }));
    }

    #[test]
    fn terminal_action_is_configurable() {
        let sink = FileDropSink::new(PathBuf::from("/ws"), ".q", "{id}.md");
        assert_eq!(sink.terminal_action(), TerminalAction::MarkProcessed);
        let sink = sink.with_terminal_action(TerminalAction::Remove);
        assert_eq!(sink.terminal_action(), TerminalAction::Remove);
    }
}
