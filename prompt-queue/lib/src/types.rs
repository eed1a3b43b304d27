//! Core data types for the prompt queue.

use chrono::{DateTime, Utc};
use rand::Rng;
use rand::distributions::Alphanumeric;
use serde::{Deserialize, Serialize};

use crate::time::{add_hours, is_overdue};

/// Length of generated item identifiers.
///
/// Eight base-36 characters give roughly 41 bits of entropy.
pub const ID_LENGTH: usize = 8;

/// Prefix marking an `origin_context` as a session routing hint.
pub const SESSION_HINT_PREFIX: &str = "session:";

/// What happens to an item after a sink delivers it successfully.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalAction {
    /// Keep the item and flag it as processed.
    #[default]
    MarkProcessed,
    /// Delete the item from the store.
    Remove,
}

/// A prompt deferred until `not_before`.
///
/// Items are persisted as JSON with camelCase keys and RFC 3339 timestamps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueItem {
    /// Short random identifier, unique within the store.
    pub id: String,
    /// When the item was enqueued.
    pub created_at: DateTime<Utc>,
    /// Delivery must not happen before this instant.
    pub not_before: DateTime<Utc>,
    /// The deferred prompt.
    pub prompt_text: String,
    /// Routing information for the sink; empty means no preference.
    #[serde(default)]
    pub origin_context: String,
    /// Set once a mark-and-keep sink has delivered the item.
    #[serde(default)]
    pub processed: bool,
}

impl QueueItem {
    /// Creates a new pending item with a fresh id.
    ///
    /// ## Examples
    ///
    /// ```
    /// use chrono::{Duration, Utc};
    /// use prompt_queue_lib::QueueItem;
    ///
    /// let item = QueueItem::new("continue the refactor", Utc::now() + Duration::hours(5), "");
    /// assert_eq!(item.id.len(), 8);
    /// assert!(!item.processed);
    /// ```
    pub fn new(
        prompt_text: impl Into<String>,
        not_before: DateTime<Utc>,
        origin_context: impl Into<String>,
    ) -> Self {
        Self {
            id: generate_id(),
            created_at: Utc::now(),
            not_before,
            prompt_text: prompt_text.into(),
            origin_context: origin_context.into(),
            processed: false,
        }
    }

    /// Creates a new pending item due `hours` from now.
    pub fn after_hours(
        prompt_text: impl Into<String>,
        hours: f64,
        origin_context: impl Into<String>,
    ) -> Self {
        let mut item = Self::new(prompt_text, Utc::now(), origin_context);
        item.not_before = add_hours(item.created_at, hours);
        item
    }

    /// Returns true if `not_before` has been reached at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        is_overdue(self.not_before, now)
    }

    /// Returns true if the item has not been delivered yet.
    pub fn is_pending(&self) -> bool {
        !self.processed
    }

    /// The session hint carried in `origin_context`, if any.
    pub fn session_hint(&self) -> Option<&str> {
        self.origin_context
            .strip_prefix(SESSION_HINT_PREFIX)
            .map(str::trim)
            .filter(|hint| !hint.is_empty())
    }

    /// The working directory carried in `origin_context`, if any.
    pub fn working_dir(&self) -> Option<&str> {
        let origin = self.origin_context.trim();
        if origin.is_empty() || origin.starts_with(SESSION_HINT_PREFIX) {
            None
        } else {
            Some(origin)
        }
    }
}

/// Generates a random lowercase base-36 identifier.
pub fn generate_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(ID_LENGTH)
        .map(|byte| char::from(byte).to_ascii_lowercase())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use std::collections::HashSet;

    #[test]
    fn queue_item_serializes_with_camel_case_keys() {
        let item = QueueItem::new("hello", Utc::now(), "/tmp/ws");
        let json = serde_json::to_value(&item).unwrap();

        for key in ["id", "createdAt", "notBefore", "promptText", "originContext", "processed"] {
            assert!(json.get(key).is_some(), "missing key {key}");
        }
        assert!(json["notBefore"].as_str().unwrap().contains('T'));
    }

    #[test]
    fn queue_item_round_trips_through_json() {
        let item = QueueItem::new("multi\nline prompt", Utc::now() + Duration::hours(2), "session:7");
        let json = serde_json::to_string(&item).unwrap();
        let restored: QueueItem = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, item);
    }

    #[test]
    fn missing_optional_fields_default() {
        let json = r#"{"id":"abc","createdAt":"2025-01-01T00:00:00Z","notBefore":"2025-01-01T05:00:00Z","promptText":"x"}"#;
        let item: QueueItem = serde_json::from_str(json).unwrap();
        assert_eq!(item.origin_context, "");
        assert!(!item.processed);
    }

    #[test]
    fn generated_ids_are_short_and_distinct() {
        let ids: HashSet<String> = (0..1000).map(|_| generate_id()).collect();
        assert_eq!(ids.len(), 1000);
        for id in &ids {
            assert_eq!(id.len(), ID_LENGTH);
            assert!(id.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
        }
    }

    #[test]
    fn after_hours_offsets_from_creation() {
        let item = QueueItem::after_hours("later", 1.5, "");
        assert_eq!(item.not_before - item.created_at, Duration::minutes(90));
        assert!(item.not_before >= item.created_at);
    }

    #[test]
    fn is_due_is_inclusive() {
        let item = QueueItem::new("now", Utc::now(), "");
        assert!(item.is_due(item.not_before));
        assert!(!item.is_due(item.not_before - Duration::seconds(1)));
    }

    #[test]
    fn origin_context_routing() {
        let hinted = QueueItem::new("x", Utc::now(), "session: 12 ");
        assert_eq!(hinted.session_hint(), Some("12"));
        assert_eq!(hinted.working_dir(), None);

        let dir = QueueItem::new("x", Utc::now(), "/home/me/project");
        assert_eq!(dir.session_hint(), None);
        assert_eq!(dir.working_dir(), Some("/home/me/project"));

        let none = QueueItem::new("x", Utc::now(), "");
        assert_eq!(none.session_hint(), None);
        assert_eq!(none.working_dir(), None);
    }
}
