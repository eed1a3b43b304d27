//! Delayed prompt delivery.
//!
//! This library lets a producer defer a prompt until a future time, and works
//! out that time from free-form rate-limit messages. A timer-driven processor
//! delivers each prompt once it is due, through a replaceable sink.
//!
//! ## Core Types
//!
//! - [`QueueItem`] - A deferred prompt with its `not_before` time
//! - [`TerminalAction`] - What happens to an item after delivery
//! - [`QueueConfig`] - Delay, file-drop and session settings
//!
//! ## Persistence
//!
//! - [`KeyValueStore`] - Host-supplied get/set capability
//! - [`MemoryKv`] - In-memory backend
//! - [`JsonFileKv`] - JSON file backend with file locking
//! - [`QueueStore`] - Ordered, serialized queue on top of a backend
//!
//! ## Delivery
//!
//! - [`DeliverySink`] - Strategy trait for handing out a due prompt
//! - [`FileDropSink`] - Writes a Markdown file per prompt
//! - [`SessionSink`] - Types the prompt into a live terminal session
//! - [`QueueProcessor`] - Periodic scheduler driving a sink
//!
//! ## Parsing Utilities
//!
//! - [`parse_rate_limit_message`] - Recover a delay from a rate-limit message
//! - [`parse_at_time`] - Parse time strings like "7:00am" or "19:30"
//! - [`parse_delay`] - Parse delay strings like "15m" or "2h30m"
//! - [`time`] - Formatting and interval helpers

pub mod config;
mod error;
mod parse;
pub mod processor;
pub mod rate_limit;
pub mod sink;
pub mod store;
pub mod time;
mod types;

pub use config::{QueueConfig, SessionConfig, SinkKind, TICK_INTERVAL};
pub use error::{ConfigError, QueueError, SinkError, StoreError};
pub use parse::{next_occurrence, next_occurrence_at, parse_at_time, parse_delay};
pub use processor::{DeliveryReport, ListenerId, QueueProcessor};
pub use rate_limit::{
    Confidence, RateLimitInfo, SAFETY_BUFFER_HOURS, parse_rate_limit_delay,
    parse_rate_limit_message, parse_rate_limit_message_at,
};
pub use sink::{
    DeliveryReceipt, DeliverySink, FileDropSink, SessionHost, SessionInfo, SessionSink, Sink,
    WezTermHost, sanitize_prompt,
};
pub use store::{DEFAULT_QUEUE_KEY, JsonFileKv, KeyValueStore, MemoryKv, QueueStore};
pub use time::is_overdue;
pub use types::{ID_LENGTH, QueueItem, SESSION_HINT_PREFIX, TerminalAction, generate_id};
