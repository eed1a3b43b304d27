//! Engine configuration.
//!
//! Configuration is read from a TOML file. Every field is optional; missing
//! fields take the defaults below.
//!
//! ```toml
//! default_delay_hours = 5.0
//! output_directory = ".prompt-queue"
//! filename_template = "{timestamp}_{id}.md"
//! sink = "file_drop"
//!
//! [session]
//! default_name = "prompt-queue"
//! name_pattern = "claude"
//! program = "claude"
//! program_args = []
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Interval between processor ticks.
pub const TICK_INTERVAL: Duration = Duration::from_secs(60);

/// Default delay applied when no schedule can be derived.
pub const DEFAULT_DELAY_HOURS: f64 = 5.0;

/// Default workspace-relative output directory of the file-drop sink.
pub const DEFAULT_OUTPUT_DIRECTORY: &str = ".prompt-queue";

/// Default file name template of the file-drop sink.
pub const DEFAULT_FILENAME_TEMPLATE: &str = "{timestamp}_{id}.md";

/// Which delivery strategy the processor uses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkKind {
    /// Write each prompt to a Markdown file.
    #[default]
    FileDrop,
    /// Inject each prompt into a live terminal session.
    Session,
}

/// Settings for the live-session sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Session title that is preferred over pattern matches.
    pub default_name: String,
    /// Case-insensitive substring matched against session titles.
    pub name_pattern: String,
    /// Program started in a new session when none is open.
    pub program: String,
    /// Extra arguments passed to `program` before the prompt.
    pub program_args: Vec<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            default_name: "prompt-queue".to_string(),
            name_pattern: "claude".to_string(),
            program: "claude".to_string(),
            program_args: Vec::new(),
        }
    }
}

/// Configuration consumed by the delivery engine.
///
/// ## Examples
///
/// ```
/// use prompt_queue_lib::{QueueConfig, SinkKind};
///
/// let config = QueueConfig::from_toml_str("sink = \"session\"").unwrap();
/// assert_eq!(config.sink, SinkKind::Session);
/// assert_eq!(config.default_delay_hours, 5.0);
///
/// let config = QueueConfig::default().with_output_directory("drops");
/// assert_eq!(config.output_directory, "drops");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Delay used when the user gives no schedule or parsing fails.
    pub default_delay_hours: f64,
    /// Directory of the file-drop sink, relative to the workspace.
    pub output_directory: String,
    /// File name template; `{timestamp}` and `{id}` are substituted.
    pub filename_template: String,
    /// Active delivery strategy.
    pub sink: SinkKind,
    /// Live-session sink settings.
    pub session: SessionConfig,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            default_delay_hours: DEFAULT_DELAY_HOURS,
            output_directory: DEFAULT_OUTPUT_DIRECTORY.to_string(),
            filename_template: DEFAULT_FILENAME_TEMPLATE.to_string(),
            sink: SinkKind::default(),
            session: SessionConfig::default(),
        }
    }
}

impl QueueConfig {
    /// Default configuration file location (`~/.config/prompt-queue/config.toml`).
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".config").join("prompt-queue").join("config.toml"))
    }

    /// Loads configuration from `path`.
    ///
    /// ## Errors
    ///
    /// Returns an error if the file cannot be read, is not valid TOML, or
    /// holds an out-of-range value.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Loads configuration from the default path, or the defaults if no file
    /// exists there.
    ///
    /// ## Errors
    ///
    /// Returns an error if an existing file cannot be read or is invalid.
    pub fn load_or_default() -> Result<Self, ConfigError> {
        match Self::default_path() {
            Some(path) if path.exists() => Self::load(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Parses and validates configuration from TOML text.
    ///
    /// ## Errors
    ///
    /// Returns an error if the text is not valid TOML or a value is out of
    /// range.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks value ranges.
    ///
    /// ## Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.default_delay_hours.is_finite() || self.default_delay_hours <= 0.0 {
            return Err(ConfigError::Invalid {
                field: "default_delay_hours",
                message: format!("must be a positive number, got {}", self.default_delay_hours),
            });
        }

        if self.output_directory.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "output_directory",
                message: "must not be empty".to_string(),
            });
        }

        if !self.filename_template.contains("{id}") {
            return Err(ConfigError::Invalid {
                field: "filename_template",
                message: "must contain the {id} token".to_string(),
            });
        }

        if self.filename_template.contains(['/', '\\']) {
            return Err(ConfigError::Invalid {
                field: "filename_template",
                message: "must not contain path separators".to_string(),
            });
        }

        Ok(())
    }

    /// Sets the default delay.
    #[must_use]
    pub fn with_default_delay_hours(mut self, hours: f64) -> Self {
        self.default_delay_hours = hours;
        self
    }

    /// Sets the file-drop output directory.
    #[must_use]
    pub fn with_output_directory(mut self, dir: impl Into<String>) -> Self {
        self.output_directory = dir.into();
        self
    }

    /// Sets the file name template.
    #[must_use]
    pub fn with_filename_template(mut self, template: impl Into<String>) -> Self {
        self.filename_template = template.into();
        self
    }

    /// Selects the delivery strategy.
    #[must_use]
    pub fn with_sink(mut self, sink: SinkKind) -> Self {
        self.sink = sink;
        self
    }
}
