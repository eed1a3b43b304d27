use std::path::PathBuf;

use chrono::{DateTime, Duration as ChronoDuration, Local, NaiveTime, Utc};
use clap::{Args, Parser, Subcommand, ValueEnum};
use prompt_queue_lib::time::{checked_add_hours, format_display};
use prompt_queue_lib::{
    ConfigError, JsonFileKv, QueueConfig, QueueError, QueueItem, QueueProcessor, QueueStore,
    Sink, SinkKind, StoreError, TICK_INTERVAL, next_occurrence_at, parse_at_time, parse_delay,
    parse_rate_limit_message, parse_rate_limit_message_at,
};
use thiserror::Error;
use tracing::{info, warn};

/// Defer prompts until a rate limit resets, then deliver them.
///
/// Examples:
///   prompt-queue add "continue the refactor" --in 2h30m
///   prompt-queue add "finish the tests" --from-error "Try again in 4h 30m."
///   prompt-queue list
///   prompt-queue run
#[derive(Debug, Parser)]
#[command(name = "prompt-queue")]
#[command(version)]
#[command(about = "Defer prompts until a rate limit resets, then deliver them")]
struct Cli {
    /// Configuration file (default: ~/.config/prompt-queue/config.toml).
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Queue state file (default: ~/.prompt-queue-state.json).
    #[arg(long, global = true, value_name = "PATH")]
    state: Option<PathBuf>,

    /// Workspace that relative output directories resolve against (default: current directory).
    #[arg(long, global = true, value_name = "DIR")]
    workspace: Option<PathBuf>,

    /// Delivery strategy, overriding the configuration file.
    #[arg(long, global = true, value_enum)]
    sink: Option<SinkArg>,

    /// Log deliveries and processor activity to stderr.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Enable debug logging to ~/.prompt-queue-debug.log.
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Queue a prompt for later delivery.
    Add(AddArgs),

    /// Show when a rate-limit message says to retry.
    Parse {
        /// The rate-limit message.
        text: String,
    },

    /// List queued prompts.
    List {
        /// Include delivered prompts.
        #[arg(long)]
        all: bool,
    },

    /// Remove a queued prompt.
    Remove {
        /// Item id.
        id: String,
    },

    /// Remove every delivered prompt.
    Purge,

    /// Remove every prompt.
    Clear,

    /// Deliver every due prompt now.
    Process,

    /// Deliver one pending prompt now, even if it is not due.
    Deliver {
        /// Item id.
        id: String,
    },

    /// Keep delivering due prompts until interrupted.
    Run,
}

#[derive(Debug, Args)]
struct AddArgs {
    /// The prompt to defer.
    prompt: String,

    /// Deliver at the next occurrence of a time.
    #[arg(long, value_parser = parse_at_time, value_name = "TIME", conflicts_with_all = ["in_delay", "from_error"])]
    at: Option<NaiveTime>,

    /// Deliver after a delay (e.g., 15m, 2h30m).
    #[arg(long = "in", value_parser = parse_delay, value_name = "DELAY", conflicts_with = "from_error")]
    in_delay: Option<ChronoDuration>,

    /// Derive the delay from a rate-limit error message.
    #[arg(long, value_name = "TEXT")]
    from_error: Option<String>,

    /// Routing context: a working directory, or `session:<id>` for a specific session.
    #[arg(long, value_name = "CONTEXT", default_value = "")]
    origin: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum SinkArg {
    /// Write each prompt to a Markdown file.
    FileDrop,
    /// Type each prompt into a live terminal session.
    Session,
}

impl From<SinkArg> for SinkKind {
    fn from(value: SinkArg) -> Self {
        match value {
            SinkArg::FileDrop => SinkKind::FileDrop,
            SinkArg::Session => SinkKind::Session,
        }
    }
}

#[derive(Debug, Error)]
enum CliError {
    #[error("failed to start runtime: {0}")]
    Runtime(std::io::Error),

    #[error("debug log error: {0}")]
    DebugLog(std::io::Error),

    #[error("failed to resolve workspace: {0}")]
    Workspace(std::io::Error),

    #[error("failed to listen for Ctrl-C: {0}")]
    Signal(std::io::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error("prompt must not be empty")]
    EmptyPrompt,

    #[error("could not resolve {0} to a local time")]
    Schedule(NaiveTime),

    #[error("no queued item with id {0}")]
    UnknownId(String),

    #[error("delivery time is too far in the future")]
    OutOfRange,
}

fn main() -> Result<(), CliError> {
    let cli = Cli::parse();

    init_logging(&cli)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(CliError::Runtime)?;

    runtime.block_on(run(cli))
}

/// Installs the tracing subscriber.
///
/// `--debug` writes everything at debug level to ~/.prompt-queue-debug.log.
/// Otherwise warnings (or info with `--verbose`) go to stderr.
fn init_logging(cli: &Cli) -> Result<(), CliError> {
    use std::fs::OpenOptions;
    use tracing_subscriber::EnvFilter;

    if cli.debug {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        let log_path = home.join(".prompt-queue-debug.log");

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .map_err(CliError::DebugLog)?;

        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::new("debug"))
            .with_writer(file)
            .with_ansi(false)
            .init();
        return Ok(());
    }

    let filter = if cli.verbose {
        EnvFilter::new("info")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    Ok(())
}

/// Loads the configuration named on the command line, or the default one.
fn load_config(cli: &Cli) -> Result<QueueConfig, CliError> {
    let mut config = match &cli.config {
        Some(path) => QueueConfig::load(path)?,
        None => QueueConfig::load_or_default()?,
    };
    if let Some(sink) = cli.sink {
        config.sink = sink.into();
    }
    Ok(config)
}

fn open_store(cli: &Cli) -> QueueStore<JsonFileKv> {
    let backend = cli
        .state
        .clone()
        .map_or_else(JsonFileKv::default_path, JsonFileKv::new);
    QueueStore::new(backend)
}

fn workspace(cli: &Cli) -> Result<PathBuf, CliError> {
    match &cli.workspace {
        Some(dir) => Ok(dir.clone()),
        None => std::env::current_dir().map_err(CliError::Workspace),
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let config = load_config(&cli)?;
    let store = open_store(&cli);

    match &cli.command {
        Commands::Add(args) => {
            let (item, note) = build_item(args, &config, Local::now())?;
            store.add(item.clone()).await?;
            if let Some(note) = note {
                eprintln!("warning: {note}");
            }
            println!(
                "Queued {} for {} ({})",
                item.id,
                format_display(&item.not_before.with_timezone(&Local)),
                format_relative(item.not_before - Utc::now()),
            );
        }
        Commands::Parse { text } => match parse_rate_limit_message(text) {
            Some(info) => {
                println!("delay:      {:.1}h", info.delay_hours);
                if let Some(reset_at) = info.reset_at {
                    println!(
                        "reset at:   {}",
                        format_display(&reset_at.with_timezone(&Local))
                    );
                }
                println!("confidence: {}", info.confidence.as_str());
                println!("matched:    {}", info.raw_match);
            }
            None => println!("No reset time found."),
        },
        Commands::List { all } => {
            let items = if *all {
                store.get_all().await?
            } else {
                store.get_pending().await?
            };
            if items.is_empty() {
                println!("Queue is empty.");
            }
            let now = Utc::now();
            for item in &items {
                println!("{}", list_line(item, now));
            }
        }
        Commands::Remove { id } => {
            if store.get(id).await?.is_none() {
                return Err(CliError::UnknownId(id.clone()));
            }
            store.remove(id).await?;
            println!("Removed {id}");
        }
        Commands::Purge => {
            let before = store.len().await?;
            store.purge_processed().await?;
            let removed = before.saturating_sub(store.len().await?);
            println!("Purged {removed} delivered item(s)");
        }
        Commands::Clear => {
            let removed = store.len().await?;
            store.clear().await?;
            println!("Cleared {removed} item(s)");
        }
        Commands::Process => {
            let processor = processor(&cli, &config, store)?;
            let report = processor.process_report().await?;
            for id in &report.delivered {
                println!("Delivered {id}");
            }
            for (id, reason) in &report.failed {
                eprintln!("Failed {id}: {reason}");
            }
            println!(
                "{} delivered, {} failed",
                report.delivered.len(),
                report.failed.len()
            );
        }
        Commands::Deliver { id } => {
            let processor = processor(&cli, &config, store)?;
            let receipt = processor.force_deliver(id).await?;
            println!("Delivered {id} to {receipt}");
        }
        Commands::Run => {
            let mut processor = processor(&cli, &config, store)?;
            processor.subscribe(|| info!("queue changed"));
            processor.start();
            eprintln!(
                "Delivering due prompts every {}s; press Ctrl-C to stop.",
                TICK_INTERVAL.as_secs()
            );

            let signal = tokio::signal::ctrl_c().await;
            processor.shutdown().await;
            signal.map_err(CliError::Signal)?;
        }
    }

    Ok(())
}

fn processor(
    cli: &Cli,
    config: &QueueConfig,
    store: QueueStore<JsonFileKv>,
) -> Result<QueueProcessor<JsonFileKv, Sink>, CliError> {
    let sink = Sink::from_config(config, workspace(cli)?);
    Ok(QueueProcessor::new(store, sink))
}

/// Builds the item for `add`, returning a warning when the default delay
/// had to stand in for an unparseable rate-limit message.
fn build_item(
    args: &AddArgs,
    config: &QueueConfig,
    now: DateTime<Local>,
) -> Result<(QueueItem, Option<String>), CliError> {
    if args.prompt.trim().is_empty() {
        return Err(CliError::EmptyPrompt);
    }

    let now_utc = now.with_timezone(&Utc);
    let after_hours = |hours: f64| checked_add_hours(now_utc, hours).ok_or(CliError::OutOfRange);
    let default = || after_hours(config.default_delay_hours);
    let mut note = None;

    let not_before = match (&args.at, &args.in_delay, &args.from_error) {
        (Some(time), _, _) => next_occurrence_at(*time, &now).ok_or(CliError::Schedule(*time))?,
        (_, Some(delay), _) => now_utc
            .checked_add_signed(*delay)
            .ok_or(CliError::OutOfRange)?,
        (_, _, Some(text)) => match parse_rate_limit_message_at(text, &now) {
            Some(info) => after_hours(info.delay_hours)?,
            None => {
                warn!("no reset time found in rate-limit message");
                note = Some(format!(
                    "no reset time found; using the default delay of {}h",
                    config.default_delay_hours
                ));
                default()?
            }
        },
        _ => default()?,
    };

    let mut item = QueueItem::new(args.prompt.clone(), not_before, args.origin.clone());
    item.created_at = now_utc;
    Ok((item, note))
}

fn list_line(item: &QueueItem, now: DateTime<Utc>) -> String {
    let status = if item.processed {
        "delivered"
    } else if item.is_due(now) {
        "due"
    } else {
        "pending"
    };
    let first_line = item.prompt_text.lines().next().unwrap_or_default();
    let summary: String = first_line.chars().take(60).collect();
    let ellipsis = if summary.len() < item.prompt_text.trim_end().len() {
        "…"
    } else {
        ""
    };

    format!(
        "{}  {}  {:<9}  {summary}{ellipsis}",
        item.id,
        format_display(&item.not_before.with_timezone(&Local)),
        status,
    )
}

/// Formats a positive delay as `in 4h 35m`; past instants read `now`.
fn format_relative(delta: ChronoDuration) -> String {
    let minutes = (delta.num_seconds() + 59) / 60;
    if minutes <= 0 {
        return "now".to_string();
    }
    let (hours, minutes) = (minutes / 60, minutes % 60);
    match (hours, minutes) {
        (0, m) => format!("in {m}m"),
        (h, 0) => format!("in {h}h"),
        (h, m) => format!("in {h}h {m}m"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).unwrap()
    }

    fn add_args(args: &[&str]) -> AddArgs {
        let mut argv = vec!["prompt-queue", "add"];
        argv.extend_from_slice(args);
        match parse(&argv).command {
            Commands::Add(args) => args,
            other => panic!("expected add, got {other:?}"),
        }
    }

    fn fixed_now() -> DateTime<Local> {
        Local.with_ymd_and_hms(2025, 6, 10, 14, 0, 0).unwrap()
    }

    #[test]
    fn clap_requires_subcommand() {
        assert!(Cli::try_parse_from(["prompt-queue"]).is_err());
    }

    #[test]
    fn clap_accepts_global_flags_after_subcommand() {
        let cli = parse(&["prompt-queue", "list", "--all", "--state", "/tmp/s.json", "--debug"]);
        assert!(cli.debug);
        assert_eq!(cli.state, Some(PathBuf::from("/tmp/s.json")));
        assert!(matches!(cli.command, Commands::List { all: true }));
    }

    #[test]
    fn clap_parses_sink_override() {
        let cli = parse(&["prompt-queue", "--sink", "file-drop", "process"]);
        assert_eq!(cli.sink, Some(SinkArg::FileDrop));
        assert!(Cli::try_parse_from(["prompt-queue", "--sink", "email", "process"]).is_err());
    }

    #[test]
    fn clap_rejects_conflicting_schedule_modes() {
        for args in [
            ["prompt-queue", "add", "x", "--at", "7:00am", "--in", "15m"],
            ["prompt-queue", "add", "x", "--at", "7:00am", "--from-error", "e"],
            ["prompt-queue", "add", "x", "--in", "15m", "--from-error", "e"],
        ] {
            assert!(Cli::try_parse_from(args).is_err(), "{args:?} should conflict");
        }
    }

    #[test]
    fn clap_rejects_invalid_delay() {
        assert!(Cli::try_parse_from(["prompt-queue", "add", "x", "--in", "soon"]).is_err());
    }

    #[test]
    fn build_item_uses_default_delay() {
        let config = QueueConfig::default().with_default_delay_hours(2.5);
        let (item, note) = build_item(&add_args(&["hello"]), &config, fixed_now()).unwrap();
        assert!(note.is_none());
        assert_eq!(item.not_before - item.created_at, ChronoDuration::minutes(150));
        assert_eq!(item.origin_context, "");
    }

    #[test]
    fn build_item_with_delay() {
        let (item, _) =
            build_item(&add_args(&["hello", "--in", "1h30m"]), &QueueConfig::default(), fixed_now())
                .unwrap();
        assert_eq!(item.not_before - item.created_at, ChronoDuration::minutes(90));
    }

    #[test]
    fn build_item_with_clock_time_rolls_forward() {
        let now = fixed_now();
        let (item, _) =
            build_item(&add_args(&["hello", "--at", "9:00am"]), &QueueConfig::default(), now)
                .unwrap();
        let expected = Local.with_ymd_and_hms(2025, 6, 11, 9, 0, 0).unwrap();
        assert_eq!(item.not_before, expected.with_timezone(&Utc));
    }

    #[test]
    fn build_item_from_error_message() {
        let args = add_args(&["hello", "--from-error", "Please retry after 45 minutes."]);
        let (item, note) = build_item(&args, &QueueConfig::default(), fixed_now()).unwrap();
        assert!(note.is_none());
        assert_eq!(item.not_before - item.created_at, ChronoDuration::minutes(48));
    }

    #[test]
    fn build_item_from_unparseable_error_falls_back() {
        let args = add_args(&["hello", "--from-error", "Everything is fine."]);
        let (item, note) = build_item(&args, &QueueConfig::default(), fixed_now()).unwrap();
        assert!(note.unwrap().contains("default delay of 5h"));
        assert_eq!(item.not_before - item.created_at, ChronoDuration::hours(5));
    }

    #[test]
    fn build_item_rejects_delay_past_calendar_range() {
        let args = add_args(&["hello", "--in", "99999999999d"]);
        let err = build_item(&args, &QueueConfig::default(), fixed_now()).unwrap_err();
        assert!(matches!(err, CliError::OutOfRange));
    }

    #[test]
    fn clap_rejects_overflowing_compound_delay() {
        let args = ["prompt-queue", "add", "x", "--in", "99999999999d99999999999d"];
        assert!(Cli::try_parse_from(args).is_err());
    }

    #[test]
    fn build_item_from_huge_error_delay_falls_back() {
        let args = add_args(&["hello", "--from-error", "Try again in 99999999999 hours"]);
        let (item, note) = build_item(&args, &QueueConfig::default(), fixed_now()).unwrap();
        assert!(note.is_some());
        assert_eq!(item.not_before - item.created_at, ChronoDuration::hours(5));
    }

    #[test]
    fn build_item_rejects_blank_prompt() {
        let err = build_item(&add_args(&["  "]), &QueueConfig::default(), fixed_now()).unwrap_err();
        assert!(matches!(err, CliError::EmptyPrompt));
    }

    #[test]
    fn build_item_keeps_origin() {
        let args = add_args(&["hello", "--origin", "session:4"]);
        let (item, _) = build_item(&args, &QueueConfig::default(), fixed_now()).unwrap();
        assert_eq!(item.session_hint(), Some("4"));
    }

    #[test]
    fn format_relative_rounds_up_to_minutes() {
        assert_eq!(format_relative(ChronoDuration::seconds(-5)), "now");
        assert_eq!(format_relative(ChronoDuration::seconds(30)), "in 1m");
        assert_eq!(format_relative(ChronoDuration::hours(2)), "in 2h");
        assert_eq!(format_relative(ChronoDuration::minutes(275)), "in 4h 35m");
    }

    #[test]
    fn list_line_shows_status() {
        let now = Utc::now();
        let mut item = QueueItem::new("first line\nsecond", now - ChronoDuration::minutes(1), "");
        assert!(list_line(&item, now).contains("due"));
        assert!(list_line(&item, now).ends_with("first line…"));

        item.processed = true;
        assert!(list_line(&item, now).contains("delivered"));

        let later = QueueItem::new("short", now + ChronoDuration::hours(1), "");
        let line = list_line(&later, now);
        assert!(line.contains("pending"));
        assert!(line.ends_with("short"));
    }
}
