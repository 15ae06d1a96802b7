//! Process-wide tracing setup.
//!
//! The server writes one log file per process start into the log directory and
//! prunes old ones; interactive commands log to stderr only.

use crate::config::LoggingConfig;
use crate::constants::env as env_vars;
use crate::errors::ConfigError;
use chrono::{DateTime, Local, NaiveDateTime, TimeZone};
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::str::FromStr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Mutex;
use tracing::{Event, Subscriber};
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::time::FormatTime;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

const FILE_PREFIX: &str = "pulsar_";
const FILE_SUFFIX: &str = ".log";
const FILE_STAMP: &str = "%Y%m%dT%H%M%S";
const LATEST_LINK: &str = "pulsar.log";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Error = 0,
    Warn = 1,
    Info = 2,
    Debug = 3,
    Trace = 4,
}

impl LogLevel {
    fn directive(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

/// Verbosity counts saturate at `Trace`.
impl From<u8> for LogLevel {
    fn from(val: u8) -> Self {
        [
            LogLevel::Error,
            LogLevel::Warn,
            LogLevel::Info,
            LogLevel::Debug,
        ]
        .get(usize::from(val))
        .copied()
        .unwrap_or(LogLevel::Trace)
    }
}

impl FromStr for LogLevel {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "error" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            other => Err(ConfigError::General(format!(
                "unknown log level '{}'",
                other
            ))),
        }
    }
}

static LEVEL: AtomicU8 = AtomicU8::new(LogLevel::Info as u8);

pub fn set_log_level(level: LogLevel) {
    LEVEL.store(level as u8, Ordering::Relaxed);
}

/// Applies `PULSAR_LOG_LEVEL` when it names a level; anything else is ignored.
pub fn set_log_level_from_env() {
    let parsed = std::env::var(env_vars::LOG_LEVEL)
        .ok()
        .and_then(|value| value.parse::<LogLevel>().ok());
    if let Some(level) = parsed {
        set_log_level(level);
    }
}

fn current_level() -> LogLevel {
    LogLevel::from(LEVEL.load(Ordering::Relaxed))
}

/// `RUST_LOG` wins over the configured level.
fn level_filter() -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(current_level().directive()))
}

struct Clock;

impl FormatTime for Clock {
    fn format_time(&self, w: &mut Writer<'_>) -> fmt::Result {
        write!(w, "{}", Local::now().format("%Y-%m-%d %H:%M:%S%.3f"))
    }
}

/// `2026-01-02 10:00:00.123 INFO  pulsar_manager::stateful:88 message`
struct LineFormat;

impl<S, N> FormatEvent<S, N> for LineFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let meta = event.metadata();
        Clock.format_time(&mut writer)?;
        write!(writer, " {:<5} ", meta.level())?;
        match (meta.module_path(), meta.line()) {
            (Some(module), Some(line)) => write!(writer, "{}:{} ", module, line)?,
            (Some(module), None) => write!(writer, "{} ", module)?,
            _ => write!(writer, "{} ", meta.target())?,
        }
        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

/// The server's log files inside one directory.
struct LogDirectory<'a> {
    path: &'a Path,
}

impl<'a> LogDirectory<'a> {
    fn open(path: &'a Path) -> Result<Self, ConfigError> {
        fs_err::create_dir_all(path)?;
        Ok(Self { path })
    }

    fn file_for(&self, started: DateTime<Local>, pid: u32) -> PathBuf {
        self.path.join(format!(
            "{}{}_{}{}",
            FILE_PREFIX,
            started.format(FILE_STAMP),
            pid,
            FILE_SUFFIX
        ))
    }

    /// Log files with their start time, oldest first. Files whose name carries
    /// no readable time are left alone.
    fn existing(&self) -> Result<Vec<(DateTime<Local>, PathBuf)>, ConfigError> {
        let mut files = Vec::new();
        for entry in fs_err::read_dir(self.path)? {
            let path = entry?.path();
            if let Some(started) = started_at(&path) {
                files.push((started, path));
            }
        }
        files.sort();
        Ok(files)
    }

    /// Removes files beyond `max_files` (oldest first) and files older than
    /// `max_age_days`. A zero limit disables that rule.
    fn prune(&self, config: &LoggingConfig, now: DateTime<Local>) -> Result<(), ConfigError> {
        let files = self.existing()?;
        let surplus = match config.max_files {
            0 => 0,
            keep => files.len().saturating_sub(keep),
        };
        let oldest_allowed = match config.max_age_days {
            0 => None,
            days => i64::try_from(days)
                .ok()
                .and_then(chrono::Duration::try_days)
                .map(|age| now - age),
        };

        for (index, (started, path)) in files.iter().enumerate() {
            let expired = oldest_allowed.is_some_and(|limit| *started < limit);
            if index < surplus || expired {
                if let Err(e) = fs_err::remove_file(path) {
                    tracing::debug!("Could not remove old log file: {}", e);
                }
            }
        }
        Ok(())
    }

    /// Points `<parent>/pulsar.log` at `target`.
    fn link_latest(&self, target: &Path) {
        let Some(parent) = self.path.parent() else {
            return;
        };
        let link = parent.join(LATEST_LINK);
        let _ = fs_err::remove_file(&link);
        #[cfg(unix)]
        {
            if let Err(e) = std::os::unix::fs::symlink(target, &link) {
                tracing::debug!("Could not link {}: {}", link.display(), e);
            }
        }
    }
}

fn started_at(path: &Path) -> Option<DateTime<Local>> {
    let name = path.file_name()?.to_str()?;
    let stem = name.strip_prefix(FILE_PREFIX)?.strip_suffix(FILE_SUFFIX)?;
    let (stamp, _pid) = stem.split_once('_')?;
    let naive = NaiveDateTime::parse_from_str(stamp, FILE_STAMP).ok()?;
    Local.from_local_datetime(&naive).earliest()
}

fn log_directory(config: &LoggingConfig) -> Result<PathBuf, ConfigError> {
    if let Some(dir) = &config.log_dir {
        return Ok(dir.clone());
    }
    xdg::BaseDirectories::with_prefix("pulsar")
        .get_cache_home()
        .map(|cache| cache.join("logs"))
        .ok_or_else(|| ConfigError::General("no cache home directory for logs".to_string()))
}

/// File logger for the long running server. Returns the path of the new log
/// file. Setting `PULSAR_LOG_TEE` also sends the same lines to stderr.
pub fn init_server_logger(config: &LoggingConfig) -> Result<PathBuf, ConfigError> {
    let dir_path = log_directory(config)?;
    let dir = LogDirectory::open(&dir_path)?;
    let now = Local::now();
    dir.prune(config, now)?;

    let log_path = dir.file_for(now, std::process::id());
    let file = fs_err::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    let to_file = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .event_format(LineFormat)
        .with_writer(Mutex::new(file));
    let to_stderr = std::env::var_os(env_vars::LOG_TEE).map(|_| {
        tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .event_format(LineFormat)
            .with_writer(std::io::stderr)
    });

    tracing_subscriber::registry()
        .with(level_filter())
        .with(to_file)
        .with(to_stderr)
        .try_init()
        .map_err(|e| ConfigError::General(format!("logger already installed: {}", e)))?;

    dir.link_latest(&log_path);
    tracing::info!(
        "Pulsar {} logging to {}",
        env!("CARGO_PKG_VERSION"),
        log_path.display()
    );
    Ok(log_path)
}

/// Console logger for interactive commands. A second call is a no-op.
pub fn init_stderr_logger() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(level_filter())
        .with_writer(std::io::stderr)
        .with_timer(Clock)
        .with_target(false)
        .try_init();
}

fn shell_word(arg: &str) -> String {
    if arg.is_empty() || arg.contains(char::is_whitespace) {
        format!("'{}'", arg)
    } else {
        arg.to_string()
    }
}

/// Renders a command the way it would be typed, quoting blank or spaced arguments.
pub fn format_command_for_display(command: &Command) -> String {
    std::iter::once(command.get_program())
        .chain(command.get_args())
        .map(|part| shell_word(&part.to_string_lossy()))
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn log_and_print_command(command: &Command) {
    tracing::debug!("[CMD] {}", format_command_for_display(command));
}
