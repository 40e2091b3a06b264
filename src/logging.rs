use std::env;
use std::fs::OpenOptions;
use std::io;
use std::path::PathBuf;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Configuration for the logging system
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    /// Log level filter (e.g., "debug", "info", "warn", "error")
    pub level: String,
    /// Optional log file path. If None, logs only to stderr
    pub file_path: Option<PathBuf>,
    /// Whether to use structured JSON format for logs
    pub json_format: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file_path: None,
            json_format: false,
        }
    }
}

impl LogConfig {
    /// Create LogConfig from environment variables
    ///
    /// `RUST_LOG` sets the filter, `TESTHOST_LOG_FILE` redirects output to a
    /// file (suffixed with our PID when `TESTHOST_LOG_UNIQUE=true`), and
    /// `TESTHOST_LOG_JSON=true` switches to JSON lines.
    pub fn from_env() -> Self {
        let level = env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
        let unique = env::var("TESTHOST_LOG_UNIQUE").unwrap_or_default() == "true";
        let file_path = env::var("TESTHOST_LOG_FILE")
            .ok()
            .map(|path| Self::log_file_path(PathBuf::from(path), unique));
        let json_format = env::var("TESTHOST_LOG_JSON").unwrap_or_default() == "true";

        Self {
            level,
            file_path,
            json_format,
        }
    }

    /// Insert the process ID before the extension when `unique` is set
    fn log_file_path(mut path: PathBuf, unique: bool) -> PathBuf {
        if !unique {
            return path;
        }

        if let Some(stem) = path.file_stem().map(|s| s.to_string_lossy().into_owned()) {
            let pid = std::process::id();
            let unique_name = match path.extension().and_then(|ext| ext.to_str()) {
                Some(ext) if !ext.is_empty() => format!("{stem}.{pid}.{ext}"),
                _ => format!("{stem}.{pid}"),
            };
            path.set_file_name(unique_name);
        }
        path
    }

    /// Override values from CLI arguments
    pub fn with_overrides(mut self, level: Option<String>, file_path: Option<PathBuf>) -> Self {
        if let Some(level) = level {
            self.level = level;
        }
        if let Some(file_path) = file_path {
            self.file_path = Some(file_path);
        }
        self
    }
}

/// Initialize the logging system based on configuration
///
/// Logs never go to stdout: the CLI prints its results there.
pub fn init_logging(config: LogConfig) -> Result<(), Box<dyn std::error::Error>> {
    let env_filter = EnvFilter::try_new(&config.level).or_else(|_| EnvFilter::try_new("info"))?;
    let subscriber = tracing_subscriber::registry().with(env_filter);

    match (&config.file_path, config.json_format) {
        (Some(file_path), true) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(file_path)?;
            subscriber
                .with(fmt::layer().json().with_writer(file).with_ansi(false))
                .init();
        }
        (Some(file_path), false) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(file_path)?;
            subscriber
                .with(
                    fmt::layer()
                        .with_writer(file)
                        .with_ansi(false)
                        .with_target(true)
                        .with_thread_ids(true)
                        .with_line_number(true),
                )
                .init();
        }
        (None, true) => {
            subscriber
                .with(fmt::layer().json().with_writer(io::stderr).with_ansi(false))
                .init();
        }
        (None, false) => {
            subscriber
                .with(
                    fmt::layer()
                        .with_writer(io::stderr)
                        .with_ansi(true)
                        .with_target(true)
                        .with_line_number(true),
                )
                .init();
        }
    }

    Ok(())
}

/// Log one protocol message exchanged with the test host in one line
#[macro_export]
macro_rules! log_host_message {
    ($level:expr, $direction:expr, $message_type:expr, $bytes:expr) => {
        tracing::event!(
            $level,
            direction = $direction,
            message_type = %$message_type,
            bytes = $bytes,
            pid = std::process::id(),
            "Test host message"
        );
    };
}

/// Log how long a session operation took
#[macro_export]
macro_rules! log_timing {
    ($level:expr, $operation:expr, $duration:expr) => {
        tracing::event!(
            $level,
            operation = $operation,
            duration_ms = $duration.as_millis() as u64,
            pid = std::process::id(),
            "Operation timing"
        );
    };
}
