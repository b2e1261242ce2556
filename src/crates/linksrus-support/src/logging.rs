//! Structured-logging helpers built on `tracing`.

use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Install a `tracing-subscriber` fmt layer driven by `RUST_LOG` (falling back
/// to `default_level`). Intended for binaries, examples and tests — library
/// crates in this workspace never install a global subscriber themselves.
pub fn init_tracing(default_level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level.to_string()));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}

/// Log the wall-clock duration of an async operation at `debug` level.
pub async fn timed<F, T>(name: &str, future: F) -> T
where
    F: std::future::Future<Output = T>,
{
    timed_with_level(name, LogLevel::Debug, future).await
}

/// Log level used by [`timed_with_level`] and [`LogGuard::with_level`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

fn log_at(level: LogLevel, msg: &str) {
    match level {
        LogLevel::Debug => debug!("{}", msg),
        LogLevel::Info => info!("{}", msg),
        LogLevel::Warn => warn!("{}", msg),
        LogLevel::Error => error!("{}", msg),
    }
}

/// Like [`timed`] but at a caller-chosen log level.
pub async fn timed_with_level<F, T>(name: &str, level: LogLevel, future: F) -> T
where
    F: std::future::Future<Output = T>,
{
    let start = Instant::now();
    log_at(level, &format!("starting: {}", name));
    let result = future.await;
    log_at(level, &format!("completed: {} in {}", name, format_duration(start.elapsed())));
    result
}

/// RAII guard that logs entry/exit of a scope along with its elapsed time.
pub struct LogGuard {
    name: String,
    start: Instant,
}

impl LogGuard {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        debug!("entering: {}", name);
        Self { name, start: Instant::now() }
    }

    pub fn elapsed(&self) -> std::time::Duration {
        self.start.elapsed()
    }
}

impl Drop for LogGuard {
    fn drop(&mut self) {
        debug!("exiting: {} (elapsed: {})", self.name, format_duration(self.start.elapsed()));
    }
}

/// Render a duration the way a human reads logs: `500μs`, `1.50s`, `2m5s`.
pub fn format_duration(duration: std::time::Duration) -> String {
    let micros = duration.as_micros();

    if micros < 1000 {
        format!("{}μs", micros)
    } else if micros < 1_000_000 {
        format!("{}ms", micros / 1000)
    } else if micros < 60_000_000 {
        format!("{:.2}s", micros as f64 / 1_000_000.0)
    } else {
        let seconds = micros / 1_000_000;
        format!("{}m{}s", seconds / 60, seconds % 60)
    }
}

/// Redact common secret-shaped substrings before they hit a log line.
pub fn sanitize_for_logging(input: &str) -> String {
    let mut result = input.to_string();
    let patterns = [
        (r"(?i)(api[\s_-]?key|apikey)\s*[:=]\s*\S+", "$1: [REDACTED]"),
        (r"(?i)(password|passwd|pwd)\s*[:=]\s*\S+", "$1: [REDACTED]"),
        (r"(?i)(token)\s*[:=]\s*\S+", "$1: [REDACTED]"),
        (r"(?i)(secret)\s*[:=]\s*\S+", "$1: [REDACTED]"),
        (r"(?i)(authorization|auth)\s*:\s*bearer\s+\S+", "$1: Bearer [REDACTED]"),
    ];
    for (pattern, replacement) in &patterns {
        if let Ok(re) = regex::Regex::new(pattern) {
            result = re.replace_all(&result, *replacement).to_string();
        }
    }
    result
}
