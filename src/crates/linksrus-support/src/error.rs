//! Error context and error-chain diagnostics.
//!
//! # Example
//!
//! ```rust,ignore
//! use linksrus_support::error::{ErrorContext, format_error_chain};
//!
//! fn read_job_details(path: &str) -> Result<String, Box<dyn std::error::Error + Send + Sync>> {
//!     std::fs::read_to_string(path).context(format!("reading job details from {}", path))
//! }
//! ```

use std::error::Error as StdError;
use std::fmt;

/// Wraps an error with additional context, preserving the original as `source()`.
#[derive(Debug)]
pub struct ContextError {
    context: String,
    source: Box<dyn StdError + Send + Sync>,
}

impl fmt::Display for ContextError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.context, self.source)
    }
}

impl StdError for ContextError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(self.source.as_ref())
    }
}

/// Adds `.context(...)` to any `Result` whose error implements `std::error::Error`.
pub trait ErrorContext<T> {
    /// Attach a human-readable description of what was being attempted.
    fn context(self, context: impl Into<String>) -> Result<T, ContextError>;
}

impl<T, E> ErrorContext<T> for Result<T, E>
where
    E: StdError + Send + Sync + 'static,
{
    fn context(self, context: impl Into<String>) -> Result<T, ContextError> {
        self.map_err(|e| ContextError {
            context: context.into(),
            source: Box::new(e),
        })
    }
}

/// Render the full `source()` chain of an error, one cause per line.
pub fn format_error_chain(err: &(dyn StdError + 'static)) -> String {
    let mut out = err.to_string();
    let mut cur = err.source();
    while let Some(source) = cur {
        out.push_str("\ncaused by: ");
        out.push_str(&source.to_string());
        cur = source.source();
    }
    out
}

/// Walk the `source()` chain to the innermost error.
pub fn root_cause(err: &(dyn StdError + 'static)) -> &(dyn StdError + 'static) {
    let mut cur = err;
    while let Some(source) = cur.source() {
        cur = source;
    }
    cur
}

/// Number of links in the `source()` chain, including `err` itself.
pub fn error_chain_length(err: &(dyn StdError + 'static)) -> usize {
    let mut len = 1;
    let mut cur = err.source();
    while let Some(source) = cur {
        len += 1;
        cur = source.source();
    }
    len
}
