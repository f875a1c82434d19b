//! Process-wide `tracing` subscriber setup.

use std::env::{self, VarError};

use thiserror::Error;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Errors raised while installing the subscriber.
#[derive(Debug, Error)]
pub enum LoggingError {
    /// A filter does not parse.
    #[error("invalid log filter {filter:?} from {origin}: {message}")]
    Filter {
        /// Where the filter came from.
        origin: &'static str,
        /// Filter text as configured.
        filter: String,
        /// Parser message.
        message: String,
    },
    /// A global subscriber is already installed.
    #[error("logging already initialised: {0}")]
    AlreadyInitialised(String),
}

/// Builds the filter used by [`init`].
///
/// `RUST_LOG` wins when set; otherwise `fallback` applies.
///
/// # Errors
///
/// Returns [`LoggingError::Filter`] when `RUST_LOG` is set but malformed or
/// not unicode, or when `fallback` is not a valid directive list.
pub fn filter(fallback: &str) -> Result<EnvFilter, LoggingError> {
    match env::var(EnvFilter::DEFAULT_ENV) {
        Ok(directives) => filter_from(Some(&directives), fallback),
        Err(VarError::NotPresent) => filter_from(None, fallback),
        Err(VarError::NotUnicode(raw)) => Err(LoggingError::Filter {
            origin: EnvFilter::DEFAULT_ENV,
            filter: raw.to_string_lossy().into_owned(),
            message: String::from("value is not valid unicode"),
        }),
    }
}

/// Parses `rust_log` when present, else `fallback`. A present but malformed
/// `rust_log` is an error rather than a reason to fall back.
///
/// # Errors
///
/// Returns [`LoggingError::Filter`] naming the source of the bad directives.
pub fn filter_from(rust_log: Option<&str>, fallback: &str) -> Result<EnvFilter, LoggingError> {
    let (origin, directives) = match rust_log {
        Some(directives) => (EnvFilter::DEFAULT_ENV, directives),
        None => ("log_filter", fallback),
    };
    EnvFilter::try_new(directives).map_err(|err| LoggingError::Filter {
        origin,
        filter: directives.to_owned(),
        message: err.to_string(),
    })
}

/// Installs a formatting subscriber writing to stderr.
///
/// Stdout is left to command output.
///
/// # Errors
///
/// Returns [`LoggingError`] when the filter is invalid or a subscriber is
/// already installed.
pub fn init(fallback: &str) -> Result<(), LoggingError> {
    tracing_subscriber::registry()
        .with(filter(fallback)?)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init()
        .map_err(|err| LoggingError::AlreadyInitialised(err.to_string()))
}
