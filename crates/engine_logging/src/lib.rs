#![deny(missing_docs)]
//! Shared logging utilities for the spotter workspace.
//!
//! This crate provides the `engine_*` logging macros used across the codebase
//! and the logger initializers. Every sink installed here writes to stderr or
//! to a file, never to stdout: stdout is reserved for the single result record
//! a run emits.

use std::fs::File;
use std::path::PathBuf;

use log::LevelFilter;
use simplelog::{
    ColorChoice, CombinedLogger, Config, ConfigBuilder, SharedLogger, TermLogger, TerminalMode,
    WriteLogger,
};

/// Logs a trace-level message using the global logging facade.
#[macro_export]
macro_rules! engine_trace {
    ($($arg:tt)*) => {{
        log::trace!($($arg)*);
    }};
}

/// Logs an info-level message using the global logging facade.
#[macro_export]
macro_rules! engine_info {
    ($($arg:tt)*) => {{
        log::info!($($arg)*);
    }};
}

/// Logs a debug-level message using the global logging facade.
#[macro_export]
macro_rules! engine_debug {
    ($($arg:tt)*) => {{
        log::debug!($($arg)*);
    }};
}

/// Logs a warn-level message using the global logging facade.
#[macro_export]
macro_rules! engine_warn {
    ($($arg:tt)*) => {{
        log::warn!($($arg)*);
    }};
}

/// Logs an error-level message using the global logging facade.
#[macro_export]
macro_rules! engine_error {
    ($($arg:tt)*) => {{
        log::error!($($arg)*);
    }};
}

/// Where diagnostics are written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogDestination {
    /// Terminal output on stderr.
    Stderr,
    /// A log file at the given path.
    File(PathBuf),
    /// Both stderr and a log file.
    Both(PathBuf),
}

/// Initializes the global logger.
///
/// A log file that cannot be created is reported on stderr and skipped; if it
/// was the only sink, stderr takes its place. Calling this twice keeps the
/// first logger.
pub fn initialize(level: LevelFilter, destination: LogDestination) {
    let _ = CombinedLogger::init(sinks(level, destination));
}

fn sinks(level: LevelFilter, destination: LogDestination) -> Vec<Box<dyn SharedLogger>> {
    let config = build_config();
    let (stderr, file) = match destination {
        LogDestination::Stderr => (true, None),
        LogDestination::File(path) => (false, Some(path)),
        LogDestination::Both(path) => (true, Some(path)),
    };

    let mut loggers: Vec<Box<dyn SharedLogger>> = Vec::new();
    let file_logger = file.and_then(|path| create_file_logger(level, config.clone(), path));
    if let Some(file_logger) = file_logger {
        loggers.push(file_logger);
    }
    if stderr || loggers.is_empty() {
        loggers.push(stderr_logger(level, config));
    }
    loggers
}

/// Initializes a simple stderr logger for use in unit tests.
///
/// This safely no-ops if another logger has already been initialized.
pub fn initialize_for_tests() {
    // Use debug level in debug builds, info in release builds.
    let level = if cfg!(debug_assertions) {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    // Ignore the error if a logger was already set by another test.
    let _ = CombinedLogger::init(vec![stderr_logger(level, Config::default())]);
}

fn build_config() -> Config {
    ConfigBuilder::new()
        .set_time_format_rfc3339()
        .set_target_level(LevelFilter::Error)
        // Connection pool and TLS chatter drowns out the pipeline diagnostics.
        .add_filter_ignore_str("hyper")
        .add_filter_ignore_str("reqwest")
        .add_filter_ignore_str("rustls")
        .build()
}

fn stderr_logger(level: LevelFilter, config: Config) -> Box<TermLogger> {
    TermLogger::new(level, config, TerminalMode::Stderr, ColorChoice::Auto)
}

fn create_file_logger(
    level: LevelFilter,
    config: Config,
    path: PathBuf,
) -> Option<Box<WriteLogger<File>>> {
    match File::create(&path) {
        Ok(file) => Some(WriteLogger::new(level, config, file)),
        Err(err) => {
            eprintln!("Warning: Could not create log file at {:?}: {}", path, err);
            None
        }
    }
}
