//! Root logger construction (ambient stack): `slog` + `sloggers`, the same
//! pairing `flux::logging` wraps. Unlike the teacher's stub (which builds a
//! `LoggerConfig` from a hardcoded TOML string and drops the logger on the
//! floor), this actually returns one, driven by the `loglevel`/`logfile`
//! config directives (spec §6).

use crate::config::{LogLevel, ServerConfig};
use sloggers::terminal::{Destination, TerminalLoggerBuilder};
use sloggers::types::Severity;
use sloggers::Build;

fn severity(level: LogLevel) -> Severity {
    match level {
        LogLevel::Debug => Severity::Debug,
        LogLevel::Verbose => Severity::Info,
        LogLevel::Notice => Severity::Notice,
        LogLevel::Warning => Severity::Warning,
    }
}

/// Builds the root logger. `logfile` of `stdout` (the default) logs to the
/// terminal; anything else is treated as a path and logged to a file.
pub fn init(config: &ServerConfig) -> slog::Logger {
    if config.logfile == "stdout" {
        let mut builder = TerminalLoggerBuilder::new();
        builder.destination(Destination::Stdout);
        builder.level(severity(config.loglevel));
        builder.build().expect("failed to build terminal logger")
    } else {
        let mut builder = sloggers::file::FileLoggerBuilder::new(&config.logfile);
        builder.level(severity(config.loglevel));
        builder.build().expect("failed to build file logger")
    }
}
