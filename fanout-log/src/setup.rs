use std::io;

use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

/// Crates of this workspace, which are logged at the configured level.
const CRATE_NAMES: &[&str] = &["fanout", "fanout_log", "fanout_threading"];

/// The minimum level of log messages.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    /// Disables logging entirely.
    Off,
    /// Only errors.
    Error,
    /// Warnings and errors.
    Warn,
    /// Informational messages and above.
    Info,
    /// Lifecycle messages and above.
    Debug,
    /// Everything.
    Trace,
}

impl Level {
    /// Returns the directive name of this level for an [`EnvFilter`].
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        }
    }
}

/// Controls the log format.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Auto detect the best format.
    ///
    /// This chooses [`LogFormat::Pretty`] for TTY, otherwise [`LogFormat::Simplified`].
    Auto,

    /// Pretty printing with colors.
    ///
    /// ```text
    ///  INFO fanout::signal: slot connected slot=3 scheme=ordered
    /// ```
    Pretty,

    /// Simplified plain text output.
    ///
    /// ```text
    /// 2020-12-04T12:10:32Z  INFO fanout::signal: slot connected slot=3 scheme=ordered
    /// ```
    Simplified,

    /// Dump out JSON lines.
    ///
    /// ```text
    /// {"timestamp":"2020-12-04T12:11:08.729716Z","level":"INFO","fields":{"message":"slot connected","slot":"3"},"target":"fanout::signal"}
    /// ```
    Json,
}

/// Controls the logging system.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct LogConfig {
    /// The log level for the crates of this workspace.
    ///
    /// Third-party crates are always logged at `info` unless `RUST_LOG` is set.
    pub level: Level,

    /// Controls the log output format.
    ///
    /// Defaults to [`LogFormat::Auto`], which detects the best format based on the TTY.
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::Info,
            format: LogFormat::Auto,
        }
    }
}

/// Builds the filter directives used when `RUST_LOG` is not set.
fn default_directives(level: Level) -> String {
    // Configure INFO as default for all third-party crates.
    let mut directives = String::from("info");
    for name in CRATE_NAMES {
        directives.push(',');
        directives.push_str(name);
        directives.push('=');
        directives.push_str(level.as_str());
    }

    directives
}

/// Initialize the logging system.
///
/// The `RUST_LOG` environment variable takes precedence over the configured level. Calling this
/// function more than once has no effect, the first subscriber stays installed.
///
/// # Example
///
/// ```
/// let log_config = fanout_log::LogConfig {
///     level: fanout_log::Level::Debug,
///     ..Default::default()
/// };
///
/// fanout_log::init(&log_config);
/// ```
pub fn init(config: &LogConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(config.level)));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(true);

    let result = match (config.format, console::user_attended_stderr()) {
        (LogFormat::Auto, true) | (LogFormat::Pretty, _) => builder.compact().try_init(),
        (LogFormat::Auto, false) | (LogFormat::Simplified, _) => {
            builder.with_ansi(false).try_init()
        }
        (LogFormat::Json, _) => builder.json().try_init(),
    };

    // A subscriber installed by an earlier call keeps precedence.
    result.ok();
}
