//! Logging setup for the daemon.
//!
//! The filter comes from `RUST_LOG`, then `ELEVOX_LOG_LEVEL`, then the
//! `[logging]` config section. Chatty dependencies are held at `warn`
//! unless the chosen filter names them itself.
//!
//! Production writes JSON to a daily file and plain lines to stdout for the
//! journal. Development writes pretty lines to stdout, with the open and close
//! of every `scan_cycle` span when `logging.cycle_spans` is on.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::Context;
use elevox_core::LoggingConfig;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Environment variable overriding `logging.level`.
pub const LOG_LEVEL_ENV: &str = "ELEVOX_LOG_LEVEL";

/// Environment variable selecting the logging mode.
pub const ENVIRONMENT_ENV: &str = "ELEVOX_ENV";

/// Prefix of the daily log files.
const LOG_FILE_PREFIX: &str = "elevox.log";

/// Targets that flood the output at `info` and below.
const QUIET_TARGETS: [&str; 3] = ["bluer", "hyper", "h2"];

// Dropping a guard loses whatever its writer still buffers.
static GUARDS: OnceLock<Vec<WorkerGuard>> = OnceLock::new();

/// Whether `ELEVOX_ENV` asks for production logging.
#[must_use]
pub fn is_production() -> bool {
    std::env::var(ENVIRONMENT_ENV).is_ok_and(|env| env.eq_ignore_ascii_case("production"))
}

/// Install the global subscriber.
///
/// # Errors
///
/// Returns an error if the filter does not parse or the log directory
/// cannot be created.
pub fn init(config: &LoggingConfig, production: bool) -> anyhow::Result<()> {
    let directive = filter_directive(
        std::env::var("RUST_LOG").ok(),
        std::env::var(LOG_LEVEL_ENV).ok(),
        config,
    );
    let filter = EnvFilter::try_new(&directive)
        .with_context(|| format!("Invalid log filter '{directive}'"))?;

    if production {
        let directory = log_directory(config);
        init_production(filter, &directory)?;
        tracing::info!(directory = %directory.display(), filter = %directive, "Logging to files");
    } else {
        init_development(filter, config.cycle_spans);
        tracing::debug!(filter = %directive, "Logging to stdout");
    }

    Ok(())
}

/// The filter to install: the first non-empty of `rust_log`, `level_env` and
/// `config.level`, with the noisy dependencies capped at `warn`.
#[must_use]
pub fn filter_directive(
    rust_log: Option<String>,
    level_env: Option<String>,
    config: &LoggingConfig,
) -> String {
    let base = [rust_log, level_env]
        .into_iter()
        .flatten()
        .map(|value| value.trim().to_string())
        .find(|value| !value.is_empty())
        .unwrap_or_else(|| config.level.trim().to_string());

    let named: Vec<&str> = base
        .split(',')
        .filter_map(|part| part.split('=').next())
        .map(str::trim)
        .collect();

    let mut directive = base.clone();
    for target in QUIET_TARGETS {
        if !named.contains(&target) {
            directive.push(',');
            directive.push_str(target);
            directive.push_str("=warn");
        }
    }
    directive
}

/// Where production log files are written.
#[must_use]
pub fn log_directory(config: &LoggingConfig) -> PathBuf {
    config.directory.clone().unwrap_or_else(default_log_directory)
}

fn init_production(filter: EnvFilter, directory: &Path) -> anyhow::Result<()> {
    std::fs::create_dir_all(directory)
        .with_context(|| format!("Failed to create log directory {}", directory.display()))?;

    let (file_writer, file_guard) = tracing_appender::non_blocking(RollingFileAppender::new(
        Rotation::DAILY,
        directory,
        LOG_FILE_PREFIX,
    ));
    let (stdout_writer, stdout_guard) = tracing_appender::non_blocking(std::io::stdout());

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(true)
                .with_writer(file_writer)
                .with_file(true)
                .with_line_number(true),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .compact()
                .with_writer(stdout_writer)
                .with_ansi(false),
        )
        .init();

    let _ = GUARDS.set(vec![file_guard, stdout_guard]);
    Ok(())
}

fn init_development(filter: EnvFilter, cycle_spans: bool) {
    let span_events = if cycle_spans {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .pretty()
                .with_file(true)
                .with_line_number(true)
                .with_span_events(span_events),
        )
        .init();
}

fn default_log_directory() -> PathBuf {
    #[cfg(target_os = "linux")]
    {
        PathBuf::from("/var/log/elevox")
    }
    #[cfg(not(target_os = "linux"))]
    {
        directories::ProjectDirs::from("", "", "elevox")
            .map_or_else(|| PathBuf::from("./logs"), |dirs| dirs.data_dir().join("logs"))
    }
}
