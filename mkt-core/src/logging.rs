//! Structured logging for the marketplace crates.
//!
//! The configured level applies to the workspace crates only; everything
//! else (r2d2, rusqlite, tokio internals) stays at `warn` unless a config
//! directive says otherwise. `MKT_LOG` replaces the whole filter when set.

use std::path::Path;

use tracing_appender::rolling;
use tracing_subscriber::filter::{Directive, LevelFilter};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingConfig;
use crate::error::{MktError, MktResult};

/// Environment variable that overrides the configured filter.
pub const LOG_ENV: &str = "MKT_LOG";

/// Targets the configured level applies to.
const WORKSPACE_TARGETS: &[&str] = &[
    "mkt_core",
    "mkt_models",
    "mkt_realtime",
    "mkt_services",
    "mkt_cli",
];

const DEPENDENCY_LEVEL: &str = "warn";

const LOG_FILE_PREFIX: &str = "marketplace.log";

/// Build the filter string for `level` plus extra `directives`.
///
/// Extra directives come last so they win over the per-crate defaults,
/// e.g. `mkt_realtime=trace` or `r2d2=info`.
pub fn filter_spec(level: &str, directives: &[String]) -> MktResult<String> {
    let level = level.trim().to_ascii_lowercase();
    level
        .parse::<LevelFilter>()
        .map_err(|_| MktError::Config(format!("unknown log level '{level}'")))?;

    let mut parts = vec![DEPENDENCY_LEVEL.to_string()];
    parts.extend(
        WORKSPACE_TARGETS
            .iter()
            .map(|target| format!("{target}={level}")),
    );
    for raw in directives {
        let directive = raw.trim();
        directive
            .parse::<Directive>()
            .map_err(|e| MktError::Config(format!("bad log directive '{directive}': {e}")))?;
        parts.push(directive.to_string());
    }
    Ok(parts.join(","))
}

/// Filter for `config`, or for `MKT_LOG` when that is set.
pub fn build_filter(config: &LoggingConfig) -> MktResult<EnvFilter> {
    let spec = match std::env::var(LOG_ENV) {
        Ok(raw) if !raw.trim().is_empty() => raw,
        _ => filter_spec(&config.level, &config.directives)?,
    };
    EnvFilter::try_new(&spec).map_err(|e| MktError::Config(format!("bad log filter '{spec}': {e}")))
}

/// Install the global subscriber: compact stderr output plus a daily log
/// file in `log_dir`, JSON when `config.json_output` is set.
pub fn init_logging(config: &LoggingConfig, log_dir: &Path) -> MktResult<LogGuard> {
    let filter = build_filter(config)?;
    std::fs::create_dir_all(log_dir)?;

    let (writer, guard) = tracing_appender::non_blocking(rolling::daily(log_dir, LOG_FILE_PREFIX));

    let console = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact();
    let json_file = config.json_output.then(|| {
        fmt::layer()
            .with_writer(writer.clone())
            .json()
            .with_current_span(false)
            .with_target(true)
            .with_line_number(true)
    });
    let plain_file = (!config.json_output).then(|| {
        fmt::layer()
            .with_writer(writer)
            .with_ansi(false)
            .with_target(true)
            .with_line_number(true)
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(json_file)
        .with(plain_file)
        .try_init()
        .map_err(|e| MktError::Config(format!("logging already initialized: {e}")))?;

    tracing::debug!(
        "logging to {} (json: {})",
        log_dir.join(LOG_FILE_PREFIX).display(),
        config.json_output
    );
    Ok(LogGuard { _guard: guard })
}

/// Console-only logger for tests and one-off tools. Later calls are
/// no-ops, and an unknown level falls back to `info`.
pub fn init_console_logging(level: &str) {
    let spec = filter_spec(level, &[]).or_else(|_| filter_spec("info", &[]));
    let Ok(filter) = spec.and_then(|spec| {
        EnvFilter::try_new(spec).map_err(|e| MktError::Config(e.to_string()))
    }) else {
        return;
    };
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .try_init();
}

/// Keeps the file writer alive. Dropping it flushes pending lines.
pub struct LogGuard {
    _guard: tracing_appender::non_blocking::WorkerGuard,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_scoped_to_workspace_crates() {
        let spec = filter_spec("debug", &[]).unwrap();
        assert!(spec.starts_with("warn,"));
        for target in WORKSPACE_TARGETS {
            assert!(spec.contains(&format!("{target}=debug")), "{spec}");
        }
    }

    #[test]
    fn test_directives_follow_defaults() {
        let spec = filter_spec("info", &["mkt_realtime=trace".into(), " r2d2=info ".into()]).unwrap();
        assert!(spec.ends_with(",mkt_realtime=trace,r2d2=info"), "{spec}");
        assert!(EnvFilter::try_new(&spec).is_ok());
    }

    #[test]
    fn test_console_logging_is_idempotent() {
        init_console_logging("debug");
        init_console_logging("nonsense");
    }

    #[test]
    fn test_rejects_unknown_level_and_bad_directive() {
        assert!(matches!(filter_spec("loud", &[]), Err(MktError::Config(_))));
        assert!(matches!(
            filter_spec("info", &["mkt_core=shouty".into()]),
            Err(MktError::Config(_))
        ));
    }
}
