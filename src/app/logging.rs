//! Usage: Process-wide tracing setup (stderr by default, optional trace file via `GCM_TRACE`).
//!
//! stdout is reserved for the git protocol, so nothing here ever writes to it.

use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, EnvFilter};

const DEFAULT_FILTER: &str = "warn";
const VERBOSE_FILTER: &str = "git_credential_keeper=debug,info";
const TRACE_FILE_NAME: &str = "git-credential-keeper.log";

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum TraceTarget {
    Stderr { filter: String },
    File { path: PathBuf, filter: String },
}

/// Keeps the background trace-file writer alive until the process exits.
#[must_use]
pub struct LoggingGuard {
    _file: Option<WorkerGuard>,
}

/// `trace` is the raw `GCM_TRACE` value, `rust_log` the raw `RUST_LOG` value.
pub(crate) fn resolve_trace_target(trace: Option<&str>, rust_log: Option<&str>) -> TraceTarget {
    let fallback = || {
        rust_log
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .unwrap_or(DEFAULT_FILTER)
            .to_string()
    };

    let Some(trace) = trace.map(str::trim).filter(|v| !v.is_empty()) else {
        return TraceTarget::Stderr { filter: fallback() };
    };

    if crate::infra::settings::is_falsey(trace) {
        return TraceTarget::Stderr { filter: fallback() };
    }
    if crate::infra::settings::is_truthy(trace) {
        return TraceTarget::Stderr {
            filter: VERBOSE_FILTER.to_string(),
        };
    }
    if Path::new(trace).is_absolute() {
        return TraceTarget::File {
            path: PathBuf::from(trace),
            filter: VERBOSE_FILTER.to_string(),
        };
    }
    TraceTarget::Stderr {
        filter: trace.to_string(),
    }
}

fn build_filter(raw: &str) -> EnvFilter {
    EnvFilter::try_new(raw).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

pub fn init(trace: Option<&str>) -> LoggingGuard {
    let rust_log = std::env::var("RUST_LOG").ok();
    let target = resolve_trace_target(trace, rust_log.as_deref());

    let (filter, file_layer, guard) = match &target {
        TraceTarget::Stderr { filter } => (build_filter(filter), None, None),
        TraceTarget::File { path, filter } => {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let file_name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| TRACE_FILE_NAME.to_string());
            let appender = tracing_appender::rolling::never(dir, file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true);
            (build_filter(filter), Some(layer), Some(guard))
        }
    };

    let stderr_layer = match &target {
        TraceTarget::Stderr { .. } => Some(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .compact(),
        ),
        TraceTarget::File { .. } => None,
    };

    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer);

    // A second init in the same process (tests) keeps the first subscriber.
    if tracing::subscriber::set_global_default(subscriber).is_ok() {
        let _ = tracing_log::LogTracer::init();
    }

    LoggingGuard { _file: guard }
}
