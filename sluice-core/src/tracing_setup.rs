//! Tracing setup for the service.
//!
//! Console output at a user-chosen level, plus an optional full-trace
//! file for post-mortem digging when the server is run with tracing
//! enabled.

use std::fs::{create_dir_all, File};
use std::path::Path;

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

/// Initializes the global subscriber.
///
/// `console_level` is overridden by `RUST_LOG` when set. When
/// `trace_dir` is given, a complete TRACE-level log is written to
/// `<trace_dir>/sluice-last-run.log`, overwriting the previous run.
///
/// # Errors
///
/// - `std::io::Error` - trace directory or file cannot be created
pub fn init_tracing(console_level: Level, trace_dir: Option<&Path>) -> std::io::Result<()> {
    let console_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(console_level.to_string()));
    let console_layer = fmt::layer()
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_filter(console_filter);

    let file_layer = match trace_dir {
        Some(dir) => {
            create_dir_all(dir)?;
            let file = File::create(dir.join("sluice-last-run.log"))?;
            Some(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_ansi(false)
                    .with_writer(file)
                    .with_filter(EnvFilter::new("trace")),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .init();
    Ok(())
}
