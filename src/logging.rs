//! Tracing initialization.
//! EnvFilter driven by LogLevel (no RUST_LOG override), compact or JSON stdout, and an
//! optional non-blocking file layer. File logging is refused if any ancestor of the file
//! path is a symlink.

use anyhow::Result;
use chrono::Local;
use std::fmt as stdfmt;
use std::path::Path;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::filter::{EnvFilter, LevelFilter};
use tracing_subscriber::fmt as tsfmt;
use tracing_subscriber::fmt::time::FormatTime;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{registry, Layer, Registry};

use vault_mover::output as out;
use vault_mover::platform::open_log_file_secure_append;
use vault_mover::{default_log_path, path_has_symlink_ancestor, LogLevel};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// DD/MM/YY HH:MM:SS in local time.
struct LocalHumanTime;

impl FormatTime for LocalHumanTime {
    fn format_time(&self, w: &mut tsfmt::format::Writer<'_>) -> stdfmt::Result {
        write!(w, "{}", Local::now().format("%d/%m/%y %H:%M:%S"))
    }
}

fn to_level_filter(lvl: LogLevel) -> LevelFilter {
    match lvl {
        LogLevel::Quiet => LevelFilter::ERROR,
        LogLevel::Normal => LevelFilter::INFO,
        LogLevel::Info => LevelFilter::DEBUG,
        LogLevel::Debug => LevelFilter::TRACE,
    }
}

fn env_filter(lvl: LogLevel) -> EnvFilter {
    let directive = to_level_filter(lvl).to_string().to_ascii_lowercase();
    EnvFilter::new(directive)
}

fn fmt_layer<W>(json: bool, writer: W) -> BoxedLayer
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let base = tsfmt::layer()
        .with_timer(LocalHumanTime)
        .with_level(true)
        .with_target(true)
        .with_thread_ids(true)
        .with_writer(writer);
    if json {
        base.event_format(tsfmt::format().json().with_timer(LocalHumanTime)).boxed()
    } else {
        base.compact().boxed()
    }
}

fn open_non_blocking(path: &Path) -> Option<(NonBlocking, WorkerGuard)> {
    match path_has_symlink_ancestor(path) {
        Ok(true) => {
            eprintln!(
                "Refusing to enable file logging: ancestor of {} is a symlink; proceeding without file logging.",
                path.display()
            );
            return None;
        }
        Err(e) => {
            eprintln!("Error checking log path {} for symlinks: {e}; proceeding without file logging.", path.display());
            return None;
        }
        Ok(false) => {}
    }

    if let Some(parent) = path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }

    match open_log_file_secure_append(path) {
        Ok(file) => Some(tracing_appender::non_blocking(file)),
        Err(e) => {
            eprintln!("Failed to open log file {}: {e}", path.display());
            None
        }
    }
}

/// Install the global subscriber. The returned guard must be held until shutdown so the
/// file writer flushes.
pub fn init_tracing(lvl: LogLevel, log_file: Option<&Path>, json: bool) -> Result<Option<WorkerGuard>> {
    let mut layers: Vec<BoxedLayer> = vec![fmt_layer(json, std::io::stdout)];
    let mut guard = None;

    if let Some(path) = log_file {
        match open_non_blocking(path) {
            Some((writer, g)) => {
                layers.push(fmt_layer(json, writer));
                guard = Some(g);
            }
            None => {
                out::print_warn(&format!(
                    "Requested file logging to '{}' was not enabled. Check that the parent directory is writable \
                     and that no ancestor is a symlink. Logs will continue to stdout.",
                    path.display()
                ));
                if let Some(def) = default_log_path() {
                    out::print_info(&format!("You can try the default log path instead: {}", def.display()));
                }
            }
        }
    }

    registry().with(layers).with(env_filter(lvl)).try_init()?;
    Ok(guard)
}
