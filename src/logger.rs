//! Session logger — `log` facade backend writing to one file per session.
//!
//! The file is **truncated (overwritten) at each launch**, so it only ever
//! contains output from the most-recent session.
//!
//! Log location:
//!   Windows:  `%APPDATA%\gpuconv\gpuconv.log`
//!   Linux:    `~/.local/share/gpuconv/gpuconv.log`
//!   macOS:    `~/Library/Application Support/gpuconv/gpuconv.log`
//!
//! Use the ordinary `log::info!` / `log::warn!` / `log::error!` macros.
//! Warnings and errors are mirrored to stderr; with `verbose` every record is.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Mutex, OnceLock};
use std::time::{SystemTime, UNIX_EPOCH};

use log::{Level, LevelFilter, Log, Metadata, Record};

static LOG_PATH: OnceLock<PathBuf> = OnceLock::new();
static LOGGER: OnceLock<SessionLogger> = OnceLock::new();

struct SessionLogger {
    file: Option<Mutex<File>>,
    echo_level: Level,
}

impl Log for SessionLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= Level::Debug
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let line = format!("[{}] [{}] {}", timestamp(), record.level(), record.args());
        if record.level() <= self.echo_level {
            eprintln!("{line}");
        }
        if let Some(mutex) = &self.file
            && let Ok(mut file) = mutex.lock()
        {
            let _ = writeln!(file, "{line}");
        }
    }

    fn flush(&self) {
        if let Some(mutex) = &self.file
            && let Ok(mut file) = mutex.lock()
        {
            let _ = file.flush();
        }
    }
}

/// Returns the path to the current session log file.
pub fn log_path() -> Option<&'static PathBuf> {
    LOG_PATH.get()
}

/// Initialise the session logger.  Later calls are no-ops.
///
/// * Creates (or truncates) the log file when `to_file` is set.
/// * Installs a panic hook that writes the panic message to the log before
///   propagating to the default handler.
pub fn init(to_file: bool, verbose: bool) {
    if LOGGER.get().is_some() {
        return;
    }

    let file = if to_file { open_log_file() } else { None };
    let echo_level = if verbose { Level::Debug } else { Level::Warn };
    let logger = LOGGER.get_or_init(|| SessionLogger { file: file.map(Mutex::new), echo_level });

    if log::set_logger(logger).is_err() {
        // Another logger (e.g. a test harness) is already installed.
        return;
    }
    log::set_max_level(LevelFilter::Debug);

    log::info!("=== gpuconv session started {} ===", human_timestamp());
    if let Some(path) = log_path() {
        log::info!("log file: {}", path.display());
    }

    let prev = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        log::error!("PANIC: {info}");
        log::logger().flush();
        prev(info);
    }));
}

fn open_log_file() -> Option<File> {
    let path = data_dir().join("gpuconv").join("gpuconv.log");
    if let Some(parent) = path.parent() {
        let _ = fs::create_dir_all(parent);
    }
    match OpenOptions::new().create(true).write(true).truncate(true).open(&path) {
        Ok(f) => {
            let _ = LOG_PATH.set(path);
            Some(f)
        }
        Err(e) => {
            // Can't open log file — not fatal, stderr still works
            eprintln!("[logger] failed to open log file {:?}: {}", path, e);
            None
        }
    }
}

/// Platform data directory (without the app sub-folder).
fn data_dir() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        if let Ok(appdata) = std::env::var("APPDATA") {
            return PathBuf::from(appdata);
        }
    }
    #[cfg(target_os = "macos")]
    {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join("Library").join("Application Support");
        }
    }
    if let Ok(xdg) = std::env::var("XDG_DATA_HOME") {
        return PathBuf::from(xdg);
    }
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".local").join("share");
    }
    PathBuf::from(".")
}

/// HH:MM:SS (UTC) within the current day.
fn timestamp() -> String {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(d) => {
            let secs = d.as_secs();
            let h = (secs % 86400) / 3600;
            let m = (secs % 3600) / 60;
            let s = secs % 60;
            format!("{:02}:{:02}:{:02}", h, m, s)
        }
        Err(_) => "??:??:??".to_string(),
    }
}

fn human_timestamp() -> String {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(d) => format!("(unix {})", d.as_secs()),
        Err(_) => "(unknown time)".to_string(),
    }
}
