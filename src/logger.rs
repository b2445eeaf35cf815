//! Session logger: all log output goes to a single file in the OS data directory.
//!
//! The file is **truncated at each launch**, so it only ever holds output
//! from the most recent session.
//!
//! Log location:
//!   Windows:  `%APPDATA%\InkCanvas\inkcanvas.log`
//!   Linux:    `~/.local/share/InkCanvas/inkcanvas.log`
//!   macOS:    `~/Library/Application Support/InkCanvas/inkcanvas.log`
//!
//! Use the `log_info!` / `log_warn!` / `log_err!` macros anywhere in the
//! crate.  Before [`init`] runs (unit tests, the CLI) they are no-ops.

use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Mutex, OnceLock};
use std::time::{SystemTime, UNIX_EPOCH};

pub const APP_DIR_NAME: &str = "InkCanvas";

static LOG_FILE: OnceLock<Mutex<File>> = OnceLock::new();
static LOG_PATH: OnceLock<PathBuf> = OnceLock::new();

/// Returns the path to the current session log file.
pub fn log_path() -> Option<&'static PathBuf> {
    LOG_PATH.get()
}

/// Severity tag written in front of each message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Level {
    Info,
    Warn,
    Error,
}

impl Level {
    pub fn tag(self) -> &'static str {
        match self {
            Level::Info => "INFO",
            Level::Warn => "WARN",
            Level::Error => "ERROR",
        }
    }
}

/// Append a raw line.  I/O errors are swallowed.
fn write_line(line: &str) {
    if let Some(mutex) = LOG_FILE.get()
        && let Ok(mut file) = mutex.lock()
    {
        let _ = writeln!(file, "{}", line);
    }
}

fn format_line(hms: &str, level: Level, msg: fmt::Arguments<'_>) -> String {
    format!("[{}] [{}] {}", hms, level.tag(), msg)
}

/// Backing call of the `log_*!` macros.  Formats nothing until a log file is open.
pub fn log(level: Level, msg: fmt::Arguments<'_>) {
    if LOG_FILE.get().is_some() {
        write_line(&format_line(&clock_hms(), level, msg));
    }
}

#[doc(hidden)]
#[macro_export]
macro_rules! log_at {
    ($level:ident, $($arg:tt)*) => {
        $crate::logger::log($crate::logger::Level::$level, format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => { $crate::log_at!(Info, $($arg)*) };
}

#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => { $crate::log_at!(Warn, $($arg)*) };
}

#[macro_export]
macro_rules! log_err {
    ($($arg:tt)*) => { $crate::log_at!(Error, $($arg)*) };
}

/// Initialise the session logger.  Call once, early in `main`.
///
/// * Creates (or truncates) the log file.
/// * Installs a panic hook that mirrors the panic message into the log
///   before running the default handler.
pub fn init() {
    let path = app_data_dir().join("inkcanvas.log");

    if let Some(parent) = path.parent() {
        let _ = fs::create_dir_all(parent);
    }

    let file = OpenOptions::new().create(true).write(true).truncate(true).open(&path);

    match file {
        Ok(f) => {
            let _ = LOG_PATH.set(path.clone());
            let _ = LOG_FILE.set(Mutex::new(f));
        }
        Err(e) => {
            eprintln!("[logger] Failed to open log file {:?}: {}", path, e);
            return;
        }
    }

    write_line(&format!("=== InkCanvas session started (unix {}) ===", now_millis() / 1000));
    write_line(&format!("Log file: {}", path.display()));
    write_line("");

    let prev = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        write_line(&format!("[{}] [PANIC] {}", clock_hms(), info));
        prev(info);
    }));
}

/// `<platform data dir>/InkCanvas`: home of the log and the default store.
pub fn app_data_dir() -> PathBuf {
    data_dir().join(APP_DIR_NAME)
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

/// Milliseconds since the unix epoch (0 if the clock is before 1970).
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// `HH:MM:SS` within the current (UTC) day.
pub fn clock_hms() -> String {
    format_hms(now_millis() / 1000)
}

pub fn format_hms(unix_secs: u64) -> String {
    let h = (unix_secs % 86_400) / 3600;
    let m = (unix_secs % 3600) / 60;
    let s = unix_secs % 60;
    format!("{:02}:{:02}:{:02}", h, m, s)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hms_wraps_at_midnight() {
        assert_eq!(format_hms(0), "00:00:00");
        assert_eq!(format_hms(3 * 3600 + 4 * 60 + 5), "03:04:05");
        assert_eq!(format_hms(86_400 + 61), "00:01:01");
    }

    #[test]
    fn logging_before_init_is_silent() {
        log_warn!("nobody is listening: {}", 42);
        assert!(log_path().is_none());
    }

    #[test]
    fn macros_work_in_expression_position() {
        let r: Result<u8, &str> = Err("boom");
        match r {
            Ok(_) => log_info!("fine"),
            Err(e) => log_err!("failed: {}", e),
        }
    }

    #[test]
    fn lines_carry_clock_and_level_tag() {
        assert_eq!(format_line("01:02:03", Level::Warn, format_args!("disk {}", "full")), "[01:02:03] [WARN] disk full");
        assert_eq!(Level::Error.tag(), "ERROR");
    }
}
