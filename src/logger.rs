//! Session logger: a `log` backend that writes to a single file in the OS
//! data directory.
//!
//! The file is **truncated at each launch**, so it only ever holds output
//! from the most recent session.
//!
//! Log location:
//!   Windows:  `%APPDATA%\PixelPortal\pixelportal.log`
//!   Linux:    `~/.local/share/PixelPortal/pixelportal.log`
//!   macOS:    `~/Library/Application Support/PixelPortal/pixelportal.log`
//!
//! Library code logs through the `log` macros; `init` installs this backend
//! and a panic hook that mirrors panics into the file.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use log::{Level, LevelFilter, Log, Metadata, Record};

pub struct SessionLogger {
    file: Option<Mutex<File>>,
    path: Option<PathBuf>,
    level: LevelFilter,
    /// Also echo records to stderr.
    echo: bool,
}

impl SessionLogger {
    /// Open (truncating) `path`. A file that cannot be opened is not fatal;
    /// records then only go to stderr when echo is on.
    pub fn open(path: &Path, level: LevelFilter, echo: bool) -> Self {
        if let Some(parent) = path.parent() {
            let _ = fs::create_dir_all(parent);
        }
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path);
        match file {
            Ok(f) => Self {
                file: Some(Mutex::new(f)),
                path: Some(path.to_path_buf()),
                level,
                echo,
            },
            Err(e) => {
                eprintln!("[logger] Failed to open log file {:?}: {}", path, e);
                Self {
                    file: None,
                    path: None,
                    level,
                    echo,
                }
            }
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Write a raw line. I/O errors are swallowed so logging never fails the
    /// caller.
    pub fn write_line(&self, line: &str) {
        if let Some(mutex) = &self.file
            && let Ok(mut file) = mutex.lock()
        {
            let _ = writeln!(file, "{}", line);
        }
    }
}

impl Log for SessionLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let line = format_line(record.level(), &record.args().to_string());
        if self.echo {
            eprintln!("{line}");
        }
        self.write_line(&line);
    }

    fn flush(&self) {
        if let Some(mutex) = &self.file
            && let Ok(mut file) = mutex.lock()
        {
            let _ = file.flush();
        }
    }
}

fn format_line(level: Level, msg: &str) -> String {
    format!("[{}] [{}] {}", timestamp(), level, msg)
}

/// Install the session logger as the global `log` backend.
///
/// * Creates (or truncates) the log file.
/// * Installs a panic hook that writes the panic message to the log before
///   propagating to the default handler.
///
/// Returns the log file path, or `None` if a logger was already installed or
/// the file could not be opened.
pub fn init(verbose: bool) -> Option<PathBuf> {
    let level = if verbose { LevelFilter::Debug } else { LevelFilter::Info };
    let logger: &'static SessionLogger = Box::leak(Box::new(SessionLogger::open(&log_file_path(), level, verbose)));
    if log::set_logger(logger).is_err() {
        return None;
    }
    log::set_max_level(level);

    logger.write_line(&format!("=== PixelPortal session started {} ===", human_timestamp()));
    if let Some(path) = logger.path() {
        logger.write_line(&format!("Log file: {}", path.display()));
    }
    logger.write_line("");

    let prev = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        logger.write_line(&format!("[{}] [PANIC] PANIC: {}", timestamp(), info));
        prev(info);
    }));

    logger.path().map(Path::to_path_buf)
}

fn log_file_path() -> PathBuf {
    data_dir().join("PixelPortal").join("pixelportal.log")
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
    // Linux / fallback
    if let Ok(xdg) = std::env::var("XDG_DATA_HOME") {
        return PathBuf::from(xdg);
    }
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".local").join("share");
    }
    PathBuf::from(".")
}

/// HH:MM:SS within the current UTC day.
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
