//! Leveled, zero-dependency diagnostics for the Myriad runtime.
//!
//! Every message carries the module path it was emitted from, so runtime
//! traces read as `[DEBUG] myriad::runtime::class: registered Compartment`.
//! Output goes to stderr; the minimum level starts at `Info` and can be
//! raised or lowered at runtime or taken from the `MYRIAD_LOG` environment
//! variable.
//!
//! # Example
//!
//! ```
//! use myriad_log::{debug, info, Level};
//!
//! myriad_log::set_level(Level::Debug);
//!
//! info!("mirrored {} classes", 7);
//! debug!("device class at {:#x}", 0xd000_0000_0100u64);
//! ```

use std::fmt::{self, Arguments};
use std::str::FromStr;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

/// Environment variable read by [`init_from_env`].
pub const LOG_ENV: &str = "MYRIAD_LOG";

/// Severity of a diagnostic. Lower values are more severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Level {
    /// Contract violations and unrecoverable failures.
    Error = 0,
    /// Suspicious but tolerated situations.
    Warn = 1,
    /// Lifecycle milestones (class registration, mirroring passes).
    Info = 2,
    /// Per-class and per-instance detail.
    Debug = 3,
    /// Per-dispatch detail.
    Trace = 4,
}

impl Level {
    const ALL: [Level; 5] = [
        Level::Error,
        Level::Warn,
        Level::Info,
        Level::Debug,
        Level::Trace,
    ];

    const fn color_code(self) -> &'static str {
        match self {
            Level::Error => "\x1b[31m",
            Level::Warn => "\x1b[33m",
            Level::Info => "\x1b[32m",
            Level::Debug => "\x1b[36m",
            Level::Trace => "\x1b[35m",
        }
    }

    /// Upper-case name of the level.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Level::Error => "ERROR",
            Level::Warn => "WARN",
            Level::Info => "INFO",
            Level::Debug => "DEBUG",
            Level::Trace => "TRACE",
        }
    }

    fn from_u8(raw: u8) -> Level {
        Level::ALL.get(raw as usize).copied().unwrap_or(Level::Info)
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a level name cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseLevelError(String);

impl fmt::Display for ParseLevelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid log level: {}", self.0)
    }
}

impl std::error::Error for ParseLevelError {}

impl FromStr for Level {
    type Err = ParseLevelError;

    /// Parses a level name, ignoring case and surrounding whitespace.
    ///
    /// ```
    /// use myriad_log::Level;
    ///
    /// assert_eq!("debug".parse::<Level>(), Ok(Level::Debug));
    /// assert!("loud".parse::<Level>().is_err());
    /// ```
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim();
        Level::ALL
            .into_iter()
            .find(|level| level.as_str().eq_ignore_ascii_case(name))
            .ok_or_else(|| ParseLevelError(name.to_string()))
    }
}

/// Process-wide logger state.
pub struct Logger {
    level: AtomicU8,
    color: AtomicBool,
}

impl Logger {
    const fn new(level: Level) -> Self {
        Logger {
            level: AtomicU8::new(level as u8),
            color: AtomicBool::new(true),
        }
    }

    /// Sets the minimum level that will be written.
    pub fn set_level(&self, level: Level) {
        self.level.store(level as u8, Ordering::SeqCst);
    }

    /// Returns the current minimum level.
    #[must_use]
    pub fn level(&self) -> Level {
        Level::from_u8(self.level.load(Ordering::Relaxed))
    }

    /// Enables or disables ANSI colors.
    pub fn set_color(&self, enabled: bool) {
        self.color.store(enabled, Ordering::Relaxed);
    }

    /// Returns `true` if a message at `level` would be written.
    #[must_use]
    pub fn enabled(&self, level: Level) -> bool {
        level as u8 <= self.level.load(Ordering::Relaxed)
    }

    fn render(&self, level: Level, target: &str, args: Arguments<'_>) -> String {
        if self.color.load(Ordering::Relaxed) {
            format!("{}[{level}]\x1b[0m {target}: {args}", level.color_code())
        } else {
            format!("[{level}] {target}: {args}")
        }
    }
}

static LOGGER: OnceLock<Logger> = OnceLock::new();

/// Returns the process-wide logger, creating it at `Info` on first use.
pub fn get_logger() -> &'static Logger {
    LOGGER.get_or_init(|| Logger::new(Level::Info))
}

/// Sets the minimum level of the process-wide logger.
pub fn set_level(level: Level) {
    get_logger().set_level(level);
}

/// Configures the logger from `MYRIAD_LOG`.
///
/// An unset variable leaves the current level untouched; an unparsable value
/// is reported as an error and also leaves it untouched. `NO_COLOR` disables
/// ANSI colors.
///
/// # Errors
///
/// Returns [`ParseLevelError`] when `MYRIAD_LOG` holds an unknown level.
pub fn init_from_env() -> Result<(), ParseLevelError> {
    let logger = get_logger();
    if std::env::var_os("NO_COLOR").is_some() {
        logger.set_color(false);
    }
    match std::env::var(LOG_ENV) {
        Ok(value) => {
            logger.set_level(value.parse()?);
            Ok(())
        }
        Err(_) => Ok(()),
    }
}

#[doc(hidden)]
pub fn __log_with_target(level: Level, target: &str, args: Arguments<'_>) {
    let logger = get_logger();
    if logger.enabled(level) {
        eprintln!("{}", logger.render(level, target, args));
    }
}

/// Logs at an explicit level, tagging the message with the caller's module path.
#[macro_export]
macro_rules! log {
    (level: $level:expr, $($arg:tt)*) => {{
        let level = $level;
        if $crate::get_logger().enabled(level) {
            $crate::__log_with_target(level, module_path!(), format_args!($($arg)*));
        }
    }};
}

/// Logs at [`Level::Error`].
#[macro_export]
macro_rules! error {
    ($($arg:tt)*) => { $crate::log!(level: $crate::Level::Error, $($arg)*) };
}

/// Logs at [`Level::Warn`].
#[macro_export]
macro_rules! warn {
    ($($arg:tt)*) => { $crate::log!(level: $crate::Level::Warn, $($arg)*) };
}

/// Logs at [`Level::Info`].
#[macro_export]
macro_rules! info {
    ($($arg:tt)*) => { $crate::log!(level: $crate::Level::Info, $($arg)*) };
}

/// Logs at [`Level::Debug`].
#[macro_export]
macro_rules! debug {
    ($($arg:tt)*) => { $crate::log!(level: $crate::Level::Debug, $($arg)*) };
}

/// Logs at [`Level::Trace`].
#[macro_export]
macro_rules! trace {
    ($($arg:tt)*) => { $crate::log!(level: $crate::Level::Trace, $($arg)*) };
}
