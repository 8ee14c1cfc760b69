//! Diagnostics for the `objbridge` crates.
//!
//! Leveled, colored logging with automatic module path detection, plus the
//! `fatal!` channel used for invariant violations in the binding layer.
//!
//! # Example
//!
//! ```
//! use objbridge_log::{critical, warn, info, Level};
//!
//! objbridge_log::set_level(Level::Info);
//!
//! info!("registered {} types", 3);
//! warn!("invalid property id {}", 7);
//! critical!("constructor failed in instance_init");
//! ```
//!
//! # Configuration
//!
//! The logger reads its initial configuration from the environment the first
//! time it is used:
//!
//! - `OBJBRIDGE_LOG`: minimum level (`error`, `critical`, `warn`, `info`, `debug`, `trace`)
//! - `OBJBRIDGE_FATAL`: what `fatal!` does after reporting (`abort` or `panic`)

use std::cell::RefCell;
use std::fmt::Arguments;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicU8, Ordering};

/// Log levels representing the severity of diagnostics.
///
/// Lower numeric values indicate higher severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    /// Failures that end the current operation
    Error = 0,
    /// Broken invariants the process can still survive
    Critical = 1,
    /// Recoverable misuse, such as an unknown property id
    Warn = 2,
    /// Informational messages
    Info = 3,
    /// Registration and dispatch details
    Debug = 4,
    /// Most detailed tracing information
    Trace = 5,
}

impl Level {
    const fn color_code(&self) -> &'static str {
        match self {
            Level::Error => "\x1b[31m",    // Red
            Level::Critical => "\x1b[91m", // Bright red
            Level::Warn => "\x1b[33m",     // Yellow
            Level::Info => "\x1b[32m",     // Green
            Level::Debug => "\x1b[36m",    // Cyan
            Level::Trace => "\x1b[35m",    // Magenta
        }
    }

    /// Returns the string representation of this log level.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Level::Error => "ERROR",
            Level::Critical => "CRITICAL",
            Level::Warn => "WARN",
            Level::Info => "INFO",
            Level::Debug => "DEBUG",
            Level::Trace => "TRACE",
        }
    }

    const fn from_u8(raw: u8) -> Level {
        match raw {
            0 => Level::Error,
            1 => Level::Critical,
            2 => Level::Warn,
            3 => Level::Info,
            4 => Level::Debug,
            _ => Level::Trace,
        }
    }

    /// Parses a string into a Level.
    ///
    /// # Example
    ///
    /// ```
    /// use objbridge_log::Level;
    ///
    /// assert_eq!(Level::from_str("critical"), Ok(Level::Critical));
    /// assert_eq!(Level::from_str("INFO"), Ok(Level::Info));
    /// assert!(Level::from_str("invalid").is_err());
    /// ```
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Result<Self, String> {
        match s.trim().to_uppercase().as_str() {
            "ERROR" => Ok(Level::Error),
            "CRITICAL" => Ok(Level::Critical),
            "WARN" | "WARNING" => Ok(Level::Warn),
            "INFO" => Ok(Level::Info),
            "DEBUG" => Ok(Level::Debug),
            "TRACE" => Ok(Level::Trace),
            _ => Err(format!("Invalid log level: {s}")),
        }
    }
}

/// What a fatal report does once it has been written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatalMode {
    /// Terminate the process with `std::process::abort`.
    Abort = 0,
    /// Unwind with a panic carrying the report. Used by tests.
    Panic = 1,
}

impl FatalMode {
    /// Parses `abort` or `panic`.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Result<Self, String> {
        match s.trim().to_lowercase().as_str() {
            "abort" => Ok(FatalMode::Abort),
            "panic" => Ok(FatalMode::Panic),
            _ => Err(format!("Invalid fatal mode: {s}")),
        }
    }
}

/// Logger configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// Minimum level that is written out.
    pub level: Level,
    /// Behavior of `fatal!`.
    pub fatal: FatalMode,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            level: Level::Info,
            fatal: FatalMode::Abort,
        }
    }
}

impl Config {
    /// Environment variable holding the minimum level.
    pub const LEVEL_VAR: &'static str = "OBJBRIDGE_LOG";
    /// Environment variable holding the fatal mode.
    pub const FATAL_VAR: &'static str = "OBJBRIDGE_FATAL";

    /// Builds a configuration from `OBJBRIDGE_LOG` and `OBJBRIDGE_FATAL`.
    ///
    /// Unset or unparsable variables keep their defaults.
    pub fn from_env() -> Self {
        let mut config = Config::default();
        if let Some(level) = std::env::var(Self::LEVEL_VAR)
            .ok()
            .and_then(|v| Level::from_str(&v).ok())
        {
            config.level = level;
        }
        if let Some(fatal) = std::env::var(Self::FATAL_VAR)
            .ok()
            .and_then(|v| FatalMode::from_str(&v).ok())
        {
            config.fatal = fatal;
        }
        config
    }
}

/// The global logger instance.
///
/// Level and fatal mode are atomics so they can be changed at any time from
/// any thread. Use it as a singleton via `get_logger()`.
pub struct Logger {
    level: AtomicU8,
    fatal: AtomicU8,
}

impl Logger {
    const fn new(config: Config) -> Self {
        Logger {
            level: AtomicU8::new(config.level as u8),
            fatal: AtomicU8::new(config.fatal as u8),
        }
    }

    /// Sets the minimum log level.
    pub fn set_level(&self, level: Level) {
        self.level.store(level as u8, Ordering::SeqCst);
    }

    /// Returns the current minimum log level.
    pub fn level(&self) -> Level {
        Level::from_u8(self.level.load(Ordering::Relaxed))
    }

    /// Sets the fatal mode.
    pub fn set_fatal_mode(&self, mode: FatalMode) {
        self.fatal.store(mode as u8, Ordering::SeqCst);
    }

    /// Returns the current fatal mode.
    pub fn fatal_mode(&self) -> FatalMode {
        match self.fatal.load(Ordering::Relaxed) {
            1 => FatalMode::Panic,
            _ => FatalMode::Abort,
        }
    }

    /// Checks if a message at the given level would be written.
    pub fn enabled(&self, level: Level) -> bool {
        level as u8 <= self.level.load(Ordering::Relaxed)
    }

    /// Applies a whole configuration.
    pub fn configure(&self, config: Config) {
        self.set_level(config.level);
        self.set_fatal_mode(config.fatal);
    }
}

static LOGGER: OnceLock<Logger> = OnceLock::new();

/// Returns the global logger, initializing it from the environment on first use.
pub fn get_logger() -> &'static Logger {
    LOGGER.get_or_init(|| Logger::new(Config::from_env()))
}

/// Applies `config` to the global logger.
pub fn init(config: Config) {
    get_logger().configure(config);
}

/// Sets the minimum log level for the global logger.
pub fn set_level(level: Level) {
    get_logger().set_level(level);
}

/// Sets the minimum log level from a string.
pub fn set_level_from_str(s: &str) -> Result<(), String> {
    let level = Level::from_str(s)?;
    set_level(level);
    Ok(())
}

/// Sets the fatal mode for the global logger.
pub fn set_fatal_mode(mode: FatalMode) {
    get_logger().set_fatal_mode(mode);
}

/// One diagnostic recorded by [`capture`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub level: Level,
    pub target: String,
    pub message: String,
}

thread_local! {
    static CAPTURE: RefCell<Option<Vec<Record>>> = const { RefCell::new(None) };
}

/// Runs `f` and returns every diagnostic emitted on this thread while it ran.
///
/// Captured messages are recorded whatever the configured level is. Captures
/// nest; the inner one sees only its own messages.
///
/// ```
/// use objbridge_log::{capture, warn, Level};
///
/// let ((), records) = capture(|| warn!("invalid property id {}", 3));
/// assert_eq!(records.len(), 1);
/// assert_eq!(records[0].level, Level::Warn);
/// ```
pub fn capture<R>(f: impl FnOnce() -> R) -> (R, Vec<Record>) {
    let outer = CAPTURE.with(|c| c.borrow_mut().replace(Vec::new()));
    let result = f();
    let records = CAPTURE.with(|c| std::mem::replace(&mut *c.borrow_mut(), outer));
    (result, records.unwrap_or_default())
}

fn capturing() -> bool {
    CAPTURE.with(|c| c.borrow().is_some())
}

#[doc(hidden)]
pub fn __enabled(level: Level) -> bool {
    get_logger().enabled(level) || capturing()
}

#[doc(hidden)]
pub fn __log_with_target(level: Level, target: &str, args: Arguments) {
    static RESET: &str = "\x1b[0m";

    CAPTURE.with(|c| {
        if let Some(records) = c.borrow_mut().as_mut() {
            records.push(Record {
                level,
                target: target.to_string(),
                message: args.to_string(),
            });
        }
    });

    if !get_logger().enabled(level) {
        return;
    }

    let color = level.color_code();
    let level_str = level.as_str();

    eprintln!("{color}[{level_str}]{RESET} {target}: {args}");
}

#[doc(hidden)]
pub fn __fatal(target: &str, args: Arguments) -> ! {
    let message = args.to_string();
    CAPTURE.with(|c| {
        if let Some(records) = c.borrow_mut().as_mut() {
            records.push(Record {
                level: Level::Error,
                target: target.to_string(),
                message: message.clone(),
            });
        }
    });
    eprintln!("\x1b[31m[FATAL]\x1b[0m {target}: {message}");

    #[cfg(feature = "backtrace")]
    eprintln!("{:?}", backtrace::Backtrace::new());

    match get_logger().fatal_mode() {
        FatalMode::Abort => std::process::abort(),
        FatalMode::Panic => panic!("fatal: {message}"),
    }
}

/// The primary logging macro.
///
/// # Example
///
/// ```
/// use objbridge_log::{log, Level};
///
/// log!(level: Level::Info, "This is an info message: {}", 42);
/// ```
#[macro_export]
macro_rules! log {
    (level: $level:expr, $($arg:tt)*) => {
        {
            if $crate::__enabled($level) {
                $crate::__log_with_target(
                    $level,
                    module_path!(),
                    format_args!($($arg)*)
                );
            }
        }
    };
}

/// Logs a message at the Error level.
#[macro_export]
macro_rules! error {
    ($($arg:tt)*) => {
        $crate::log!(level: $crate::Level::Error, $($arg)*)
    };
}

/// Logs a message at the Critical level.
#[macro_export]
macro_rules! critical {
    ($($arg:tt)*) => {
        $crate::log!(level: $crate::Level::Critical, $($arg)*)
    };
}

/// Logs a message at the Warn level.
#[macro_export]
macro_rules! warn {
    ($($arg:tt)*) => {
        $crate::log!(level: $crate::Level::Warn, $($arg)*)
    };
}

/// Logs a message at the Info level.
#[macro_export]
macro_rules! info {
    ($($arg:tt)*) => {
        $crate::log!(level: $crate::Level::Info, $($arg)*)
    };
}

/// Logs a message at the Debug level.
#[macro_export]
macro_rules! debug {
    ($($arg:tt)*) => {
        $crate::log!(level: $crate::Level::Debug, $($arg)*)
    };
}

/// Logs a message at the Trace level.
#[macro_export]
macro_rules! trace {
    ($($arg:tt)*) => {
        $crate::log!(level: $crate::Level::Trace, $($arg)*)
    };
}

/// Reports a broken invariant and terminates.
///
/// Always written, whatever the level. Depending on the [`FatalMode`] this
/// aborts the process or panics with the report.
///
/// ```should_panic
/// objbridge_log::set_fatal_mode(objbridge_log::FatalMode::Panic);
/// objbridge_log::fatal!("missing object");
/// ```
#[macro_export]
macro_rules! fatal {
    ($($arg:tt)*) => {
        $crate::__fatal(module_path!(), format_args!($($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_ordering() {
        assert!(Level::Error < Level::Critical);
        assert!(Level::Critical < Level::Warn);
        assert!(Level::Warn < Level::Info);
        assert!(Level::Info < Level::Debug);
        assert!(Level::Debug < Level::Trace);
    }

    #[test]
    fn test_level_from_str() {
        assert_eq!(Level::from_str("error"), Ok(Level::Error));
        assert_eq!(Level::from_str("Critical"), Ok(Level::Critical));
        assert_eq!(Level::from_str("warning"), Ok(Level::Warn));
        assert_eq!(Level::from_str(" trace "), Ok(Level::Trace));
        assert!(Level::from_str("loud").is_err());
    }

    #[test]
    fn test_fatal_mode_from_str() {
        assert_eq!(FatalMode::from_str("abort"), Ok(FatalMode::Abort));
        assert_eq!(FatalMode::from_str("PANIC"), Ok(FatalMode::Panic));
        assert!(FatalMode::from_str("ignore").is_err());
    }

    #[test]
    fn test_logger_level_filtering() {
        let logger = Logger::new(Config::default());

        assert!(logger.enabled(Level::Critical));
        assert!(logger.enabled(Level::Info));
        assert!(!logger.enabled(Level::Debug));

        logger.set_level(Level::Warn);
        assert!(logger.enabled(Level::Critical));
        assert!(!logger.enabled(Level::Info));
    }

    #[test]
    fn test_logger_configure() {
        let logger = Logger::new(Config::default());
        logger.configure(Config {
            level: Level::Trace,
            fatal: FatalMode::Panic,
        });
        assert_eq!(logger.level(), Level::Trace);
        assert_eq!(logger.fatal_mode(), FatalMode::Panic);
    }

    #[test]
    fn test_capture_records_below_level() {
        let ((), records) = capture(|| {
            trace!("dispatch {}", 1);
            critical!("constructor failed");
        });
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].level, Level::Trace);
        assert_eq!(records[0].message, "dispatch 1");
        assert_eq!(records[1].level, Level::Critical);
        assert!(records[1].target.starts_with("objbridge_log"));
    }

    #[test]
    fn test_capture_nests() {
        let (inner, outer) = capture(|| {
            warn!("outer");
            let ((), inner) = capture(|| warn!("inner"));
            inner
        });
        assert_eq!(inner.len(), 1);
        assert_eq!(inner[0].message, "inner");
        assert_eq!(outer.len(), 1);
        assert_eq!(outer[0].message, "outer");
    }

    #[test]
    fn test_capture_is_per_thread() {
        let ((), records) = capture(|| {
            std::thread::spawn(|| warn!("elsewhere")).join().unwrap();
        });
        assert!(records.is_empty());
    }

    #[test]
    fn test_fatal_panics_in_panic_mode() {
        set_fatal_mode(FatalMode::Panic);
        let (result, records) = capture(|| std::panic::catch_unwind(|| fatal!("wrong object type")));
        assert!(result.is_err());
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].message, "wrong object type");
    }
}
