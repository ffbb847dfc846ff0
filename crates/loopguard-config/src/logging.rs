//! Structured logging utilities for loopguard components.
//!
//! Provides consistent logging with component prefixes and structured fields.
//!
//! # Usage
//!
//! ```ignore
//! use loopguard_config::{log_detect_debug, log_store_warn};
//!
//! log_detect_debug!("case 3.1 detected", folder = "inbox");
//! log_store_warn!("lock timeout", key = key.as_str());
//! ```

/// Component identifiers for log filtering
pub struct Component;

impl Component {
    pub const DETECT: &'static str = "DETECT";
    pub const QUARANTINE: &'static str = "QUARANTINE";
    pub const LEDGER: &'static str = "LEDGER";
    pub const STORE: &'static str = "STORE";
    pub const ADMIN: &'static str = "ADMIN";
}

/// Log levels for runtime configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// Parse a level name, falling back to `Info` for unknown names
    pub fn parse(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "error" => LogLevel::Error,
            "warn" | "warning" => LogLevel::Warn,
            "debug" => LogLevel::Debug,
            "trace" => LogLevel::Trace,
            _ => LogLevel::Info,
        }
    }

    fn as_filter(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

// === DETECT logging macros ===

#[macro_export]
macro_rules! log_detect_debug {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::debug!(component = "DETECT", $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_detect_info {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::info!(component = "DETECT", $($key = $value,)* $msg)
    };
}

// === QUARANTINE logging macros ===

#[macro_export]
macro_rules! log_quarantine_debug {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::debug!(component = "QUARANTINE", $($key = $value,)* $msg)
    };
}

// === LEDGER logging macros ===

#[macro_export]
macro_rules! log_ledger_debug {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::debug!(component = "LEDGER", $($key = $value,)* $msg)
    };
}

// === STORE logging macros ===

#[macro_export]
macro_rules! log_store_warn {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::warn!(component = "STORE", $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_store_debug {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::debug!(component = "STORE", $($key = $value,)* $msg)
    };
}

// === ADMIN logging macros ===

#[macro_export]
macro_rules! log_admin_warn {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::warn!(component = "ADMIN", $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_admin_info {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::info!(component = "ADMIN", $($key = $value,)* $msg)
    };
}

/// Initialize logging with the given level filter.
/// Call this once at application startup.
pub fn init_logging(level: LogLevel) {
    use tracing_subscriber::EnvFilter;

    let env_filter = EnvFilter::try_from_env("LOOPGUARD_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(level.as_filter()));

    // A subscriber may already be installed (tests, embedding gateways).
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
