//! Severity-tagged trace output.
//!
//! `[DEBUG]` lines appear when the `TOYC_DEBUG` environment variable is set,
//! `[INFO]` lines when `TOYC_INFO` is set. Errors are not printed here; they
//! propagate as [`crate::error::CompileError`] and are reported once by `main`.

use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Debug,
    Info,
}

static DEBUG_ENABLED: OnceLock<bool> = OnceLock::new();
static INFO_ENABLED: OnceLock<bool> = OnceLock::new();

pub fn enabled(severity: Severity) -> bool {
    match severity {
        Severity::Debug => *DEBUG_ENABLED.get_or_init(|| std::env::var_os("TOYC_DEBUG").is_some()),
        Severity::Info => *INFO_ENABLED.get_or_init(|| std::env::var_os("TOYC_INFO").is_some()),
    }
}

pub fn print(severity: Severity, message: impl AsRef<str>) {
    if !enabled(severity) {
        return;
    }
    let tag = match severity {
        Severity::Debug => "[DEBUG]",
        Severity::Info => "[INFO]",
    };
    println!("{} {}", tag, message.as_ref());
}
