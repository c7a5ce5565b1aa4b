use std::fmt;

/// Lightweight console-facing logger used throughout the daemon for human-readable,
/// single-line progress output. Distinct from [`super::logger::Logger`], which emits
/// structured (console or JSON) events for machine consumption; this one is for the
/// operator watching a terminal.
pub struct ConsoleLogger;

impl ConsoleLogger {
    pub fn debug(msg: &str) {
        if std::env::var("LXCD_DEBUG").is_ok() {
            println!("🔍 {}", msg);
        }
    }

    pub fn info(msg: &str) {
        println!("ℹ {}", msg);
    }

    pub fn progress(msg: &str) {
        println!("🔧 {}", msg);
    }

    pub fn success(msg: &str) {
        println!("✅ {}", msg);
    }

    pub fn warning(msg: &str) {
        eprintln!("⚠ {}", msg);
    }

    pub fn error(msg: &str) {
        eprintln!("❌ {}", msg);
    }

    pub fn error_with_context<E: fmt::Display>(context: &str, err: E) {
        eprintln!("❌ {}: {}", context, err);
    }
}
