//! Logging bootstrap shared by the reorganizer crates
//!
//! Usage:
//! - Set REORG_LOG=off (default) - no logs
//! - Set REORG_LOG=info - scan and migration progress
//! - Set REORG_LOG=debug - per-object and per-ledger-write detail
//!
//! Library crates log through the `log` facade directly; only binaries call `init`.

use std::sync::Once;

/// Environment variable consulted by `init_diagnostics`
pub const LOG_ENV: &str = "REORG_LOG";

static INIT: Once = Once::new();

/// Map a REORG_LOG value to a level filter.
///
/// Unknown values fall back to `Info`; the second element reports whether the
/// value was recognised so the caller can warn once logging is up.
pub fn level_from_str(value: &str) -> (log::LevelFilter, bool) {
    match value.trim().to_ascii_lowercase().as_str() {
        "off" | "" => (log::LevelFilter::Off, true),
        "error" => (log::LevelFilter::Error, true),
        "warn" => (log::LevelFilter::Warn, true),
        "info" => (log::LevelFilter::Info, true),
        "debug" => (log::LevelFilter::Debug, true),
        "trace" => (log::LevelFilter::Trace, true),
        _ => (log::LevelFilter::Info, false),
    }
}

/// Initialize diagnostics based on the REORG_LOG environment variable
///
/// This should be called once at application startup. It's safe to call
/// multiple times - subsequent calls will be ignored.
pub fn init_diagnostics() {
    INIT.call_once(|| {
        let value = std::env::var(LOG_ENV).unwrap_or_else(|_| "off".to_string());
        let (level, known) = level_from_str(&value);
        if level == log::LevelFilter::Off {
            return;
        }

        let _ = env_logger::Builder::new()
            .filter_level(level)
            .format_timestamp_millis()
            .target(env_logger::Target::Stderr)
            .try_init();

        if !known {
            log::warn!("Unknown {} value '{}', using 'info'", LOG_ENV, value);
        }
    });
}

/// Re-export the init function for convenience
pub use init_diagnostics as init;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_safe_to_call_multiple_times() {
        // Should not panic when called multiple times
        init_diagnostics();
        init_diagnostics();
        init_diagnostics();
    }

    #[test]
    fn test_level_mapping() {
        assert_eq!(level_from_str("off"), (log::LevelFilter::Off, true));
        assert_eq!(level_from_str("DEBUG"), (log::LevelFilter::Debug, true));
        assert_eq!(level_from_str(" warn "), (log::LevelFilter::Warn, true));
        assert_eq!(level_from_str("chatty"), (log::LevelFilter::Info, false));
    }
}
