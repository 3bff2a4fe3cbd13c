//! Structured logging and panic reporting (spec §4.11).
//!
//! Ported from the teacher's `logging.rs`: an idempotent `init_logging`
//! plus a panic hook that captures the source location. The teacher routed
//! both through a `log::Log` impl that forwarded to the browser console via
//! `js_interop`; here there's no host console to forward to, so `init_logging`
//! installs a `tracing-subscriber` formatter instead, following the
//! tracing/tracing-subscriber stack the sibling `science` module already
//! depends on.

use std::sync::Once;
use tracing_subscriber::EnvFilter;

static INIT: Once = Once::new();

/// Installs the global tracing subscriber and panic hook. Safe to call more
/// than once; only the first call takes effect.
pub fn init_logging() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .try_init();

        std::panic::set_hook(Box::new(|info| {
            let payload = info.payload();
            let message = if let Some(s) = payload.downcast_ref::<&str>() {
                s.to_string()
            } else if let Some(s) = payload.downcast_ref::<String>() {
                s.clone()
            } else {
                "unspecified panic".to_string()
            };

            let location = info
                .location()
                .map(|loc| format!(" at {}:{}:{}", loc.file(), loc.line(), loc.column()))
                .unwrap_or_default();

            tracing::error!("kernel panic: {}{}", message, location);
        }));
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_logging_is_idempotent() {
        init_logging();
        init_logging();
    }
}
