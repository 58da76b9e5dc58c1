//! Thin logging facade, kept separate from the rest of the workspace so
//! that the choice of backend (currently `tracing`, emitted through the
//! `log` macro names the rest of the crates are written against) can
//! change without touching call sites.

use std::sync::OnceLock;

use tracing_subscriber::{
    fmt, reload, util::SubscriberInitExt, EnvFilter, Layer, Registry,
};

/// Handle allowing the active log level to be changed at runtime, e.g. from
/// the `loglevel` HTTP resource.
static RELOAD_HANDLE: OnceLock<reload::Handle<EnvFilter, Registry>> = OnceLock::new();

/// Initializes the global tracing subscriber. Safe to call more than once;
/// subsequent calls are no-ops.
pub fn init(default_level: &str) {
    if RELOAD_HANDLE.get().is_some() {
        return;
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level.to_string()));
    let (filter, handle) = reload::Layer::new(filter);

    let subscriber = Registry::default()
        .with(filter)
        .with(fmt::layer().with_target(true));

    // Ignore the error: another part of the process may have raced us to
    // install a global subscriber, which is fine for our purposes.
    let _ = subscriber.try_init();
    let _ = RELOAD_HANDLE.set(handle);
}

/// Returns the current filter directive string, if logging has been
/// initialized.
pub fn current_level() -> Option<String> {
    RELOAD_HANDLE.get().and_then(|handle| {
        handle.with_current(|filter| filter.to_string()).ok()
    })
}

/// Changes the active log level, e.g. in response to a `PUT /loglevel`.
pub fn set_level(directive: &str) -> Result<(), String> {
    let handle = RELOAD_HANDLE.get().ok_or("logging not initialized")?;
    handle
        .reload(EnvFilter::new(directive.to_string()))
        .map_err(|e| e.to_string())
}

pub mod log {
    pub use tracing::{debug, error, info, trace, warn};
}
