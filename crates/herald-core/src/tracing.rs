use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Filter used when `RUST_LOG` is unset: `info`, with per-statement SQL logs
/// held at `warn`.
pub const DEFAULT_DIRECTIVES: &str = "info,sqlx=warn,sea_orm=warn";

/// JSON lines on stdout, filtered by `RUST_LOG` or `default_directives`.
/// Only the first call installs a subscriber.
pub fn init_tracing(default_directives: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_directives))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json().with_current_span(true).with_target(true))
        .try_init();
}
