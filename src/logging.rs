//! Log subscriber setup.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Directives used when `RUST_LOG` is unset.
fn default_directives(level: &str) -> String {
    format!("git_relay={level},russh=warn,tower_http=debug")
}

/// Installs the global subscriber. `RUST_LOG` overrides `level`.
///
/// JSON output carries the current span so session and backend ids stay
/// attached to each event.
pub fn init_logging(level: &str, json_format: bool) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(level)));

    let registry = tracing_subscriber::registry().with(env_filter);
    if json_format {
        registry
            .with(fmt::layer().json().with_current_span(true))
            .init();
    } else {
        registry.with(fmt::layer()).init();
    }
}
