//! Process-wide `tracing` setup.
//!
//! The teacher initializes a Jaeger/OpenTelemetry pipeline alongside its `fmt`
//! layer (`utils::tracing_telemetry::init_tracing`); this system has no
//! distributed trace boundary worth exporting (a single process, no message
//! bus hop between components - see DESIGN.md), so only the structured `fmt`
//! layer is kept, driven by `RUST_LOG`.

use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Initializes the global `tracing` subscriber for `component` (used as the
/// default log level target when `RUST_LOG` is unset).
pub fn init_tracing(component: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{}=info,warn", component)));

    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();

    if tracing::subscriber::set_global_default(subscriber).is_err() {
        tracing::debug!("tracing subscriber already set");
    }
}
