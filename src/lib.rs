pub mod agents;
pub mod analysis;
pub mod config;
pub mod eval;
pub mod evidence_tracker;
pub mod models;
pub mod narrative;
pub mod rules;
pub mod snapshot;

use tracing_subscriber::EnvFilter;

/// Install the stderr log subscriber. `RUST_LOG` wins over the default filter.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .with_writer(std::io::stderr)
        .init();
}
