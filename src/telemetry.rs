//! Structured logging setup.
//!
//! Logs go to stderr. `CORTEX_KG_LOG` takes `EnvFilter` directives and wins over the filter
//! passed in (normally `logging.filter` from the config).

use std::sync::Once;

use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

pub const LOG_ENV: &str = "CORTEX_KG_LOG";

static INIT: Once = Once::new();

/// Install the global subscriber. Later calls are no-ops.
pub fn init_tracing(default_filter: &str) {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_env(LOG_ENV)
            .or_else(|_| EnvFilter::try_new(default_filter))
            .unwrap_or_else(|_| EnvFilter::new("cortex_kg=info"));
        // another subscriber may already be installed by an embedding app
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .try_init();
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        init_tracing("cortex_kg=debug");
        init_tracing("not a [valid filter");
        tracing::info!("still logging");
    }
}
