//! Tracing setup for hosts embedding the library.

use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "fieldbook_core=info";

/// Install a formatting subscriber filtered by `RUST_LOG`.
///
/// Falls back to `fieldbook_core=info` when `RUST_LOG` is unset or invalid.
/// Does nothing if a global subscriber is already installed.
pub fn init() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    if tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init()
        .is_err()
    {
        tracing::debug!("Tracing subscriber already installed");
    }
}
