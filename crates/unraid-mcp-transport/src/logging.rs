//! Tracing targets and subscriber setup.
//!
//! The library only emits events; installing a subscriber is left to the
//! binary. [`init`] is a convenience for binaries and tests that want the
//! usual `fmt` output filtered by `RUST_LOG` or the configured level.

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Target for query/mutation events.
pub const QUERY_TARGET: &str = "unraid_mcp_transport::query";

/// Target for subscription connection and dispatch events.
pub const SUBSCRIPTION_TARGET: &str = "unraid_mcp_transport::subscription";

/// Target for diagnostic probe events.
pub const DIAGNOSE_TARGET: &str = "unraid_mcp_transport::diagnose";

/// Install a global `fmt` subscriber.
///
/// `RUST_LOG` wins when set; otherwise `level` (e.g. `"info"` or
/// `"unraid_mcp_transport=debug"`) is used. Returns `false` if a global
/// subscriber was already installed, which makes repeated calls harmless.
pub fn init(level: &str) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        let _ = init("debug");
        assert!(!init("debug"));
    }

    #[test]
    fn test_targets_share_crate_prefix() {
        for target in [QUERY_TARGET, SUBSCRIPTION_TARGET, DIAGNOSE_TARGET] {
            assert!(target.starts_with("unraid_mcp_transport::"));
        }
    }
}
