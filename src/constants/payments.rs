//! Constants governing the card-save and checkout business rules.

use std::{env::var, sync::LazyLock};

/// The maximum number of payment methods a customer may keep on file.
/// Enforced by the orchestrator, mirrored by the client.
pub const SAVED_CARD_LIMIT: i64 = 3;

/// Substring marking a setup-intent client secret as synthesized by the demo
/// gateway, so callers can special-case it instead of invoking Stripe.js.
pub const DEMO_SECRET_SENTINEL: &str = "_demo_secret_";

/// Seconds between card-vault reconciliation sweeps.
pub static RECONCILE_INTERVAL_SECS: LazyLock<u64> = LazyLock::new(|| {
    var("RECONCILE_INTERVAL_SECS")
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(300)
});
