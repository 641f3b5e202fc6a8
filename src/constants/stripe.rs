use std::{env::var, sync::LazyLock};

/// The Stripe secret key. Absence is not an error: the gateway degrades to
/// demo mode instead of refusing to start.
pub static STRIPE_SECRET_KEY: LazyLock<Option<String>> =
    LazyLock::new(|| var("STRIPE_SECRET_KEY").ok());

/// Forces demo mode even when a secret key is configured.
pub static PAYMENTS_DEMO_MODE: LazyLock<bool> = LazyLock::new(|| {
    var("PAYMENTS_DEMO_MODE")
        .map(|raw| matches!(raw.to_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false)
});

/// The identifying email of the gateway customer all saved cards and charges
/// belong to. The platform models a single storefront customer.
pub static GATEWAY_CUSTOMER_EMAIL: LazyLock<String> =
    LazyLock::new(|| var("GATEWAY_CUSTOMER_EMAIL").unwrap_or(String::from("petshop@petiq.lk")));
