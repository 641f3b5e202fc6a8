//! Constants related to the general configuration of the entire API and its deployment.

use std::{env::var, sync::LazyLock};

/// The socket address the HTTP listener binds to.
pub static API_BIND_ADDR: LazyLock<String> =
    LazyLock::new(|| var("API_BIND_ADDR").unwrap_or(String::from("0.0.0.0:8080")));

/// Comma-separated list of origins allowed through CORS. An empty list falls
/// back to allowing any origin, acceptable only for local demo deployments.
pub static CORS_ALLOWED_ORIGINS: LazyLock<Vec<String>> = LazyLock::new(|| {
    var("CORS_ALLOWED_ORIGINS")
        .map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|origin| !origin.is_empty())
                .map(str::to_owned)
                .collect()
        })
        .unwrap_or_default()
});
