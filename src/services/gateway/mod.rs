//! The single seam to the external card tokenization and charge provider.
//!
//! Callers depend on the [`PaymentGateway`] trait. The `live` implementation
//! talks to Stripe; the `demo` implementation substitutes deterministic fake
//! responses so the platform keeps working without gateway credentials.
use std::sync::Arc;

use async_trait::async_trait;

use crate::constants::stripe::{GATEWAY_CUSTOMER_EMAIL, PAYMENTS_DEMO_MODE, STRIPE_SECRET_KEY};

pub mod demo;
pub mod live;

pub use demo::DemoGateway;
pub use errors::GatewayError;
pub use live::StripeGateway;

/// The gateway's opaque reference to a customer record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CustomerRef(String);

impl CustomerRef {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// A payment method normalized from the gateway's nested card object into a
/// flat record.
#[derive(Clone, Debug)]
pub struct CardSummary {
    /// The gateway's opaque payment-method reference.
    pub external_id: String,
    pub brand: String,
    pub last4: String,
    pub exp_month: i64,
    pub exp_year: i64,
    pub billing_name: Option<String>,
    /// The gateway customer the method is attached to, when any.
    pub owner: Option<String>,
}

/// A partial update to a saved payment method. The card number is immutable
/// post-tokenization by gateway design, so it is not representable here.
#[derive(Clone, Debug, Default)]
pub struct CardUpdate {
    pub billing_name: Option<String>,
    pub exp_month: Option<i64>,
    pub exp_year: Option<i64>,
}

impl CardUpdate {
    pub const fn is_empty(&self) -> bool {
        self.billing_name.is_none() && self.exp_month.is_none() && self.exp_year.is_none()
    }
}

/// A charge to create and confirm against the gateway in one round trip.
#[derive(Clone, Debug)]
pub struct ChargeRequest {
    /// Amount in minor currency units. Validated positive by the caller.
    pub amount_minor: i64,
    /// Lowercase three-letter currency code.
    pub currency: String,
    pub payment_method_id: String,
    pub description: String,
    pub source_tag: String,
    pub reference_id: String,
    /// Per-attempt key forwarded to the gateway's native idempotency
    /// mechanism, so a retried submission cannot charge twice.
    pub idempotency_key: Option<String>,
}

/// The result of a create-and-confirm round trip that did not fail outright.
#[derive(Clone, Debug)]
pub enum PaymentOutcome {
    /// The charge reached a terminal success.
    Succeeded { external_id: String, amount_minor: i64 },
    /// The customer must complete a step-up authentication before the charge
    /// can settle.
    RequiresAction {
        external_id: String,
        client_secret: String,
        amount_minor: i64,
    },
    /// Accepted by the gateway but still settling.
    Processing { external_id: String, amount_minor: i64 },
}

/// A refund as reported back by the gateway.
#[derive(Clone, Debug, serde::Serialize)]
pub struct RefundSummary {
    pub external_id: String,
    pub amount_minor: i64,
    pub status: String,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Look up the platform customer by its configured identifying email,
    /// creating it at the gateway when absent. Resolved per request and
    /// passed explicitly; never cached across requests.
    async fn resolve_customer(&self) -> Result<CustomerRef, GatewayError>;
    /// Begin an off-session card-save flow. Returns the client secret the
    /// tokenization widget confirms against.
    async fn create_setup_intent(&self, customer: &CustomerRef) -> Result<String, GatewayError>;
    async fn retrieve_payment_method(&self, method_id: &str) -> Result<CardSummary, GatewayError>;
    async fn list_payment_methods(
        &self,
        customer: &CustomerRef,
    ) -> Result<Vec<CardSummary>, GatewayError>;
    async fn update_payment_method(
        &self,
        method_id: &str,
        update: CardUpdate,
    ) -> Result<CardSummary, GatewayError>;
    /// Detach a payment method. A method the gateway already reports gone is
    /// treated as successfully detached.
    async fn detach_payment_method(&self, method_id: &str) -> Result<(), GatewayError>;
    /// Create and confirm a payment intent. Attaches the payment method to
    /// the customer first when it is unattached, and refuses with
    /// [`GatewayError::Conflict`] when it belongs to a different customer.
    async fn create_and_confirm_payment_intent(
        &self,
        customer: &CustomerRef,
        charge: ChargeRequest,
    ) -> Result<PaymentOutcome, GatewayError>;
    async fn refund(
        &self,
        payment_intent_id: &str,
        amount_minor: Option<i64>,
    ) -> Result<RefundSummary, GatewayError>;
}

/// Select the gateway implementation from the environment. A missing secret
/// key degrades to demo mode rather than refusing to start.
pub fn from_environment() -> Arc<dyn PaymentGateway> {
    if *PAYMENTS_DEMO_MODE {
        tracing::info!("payments demo mode forced by configuration");
        return Arc::new(DemoGateway::new());
    }
    (*STRIPE_SECRET_KEY).as_ref().map_or_else(
        || {
            tracing::warn!("STRIPE_SECRET_KEY not configured, substituting the demo gateway");
            Arc::new(DemoGateway::new()) as Arc<dyn PaymentGateway>
        },
        |key| {
            Arc::new(StripeGateway::new(key, GATEWAY_CUSTOMER_EMAIL.clone()))
                as Arc<dyn PaymentGateway>
        },
    )
}

pub mod errors {
    use thiserror::Error;

    /// Errors surfaced by the payment gateway seam.
    #[derive(Error, Debug)]
    pub enum GatewayError {
        /// The gateway does not know the referenced object.
        #[error("{0}")]
        NotFound(String),
        /// The request was malformed or incomplete.
        #[error("{0}")]
        InvalidArgument(String),
        /// The payment method is attached to a different customer than the
        /// one resolved for this request.
        #[error("payment method is attached to a different customer")]
        Conflict,
        /// The gateway rejected the charge itself (e.g. card declined).
        /// Never retried automatically: card failures are not transient.
        #[error("{0}")]
        PaymentFailed(String),
        /// Any other gateway rejection, surfaced verbatim.
        #[error("{0}")]
        Api(String),
    }
}
