//! Checkout orchestration: validates input, sequences gateway calls, applies
//! the card-save business rules and mirrors results into local storage.
//!
//! The gateway is the source of truth throughout. Mirror writes are best
//! effort: a failed upsert is logged and never fails the parent request.
use std::sync::LazyLock;

use regex::Regex;
use serde_json::Number;

use crate::{
    constants::payments::SAVED_CARD_LIMIT,
    db::{
        models::{
            payment_method::PaymentMethodUpsert,
            transaction::{TransactionInsert, TransactionStatus},
        },
        ConnectionPool,
    },
    services::gateway::{
        CardSummary, CardUpdate, ChargeRequest, CustomerRef, PaymentGateway, PaymentOutcome,
        RefundSummary,
    },
};

static CURRENCY_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("^[a-z]{3}$").expect("currency pattern is valid"));

/// The opening move of a card-save flow: the secret the tokenization widget
/// confirms against, plus the customer everything will be attached to.
pub struct SetupIntentBegin {
    pub client_secret: String,
    pub customer: CustomerRef,
}

/// A charge request as accepted from the client, prior to validation. The
/// amount arrives as a raw JSON number so fractional values can be rejected
/// explicitly instead of being silently truncated.
pub struct ChargeCommand {
    pub amount: Number,
    pub currency: String,
    pub payment_method_id: String,
    pub source_tag: Option<String>,
    pub reference_id: Option<String>,
    pub description: Option<String>,
    pub idempotency_key: Option<String>,
}

/// What the client needs to render after a charge round trip.
pub enum ChargeConclusion {
    /// The charge reached a terminal or semi-terminal state and was recorded.
    Completed {
        external_id: String,
        status: TransactionStatus,
        amount_minor: i64,
    },
    /// The customer must complete a step-up authentication. Nothing is
    /// recorded in the ledger until the attempt resolves.
    ActionRequired {
        client_secret: String,
        amount_minor: i64,
    },
}

/// Begin an off-session card save. Counts the customer's saved cards first
/// and refuses before any tokenization secret is issued when the cap is
/// already reached.
pub async fn begin_card_save(
    gateway: &dyn PaymentGateway,
) -> Result<SetupIntentBegin, errors::CardSaveError> {
    let customer = gateway.resolve_customer().await?;
    let saved = gateway.list_payment_methods(&customer).await?.len() as i64;
    if saved >= SAVED_CARD_LIMIT {
        return Err(errors::CardSaveError::CardLimitReached {
            limit: SAVED_CARD_LIMIT,
        });
    }
    let client_secret = gateway.create_setup_intent(&customer).await?;
    Ok(SetupIntentBegin {
        client_secret,
        customer,
    })
}

/// Fetch a payment method the client reports as confirmed, verify it belongs
/// to the resolved customer and mirror it locally. The card cap is enforced
/// again here: the server, not the client, is the authority.
pub async fn register_card(
    gateway: &dyn PaymentGateway,
    db_conn: &ConnectionPool,
    method_id: &str,
) -> Result<CardSummary, errors::CardRegisterError> {
    let customer = gateway.resolve_customer().await?;
    let summary = gateway.retrieve_payment_method(method_id).await?;
    match summary.owner {
        Some(ref owner) if owner == customer.as_str() => {}
        _ => return Err(errors::CardRegisterError::WrongCustomer),
    }
    let others = gateway
        .list_payment_methods(&customer)
        .await?
        .into_iter()
        .filter(|card| card.external_id != method_id)
        .count() as i64;
    if others >= SAVED_CARD_LIMIT {
        return Err(errors::CardRegisterError::CardLimitReached {
            limit: SAVED_CARD_LIMIT,
        });
    }
    refresh_mirror(&summary, db_conn).await;
    Ok(summary)
}

/// List the customer's payment methods from the gateway, refreshing the
/// mirror as a side effect (write-through on read).
pub async fn list_cards(
    gateway: &dyn PaymentGateway,
    db_conn: &ConnectionPool,
) -> Result<Vec<CardSummary>, errors::CardListError> {
    let customer = gateway.resolve_customer().await?;
    let cards = gateway.list_payment_methods(&customer).await?;
    for card in &cards {
        refresh_mirror(card, db_conn).await;
    }
    Ok(cards)
}

/// Apply a partial update to a saved card. At least one of billing name or
/// an expiry field must be supplied; the card number is immutable.
pub async fn update_card(
    gateway: &dyn PaymentGateway,
    db_conn: &ConnectionPool,
    method_id: &str,
    update: CardUpdate,
) -> Result<CardSummary, errors::CardUpdateError> {
    if update.is_empty() {
        return Err(errors::CardUpdateError::NothingToUpdate);
    }
    if let Some(month) = update.exp_month {
        if !(1..=12).contains(&month) {
            return Err(errors::CardUpdateError::ExpiryMonthOutOfRange(month));
        }
    }
    if let Some(year) = update.exp_year {
        if !(1000..=9999).contains(&year) {
            return Err(errors::CardUpdateError::ExpiryYearOutOfRange(year));
        }
    }
    let summary = gateway.update_payment_method(method_id, update).await?;
    refresh_mirror(&summary, db_conn).await;
    Ok(summary)
}

/// Detach a card at the gateway and drop its mirror row. A method the
/// gateway already reports gone still counts as removed.
pub async fn remove_card(
    gateway: &dyn PaymentGateway,
    db_conn: &ConnectionPool,
    method_id: &str,
) -> Result<(), errors::CardRemoveError> {
    gateway.detach_payment_method(method_id).await?;
    if let Err(error) =
        crate::db::models::payment_method::PaymentMethodRecord::delete_by_external_id(
            method_id, db_conn,
        )
        .await
    {
        tracing::warn!(%error, method_id, "failed to drop mirror row for detached card");
    }
    Ok(())
}

/// Validate and execute a charge. Terminal and semi-terminal outcomes are
/// upserted into the transaction ledger; a step-up requirement is returned
/// to the caller with nothing persisted.
pub async fn charge(
    gateway: &dyn PaymentGateway,
    db_conn: &ConnectionPool,
    command: ChargeCommand,
) -> Result<ChargeConclusion, errors::ChargeError> {
    let amount_minor = validate_amount(&command.amount)?;
    let currency = normalize_currency(&command.currency)?;
    let source_tag = command.source_tag.unwrap_or_default();
    let reference_id = command.reference_id.unwrap_or_default();
    let description = command
        .description
        .filter(|description| !description.trim().is_empty())
        .unwrap_or_else(|| derive_description(&source_tag, &reference_id));
    let customer = gateway.resolve_customer().await?;
    let outcome = gateway
        .create_and_confirm_payment_intent(
            &customer,
            ChargeRequest {
                amount_minor,
                currency: currency.clone(),
                payment_method_id: command.payment_method_id,
                description: description.clone(),
                source_tag: source_tag.clone(),
                reference_id: reference_id.clone(),
                idempotency_key: command.idempotency_key,
            },
        )
        .await?;
    if let PaymentOutcome::RequiresAction {
        client_secret,
        amount_minor,
        ..
    } = &outcome
    {
        return Ok(ChargeConclusion::ActionRequired {
            client_secret: client_secret.clone(),
            amount_minor: *amount_minor,
        });
    }
    let entry = ledger_entry(&outcome, &currency, &source_tag, &reference_id, &description)
        .expect("terminal outcomes always produce a ledger entry");
    let external_id = entry.external_id.clone();
    let status = entry.status;
    if let Err(error) = entry.store(db_conn).await {
        tracing::error!(%error, external_id, "charge succeeded but ledger upsert failed");
    }
    Ok(ChargeConclusion::Completed {
        external_id,
        status,
        amount_minor,
    })
}

/// Refund a previous charge, in full when no amount is given.
pub async fn refund(
    gateway: &dyn PaymentGateway,
    payment_intent_id: &str,
    amount: Option<Number>,
) -> Result<RefundSummary, errors::ChargeError> {
    let amount_minor = amount.as_ref().map(validate_amount).transpose()?;
    Ok(gateway.refund(payment_intent_id, amount_minor).await?)
}

/// The ledger row a gateway outcome produces, if any. Step-up requirements
/// produce none: unresolved attempts never reach the ledger.
fn ledger_entry(
    outcome: &PaymentOutcome,
    currency: &str,
    source_tag: &str,
    reference_id: &str,
    description: &str,
) -> Option<TransactionInsert> {
    let (external_id, status, amount_minor) = match outcome {
        PaymentOutcome::Succeeded {
            external_id,
            amount_minor,
        } => (external_id, TransactionStatus::Succeeded, *amount_minor),
        PaymentOutcome::Processing {
            external_id,
            amount_minor,
        } => (external_id, TransactionStatus::Processing, *amount_minor),
        PaymentOutcome::RequiresAction { .. } => return None,
    };
    Some(TransactionInsert {
        external_id: external_id.clone(),
        amount_minor,
        currency: currency.to_owned(),
        status,
        source_tag: source_tag.to_owned(),
        reference_id: reference_id.to_owned(),
        description: description.to_owned(),
    })
}

/// Amounts are integers in minor currency units, strictly positive. A
/// fractional JSON number here almost always means the caller sent major
/// units, which would silently mischarge by a factor of 100.
fn validate_amount(amount: &Number) -> Result<i64, errors::ChargeError> {
    amount
        .as_i64()
        .filter(|minor| *minor > 0)
        .ok_or(errors::ChargeError::InvalidAmount)
}

fn normalize_currency(currency: &str) -> Result<String, errors::ChargeError> {
    let normalized = currency.trim().to_lowercase();
    if CURRENCY_CODE.is_match(&normalized) {
        Ok(normalized)
    } else {
        Err(errors::ChargeError::InvalidCurrency(currency.to_owned()))
    }
}

fn derive_description(source_tag: &str, reference_id: &str) -> String {
    match (source_tag.is_empty(), reference_id.is_empty()) {
        (false, false) => format!("Payment for {source_tag} {reference_id}"),
        (false, true) => format!("Payment for {source_tag}"),
        (true, false) => format!("Payment for {reference_id}"),
        (true, true) => String::from("PetIQ.LK payment"),
    }
}

/// Refresh one mirror row from a gateway summary. Failures are logged only:
/// the mirror is a cache, never the authority.
pub(crate) async fn refresh_mirror(summary: &CardSummary, db_conn: &ConnectionPool) {
    let upsert = PaymentMethodUpsert {
        external_id: summary.external_id.clone(),
        brand: summary.brand.clone(),
        last4: summary.last4.clone(),
        exp_month: summary.exp_month,
        exp_year: summary.exp_year,
        billing_name: summary.billing_name.clone().unwrap_or_default(),
        owner_customer_ref: summary.owner.clone().unwrap_or_default(),
    };
    if let Err(error) = upsert.store(db_conn).await {
        tracing::warn!(%error, external_id = %summary.external_id, "failed to refresh payment method mirror");
    }
}

pub mod errors {
    use crate::{db::errors::DatabaseError, services::gateway::GatewayError};
    use thiserror::Error;

    #[derive(Error, Debug)]
    pub enum CardSaveError {
        #[error(transparent)]
        Gateway(#[from] GatewayError),
        #[error("saved card limit of {limit} reached")]
        CardLimitReached { limit: i64 },
    }

    #[derive(Error, Debug)]
    pub enum CardRegisterError {
        #[error(transparent)]
        Gateway(#[from] GatewayError),
        #[error("saved card limit of {limit} reached")]
        CardLimitReached { limit: i64 },
        #[error("payment method is attached to a different customer")]
        WrongCustomer,
    }

    #[derive(Error, Debug)]
    pub enum CardListError {
        #[error(transparent)]
        Gateway(#[from] GatewayError),
    }

    #[derive(Error, Debug)]
    pub enum CardUpdateError {
        #[error(transparent)]
        Gateway(#[from] GatewayError),
        #[error("supply at least one of billing name, expiry month or expiry year")]
        NothingToUpdate,
        #[error("expiry month {0} is not within 1-12")]
        ExpiryMonthOutOfRange(i64),
        #[error("expiry year {0} is not a four-digit year")]
        ExpiryYearOutOfRange(i64),
    }

    #[derive(Error, Debug)]
    pub enum CardRemoveError {
        #[error(transparent)]
        Gateway(#[from] GatewayError),
    }

    #[derive(Error, Debug)]
    pub enum ChargeError {
        #[error(transparent)]
        Gateway(#[from] GatewayError),
        #[error("amount must be a positive integer in minor currency units")]
        InvalidAmount,
        #[error("\"{0}\" is not a three-letter currency code")]
        InvalidCurrency(String),
        #[error(transparent)]
        Storage(#[from] DatabaseError),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::gateway::DemoGateway;
    use std::time::Duration;

    /// A pool that points nowhere. Mirror and ledger writes against it fail
    /// fast and are absorbed by the best-effort logging paths.
    fn offline_pool() -> ConnectionPool {
        sqlx::postgres::PgPoolOptions::new()
            .acquire_timeout(Duration::from_millis(50))
            .connect_lazy("postgres://127.0.0.1:1/offline")
            .expect("lazy pool construction cannot fail")
    }

    fn charge_command(amount: Number) -> ChargeCommand {
        ChargeCommand {
            amount,
            currency: String::from("LKR"),
            payment_method_id: String::from("pm_demo_card"),
            source_tag: Some(String::from("appointment")),
            reference_id: Some(String::from("apt_77")),
            description: None,
            idempotency_key: Some(String::from("11111111-2222-3333-4444-555555555555")),
        }
    }

    #[test]
    fn fractional_amounts_are_rejected() {
        let fractional = Number::from_f64(4999.5).unwrap();
        assert!(matches!(
            validate_amount(&fractional),
            Err(errors::ChargeError::InvalidAmount)
        ));
    }

    #[test]
    fn non_positive_amounts_are_rejected() {
        assert!(validate_amount(&Number::from(0)).is_err());
        assert!(validate_amount(&Number::from(-500)).is_err());
        assert_eq!(validate_amount(&Number::from(4999)).unwrap(), 4999);
    }

    #[test]
    fn currency_is_normalized_to_lowercase() {
        assert_eq!(normalize_currency(" LKR ").unwrap(), "lkr");
        assert_eq!(normalize_currency("usd").unwrap(), "usd");
        assert!(normalize_currency("rupees").is_err());
        assert!(normalize_currency("lk").is_err());
        assert!(normalize_currency("lk1").is_err());
    }

    #[test]
    fn description_is_derived_from_source_and_reference() {
        assert_eq!(
            derive_description("appointment", "apt_77"),
            "Payment for appointment apt_77"
        );
        assert_eq!(derive_description("appointment", ""), "Payment for appointment");
        assert_eq!(derive_description("", ""), "PetIQ.LK payment");
    }

    #[test]
    fn step_up_outcomes_produce_no_ledger_entry() {
        let outcome = PaymentOutcome::RequiresAction {
            external_id: String::from("pi_demo_1"),
            client_secret: String::from("pi_demo_1_demo_secret_action"),
            amount_minor: 4242,
        };
        assert!(ledger_entry(&outcome, "lkr", "appointment", "apt_77", "d").is_none());
    }

    #[test]
    fn terminal_outcomes_produce_an_upsert_with_the_latest_status() {
        let outcome = PaymentOutcome::Succeeded {
            external_id: String::from("pi_demo_2"),
            amount_minor: 12_500,
        };
        let entry = ledger_entry(&outcome, "lkr", "product_order", "ord_9", "d").unwrap();
        assert_eq!(entry.external_id, "pi_demo_2");
        assert_eq!(entry.status, TransactionStatus::Succeeded);
        assert_eq!(entry.amount_minor, 12_500);
    }

    #[tokio::test]
    async fn card_limit_blocks_the_save_flow_before_tokenization() {
        let gateway = DemoGateway::new();
        for index in 0..3 {
            gateway
                .retrieve_payment_method(&format!("pm_seed_{index}"))
                .await
                .unwrap();
        }
        let result = begin_card_save(&gateway).await;
        assert!(matches!(
            result,
            Err(errors::CardSaveError::CardLimitReached { limit: 3 })
        ));
        // The rejection happened before any setup intent was created.
        assert_eq!(gateway.setup_intents_issued(), 0);
    }

    #[tokio::test]
    async fn card_save_proceeds_below_the_limit() {
        let gateway = DemoGateway::new();
        gateway.retrieve_payment_method("pm_seed_0").await.unwrap();
        let begin = begin_card_save(&gateway).await.unwrap();
        assert!(begin.client_secret.contains("_demo_secret_"));
        assert_eq!(gateway.setup_intents_issued(), 1);
    }

    #[tokio::test]
    async fn registering_a_foreign_card_is_refused() {
        let gateway = DemoGateway::new();
        gateway.seed_card(crate::services::gateway::CardSummary {
            external_id: String::from("pm_foreign"),
            brand: String::from("visa"),
            last4: String::from("1881"),
            exp_month: 3,
            exp_year: 2032,
            billing_name: None,
            owner: Some(String::from("cus_other")),
        });
        let result = register_card(&gateway, &offline_pool(), "pm_foreign").await;
        assert!(matches!(
            result,
            Err(errors::CardRegisterError::WrongCustomer)
        ));
    }

    #[tokio::test]
    async fn charging_with_a_fractional_amount_never_reaches_the_gateway() {
        let gateway = DemoGateway::new();
        let command = charge_command(Number::from_f64(4999.5).unwrap());
        let result = charge(&gateway, &offline_pool(), command).await;
        assert!(matches!(result, Err(errors::ChargeError::InvalidAmount)));
    }

    #[tokio::test]
    async fn successful_charges_complete_with_a_succeeded_status() {
        let gateway = DemoGateway::new();
        let conclusion = charge(&gateway, &offline_pool(), charge_command(Number::from(12_500)))
            .await
            .unwrap();
        match conclusion {
            ChargeConclusion::Completed {
                status,
                amount_minor,
                ..
            } => {
                assert_eq!(status, TransactionStatus::Succeeded);
                assert_eq!(amount_minor, 12_500);
            }
            ChargeConclusion::ActionRequired { .. } => panic!("expected completion"),
        }
    }

    #[tokio::test]
    async fn step_up_charges_return_the_client_secret_unrecorded() {
        let gateway = DemoGateway::new();
        let conclusion = charge(&gateway, &offline_pool(), charge_command(Number::from(4242)))
            .await
            .unwrap();
        assert!(matches!(
            conclusion,
            ChargeConclusion::ActionRequired { .. }
        ));
    }

    #[tokio::test]
    async fn update_requires_at_least_one_field() {
        let gateway = DemoGateway::new();
        gateway.retrieve_payment_method("pm_demo_card").await.unwrap();
        let result = update_card(
            &gateway,
            &offline_pool(),
            "pm_demo_card",
            CardUpdate::default(),
        )
        .await;
        assert!(matches!(
            result,
            Err(errors::CardUpdateError::NothingToUpdate)
        ));
    }

    #[tokio::test]
    async fn update_rejects_an_impossible_month() {
        let gateway = DemoGateway::new();
        gateway.retrieve_payment_method("pm_demo_card").await.unwrap();
        let result = update_card(
            &gateway,
            &offline_pool(),
            "pm_demo_card",
            CardUpdate {
                exp_month: Some(13),
                ..CardUpdate::default()
            },
        )
        .await;
        assert!(matches!(
            result,
            Err(errors::CardUpdateError::ExpiryMonthOutOfRange(13))
        ));
    }
}
