//! Demo gateway substituting deterministic fake responses when no Stripe
//! credentials are configured. Keeps the whole checkout flow usable in local
//! and showcase deployments without moving real money.
use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::constants::payments::DEMO_SECRET_SENTINEL;

use super::{
    errors::GatewayError, CardSummary, CardUpdate, ChargeRequest, CustomerRef, PaymentGateway,
    PaymentOutcome, RefundSummary,
};

/// The single demo customer everything belongs to.
const DEMO_CUSTOMER_REF: &str = "cus_demo_petiq";
/// Charging exactly this amount simulates a step-up authentication request,
/// so the client's additional-authentication path stays exercisable offline.
/// (The amount echoes Stripe's 4242 test-card convention.)
const DEMO_CHALLENGE_AMOUNT: i64 = 4242;

#[derive(Default)]
struct DemoState {
    sequence: u64,
    setup_intents_issued: u64,
    methods: HashMap<String, CardSummary>,
    /// Confirmed charge amounts by payment-intent reference, for refunds.
    charges: HashMap<String, i64>,
}

pub struct DemoGateway {
    state: Mutex<DemoState>,
}

impl DemoGateway {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(DemoState::default()),
        }
    }

    /// Place a card directly into the demo gateway, as if it had been
    /// tokenized and attached out of band. Used to seed showcase data.
    pub fn seed_card(&self, card: CardSummary) {
        let mut state = self.state.lock().expect("demo gateway state poisoned");
        state.methods.insert(card.external_id.clone(), card);
    }

    /// How many setup intents have been created so far.
    pub fn setup_intents_issued(&self) -> u64 {
        self.state
            .lock()
            .expect("demo gateway state poisoned")
            .setup_intents_issued
    }

    /// Deterministic card synthesized for an unknown-but-plausible method id,
    /// mimicking a method confirmed by the tokenization widget out of band.
    fn synthesize(method_id: &str) -> CardSummary {
        CardSummary {
            external_id: method_id.to_owned(),
            brand: String::from("visa"),
            last4: String::from("4242"),
            exp_month: 12,
            exp_year: 2030,
            billing_name: Some(String::from("Demo Cardholder")),
            owner: Some(String::from(DEMO_CUSTOMER_REF)),
        }
    }
}

impl Default for DemoGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PaymentGateway for DemoGateway {
    async fn resolve_customer(&self) -> Result<CustomerRef, GatewayError> {
        Ok(CustomerRef::new(DEMO_CUSTOMER_REF))
    }

    async fn create_setup_intent(&self, _customer: &CustomerRef) -> Result<String, GatewayError> {
        let mut state = self.state.lock().expect("demo gateway state poisoned");
        state.sequence += 1;
        state.setup_intents_issued += 1;
        Ok(format!(
            "seti_demo_{0}{DEMO_SECRET_SENTINEL}{0}",
            state.sequence
        ))
    }

    async fn retrieve_payment_method(&self, method_id: &str) -> Result<CardSummary, GatewayError> {
        let mut state = self.state.lock().expect("demo gateway state poisoned");
        if let Some(card) = state.methods.get(method_id) {
            return Ok(card.clone());
        }
        if method_id.starts_with("pm_") {
            let card = Self::synthesize(method_id);
            state.methods.insert(method_id.to_owned(), card.clone());
            return Ok(card);
        }
        Err(GatewayError::NotFound(format!(
            "no such payment method: {method_id}"
        )))
    }

    async fn list_payment_methods(
        &self,
        customer: &CustomerRef,
    ) -> Result<Vec<CardSummary>, GatewayError> {
        let state = self.state.lock().expect("demo gateway state poisoned");
        let mut cards: Vec<CardSummary> = state
            .methods
            .values()
            .filter(|card| card.owner.as_deref() == Some(customer.as_str()))
            .cloned()
            .collect();
        cards.sort_by(|a, b| a.external_id.cmp(&b.external_id));
        Ok(cards)
    }

    async fn update_payment_method(
        &self,
        method_id: &str,
        update: CardUpdate,
    ) -> Result<CardSummary, GatewayError> {
        if update.is_empty() {
            return Err(GatewayError::InvalidArgument(String::from(
                "nothing to update: supply a billing name or an expiry field",
            )));
        }
        let mut state = self.state.lock().expect("demo gateway state poisoned");
        let card = state.methods.get_mut(method_id).ok_or_else(|| {
            GatewayError::NotFound(format!("no such payment method: {method_id}"))
        })?;
        if let Some(name) = update.billing_name {
            card.billing_name = Some(name);
        }
        if let Some(month) = update.exp_month {
            card.exp_month = month;
        }
        if let Some(year) = update.exp_year {
            card.exp_year = year;
        }
        Ok(card.clone())
    }

    async fn detach_payment_method(&self, method_id: &str) -> Result<(), GatewayError> {
        let mut state = self.state.lock().expect("demo gateway state poisoned");
        // Absent is fine: detaching an already detached method is a no-op.
        state.methods.remove(method_id);
        Ok(())
    }

    async fn create_and_confirm_payment_intent(
        &self,
        customer: &CustomerRef,
        charge: ChargeRequest,
    ) -> Result<PaymentOutcome, GatewayError> {
        let mut state = self.state.lock().expect("demo gateway state poisoned");
        let card = state
            .methods
            .get(&charge.payment_method_id)
            .cloned()
            .or_else(|| {
                charge
                    .payment_method_id
                    .starts_with("pm_")
                    .then(|| Self::synthesize(&charge.payment_method_id))
            })
            .ok_or_else(|| {
                GatewayError::NotFound(format!(
                    "no such payment method: {}",
                    charge.payment_method_id
                ))
            })?;
        match card.owner {
            Some(ref owner) if owner == customer.as_str() => {}
            Some(_other) => return Err(GatewayError::Conflict),
            None => {
                let mut attached = card.clone();
                attached.owner = Some(customer.as_str().to_owned());
                state
                    .methods
                    .insert(attached.external_id.clone(), attached);
            }
        }
        state.sequence += 1;
        let external_id = format!("pi_demo_{}", state.sequence);
        if charge.amount_minor == DEMO_CHALLENGE_AMOUNT {
            return Ok(PaymentOutcome::RequiresAction {
                client_secret: format!("{external_id}{DEMO_SECRET_SENTINEL}action"),
                external_id,
                amount_minor: charge.amount_minor,
            });
        }
        state.charges.insert(external_id.clone(), charge.amount_minor);
        Ok(PaymentOutcome::Succeeded {
            external_id,
            amount_minor: charge.amount_minor,
        })
    }

    async fn refund(
        &self,
        payment_intent_id: &str,
        amount_minor: Option<i64>,
    ) -> Result<RefundSummary, GatewayError> {
        let mut state = self.state.lock().expect("demo gateway state poisoned");
        let charged = *state.charges.get(payment_intent_id).ok_or_else(|| {
            GatewayError::NotFound(format!("no such payment intent: {payment_intent_id}"))
        })?;
        state.sequence += 1;
        Ok(RefundSummary {
            external_id: format!("re_demo_{}", state.sequence),
            amount_minor: amount_minor.unwrap_or(charged),
            status: String::from("succeeded"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn foreign_card(id: &str) -> CardSummary {
        CardSummary {
            external_id: id.to_owned(),
            brand: String::from("mastercard"),
            last4: String::from("4444"),
            exp_month: 6,
            exp_year: 2031,
            billing_name: Some(String::from("Somebody Else")),
            owner: Some(String::from("cus_other")),
        }
    }

    fn charge_of(amount_minor: i64, method_id: &str) -> ChargeRequest {
        ChargeRequest {
            amount_minor,
            currency: String::from("lkr"),
            payment_method_id: method_id.to_owned(),
            description: String::from("test charge"),
            source_tag: String::from("product_order"),
            reference_id: String::from("ord_1"),
            idempotency_key: None,
        }
    }

    #[tokio::test]
    async fn setup_intent_secret_carries_the_demo_sentinel() {
        let gateway = DemoGateway::new();
        let customer = gateway.resolve_customer().await.unwrap();
        let secret = gateway.create_setup_intent(&customer).await.unwrap();
        assert!(secret.contains(DEMO_SECRET_SENTINEL));
    }

    #[tokio::test]
    async fn charges_against_demo_cards_succeed() {
        let gateway = DemoGateway::new();
        let customer = gateway.resolve_customer().await.unwrap();
        let outcome = gateway
            .create_and_confirm_payment_intent(&customer, charge_of(12_500, "pm_demo_card"))
            .await
            .unwrap();
        match outcome {
            PaymentOutcome::Succeeded {
                external_id,
                amount_minor,
            } => {
                assert!(external_id.starts_with("pi_demo_"));
                assert_eq!(amount_minor, 12_500);
            }
            other => panic!("expected success, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn challenge_amount_requires_further_authentication() {
        let gateway = DemoGateway::new();
        let customer = gateway.resolve_customer().await.unwrap();
        let outcome = gateway
            .create_and_confirm_payment_intent(&customer, charge_of(4242, "pm_demo_card"))
            .await
            .unwrap();
        assert!(matches!(outcome, PaymentOutcome::RequiresAction { .. }));
    }

    #[tokio::test]
    async fn charging_a_foreign_card_is_a_conflict() {
        let gateway = DemoGateway::new();
        gateway.seed_card(foreign_card("pm_foreign"));
        let customer = gateway.resolve_customer().await.unwrap();
        let result = gateway
            .create_and_confirm_payment_intent(&customer, charge_of(1000, "pm_foreign"))
            .await;
        assert!(matches!(result, Err(GatewayError::Conflict)));
    }

    #[tokio::test]
    async fn detach_is_idempotent() {
        let gateway = DemoGateway::new();
        gateway.retrieve_payment_method("pm_demo_card").await.unwrap();
        gateway.detach_payment_method("pm_demo_card").await.unwrap();
        gateway.detach_payment_method("pm_demo_card").await.unwrap();
        let customer = gateway.resolve_customer().await.unwrap();
        assert!(gateway
            .list_payment_methods(&customer)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn empty_update_is_rejected() {
        let gateway = DemoGateway::new();
        gateway.retrieve_payment_method("pm_demo_card").await.unwrap();
        let result = gateway
            .update_payment_method("pm_demo_card", CardUpdate::default())
            .await;
        assert!(matches!(result, Err(GatewayError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn refund_of_unknown_intent_is_not_found() {
        let gateway = DemoGateway::new();
        let result = gateway.refund("pi_missing", None).await;
        assert!(matches!(result, Err(GatewayError::NotFound(_))));
    }

    #[tokio::test]
    async fn refund_defaults_to_the_full_charged_amount() {
        let gateway = DemoGateway::new();
        let customer = gateway.resolve_customer().await.unwrap();
        let outcome = gateway
            .create_and_confirm_payment_intent(&customer, charge_of(9_900, "pm_demo_card"))
            .await
            .unwrap();
        let PaymentOutcome::Succeeded { external_id, .. } = outcome else {
            panic!("expected success");
        };
        let refund = gateway.refund(&external_id, None).await.unwrap();
        assert_eq!(refund.amount_minor, 9_900);
    }
}
