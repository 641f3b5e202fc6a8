//! Live gateway implementation backed by the Stripe API.
use async_trait::async_trait;
use serde::Serialize;
use stripe::{
    AttachPaymentMethod, Client, CreateCustomer, CreatePaymentIntent, CreateRefund,
    CreateSetupIntent, Customer, CustomerId, Expandable, ListCustomers, ListPaymentMethods,
    PaymentIntent, PaymentIntentId, PaymentIntentStatus, PaymentMethod, PaymentMethodId,
    PaymentMethodTypeFilter, Refund, RequestStrategy, SetupIntent,
};

use super::{
    errors::GatewayError, CardSummary, CardUpdate, ChargeRequest, CustomerRef, PaymentGateway,
    PaymentOutcome, RefundSummary,
};

pub struct StripeGateway {
    client: Client,
    customer_email: String,
}

impl StripeGateway {
    pub fn new(secret_key: &str, customer_email: String) -> Self {
        Self {
            client: Client::new(secret_key),
            customer_email,
        }
    }
}

/// Map a Stripe transport/API error onto the gateway error taxonomy. Stripe's
/// own message is carried through verbatim.
fn map_error(error: &stripe::StripeError) -> GatewayError {
    match error {
        stripe::StripeError::Stripe(request) if request.http_status == 404 => {
            GatewayError::NotFound(error.to_string())
        }
        stripe::StripeError::Stripe(request) if request.http_status == 402 => {
            GatewayError::PaymentFailed(error.to_string())
        }
        _ => GatewayError::Api(error.to_string()),
    }
}

fn parse_customer_id(customer: &CustomerRef) -> Result<CustomerId, GatewayError> {
    customer
        .as_str()
        .parse()
        .map_err(|_parse| GatewayError::InvalidArgument(format!("invalid customer reference \"{}\"", customer.as_str())))
}

fn parse_method_id(method_id: &str) -> Result<PaymentMethodId, GatewayError> {
    method_id
        .parse()
        .map_err(|_parse| GatewayError::InvalidArgument(format!("invalid payment method reference \"{method_id}\"")))
}

fn owner_of(method: &PaymentMethod) -> Option<String> {
    method.customer.as_ref().map(|owner| match owner {
        Expandable::Id(id) => id.to_string(),
        Expandable::Object(customer) => customer.id.to_string(),
    })
}

/// Normalize Stripe's nested card object into a flat summary.
fn summarize(method: &PaymentMethod) -> CardSummary {
    let (brand, last4, exp_month, exp_year) = method.card.as_ref().map_or_else(
        || (String::from("unknown"), String::new(), 0, 0),
        |card| {
            (
                card.brand.clone(),
                card.last4.clone(),
                card.exp_month,
                card.exp_year,
            )
        },
    );
    CardSummary {
        external_id: method.id.to_string(),
        brand,
        last4,
        exp_month,
        exp_year,
        billing_name: method.billing_details.name.clone(),
        owner: owner_of(method),
    }
}

#[derive(Serialize)]
struct UpdateBillingDetailsParams {
    name: String,
}

#[derive(Serialize)]
struct UpdateCardParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    exp_month: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    exp_year: Option<i64>,
}

#[derive(Serialize)]
struct UpdatePaymentMethodParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    billing_details: Option<UpdateBillingDetailsParams>,
    #[serde(skip_serializing_if = "Option::is_none")]
    card: Option<UpdateCardParams>,
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    async fn resolve_customer(&self) -> Result<CustomerRef, GatewayError> {
        let mut list_params = ListCustomers::new();
        list_params.email = Some(self.customer_email.as_str());
        list_params.limit = Some(1);
        let existing = Customer::list(&self.client, &list_params)
            .await
            .map_err(|error| map_error(&error))?;
        if let Some(customer) = existing.data.into_iter().next() {
            return Ok(CustomerRef::new(customer.id.to_string()));
        }
        let mut create_params = CreateCustomer::new();
        create_params.email = Some(self.customer_email.as_str());
        let customer = Customer::create(&self.client, create_params)
            .await
            .map_err(|error| map_error(&error))?;
        Ok(CustomerRef::new(customer.id.to_string()))
    }

    async fn create_setup_intent(&self, customer: &CustomerRef) -> Result<String, GatewayError> {
        let mut create_params = CreateSetupIntent::new();
        create_params.customer = Some(parse_customer_id(customer)?);
        create_params.payment_method_types = Some(vec!["card".to_owned()]);
        let intent = SetupIntent::create(&self.client, create_params)
            .await
            .map_err(|error| map_error(&error))?;
        Ok(intent.client_secret.unwrap_or_default())
    }

    async fn retrieve_payment_method(&self, method_id: &str) -> Result<CardSummary, GatewayError> {
        let id = parse_method_id(method_id)?;
        let method = PaymentMethod::retrieve(&self.client, &id, &[])
            .await
            .map_err(|error| map_error(&error))?;
        Ok(summarize(&method))
    }

    async fn list_payment_methods(
        &self,
        customer: &CustomerRef,
    ) -> Result<Vec<CardSummary>, GatewayError> {
        let list_params = ListPaymentMethods {
            customer: Some(parse_customer_id(customer)?),
            type_: Some(PaymentMethodTypeFilter::Card),
            ..Default::default()
        };
        let methods = PaymentMethod::list(&self.client, &list_params)
            .await
            .map_err(|error| map_error(&error))?;
        Ok(methods.data.iter().map(summarize).collect())
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
        let id = parse_method_id(method_id)?;
        let params = UpdatePaymentMethodParams {
            billing_details: update
                .billing_name
                .map(|name| UpdateBillingDetailsParams { name }),
            card: if update.exp_month.is_some() || update.exp_year.is_some() {
                Some(UpdateCardParams {
                    exp_month: update.exp_month,
                    exp_year: update.exp_year,
                })
            } else {
                None
            },
        };
        let method: PaymentMethod = self
            .client
            .post_form(&format!("/payment_methods/{id}"), &params)
            .await
            .map_err(|error| map_error(&error))?;
        Ok(summarize(&method))
    }

    async fn detach_payment_method(&self, method_id: &str) -> Result<(), GatewayError> {
        let id = parse_method_id(method_id)?;
        match PaymentMethod::detach(&self.client, &id).await {
            Ok(_detached) => Ok(()),
            // Already detached/unknown: gone either way, report success.
            Err(error) => match map_error(&error) {
                GatewayError::NotFound(_) => Ok(()),
                other => Err(other),
            },
        }
    }

    async fn create_and_confirm_payment_intent(
        &self,
        customer: &CustomerRef,
        charge: ChargeRequest,
    ) -> Result<PaymentOutcome, GatewayError> {
        let customer_id = parse_customer_id(customer)?;
        let method_id = parse_method_id(&charge.payment_method_id)?;
        let method = PaymentMethod::retrieve(&self.client, &method_id, &[])
            .await
            .map_err(|error| map_error(&error))?;
        match owner_of(&method) {
            Some(owner) if owner == customer.as_str() => {}
            Some(_other) => return Err(GatewayError::Conflict),
            None => {
                PaymentMethod::attach(
                    &self.client,
                    &method_id,
                    AttachPaymentMethod {
                        customer: customer_id.clone(),
                    },
                )
                .await
                .map_err(|error| map_error(&error))?;
            }
        }
        let currency = charge.currency.parse().map_err(|_parse| {
            GatewayError::InvalidArgument(format!("unsupported currency \"{}\"", charge.currency))
        })?;
        let mut create_params = CreatePaymentIntent::new(charge.amount_minor, currency);
        create_params.customer = Some(customer_id);
        create_params.payment_method = Some(method_id);
        create_params.payment_method_types = Some(vec!["card".to_owned()]);
        create_params.confirm = Some(true);
        create_params.description = Some(charge.description.as_str());
        create_params.metadata = Some(
            [
                (String::from("source"), charge.source_tag.clone()),
                (String::from("reference"), charge.reference_id.clone()),
            ]
            .into_iter()
            .collect(),
        );
        let client = charge.idempotency_key.as_ref().map_or_else(
            || self.client.clone(),
            |key| {
                self.client
                    .clone()
                    .with_strategy(RequestStrategy::Idempotent(key.clone()))
            },
        );
        let intent = PaymentIntent::create(&client, create_params)
            .await
            .map_err(|error| map_error(&error))?;
        match intent.status {
            PaymentIntentStatus::Succeeded => Ok(PaymentOutcome::Succeeded {
                external_id: intent.id.to_string(),
                amount_minor: intent.amount,
            }),
            PaymentIntentStatus::RequiresAction => Ok(PaymentOutcome::RequiresAction {
                external_id: intent.id.to_string(),
                client_secret: intent.client_secret.clone().unwrap_or_default(),
                amount_minor: intent.amount,
            }),
            PaymentIntentStatus::Processing => Ok(PaymentOutcome::Processing {
                external_id: intent.id.to_string(),
                amount_minor: intent.amount,
            }),
            other => Err(GatewayError::PaymentFailed(format!(
                "payment was not completed (status {other:?})"
            ))),
        }
    }

    async fn refund(
        &self,
        payment_intent_id: &str,
        amount_minor: Option<i64>,
    ) -> Result<RefundSummary, GatewayError> {
        let intent_id: PaymentIntentId = payment_intent_id.parse().map_err(|_parse| {
            GatewayError::InvalidArgument(format!(
                "invalid payment intent reference \"{payment_intent_id}\""
            ))
        })?;
        let mut create_params = CreateRefund::new();
        create_params.payment_intent = Some(intent_id);
        create_params.amount = amount_minor;
        let refund = Refund::create(&self.client, create_params)
            .await
            .map_err(|error| map_error(&error))?;
        Ok(RefundSummary {
            external_id: refund.id.to_string(),
            amount_minor: refund.amount,
            status: refund.status.clone().unwrap_or_default(),
        })
    }
}
