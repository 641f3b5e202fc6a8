//! Routes for the card-save and checkout flow, interacts with the payments
//! service and the gateway seam.
use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Number;

use crate::{
    services::{
        gateway::{CardSummary, CardUpdate, GatewayError, RefundSummary},
        payments::{self, ChargeCommand, ChargeConclusion},
    },
    state::AppState,
    utils::httperror::HttpError,
};

pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/setup-intent", post(begin_setup_intent))
        .route("/payment-methods", get(list_payment_methods))
        .route(
            "/payment-methods/{method_id}",
            get(register_payment_method)
                .patch(update_payment_method)
                .delete(delete_payment_method),
        )
        .route("/payment-intent", post(create_payment_intent))
        .route("/refund", post(create_refund))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SetupIntentResponse {
    client_secret: String,
    customer: String,
}

async fn begin_setup_intent(
    State(state): State<AppState>,
) -> Result<Json<SetupIntentResponse>, HttpError> {
    let begin = payments::begin_card_save(state.gateway.as_ref()).await?;
    Ok(Json(SetupIntentResponse {
        client_secret: begin.client_secret,
        customer: begin.customer.as_str().to_owned(),
    }))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PaymentMethodResponse {
    id: String,
    brand: String,
    last4: String,
    exp_month: i64,
    exp_year: i64,
    billing_name: Option<String>,
}

impl From<CardSummary> for PaymentMethodResponse {
    fn from(card: CardSummary) -> Self {
        Self {
            id: card.external_id,
            brand: card.brand,
            last4: card.last4,
            exp_month: card.exp_month,
            exp_year: card.exp_year,
            billing_name: card.billing_name,
        }
    }
}

async fn list_payment_methods(
    State(state): State<AppState>,
) -> Result<Json<Vec<PaymentMethodResponse>>, HttpError> {
    let cards = payments::list_cards(state.gateway.as_ref(), &state.db_conn).await?;
    Ok(Json(cards.into_iter().map(Into::into).collect()))
}

async fn register_payment_method(
    State(state): State<AppState>,
    Path(method_id): Path<String>,
) -> Result<Json<PaymentMethodResponse>, HttpError> {
    let card = payments::register_card(state.gateway.as_ref(), &state.db_conn, &method_id).await?;
    Ok(Json(card.into()))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdatePaymentMethodRequest {
    name: Option<String>,
    exp_month: Option<i64>,
    exp_year: Option<i64>,
}

async fn update_payment_method(
    State(state): State<AppState>,
    Path(method_id): Path<String>,
    Json(body): Json<UpdatePaymentMethodRequest>,
) -> Result<Json<PaymentMethodResponse>, HttpError> {
    let card = payments::update_card(
        state.gateway.as_ref(),
        &state.db_conn,
        &method_id,
        CardUpdate {
            billing_name: body.name,
            exp_month: body.exp_month,
            exp_year: body.exp_year,
        },
    )
    .await?;
    Ok(Json(card.into()))
}

#[derive(Serialize)]
struct DeleteCardResponse {
    success: bool,
}

async fn delete_payment_method(
    State(state): State<AppState>,
    Path(method_id): Path<String>,
) -> Result<Json<DeleteCardResponse>, HttpError> {
    payments::remove_card(state.gateway.as_ref(), &state.db_conn, &method_id).await?;
    Ok(Json(DeleteCardResponse { success: true }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChargeRequestBody {
    amount: Number,
    currency: String,
    payment_method_id: String,
    source_tag: Option<String>,
    reference_id: Option<String>,
    description: Option<String>,
    idempotency_key: Option<String>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum ChargeResponse {
    #[serde(rename_all = "camelCase")]
    Completed {
        success: bool,
        id: String,
        status: &'static str,
        amount: i64,
    },
    #[serde(rename_all = "camelCase")]
    ActionRequired {
        requires_action: bool,
        client_secret: String,
        amount: i64,
    },
}

async fn create_payment_intent(
    State(state): State<AppState>,
    Json(body): Json<ChargeRequestBody>,
) -> Result<Json<ChargeResponse>, HttpError> {
    let conclusion = payments::charge(
        state.gateway.as_ref(),
        &state.db_conn,
        ChargeCommand {
            amount: body.amount,
            currency: body.currency,
            payment_method_id: body.payment_method_id,
            source_tag: body.source_tag,
            reference_id: body.reference_id,
            description: body.description,
            idempotency_key: body.idempotency_key,
        },
    )
    .await?;
    Ok(Json(match conclusion {
        ChargeConclusion::Completed {
            external_id,
            status,
            amount_minor,
        } => ChargeResponse::Completed {
            success: true,
            id: external_id,
            status: status.as_str(),
            amount: amount_minor,
        },
        ChargeConclusion::ActionRequired {
            client_secret,
            amount_minor,
        } => ChargeResponse::ActionRequired {
            requires_action: true,
            client_secret,
            amount: amount_minor,
        },
    }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefundRequestBody {
    payment_intent_id: String,
    amount: Option<Number>,
}

#[derive(Serialize)]
struct RefundResponse {
    success: bool,
    refund: RefundSummary,
}

async fn create_refund(
    State(state): State<AppState>,
    Json(body): Json<RefundRequestBody>,
) -> Result<Json<RefundResponse>, HttpError> {
    let refund = payments::refund(
        state.gateway.as_ref(),
        &body.payment_intent_id,
        body.amount,
    )
    .await?;
    Ok(Json(RefundResponse {
        success: true,
        refund,
    }))
}

impl From<GatewayError> for HttpError {
    fn from(error: GatewayError) -> Self {
        match error {
            GatewayError::NotFound(message) => Self::new(StatusCode::NOT_FOUND, Some(message)),
            GatewayError::Conflict => {
                tracing::warn!("attempted to use a payment method owned by a different customer");
                Self::new(
                    StatusCode::CONFLICT,
                    Some(String::from(
                        "payment method is attached to a different customer",
                    )),
                )
            }
            GatewayError::InvalidArgument(message) | GatewayError::PaymentFailed(message) => {
                Self::new(StatusCode::BAD_REQUEST, Some(message))
            }
            GatewayError::Api(message) => {
                tracing::warn!(gateway_error = %message, "gateway rejected the operation");
                Self::new(StatusCode::BAD_REQUEST, Some(message))
            }
        }
    }
}

impl From<payments::errors::CardSaveError> for HttpError {
    fn from(error: payments::errors::CardSaveError) -> Self {
        match error {
            payments::errors::CardSaveError::Gateway(err) => err.into(),
            payments::errors::CardSaveError::CardLimitReached { limit } => {
                tracing::info!(limit, "card save refused at the saved-card cap");
                Self::new(
                    StatusCode::CONFLICT,
                    Some(format!("You can keep at most {limit} saved cards")),
                )
            }
        }
    }
}

impl From<payments::errors::CardRegisterError> for HttpError {
    fn from(error: payments::errors::CardRegisterError) -> Self {
        match error {
            payments::errors::CardRegisterError::Gateway(err) => err.into(),
            payments::errors::CardRegisterError::CardLimitReached { limit } => Self::new(
                StatusCode::CONFLICT,
                Some(format!("You can keep at most {limit} saved cards")),
            ),
            payments::errors::CardRegisterError::WrongCustomer => {
                tracing::warn!("refused to mirror a payment method attached to another customer");
                Self::new(
                    StatusCode::CONFLICT,
                    Some(String::from(
                        "payment method is attached to a different customer",
                    )),
                )
            }
        }
    }
}

impl From<payments::errors::CardListError> for HttpError {
    fn from(error: payments::errors::CardListError) -> Self {
        match error {
            payments::errors::CardListError::Gateway(err) => err.into(),
        }
    }
}

impl From<payments::errors::CardUpdateError> for HttpError {
    fn from(error: payments::errors::CardUpdateError) -> Self {
        match error {
            payments::errors::CardUpdateError::Gateway(err) => err.into(),
            payments::errors::CardUpdateError::NothingToUpdate => Self::new(
                StatusCode::BAD_REQUEST,
                Some(String::from(
                    "supply at least one of billing name, expiry month or expiry year",
                )),
            ),
            payments::errors::CardUpdateError::ExpiryMonthOutOfRange(month) => Self::field(
                StatusCode::BAD_REQUEST,
                "expMonth",
                format!("expiry month {month} is not within 1-12"),
            ),
            payments::errors::CardUpdateError::ExpiryYearOutOfRange(year) => Self::field(
                StatusCode::BAD_REQUEST,
                "expYear",
                format!("expiry year {year} is not a four-digit year"),
            ),
        }
    }
}

impl From<payments::errors::CardRemoveError> for HttpError {
    fn from(error: payments::errors::CardRemoveError) -> Self {
        match error {
            payments::errors::CardRemoveError::Gateway(err) => err.into(),
        }
    }
}

impl From<payments::errors::ChargeError> for HttpError {
    fn from(error: payments::errors::ChargeError) -> Self {
        match error {
            payments::errors::ChargeError::Gateway(err) => err.into(),
            payments::errors::ChargeError::InvalidAmount => Self::field(
                StatusCode::BAD_REQUEST,
                "amount",
                String::from("amount must be a positive integer in minor currency units"),
            ),
            payments::errors::ChargeError::InvalidCurrency(code) => Self::field(
                StatusCode::BAD_REQUEST,
                "currency",
                format!("\"{code}\" is not a three-letter currency code"),
            ),
            payments::errors::ChargeError::Storage(err) => err.into(),
        }
    }
}
