//! Admin routes over the transaction ledger: filtered listing and bulk
//! deletion.
use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::{
    db::models::transaction::TransactionRecord,
    services::transactions::{self, BulkDeleteCommand, SearchFilters},
    state::AppState,
    utils::httperror::HttpError,
};

pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/", get(search_transactions))
        .route("/bulk-delete", post(bulk_delete_transactions))
}

#[derive(Deserialize)]
struct TransactionSearchQuery {
    source: Option<String>,
    #[serde(rename = "ref")]
    reference: Option<String>,
    currency: Option<String>,
    status: Option<String>,
    q: Option<String>,
    min: Option<i64>,
    max: Option<i64>,
    from: Option<String>,
    to: Option<String>,
}

#[derive(Serialize)]
struct TransactionListResponse {
    transactions: Vec<TransactionRecord>,
}

async fn search_transactions(
    State(state): State<AppState>,
    Query(params): Query<TransactionSearchQuery>,
) -> Result<Json<TransactionListResponse>, HttpError> {
    let transactions = transactions::search(
        SearchFilters {
            source: params.source,
            reference: params.reference,
            currency: params.currency,
            status: params.status,
            q: params.q,
            min: params.min,
            max: params.max,
            from: params.from,
            to: params.to,
        },
        &state.db_conn,
    )
    .await?;
    Ok(Json(TransactionListResponse { transactions }))
}

#[derive(Deserialize)]
struct BulkDeleteRequest {
    all: Option<bool>,
    ids: Option<Vec<String>>,
    source: Option<String>,
    #[serde(rename = "ref")]
    reference: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BulkDeleteResponse {
    success: bool,
    deleted_count: u64,
}

async fn bulk_delete_transactions(
    State(state): State<AppState>,
    Json(body): Json<BulkDeleteRequest>,
) -> Result<Json<BulkDeleteResponse>, HttpError> {
    let deleted_count = transactions::bulk_delete(
        BulkDeleteCommand {
            all: body.all.unwrap_or(false),
            ids: body.ids,
            source: body.source,
            reference: body.reference,
        },
        &state.db_conn,
    )
    .await?;
    Ok(Json(BulkDeleteResponse {
        success: true,
        deleted_count,
    }))
}

impl From<transactions::errors::TransactionQueryError> for HttpError {
    fn from(error: transactions::errors::TransactionQueryError) -> Self {
        match error {
            transactions::errors::TransactionQueryError::Storage(err) => err.into(),
            transactions::errors::TransactionQueryError::InvalidStatus(err) => {
                Self::field(StatusCode::BAD_REQUEST, "status", err.to_string())
            }
            transactions::errors::TransactionQueryError::InvalidDate { field, value } => {
                Self::field(
                    StatusCode::BAD_REQUEST,
                    field,
                    format!("\"{value}\" is not a valid date (expected YYYY-MM-DD)"),
                )
            }
        }
    }
}

impl From<transactions::errors::BulkDeleteError> for HttpError {
    fn from(error: transactions::errors::BulkDeleteError) -> Self {
        match error {
            transactions::errors::BulkDeleteError::Storage(err) => err.into(),
            transactions::errors::BulkDeleteError::NoSelector => Self::new(
                StatusCode::BAD_REQUEST,
                Some(String::from(
                    "specify one of: all, ids, or a source/ref filter",
                )),
            ),
        }
    }
}
