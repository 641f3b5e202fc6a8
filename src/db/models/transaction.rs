//! Models mapping to the `app_transaction` database table: the ledger of
//! charge attempts and their results. This table is the system of record for
//! "what did we charge, and for what".
use serde::{Deserialize, Serialize};
use sqlx::{query, query_as, FromRow, Postgres, QueryBuilder};
use time::{Date, PrimitiveDateTime, Time};
use uuid::Uuid;

use crate::db::{errors::DatabaseError, ConnectionPool};

/// The recorded state of a charge attempt. `requires_action` outcomes are
/// deliberately absent: unresolved step-up challenges are never written to
/// the ledger.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    PendingAction,
    Succeeded,
    Failed,
    Processing,
}

impl TransactionStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PendingAction => "pending_action",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Processing => "processing",
        }
    }
}

impl std::str::FromStr for TransactionStatus {
    type Err = errors::InvalidTransactionStatus;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "pending_action" => Ok(Self::PendingAction),
            "succeeded" => Ok(Self::Succeeded),
            "failed" => Ok(Self::Failed),
            "processing" => Ok(Self::Processing),
            _ => Err(errors::InvalidTransactionStatus(raw.to_owned())),
        }
    }
}

/// UPSERT model for an `app_transaction`. Used whenever a charge attempt
/// reaches a terminal or semi-terminal state.
pub struct TransactionInsert {
    /// The gateway's payment-intent reference.
    pub external_id: String,
    /// The charged amount in minor currency units (e.g. cents).
    pub amount_minor: i64,
    /// Lowercase three-letter currency code.
    pub currency: String,
    pub status: TransactionStatus,
    /// Free-text origin of the charge, e.g. "appointment" or "product_order".
    pub source_tag: String,
    /// External reference, e.g. an order or appointment id.
    pub reference_id: String,
    pub description: String,
}

/// A ledger row read back from the database.
#[derive(FromRow, Serialize)]
pub struct TransactionRecord {
    id: Uuid,
    pub external_id: String,
    pub amount_minor: i64,
    pub currency: String,
    pub status: String,
    pub source_tag: String,
    pub reference_id: String,
    pub description: String,
    created_at: PrimitiveDateTime,
}

/// Validated admin search filters. All present filters AND together.
#[derive(Default)]
pub struct TransactionSearch {
    /// Exact source tag.
    pub source: Option<String>,
    /// Case-insensitive substring of the reference id.
    pub reference: Option<String>,
    /// Lowercase currency code.
    pub currency: Option<String>,
    pub status: Option<TransactionStatus>,
    /// Free text matched against description, source tag and reference id.
    pub q: Option<String>,
    /// Inclusive amount bounds, minor units.
    pub amount_min: Option<i64>,
    pub amount_max: Option<i64>,
    /// Day-granularity creation bounds; `to` includes the whole day.
    pub from: Option<Date>,
    pub to: Option<Date>,
}

/// Escape LIKE wildcards in a user-supplied term and wrap it for a substring
/// match.
fn like_pattern(term: &str) -> String {
    let escaped = term
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{escaped}%")
}

impl TransactionInsert {
    /// Insert this ledger row, or refresh the row carrying the same external
    /// id with the latest state. A retried gateway response therefore yields
    /// exactly one row per charge.
    pub async fn store(self, db_client: &ConnectionPool) -> Result<TransactionRecord, DatabaseError> {
        Ok(query_as::<_, TransactionRecord>(
            "INSERT INTO app_transaction \
             (id, external_id, amount_minor, currency, status, source_tag, reference_id, description) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             ON CONFLICT (external_id) DO UPDATE SET \
             amount_minor = EXCLUDED.amount_minor, currency = EXCLUDED.currency, \
             status = EXCLUDED.status, description = EXCLUDED.description \
             RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(self.external_id)
        .bind(self.amount_minor)
        .bind(self.currency)
        .bind(self.status.as_str())
        .bind(self.source_tag)
        .bind(self.reference_id)
        .bind(self.description)
        .fetch_one(db_client)
        .await?)
    }
}

impl TransactionRecord {
    pub const fn id(&self) -> Uuid {
        self.id
    }
    /// Search the ledger with every supplied filter ANDed together, newest
    /// first.
    pub async fn search(
        params: &TransactionSearch,
        db_client: &ConnectionPool,
    ) -> Result<Vec<Self>, DatabaseError> {
        let mut builder: QueryBuilder<'_, Postgres> =
            QueryBuilder::new("SELECT * FROM app_transaction WHERE TRUE");
        if let Some(ref source) = params.source {
            builder.push(" AND source_tag = ").push_bind(source);
        }
        if let Some(ref reference) = params.reference {
            builder
                .push(" AND reference_id ILIKE ")
                .push_bind(like_pattern(reference));
        }
        if let Some(ref currency) = params.currency {
            builder.push(" AND currency = ").push_bind(currency);
        }
        if let Some(status) = params.status {
            builder.push(" AND status = ").push_bind(status.as_str());
        }
        if let Some(ref term) = params.q {
            let pattern = like_pattern(term);
            builder
                .push(" AND (description ILIKE ")
                .push_bind(pattern.clone())
                .push(" OR source_tag ILIKE ")
                .push_bind(pattern.clone())
                .push(" OR reference_id ILIKE ")
                .push_bind(pattern)
                .push(")");
        }
        if let Some(min) = params.amount_min {
            builder.push(" AND amount_minor >= ").push_bind(min);
        }
        if let Some(max) = params.amount_max {
            builder.push(" AND amount_minor <= ").push_bind(max);
        }
        if let Some(from) = params.from {
            builder
                .push(" AND created_at >= ")
                .push_bind(PrimitiveDateTime::new(from, Time::MIDNIGHT));
        }
        if let Some(to) = params.to {
            // Inclusive of the whole `to` day.
            let end = to.next_day().unwrap_or(to);
            builder
                .push(" AND created_at < ")
                .push_bind(PrimitiveDateTime::new(end, Time::MIDNIGHT));
        }
        builder.push(" ORDER BY created_at DESC");
        Ok(builder
            .build_query_as::<Self>()
            .fetch_all(db_client)
            .await?)
    }
    /// Delete every ledger row. Returns the number deleted.
    pub async fn delete_all(db_client: &ConnectionPool) -> Result<u64, DatabaseError> {
        Ok(query("DELETE FROM app_transaction")
            .execute(db_client)
            .await
            .map(|result| result.rows_affected())?)
    }
    /// Delete rows matched by id. Each supplied id is matched against both
    /// the internal row id and the gateway's external reference.
    pub async fn delete_by_ids(
        ids: &[String],
        db_client: &ConnectionPool,
    ) -> Result<u64, DatabaseError> {
        let internal: Vec<Uuid> = ids.iter().filter_map(|id| id.parse().ok()).collect();
        Ok(query("DELETE FROM app_transaction WHERE external_id = ANY($1) OR id = ANY($2)")
            .bind(ids)
            .bind(internal)
            .execute(db_client)
            .await
            .map(|result| result.rows_affected())?)
    }
    /// Delete rows matching a source tag and/or reference substring.
    pub async fn delete_by_filter(
        source: Option<&str>,
        reference: Option<&str>,
        db_client: &ConnectionPool,
    ) -> Result<u64, DatabaseError> {
        let mut builder: QueryBuilder<'_, Postgres> =
            QueryBuilder::new("DELETE FROM app_transaction WHERE TRUE");
        if let Some(source) = source {
            builder.push(" AND source_tag = ").push_bind(source.to_owned());
        }
        if let Some(reference) = reference {
            builder
                .push(" AND reference_id ILIKE ")
                .push_bind(like_pattern(reference));
        }
        Ok(builder
            .build()
            .execute(db_client)
            .await
            .map(|result| result.rows_affected())?)
    }
}

pub mod errors {
    use thiserror::Error;

    #[derive(Error, Debug)]
    #[error("\"{0}\" is not a recognized transaction status")]
    pub struct InvalidTransactionStatus(pub String);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_str() {
        for status in [
            TransactionStatus::PendingAction,
            TransactionStatus::Succeeded,
            TransactionStatus::Failed,
            TransactionStatus::Processing,
        ] {
            assert_eq!(status.as_str().parse::<TransactionStatus>().unwrap(), status);
        }
    }

    #[test]
    fn unknown_status_is_rejected() {
        assert!("requires_action".parse::<TransactionStatus>().is_err());
        assert!("SUCCEEDED".parse::<TransactionStatus>().is_err());
    }

    #[test]
    fn like_pattern_escapes_wildcards() {
        assert_eq!(like_pattern("ord_42"), "%ord\\_42%");
        assert_eq!(like_pattern("50%"), "%50\\%%");
        assert_eq!(like_pattern("plain"), "%plain%");
    }
}
