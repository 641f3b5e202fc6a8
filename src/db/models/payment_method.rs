//! Models mapping to the `payment_method` database table. Mirrors card
//! payment methods tokenized at the gateway, for fast listing and reporting.
//! The gateway is the source of truth; rows here are a best-effort cache.
use serde::Serialize;
use sqlx::{query, query_as, FromRow};
use time::PrimitiveDateTime;

use crate::db::{errors::DatabaseError, ConnectionPool};

/// UPSERT model for a `payment_method`. Carries everything except the
/// database-assigned creation timestamp.
pub struct PaymentMethodUpsert {
    /// The gateway's opaque payment-method reference.
    pub external_id: String,
    /// The card brand as reported by the gateway, e.g. "visa".
    pub brand: String,
    /// The last four digits of the card number.
    pub last4: String,
    /// Expiry month, 1-12.
    pub exp_month: i64, // i64s are used internally to match Postgres BIGINT types
    /// Expiry year, four digits.
    pub exp_year: i64,
    /// The cardholder name from billing details.
    pub billing_name: String,
    /// The gateway customer the method is attached to.
    pub owner_customer_ref: String,
}

/// A mirrored payment method stored in the database. Can only be constructed
/// by reading it from the database.
#[derive(FromRow, Serialize)]
pub struct PaymentMethodRecord {
    pub external_id: String,
    pub brand: String,
    pub last4: String,
    pub exp_month: i64,
    pub exp_year: i64,
    pub billing_name: String,
    pub owner_customer_ref: String,
    created_at: PrimitiveDateTime,
}

impl PaymentMethodUpsert {
    /// Insert this mirror row, or refresh the existing row carrying the same
    /// external id. Last write wins; the external id is the gateway's own
    /// unique reference, so concurrent refreshes converge.
    pub async fn store(self, db_client: &ConnectionPool) -> Result<PaymentMethodRecord, DatabaseError> {
        Ok(query_as::<_, PaymentMethodRecord>(
            "INSERT INTO payment_method \
             (external_id, brand, last4, exp_month, exp_year, billing_name, owner_customer_ref) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             ON CONFLICT (external_id) DO UPDATE SET \
             brand = EXCLUDED.brand, last4 = EXCLUDED.last4, exp_month = EXCLUDED.exp_month, \
             exp_year = EXCLUDED.exp_year, billing_name = EXCLUDED.billing_name, \
             owner_customer_ref = EXCLUDED.owner_customer_ref \
             RETURNING *",
        )
        .bind(self.external_id)
        .bind(self.brand)
        .bind(self.last4)
        .bind(self.exp_month)
        .bind(self.exp_year)
        .bind(self.billing_name)
        .bind(self.owner_customer_ref)
        .fetch_one(db_client)
        .await?)
    }
}

impl PaymentMethodRecord {
    /// Retrieve all mirror rows belonging to a gateway customer, oldest first.
    pub async fn select_all_for_owner(
        owner_customer_ref: &str,
        db_client: &ConnectionPool,
    ) -> Result<Vec<Self>, DatabaseError> {
        Ok(query_as::<_, Self>(
            "SELECT * FROM payment_method WHERE owner_customer_ref = $1 ORDER BY created_at",
        )
        .bind(owner_customer_ref)
        .fetch_all(db_client)
        .await?)
    }
    /// Delete the mirror row for a detached payment method. Returns whether a
    /// row existed.
    pub async fn delete_by_external_id(
        external_id: &str,
        db_client: &ConnectionPool,
    ) -> Result<bool, DatabaseError> {
        Ok(query("DELETE FROM payment_method WHERE external_id = $1")
            .bind(external_id)
            .execute(db_client)
            .await
            .map(|result| result.rows_affected() > 0)?)
    }
}
