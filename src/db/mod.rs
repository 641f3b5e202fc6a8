//! Contains database models and interaction code.
pub mod models;
use crate::constants::db as constants;
use sqlx::postgres::PgPoolOptions;

/// An alias for the underlying DBMS specific pool type.
pub type ConnectionPool = sqlx::PgPool;

/// Initiate a pooled connection to the database.
pub async fn connect() -> Result<ConnectionPool, errors::DatabaseError> {
    Ok(PgPoolOptions::new()
        .max_connections(8)
        .connect(&constants::DB_URL)
        .await?)
}

pub mod errors {
    use thiserror::Error;

    #[derive(Error, Debug)]
    #[error(transparent)]
    pub struct DatabaseError(#[from] sqlx::Error);
}
