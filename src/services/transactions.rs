//! Admin-side transaction ledger queries: filtered search and bulk deletion.
use time::Date;

use crate::db::{
    models::transaction::{TransactionRecord, TransactionSearch},
    ConnectionPool,
};

/// Raw admin search filters as they arrive on the query string.
#[derive(Default)]
pub struct SearchFilters {
    pub source: Option<String>,
    pub reference: Option<String>,
    pub currency: Option<String>,
    pub status: Option<String>,
    pub q: Option<String>,
    pub min: Option<i64>,
    pub max: Option<i64>,
    pub from: Option<String>,
    pub to: Option<String>,
}

/// A bulk-delete request. Exactly one selection mode applies; `all` wins
/// over anything else supplied alongside it.
#[derive(Default)]
pub struct BulkDeleteCommand {
    pub all: bool,
    pub ids: Option<Vec<String>>,
    pub source: Option<String>,
    pub reference: Option<String>,
}

enum Selector {
    All,
    Ids(Vec<String>),
    Filter {
        source: Option<String>,
        reference: Option<String>,
    },
}

fn parse_day(field: &'static str, raw: &str) -> Result<Date, errors::TransactionQueryError> {
    let format = time::macros::format_description!("[year]-[month]-[day]");
    Date::parse(raw, format).map_err(|_parse| errors::TransactionQueryError::InvalidDate {
        field,
        value: raw.to_owned(),
    })
}

/// Validate raw filters into a typed search. Unknown statuses and malformed
/// dates are rejected here, before any query is built.
fn parse_filters(filters: SearchFilters) -> Result<TransactionSearch, errors::TransactionQueryError> {
    Ok(TransactionSearch {
        source: filters.source,
        reference: filters.reference,
        currency: filters.currency.map(|currency| currency.to_lowercase()),
        status: filters.status.as_deref().map(str::parse).transpose()?,
        q: filters.q,
        amount_min: filters.min,
        amount_max: filters.max,
        from: filters
            .from
            .as_deref()
            .map(|raw| parse_day("from", raw))
            .transpose()?,
        to: filters
            .to
            .as_deref()
            .map(|raw| parse_day("to", raw))
            .transpose()?,
    })
}

pub async fn search(
    filters: SearchFilters,
    db_conn: &ConnectionPool,
) -> Result<Vec<TransactionRecord>, errors::TransactionQueryError> {
    let search = parse_filters(filters)?;
    Ok(TransactionRecord::search(&search, db_conn).await?)
}

fn resolve_selector(command: BulkDeleteCommand) -> Result<Selector, errors::BulkDeleteError> {
    if command.all {
        return Ok(Selector::All);
    }
    if let Some(ids) = command.ids {
        if ids.is_empty() {
            return Err(errors::BulkDeleteError::NoSelector);
        }
        return Ok(Selector::Ids(ids));
    }
    if command.source.is_some() || command.reference.is_some() {
        return Ok(Selector::Filter {
            source: command.source,
            reference: command.reference,
        });
    }
    Err(errors::BulkDeleteError::NoSelector)
}

/// Delete ledger rows in bulk. Returns the number of rows removed.
pub async fn bulk_delete(
    command: BulkDeleteCommand,
    db_conn: &ConnectionPool,
) -> Result<u64, errors::BulkDeleteError> {
    match resolve_selector(command)? {
        Selector::All => Ok(TransactionRecord::delete_all(db_conn).await?),
        Selector::Ids(ids) => Ok(TransactionRecord::delete_by_ids(&ids, db_conn).await?),
        Selector::Filter { source, reference } => Ok(TransactionRecord::delete_by_filter(
            source.as_deref(),
            reference.as_deref(),
            db_conn,
        )
        .await?),
    }
}

pub mod errors {
    use crate::db::{errors::DatabaseError, models::transaction::errors::InvalidTransactionStatus};
    use thiserror::Error;

    #[derive(Error, Debug)]
    pub enum TransactionQueryError {
        #[error(transparent)]
        Storage(#[from] DatabaseError),
        #[error(transparent)]
        InvalidStatus(#[from] InvalidTransactionStatus),
        #[error("\"{value}\" is not a valid {field} date (expected YYYY-MM-DD)")]
        InvalidDate {
            field: &'static str,
            value: String,
        },
    }

    #[derive(Error, Debug)]
    pub enum BulkDeleteError {
        #[error(transparent)]
        Storage(#[from] DatabaseError),
        #[error("specify one of: all, ids, or a source/ref filter")]
        NoSelector,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::transaction::TransactionStatus;

    #[test]
    fn filters_validate_status_and_dates() {
        let parsed = parse_filters(SearchFilters {
            status: Some(String::from("succeeded")),
            currency: Some(String::from("LKR")),
            from: Some(String::from("2025-01-01")),
            to: Some(String::from("2025-01-31")),
            min: Some(100),
            max: Some(10_000),
            ..SearchFilters::default()
        })
        .unwrap();
        assert_eq!(parsed.status, Some(TransactionStatus::Succeeded));
        assert_eq!(parsed.currency.as_deref(), Some("lkr"));
        assert_eq!(parsed.amount_min, Some(100));
        assert!(parsed.from.is_some() && parsed.to.is_some());
    }

    #[test]
    fn unknown_status_filter_is_rejected() {
        let result = parse_filters(SearchFilters {
            status: Some(String::from("charged_back")),
            ..SearchFilters::default()
        });
        assert!(matches!(
            result,
            Err(errors::TransactionQueryError::InvalidStatus(_))
        ));
    }

    #[test]
    fn malformed_date_filter_is_rejected() {
        let result = parse_filters(SearchFilters {
            from: Some(String::from("01/31/2025")),
            ..SearchFilters::default()
        });
        assert!(matches!(
            result,
            Err(errors::TransactionQueryError::InvalidDate { field: "from", .. })
        ));
    }

    #[test]
    fn bulk_delete_requires_a_selector() {
        assert!(matches!(
            resolve_selector(BulkDeleteCommand::default()),
            Err(errors::BulkDeleteError::NoSelector)
        ));
        assert!(matches!(
            resolve_selector(BulkDeleteCommand {
                ids: Some(vec![]),
                ..BulkDeleteCommand::default()
            }),
            Err(errors::BulkDeleteError::NoSelector)
        ));
    }

    #[test]
    fn all_wins_over_other_selectors() {
        let selector = resolve_selector(BulkDeleteCommand {
            all: true,
            ids: Some(vec![String::from("pi_demo_1")]),
            source: Some(String::from("appointment")),
            reference: None,
        })
        .unwrap();
        assert!(matches!(selector, Selector::All));
    }

    #[test]
    fn ids_win_over_a_filter() {
        let selector = resolve_selector(BulkDeleteCommand {
            all: false,
            ids: Some(vec![String::from("pi_demo_1")]),
            source: Some(String::from("appointment")),
            reference: None,
        })
        .unwrap();
        assert!(matches!(selector, Selector::Ids(ids) if ids.len() == 1));
    }
}
