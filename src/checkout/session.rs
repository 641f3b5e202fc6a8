//! The checkout context: what is being paid for. Resolved from navigation
//! state, URL query parameters or the local cache, in that priority order,
//! and re-persisted whenever it was read from the URL so a reload keeps it.
//! The cache is reached only through the [`ContextStore`] seam.
use std::collections::HashMap;

/// Cache keys, namespaced under one prefix so nothing else collides.
const TOTAL_KEY: &str = "petiq.checkout.total";
const CURRENCY_KEY: &str = "petiq.checkout.currency";
const SOURCE_KEY: &str = "petiq.checkout.source";
const REFERENCE_KEY: &str = "petiq.checkout.ref";

/// The serialization boundary to whatever persists across reloads (local
/// storage in the browser shell).
pub trait ContextStore {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&mut self, key: &str, value: &str);
}

/// Everything the checkout screens need to know about the pending payment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CheckoutContext {
    /// Decimal total in major units, as handed over by the cart or booking
    /// screens (e.g. "4999.50").
    pub total: String,
    pub currency: String,
    pub source_tag: String,
    pub reference_id: String,
}

impl CheckoutContext {
    /// Read the context from URL query parameters. Requires at least a total
    /// and a currency to be meaningful.
    pub fn from_query(query: &HashMap<String, String>) -> Option<Self> {
        let total = query.get("total")?;
        let currency = query.get("currency")?;
        Some(Self {
            total: total.clone(),
            currency: currency.clone(),
            source_tag: query.get("source").cloned().unwrap_or_default(),
            reference_id: query.get("ref").cloned().unwrap_or_default(),
        })
    }

    /// Read the context back from the cache.
    pub fn from_store(store: &dyn ContextStore) -> Option<Self> {
        let total = store.get(TOTAL_KEY)?;
        let currency = store.get(CURRENCY_KEY)?;
        Some(Self {
            total,
            currency,
            source_tag: store.get(SOURCE_KEY).unwrap_or_default(),
            reference_id: store.get(REFERENCE_KEY).unwrap_or_default(),
        })
    }

    /// Write the context into the cache.
    pub fn persist(&self, store: &mut dyn ContextStore) {
        store.set(TOTAL_KEY, &self.total);
        store.set(CURRENCY_KEY, &self.currency);
        store.set(SOURCE_KEY, &self.source_tag);
        store.set(REFERENCE_KEY, &self.reference_id);
    }

    /// Resolve the active context: navigation state wins, then the URL
    /// (re-persisted so a reload keeps it), then the cache.
    pub fn resolve(
        navigation: Option<Self>,
        query: &HashMap<String, String>,
        store: &mut dyn ContextStore,
    ) -> Option<Self> {
        if let Some(context) = navigation {
            return Some(context);
        }
        if let Some(context) = Self::from_query(query) {
            context.persist(store);
            return Some(context);
        }
        Self::from_store(store)
    }

    /// The total as integer minor units, converted exactly.
    pub fn total_minor_units(&self) -> Result<i64, errors::AmountError> {
        parse_minor_units(&self.total)
    }
}

/// Convert a decimal major-unit total into integer minor units without any
/// float arithmetic. Sub-cent fractions are rejected rather than rounded.
pub fn parse_minor_units(total: &str) -> Result<i64, errors::AmountError> {
    let trimmed = total.trim();
    let (whole, fraction) = trimmed
        .split_once('.')
        .map_or((trimmed, ""), |(whole, fraction)| (whole, fraction));
    if whole.is_empty() && fraction.is_empty() {
        return Err(errors::AmountError::Malformed(total.to_owned()));
    }
    if !whole.bytes().all(|byte| byte.is_ascii_digit())
        || !fraction.bytes().all(|byte| byte.is_ascii_digit())
    {
        return Err(errors::AmountError::Malformed(total.to_owned()));
    }
    if fraction.len() > 2 {
        return Err(errors::AmountError::SubCent(total.to_owned()));
    }
    let whole_value: i64 = if whole.is_empty() {
        0
    } else {
        whole
            .parse()
            .map_err(|_overflow| errors::AmountError::TooLarge(total.to_owned()))?
    };
    let fraction_value: i64 = match fraction.len() {
        0 => 0,
        1 => fraction
            .parse::<i64>()
            .map_or(0, |tenths| tenths * 10),
        _ => fraction.parse().unwrap_or(0),
    };
    let minor = whole_value
        .checked_mul(100)
        .and_then(|cents| cents.checked_add(fraction_value))
        .ok_or_else(|| errors::AmountError::TooLarge(total.to_owned()))?;
    if minor > 0 {
        Ok(minor)
    } else {
        Err(errors::AmountError::NonPositive(total.to_owned()))
    }
}

pub mod errors {
    use thiserror::Error;

    #[derive(Error, Debug, PartialEq, Eq)]
    pub enum AmountError {
        #[error("\"{0}\" is not a decimal amount")]
        Malformed(String),
        #[error("\"{0}\" has sub-cent precision")]
        SubCent(String),
        #[error("\"{0}\" is not a positive amount")]
        NonPositive(String),
        #[error("\"{0}\" exceeds the representable amount range")]
        TooLarge(String),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct MapStore(HashMap<String, String>);

    impl ContextStore for MapStore {
        fn get(&self, key: &str) -> Option<String> {
            self.0.get(key).cloned()
        }
        fn set(&mut self, key: &str, value: &str) {
            self.0.insert(key.to_owned(), value.to_owned());
        }
    }

    fn query_of(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|&(key, value)| (key.to_owned(), value.to_owned()))
            .collect()
    }

    fn context(total: &str) -> CheckoutContext {
        CheckoutContext {
            total: total.to_owned(),
            currency: String::from("lkr"),
            source_tag: String::from("appointment"),
            reference_id: String::from("apt_77"),
        }
    }

    #[test]
    fn navigation_state_wins_over_url_and_cache() {
        let mut store = MapStore::default();
        context("100").persist(&mut store);
        let query = query_of(&[("total", "200"), ("currency", "lkr")]);
        let resolved =
            CheckoutContext::resolve(Some(context("300")), &query, &mut store).unwrap();
        assert_eq!(resolved.total, "300");
    }

    #[test]
    fn url_context_is_re_persisted_to_the_cache() {
        let mut store = MapStore::default();
        let query = query_of(&[
            ("total", "4999.50"),
            ("currency", "lkr"),
            ("source", "product_order"),
            ("ref", "ord_9"),
        ]);
        let resolved = CheckoutContext::resolve(None, &query, &mut store).unwrap();
        assert_eq!(resolved.source_tag, "product_order");
        // A reload with a bare URL now restores the same context.
        let reloaded =
            CheckoutContext::resolve(None, &HashMap::new(), &mut store).unwrap();
        assert_eq!(reloaded, resolved);
    }

    #[test]
    fn empty_everything_resolves_to_nothing() {
        let mut store = MapStore::default();
        assert!(CheckoutContext::resolve(None, &HashMap::new(), &mut store).is_none());
    }

    #[test]
    fn totals_convert_exactly_to_minor_units() {
        assert_eq!(parse_minor_units("49.99").unwrap(), 4999);
        assert_eq!(parse_minor_units("49.9").unwrap(), 4990);
        assert_eq!(parse_minor_units("49").unwrap(), 4900);
        assert_eq!(parse_minor_units("0.05").unwrap(), 5);
        assert_eq!(parse_minor_units(".50").unwrap(), 50);
    }

    #[test]
    fn sub_cent_totals_are_rejected_not_rounded() {
        assert_eq!(
            parse_minor_units("49.995"),
            Err(errors::AmountError::SubCent(String::from("49.995")))
        );
    }

    #[test]
    fn malformed_and_non_positive_totals_are_rejected() {
        assert!(matches!(
            parse_minor_units("abc"),
            Err(errors::AmountError::Malformed(_))
        ));
        assert!(matches!(
            parse_minor_units("-5"),
            Err(errors::AmountError::Malformed(_))
        ));
        assert!(matches!(
            parse_minor_units("0.00"),
            Err(errors::AmountError::NonPositive(_))
        ));
        assert!(matches!(
            parse_minor_units(""),
            Err(errors::AmountError::Malformed(_))
        ));
    }
}
