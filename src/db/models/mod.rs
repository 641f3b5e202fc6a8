//! Defines data models (structs) which map directly to rows in the database.
pub mod payment_method;
pub mod transaction;
