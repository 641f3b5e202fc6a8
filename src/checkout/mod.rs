//! The client-side checkout flow state machine.
//!
//! Drives the add-card / review-cards / pay / success screens. Everything
//! here is pure state: card data is only ever touched by the gateway's
//! tokenization widget, and all money-moving operations are delegated to the
//! payments routes. The flow mirrors its step and sub-mode into URL query
//! pairs so browser history restores the correct screen without re-running
//! any charge.
pub mod expiry;
pub mod flow;
pub mod session;
