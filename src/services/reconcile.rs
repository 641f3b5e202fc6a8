//! Periodic reconciliation of the card vault mirror against the gateway.
//!
//! Mirror writes elsewhere are fire-and-forget, so the mirror can drift when
//! a write fails or a method is detached out of band. This sweep makes the
//! drift bounded: gateway listings are re-applied and rows the gateway no
//! longer knows are dropped.
use std::collections::HashSet;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::{
    constants::payments::RECONCILE_INTERVAL_SECS,
    db::models::payment_method::PaymentMethodRecord,
    services::payments::refresh_mirror,
    state::AppState,
};

pub fn spawn(state: AppState) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker =
            tokio::time::interval(Duration::from_secs(*RECONCILE_INTERVAL_SECS));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(error) = sweep(&state).await {
                warn!(%error, "card vault reconciliation sweep failed");
            }
        }
    })
}

async fn sweep(state: &AppState) -> Result<(), errors::ReconcileError> {
    let gateway = state.gateway.as_ref();
    let customer = gateway.resolve_customer().await?;
    let live = gateway.list_payment_methods(&customer).await?;
    let mirrored =
        PaymentMethodRecord::select_all_for_owner(customer.as_str(), &state.db_conn).await?;
    for card in &live {
        refresh_mirror(card, &state.db_conn).await;
    }
    let live_ids: HashSet<&str> = live.iter().map(|card| card.external_id.as_str()).collect();
    let mut removed = 0usize;
    for record in &mirrored {
        if !live_ids.contains(record.external_id.as_str()) {
            PaymentMethodRecord::delete_by_external_id(&record.external_id, &state.db_conn)
                .await?;
            removed += 1;
        }
    }
    info!(refreshed = live.len(), removed, "card vault reconciled");
    Ok(())
}

pub mod errors {
    use crate::{db::errors::DatabaseError, services::gateway::GatewayError};
    use thiserror::Error;

    #[derive(Error, Debug)]
    pub enum ReconcileError {
        #[error(transparent)]
        Gateway(#[from] GatewayError),
        #[error(transparent)]
        Storage(#[from] DatabaseError),
    }
}
