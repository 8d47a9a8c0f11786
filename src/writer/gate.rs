//! Owner-policy gate.
//!
//! Child rows belong to other principals, so the writer relaxes the store's
//! owner policy for the duration of a multi-table write. The policy flag is
//! session-wide, not per request: two writes sharing a session would close
//! the gate under each other. Every write through one gate is therefore
//! serialized from `open` until its matching close has completed.

use serde_json::json;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, error, warn};

use crate::store::{Procedure, RemoteStore};
use crate::{AggregateError, CompensationWarning, GateError};

#[derive(Clone, Debug)]
pub struct AuthorizationGate<S> {
    store: S,
    serial: Arc<Mutex<()>>,
}

async fn restore<S: RemoteStore>(store: &S) -> Result<(), GateError> {
    store
        .invoke_procedure(Procedure::RestoreOwnerPolicy, json!({}))
        .await
        .map(drop)
        .map_err(GateError::Close)
}

impl<S: RemoteStore> AuthorizationGate<S> {
    pub fn new(store: S) -> Self {
        Self { store, serial: Arc::new(Mutex::new(())) }
    }

    /// Relaxes the owner policy. Waits for any other write holding the gate.
    pub async fn open(&self) -> Result<GateLease<S>, GateError> {
        let guard = self.serial.clone().lock_owned().await;
        if let Err(source) = self
            .store
            .invoke_procedure(Procedure::RelaxOwnerPolicy, json!({}))
            .await
        {
            // the relax may have landed before the error came back
            if let Err(e) = self.close().await {
                warn!(error = %e, "could not restore owner policy after failed open");
            }
            drop(guard);
            return Err(GateError::Open(source));
        }
        debug!("write gate opened");
        Ok(GateLease { store: Some(self.store.clone()), guard: Some(guard) })
    }

    /// Restores the owner policy. Safe to call whether or not the gate is open.
    pub async fn close(&self) -> Result<(), GateError> {
        restore(&self.store).await
    }
}

/// Proof that the gate is open. Must be closed through [`GateLease::close`]
/// or [`GateLease::compensate`]; a lease dropped while still open (the caller
/// gave up mid-write) closes the gate from a background task.
#[must_use = "the write gate stays open until the lease is closed"]
pub struct GateLease<S: RemoteStore> {
    store: Option<S>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl<S: RemoteStore> GateLease<S> {
    pub async fn close(mut self) -> Result<(), GateError> {
        let Some(store) = self.store.clone() else {
            return Ok(());
        };
        // stays armed until restore returns, so a cancelled close still
        // restores from Drop
        let result = restore(&store).await;
        self.store = None;
        self.guard.take();
        if result.is_ok() {
            debug!("write gate closed");
        }
        result
    }

    /// Closes the gate after `cause` aborted the write. A close failure is
    /// logged and never replaces `cause`.
    pub async fn compensate(self, cause: &AggregateError) {
        if let Err(source) = self.close().await {
            let warning = CompensationWarning {
                step: cause.step(),
                product_id: cause.product_id(),
                source,
            };
            warn!(warning = %warning, cause = %cause, "compensation could not close the write gate");
        }
    }
}

impl<S: RemoteStore> Drop for GateLease<S> {
    fn drop(&mut self) {
        let Some(store) = self.store.take() else {
            return;
        };
        let guard = self.guard.take();
        warn!("write abandoned with the gate open, closing it in the background");
        match Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = restore(&store).await {
                        error!(error = %e, "background close of the write gate failed");
                    }
                    drop(guard);
                });
            }
            Err(_) => error!("no runtime left to close the write gate"),
        }
    }
}
