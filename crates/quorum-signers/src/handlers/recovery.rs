//! Time-locked recovery signers.
//!
//! A recovery leaf is a sapient leaf whose verifier is the recovery module.
//! The module queues payloads per recovery signer; each becomes signable once
//! its time lock has elapsed. The module owns the time locks; the handler
//! compares them with its clock and wakes its subscribers when one ends.

use async_trait::async_trait;
use log::{debug, warn};
use quorum_core::{Address, Hash32, LeafSignature, SapientKind, SapientSignature, SignerRef};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::task::AbortHandle;

use crate::clock::Clock;
use crate::handler::{
    Handler, HandlerKind, SignerStatus, SigningRequest, StatusListener, StatusNotifier,
    Subscription, UnavailableReason,
};
use crate::SignerError;

/// A payload queued for recovery on one wallet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueuedPayload {
    /// Recovery signer that queued it.
    pub signer: Address,
    pub digest: Hash32,
    /// Unix seconds at which the time lock ends.
    pub end_timestamp: u64,
}

/// The recovery module as seen from off-chain.
#[async_trait]
pub trait RecoveryModule: Send + Sync {
    async fn queued_payloads(&self, wallet: &Address) -> Result<Vec<QueuedPayload>, SignerError>;

    /// Signature bytes the module accepts for `signer` on `digest`.
    async fn encode_signature(
        &self,
        signer: &Address,
        image_hash: &Hash32,
        digest: &Hash32,
    ) -> Result<Vec<u8>, SignerError>;
}

pub struct RecoveryHandler {
    module_address: Address,
    module: Arc<dyn RecoveryModule>,
    clock: Arc<dyn Clock>,
    notifier: StatusNotifier,
    /// Pending wake-ups keyed by the time lock they wait for.
    wakeups: Arc<Mutex<HashMap<u64, AbortHandle>>>,
}

impl RecoveryHandler {
    pub fn new(
        module_address: Address,
        module: Arc<dyn RecoveryModule>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            module_address,
            module,
            clock,
            notifier: StatusNotifier::new(),
            wakeups: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn module_address(&self) -> Address {
        self.module_address
    }

    /// Tell subscribers the queue may have changed.
    pub fn queue_changed(&self) {
        self.notifier.notify();
    }

    /// Notify subscribers once the clock reaches `end_timestamp`.
    fn wake_at(&self, end_timestamp: u64) {
        let mut wakeups = self.wakeups.lock().unwrap_or_else(|e| e.into_inner());
        if wakeups.contains_key(&end_timestamp) {
            return;
        }
        let clock = self.clock.clone();
        let notifier = self.notifier.clone();
        let pending = self.wakeups.clone();
        let task = tokio::spawn(async move {
            clock.wait_until(end_timestamp).await;
            pending
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(&end_timestamp);
            debug!("Recovery time lock ended at {}", end_timestamp);
            notifier.notify();
        });
        wakeups.insert(end_timestamp, task.abort_handle());
    }

    fn recovery_signer(&self, signer: &SignerRef) -> Option<Hash32> {
        if signer.address == self.module_address {
            signer.image_hash
        } else {
            None
        }
    }

    /// Earliest-unlocking queue entry for the requested digest.
    async fn queued_for(
        &self,
        request: &SigningRequest,
    ) -> Result<Option<QueuedPayload>, SignerError> {
        let queued = self.module.queued_payloads(&request.wallet).await?;
        Ok(queued
            .into_iter()
            .filter(|entry| entry.digest == request.digest)
            .min_by_key(|entry| entry.end_timestamp))
    }
}

#[async_trait]
impl Handler for RecoveryHandler {
    fn kind(&self) -> HandlerKind {
        HandlerKind::Recovery
    }

    fn on_status_change(&self, listener: StatusListener) -> Subscription {
        self.notifier.subscribe(listener)
    }

    async fn status(&self, signer: &SignerRef, request: &SigningRequest) -> SignerStatus {
        if self.recovery_signer(signer).is_none() {
            return SignerStatus::unavailable(UnavailableReason::MissingCredential);
        }
        match self.queued_for(request).await {
            Ok(None) => SignerStatus::unavailable(UnavailableReason::NoQueuedPayload),
            Ok(Some(entry)) if self.clock.now() < entry.end_timestamp => {
                self.wake_at(entry.end_timestamp);
                SignerStatus::unavailable(UnavailableReason::TimelockNotMet {
                    end_timestamp: entry.end_timestamp,
                })
            }
            Ok(Some(_)) => SignerStatus::Ready,
            Err(e) => {
                debug!("Recovery module unreachable: {}", e);
                SignerStatus::unavailable(UnavailableReason::Unreachable(e.to_string()))
            }
        }
    }

    async fn sign(
        &self,
        signer: &SignerRef,
        request: &SigningRequest,
    ) -> Result<LeafSignature, SignerError> {
        let image_hash = self.recovery_signer(signer).ok_or_else(|| {
            SignerError::Unsupported(format!("{} is not a recovery leaf", signer.address))
        })?;

        let entry = self.queued_for(request).await?.ok_or_else(|| {
            SignerError::SigningFailed(format!("no recovery payload queued for {}", request.digest))
        })?;
        let now = self.clock.now();
        if now < entry.end_timestamp {
            warn!(
                "Recovery for {} still locked for {}s",
                request.digest,
                entry.end_timestamp - now
            );
            return Err(SignerError::SigningFailed(format!(
                "time lock ends at {}",
                entry.end_timestamp
            )));
        }

        let data = self
            .module
            .encode_signature(&entry.signer, &image_hash, &request.digest)
            .await?;
        Ok(LeafSignature::Sapient {
            image_hash,
            signature: SapientSignature {
                kind: SapientKind::SapientCompact,
                address: self.module_address,
                data,
            },
        })
    }
}

impl Drop for RecoveryHandler {
    fn drop(&mut self) {
        let wakeups = self.wakeups.lock().unwrap_or_else(|e| e.into_inner());
        for task in wakeups.values() {
            task.abort();
        }
    }
}
