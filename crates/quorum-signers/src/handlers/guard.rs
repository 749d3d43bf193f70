//! Remote co-signer.

use async_trait::async_trait;
use log::warn;
use quorum_core::{Address, Hash32, LeafSignature, Payload, RsY, SignerRef, SignerSignature};
use std::collections::HashSet;
use std::sync::Arc;

use crate::handler::{
    Handler, HandlerKind, SignerStatus, SigningRequest, StatusListener, StatusNotifier,
    Subscription, UnavailableReason,
};
use crate::SignerError;

/// Client of the co-signing service.
#[async_trait]
pub trait GuardClient: Send + Sync {
    /// Succeeds when the service is reachable.
    async fn ping(&self) -> Result<(), SignerError>;

    /// Ask the service to co-sign `digest`; it may inspect `payload` first.
    async fn cosign(
        &self,
        wallet: &Address,
        chain_id: u64,
        digest: &Hash32,
        payload: &Payload,
    ) -> Result<RsY, SignerError>;
}

pub struct GuardHandler {
    client: Arc<dyn GuardClient>,
    guards: HashSet<Address>,
    notifier: StatusNotifier,
}

impl GuardHandler {
    /// `guards` are the signer addresses the service signs for.
    pub fn new(client: Arc<dyn GuardClient>, guards: impl IntoIterator<Item = Address>) -> Self {
        Self {
            client,
            guards: guards.into_iter().collect(),
            notifier: StatusNotifier::new(),
        }
    }

    /// Tell subscribers reachability may have changed.
    pub fn reachability_changed(&self) {
        self.notifier.notify();
    }
}

#[async_trait]
impl Handler for GuardHandler {
    fn kind(&self) -> HandlerKind {
        HandlerKind::Guard
    }

    fn on_status_change(&self, listener: StatusListener) -> Subscription {
        self.notifier.subscribe(listener)
    }

    async fn status(&self, signer: &SignerRef, _request: &SigningRequest) -> SignerStatus {
        if signer.image_hash.is_some() || !self.guards.contains(&signer.address) {
            return SignerStatus::unavailable(UnavailableReason::MissingCredential);
        }
        match self.client.ping().await {
            Ok(()) => SignerStatus::Ready,
            Err(e) => SignerStatus::unavailable(UnavailableReason::Unreachable(e.to_string())),
        }
    }

    async fn sign(
        &self,
        signer: &SignerRef,
        request: &SigningRequest,
    ) -> Result<LeafSignature, SignerError> {
        if !self.guards.contains(&signer.address) {
            return Err(SignerError::Unsupported(format!(
                "{} is not a guard signer",
                signer.address
            )));
        }
        let rsy = self
            .client
            .cosign(
                &request.wallet,
                request.chain_id,
                &request.digest,
                &request.payload,
            )
            .await
            .map_err(|e| {
                warn!("Guard refused to co-sign {}: {}", request.digest, e);
                SignerError::SigningFailed(format!("guard co-signing failed: {}", e))
            })?;
        Ok(LeafSignature::Signer {
            address: signer.address,
            signature: SignerSignature::Hash(rsy),
        })
    }
}
