//! Opens signing sessions.

use log::{info, warn};
use quorum_core::{Envelope, Payload, Signed};
use quorum_state::{StateStore, StoredPayload};
use std::sync::Arc;

use crate::config::SignerConfig;
use crate::registry::HandlerRegistry;
use crate::session::SigningSession;
use crate::SignerError;

pub struct Orchestrator {
    registry: Arc<HandlerRegistry>,
    config: SignerConfig,
    store: Option<Arc<dyn StateStore>>,
}

impl Orchestrator {
    pub fn new(registry: Arc<HandlerRegistry>, config: SignerConfig) -> Self {
        Self {
            registry,
            config,
            store: None,
        }
    }

    /// Persist payloads and signatures, and resume from stored signatures.
    pub fn with_store(mut self, store: Arc<dyn StateStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &SignerConfig {
        &self.config
    }

    /// Open a session for `envelope` and subscribe it to the handlers of its leaves.
    pub fn start(&self, envelope: Envelope<Payload>) -> Result<SigningSession, SignerError> {
        envelope.configuration.validate()?;
        let digest = envelope.digest();
        let mut signed: Signed = envelope.into_signed();

        if let Some(store) = &self.store {
            let envelope = &signed.envelope;
            store.save_config(&envelope.configuration.image_hash(), &envelope.configuration)?;
            store.save_payload_of_digest(
                &digest,
                &StoredPayload {
                    wallet: envelope.wallet,
                    chain_id: envelope.chain_id,
                    payload: envelope.payload.clone(),
                },
            )?;

            for signature in store.load_signatures_of_digest(&digest)? {
                if let Err(e) = signed.add_signature(signature, false) {
                    warn!("Ignoring stored signature for {}: {}", digest, e);
                }
            }
        }

        let signer_count = signed.configuration().signers().len();
        let session = SigningSession::new(
            signed,
            self.registry.clone(),
            self.store.clone(),
            self.config.clone(),
        );
        session.subscribe_handlers();

        let report = session.weight();
        info!(
            "Opened request {} with {} signers ({}/{})",
            digest,
            signer_count,
            report.weight,
            report.threshold
        );
        Ok(session)
    }
}
