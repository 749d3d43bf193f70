//! Keys held in process memory.
//!
//! Secret bytes are kept in `Zeroizing` buffers and wiped when removed or
//! when the handler is dropped.

use async_trait::async_trait;
use log::debug;
use quorum_core::signature::{address_of_secret, sign_digest};
use quorum_core::{Address, LeafSignature, SignerRef};
use secp256k1::SecretKey;
use std::collections::HashMap;
use std::sync::RwLock;
use zeroize::Zeroizing;

use crate::handler::{
    Handler, HandlerKind, SignerStatus, SigningRequest, StatusListener, StatusNotifier,
    Subscription, UnavailableReason,
};
use crate::SignerError;

#[derive(Default)]
pub struct LocalKeyHandler {
    keys: RwLock<HashMap<Address, Zeroizing<[u8; 32]>>>,
    notifier: StatusNotifier,
}

impl LocalKeyHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hold `secret_key` and return the address it signs for.
    pub fn add_key(&self, secret_key: &SecretKey) -> Address {
        let address = address_of_secret(secret_key);
        self.keys
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(address, Zeroizing::new(secret_key.secret_bytes()));
        debug!("Holding local key for {}", address);
        self.notifier.notify();
        address
    }

    /// Forget the key for `address`. Returns whether one was held.
    pub fn remove_key(&self, address: &Address) -> bool {
        let removed = self
            .keys
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(address)
            .is_some();
        if removed {
            self.notifier.notify();
        }
        removed
    }

    pub fn holds(&self, address: &Address) -> bool {
        self.keys
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(address)
    }

    fn secret_key(&self, address: &Address) -> Result<Option<SecretKey>, SignerError> {
        let keys = self.keys.read().unwrap_or_else(|e| e.into_inner());
        keys.get(address)
            .map(|bytes| {
                SecretKey::from_slice(&bytes[..])
                    .map_err(|e| SignerError::SigningFailed(format!("invalid local key: {}", e)))
            })
            .transpose()
    }
}

#[async_trait]
impl Handler for LocalKeyHandler {
    fn kind(&self) -> HandlerKind {
        HandlerKind::LocalKey
    }

    fn on_status_change(&self, listener: StatusListener) -> Subscription {
        self.notifier.subscribe(listener)
    }

    async fn status(&self, signer: &SignerRef, _request: &SigningRequest) -> SignerStatus {
        if signer.image_hash.is_none() && self.holds(&signer.address) {
            SignerStatus::Ready
        } else {
            SignerStatus::unavailable(UnavailableReason::MissingCredential)
        }
    }

    async fn sign(
        &self,
        signer: &SignerRef,
        request: &SigningRequest,
    ) -> Result<LeafSignature, SignerError> {
        if signer.image_hash.is_some() {
            return Err(SignerError::Unsupported(format!(
                "local keys cannot sign for sapient leaf {}",
                signer.address
            )));
        }
        let secret_key = self.secret_key(&signer.address)?.ok_or_else(|| {
            SignerError::SigningFailed(format!("no local key for {}", signer.address))
        })?;
        Ok(LeafSignature::Signer {
            address: signer.address,
            signature: sign_digest(&secret_key, &request.digest),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quorum_core::{Configuration, Envelope, Payload, Topology};

    fn key(seed: u8) -> SecretKey {
        let mut bytes = [0u8; 32];
        bytes[31] = seed;
        bytes[0] = 0x11;
        SecretKey::from_slice(&bytes).unwrap()
    }

    fn request(signer: Address) -> SigningRequest {
        let config = Configuration::new(1, 0, Topology::signer(signer, 1)).unwrap();
        let envelope = Envelope::new(
            Address([0xAA; 20]),
            1,
            config,
            Payload::Message {
                message: b"hello".to_vec(),
            },
        );
        SigningRequest::from_envelope(&envelope)
    }

    #[tokio::test]
    async fn test_ready_only_with_key() {
        let handler = LocalKeyHandler::new();
        let address = address_of_secret(&key(1));
        let leaf = SignerRef {
            address,
            image_hash: None,
            weight: 1,
        };
        let request = request(address);

        assert_eq!(
            handler.status(&leaf, &request).await,
            SignerStatus::unavailable(UnavailableReason::MissingCredential)
        );

        handler.add_key(&key(1));
        assert!(handler.status(&leaf, &request).await.is_ready());

        let signature = handler.sign(&leaf, &request).await.unwrap();
        assert_eq!(signature.address(), address);
        signature.verify(&request.digest).unwrap();

        assert!(handler.remove_key(&address));
        assert!(handler.sign(&leaf, &request).await.is_err());
    }

    #[test]
    fn test_key_changes_notify() {
        let handler = LocalKeyHandler::new();
        let listener = std::sync::Arc::new(tokio::sync::Notify::new());
        let _subscription = handler.on_status_change(listener);
        assert_eq!(handler.notifier.listener_count(), 1);
        handler.add_key(&key(2));
        assert!(!handler.remove_key(&Address([0u8; 20])));
    }
}
