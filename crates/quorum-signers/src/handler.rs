//! The handler protocol
//!
//! A handler answers, for one signer-capable leaf and one request, whether
//! it can contribute a signature right now. Unavailability is a status, not
//! an error: it only narrows the set of leaves a session can use.

use async_trait::async_trait;
use quorum_core::{Address, Envelope, Hash32, LeafSignature, Payload, PayloadDigest, SignerRef};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::Notify;

use crate::SignerError;

/// Signer families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HandlerKind {
    LocalKey,
    Identity,
    Recovery,
    Guard,
}

impl HandlerKind {
    pub const ALL: [HandlerKind; 4] = [
        HandlerKind::LocalKey,
        HandlerKind::Identity,
        HandlerKind::Recovery,
        HandlerKind::Guard,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            HandlerKind::LocalKey => "local-key",
            HandlerKind::Identity => "identity",
            HandlerKind::Recovery => "recovery",
            HandlerKind::Guard => "guard",
        }
    }
}

impl fmt::Display for HandlerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HandlerKind {
    type Err = SignerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        HandlerKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s.trim())
            .ok_or_else(|| SignerError::Config(format!("unknown handler kind '{}'", s)))
    }
}

/// What a handler needs to know about the request being signed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigningRequest {
    pub wallet: Address,
    pub chain_id: u64,
    /// Image hash of the configuration being satisfied.
    pub image_hash: Hash32,
    pub digest: Hash32,
    pub payload: Payload,
}

impl SigningRequest {
    pub fn from_envelope(envelope: &Envelope<Payload>) -> Self {
        Self {
            wallet: envelope.wallet,
            chain_id: envelope.chain_id,
            image_hash: envelope.configuration.image_hash(),
            digest: envelope.payload.digest(&envelope.wallet, envelope.chain_id),
            payload: envelope.payload.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnavailableReason {
    /// No handler is registered for the leaf.
    NoHandler,
    /// The handler holds no credential for this signer.
    MissingCredential,
    /// Nothing is queued for the requested digest.
    NoQueuedPayload,
    /// Queued, but the time lock ends at `end_timestamp` (unix seconds).
    TimelockNotMet { end_timestamp: u64 },
    /// A remote collaborator could not be reached.
    Unreachable(String),
    /// The status query did not answer in time.
    Timeout,
}

/// A user-driven step needed before a leaf can sign.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Ask the provider to send a challenge.
    RequestChallenge,
    /// A challenge was sent; answer it.
    AnswerChallenge { hint: String, attempts_left: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignerStatus {
    Unavailable { reason: UnavailableReason },
    /// Can sign without further interaction.
    Ready,
    Actionable { action: Action },
}

impl SignerStatus {
    pub fn unavailable(reason: UnavailableReason) -> Self {
        SignerStatus::Unavailable { reason }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, SignerStatus::Ready)
    }
}

/// Input from the UI layer driving an [`Action`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionResponse {
    RequestChallenge,
    Answer(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionOutcome {
    /// Another step is needed.
    Actionable(Action),
    /// The leaf is now ready to sign.
    Ready,
}

/// Woken whenever a handler's availability may have changed.
pub type StatusListener = Arc<Notify>;

#[derive(Default)]
struct Listeners {
    next_id: AtomicU64,
    entries: Mutex<HashMap<u64, StatusListener>>,
}

/// Fan-out of status changes to subscribed listeners.
#[derive(Default, Clone)]
pub struct StatusNotifier {
    inner: Arc<Listeners>,
}

impl StatusNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, listener: StatusListener) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, listener);
        Subscription {
            id,
            listeners: Arc::downgrade(&self.inner),
            released: AtomicBool::new(false),
        }
    }

    /// Wake every subscribed listener.
    pub fn notify(&self) {
        let listeners: Vec<StatusListener> = self
            .inner
            .entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect();
        for listener in listeners {
            listener.notify_one();
        }
    }

    pub fn listener_count(&self) -> usize {
        self.inner
            .entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }
}

/// Token for one status subscription. Released on `release()` or drop.
pub struct Subscription {
    id: u64,
    listeners: Weak<Listeners>,
    released: AtomicBool,
}

impl Subscription {
    /// Stop receiving notifications. Calling it again does nothing.
    pub fn release(&self) {
        if self.released.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(listeners) = self.listeners.upgrade() {
            listeners
                .entries
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(&self.id);
        }
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("released", &self.is_released())
            .finish()
    }
}

/// A pluggable signer family.
#[async_trait]
pub trait Handler: Send + Sync {
    fn kind(&self) -> HandlerKind;

    /// Register a listener woken when availability may have changed.
    fn on_status_change(&self, listener: StatusListener) -> Subscription;

    /// Availability of `signer` for `request`. Must not have side effects.
    async fn status(&self, signer: &SignerRef, request: &SigningRequest) -> SignerStatus;

    /// Produce the leaf signature for `signer`.
    async fn sign(
        &self,
        signer: &SignerRef,
        request: &SigningRequest,
    ) -> Result<LeafSignature, SignerError>;

    /// Advance an interactive step reported through [`SignerStatus::Actionable`].
    async fn respond(
        &self,
        signer: &SignerRef,
        _request: &SigningRequest,
        _response: ActionResponse,
    ) -> Result<ActionOutcome, SignerError> {
        Err(SignerError::Unsupported(format!(
            "{} handler has no interactive steps for {}",
            self.kind(),
            signer.address
        )))
    }
}
