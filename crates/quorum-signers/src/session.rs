//! Signing sessions
//!
//! A session owns one request's signed envelope and drives it towards its
//! threshold:
//!
//! ```text
//! Requested -> Polling -> (handle one leaf -> append -> recompute weight)*
//!           -> Complete    threshold reached
//!           -> Cancelled   caller abandoned the request
//! ```
//!
//! Status queries run concurrently. Appends are single-writer: a leaf being
//! signed is marked in flight and a second call for it is rejected instead of
//! queued. The signed envelope lock is never held across an await.

use futures::future::join_all;
use log::{debug, info, warn};
use quorum_core::{CoreError, Hash32, LeafSignature, Signed, SignerRef, WeightReport};
use quorum_state::StateStore;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{watch, Notify};

use crate::config::SignerConfig;
use crate::handler::{
    ActionOutcome, ActionResponse, HandlerKind, SignerStatus, SigningRequest, Subscription,
    UnavailableReason,
};
use crate::registry::HandlerRegistry;
use crate::SignerError;

type LeafKey = (quorum_core::Address, Option<Hash32>);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Requested,
    Polling,
    Complete,
    Cancelled,
}

impl RequestState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RequestState::Complete | RequestState::Cancelled)
    }
}

/// One leaf in an availability snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeafStatus {
    pub signer: SignerRef,
    pub kind: Option<HandlerKind>,
    /// `None` once the leaf holds a signature; it is not queried again.
    pub status: Option<SignerStatus>,
}

impl LeafStatus {
    pub fn is_signed(&self) -> bool {
        self.status.is_none()
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.status, Some(SignerStatus::Ready))
    }
}

/// Aggregated availability of every signer-capable leaf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Availability {
    /// Leaves in topology order.
    pub leaves: Vec<LeafStatus>,
    pub weight: WeightReport,
}

impl Availability {
    pub fn ready(&self) -> impl Iterator<Item = &LeafStatus> {
        self.leaves.iter().filter(|leaf| leaf.is_ready())
    }
}

/// Marks a leaf as being signed until dropped.
struct InFlight<'a> {
    leaves: &'a Mutex<HashSet<LeafKey>>,
    key: LeafKey,
}

impl<'a> InFlight<'a> {
    fn acquire(leaves: &'a Mutex<HashSet<LeafKey>>, key: LeafKey) -> Option<Self> {
        let inserted = leaves
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key);
        inserted.then_some(Self { leaves, key })
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.leaves
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.key);
    }
}

pub struct SigningSession {
    request: SigningRequest,
    signed: Mutex<Signed>,
    registry: Arc<HandlerRegistry>,
    store: Option<Arc<dyn StateStore>>,
    config: SignerConfig,
    in_flight: Mutex<HashSet<LeafKey>>,
    subscriptions: Mutex<Vec<Subscription>>,
    changed: Arc<Notify>,
    cancelled: AtomicBool,
    state: watch::Sender<RequestState>,
}

impl SigningSession {
    pub(crate) fn new(
        signed: Signed,
        registry: Arc<HandlerRegistry>,
        store: Option<Arc<dyn StateStore>>,
        config: SignerConfig,
    ) -> Self {
        let request = SigningRequest::from_envelope(&signed.envelope);
        let initial = if signed.reached_threshold() {
            RequestState::Complete
        } else {
            RequestState::Requested
        };
        let (state, _) = watch::channel(initial);
        Self {
            request,
            signed: Mutex::new(signed),
            registry,
            store,
            config,
            in_flight: Mutex::new(HashSet::new()),
            subscriptions: Mutex::new(Vec::new()),
            changed: Arc::new(Notify::new()),
            cancelled: AtomicBool::new(false),
            state,
        }
    }

    /// Subscribe the session to every handler that serves one of its leaves.
    pub(crate) fn subscribe_handlers(&self) {
        let kinds: HashSet<HandlerKind> = self
            .leaves()
            .iter()
            .filter_map(|leaf| self.registry.kind_of(leaf))
            .collect();
        let mut subscriptions = self
            .subscriptions
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        for kind in kinds {
            if let Some(handler) = self.registry.handler(kind) {
                subscriptions.push(handler.on_status_change(self.changed.clone()));
            }
        }
    }

    fn signed(&self) -> MutexGuard<'_, Signed> {
        self.signed.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn leaves(&self) -> Vec<SignerRef> {
        self.signed().configuration().signers()
    }

    fn transition(&self, next: RequestState) {
        let changed = self.state.send_if_modified(|current| {
            if current.is_terminal() || *current == next {
                return false;
            }
            *current = next;
            true
        });
        if changed {
            info!("Request {} is now {:?}", self.request.digest, next);
        }
    }

    fn ensure_open(&self) -> Result<(), SignerError> {
        if self.is_cancelled() {
            return Err(SignerError::Cancelled);
        }
        Ok(())
    }

    pub fn request(&self) -> &SigningRequest {
        &self.request
    }

    pub fn digest(&self) -> Hash32 {
        self.request.digest
    }

    pub fn state(&self) -> RequestState {
        *self.state.borrow()
    }

    /// Observe state transitions.
    pub fn watch_state(&self) -> watch::Receiver<RequestState> {
        self.state.subscribe()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    pub fn weight(&self) -> WeightReport {
        self.signed().weight()
    }

    pub fn reached_threshold(&self) -> bool {
        self.weight().reached()
    }

    pub fn signatures(&self) -> Vec<LeafSignature> {
        self.signed().signatures().to_vec()
    }

    /// Snapshot of the signed envelope.
    pub fn signed_envelope(&self) -> Signed {
        self.signed().clone()
    }

    /// Wire form of the signatures collected so far.
    pub fn encoded_signature(&self) -> Result<Vec<u8>, SignerError> {
        Ok(self.signed().encode_signature()?)
    }

    /// Number of live handler subscriptions held by this session.
    pub fn subscription_count(&self) -> usize {
        self.subscriptions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|s| !s.is_released())
            .count()
    }

    /// Query every unsigned leaf concurrently.
    pub async fn poll(&self) -> Result<Availability, SignerError> {
        self.ensure_open()?;
        if self.state() == RequestState::Requested {
            self.transition(RequestState::Polling);
        }

        let (leaves, signed_keys): (Vec<SignerRef>, HashSet<LeafKey>) = {
            let signed = self.signed();
            let leaves = signed.configuration().signers();
            let keys = leaves
                .iter()
                .filter(|leaf| signed.is_signed(leaf))
                .map(|leaf| leaf.key())
                .collect();
            (leaves, keys)
        };

        let timeout = self.config.status_timeout();
        let queries = leaves.iter().map(|leaf| {
            let signed = signed_keys.contains(&leaf.key());
            async move {
                let kind = self.registry.kind_of(leaf);
                if signed {
                    return LeafStatus {
                        signer: *leaf,
                        kind,
                        status: None,
                    };
                }
                let status = match self.registry.resolve(leaf) {
                    None => SignerStatus::unavailable(UnavailableReason::NoHandler),
                    Some((_, handler)) => {
                        match tokio::time::timeout(timeout, handler.status(leaf, &self.request))
                            .await
                        {
                            Ok(status) => status,
                            Err(_) => SignerStatus::unavailable(UnavailableReason::Timeout),
                        }
                    }
                };
                debug!("Leaf {} ({:?}): {:?}", leaf.address, kind, status);
                LeafStatus {
                    signer: *leaf,
                    kind,
                    status: Some(status),
                }
            }
        });
        let leaves = join_all(queries).await;

        self.ensure_open()?;
        Ok(Availability {
            leaves,
            weight: self.weight(),
        })
    }

    /// Sign one leaf with its handler and append the signature.
    pub async fn handle(&self, signer: &SignerRef) -> Result<WeightReport, SignerError> {
        self.ensure_open()?;
        if self.reached_threshold() {
            return Err(SignerError::RequestClosed);
        }

        let leaf = self
            .leaves()
            .into_iter()
            .find(|leaf| leaf.key() == signer.key())
            .ok_or_else(|| SignerError::UnknownSigner(signer.address.to_string()))?;

        let _guard = InFlight::acquire(&self.in_flight, leaf.key()).ok_or_else(|| {
            warn!("Rejected concurrent signing of {}", leaf.address);
            SignerError::AlreadyInProgress(leaf.address.to_string())
        })?;

        if self.signed().is_signed(&leaf) {
            return Err(CoreError::AlreadySigned(leaf.address.to_string()).into());
        }

        let (kind, handler) = self
            .registry
            .resolve(&leaf)
            .ok_or_else(|| SignerError::NoHandler(leaf.address.to_string()))?;

        let signature = match tokio::time::timeout(
            self.config.sign_timeout(),
            handler.sign(&leaf, &self.request),
        )
        .await
        {
            Ok(Ok(signature)) => signature,
            Ok(Err(e)) => {
                warn!("{} handler failed to sign for {}: {}", kind, leaf.address, e);
                return Err(e);
            }
            Err(_) => {
                warn!("{} handler timed out signing for {}", kind, leaf.address);
                return Err(SignerError::SigningFailed(format!(
                    "{} handler timed out",
                    kind
                )));
            }
        };

        // Results arriving after cancellation are discarded
        self.ensure_open()?;

        let report = {
            let mut signed = self.signed();
            signed.add_signature(signature.clone(), false)?;
            signed.weight()
        };

        if let Some(store) = &self.store {
            store.save_leaf_signature(&self.request.digest, &signature)?;
        }

        info!(
            "Signed {} with {} handler: weight {}/{}",
            leaf.address, kind, report.weight, report.threshold
        );
        if report.reached() {
            self.transition(RequestState::Complete);
        }
        self.changed.notify_one();
        Ok(report)
    }

    /// Forward an interactive step to the leaf's handler.
    pub async fn respond(
        &self,
        signer: &SignerRef,
        response: ActionResponse,
    ) -> Result<ActionOutcome, SignerError> {
        self.ensure_open()?;
        let (_, handler) = self
            .registry
            .resolve(signer)
            .ok_or_else(|| SignerError::NoHandler(signer.address.to_string()))?;
        let outcome = handler.respond(signer, &self.request, response).await?;
        self.ensure_open()?;
        Ok(outcome)
    }

    /// Wait until a handler reports a change, a leaf is signed, or the
    /// session is cancelled.
    pub async fn wait_for_change(&self) -> Result<(), SignerError> {
        let notified = self.changed.notified();
        tokio::pin!(notified);
        // Register before checking the flag so a concurrent cancel is not missed
        notified.as_mut().enable();

        self.ensure_open()?;
        notified.await;
        self.ensure_open()
    }

    /// Sign ready leaves in kind priority order until the threshold is reached.
    ///
    /// A leaf whose handler fails is skipped until the next change; when no
    /// ready leaf is left, waits for a handler to report a change.
    pub async fn collect(&self) -> Result<WeightReport, SignerError> {
        let mut failed: HashSet<LeafKey> = HashSet::new();
        loop {
            let report = self.weight();
            if report.reached() {
                self.transition(RequestState::Complete);
                return Ok(report);
            }

            let availability = self.poll().await?;
            let mut ready: Vec<&LeafStatus> = availability
                .ready()
                .filter(|leaf| !failed.contains(&leaf.signer.key()))
                .collect();
            ready.sort_by_key(|leaf| self.config.priority_of(leaf.kind));

            let mut progressed = false;
            for leaf in ready {
                match self.handle(&leaf.signer).await {
                    Ok(report) if report.reached() => return Ok(report),
                    Ok(_) => progressed = true,
                    Err(SignerError::Cancelled) => return Err(SignerError::Cancelled),
                    Err(SignerError::RequestClosed) => return Ok(self.weight()),
                    Err(SignerError::AlreadyInProgress(_))
                    | Err(SignerError::Core(CoreError::AlreadySigned(_))) => {}
                    Err(e) => {
                        warn!("Skipping {}: {}", leaf.signer.address, e);
                        failed.insert(leaf.signer.key());
                    }
                }
            }

            if !progressed {
                debug!("No ready leaf could sign {}; waiting", self.request.digest);
                self.wait_for_change().await?;
                failed.clear();
            }
        }
    }

    /// Abandon the request: release subscriptions and discard late results.
    pub fn cancel(&self) {
        if self.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }
        let released: Vec<Subscription> = self
            .subscriptions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
            .collect();
        for subscription in &released {
            subscription.release();
        }
        self.transition(RequestState::Cancelled);
        self.changed.notify_waiters();
        info!(
            "Cancelled request {} ({} subscriptions released)",
            self.request.digest,
            released.len()
        );
    }
}
