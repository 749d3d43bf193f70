//! Handler registry
//!
//! Built by the caller and shared with the orchestrator; there is no
//! process-wide instance.

use quorum_core::{Address, SignerRef};
use std::collections::HashMap;
use std::sync::Arc;

use crate::handler::{Handler, HandlerKind};

#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<HandlerKind, Arc<dyn Handler>>,
    signers: HashMap<Address, HandlerKind>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under its kind, replacing any previous one.
    pub fn register(&mut self, handler: Arc<dyn Handler>) -> Option<Arc<dyn Handler>> {
        self.handlers.insert(handler.kind(), handler)
    }

    /// Route a signer address to a handler kind.
    pub fn assign(&mut self, signer: Address, kind: HandlerKind) {
        self.signers.insert(signer, kind);
    }

    /// Register a handler and route the given signers to it.
    pub fn with_handler(
        mut self,
        handler: Arc<dyn Handler>,
        signers: impl IntoIterator<Item = Address>,
    ) -> Self {
        let kind = handler.kind();
        self.register(handler);
        for signer in signers {
            self.assign(signer, kind);
        }
        self
    }

    pub fn handler(&self, kind: HandlerKind) -> Option<Arc<dyn Handler>> {
        self.handlers.get(&kind).cloned()
    }

    pub fn kind_of(&self, signer: &SignerRef) -> Option<HandlerKind> {
        self.signers.get(&signer.address).copied()
    }

    /// The handler responsible for a leaf, if both the route and the handler exist.
    pub fn resolve(&self, signer: &SignerRef) -> Option<(HandlerKind, Arc<dyn Handler>)> {
        let kind = self.kind_of(signer)?;
        self.handler(kind).map(|handler| (kind, handler))
    }
}
