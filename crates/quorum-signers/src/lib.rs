//! Quorum Signers
//!
//! Drives signature collection for a pending request until the wallet's
//! threshold is reached.
//!
//! Each signer family (local keys, identity challenges, time-locked recovery,
//! remote guard) plugs in as a [`Handler`]. Handlers report per-leaf
//! availability; the [`Orchestrator`] opens a [`SigningSession`] per request,
//! queries every signer-capable leaf, signs with whatever is ready and
//! re-queries when a handler reports a change.
//!
//! # Example
//!
//! ```ignore
//! let registry = Arc::new(registry);
//! let orchestrator = Orchestrator::new(registry, SignerConfig::default());
//! let session = orchestrator.start(envelope)?;
//! let report = session.collect().await?;
//! assert!(report.reached());
//! let proof = session.encoded_signature();
//! ```

pub mod clock;
pub mod config;
pub mod handler;
pub mod handlers;
pub mod orchestrator;
pub mod registry;
pub mod session;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::SignerConfig;
pub use handler::{
    Action, ActionOutcome, ActionResponse, Handler, HandlerKind, SignerStatus, SigningRequest,
    StatusNotifier, Subscription, UnavailableReason,
};
pub use orchestrator::Orchestrator;
pub use registry::HandlerRegistry;
pub use session::{Availability, LeafStatus, RequestState, SigningSession};

use quorum_core::CoreError;
use quorum_state::StateError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SignerError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error("Signing already in progress for {0}")]
    AlreadyInProgress(String),

    #[error("Request cancelled")]
    Cancelled,

    #[error("Request already reached its threshold")]
    RequestClosed,

    #[error("Signing failed: {0}")]
    SigningFailed(String),

    #[error("Answer incorrect, {remaining} attempts left")]
    AnswerIncorrect { remaining: u32 },

    #[error("Challenge expired")]
    ChallengeExpired,

    #[error("Too many attempts")]
    TooManyAttempts,

    #[error("No handler for {0}")]
    NoHandler(String),

    #[error("Signer is not part of the configuration: {0}")]
    UnknownSigner(String),

    #[error("Unsupported: {0}")]
    Unsupported(String),

    #[error("Config error: {0}")]
    Config(String),
}
