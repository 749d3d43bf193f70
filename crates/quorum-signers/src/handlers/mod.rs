//! Built-in handlers, one per signer family.

pub mod guard;
pub mod identity;
pub mod local;
pub mod recovery;

pub use guard::{GuardClient, GuardHandler};
pub use identity::{IdentityHandler, IdentityProvider};
pub use local::LocalKeyHandler;
pub use recovery::{QueuedPayload, RecoveryHandler, RecoveryModule};
