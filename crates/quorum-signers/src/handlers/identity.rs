//! Identity-provider signers
//!
//! The provider holds the signing key and releases a signature only after the
//! user answers a challenge (an emailed code, an OTP). Each leaf walks through
//!
//! ```text
//! RequestChallenge -> AnswerChallenge { hint } -> Ready -> signed
//! ```
//!
//! A challenge belongs to the request digest it was issued for; answering it
//! releases one signature on that digest and nothing else. A wrong answer,
//! an expired challenge or an exhausted attempt budget is reported to the
//! caller. Nothing here retries on its own.

use async_trait::async_trait;
use log::{info, warn};
use quorum_core::{Address, Hash32, LeafSignature, RsY, SignerRef, SignerSignature};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::clock::Clock;
use crate::config::IdentitySection;
use crate::handler::{
    Action, ActionOutcome, ActionResponse, Handler, HandlerKind, SignerStatus, SigningRequest,
    StatusListener, StatusNotifier, Subscription, UnavailableReason,
};
use crate::SignerError;

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Send a fresh challenge to the signer's owner; returns a hint to show.
    async fn issue_challenge(&self, signer: &Address) -> Result<String, SignerError>;

    async fn verify_answer(&self, signer: &Address, answer: &str) -> Result<bool, SignerError>;

    /// Sign `digest` with the key the provider holds for `signer`.
    async fn sign(&self, signer: &Address, digest: &Hash32) -> Result<RsY, SignerError>;
}

#[derive(Debug, Clone)]
struct Challenge {
    digest: Hash32,
    hint: String,
    issued_at: u64,
    attempts: u32,
    authenticated: bool,
}

pub struct IdentityHandler {
    provider: Arc<dyn IdentityProvider>,
    clock: Arc<dyn Clock>,
    limits: IdentitySection,
    signers: HashSet<Address>,
    challenges: Mutex<HashMap<Address, Challenge>>,
    notifier: StatusNotifier,
}

impl IdentityHandler {
    pub fn new(
        provider: Arc<dyn IdentityProvider>,
        clock: Arc<dyn Clock>,
        limits: IdentitySection,
        signers: impl IntoIterator<Item = Address>,
    ) -> Self {
        Self {
            provider,
            clock,
            limits,
            signers: signers.into_iter().collect(),
            challenges: Mutex::new(HashMap::new()),
            notifier: StatusNotifier::new(),
        }
    }

    fn challenges(&self) -> MutexGuard<'_, HashMap<Address, Challenge>> {
        self.challenges.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn expired(&self, challenge: &Challenge) -> bool {
        self.clock.now().saturating_sub(challenge.issued_at) >= self.limits.challenge_ttl_secs
    }

    fn serves(&self, signer: &SignerRef) -> bool {
        signer.image_hash.is_none() && self.signers.contains(&signer.address)
    }

    fn answer_action(&self, challenge: &Challenge) -> Action {
        Action::AnswerChallenge {
            hint: challenge.hint.clone(),
            attempts_left: self.limits.max_attempts.saturating_sub(challenge.attempts),
        }
    }

    /// Drop the challenge for `signer` and wake subscribers.
    fn discard(&self, signer: &Address) {
        self.challenges().remove(signer);
        self.notifier.notify();
    }

    /// The live challenge for `signer`, if it was issued for `digest`.
    fn challenge_for(&self, signer: &Address, digest: &Hash32) -> Option<Challenge> {
        self.challenges()
            .get(signer)
            .filter(|c| c.digest == *digest)
            .cloned()
    }

    async fn request_challenge(
        &self,
        signer: &Address,
        digest: &Hash32,
    ) -> Result<ActionOutcome, SignerError> {
        let hint = self.provider.issue_challenge(signer).await?;
        let challenge = Challenge {
            digest: *digest,
            hint,
            issued_at: self.clock.now(),
            attempts: 0,
            authenticated: false,
        };
        let action = self.answer_action(&challenge);
        self.challenges().insert(*signer, challenge);
        info!("Issued identity challenge for {}", signer);
        self.notifier.notify();
        Ok(ActionOutcome::Actionable(action))
    }

    async fn answer(
        &self,
        signer: &Address,
        digest: &Hash32,
        answer: &str,
    ) -> Result<ActionOutcome, SignerError> {
        let challenge = self
            .challenge_for(signer, digest)
            .ok_or(SignerError::ChallengeExpired)?;
        if challenge.authenticated {
            return Ok(ActionOutcome::Ready);
        }
        if self.expired(&challenge) {
            self.discard(signer);
            return Err(SignerError::ChallengeExpired);
        }
        if challenge.attempts >= self.limits.max_attempts {
            self.discard(signer);
            return Err(SignerError::TooManyAttempts);
        }

        let correct = self.provider.verify_answer(signer, answer).await?;

        let mut challenges = self.challenges();
        let current = challenges
            .get_mut(signer)
            .filter(|c| c.digest == *digest)
            .ok_or(SignerError::ChallengeExpired)?;
        if correct {
            current.authenticated = true;
            drop(challenges);
            info!("Identity challenge answered for {}", signer);
            self.notifier.notify();
            return Ok(ActionOutcome::Ready);
        }

        current.attempts += 1;
        let remaining = self.limits.max_attempts.saturating_sub(current.attempts);
        drop(challenges);
        warn!("Wrong challenge answer for {} ({} left)", signer, remaining);
        if remaining == 0 {
            self.discard(signer);
            return Err(SignerError::TooManyAttempts);
        }
        self.notifier.notify();
        Err(SignerError::AnswerIncorrect { remaining })
    }
}

#[async_trait]
impl Handler for IdentityHandler {
    fn kind(&self) -> HandlerKind {
        HandlerKind::Identity
    }

    fn on_status_change(&self, listener: StatusListener) -> Subscription {
        self.notifier.subscribe(listener)
    }

    async fn status(&self, signer: &SignerRef, request: &SigningRequest) -> SignerStatus {
        if !self.serves(signer) {
            return SignerStatus::unavailable(UnavailableReason::MissingCredential);
        }
        match self.challenge_for(&signer.address, &request.digest) {
            Some(c) if c.authenticated => SignerStatus::Ready,
            Some(c) if !self.expired(&c) => SignerStatus::Actionable {
                action: self.answer_action(&c),
            },
            _ => SignerStatus::Actionable {
                action: Action::RequestChallenge,
            },
        }
    }

    async fn sign(
        &self,
        signer: &SignerRef,
        request: &SigningRequest,
    ) -> Result<LeafSignature, SignerError> {
        if !self.serves(signer) {
            return Err(SignerError::Unsupported(format!(
                "{} is not an identity signer",
                signer.address
            )));
        }
        let authenticated = self
            .challenge_for(&signer.address, &request.digest)
            .map(|c| c.authenticated)
            .unwrap_or(false);
        if !authenticated {
            return Err(SignerError::SigningFailed(format!(
                "identity for {} not verified for {}",
                signer.address, request.digest
            )));
        }

        let rsy = self.provider.sign(&signer.address, &request.digest).await?;
        // One verified challenge, one signature
        self.discard(&signer.address);
        Ok(LeafSignature::Signer {
            address: signer.address,
            signature: SignerSignature::Hash(rsy),
        })
    }

    async fn respond(
        &self,
        signer: &SignerRef,
        request: &SigningRequest,
        response: ActionResponse,
    ) -> Result<ActionOutcome, SignerError> {
        if !self.serves(signer) {
            return Err(SignerError::Unsupported(format!(
                "{} is not an identity signer",
                signer.address
            )));
        }
        match response {
            ActionResponse::RequestChallenge => {
                self.request_challenge(&signer.address, &request.digest).await
            }
            ActionResponse::Answer(answer) => {
                self.answer(&signer.address, &request.digest, &answer).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use quorum_core::signature::{address_of_secret, sign_digest};
    use quorum_core::{Configuration, Envelope, Payload, Topology};
    use secp256k1::SecretKey;

    struct FakeProvider {
        key: SecretKey,
    }

    #[async_trait]
    impl IdentityProvider for FakeProvider {
        async fn issue_challenge(&self, _signer: &Address) -> Result<String, SignerError> {
            Ok("code sent to a***@example.com".into())
        }

        async fn verify_answer(&self, _signer: &Address, answer: &str) -> Result<bool, SignerError> {
            Ok(answer == "123456")
        }

        async fn sign(&self, _signer: &Address, digest: &Hash32) -> Result<RsY, SignerError> {
            match sign_digest(&self.key, digest) {
                SignerSignature::Hash(rsy) => Ok(rsy),
                _ => unreachable!(),
            }
        }
    }

    fn setup() -> (IdentityHandler, Arc<ManualClock>, SignerRef, SigningRequest) {
        let key = SecretKey::from_slice(&[0x21; 32]).unwrap();
        let address = address_of_secret(&key);
        let clock = Arc::new(ManualClock::new(5_000));
        let handler = IdentityHandler::new(
            Arc::new(FakeProvider { key }),
            clock.clone(),
            IdentitySection {
                challenge_ttl_secs: 60,
                max_attempts: 2,
            },
            [address],
        );
        let config = Configuration::new(1, 0, Topology::signer(address, 1)).unwrap();
        let envelope = Envelope::new(
            Address([0xAA; 20]),
            1,
            config,
            Payload::Digest {
                digest: Hash32([0x03; 32]),
            },
        );
        let leaf = SignerRef {
            address,
            image_hash: None,
            weight: 1,
        };
        (handler, clock, leaf, SigningRequest::from_envelope(&envelope))
    }

    #[tokio::test]
    async fn test_challenge_flow() {
        let (handler, _, leaf, request) = setup();
        assert_eq!(
            handler.status(&leaf, &request).await,
            SignerStatus::Actionable {
                action: Action::RequestChallenge
            }
        );

        let outcome = handler
            .respond(&leaf, &request, ActionResponse::RequestChallenge)
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            ActionOutcome::Actionable(Action::AnswerChallenge { attempts_left: 2, .. })
        ));
        assert!(!handler.status(&leaf, &request).await.is_ready());
        assert!(handler.sign(&leaf, &request).await.is_err());

        let outcome = handler
            .respond(&leaf, &request, ActionResponse::Answer("123456".into()))
            .await
            .unwrap();
        assert_eq!(outcome, ActionOutcome::Ready);
        assert!(handler.status(&leaf, &request).await.is_ready());

        let signature = handler.sign(&leaf, &request).await.unwrap();
        signature.verify(&request.digest).unwrap();

        // Signing consumes the verification
        assert_eq!(
            handler.status(&leaf, &request).await,
            SignerStatus::Actionable {
                action: Action::RequestChallenge
            }
        );
    }

    #[tokio::test]
    async fn test_wrong_answers_exhaust_attempts() {
        let (handler, _, leaf, request) = setup();
        handler
            .respond(&leaf, &request, ActionResponse::RequestChallenge)
            .await
            .unwrap();

        let first = handler
            .respond(&leaf, &request, ActionResponse::Answer("000000".into()))
            .await;
        assert!(matches!(first, Err(SignerError::AnswerIncorrect { remaining: 1 })));
        assert!(matches!(
            handler.status(&leaf, &request).await,
            SignerStatus::Actionable {
                action: Action::AnswerChallenge { attempts_left: 1, .. }
            }
        ));

        let second = handler
            .respond(&leaf, &request, ActionResponse::Answer("111111".into()))
            .await;
        assert!(matches!(second, Err(SignerError::TooManyAttempts)));

        // The challenge is gone; the right answer no longer helps
        let late = handler
            .respond(&leaf, &request, ActionResponse::Answer("123456".into()))
            .await;
        assert!(matches!(late, Err(SignerError::ChallengeExpired)));
    }

    #[tokio::test]
    async fn test_expired_challenge() {
        let (handler, clock, leaf, request) = setup();
        handler
            .respond(&leaf, &request, ActionResponse::RequestChallenge)
            .await
            .unwrap();
        clock.advance(60);

        assert_eq!(
            handler.status(&leaf, &request).await,
            SignerStatus::Actionable {
                action: Action::RequestChallenge
            }
        );
        let answer = handler
            .respond(&leaf, &request, ActionResponse::Answer("123456".into()))
            .await;
        assert!(matches!(answer, Err(SignerError::ChallengeExpired)));
    }

    #[tokio::test]
    async fn test_answer_without_challenge() {
        let (handler, _, leaf, request) = setup();
        let answer = handler
            .respond(&leaf, &request, ActionResponse::Answer("123456".into()))
            .await;
        assert!(matches!(answer, Err(SignerError::ChallengeExpired)));
    }

    #[tokio::test]
    async fn test_verification_is_bound_to_its_digest() {
        let (handler, _, leaf, request) = setup();
        let mut other = request.clone();
        other.digest = Hash32([0x77; 32]);

        handler
            .respond(&leaf, &request, ActionResponse::RequestChallenge)
            .await
            .unwrap();
        handler
            .respond(&leaf, &request, ActionResponse::Answer("123456".into()))
            .await
            .unwrap();

        // Verified for the first request only
        assert_eq!(
            handler.status(&leaf, &other).await,
            SignerStatus::Actionable {
                action: Action::RequestChallenge
            }
        );
        assert!(handler.status(&leaf, &request).await.is_ready());
        assert!(matches!(
            handler.sign(&leaf, &other).await,
            Err(SignerError::SigningFailed(_))
        ));
        assert!(matches!(
            handler
                .respond(&leaf, &other, ActionResponse::Answer("123456".into()))
                .await,
            Err(SignerError::ChallengeExpired)
        ));

        let signature = handler.sign(&leaf, &request).await.unwrap();
        signature.verify(&request.digest).unwrap();
    }
}
