//! Signer configuration, parsed from a TOML file plus environment variable overrides.
//!
//! Priority: environment variables > config file > defaults.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use crate::handler::HandlerKind;
use crate::SignerError;

/// Top-level signer configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SignerConfig {
    /// Session behaviour
    #[serde(default)]
    pub orchestrator: OrchestratorSection,

    /// Identity challenge limits
    #[serde(default)]
    pub identity: IdentitySection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorSection {
    /// Per-leaf status query timeout in milliseconds
    #[serde(default = "default_status_timeout")]
    pub status_timeout_ms: u64,

    /// Per-leaf signing timeout in milliseconds
    #[serde(default = "default_sign_timeout")]
    pub sign_timeout_ms: u64,

    /// Order in which ready leaves are signed by `collect`
    #[serde(default = "default_kind_priority")]
    pub kind_priority: Vec<HandlerKind>,
}

impl Default for OrchestratorSection {
    fn default() -> Self {
        Self {
            status_timeout_ms: default_status_timeout(),
            sign_timeout_ms: default_sign_timeout(),
            kind_priority: default_kind_priority(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentitySection {
    /// How long an issued challenge stays answerable
    #[serde(default = "default_challenge_ttl")]
    pub challenge_ttl_secs: u64,

    /// Wrong answers allowed before the challenge is discarded
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

impl Default for IdentitySection {
    fn default() -> Self {
        Self {
            challenge_ttl_secs: default_challenge_ttl(),
            max_attempts: default_max_attempts(),
        }
    }
}

// ============================================================================
// Default value functions
// ============================================================================

fn default_status_timeout() -> u64 {
    5_000
}

fn default_sign_timeout() -> u64 {
    30_000
}

/// Guard last: it co-signs only once the other leaves are in.
fn default_kind_priority() -> Vec<HandlerKind> {
    vec![
        HandlerKind::LocalKey,
        HandlerKind::Identity,
        HandlerKind::Recovery,
        HandlerKind::Guard,
    ]
}

fn default_challenge_ttl() -> u64 {
    300 // 5 minutes
}

fn default_max_attempts() -> u32 {
    3
}

// ============================================================================
// Loading & environment override
// ============================================================================

impl SignerConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, SignerError> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            SignerError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self, SignerError> {
        toml::from_str(contents).map_err(|e| SignerError::Config(format!("invalid TOML: {}", e)))
    }

    /// File (if any), then environment, then validation.
    pub fn load(path: Option<&Path>) -> Result<Self, SignerError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides.
    ///
    /// Supported env vars:
    /// - `QUORUM_STATUS_TIMEOUT_MS`
    /// - `QUORUM_SIGN_TIMEOUT_MS`
    /// - `QUORUM_KIND_PRIORITY` (comma separated, e.g. `local-key,guard`)
    /// - `QUORUM_CHALLENGE_TTL_SECS`
    /// - `QUORUM_MAX_ATTEMPTS`
    pub fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("QUORUM_STATUS_TIMEOUT_MS") {
            if let Ok(ms) = v.parse::<u64>() {
                self.orchestrator.status_timeout_ms = ms;
            }
        }
        if let Ok(v) = std::env::var("QUORUM_SIGN_TIMEOUT_MS") {
            if let Ok(ms) = v.parse::<u64>() {
                self.orchestrator.sign_timeout_ms = ms;
            }
        }
        if let Ok(v) = std::env::var("QUORUM_KIND_PRIORITY") {
            let parsed: Result<Vec<HandlerKind>, _> =
                v.split(',').map(|s| s.parse::<HandlerKind>()).collect();
            match parsed {
                Ok(kinds) => self.orchestrator.kind_priority = kinds,
                Err(e) => log::warn!("Ignoring QUORUM_KIND_PRIORITY: {}", e),
            }
        }
        if let Ok(v) = std::env::var("QUORUM_CHALLENGE_TTL_SECS") {
            if let Ok(secs) = v.parse::<u64>() {
                self.identity.challenge_ttl_secs = secs;
            }
        }
        if let Ok(v) = std::env::var("QUORUM_MAX_ATTEMPTS") {
            if let Ok(attempts) = v.parse::<u32>() {
                self.identity.max_attempts = attempts;
            }
        }
    }

    /// Validate that the configuration is usable.
    pub fn validate(&self) -> Result<(), SignerError> {
        if self.orchestrator.status_timeout_ms == 0 {
            return Err(SignerError::Config(
                "orchestrator.status_timeout_ms must be > 0".into(),
            ));
        }
        if self.orchestrator.sign_timeout_ms == 0 {
            return Err(SignerError::Config(
                "orchestrator.sign_timeout_ms must be > 0".into(),
            ));
        }

        let mut seen = HashSet::new();
        for kind in &self.orchestrator.kind_priority {
            if !seen.insert(kind) {
                return Err(SignerError::Config(format!(
                    "orchestrator.kind_priority lists {} twice",
                    kind
                )));
            }
        }

        if self.identity.challenge_ttl_secs == 0 {
            return Err(SignerError::Config(
                "identity.challenge_ttl_secs must be > 0".into(),
            ));
        }
        if self.identity.max_attempts == 0 {
            return Err(SignerError::Config(
                "identity.max_attempts must be > 0".into(),
            ));
        }
        Ok(())
    }

    pub fn status_timeout(&self) -> Duration {
        Duration::from_millis(self.orchestrator.status_timeout_ms)
    }

    pub fn sign_timeout(&self) -> Duration {
        Duration::from_millis(self.orchestrator.sign_timeout_ms)
    }

    /// Position of a kind in the signing order; unlisted kinds go last.
    pub fn priority_of(&self, kind: Option<HandlerKind>) -> usize {
        kind.and_then(|kind| {
            self.orchestrator
                .kind_priority
                .iter()
                .position(|k| *k == kind)
        })
        .unwrap_or(self.orchestrator.kind_priority.len())
    }
}

// ============================================================================
// Tests
// ============================================================================
