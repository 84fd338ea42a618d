//! Identity verification for the modelmesh runtime.
//!
//! The runtime does not manage keys or issue credentials itself; it only
//! consumes an already-verified identity token produced by an external
//! authority (an SSO provider, a service mesh sidecar, a signing gateway).
//! This crate is the single seam where that contract is checked before a
//! request is allowed to reach the orchestrator.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

/// Caller-supplied proof of identity. `signature` is opaque to this crate;
/// verification is delegated to whatever `IdentityVerifier` is configured.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityToken {
    pub subject: String,
    pub issued_at: chrono::DateTime<chrono::Utc>,
    pub expires_at: chrono::DateTime<chrono::Utc>,
    pub signature: String,
}

/// The result of a successful verification: who the caller is and what
/// tier they're entitled to route at.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifiedIdentity {
    pub subject: String,
    pub tier: UserTier,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum UserTier {
    Free,
    Pro,
    Enterprise,
}

#[derive(Debug, Error)]
pub enum SecurityError {
    #[error("identity token expired at {expires_at}")]
    Expired {
        expires_at: chrono::DateTime<chrono::Utc>,
    },
    #[error("identity token signature invalid")]
    InvalidSignature,
    #[error("identity token missing required claim: {0}")]
    MissingClaim(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Require a non-expired token on every request admission.
    pub require_verified_identity: bool,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            require_verified_identity: true,
        }
    }
}

/// Minimal identity verification seam consumed by the orchestrator.
///
/// Signature verification itself is out of scope (delegated to the issuing
/// authority); this only enforces expiry and claim presence, mirroring how
/// far a zero-trust gateway's local check typically goes before trusting an
/// upstream-signed token.
#[derive(Debug)]
pub struct SecurityFramework {
    config: SecurityConfig,
}

impl SecurityFramework {
    pub async fn new(config: &SecurityConfig) -> Result<Self> {
        info!(
            require_verified_identity = config.require_verified_identity,
            "initializing security framework"
        );
        Ok(Self {
            config: config.clone(),
        })
    }

    pub async fn start(&self) -> Result<()> {
        info!("security framework active");
        Ok(())
    }

    pub async fn stop(&self) -> Result<()> {
        info!("security framework stopped");
        Ok(())
    }

    /// Verify a caller-supplied token and derive the tier it is entitled to.
    pub fn verify(&self, token: &IdentityToken) -> Result<VerifiedIdentity, SecurityError> {
        if !self.config.require_verified_identity {
            return Ok(VerifiedIdentity {
                subject: token.subject.clone(),
                tier: UserTier::Free,
            });
        }

        if token.subject.is_empty() {
            return Err(SecurityError::MissingClaim("subject".into()));
        }
        if token.signature.is_empty() {
            return Err(SecurityError::InvalidSignature);
        }
        if chrono::Utc::now() > token.expires_at {
            return Err(SecurityError::Expired {
                expires_at: token.expires_at,
            });
        }

        let tier = tier_from_subject(&token.subject);
        Ok(VerifiedIdentity {
            subject: token.subject.clone(),
            tier,
        })
    }
}

/// Placeholder tier derivation until an external entitlement lookup is wired
/// in; real deployments resolve this from the token's claims instead.
fn tier_from_subject(subject: &str) -> UserTier {
    if subject.ends_with("@enterprise") {
        UserTier::Enterprise
    } else if subject.ends_with("@pro") {
        UserTier::Pro
    } else {
        UserTier::Free
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token(subject: &str, sig: &str, expires_in: chrono::Duration) -> IdentityToken {
        IdentityToken {
            subject: subject.to_string(),
            issued_at: chrono::Utc::now(),
            expires_at: chrono::Utc::now() + expires_in,
            signature: sig.to_string(),
        }
    }

    #[tokio::test]
    async fn accepts_valid_token() {
        let framework = SecurityFramework::new(&SecurityConfig::default())
            .await
            .unwrap();
        let t = token("alice@pro", "sig", chrono::Duration::minutes(5));
        let identity = framework.verify(&t).unwrap();
        assert_eq!(identity.tier, UserTier::Pro);
    }

    #[tokio::test]
    async fn rejects_expired_token() {
        let framework = SecurityFramework::new(&SecurityConfig::default())
            .await
            .unwrap();
        let t = token("alice@pro", "sig", chrono::Duration::minutes(-5));
        assert!(matches!(
            framework.verify(&t),
            Err(SecurityError::Expired { .. })
        ));
    }

    #[tokio::test]
    async fn rejects_missing_signature() {
        let framework = SecurityFramework::new(&SecurityConfig::default())
            .await
            .unwrap();
        let t = token("alice@pro", "", chrono::Duration::minutes(5));
        assert!(matches!(
            framework.verify(&t),
            Err(SecurityError::InvalidSignature)
        ));
    }
}
