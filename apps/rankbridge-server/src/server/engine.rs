use std::{sync::Arc, time::Duration};

use rand::{rngs::OsRng, Rng};
use rankbridge_core::VerificationCode;

use super::{
    audit::AuditSink, core::DEFAULT_VERIFICATION_TTL_SECS, errors::BridgeError,
    platform::PlatformCredential, settings::ValidatedSettings,
};

/// The identity-linking and rank-authorization engine.
///
/// `P` talks to the game platform, `L` holds completed account links and `V` holds
/// outstanding verification challenges. All three are injected so tests can swap them.
pub(crate) struct Bridge<P, L, V> {
    pub(super) platform: P,
    pub(super) links: L,
    pub(super) pending: V,
    pub(super) settings: ValidatedSettings,
    pub(super) credential: Option<PlatformCredential>,
    pub(super) audit: Arc<dyn AuditSink>,
    pub(super) verification_ttl: Duration,
}

impl<P, L, V> Bridge<P, L, V> {
    pub(crate) fn new(
        platform: P,
        links: L,
        pending: V,
        settings: ValidatedSettings,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            platform,
            links,
            pending,
            settings,
            credential: None,
            audit,
            verification_ttl: Duration::from_secs(DEFAULT_VERIFICATION_TTL_SECS),
        }
    }

    #[must_use]
    pub(crate) fn with_credential(mut self, credential: Option<PlatformCredential>) -> Self {
        self.credential = credential;
        self
    }

    #[must_use]
    pub(crate) fn with_verification_ttl(mut self, ttl: Duration) -> Self {
        self.verification_ttl = ttl;
        self
    }

    pub(super) fn credential(&self) -> Result<&PlatformCredential, BridgeError> {
        self.credential.as_ref().ok_or_else(|| {
            BridgeError::ConfigurationError(String::from(
                "no platform credential is configured; rank changes are unavailable",
            ))
        })
    }
}

pub(super) fn generate_verification_code() -> VerificationCode {
    let mut rng = OsRng;
    VerificationCode::generate_with(|bound| rng.gen_range(0..bound))
}
