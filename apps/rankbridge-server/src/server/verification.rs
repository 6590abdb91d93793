use rankbridge_core::{ChatIdentity, PlatformUsername, VerificationCode};

use super::{
    core::now_unix_ms,
    engine::{generate_verification_code, Bridge},
    errors::{BridgeError, DenialReason},
    platform::{GroupRank, PlatformApi},
    store::{KeyValueStore, PendingVerification},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LinkRequestKind {
    Link,
    Change,
}

impl LinkRequestKind {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Link => "link",
            Self::Change => "change",
        }
    }
}

/// Where one chat identity stands in the link lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum LinkState {
    Unlinked,
    /// A challenge is outstanding. `linked` is the account still in force during a change.
    Pending {
        pending: PendingVerification,
        linked: Option<PlatformUsername>,
    },
    Linked {
        username: PlatformUsername,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum VerificationOutcome {
    Linked {
        username: PlatformUsername,
        previous: Option<PlatformUsername>,
        rank: GroupRank,
    },
    VerificationRequired {
        code: VerificationCode,
        username: PlatformUsername,
        expires_at_unix_ms: i64,
        current_link: Option<PlatformUsername>,
    },
}

impl<P, L, V> Bridge<P, L, V>
where
    P: PlatformApi,
    L: KeyValueStore<PlatformUsername>,
    V: KeyValueStore<PendingVerification>,
{
    /// Starts or completes linking an unlinked identity to `claimed`.
    pub(crate) async fn request_link(
        &self,
        identity: &ChatIdentity,
        claimed: &PlatformUsername,
    ) -> Result<VerificationOutcome, BridgeError> {
        self.request_verification(LinkRequestKind::Link, identity, claimed)
            .await
    }

    /// Starts or completes moving a linked identity to `claimed`. The old link stays in
    /// force until the new account is proven.
    pub(crate) async fn request_change(
        &self,
        identity: &ChatIdentity,
        claimed: &PlatformUsername,
    ) -> Result<VerificationOutcome, BridgeError> {
        self.request_verification(LinkRequestKind::Change, identity, claimed)
            .await
    }

    pub(crate) async fn link_state(&self, identity: &ChatIdentity) -> LinkState {
        self.sweep_expired_verifications(now_unix_ms()).await;
        let linked = self.links.get(identity).await;
        match (self.pending.get(identity).await, linked) {
            (Some(pending), linked) => LinkState::Pending { pending, linked },
            (None, Some(username)) => LinkState::Linked { username },
            (None, None) => LinkState::Unlinked,
        }
    }

    async fn request_verification(
        &self,
        kind: LinkRequestKind,
        identity: &ChatIdentity,
        claimed: &PlatformUsername,
    ) -> Result<VerificationOutcome, BridgeError> {
        let current_link = self.links.get(identity).await;
        match (kind, &current_link) {
            (LinkRequestKind::Link, Some(username)) => {
                return Err(DenialReason::AlreadyLinked(username.clone()).into());
            }
            (LinkRequestKind::Change, None) => return Err(DenialReason::NotLinked.into()),
            _ => {}
        }

        let now = now_unix_ms();
        self.sweep_expired_verifications(now).await;

        let user_id = self
            .platform
            .resolve_user_id(claimed)
            .await?
            .ok_or_else(|| BridgeError::unknown_account(claimed))?;
        let rank = self
            .platform
            .rank_in_group(user_id, self.settings.primary_group)
            .await?
            .ok_or_else(|| {
                BridgeError::NotFound(format!(
                    "{claimed} is not a member of the group; join it before linking"
                ))
            })?;

        let pending = self
            .pending
            .get(identity)
            .await
            .filter(|record| !record.is_expired(now_unix_ms(), self.verification_ttl));
        if let Some(pending) = pending {
            if !pending.claimed_username.matches(claimed) {
                tracing::info!(
                    event = "link.code_invalidated",
                    request = kind.as_str(),
                    %identity,
                    previous_claim = %pending.claimed_username,
                    claim = %claimed,
                );
            } else if self
                .platform
                .verify_profile_code(user_id, &pending.code)
                .await?
            {
                return self
                    .complete_link(kind, identity, claimed, current_link, rank)
                    .await;
            }
        }

        self.issue_code(kind, identity, claimed, now, current_link)
            .await
    }

    async fn complete_link(
        &self,
        kind: LinkRequestKind,
        identity: &ChatIdentity,
        claimed: &PlatformUsername,
        previous: Option<PlatformUsername>,
        rank: GroupRank,
    ) -> Result<VerificationOutcome, BridgeError> {
        if let Err(e) = self.links.put(identity, claimed.clone()).await {
            tracing::warn!(
                event = "link.completed",
                outcome = "persistence_failed",
                request = kind.as_str(),
                %identity,
                error = %e,
            );
            return Err(BridgeError::PersistenceFailure(String::from(
                "your account was verified but the link could not be saved",
            )));
        }
        if let Err(e) = self.pending.remove(identity).await {
            tracing::warn!(
                event = "link.pending_cleanup",
                outcome = "failed",
                %identity,
                error = %e,
            );
        }
        tracing::info!(
            event = "link.completed",
            outcome = "linked",
            request = kind.as_str(),
            %identity,
            username = %claimed,
            previous = previous.as_ref().map(PlatformUsername::as_str),
        );
        Ok(VerificationOutcome::Linked {
            username: claimed.clone(),
            previous,
            rank,
        })
    }

    async fn issue_code(
        &self,
        kind: LinkRequestKind,
        identity: &ChatIdentity,
        claimed: &PlatformUsername,
        now: i64,
        current_link: Option<PlatformUsername>,
    ) -> Result<VerificationOutcome, BridgeError> {
        let record = PendingVerification {
            code: generate_verification_code(),
            claimed_username: claimed.clone(),
            issued_at_unix_ms: now,
        };
        let expires_at_unix_ms = record.expires_at_unix_ms(self.verification_ttl);
        let code = record.code.clone();
        if let Err(e) = self.pending.put(identity, record).await {
            tracing::warn!(
                event = "link.code_issued",
                outcome = "persistence_failed",
                %identity,
                error = %e,
            );
            return Err(BridgeError::PersistenceFailure(String::from(
                "the verification code could not be saved",
            )));
        }
        tracing::info!(
            event = "link.code_issued",
            outcome = "verification_required",
            request = kind.as_str(),
            %identity,
            claim = %claimed,
            expires_at_unix_ms,
        );
        Ok(VerificationOutcome::VerificationRequired {
            code,
            username: claimed.clone(),
            expires_at_unix_ms,
            current_link,
        })
    }

    /// Drops every challenge older than the verification ttl. Failure only delays cleanup.
    pub(super) async fn sweep_expired_verifications(&self, now: i64) {
        let ttl = self.verification_ttl;
        match self
            .pending
            .retain(|record| !record.is_expired(now, ttl))
            .await
        {
            Ok(0) => {}
            Ok(dropped) => tracing::info!(event = "link.expired_swept", dropped),
            Err(e) => {
                tracing::warn!(event = "link.expired_swept", outcome = "failed", error = %e);
            }
        }
    }
}
