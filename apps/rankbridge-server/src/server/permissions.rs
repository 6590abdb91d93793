use rankbridge_core::{
    rank_is_allowed, resolve_ceiling, BranchName, ChatIdentity, GroupId, PlatformUserId,
    PlatformUsername, RankValue,
};
use rankbridge_protocol::AuditActor;

use super::{
    engine::Bridge,
    errors::{BridgeError, DenialReason},
    platform::{GroupRank, PlatformApi},
    store::{KeyValueStore, PendingVerification},
};

/// Which group a rank operation acts on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum RankScope {
    Primary,
    Branch(BranchName),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CeilingRule {
    /// Capped by the caller's own rank and the configured maximum.
    CallerRank { max_assignable: Option<RankValue> },
    Unbounded,
}

/// Configuration that applies to one scope, resolved before any platform call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ScopePolicy {
    pub(crate) group: GroupId,
    pub(crate) branch: Option<BranchName>,
    allow_list: Option<Vec<RankValue>>,
    ceiling: CeilingRule,
}

impl ScopePolicy {
    fn group_label(&self) -> String {
        match &self.branch {
            Some(branch) => format!("{branch} branch group"),
            None => String::from("group"),
        }
    }
}

/// A linked caller whose membership and allow-list checks passed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct AuthorizedCaller {
    pub(crate) identity: ChatIdentity,
    pub(crate) user_id: PlatformUserId,
    pub(crate) username: PlatformUsername,
    pub(crate) rank: GroupRank,
}

impl AuthorizedCaller {
    pub(crate) fn audit_actor(&self) -> AuditActor {
        AuditActor {
            chat_identity: self.identity.as_str().to_owned(),
            username: self.username.as_str().to_owned(),
            rank_name: self.rank.name.clone(),
            rank: self.rank.rank.get(),
        }
    }
}

/// A positive permission decision for one target rank.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PermissionGrant {
    pub(crate) caller: AuthorizedCaller,
    /// `None` when the scope has no ceiling.
    pub(crate) ceiling: Option<RankValue>,
}

/// Applies the ceiling rule of `policy` to an already authorized caller.
pub(crate) fn grant_for_target(
    policy: &ScopePolicy,
    caller: AuthorizedCaller,
    target_rank: RankValue,
) -> Result<PermissionGrant, BridgeError> {
    let ceiling = match policy.ceiling {
        CeilingRule::CallerRank { max_assignable } => {
            Some(resolve_ceiling(caller.rank.rank, max_assignable))
        }
        CeilingRule::Unbounded => None,
    };
    if let Some(ceiling) = ceiling {
        if target_rank > ceiling {
            return Err(DenialReason::ExceedsCeiling {
                ceiling,
                requested: target_rank,
            }
            .into());
        }
    }
    Ok(PermissionGrant { caller, ceiling })
}

impl<P, L, V> Bridge<P, L, V>
where
    P: PlatformApi,
    L: KeyValueStore<PlatformUsername>,
    V: KeyValueStore<PendingVerification>,
{
    /// Resolves configuration for `scope`. Unknown or placeholder branches fail here.
    pub(crate) fn scope_policy(&self, scope: &RankScope) -> Result<ScopePolicy, BridgeError> {
        match scope {
            RankScope::Primary => Ok(ScopePolicy {
                group: self.settings.primary_group,
                branch: None,
                allow_list: self.settings.allowed_ranks.clone(),
                ceiling: CeilingRule::CallerRank {
                    max_assignable: self.settings.max_assignable,
                },
            }),
            RankScope::Branch(branch) => {
                let (group, manager_ranks) = self.settings.branch(branch)?;
                Ok(ScopePolicy {
                    group,
                    branch: Some(branch.clone()),
                    allow_list: manager_ranks.map(<[RankValue]>::to_vec),
                    ceiling: CeilingRule::Unbounded,
                })
            }
        }
    }

    /// Checks that the caller is linked, resolvable, a member of the scope's group and on
    /// its allow-list. The link read here is the authoritative one, even mid-change.
    pub(crate) async fn authorize_caller(
        &self,
        identity: &ChatIdentity,
        policy: &ScopePolicy,
    ) -> Result<AuthorizedCaller, BridgeError> {
        let username = self
            .links
            .get(identity)
            .await
            .ok_or(DenialReason::NotLinked)?;
        let user_id = self
            .platform
            .resolve_user_id(&username)
            .await?
            .ok_or_else(|| DenialReason::LinkedAccountUnresolvable(username.clone()))?;
        let rank = self
            .platform
            .rank_in_group(user_id, policy.group)
            .await?
            .ok_or_else(|| DenialReason::NotGroupMember {
                scope: policy.group_label(),
            })?;
        if !rank_is_allowed(policy.allow_list.as_deref(), rank.rank) {
            return Err(DenialReason::RankNotAuthorized {
                allowed: policy.allow_list.clone().unwrap_or_default(),
                actual: rank.rank,
            }
            .into());
        }
        Ok(AuthorizedCaller {
            identity: identity.clone(),
            user_id,
            username,
            rank,
        })
    }

    /// Full permission decision for assigning `target_rank` within `scope`.
    pub(crate) async fn resolve_permission(
        &self,
        identity: &ChatIdentity,
        policy: &ScopePolicy,
        target_rank: RankValue,
    ) -> Result<PermissionGrant, BridgeError> {
        let caller = self.authorize_caller(identity, policy).await?;
        let grant = grant_for_target(policy, caller, target_rank);
        if let Err(BridgeError::PermissionDenied(reason)) = &grant {
            tracing::info!(
                event = "permission.denied",
                %identity,
                group = %policy.group,
                %reason,
            );
        }
        grant
    }
}
