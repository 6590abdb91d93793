use rankbridge_core::{
    BranchName, ChatIdentity, LadderDirection, PlatformUserId, PlatformUsername, RankLadder,
    RoleLadderEntry,
};
use rankbridge_protocol::{AuditEvent, AuditKind};

use super::{
    engine::Bridge,
    errors::{BridgeError, DenialReason},
    permissions::{PermissionGrant, RankScope, ScopePolicy},
    platform::{GroupRank, PlatformApi},
    store::{KeyValueStore, PendingVerification},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum RankOperation {
    /// Assign the role with this name (matched case-insensitively).
    Set { role: String },
    Promote,
    Demote,
}

impl RankOperation {
    const fn audit_kind(&self, branch: bool) -> AuditKind {
        match (self, branch) {
            (Self::Set { .. }, false) => AuditKind::RankSet,
            (Self::Promote, false) => AuditKind::Promotion,
            (Self::Demote, false) => AuditKind::Demotion,
            (Self::Set { .. }, true) => AuditKind::BranchRankSet,
            (Self::Promote, true) => AuditKind::BranchPromotion,
            (Self::Demote, true) => AuditKind::BranchDemotion,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RankChangeRequest {
    pub(crate) caller: ChatIdentity,
    pub(crate) scope: RankScope,
    pub(crate) target: PlatformUsername,
    pub(crate) operation: RankOperation,
    pub(crate) reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RankChangeOutcome {
    pub(crate) target: PlatformUsername,
    pub(crate) target_user_id: PlatformUserId,
    pub(crate) old_rank: Option<GroupRank>,
    pub(crate) new_rank: RoleLadderEntry,
    pub(crate) branch: Option<BranchName>,
    pub(crate) performed_by: PlatformUsername,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum JoinDecision {
    Accept,
    Reject,
}

impl JoinDecision {
    pub(crate) const fn as_str(self) -> &'static str {
        match self {
            Self::Accept => "accept",
            Self::Reject => "reject",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct JoinRequestDecision {
    pub(crate) caller: ChatIdentity,
    pub(crate) branch: BranchName,
    pub(crate) target: PlatformUsername,
    pub(crate) decision: JoinDecision,
    pub(crate) reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct JoinDecisionOutcome {
    pub(crate) target: PlatformUsername,
    pub(crate) target_user_id: PlatformUserId,
    pub(crate) branch: BranchName,
    pub(crate) decision: JoinDecision,
    pub(crate) performed_by: PlatformUsername,
}

/// A fully authorized mutation, ready for the single platform call.
struct MutationPlan {
    policy: ScopePolicy,
    grant: PermissionGrant,
    kind: AuditKind,
    target: PlatformUsername,
    target_user_id: PlatformUserId,
    old_rank: Option<GroupRank>,
    new_rank: RoleLadderEntry,
    reason: Option<String>,
}

impl<P, L, V> Bridge<P, L, V>
where
    P: PlatformApi,
    L: KeyValueStore<PlatformUsername>,
    V: KeyValueStore<PendingVerification>,
{
    /// Sets, promotes or demotes a member's rank on behalf of a linked caller.
    pub(crate) async fn change_rank(
        &self,
        request: RankChangeRequest,
    ) -> Result<RankChangeOutcome, BridgeError> {
        let policy = self.scope_policy(&request.scope)?;
        self.credential()?;
        let branch_scope = policy.branch.is_some();

        let target_user_id = self
            .platform
            .resolve_user_id(&request.target)
            .await?
            .ok_or_else(|| BridgeError::unknown_account(&request.target))?;
        let old_rank = self
            .platform
            .rank_in_group(target_user_id, policy.group)
            .await?;
        let must_be_member =
            branch_scope || !matches!(request.operation, RankOperation::Set { .. });
        if old_rank.is_none() && must_be_member {
            return Err(BridgeError::NotFound(format!(
                "{} is not a member of the target group",
                request.target
            )));
        }

        let ladder = self.fetch_ladder(&policy).await?;
        let new_rank = match &request.operation {
            RankOperation::Set { role } => ladder.find_by_name(role)?.clone(),
            RankOperation::Promote | RankOperation::Demote => {
                let direction = if request.operation == RankOperation::Promote {
                    LadderDirection::Up
                } else {
                    LadderDirection::Down
                };
                let current = old_rank.as_ref().map(|rank| rank.rank).ok_or_else(|| {
                    BridgeError::NotFound(format!("{} has no rank to move", request.target))
                })?;
                ladder.step(current, direction)?.clone()
            }
        };

        let grant = self
            .resolve_permission(&request.caller, &policy, new_rank.rank)
            .await?;
        if grant.caller.user_id == target_user_id {
            return Err(DenialReason::SelfTarget.into());
        }

        self.execute_mutation(MutationPlan {
            kind: request.operation.audit_kind(branch_scope),
            policy,
            grant,
            target: request.target,
            target_user_id,
            old_rank,
            new_rank,
            reason: request.reason,
        })
        .await
    }

    /// Accepts or rejects a pending join request for a branch group.
    pub(crate) async fn decide_join_request(
        &self,
        request: JoinRequestDecision,
    ) -> Result<JoinDecisionOutcome, BridgeError> {
        let policy = self.scope_policy(&RankScope::Branch(request.branch.clone()))?;
        let credential = self.credential()?;
        let caller = self.authorize_caller(&request.caller, &policy).await?;
        let target_user_id = self
            .platform
            .resolve_user_id(&request.target)
            .await?
            .ok_or_else(|| BridgeError::unknown_account(&request.target))?;

        let result = match request.decision {
            JoinDecision::Accept => {
                self.platform
                    .accept_join_request(credential, policy.group, target_user_id)
                    .await
            }
            JoinDecision::Reject => {
                self.platform
                    .reject_join_request(credential, policy.group, target_user_id)
                    .await
            }
        };
        if let Err(e) = result {
            tracing::warn!(
                event = "branch.join_request",
                outcome = "platform_failed",
                decision = request.decision.as_str(),
                branch = %request.branch,
                target = %request.target,
                error = %e,
            );
            return Err(e.into());
        }

        tracing::info!(
            event = "branch.join_request",
            outcome = "applied",
            decision = request.decision.as_str(),
            branch = %request.branch,
            target = %request.target,
            caller = %caller.username,
        );
        let kind = match request.decision {
            JoinDecision::Accept => AuditKind::BranchRequestAccepted,
            JoinDecision::Reject => AuditKind::BranchRequestRejected,
        };
        self.audit.dispatch(
            AuditEvent::new(
                kind,
                request.target.as_str(),
                target_user_id.get(),
                caller.audit_actor(),
            )
            .with_branch(Some(request.branch.as_str().to_owned()))
            .with_reason(request.reason),
        );

        Ok(JoinDecisionOutcome {
            target: request.target,
            target_user_id,
            branch: request.branch,
            decision: request.decision,
            performed_by: caller.username,
        })
    }

    async fn fetch_ladder(&self, policy: &ScopePolicy) -> Result<RankLadder, BridgeError> {
        let roles = self
            .platform
            .group_roles(policy.group)
            .await?
            .ok_or_else(|| {
                BridgeError::ExternalCallFailure(format!(
                    "roles of group {} are unavailable",
                    policy.group
                ))
            })?;
        Ok(RankLadder::try_from_roles(roles)?)
    }

    /// Performs the one role change a plan describes, then hands the audit event off.
    async fn execute_mutation(
        &self,
        plan: MutationPlan,
    ) -> Result<RankChangeOutcome, BridgeError> {
        let credential = self.credential()?;
        let MutationPlan {
            policy,
            grant,
            kind,
            target,
            target_user_id,
            old_rank,
            new_rank,
            reason,
        } = plan;
        let caller = grant.caller;

        if let Err(e) = self
            .platform
            .set_user_role(credential, policy.group, target_user_id, new_rank.role_id)
            .await
        {
            tracing::warn!(
                event = kind.event_type(),
                outcome = "platform_failed",
                target = %target,
                caller = %caller.username,
                error = %e,
            );
            return Err(e.into());
        }

        tracing::info!(
            event = kind.event_type(),
            outcome = "applied",
            group = %policy.group,
            target = %target,
            new_rank = %new_rank,
            caller = %caller.username,
            ceiling = grant.ceiling.map(|ceiling| ceiling.get()),
        );
        let old_rank_label = old_rank
            .as_ref()
            .map(|rank| format!("{} ({})", rank.name, rank.rank));
        self.audit.dispatch(
            AuditEvent::new(
                kind,
                target.as_str(),
                target_user_id.get(),
                caller.audit_actor(),
            )
            .with_ranks(old_rank_label, new_rank.to_string())
            .with_branch(policy.branch.as_ref().map(ToString::to_string))
            .with_reason(reason),
        );

        Ok(RankChangeOutcome {
            target,
            target_user_id,
            old_rank,
            new_rank,
            branch: policy.branch,
            performed_by: caller.username,
        })
    }
}
