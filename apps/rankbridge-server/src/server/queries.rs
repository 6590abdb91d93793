use rankbridge_core::{PlatformUserId, PlatformUsername};

use super::{
    engine::Bridge,
    errors::BridgeError,
    platform::{GameActivity, GroupMembership, GroupRank, PlatformApi},
    store::{KeyValueStore, PendingVerification},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RankLookup {
    pub(crate) user_id: PlatformUserId,
    pub(crate) username: String,
    pub(crate) display_name: String,
    pub(crate) rank: GroupRank,
}

impl<P, L, V> Bridge<P, L, V>
where
    P: PlatformApi,
    L: KeyValueStore<PlatformUsername>,
    V: KeyValueStore<PendingVerification>,
{
    /// A member's rank in the primary group, with their platform display name.
    pub(crate) async fn rank_of(
        &self,
        username: &PlatformUsername,
    ) -> Result<RankLookup, BridgeError> {
        let user_id = self
            .platform
            .resolve_user_id(username)
            .await?
            .ok_or_else(|| BridgeError::unknown_account(username))?;
        let profile = self
            .platform
            .user_info(user_id)
            .await?
            .ok_or_else(|| BridgeError::unknown_account(username))?;
        let rank = self
            .platform
            .rank_in_group(user_id, self.settings.primary_group)
            .await?
            .ok_or_else(|| {
                BridgeError::NotFound(format!("{username} is not a member of the group"))
            })?;
        Ok(RankLookup {
            user_id,
            username: profile.name,
            display_name: profile.display_name,
            rank,
        })
    }

    /// Every group the account belongs to, as reported by the platform.
    pub(crate) async fn groups_of(
        &self,
        username: &PlatformUsername,
    ) -> Result<(PlatformUserId, Vec<GroupMembership>), BridgeError> {
        let user_id = self
            .platform
            .resolve_user_id(username)
            .await?
            .ok_or_else(|| BridgeError::unknown_account(username))?;
        let groups = self.platform.user_groups(user_id).await?;
        Ok((user_id, groups))
    }

    pub(crate) async fn game_activity(&self) -> Result<GameActivity, BridgeError> {
        let game_id = self.settings.game_id.ok_or_else(|| {
            BridgeError::ConfigurationError(String::from("no game id is configured"))
        })?;
        self.platform
            .game_activity(game_id)
            .await?
            .ok_or_else(|| {
                BridgeError::ExternalCallFailure(format!("game {game_id} returned no details"))
            })
    }
}
