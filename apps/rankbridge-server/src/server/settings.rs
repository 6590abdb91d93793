use std::{collections::BTreeMap, path::Path};

use anyhow::anyhow;
use rankbridge_core::{BranchName, GroupId, RankValue};
use serde::Deserialize;

use super::errors::BridgeError;

/// Bot settings file. Keys are camelCase so an existing bot `config.json` loads unchanged;
/// unknown keys are ignored.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeSettings {
    #[serde(default)]
    pub group_id: Option<IdSetting>,
    #[serde(default)]
    pub game_id: Option<IdSetting>,
    #[serde(default)]
    pub allowed_ranks: Option<Vec<RankValue>>,
    #[serde(default)]
    pub max_rank_can_assign: Option<RankValue>,
    #[serde(default)]
    pub branch_groups: BTreeMap<String, IdSetting>,
    #[serde(default)]
    pub branch_manager_ranks: Option<BranchManagerRanks>,
    #[serde(default)]
    pub webhook_url: Option<String>,
    #[serde(default)]
    pub branch_webhook_url: Option<String>,
}

impl BridgeSettings {
    /// Reads and parses a settings file.
    ///
    /// # Errors
    /// Returns an error when the file is unreadable or not valid settings JSON.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow!("settings file {} unreadable: {e}", path.display()))?;
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("settings file {} is invalid: {e}", path.display()))
    }
}

/// A platform id as written by operators: a number, a numeric string, or a placeholder.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum IdSetting {
    Number(u64),
    Text(String),
}

impl IdSetting {
    #[must_use]
    pub fn resolve(&self) -> Option<u64> {
        match self {
            Self::Number(0) => None,
            Self::Number(value) => Some(*value),
            Self::Text(value) => value.trim().parse::<u64>().ok().filter(|id| *id != 0),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum BranchManagerRanks {
    Shared(Vec<RankValue>),
    PerBranch(BTreeMap<String, Vec<RankValue>>),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct BranchSettings {
    pub(crate) group: Option<GroupId>,
    pub(crate) manager_ranks: Option<Vec<RankValue>>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct ValidatedSettings {
    pub(crate) primary_group: GroupId,
    pub(crate) game_id: Option<u64>,
    pub(crate) allowed_ranks: Option<Vec<RankValue>>,
    pub(crate) max_assignable: Option<RankValue>,
    pub(crate) branches: BTreeMap<String, BranchSettings>,
    pub(crate) audit_endpoint: Option<String>,
    pub(crate) branch_audit_endpoint: Option<String>,
}

impl ValidatedSettings {
    #[cfg(test)]
    pub(crate) fn primary(primary_group: GroupId) -> Self {
        Self {
            primary_group,
            game_id: None,
            allowed_ranks: None,
            max_assignable: None,
            branches: BTreeMap::new(),
            audit_endpoint: None,
            branch_audit_endpoint: None,
        }
    }

    /// Looks up a branch by its configured key, ignoring case.
    pub(crate) fn branch(
        &self,
        name: &BranchName,
    ) -> Result<(GroupId, Option<&[RankValue]>), BridgeError> {
        let (_, branch) = self
            .branches
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name.as_str()))
            .ok_or_else(|| {
                BridgeError::ConfigurationError(format!("branch `{name}` is not configured"))
            })?;
        let group = branch.group.ok_or_else(|| {
            BridgeError::ConfigurationError(format!(
                "branch `{name}` has no group id configured yet"
            ))
        })?;
        Ok((group, branch.manager_ranks.as_deref()))
    }
}

/// Checks settings at startup. A usable primary group id is required; everything else
/// degrades to a warning and a disabled feature.
///
/// # Errors
/// Returns an error if the primary group id is missing or a placeholder.
pub(crate) fn validate_settings(
    settings: &BridgeSettings,
) -> anyhow::Result<(ValidatedSettings, Vec<String>)> {
    let primary_group = settings
        .group_id
        .as_ref()
        .and_then(IdSetting::resolve)
        .map(GroupId)
        .ok_or_else(|| anyhow!("groupId must be set to a numeric group id"))?;
    let mut warnings = Vec::new();

    let game_id = settings.game_id.as_ref().and_then(IdSetting::resolve);
    if game_id.is_none() {
        warnings.push(String::from("gameId not configured; game activity is disabled"));
    }

    if settings.allowed_ranks.as_ref().is_some_and(Vec::is_empty) {
        warnings.push(String::from(
            "allowedRanks is empty; no rank may perform rank operations",
        ));
    }

    let mut branches = BTreeMap::new();
    for (key, id) in &settings.branch_groups {
        let group = id.resolve().map(GroupId);
        if group.is_none() {
            warnings.push(format!(
                "branch `{key}` has a placeholder group id; its operations are disabled"
            ));
        }
        let manager_ranks = match &settings.branch_manager_ranks {
            None => None,
            Some(BranchManagerRanks::Shared(ranks)) => Some(ranks.clone()),
            Some(BranchManagerRanks::PerBranch(map)) => map
                .iter()
                .find(|(name, _)| name.eq_ignore_ascii_case(key))
                .map(|(_, ranks)| ranks.clone()),
        };
        branches.insert(
            key.clone(),
            BranchSettings {
                group,
                manager_ranks,
            },
        );
    }

    let audit_endpoint = validate_webhook_url(settings.webhook_url.as_deref());
    if audit_endpoint.is_none() {
        warnings.push(String::from(
            "webhookUrl not configured; audit notifications are disabled",
        ));
    }
    let branch_audit_endpoint = validate_webhook_url(settings.branch_webhook_url.as_deref());

    Ok((
        ValidatedSettings {
            primary_group,
            game_id,
            allowed_ranks: settings.allowed_ranks.clone(),
            max_assignable: settings.max_rank_can_assign,
            branches,
            audit_endpoint,
            branch_audit_endpoint,
        },
        warnings,
    ))
}

fn validate_webhook_url(value: Option<&str>) -> Option<String> {
    let trimmed = value?.trim();
    if trimmed.starts_with("https://") || trimmed.starts_with("http://") {
        return Some(trimmed.to_owned());
    }
    None
}
