#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

/// Length of an ownership verification code.
pub const VERIFICATION_CODE_LEN: usize = 8;
/// Characters a verification code is drawn from.
pub const VERIFICATION_CODE_ALPHABET: &[u8; 36] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("chat identity is invalid")]
    InvalidChatIdentity,
    #[error("platform username is invalid")]
    InvalidUsername,
    #[error("verification code is invalid")]
    InvalidVerificationCode,
    #[error("branch name is invalid")]
    InvalidBranchName,
}

/// Stable identifier of a member on the community chat platform.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ChatIdentity(String);

impl ChatIdentity {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ChatIdentity {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        validate_opaque_key(&value).map_err(|()| DomainError::InvalidChatIdentity)?;
        Ok(Self(value))
    }
}

impl From<ChatIdentity> for String {
    fn from(value: ChatIdentity) -> Self {
        value.0
    }
}

impl core::fmt::Display for ChatIdentity {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Account name on the game platform. Comparison on the platform is case-insensitive,
/// so [`PlatformUsername::matches`] should be used instead of `==` when comparing claims.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PlatformUsername(String);

impl PlatformUsername {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn matches(&self, other: &Self) -> bool {
        self.0.eq_ignore_ascii_case(&other.0)
    }
}

impl TryFrom<String> for PlatformUsername {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        validate_username(&value)?;
        Ok(Self(value))
    }
}

impl From<PlatformUsername> for String {
    fn from(value: PlatformUsername) -> Self {
        value.0
    }
}

impl core::fmt::Display for PlatformUsername {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Name of a branch group as it appears in configuration.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BranchName(String);

impl BranchName {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for BranchName {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        validate_opaque_key(&value).map_err(|()| DomainError::InvalidBranchName)?;
        Ok(Self(value))
    }
}

impl From<BranchName> for String {
    fn from(value: BranchName) -> Self {
        value.0
    }
}

impl core::fmt::Display for BranchName {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

macro_rules! numeric_id {
    ($(#[$meta:meta])* $name:ident, $inner:ty) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub $inner);

        impl $name {
            #[must_use]
            pub const fn get(self) -> $inner {
                self.0
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

numeric_id!(
    /// Account id on the game platform.
    PlatformUserId,
    u64
);
numeric_id!(
    /// Group id on the game platform.
    GroupId,
    u64
);
numeric_id!(
    /// Role id within a platform group.
    RoleId,
    u64
);
numeric_id!(
    /// Ordering value of a role inside one group. Higher is more senior.
    RankValue,
    u32
);

/// Short-lived token a member places on their platform profile to prove ownership.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VerificationCode(String);

impl VerificationCode {
    /// Builds a code by drawing each character with `pick`, which must return an index
    /// below the bound it is given.
    pub fn generate_with(mut pick: impl FnMut(usize) -> usize) -> Self {
        let code = (0..VERIFICATION_CODE_LEN)
            .map(|_| {
                let index = pick(VERIFICATION_CODE_ALPHABET.len()) % VERIFICATION_CODE_ALPHABET.len();
                char::from(VERIFICATION_CODE_ALPHABET[index])
            })
            .collect();
        Self(code)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for VerificationCode {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if value.len() == VERIFICATION_CODE_LEN
            && value.bytes().all(|b| VERIFICATION_CODE_ALPHABET.contains(&b))
        {
            return Ok(Self(value));
        }
        Err(DomainError::InvalidVerificationCode)
    }
}

impl From<VerificationCode> for String {
    fn from(value: VerificationCode) -> Self {
        value.0
    }
}

impl core::fmt::Display for VerificationCode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One rung of a group's role ladder as reported by the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleLadderEntry {
    pub rank: RankValue,
    pub name: String,
    pub role_id: RoleId,
}

impl core::fmt::Display for RoleLadderEntry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{} ({})", self.name, self.rank)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LadderDirection {
    Up,
    Down,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum LadderError {
    #[error("rank {0} is not present on the group ladder")]
    RankNotOnLadder(RankValue),
    #[error("rank {0} appears more than once on the group ladder")]
    DuplicateRank(RankValue),
    #[error("already at the top of the ladder")]
    AlreadyAtTop,
    #[error("already at the bottom of the ladder")]
    AlreadyAtBottom,
    #[error("role `{0}` does not exist in this group")]
    RoleNotFound(String),
}

/// A group's roles ordered by ascending rank.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankLadder {
    entries: Vec<RoleLadderEntry>,
}

impl RankLadder {
    /// Sorts a freshly fetched role set into a ladder.
    ///
    /// # Errors
    /// Returns [`LadderError::DuplicateRank`] when two roles share a rank value, since
    /// adjacency is then ambiguous.
    pub fn try_from_roles(mut roles: Vec<RoleLadderEntry>) -> Result<Self, LadderError> {
        roles.sort_by_key(|entry| entry.rank);
        if let Some(pair) = roles.windows(2).find(|pair| pair[0].rank == pair[1].rank) {
            return Err(LadderError::DuplicateRank(pair[0].rank));
        }
        Ok(Self { entries: roles })
    }

    #[must_use]
    pub fn entries(&self) -> &[RoleLadderEntry] {
        &self.entries
    }

    /// # Errors
    /// Returns [`LadderError::RankNotOnLadder`] if no role carries `rank`.
    pub fn position_of(&self, rank: RankValue) -> Result<usize, LadderError> {
        self.entries
            .iter()
            .position(|entry| entry.rank == rank)
            .ok_or(LadderError::RankNotOnLadder(rank))
    }

    /// Returns the role adjacent to `current` in `direction`.
    ///
    /// # Errors
    /// [`LadderError::RankNotOnLadder`] when `current` is unknown to the ladder,
    /// [`LadderError::AlreadyAtTop`] / [`LadderError::AlreadyAtBottom`] at the boundaries.
    pub fn step(
        &self,
        current: RankValue,
        direction: LadderDirection,
    ) -> Result<&RoleLadderEntry, LadderError> {
        let index = self.position_of(current)?;
        match direction {
            LadderDirection::Up => self.entries.get(index + 1).ok_or(LadderError::AlreadyAtTop),
            LadderDirection::Down => index
                .checked_sub(1)
                .and_then(|below| self.entries.get(below))
                .ok_or(LadderError::AlreadyAtBottom),
        }
    }

    /// Case-insensitive exact name lookup.
    ///
    /// # Errors
    /// Returns [`LadderError::RoleNotFound`] when no role has that name.
    pub fn find_by_name(&self, name: &str) -> Result<&RoleLadderEntry, LadderError> {
        let wanted = name.trim().to_lowercase();
        self.entries
            .iter()
            .find(|entry| entry.name.to_lowercase() == wanted)
            .ok_or_else(|| LadderError::RoleNotFound(name.trim().to_owned()))
    }
}

/// Highest rank a caller may hand out: their own rank, capped by the configured maximum.
#[must_use]
pub fn resolve_ceiling(caller_rank: RankValue, max_assignable: Option<RankValue>) -> RankValue {
    max_assignable.map_or(caller_rank, |max| caller_rank.min(max))
}

/// An absent allow-list admits every rank.
#[must_use]
pub fn rank_is_allowed(allow_list: Option<&[RankValue]>, rank: RankValue) -> bool {
    allow_list.is_none_or(|allowed| allowed.contains(&rank))
}

/// Renders an allow-list as `1, 5, 10` for denial messages.
#[must_use]
pub fn format_rank_list(ranks: &[RankValue]) -> String {
    ranks
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

fn validate_username(value: &str) -> Result<(), DomainError> {
    if !(3..=20).contains(&value.len()) {
        return Err(DomainError::InvalidUsername);
    }
    if value.starts_with('_') || value.ends_with('_') {
        return Err(DomainError::InvalidUsername);
    }
    if value.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Ok(());
    }
    Err(DomainError::InvalidUsername)
}

fn validate_opaque_key(value: &str) -> Result<(), ()> {
    if !(1..=64).contains(&value.chars().count()) {
        return Err(());
    }
    if value.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(());
    }
    Ok(())
}
