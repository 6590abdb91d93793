use axum::{extract::rejection::JsonRejection, http::StatusCode, response::IntoResponse, Json};
use rankbridge_core::{format_rank_list, LadderError, PlatformUsername, RankValue};

use super::{platform::PlatformCallError, types::ErrorBody};

/// Every way a bridge operation can fail. Callers see `reason` verbatim.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("{0}")]
    NotFound(String),
    #[error(transparent)]
    PermissionDenied(#[from] DenialReason),
    #[error(transparent)]
    BoundaryReached(#[from] Boundary),
    #[error("platform request failed: {0}")]
    ExternalCallFailure(String),
    #[error("{0}; please try again")]
    PersistenceFailure(String),
    #[error("{0}")]
    ConfigurationError(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DenialReason {
    #[error("your chat account is not linked to a platform account; link it first")]
    NotLinked,
    #[error("your chat account is already linked to {0}; use the change request instead")]
    AlreadyLinked(PlatformUsername),
    #[error("your linked platform account {0} could not be found; relink your account")]
    LinkedAccountUnresolvable(PlatformUsername),
    #[error("you are not a member of the {scope}")]
    NotGroupMember { scope: String },
    #[error(
        "only ranks {} may manage ranks here (your rank: {actual})",
        format_rank_list(.allowed)
    )]
    RankNotAuthorized {
        allowed: Vec<RankValue>,
        actual: RankValue,
    },
    #[error("you may assign at most rank {ceiling} (requested rank: {requested})")]
    ExceedsCeiling {
        ceiling: RankValue,
        requested: RankValue,
    },
    #[error("you cannot change your own rank")]
    SelfTarget,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Boundary {
    #[error("the user already holds the highest rank in the group")]
    AlreadyAtTop,
    #[error("the user already holds the lowest rank in the group")]
    AlreadyAtBottom,
}

impl BridgeError {
    pub(crate) fn unknown_account(username: &PlatformUsername) -> Self {
        Self::NotFound(format!("no platform account named {username} exists"))
    }

    pub(crate) const fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::PermissionDenied(_) => "permission_denied",
            Self::BoundaryReached(_) => "boundary_reached",
            Self::ExternalCallFailure(_) => "external_call_failure",
            Self::PersistenceFailure(_) => "persistence_failure",
            Self::ConfigurationError(_) => "configuration_error",
        }
    }

    const fn status(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::PermissionDenied(_) => StatusCode::FORBIDDEN,
            Self::BoundaryReached(_) => StatusCode::CONFLICT,
            Self::ExternalCallFailure(_) => StatusCode::BAD_GATEWAY,
            Self::PersistenceFailure(_) | Self::ConfigurationError(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
        }
    }
}

impl From<PlatformCallError> for BridgeError {
    fn from(value: PlatformCallError) -> Self {
        Self::ExternalCallFailure(value.to_string())
    }
}

impl From<LadderError> for BridgeError {
    fn from(value: LadderError) -> Self {
        match value {
            LadderError::AlreadyAtTop => Self::BoundaryReached(Boundary::AlreadyAtTop),
            LadderError::AlreadyAtBottom => Self::BoundaryReached(Boundary::AlreadyAtBottom),
            LadderError::RoleNotFound(_) => Self::NotFound(value.to_string()),
            LadderError::RankNotOnLadder(_) | LadderError::DuplicateRank(_) => {
                Self::ExternalCallFailure(format!("inconsistent role data: {value}"))
            }
        }
    }
}

/// Failures of the HTTP surface itself, wrapping engine errors.
#[derive(Debug)]
pub(crate) enum ApiFailure {
    InvalidRequest(&'static str),
    PayloadTooLarge,
    Unauthorized,
    Bridge(BridgeError),
    Internal,
}

impl From<BridgeError> for ApiFailure {
    fn from(value: BridgeError) -> Self {
        Self::Bridge(value)
    }
}

impl From<JsonRejection> for ApiFailure {
    fn from(value: JsonRejection) -> Self {
        if value.status() == StatusCode::PAYLOAD_TOO_LARGE {
            return Self::PayloadTooLarge;
        }
        tracing::debug!(event = "request.body_rejected", error = %value.body_text());
        match value {
            JsonRejection::JsonDataError(_) => {
                Self::InvalidRequest("request body has missing or mistyped fields")
            }
            JsonRejection::JsonSyntaxError(_) => Self::InvalidRequest("request body is not valid JSON"),
            JsonRejection::MissingJsonContentType(_) => {
                Self::InvalidRequest("request body must be sent as application/json")
            }
            _ => Self::InvalidRequest("request body could not be read"),
        }
    }
}

impl std::fmt::Display for ApiFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bridge(error) => write!(f, "{error}"),
            other => write!(f, "{other:?}"),
        }
    }
}

impl IntoResponse for ApiFailure {
    fn into_response(self) -> axum::response::Response {
        match self {
            Self::InvalidRequest(reason) => (
                StatusCode::BAD_REQUEST,
                Json(ErrorBody {
                    error: "invalid_request",
                    reason: reason.to_owned(),
                }),
            )
                .into_response(),
            Self::PayloadTooLarge => (
                StatusCode::PAYLOAD_TOO_LARGE,
                Json(ErrorBody {
                    error: "payload_too_large",
                    reason: String::from("request body exceeds the configured limit"),
                }),
            )
                .into_response(),
            Self::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                Json(ErrorBody {
                    error: "unauthorized",
                    reason: String::from("missing or invalid api token"),
                }),
            )
                .into_response(),
            Self::Bridge(error) => (
                error.status(),
                Json(ErrorBody {
                    error: error.kind(),
                    reason: error.to_string(),
                }),
            )
                .into_response(),
            Self::Internal => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorBody {
                    error: "internal_error",
                    reason: String::from("the request could not be completed"),
                }),
            )
                .into_response(),
        }
    }
}

pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .json()
        .with_env_filter(filter)
        .with_current_span(true)
        .with_span_list(true)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn denial_messages_name_the_relevant_ranks() {
        let ceiling = BridgeError::from(DenialReason::ExceedsCeiling {
            ceiling: RankValue(8),
            requested: RankValue(10),
        });
        assert_eq!(
            ceiling.to_string(),
            "you may assign at most rank 8 (requested rank: 10)"
        );

        let allow_list = DenialReason::RankNotAuthorized {
            allowed: vec![RankValue(200), RankValue(255)],
            actual: RankValue(10),
        };
        assert_eq!(
            allow_list.to_string(),
            "only ranks 200, 255 may manage ranks here (your rank: 10)"
        );
    }

    #[test]
    fn ladder_errors_map_onto_the_bridge_taxonomy() {
        assert!(matches!(
            BridgeError::from(LadderError::AlreadyAtTop),
            BridgeError::BoundaryReached(Boundary::AlreadyAtTop)
        ));
        assert!(matches!(
            BridgeError::from(LadderError::RoleNotFound(String::from("Major"))),
            BridgeError::NotFound(_)
        ));
        assert!(matches!(
            BridgeError::from(LadderError::RankNotOnLadder(RankValue(3))),
            BridgeError::ExternalCallFailure(_)
        ));
    }

    #[test]
    fn persistence_failures_carry_a_retry_hint() {
        let error = BridgeError::PersistenceFailure(String::from("could not save the link"));
        assert_eq!(error.to_string(), "could not save the link; please try again");
        assert_eq!(error.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(error.kind(), "persistence_failure");
    }
}
