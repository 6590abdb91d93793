use serde::{Deserialize, Serialize};

use crate::{
    AuditEvent, ProtocolError, MAX_EMBED_FIELDS, MAX_EMBED_FIELD_VALUE_CHARS,
    MAX_EMBED_TOTAL_CHARS,
};

const RANK_LOG_FOOTER: &str = "Rank Log";
const BRANCH_REQUEST_LOG_FOOTER: &str = "Branch Request Log";
const UNKNOWN_RANK: &str = "Unknown";

/// Body of an outbound audit webhook call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookPayload {
    pub embeds: Vec<Embed>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Embed {
    pub title: String,
    pub color: u32,
    pub fields: Vec<EmbedField>,
    pub footer: EmbedFooter,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
    pub inline: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbedFooter {
    pub text: String,
}

impl WebhookPayload {
    /// Checks the limits webhook receivers enforce.
    ///
    /// # Errors
    /// Returns [`ProtocolError`] when the payload is empty, an embed has too many fields or an
    /// empty field value, or the combined text exceeds the receiver budget.
    pub fn validate(&self) -> Result<(), ProtocolError> {
        if self.embeds.is_empty() {
            return Err(ProtocolError::EmptyPayload);
        }
        let mut total = 0;
        for embed in &self.embeds {
            if embed.fields.len() > MAX_EMBED_FIELDS {
                return Err(ProtocolError::TooManyFields {
                    max: MAX_EMBED_FIELDS,
                    actual: embed.fields.len(),
                });
            }
            total += embed.title.chars().count() + embed.footer.text.chars().count();
            for field in &embed.fields {
                if field.value.trim().is_empty() {
                    return Err(ProtocolError::EmptyFieldValue(field.name.clone()));
                }
                total += field.name.chars().count() + field.value.chars().count();
            }
        }
        if total > MAX_EMBED_TOTAL_CHARS {
            return Err(ProtocolError::OversizedEmbed {
                max: MAX_EMBED_TOTAL_CHARS,
                actual: total,
            });
        }
        Ok(())
    }
}

/// Lays an audit event out as a single embed.
#[must_use]
pub fn render_webhook_payload(event: &AuditEvent) -> WebhookPayload {
    let mut fields = vec![
        field("Target User", &event.target_user, true),
        field(
            "Performed By",
            &format!("{} ({})", event.actor.username, event.actor.rank_name),
            true,
        ),
    ];

    if event.kind.is_branch_request() {
        if let Some(branch) = &event.branch {
            fields.push(field("Branch", branch, true));
        }
        let decision = if matches!(event.kind, crate::AuditKind::BranchRequestAccepted) {
            "Accepted"
        } else {
            "Rejected"
        };
        fields.push(field("Decision", decision, true));
    } else {
        fields.push(field(
            "Old Rank",
            event.old_rank.as_deref().unwrap_or(UNKNOWN_RANK),
            true,
        ));
        if let Some(new_rank) = &event.new_rank {
            fields.push(field("New Rank", new_rank, true));
        }
        if let Some(branch) = &event.branch {
            fields.push(field("Branch", branch, true));
        }
    }

    if let Some(reason) = &event.reason {
        fields.push(field("Reason", reason, false));
    }

    let footer = if event.kind.is_branch_request() {
        BRANCH_REQUEST_LOG_FOOTER
    } else {
        RANK_LOG_FOOTER
    };

    WebhookPayload {
        embeds: vec![Embed {
            title: event.kind.title().to_owned(),
            color: event.kind.color(),
            fields,
            footer: EmbedFooter {
                text: footer.to_owned(),
            },
        }],
    }
}

fn field(name: &str, value: &str, inline: bool) -> EmbedField {
    EmbedField {
        name: name.to_owned(),
        value: truncate_chars(value, MAX_EMBED_FIELD_VALUE_CHARS),
        inline,
    }
}

fn truncate_chars(value: &str, max: usize) -> String {
    if value.chars().count() <= max {
        return value.to_owned();
    }
    let mut truncated: String = value.chars().take(max.saturating_sub(1)).collect();
    truncated.push('…');
    truncated
}
