#![forbid(unsafe_code)]

mod events;
mod webhook;

pub use events::{AuditActor, AuditEvent, AuditKind};
pub use webhook::{render_webhook_payload, Embed, EmbedField, EmbedFooter, WebhookPayload};

/// Version of the audit event schema.
pub const PROTOCOL_VERSION: u16 = 1;
/// Webhook receivers reject field values longer than this.
pub const MAX_EMBED_FIELD_VALUE_CHARS: usize = 1024;
/// Webhook receivers reject embeds with more fields than this.
pub const MAX_EMBED_FIELDS: usize = 25;
/// Combined character budget of every title, field and footer in one payload.
pub const MAX_EMBED_TOTAL_CHARS: usize = 6000;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("payload carries no embeds")]
    EmptyPayload,
    #[error("embed has too many fields: max={max} actual={actual}")]
    TooManyFields { max: usize, actual: usize },
    #[error("embed text exceeds budget: max={max} chars actual={actual} chars")]
    OversizedEmbed { max: usize, actual: usize },
    #[error("embed field `{0}` has an empty value")]
    EmptyFieldValue(String),
}
