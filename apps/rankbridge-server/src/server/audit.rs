use rankbridge_protocol::{render_webhook_payload, AuditEvent, WebhookPayload};

/// Receives audit events after a mutation has succeeded. Dispatch must not block and
/// must not report failure back to the caller.
pub(crate) trait AuditSink: Send + Sync {
    fn dispatch(&self, event: AuditEvent);
}

/// Posts each event to a chat webhook on a detached task.
pub(crate) struct WebhookNotifier {
    http: reqwest::Client,
    endpoint: Option<String>,
    branch_request_endpoint: Option<String>,
}

impl WebhookNotifier {
    pub(crate) fn new(
        http: reqwest::Client,
        endpoint: Option<String>,
        branch_request_endpoint: Option<String>,
    ) -> Self {
        Self {
            http,
            endpoint,
            branch_request_endpoint,
        }
    }

    /// Branch join decisions use their own endpoint when one is configured.
    fn endpoint_for(&self, event: &AuditEvent) -> Option<&str> {
        if event.kind.is_branch_request() {
            return self
                .branch_request_endpoint
                .as_deref()
                .or(self.endpoint.as_deref());
        }
        self.endpoint.as_deref()
    }
}

impl AuditSink for WebhookNotifier {
    fn dispatch(&self, event: AuditEvent) {
        let event_type = event.kind.event_type();
        let Some(endpoint) = self.endpoint_for(&event).map(str::to_owned) else {
            tracing::debug!(
                event = "audit.skipped",
                audit_event = event_type,
                event_id = %event.event_id,
                reason = "no_endpoint",
            );
            return;
        };
        let payload = render_webhook_payload(&event);
        if let Err(e) = payload.validate() {
            tracing::warn!(
                event = "audit.rejected",
                audit_event = event_type,
                event_id = %event.event_id,
                error = %e,
            );
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(
                event = "audit.dropped",
                audit_event = event_type,
                event_id = %event.event_id,
                reason = "no_runtime",
            );
            return;
        };
        let http = self.http.clone();
        runtime.spawn(deliver(http, endpoint, event.event_id, event_type, payload));
    }
}

async fn deliver(
    http: reqwest::Client,
    endpoint: String,
    event_id: String,
    event_type: &'static str,
    payload: WebhookPayload,
) {
    match http.post(&endpoint).json(&payload).send().await {
        Ok(response) if response.status().is_success() => {
            tracing::info!(
                event = "audit.delivered",
                audit_event = event_type,
                %event_id,
                status = response.status().as_u16(),
            );
        }
        Ok(response) => {
            tracing::warn!(
                event = "audit.delivery_failed",
                audit_event = event_type,
                %event_id,
                status = response.status().as_u16(),
            );
        }
        Err(e) => {
            tracing::warn!(
                event = "audit.delivery_failed",
                audit_event = event_type,
                %event_id,
                error = %e,
            );
        }
    }
}
