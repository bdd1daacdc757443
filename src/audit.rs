use reqwest::Client;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub source: String,
    pub action: String,
    pub resource: String,
    pub actor: String,
    pub details: serde_json::Value,
}

/// Fire-and-forget audit log sink.
///
/// Delivery is best-effort: the POST runs on a detached task and failures
/// are logged and swallowed so they never reach the caller's critical path.
#[derive(Clone)]
pub struct AuditSink {
    client: Client,
    endpoint: Option<String>,
    source: String,
}

impl AuditSink {
    pub fn new(endpoint: Option<String>, source: &str) -> Self {
        Self {
            client: Client::new(),
            endpoint,
            source: source.to_string(),
        }
    }

    /// Disabled sink; events are only traced locally.
    pub fn disabled(source: &str) -> Self {
        Self::new(None, source)
    }

    pub fn record(&self, action: &str, resource: &str, actor: &str, details: serde_json::Value) {
        let event = AuditEvent {
            source: self.source.clone(),
            action: action.to_string(),
            resource: resource.to_string(),
            actor: actor.to_string(),
            details,
        };

        tracing::debug!(
            action = %event.action,
            resource = %event.resource,
            actor = %event.actor,
            "audit event"
        );

        let Some(endpoint) = self.endpoint.clone() else {
            return;
        };
        let client = self.client.clone();
        tokio::spawn(async move {
            match client.post(&endpoint).json(&event).send().await {
                Ok(response) if !response.status().is_success() => {
                    tracing::warn!(
                        status = %response.status(),
                        action = %event.action,
                        "audit sink rejected event"
                    );
                }
                Err(err) => {
                    tracing::warn!(error = %err, action = %event.action, "audit sink unreachable");
                }
                Ok(_) => {}
            }
        });
    }
}
