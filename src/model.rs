use crate::{Did, ProtocolError, Result, SessionId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Unified trust ladder shared by the registry, negotiator, scorer, and
/// authenticator. Ordered: Unknown < Basic < Verified < Trusted < Privileged.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TrustLevel {
    Unknown,
    Basic,
    Verified,
    Trusted,
    Privileged,
}

impl TrustLevel {
    /// Numeric rank used for descending sort in discovery results.
    pub fn rank(&self) -> u8 {
        match self {
            TrustLevel::Unknown => 0,
            TrustLevel::Basic => 1,
            TrustLevel::Verified => 2,
            TrustLevel::Trusted => 3,
            TrustLevel::Privileged => 4,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    Unverified,
    Pending,
    Verified,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Reputation {
    pub score: f64,
    pub interactions: u64,
    pub success_rate: f64,
}

impl Default for Reputation {
    fn default() -> Self {
        Self {
            score: 0.0,
            interactions: 0,
            success_rate: 0.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrustMetadata {
    pub trust_level: TrustLevel,
    pub verification_status: VerificationStatus,
    pub reputation: Reputation,
    pub last_verified: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Capability {
    pub name: String,
    pub trust_level_required: TrustLevel,
    pub permissions: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentProfile {
    pub did: Did,
    pub name: String,
    pub capabilities: Vec<Capability>,
    pub trust: TrustMetadata,
    pub endpoints: Vec<String>,
    pub tags: Vec<String>,
    pub registered_at: DateTime<Utc>,
}

impl AgentProfile {
    pub fn new(did: Did, name: String, trust_level: TrustLevel) -> Self {
        Self {
            did,
            name,
            capabilities: vec![],
            trust: TrustMetadata {
                trust_level,
                verification_status: VerificationStatus::Unverified,
                reputation: Reputation::default(),
                last_verified: None,
            },
            endpoints: vec![],
            tags: vec![],
            registered_at: Utc::now(),
        }
    }

    pub fn with_capability(mut self, name: &str, required: TrustLevel) -> Self {
        self.capabilities.push(Capability {
            name: name.to_string(),
            trust_level_required: required,
            permissions: vec![],
        });
        self
    }

    pub fn with_tag(mut self, tag: &str) -> Self {
        self.tags.push(tag.to_string());
        self
    }

    pub fn advertises(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|c| c.name == capability)
    }

    /// Structural validation applied at registration time.
    ///
    /// The DID must carry the `did:<method>:<id>` shape, and no capability
    /// may require a trust level above the agent's own attested level.
    pub fn validate(&self) -> Result<()> {
        let mut parts = self.did.splitn(3, ':');
        let scheme = parts.next().unwrap_or_default();
        let method = parts.next().unwrap_or_default();
        let id = parts.next().unwrap_or_default();
        if scheme != "did" || method.is_empty() || id.is_empty() {
            return Err(ProtocolError::Validation(format!(
                "Invalid DID scheme: {}",
                self.did
            )));
        }

        if self.name.trim().is_empty() {
            return Err(ProtocolError::Validation(
                "Agent name cannot be empty".to_string(),
            ));
        }

        for capability in &self.capabilities {
            if capability.name.trim().is_empty() {
                return Err(ProtocolError::Validation(
                    "Capability name cannot be empty".to_string(),
                ));
            }
            if capability.trust_level_required > self.trust.trust_level {
                return Err(ProtocolError::Validation(format!(
                    "Capability '{}' requires {:?} but agent attests {:?}",
                    capability.name, capability.trust_level_required, self.trust.trust_level
                )));
            }
        }

        Ok(())
    }
}

/// Fields an existing registration may change in place.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentStatusUpdate {
    pub trust_level: Option<TrustLevel>,
    pub verification_status: Option<VerificationStatus>,
    pub reputation: Option<Reputation>,
    pub last_verified: Option<DateTime<Utc>>,
}

/// Unordered participant pair; construction normalizes the order so the
/// same two DIDs always hash to the same key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ParticipantPair {
    pub first: Did,
    pub second: Did,
}

impl ParticipantPair {
    pub fn new(a: &str, b: &str) -> Self {
        if a <= b {
            Self {
                first: a.to_string(),
                second: b.to_string(),
            }
        } else {
            Self {
                first: b.to_string(),
                second: a.to_string(),
            }
        }
    }

    pub fn contains(&self, did: &str) -> bool {
        self.first == did || self.second == did
    }

    pub fn other(&self, did: &str) -> Option<&Did> {
        if self.first == did {
            Some(&self.second)
        } else if self.second == did {
            Some(&self.first)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Terminated,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityDescriptor {
    /// Protocols echoed back from the initiator's proposal; no intersection
    /// negotiation is performed.
    pub protocols: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMetrics {
    pub started_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub message_count: u64,
    pub error_count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionAuditEntry {
    pub at: DateTime<Utc>,
    pub actor: String,
    pub action: String,
    pub details: String,
}

pub const SESSION_TERMINATED_ACTION: &str = "session-terminated";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub participants: ParticipantPair,
    pub status: SessionStatus,
    pub security: SecurityDescriptor,
    pub metrics: SessionMetrics,
    pub audit_trail: Vec<SessionAuditEntry>,
}

impl Session {
    pub fn new(
        initiator: &str,
        responder: &str,
        protocols: Vec<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            participants: ParticipantPair::new(initiator, responder),
            status: SessionStatus::Active,
            security: SecurityDescriptor { protocols },
            metrics: SessionMetrics {
                started_at: now,
                last_activity: now,
                message_count: 0,
                error_count: 0,
            },
            audit_trail: vec![SessionAuditEntry {
                at: now,
                actor: initiator.to_string(),
                action: "session-established".to_string(),
                details: format!("{} -> {}", initiator, responder),
            }],
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == SessionStatus::Active
    }

    pub fn record_message(&mut self, sender: &str, message_id: Uuid, now: DateTime<Utc>) {
        self.metrics.message_count += 1;
        self.metrics.last_activity = now;
        self.audit_trail.push(SessionAuditEntry {
            at: now,
            actor: sender.to_string(),
            action: "message-relayed".to_string(),
            details: message_id.to_string(),
        });
    }

    pub fn terminate(&mut self, actor: &str, reason: &str, now: DateTime<Utc>) {
        self.status = SessionStatus::Terminated;
        self.metrics.last_activity = now;
        self.audit_trail.push(SessionAuditEntry {
            at: now,
            actor: actor.to_string(),
            action: SESSION_TERMINATED_ACTION.to_string(),
            details: reason.to_string(),
        });
    }

    /// Duration until the first termination entry, for terminated sessions.
    pub fn terminated_duration_secs(&self) -> Option<i64> {
        self.audit_trail
            .iter()
            .find(|e| e.action == SESSION_TERMINATED_ACTION)
            .map(|e| (e.at - self.metrics.started_at).num_seconds())
    }
}

/// A single interaction outcome in an agent's history; input to the scorer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Interaction {
    pub at: DateTime<Utc>,
    /// Outcome flag. `None` means the interaction carried no explicit
    /// outcome and is excluded from success-rate computation.
    pub success: Option<bool>,
}

impl Interaction {
    pub fn succeeded(at: DateTime<Utc>) -> Self {
        Self {
            at,
            success: Some(true),
        }
    }

    pub fn failed(at: DateTime<Utc>) -> Self {
        Self {
            at,
            success: Some(false),
        }
    }

    pub fn unflagged(at: DateTime<Utc>) -> Self {
        Self { at, success: None }
    }
}

/// Message queued for a recipient until drained.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedMessage {
    pub id: Uuid,
    pub session_id: SessionId,
    pub from: Did,
    pub to: Did,
    pub payload: serde_json::Value,
    pub metadata: HashMap<String, String>,
    pub queued_at: DateTime<Utc>,
}
