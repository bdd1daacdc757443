use crate::audit::AuditSink;
use crate::clock::Clock;
use crate::config::SessionConfig;
use crate::model::{ParticipantPair, QueuedMessage, Session, SessionStatus, TrustLevel};
use crate::registry::CapabilityRegistry;
use crate::store::{SessionStore, SYSTEM_ACTOR};
use crate::{Did, MessageId, ProtocolError, Result, SessionId};
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Floor trust level both handshake parties must independently meet.
pub const HANDSHAKE_TRUST_FLOOR: TrustLevel = TrustLevel::Basic;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandshakeRequest {
    pub initiator_did: Did,
    pub responder_did: Did,
    /// Capabilities the initiator expects the responder to advertise.
    pub expected_capabilities: Vec<String>,
    /// Echoed back verbatim; no protocol intersection is negotiated.
    pub proposed_protocols: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandshakeResponse {
    pub session_id: SessionId,
    pub participants: ParticipantPair,
    pub protocols: Vec<String>,
    pub established_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRequest {
    pub from: Did,
    pub to: Did,
    pub payload: serde_json::Value,
    /// Overrides the configured message TTL when set.
    pub ttl_secs: Option<u64>,
    /// When the sender produced the message; defaults to receipt time.
    pub sent_at: Option<DateTime<Utc>>,
}

/// Queued-delivery acknowledgment. The estimate is a fixed offset, not a
/// transport guarantee.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryAck {
    pub message_id: MessageId,
    pub session_id: SessionId,
    pub queued_at: DateTime<Utc>,
    pub estimated_delivery: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub enum SessionEvent {
    Established {
        session_id: SessionId,
        participants: ParticipantPair,
    },
    MessageQueued {
        session_id: SessionId,
        message_id: MessageId,
        to: Did,
    },
    Terminated {
        session_id: SessionId,
        actor: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStats {
    pub total_sessions: usize,
    pub active_sessions: usize,
    pub terminated_sessions: usize,
    pub messages_relayed: u64,
    pub average_terminated_duration_secs: Option<f64>,
}

/// Owns session lifecycle: handshake, at-least-once message relay via
/// per-recipient queues, explicit termination, and the inactivity reaper.
pub struct SessionNegotiator {
    store: Arc<dyn SessionStore>,
    registry: Arc<CapabilityRegistry>,
    inboxes: Mutex<HashMap<Did, Vec<QueuedMessage>>>,
    audit: AuditSink,
    clock: Arc<dyn Clock>,
    config: SessionConfig,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionNegotiator {
    pub fn new(
        store: Arc<dyn SessionStore>,
        registry: Arc<CapabilityRegistry>,
        audit: AuditSink,
        clock: Arc<dyn Clock>,
        config: SessionConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(config.event_channel_capacity.max(1));
        Self {
            store,
            registry,
            inboxes: Mutex::new(HashMap::new()),
            audit,
            clock,
            config,
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Negotiates a new session between two registered agents.
    ///
    /// The session for the unordered pair is checked and created inside the
    /// store's critical section, so two concurrent handshakes for the same
    /// pair cannot both succeed.
    pub async fn initiate_handshake(&self, request: HandshakeRequest) -> Result<HandshakeResponse> {
        let initiator = self
            .registry
            .get_agent(&request.initiator_did)
            .ok_or_else(|| {
                ProtocolError::Validation(format!(
                    "Initiator not registered: {}",
                    request.initiator_did
                ))
            })?;

        let responder = match self.registry.get_agent(&request.responder_did) {
            Some(responder) => responder,
            None => {
                let alternatives = self
                    .registry
                    .rank_by_capability_overlap(
                        &request.expected_capabilities,
                        &request.initiator_did,
                    )
                    .into_iter()
                    .take(3)
                    .collect();
                return Err(ProtocolError::AgentUnreachable {
                    did: request.responder_did,
                    alternatives,
                });
            }
        };

        for party in [&initiator, &responder] {
            if party.trust.trust_level < HANDSHAKE_TRUST_FLOOR {
                return Err(ProtocolError::TrustVerificationFailed(format!(
                    "{} attests {:?}, below the {:?} floor",
                    party.did, party.trust.trust_level, HANDSHAKE_TRUST_FLOOR
                )));
            }
        }

        let missing: Vec<String> = request
            .expected_capabilities
            .iter()
            .filter(|capability| !responder.advertises(capability))
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(ProtocolError::CapabilityNotAvailable { missing });
        }

        let now = self.clock.now();
        let session = self.store.create_if_absent(Session::new(
            &request.initiator_did,
            &request.responder_did,
            request.proposed_protocols.clone(),
            now,
        ))?;

        tracing::info!(
            session_id = %session.id,
            initiator = %request.initiator_did,
            responder = %request.responder_did,
            "session established"
        );
        self.audit.record(
            "session-established",
            &session.id.to_string(),
            &request.initiator_did,
            serde_json::json!({ "responder": request.responder_did }),
        );
        let _ = self.events.send(SessionEvent::Established {
            session_id: session.id,
            participants: session.participants.clone(),
        });

        Ok(HandshakeResponse {
            session_id: session.id,
            participants: session.participants,
            protocols: request.proposed_protocols,
            established_at: now,
        })
    }

    /// Relays a message over the pair's active session, queueing it for the
    /// recipient until drained.
    pub async fn send_message(&self, request: MessageRequest) -> Result<DeliveryAck> {
        let pair = ParticipantPair::new(&request.from, &request.to);
        let session = self
            .store
            .find_active_by_pair(&pair)
            .ok_or(ProtocolError::SessionExpired)?;

        let now = self.clock.now();
        let ttl = Duration::seconds(request.ttl_secs.unwrap_or(self.config.message_ttl_secs) as i64);
        let sent_at = request.sent_at.unwrap_or(now);
        if now - sent_at > ttl {
            self.store.record_error(&session.id);
            return Err(ProtocolError::MessageDeliveryFailed(format!(
                "Message TTL elapsed ({}s)",
                ttl.num_seconds()
            )));
        }

        let message_id = Uuid::new_v4();
        self.store
            .record_message(&session.id, &request.from, message_id, now)?;

        let message = QueuedMessage {
            id: message_id,
            session_id: session.id,
            from: request.from.clone(),
            to: request.to.clone(),
            payload: request.payload,
            metadata: HashMap::new(),
            queued_at: now,
        };
        self.inboxes
            .lock()
            .entry(request.to.clone())
            .or_default()
            .push(message);

        self.audit.record(
            "message-relayed",
            &session.id.to_string(),
            &request.from,
            serde_json::json!({ "message_id": message_id, "to": request.to }),
        );
        let _ = self.events.send(SessionEvent::MessageQueued {
            session_id: session.id,
            message_id,
            to: request.to,
        });

        Ok(DeliveryAck {
            message_id,
            session_id: session.id,
            queued_at: now,
            estimated_delivery: now
                + Duration::milliseconds(self.config.delivery_estimate_ms as i64),
        })
    }

    /// Drains and returns the agent's queued messages (clear-on-read).
    pub async fn receive_messages(&self, did: &str) -> Vec<QueuedMessage> {
        self.inboxes.lock().remove(did).unwrap_or_default()
    }

    pub async fn terminate_session(
        &self,
        session_id: SessionId,
        initiator: &str,
        reason: &str,
    ) -> Result<Session> {
        let session = self
            .store
            .get(&session_id)
            .ok_or_else(|| ProtocolError::NotFound(format!("Session not found: {}", session_id)))?;
        if !session.participants.contains(initiator) {
            return Err(ProtocolError::NotAuthorized(format!(
                "{} is not a participant of session {}",
                initiator, session_id
            )));
        }

        let now = self.clock.now();
        let terminated = self.store.terminate(&session_id, initiator, reason, now)?;

        tracing::info!(session_id = %session_id, actor = %initiator, "session terminated");
        self.audit.record(
            "session-terminated",
            &session_id.to_string(),
            initiator,
            serde_json::json!({ "reason": reason }),
        );
        let _ = self.events.send(SessionEvent::Terminated {
            session_id,
            actor: initiator.to_string(),
        });

        Ok(terminated)
    }

    /// One reaper pass: force-terminates active sessions idle past the
    /// inactivity timeout. The interval task calls this on every tick;
    /// tests drive it directly against a manual clock.
    pub fn reap_idle_sessions(&self) -> Vec<Session> {
        let now = self.clock.now();
        let cutoff = now - Duration::seconds(self.config.inactivity_timeout_secs as i64);
        let reaped = self.store.reap_idle(cutoff, now);

        for session in &reaped {
            tracing::info!(session_id = %session.id, "session reaped for inactivity");
            self.audit.record(
                "session-terminated",
                &session.id.to_string(),
                SYSTEM_ACTOR,
                serde_json::json!({ "reason": "inactivity timeout" }),
            );
            let _ = self.events.send(SessionEvent::Terminated {
                session_id: session.id,
                actor: SYSTEM_ACTOR.to_string(),
            });
        }
        reaped
    }

    /// Spawns the periodic reaper task.
    pub fn spawn_reaper(self: &Arc<Self>) -> JoinHandle<()> {
        let negotiator = Arc::clone(self);
        let interval = std::time::Duration::from_secs(self.config.reaper_interval_secs);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // First tick fires immediately; skip it so a fresh negotiator
            // does not reap before the first interval elapses.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                negotiator.reap_idle_sessions();
            }
        })
    }

    pub fn get_stats(&self) -> SessionStats {
        let sessions = self.store.list();
        let total_sessions = sessions.len();
        let active_sessions = sessions
            .iter()
            .filter(|s| s.status == SessionStatus::Active)
            .count();
        let messages_relayed = sessions.iter().map(|s| s.metrics.message_count).sum();

        let durations: Vec<i64> = sessions
            .iter()
            .filter_map(|s| s.terminated_duration_secs())
            .collect();
        let average_terminated_duration_secs = if durations.is_empty() {
            None
        } else {
            Some(durations.iter().sum::<i64>() as f64 / durations.len() as f64)
        };

        SessionStats {
            total_sessions,
            active_sessions,
            terminated_sessions: total_sessions - active_sessions,
            messages_relayed,
            average_terminated_duration_secs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::RegistryConfig;
    use crate::model::AgentProfile;
    use crate::store::{InMemoryAgentStore, InMemorySessionStore};

    struct Fixture {
        negotiator: Arc<SessionNegotiator>,
        registry: Arc<CapabilityRegistry>,
        clock: ManualClock,
    }

    async fn fixture() -> Fixture {
        let clock = ManualClock::new(Utc::now());
        let registry = Arc::new(CapabilityRegistry::new(
            Arc::new(InMemoryAgentStore::new()),
            AuditSink::disabled("test"),
            Arc::new(clock.clone()),
            RegistryConfig::default(),
        ));
        let negotiator = Arc::new(SessionNegotiator::new(
            Arc::new(InMemorySessionStore::new()),
            Arc::clone(&registry),
            AuditSink::disabled("test"),
            Arc::new(clock.clone()),
            SessionConfig::default(),
        ));
        Fixture {
            negotiator,
            registry,
            clock,
        }
    }

    async fn register(fixture: &Fixture, did: &str, level: TrustLevel, caps: &[&str]) {
        let mut profile = AgentProfile::new(did.into(), did.into(), level);
        for cap in caps {
            profile = profile.with_capability(cap, TrustLevel::Unknown);
        }
        fixture.registry.register_agent(profile).await.unwrap();
    }

    fn handshake(initiator: &str, responder: &str, caps: &[&str]) -> HandshakeRequest {
        HandshakeRequest {
            initiator_did: initiator.into(),
            responder_did: responder.into(),
            expected_capabilities: caps.iter().map(|c| c.to_string()).collect(),
            proposed_protocols: vec!["noise-xx".into()],
        }
    }

    #[tokio::test]
    async fn test_handshake_echoes_protocols() {
        let fixture = fixture().await;
        register(&fixture, "did:atp:a", TrustLevel::Verified, &["relay"]).await;
        register(&fixture, "did:atp:b", TrustLevel::Basic, &["relay"]).await;

        let response = fixture
            .negotiator
            .initiate_handshake(handshake("did:atp:a", "did:atp:b", &["relay"]))
            .await
            .unwrap();
        assert_eq!(response.protocols, vec!["noise-xx".to_string()]);
        assert!(response.participants.contains("did:atp:a"));
        assert!(response.participants.contains("did:atp:b"));
    }

    #[tokio::test]
    async fn test_handshake_unknown_responder_lists_alternatives() {
        let fixture = fixture().await;
        register(&fixture, "did:atp:a", TrustLevel::Verified, &["relay"]).await;
        register(&fixture, "did:atp:alt1", TrustLevel::Basic, &["relay"]).await;
        register(&fixture, "did:atp:alt2", TrustLevel::Basic, &["relay"]).await;

        let err = fixture
            .negotiator
            .initiate_handshake(handshake("did:atp:a", "did:atp:ghost", &["relay"]))
            .await
            .unwrap_err();
        match err {
            ProtocolError::AgentUnreachable { did, alternatives } => {
                assert_eq!(did, "did:atp:ghost");
                assert_eq!(alternatives, vec!["did:atp:alt1", "did:atp:alt2"]);
            }
            other => panic!("expected AgentUnreachable, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_handshake_trust_floor() {
        let fixture = fixture().await;
        register(&fixture, "did:atp:a", TrustLevel::Verified, &["relay"]).await;
        register(&fixture, "did:atp:low", TrustLevel::Unknown, &["relay"]).await;

        let err = fixture
            .negotiator
            .initiate_handshake(handshake("did:atp:a", "did:atp:low", &["relay"]))
            .await
            .unwrap_err();
        assert!(matches!(err, ProtocolError::TrustVerificationFailed(_)));
    }

    #[tokio::test]
    async fn test_handshake_reports_capability_gaps() {
        let fixture = fixture().await;
        register(&fixture, "did:atp:a", TrustLevel::Verified, &["relay"]).await;
        register(&fixture, "did:atp:b", TrustLevel::Basic, &["relay"]).await;

        let err = fixture
            .negotiator
            .initiate_handshake(handshake("did:atp:a", "did:atp:b", &["relay", "escrow"]))
            .await
            .unwrap_err();
        match err {
            ProtocolError::CapabilityNotAvailable { missing } => {
                assert_eq!(missing, vec!["escrow"]);
            }
            other => panic!("expected CapabilityNotAvailable, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_concurrent_handshakes_yield_one_active_session() {
        let fixture = fixture().await;
        register(&fixture, "did:atp:a", TrustLevel::Verified, &["relay"]).await;
        register(&fixture, "did:atp:b", TrustLevel::Verified, &["relay"]).await;

        let n1 = Arc::clone(&fixture.negotiator);
        let n2 = Arc::clone(&fixture.negotiator);
        let first =
            tokio::spawn(
                async move { n1.initiate_handshake(handshake("did:atp:a", "did:atp:b", &[])).await },
            );
        let second =
            tokio::spawn(
                async move { n2.initiate_handshake(handshake("did:atp:b", "did:atp:a", &[])).await },
            );

        let outcomes = [first.await.unwrap(), second.await.unwrap()];
        let successes = outcomes.iter().filter(|o| o.is_ok()).count();
        assert_eq!(successes, 1);
        assert_eq!(fixture.negotiator.get_stats().active_sessions, 1);
    }

    #[tokio::test]
    async fn test_message_relay_and_drain() {
        let fixture = fixture().await;
        register(&fixture, "did:atp:a", TrustLevel::Verified, &["relay"]).await;
        register(&fixture, "did:atp:b", TrustLevel::Basic, &["relay"]).await;
        fixture
            .negotiator
            .initiate_handshake(handshake("did:atp:a", "did:atp:b", &["relay"]))
            .await
            .unwrap();

        let ack = fixture
            .negotiator
            .send_message(MessageRequest {
                from: "did:atp:a".into(),
                to: "did:atp:b".into(),
                payload: serde_json::json!({ "op": "ping" }),
                ttl_secs: None,
                sent_at: None,
            })
            .await
            .unwrap();
        assert!(ack.estimated_delivery > ack.queued_at);

        let inbox = fixture.negotiator.receive_messages("did:atp:b").await;
        assert_eq!(inbox.len(), 1);
        assert_eq!(inbox[0].from, "did:atp:a");

        // Clear-on-read.
        assert!(fixture.negotiator.receive_messages("did:atp:b").await.is_empty());
    }

    #[tokio::test]
    async fn test_message_without_session_fails() {
        let fixture = fixture().await;
        let err = fixture
            .negotiator
            .send_message(MessageRequest {
                from: "did:atp:a".into(),
                to: "did:atp:b".into(),
                payload: serde_json::json!({}),
                ttl_secs: None,
                sent_at: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ProtocolError::SessionExpired));
    }

    #[tokio::test]
    async fn test_stale_message_fails_delivery() {
        let fixture = fixture().await;
        register(&fixture, "did:atp:a", TrustLevel::Verified, &["relay"]).await;
        register(&fixture, "did:atp:b", TrustLevel::Basic, &["relay"]).await;
        let session = fixture
            .negotiator
            .initiate_handshake(handshake("did:atp:a", "did:atp:b", &[]))
            .await
            .unwrap();

        let err = fixture
            .negotiator
            .send_message(MessageRequest {
                from: "did:atp:a".into(),
                to: "did:atp:b".into(),
                payload: serde_json::json!({}),
                ttl_secs: Some(30),
                sent_at: Some(fixture.clock.now() - Duration::minutes(5)),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ProtocolError::MessageDeliveryFailed(_)));

        let stats = fixture.negotiator.get_stats();
        assert_eq!(stats.messages_relayed, 0);
        assert_eq!(
            fixture
                .negotiator
                .store
                .get(&session.session_id)
                .unwrap()
                .metrics
                .error_count,
            1
        );
    }

    #[tokio::test]
    async fn test_terminate_requires_participant() {
        let fixture = fixture().await;
        register(&fixture, "did:atp:a", TrustLevel::Verified, &["relay"]).await;
        register(&fixture, "did:atp:b", TrustLevel::Basic, &["relay"]).await;
        let session = fixture
            .negotiator
            .initiate_handshake(handshake("did:atp:a", "did:atp:b", &[]))
            .await
            .unwrap();

        let err = fixture
            .negotiator
            .terminate_session(session.session_id, "did:atp:intruder", "takeover")
            .await
            .unwrap_err();
        assert!(matches!(err, ProtocolError::NotAuthorized(_)));

        fixture
            .negotiator
            .terminate_session(session.session_id, "did:atp:b", "done")
            .await
            .unwrap();

        let missing = fixture
            .negotiator
            .terminate_session(Uuid::new_v4(), "did:atp:a", "x")
            .await
            .unwrap_err();
        assert!(matches!(missing, ProtocolError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_reaper_terminates_idle_sessions_once() {
        let fixture = fixture().await;
        register(&fixture, "did:atp:a", TrustLevel::Verified, &["relay"]).await;
        register(&fixture, "did:atp:b", TrustLevel::Basic, &["relay"]).await;
        fixture
            .negotiator
            .initiate_handshake(handshake("did:atp:a", "did:atp:b", &[]))
            .await
            .unwrap();

        // Not yet past the inactivity threshold.
        fixture.clock.advance(Duration::minutes(4));
        assert!(fixture.negotiator.reap_idle_sessions().is_empty());

        fixture.clock.advance(Duration::minutes(2));
        let reaped = fixture.negotiator.reap_idle_sessions();
        assert_eq!(reaped.len(), 1);
        let entry = reaped[0].audit_trail.last().unwrap();
        assert_eq!(entry.actor, "system");

        assert!(fixture.negotiator.reap_idle_sessions().is_empty());
        assert_eq!(fixture.negotiator.get_stats().active_sessions, 0);
    }

    #[tokio::test]
    async fn test_stats_average_duration_uses_first_termination_entry() {
        let fixture = fixture().await;
        register(&fixture, "did:atp:a", TrustLevel::Verified, &["relay"]).await;
        register(&fixture, "did:atp:b", TrustLevel::Basic, &["relay"]).await;
        let session = fixture
            .negotiator
            .initiate_handshake(handshake("did:atp:a", "did:atp:b", &[]))
            .await
            .unwrap();

        fixture.clock.advance(Duration::seconds(120));
        fixture
            .negotiator
            .terminate_session(session.session_id, "did:atp:a", "done")
            .await
            .unwrap();

        let stats = fixture.negotiator.get_stats();
        assert_eq!(stats.terminated_sessions, 1);
        assert_eq!(stats.average_terminated_duration_secs, Some(120.0));
    }

    #[tokio::test]
    async fn test_events_broadcast() {
        let fixture = fixture().await;
        register(&fixture, "did:atp:a", TrustLevel::Verified, &["relay"]).await;
        register(&fixture, "did:atp:b", TrustLevel::Basic, &["relay"]).await;

        let mut events = fixture.negotiator.subscribe();
        fixture
            .negotiator
            .initiate_handshake(handshake("did:atp:a", "did:atp:b", &[]))
            .await
            .unwrap();

        match events.recv().await.unwrap() {
            SessionEvent::Established { participants, .. } => {
                assert!(participants.contains("did:atp:a"));
            }
            other => panic!("expected Established, got {:?}", other),
        }
    }
}
