//! Abstract storage ports for registry and session state.
//!
//! Default implementations are in-memory and guard every mutation with an
//! internal `parking_lot::RwLock`, so the "look up, then create" sequences
//! callers rely on are single critical sections. A distributed deployment
//! swaps these for a transactional store without touching the components.

use crate::index::KeyIndex;
use crate::model::{AgentProfile, AgentStatusUpdate, ParticipantPair, Session, TrustLevel};
use crate::{Did, ProtocolError, Result, SessionId};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};

pub trait AgentStore: Send + Sync {
    /// Inserts a new profile; fails if the DID is already registered.
    fn insert(&self, profile: AgentProfile) -> Result<()>;

    /// Removes a profile and all its index entries.
    fn remove(&self, did: &str) -> Result<AgentProfile>;

    fn get(&self, did: &str) -> Option<AgentProfile>;

    /// All profiles in DID order, the deterministic base order for discovery.
    fn list(&self) -> Vec<AgentProfile>;

    /// Profiles advertising at least one wanted capability and at or above
    /// the minimum trust level, answered from the secondary indices. An
    /// empty capability list matches every agent. Results stay in DID order.
    fn candidates(
        &self,
        capabilities: &[String],
        min_level: Option<TrustLevel>,
    ) -> Vec<AgentProfile>;

    fn update_status(&self, did: &str, update: AgentStatusUpdate) -> Result<AgentProfile>;

    fn len(&self) -> usize;

    fn capability_counts(&self) -> BTreeMap<String, usize>;

    fn level_counts(&self) -> BTreeMap<TrustLevel, usize>;
}

#[derive(Default)]
struct AgentMaps {
    agents: BTreeMap<Did, AgentProfile>,
    by_capability: KeyIndex<String>,
    by_level: KeyIndex<TrustLevel>,
}

impl AgentMaps {
    fn index(&mut self, profile: &AgentProfile) {
        for capability in &profile.capabilities {
            self.by_capability.insert(capability.name.clone(), &profile.did);
        }
        self.by_level.insert(profile.trust.trust_level, &profile.did);
    }

    fn unindex(&mut self, profile: &AgentProfile) {
        self.by_capability.remove_did(&profile.did);
        self.by_level.remove(&profile.trust.trust_level, &profile.did);
    }
}

#[derive(Default)]
pub struct InMemoryAgentStore {
    inner: RwLock<AgentMaps>,
}

impl InMemoryAgentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AgentStore for InMemoryAgentStore {
    fn insert(&self, profile: AgentProfile) -> Result<()> {
        let mut inner = self.inner.write();
        if inner.agents.contains_key(&profile.did) {
            return Err(ProtocolError::Validation(format!(
                "Agent already registered: {}",
                profile.did
            )));
        }
        inner.index(&profile);
        inner.agents.insert(profile.did.clone(), profile);
        Ok(())
    }

    fn remove(&self, did: &str) -> Result<AgentProfile> {
        let mut inner = self.inner.write();
        let profile = inner
            .agents
            .remove(did)
            .ok_or_else(|| ProtocolError::NotFound(format!("Agent not registered: {}", did)))?;
        inner.unindex(&profile);
        Ok(profile)
    }

    fn get(&self, did: &str) -> Option<AgentProfile> {
        self.inner.read().agents.get(did).cloned()
    }

    fn list(&self) -> Vec<AgentProfile> {
        self.inner.read().agents.values().cloned().collect()
    }

    fn candidates(
        &self,
        capabilities: &[String],
        min_level: Option<TrustLevel>,
    ) -> Vec<AgentProfile> {
        let inner = self.inner.read();

        let mut dids: std::collections::BTreeSet<Did> = if capabilities.is_empty() {
            inner.agents.keys().cloned().collect()
        } else {
            capabilities
                .iter()
                .filter_map(|cap| inner.by_capability.get(cap))
                .flat_map(|set| set.iter().cloned())
                .collect()
        };

        if let Some(min) = min_level {
            let levels: Vec<TrustLevel> = inner
                .by_level
                .keys()
                .filter(|level| **level >= min)
                .cloned()
                .collect();
            dids.retain(|did| levels.iter().any(|level| inner.by_level.contains(level, did)));
        }

        dids.iter()
            .filter_map(|did| inner.agents.get(did).cloned())
            .collect()
    }

    fn update_status(&self, did: &str, update: AgentStatusUpdate) -> Result<AgentProfile> {
        let mut inner = self.inner.write();
        let mut profile = inner
            .agents
            .get(did)
            .cloned()
            .ok_or_else(|| ProtocolError::NotFound(format!("Agent not registered: {}", did)))?;

        let previous_level = profile.trust.trust_level;
        if let Some(level) = update.trust_level {
            profile.trust.trust_level = level;
        }
        if let Some(status) = update.verification_status {
            profile.trust.verification_status = status;
        }
        if let Some(reputation) = update.reputation {
            profile.trust.reputation = reputation;
        }
        if let Some(last_verified) = update.last_verified {
            profile.trust.last_verified = Some(last_verified);
        }

        // An update must not leave a profile that registration would reject,
        // e.g. a lowered trust level below a capability's required level.
        profile.validate()?;

        if profile.trust.trust_level != previous_level {
            inner.by_level.remove(&previous_level, did);
            inner.by_level.insert(profile.trust.trust_level, did);
        }
        inner.agents.insert(did.to_string(), profile.clone());
        Ok(profile)
    }

    fn len(&self) -> usize {
        self.inner.read().agents.len()
    }

    fn capability_counts(&self) -> BTreeMap<String, usize> {
        self.inner.read().by_capability.counts()
    }

    fn level_counts(&self) -> BTreeMap<TrustLevel, usize> {
        self.inner.read().by_level.counts()
    }
}

pub trait SessionStore: Send + Sync {
    /// Atomic check-and-create: fails if the unordered pair already has an
    /// active session. This is the critical section that keeps concurrent
    /// handshakes from racing into duplicate active sessions.
    fn create_if_absent(&self, session: Session) -> Result<Session>;

    fn get(&self, id: &SessionId) -> Option<Session>;

    fn find_active_by_pair(&self, pair: &ParticipantPair) -> Option<Session>;

    /// Bumps counters and appends the relay audit entry under the store lock.
    fn record_message(
        &self,
        id: &SessionId,
        sender: &str,
        message_id: uuid::Uuid,
        now: DateTime<Utc>,
    ) -> Result<Session>;

    /// Bumps the error counter, e.g. after a failed delivery attempt.
    fn record_error(&self, id: &SessionId);

    fn terminate(
        &self,
        id: &SessionId,
        actor: &str,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<Session>;

    /// Atomically terminates every active session idle since before
    /// `cutoff`, tagging the audit entry with the system actor. Each session
    /// can be returned by at most one call.
    fn reap_idle(&self, cutoff: DateTime<Utc>, now: DateTime<Utc>) -> Vec<Session>;

    fn list(&self) -> Vec<Session>;
}

#[derive(Default)]
struct SessionMaps {
    sessions: HashMap<SessionId, Session>,
    active_by_pair: HashMap<ParticipantPair, SessionId>,
}

#[derive(Default)]
pub struct InMemorySessionStore {
    inner: RwLock<SessionMaps>,
}

pub const SYSTEM_ACTOR: &str = "system";

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for InMemorySessionStore {
    fn create_if_absent(&self, session: Session) -> Result<Session> {
        let mut inner = self.inner.write();
        if let Some(existing) = inner.active_by_pair.get(&session.participants) {
            return Err(ProtocolError::Validation(format!(
                "Active session already exists for pair: {}",
                existing
            )));
        }
        inner
            .active_by_pair
            .insert(session.participants.clone(), session.id);
        inner.sessions.insert(session.id, session.clone());
        Ok(session)
    }

    fn get(&self, id: &SessionId) -> Option<Session> {
        self.inner.read().sessions.get(id).cloned()
    }

    fn find_active_by_pair(&self, pair: &ParticipantPair) -> Option<Session> {
        let inner = self.inner.read();
        let id = inner.active_by_pair.get(pair)?;
        inner.sessions.get(id).cloned()
    }

    fn record_message(
        &self,
        id: &SessionId,
        sender: &str,
        message_id: uuid::Uuid,
        now: DateTime<Utc>,
    ) -> Result<Session> {
        let mut inner = self.inner.write();
        let session = inner
            .sessions
            .get_mut(id)
            .ok_or(ProtocolError::SessionExpired)?;
        if !session.is_active() {
            return Err(ProtocolError::SessionExpired);
        }
        session.record_message(sender, message_id, now);
        Ok(session.clone())
    }

    fn record_error(&self, id: &SessionId) {
        let mut inner = self.inner.write();
        if let Some(session) = inner.sessions.get_mut(id) {
            session.metrics.error_count += 1;
        }
    }

    fn terminate(
        &self,
        id: &SessionId,
        actor: &str,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<Session> {
        let mut inner = self.inner.write();
        let session = inner
            .sessions
            .get_mut(id)
            .ok_or_else(|| ProtocolError::NotFound(format!("Session not found: {}", id)))?;
        if !session.is_active() {
            return Err(ProtocolError::Validation(format!(
                "Session already terminated: {}",
                id
            )));
        }
        session.terminate(actor, reason, now);
        let pair = session.participants.clone();
        let terminated = session.clone();
        inner.active_by_pair.remove(&pair);
        Ok(terminated)
    }

    fn reap_idle(&self, cutoff: DateTime<Utc>, now: DateTime<Utc>) -> Vec<Session> {
        let mut inner = self.inner.write();
        let idle: Vec<SessionId> = inner
            .sessions
            .values()
            .filter(|s| s.is_active() && s.metrics.last_activity < cutoff)
            .map(|s| s.id)
            .collect();

        let mut reaped = Vec::with_capacity(idle.len());
        for id in idle {
            if let Some(session) = inner.sessions.get_mut(&id) {
                session.terminate(SYSTEM_ACTOR, "inactivity timeout", now);
                let pair = session.participants.clone();
                reaped.push(session.clone());
                inner.active_by_pair.remove(&pair);
            }
        }
        reaped
    }

    fn list(&self) -> Vec<Session> {
        self.inner.read().sessions.values().cloned().collect()
    }
}
