use crate::audit::AuditSink;
use crate::clock::Clock;
use crate::config::RegistryConfig;
use crate::model::{AgentProfile, AgentStatusUpdate, VerificationStatus};
use crate::store::AgentStore;
use crate::{Did, Result, TrustLevel};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiscoveryRequest {
    /// Keep agents advertising at least one of these capabilities.
    pub capabilities: Vec<String>,
    pub min_trust_level: Option<TrustLevel>,
    pub verified_only: bool,
    /// When set, keep only agents verified within the freshness window.
    pub recent_only: bool,
    /// Keep agents carrying at least one of these tags.
    pub tags: Vec<String>,
    pub offset: usize,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryResponse {
    pub agents: Vec<AgentProfile>,
    pub total: usize,
    pub has_more: bool,
    pub latency_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryStats {
    pub total_agents: usize,
    pub verified_agents: usize,
    pub agents_by_level: BTreeMap<String, usize>,
    pub agents_by_capability: BTreeMap<String, usize>,
}

/// Agent directory indexed by capability and trust level.
pub struct CapabilityRegistry {
    store: Arc<dyn AgentStore>,
    audit: AuditSink,
    clock: Arc<dyn Clock>,
    config: RegistryConfig,
}

impl CapabilityRegistry {
    pub fn new(
        store: Arc<dyn AgentStore>,
        audit: AuditSink,
        clock: Arc<dyn Clock>,
        config: RegistryConfig,
    ) -> Self {
        Self {
            store,
            audit,
            clock,
            config,
        }
    }

    pub async fn register_agent(&self, profile: AgentProfile) -> Result<()> {
        profile.validate()?;
        let did = profile.did.clone();
        self.store.insert(profile)?;

        tracing::info!(did = %did, "agent registered");
        self.audit.record(
            "agent-registered",
            &did,
            &did,
            serde_json::json!({ "event": "register" }),
        );
        Ok(())
    }

    pub async fn unregister_agent(&self, did: &str) -> Result<AgentProfile> {
        let profile = self.store.remove(did)?;
        tracing::info!(did = %did, "agent unregistered");
        self.audit.record(
            "agent-unregistered",
            did,
            did,
            serde_json::json!({ "event": "unregister" }),
        );
        Ok(profile)
    }

    pub fn get_agent(&self, did: &str) -> Option<AgentProfile> {
        self.store.get(did)
    }

    pub async fn update_agent_status(
        &self,
        did: &str,
        update: AgentStatusUpdate,
    ) -> Result<AgentProfile> {
        let profile = self.store.update_status(did, update)?;
        self.audit.record(
            "agent-status-updated",
            did,
            did,
            serde_json::json!({ "trust_level": profile.trust.trust_level }),
        );
        Ok(profile)
    }

    /// Filtered, ranked, paginated lookup.
    ///
    /// Filters apply in fixed order: capability overlap, minimum trust
    /// level, verified-only, verification recency, tag overlap. Ranking is
    /// a stable sort by trust-level rank then reputation score, both
    /// descending, over the DID-ordered base list, so identical state and
    /// request always produce the identical result.
    pub async fn discover_agents(&self, request: DiscoveryRequest) -> Result<DiscoveryResponse> {
        let started = Instant::now();
        let now = self.clock.now();
        let freshness = Duration::seconds(self.config.freshness_window_secs as i64);

        // Capability and trust-level filters are answered from the store
        // indices; the remaining filters scan the narrowed candidate set.
        let mut candidates: Vec<AgentProfile> = self
            .store
            .candidates(&request.capabilities, request.min_trust_level);

        if request.verified_only {
            candidates
                .retain(|agent| agent.trust.verification_status == VerificationStatus::Verified);
        }

        if request.recent_only {
            candidates.retain(|agent| {
                agent
                    .trust
                    .last_verified
                    .is_some_and(|at| now - at <= freshness)
            });
        }

        if !request.tags.is_empty() {
            candidates.retain(|agent| request.tags.iter().any(|tag| agent.tags.contains(tag)));
        }

        candidates.sort_by(|a, b| {
            b.trust
                .trust_level
                .rank()
                .cmp(&a.trust.trust_level.rank())
                .then(
                    b.trust
                        .reputation
                        .score
                        .partial_cmp(&a.trust.reputation.score)
                        .unwrap_or(std::cmp::Ordering::Equal),
                )
        });

        let total = candidates.len();
        let limit = request.limit.unwrap_or(self.config.default_page_size);
        let page: Vec<AgentProfile> = candidates
            .into_iter()
            .skip(request.offset)
            .take(limit)
            .collect();
        let has_more = request.offset + page.len() < total;

        Ok(DiscoveryResponse {
            agents: page,
            total,
            has_more,
            latency_ms: started.elapsed().as_millis() as u64,
        })
    }

    /// Agents advertising the given capability, ranked by overlap with the
    /// wanted set. Used by the negotiator to suggest alternatives.
    pub fn rank_by_capability_overlap(&self, wanted: &[String], exclude: &str) -> Vec<Did> {
        let mut scored: Vec<(usize, Did)> = self
            .store
            .list()
            .into_iter()
            .filter(|agent| agent.did != exclude)
            .map(|agent| {
                let overlap = wanted.iter().filter(|c| agent.advertises(c)).count();
                (overlap, agent.did)
            })
            .filter(|(overlap, _)| *overlap > 0)
            .collect();
        scored.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));
        scored.into_iter().map(|(_, did)| did).collect()
    }

    pub fn get_stats(&self) -> RegistryStats {
        let agents = self.store.list();
        let verified_agents = agents
            .iter()
            .filter(|a| a.trust.verification_status == VerificationStatus::Verified)
            .count();
        let agents_by_level = self
            .store
            .level_counts()
            .into_iter()
            .map(|(level, count)| (format!("{:?}", level).to_lowercase(), count))
            .collect();

        RegistryStats {
            total_agents: self.store.len(),
            verified_agents,
            agents_by_level,
            agents_by_capability: self.store.capability_counts(),
        }
    }
}
