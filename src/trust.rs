use crate::clock::{Clock, SystemClock};
use crate::model::{Interaction, TrustLevel};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Relative weights of the four scoring factors. Expected to sum to 1.0.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TrustWeights {
    pub interaction: f64,
    pub recency: f64,
    pub credential: f64,
    pub success: f64,
}

impl Default for TrustWeights {
    fn default() -> Self {
        Self {
            interaction: 0.3,
            recency: 0.25,
            credential: 0.25,
            success: 0.2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScorerConfig {
    pub weights: TrustWeights,
    /// Window over which the most recent interaction still contributes
    /// recency signal. Beyond it the factor is 0.
    pub recency_window_days: i64,
    /// Credential count at which the credential factor saturates.
    pub credential_cap: u32,
}

impl Default for ScorerConfig {
    fn default() -> Self {
        Self {
            weights: TrustWeights::default(),
            recency_window_days: 30,
            credential_cap: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrustFactors {
    pub interaction: f64,
    pub recency: f64,
    pub credential: f64,
    pub success: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssessmentMetadata {
    pub interaction_count: u64,
    pub credential_count: u32,
    pub generated_at: DateTime<Utc>,
}

/// Derived scoring result; recomputed on demand, never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrustAssessment {
    pub score: f64,
    pub level: TrustLevel,
    pub factors: TrustFactors,
    pub confidence: f64,
    pub metadata: AssessmentMetadata,
}

/// Maps a composite score onto the trust ladder. Bands are half-open:
/// [0, 0.25) Basic, [0.25, 0.5) Verified, [0.5, 0.75) Trusted, rest Privileged.
pub fn level_for_score(score: f64) -> TrustLevel {
    if score < 0.25 {
        TrustLevel::Basic
    } else if score < 0.5 {
        TrustLevel::Verified
    } else if score < 0.75 {
        TrustLevel::Trusted
    } else {
        TrustLevel::Privileged
    }
}

pub struct TrustScorer {
    config: ScorerConfig,
    clock: Arc<dyn Clock>,
}

impl Default for TrustScorer {
    fn default() -> Self {
        Self::new(ScorerConfig::default(), Arc::new(SystemClock))
    }
}

impl TrustScorer {
    pub fn new(config: ScorerConfig, clock: Arc<dyn Clock>) -> Self {
        Self { config, clock }
    }

    pub fn config(&self) -> &ScorerConfig {
        &self.config
    }

    /// Full multi-factor score for an agent's interaction history and
    /// credential count. A pure computation over the injected clock's now.
    pub fn calculate_trust_score(
        &self,
        interactions: &[Interaction],
        credential_count: u32,
    ) -> TrustAssessment {
        Self::calculate_at(&self.config, interactions, credential_count, self.clock.now())
    }

    /// Same computation with an explicit evaluation instant.
    pub fn calculate_at(
        config: &ScorerConfig,
        interactions: &[Interaction],
        credential_count: u32,
        now: DateTime<Utc>,
    ) -> TrustAssessment {
        let count = interactions.len() as u64;

        // Saturating and monotone in interaction count; reaches 1.0 at 50.
        let interaction = ((count as f64) / 50.0).min(1.0);

        // Linear decay of the most recent interaction's age over the window.
        let recency = interactions
            .iter()
            .map(|i| i.at)
            .max()
            .map(|latest| {
                let window = (config.recency_window_days as f64) * 86_400.0;
                let age = (now - latest).num_seconds().max(0) as f64;
                (1.0 - age / window).clamp(0.0, 1.0)
            })
            .unwrap_or(0.0);

        let credential =
            ((credential_count as f64) / (config.credential_cap.max(1) as f64)).min(1.0);

        // Only explicitly flagged interactions count; no data is neutral.
        let flagged: Vec<bool> = interactions.iter().filter_map(|i| i.success).collect();
        let success = if flagged.is_empty() {
            0.5
        } else {
            flagged.iter().filter(|s| **s).count() as f64 / flagged.len() as f64
        };

        let weights = &config.weights;
        let score = weights.interaction * interaction
            + weights.recency * recency
            + weights.credential * credential
            + weights.success * success;

        let confidence = ((count as f64) / 20.0 * 0.7
            + (credential_count as f64) / (config.credential_cap.max(1) as f64) * 0.3)
            .min(1.0);

        TrustAssessment {
            score,
            level: level_for_score(score),
            factors: TrustFactors {
                interaction,
                recency,
                credential,
                success,
            },
            confidence,
            metadata: AssessmentMetadata {
                interaction_count: count,
                credential_count,
                generated_at: now,
            },
        }
    }

    /// Cheap heuristic when a full history is unavailable: count tier plus
    /// a credential bonus.
    pub fn simple_score(interaction_count: u64, credential_count: u32) -> f64 {
        let base = Self::level_from_count(interaction_count);
        let bonus = ((credential_count as f64) / 5.0).min(1.0);
        (base * 0.7 + bonus * 0.3).min(1.0)
    }

    /// Coarse tier mapping over raw interaction count.
    pub fn level_from_count(interaction_count: u64) -> f64 {
        match interaction_count {
            0 => 0.0,
            1..=4 => 0.25,
            5..=19 => 0.5,
            20..=49 => 0.75,
            _ => 1.0,
        }
    }
}
