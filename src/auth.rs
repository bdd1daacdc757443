use crate::behavior::{BehaviorMerkleTree, BehaviorStats};
use crate::clock::Clock;
use crate::config::AuthConfig;
use crate::crypto::CryptoProvider;
use crate::identity::{IdentityProvider, VerifiableCredential};
use crate::model::{Interaction, TrustLevel};
use crate::trust::{ScorerConfig, TrustScorer};
use crate::{ChallengeId, Did, ProtocolError, Result};
use chrono::{DateTime, Duration, Utc};
use ed25519_dalek::{SigningKey, VerifyingKey};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "check", rename_all = "snake_case")]
pub enum BehaviorCheck {
    NoViolations,
    SuccessRate { threshold: Option<f64> },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Requirement {
    Identity,
    TrustLevel { min: TrustLevel },
    Credential { credential_type: String },
    Behavior { check: BehaviorCheck },
}

/// Single-intent, time-bounded challenge issued by a verifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Challenge {
    pub id: ChallengeId,
    pub verifier_did: Did,
    pub prover_did: Did,
    pub requirements: Vec<Requirement>,
    pub nonce: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Proof {
    pub requirement: Requirement,
    pub commitment: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthResponse {
    pub challenge_id: ChallengeId,
    pub prover_did: Did,
    pub proofs: Vec<Proof>,
    /// Ed25519 signature over the whole response, base64.
    pub signature: String,
}

/// Everything the prover brings to response generation.
pub struct ProverContext {
    pub did: Did,
    pub interactions: Vec<Interaction>,
    pub credentials: Vec<VerifiableCredential>,
    pub behavior_tree: Option<BehaviorMerkleTree>,
    pub behavior_stats: Option<BehaviorStats>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProofCheck {
    pub requirement: Requirement,
    pub verified: bool,
}

/// Verification result. Verification fails closed: any problem yields
/// `verified == false` with a reason, never an error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationOutcome {
    pub verified: bool,
    pub session_token: Option<String>,
    pub trust_established: bool,
    pub proofs: Vec<ProofCheck>,
    pub reason: Option<String>,
}

impl VerificationOutcome {
    fn rejected(reason: &str) -> Self {
        Self {
            verified: false,
            session_token: None,
            trust_established: false,
            proofs: vec![],
            reason: Some(reason.to_string()),
        }
    }
}

#[derive(Serialize)]
struct SignaturePayload<'a> {
    challenge_id: &'a ChallengeId,
    nonce: &'a str,
    prover_did: &'a str,
    proofs: &'a [Proof],
}

/// Commitment-based challenge/response authenticator.
///
/// The scheme commits to claims with salted digests rather than a verified
/// zero-knowledge protocol; soundness of the commitments themselves is out
/// of scope.
pub struct ProofAuthenticator {
    crypto: Arc<dyn CryptoProvider>,
    identity: Arc<dyn IdentityProvider>,
    clock: Arc<dyn Clock>,
    config: AuthConfig,
    scorer_config: ScorerConfig,
}

impl ProofAuthenticator {
    pub fn new(
        crypto: Arc<dyn CryptoProvider>,
        identity: Arc<dyn IdentityProvider>,
        clock: Arc<dyn Clock>,
        config: AuthConfig,
        scorer_config: ScorerConfig,
    ) -> Self {
        Self {
            crypto,
            identity,
            clock,
            config,
            scorer_config,
        }
    }

    fn random_hex(bytes: usize) -> String {
        let mut buffer = vec![0u8; bytes];
        rand::thread_rng().fill_bytes(&mut buffer);
        hex::encode(buffer)
    }

    /// Issues a fresh challenge. Nonce and id are newly random on every
    /// call, including for repeated verifier/prover pairs.
    pub fn create_challenge(
        &self,
        verifier_did: &str,
        prover_did: &str,
        requirements: Vec<Requirement>,
    ) -> Challenge {
        let now = self.clock.now();
        Challenge {
            id: Uuid::new_v4(),
            verifier_did: verifier_did.to_string(),
            prover_did: prover_did.to_string(),
            requirements,
            nonce: Self::random_hex(self.config.nonce_bytes),
            issued_at: now,
            expires_at: now + Duration::seconds(self.config.challenge_ttl_secs as i64),
        }
    }

    /// Produces one proof per requirement, all-or-nothing: the first
    /// requirement that cannot be satisfied aborts the whole call and the
    /// caller must obtain a fresh challenge.
    pub fn generate_auth_response(
        &self,
        challenge: &Challenge,
        context: &ProverContext,
        signing_key: &SigningKey,
    ) -> Result<AuthResponse> {
        let now = self.clock.now();
        if now >= challenge.expires_at {
            return Err(ProtocolError::ExpiredChallenge);
        }

        let mut proofs = Vec::with_capacity(challenge.requirements.len());
        for requirement in &challenge.requirements {
            let commitment = self.build_commitment(requirement, challenge, context, now)?;
            proofs.push(Proof {
                requirement: requirement.clone(),
                commitment,
                timestamp: now,
            });
        }

        let payload = serde_json::to_vec(&SignaturePayload {
            challenge_id: &challenge.id,
            nonce: &challenge.nonce,
            prover_did: &context.did,
            proofs: &proofs,
        })?;
        let signature = self.crypto.sign(&payload, signing_key);

        Ok(AuthResponse {
            challenge_id: challenge.id,
            prover_did: context.did.clone(),
            proofs,
            signature,
        })
    }

    fn build_commitment(
        &self,
        requirement: &Requirement,
        challenge: &Challenge,
        context: &ProverContext,
        now: DateTime<Utc>,
    ) -> Result<String> {
        let nonce = challenge.nonce.as_bytes();
        match requirement {
            Requirement::Identity => {
                let fingerprint = self.crypto.fingerprint(&context.did);
                Ok(self.crypto.commitment_hash(&[
                    nonce,
                    context.did.as_bytes(),
                    fingerprint.as_bytes(),
                ]))
            }
            Requirement::TrustLevel { min } => {
                let assessment = TrustScorer::calculate_at(
                    &self.scorer_config,
                    &context.interactions,
                    context.credentials.len() as u32,
                    now,
                );
                if assessment.level < *min {
                    return Err(ProtocolError::InsufficientTrust {
                        required: *min,
                        actual: assessment.level,
                    });
                }
                Ok(self.crypto.commitment_hash(&[
                    nonce,
                    context.did.as_bytes(),
                    format!("{:?}", assessment.level).as_bytes(),
                ]))
            }
            Requirement::Credential { credential_type } => {
                let credential = context
                    .credentials
                    .iter()
                    .find(|c| c.credential_type == *credential_type)
                    .ok_or_else(|| {
                        ProtocolError::NoMatchingCredential(credential_type.clone())
                    })?;
                Ok(self.crypto.commitment_hash(&[
                    nonce,
                    credential.id.as_bytes(),
                    credential.issuer_did.as_bytes(),
                ]))
            }
            Requirement::Behavior { check } => {
                let (tree, stats) = match (&context.behavior_tree, &context.behavior_stats) {
                    (Some(tree), Some(stats)) => (tree, stats),
                    _ => return Err(ProtocolError::MissingBehaviorData),
                };
                let root = tree.root_hex();
                match check {
                    BehaviorCheck::NoViolations => {
                        if stats.violations > 0 {
                            return Err(ProtocolError::ViolationsPresent(stats.violations));
                        }
                        Ok(self
                            .crypto
                            .commitment_hash(&[nonce, root.as_bytes(), b"no-violations"]))
                    }
                    BehaviorCheck::SuccessRate { threshold: _ } => {
                        // The ratio is committed but not checked against the
                        // threshold here; enforcement is verifier policy.
                        let rate = stats.success_rate().unwrap_or(0.0);
                        Ok(self.crypto.commitment_hash(&[
                            nonce,
                            root.as_bytes(),
                            rate.to_bits().to_be_bytes().as_slice(),
                        ]))
                    }
                }
            }
        }
    }

    /// Checks a response against its challenge. Fail-closed: any mismatch,
    /// expiry, or signature problem yields `verified == false`.
    pub fn verify_auth_response(
        &self,
        response: &AuthResponse,
        challenge: &Challenge,
    ) -> VerificationOutcome {
        let now = self.clock.now();

        if response.challenge_id != challenge.id {
            return VerificationOutcome::rejected("challenge id mismatch");
        }
        if now >= challenge.expires_at {
            return VerificationOutcome::rejected("challenge expired");
        }
        if response.prover_did != challenge.prover_did {
            return VerificationOutcome::rejected("prover did mismatch");
        }
        if response.proofs.len() != challenge.requirements.len() {
            return VerificationOutcome::rejected("requirement coverage incomplete");
        }
        for (proof, requirement) in response.proofs.iter().zip(&challenge.requirements) {
            if proof.requirement != *requirement {
                return VerificationOutcome::rejected("proof does not match requirement");
            }
            if proof.timestamp > now {
                return VerificationOutcome::rejected("proof timestamp in the future");
            }
            if proof.commitment.is_empty() {
                return VerificationOutcome::rejected("empty commitment");
            }
        }

        let Some(document) = self.identity.resolve(&response.prover_did) else {
            return VerificationOutcome::rejected("prover did unresolvable");
        };
        let Ok(key_bytes) = <[u8; 32]>::try_from(document.verifying_key.as_slice()) else {
            return VerificationOutcome::rejected("malformed verifying key");
        };
        let Ok(verifying_key) = VerifyingKey::from_bytes(&key_bytes) else {
            return VerificationOutcome::rejected("invalid verifying key");
        };

        let payload = match serde_json::to_vec(&SignaturePayload {
            challenge_id: &challenge.id,
            nonce: &challenge.nonce,
            prover_did: &response.prover_did,
            proofs: &response.proofs,
        }) {
            Ok(payload) => payload,
            Err(_) => return VerificationOutcome::rejected("payload serialization failed"),
        };
        if !self
            .crypto
            .verify(&payload, &response.signature, &verifying_key)
        {
            return VerificationOutcome::rejected("signature verification failed");
        }

        let trust_established = challenge
            .requirements
            .iter()
            .any(|r| matches!(r, Requirement::TrustLevel { .. }));

        tracing::info!(
            prover = %response.prover_did,
            verifier = %challenge.verifier_did,
            trust_established,
            "auth response verified"
        );

        VerificationOutcome {
            verified: true,
            session_token: Some(Self::random_hex(self.config.session_token_bytes)),
            trust_established,
            proofs: response
                .proofs
                .iter()
                .map(|p| ProofCheck {
                    requirement: p.requirement.clone(),
                    verified: true,
                })
                .collect(),
            reason: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::crypto::Ed25519Provider;
    use crate::identity::{DidDocument, InMemoryIdentityProvider};

    struct Fixture {
        authenticator: ProofAuthenticator,
        clock: ManualClock,
        signing_key: SigningKey,
    }

    const PROVER: &str = "did:atp:prover";
    const VERIFIER: &str = "did:atp:verifier";

    fn fixture() -> Fixture {
        let clock = ManualClock::new(Utc::now());
        let identity = Arc::new(InMemoryIdentityProvider::new());
        let crypto = Ed25519Provider;
        let (signing_key, verifying_key) = Ed25519Provider::generate_keypair();
        identity.publish_document(DidDocument {
            did: PROVER.into(),
            verifying_key: verifying_key.to_bytes().to_vec(),
            fingerprint: crypto.fingerprint(PROVER),
        });

        let authenticator = ProofAuthenticator::new(
            Arc::new(crypto),
            Arc::clone(&identity) as Arc<dyn IdentityProvider>,
            Arc::new(clock.clone()),
            AuthConfig::default(),
            ScorerConfig::default(),
        );
        Fixture {
            authenticator,
            clock,
            signing_key,
        }
    }

    fn credential(kind: &str) -> VerifiableCredential {
        VerifiableCredential {
            id: format!("cred-{}", kind),
            credential_type: kind.into(),
            subject_did: PROVER.into(),
            issuer_did: "did:atp:authority".into(),
            issued_at: Utc::now(),
            expires_at: None,
        }
    }

    fn strong_context(clock: &ManualClock) -> ProverContext {
        let now = clock.now();
        let mut tree = BehaviorMerkleTree::new();
        for i in 0..10 {
            tree.append(format!("success:op-{}", i).as_bytes());
        }
        ProverContext {
            did: PROVER.into(),
            interactions: (0..50).map(|_| Interaction::succeeded(now)).collect(),
            credentials: vec![credential("kyc"), credential("operator-license")],
            behavior_tree: Some(tree),
            behavior_stats: Some(BehaviorStats {
                successes: 10,
                violations: 0,
            }),
        }
    }

    fn all_requirements() -> Vec<Requirement> {
        vec![
            Requirement::Identity,
            Requirement::TrustLevel {
                min: TrustLevel::Trusted,
            },
            Requirement::Credential {
                credential_type: "kyc".into(),
            },
            Requirement::Behavior {
                check: BehaviorCheck::NoViolations,
            },
        ]
    }

    #[test]
    fn test_challenges_are_unique_per_call() {
        let fixture = fixture();
        let a = fixture
            .authenticator
            .create_challenge(VERIFIER, PROVER, vec![Requirement::Identity]);
        let b = fixture
            .authenticator
            .create_challenge(VERIFIER, PROVER, vec![Requirement::Identity]);
        assert_ne!(a.id, b.id);
        assert_ne!(a.nonce, b.nonce);
        assert!(a.expires_at > a.issued_at);
    }

    #[test]
    fn test_full_round_trip_verifies() {
        let fixture = fixture();
        let challenge = fixture
            .authenticator
            .create_challenge(VERIFIER, PROVER, all_requirements());
        let response = fixture
            .authenticator
            .generate_auth_response(&challenge, &strong_context(&fixture.clock), &fixture.signing_key)
            .unwrap();

        let outcome = fixture
            .authenticator
            .verify_auth_response(&response, &challenge);
        assert!(outcome.verified, "{:?}", outcome.reason);
        assert!(outcome.trust_established);
        assert_eq!(outcome.proofs.len(), 4);
        assert!(outcome.proofs.iter().all(|p| p.verified));
        // Fixed-length token: 32 bytes hex-encoded.
        assert_eq!(outcome.session_token.unwrap().len(), 64);
    }

    #[test]
    fn test_expired_challenge_fails_generation() {
        let fixture = fixture();
        let challenge =
            fixture
                .authenticator
                .create_challenge(VERIFIER, PROVER, vec![Requirement::Identity]);
        fixture.clock.advance(Duration::minutes(6));

        let err = fixture
            .authenticator
            .generate_auth_response(&challenge, &strong_context(&fixture.clock), &fixture.signing_key)
            .unwrap_err();
        assert!(matches!(err, ProtocolError::ExpiredChallenge));
    }

    #[test]
    fn test_insufficient_trust_aborts_generation() {
        let fixture = fixture();
        let challenge = fixture.authenticator.create_challenge(
            VERIFIER,
            PROVER,
            vec![Requirement::TrustLevel {
                min: TrustLevel::Privileged,
            }],
        );
        let context = ProverContext {
            did: PROVER.into(),
            interactions: vec![],
            credentials: vec![],
            behavior_tree: None,
            behavior_stats: None,
        };
        let err = fixture
            .authenticator
            .generate_auth_response(&challenge, &context, &fixture.signing_key)
            .unwrap_err();
        assert!(matches!(err, ProtocolError::InsufficientTrust { .. }));
    }

    #[test]
    fn test_missing_credential_aborts_generation() {
        let fixture = fixture();
        let challenge = fixture.authenticator.create_challenge(
            VERIFIER,
            PROVER,
            vec![Requirement::Credential {
                credential_type: "tax-clearance".into(),
            }],
        );
        let err = fixture
            .authenticator
            .generate_auth_response(&challenge, &strong_context(&fixture.clock), &fixture.signing_key)
            .unwrap_err();
        assert!(matches!(err, ProtocolError::NoMatchingCredential(_)));
    }

    #[test]
    fn test_behavior_requirements() {
        let fixture = fixture();
        let challenge = fixture.authenticator.create_challenge(
            VERIFIER,
            PROVER,
            vec![Requirement::Behavior {
                check: BehaviorCheck::NoViolations,
            }],
        );

        // No behavior data at all.
        let bare = ProverContext {
            did: PROVER.into(),
            interactions: vec![],
            credentials: vec![],
            behavior_tree: None,
            behavior_stats: None,
        };
        let err = fixture
            .authenticator
            .generate_auth_response(&challenge, &bare, &fixture.signing_key)
            .unwrap_err();
        assert!(matches!(err, ProtocolError::MissingBehaviorData));

        // Violations present.
        let mut with_violations = strong_context(&fixture.clock);
        with_violations.behavior_stats = Some(BehaviorStats {
            successes: 5,
            violations: 2,
        });
        let err = fixture
            .authenticator
            .generate_auth_response(&challenge, &with_violations, &fixture.signing_key)
            .unwrap_err();
        assert!(matches!(err, ProtocolError::ViolationsPresent(2)));

        // A low success rate does not abort generation.
        let rate_challenge = fixture.authenticator.create_challenge(
            VERIFIER,
            PROVER,
            vec![Requirement::Behavior {
                check: BehaviorCheck::SuccessRate {
                    threshold: Some(0.99),
                },
            }],
        );
        let mut low_rate = strong_context(&fixture.clock);
        low_rate.behavior_stats = Some(BehaviorStats {
            successes: 1,
            violations: 9,
        });
        assert!(fixture
            .authenticator
            .generate_auth_response(&rate_challenge, &low_rate, &fixture.signing_key)
            .is_ok());
    }

    #[test]
    fn test_verify_fails_closed_on_id_mismatch() {
        let fixture = fixture();
        let challenge =
            fixture
                .authenticator
                .create_challenge(VERIFIER, PROVER, vec![Requirement::Identity]);
        let other =
            fixture
                .authenticator
                .create_challenge(VERIFIER, PROVER, vec![Requirement::Identity]);
        let response = fixture
            .authenticator
            .generate_auth_response(&challenge, &strong_context(&fixture.clock), &fixture.signing_key)
            .unwrap();

        let outcome = fixture.authenticator.verify_auth_response(&response, &other);
        assert!(!outcome.verified);
        assert!(outcome.session_token.is_none());
    }

    #[test]
    fn test_verify_fails_closed_on_expiry_and_tampering() {
        let fixture = fixture();
        let challenge =
            fixture
                .authenticator
                .create_challenge(VERIFIER, PROVER, vec![Requirement::Identity]);
        let response = fixture
            .authenticator
            .generate_auth_response(&challenge, &strong_context(&fixture.clock), &fixture.signing_key)
            .unwrap();

        // Tampered signature.
        let mut tampered = response.clone();
        tampered.signature = "AAAA".repeat(22);
        assert!(!fixture
            .authenticator
            .verify_auth_response(&tampered, &challenge)
            .verified);

        // Expired at verification time.
        fixture.clock.advance(Duration::minutes(6));
        assert!(!fixture
            .authenticator
            .verify_auth_response(&response, &challenge)
            .verified);
    }

    #[test]
    fn test_trust_established_requires_trust_requirement() {
        let fixture = fixture();
        let challenge =
            fixture
                .authenticator
                .create_challenge(VERIFIER, PROVER, vec![Requirement::Identity]);
        let response = fixture
            .authenticator
            .generate_auth_response(&challenge, &strong_context(&fixture.clock), &fixture.signing_key)
            .unwrap();
        let outcome = fixture
            .authenticator
            .verify_auth_response(&response, &challenge);
        assert!(outcome.verified);
        assert!(!outcome.trust_established);
    }

    #[test]
    fn test_unresolvable_prover_fails_closed() {
        let fixture = fixture();
        let (foreign_key, _) = Ed25519Provider::generate_keypair();
        let challenge = fixture.authenticator.create_challenge(
            VERIFIER,
            "did:atp:stranger",
            vec![Requirement::Identity],
        );
        let context = ProverContext {
            did: "did:atp:stranger".into(),
            interactions: vec![],
            credentials: vec![],
            behavior_tree: None,
            behavior_stats: None,
        };
        let response = fixture
            .authenticator
            .generate_auth_response(&challenge, &context, &foreign_key)
            .unwrap();
        let outcome = fixture
            .authenticator
            .verify_auth_response(&response, &challenge);
        assert!(!outcome.verified);
    }
}
