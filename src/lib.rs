//! # ATP - Agent Trust Protocol
//!
//! Trust establishment and session layer for autonomous software agents.
//!
//! ## Architecture
//!
//! - **Capability Registry**: in-process agent directory indexed by capability and trust level
//! - **Session Negotiator**: handshake, message relay, session lifecycle, inactivity reaper
//! - **Trust Scorer**: pure interaction-history scoring with weighted factors
//! - **Proof Authenticator**: commitment-based challenge/response over identity, trust,
//!   credentials, and behavior history
//! - **Ports**: pluggable stores, clock, crypto, identity, and audit-sink collaborators

pub mod audit;
pub mod auth;
pub mod behavior;
pub mod clock;
pub mod config;
pub mod crypto;
pub mod error;
pub mod identity;
pub mod index;
pub mod model;
pub mod registry;
pub mod session;
pub mod store;
pub mod trust;

pub use audit::{AuditEvent, AuditSink};
pub use auth::{
    AuthResponse, BehaviorCheck, Challenge, ProofAuthenticator, Requirement, VerificationOutcome,
};
pub use behavior::{BehaviorMerkleTree, BehaviorStats};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::AppConfig;
pub use crypto::{CryptoProvider, Ed25519Provider};
pub use error::{ProtocolError, Result};
pub use identity::{DidDocument, IdentityProvider, InMemoryIdentityProvider, VerifiableCredential};
pub use model::{
    AgentProfile, Capability, Interaction, Session, SessionStatus, TrustLevel, VerificationStatus,
};
pub use registry::{CapabilityRegistry, DiscoveryRequest, DiscoveryResponse};
pub use session::{
    HandshakeRequest, HandshakeResponse, MessageRequest, SessionEvent, SessionNegotiator,
};
pub use trust::{ScorerConfig, TrustAssessment, TrustScorer};

pub type Did = String;
pub type SessionId = uuid::Uuid;
pub type ChallengeId = uuid::Uuid;
pub type MessageId = uuid::Uuid;
