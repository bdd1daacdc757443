use crate::Did;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Resolved DID document, carrying the material verifiers need.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DidDocument {
    pub did: Did,
    /// Ed25519 verifying key, raw 32 bytes.
    pub verifying_key: Vec<u8>,
    pub fingerprint: String,
}

/// A signed third-party claim about a subject.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifiableCredential {
    pub id: String,
    pub credential_type: String,
    pub subject_did: Did,
    pub issuer_did: Did,
    pub issued_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Synchronous read-side lookup of DID documents and credentials.
/// The default implementation is an in-memory map; a production deployment
/// backs this with a resolver network.
pub trait IdentityProvider: Send + Sync {
    fn resolve(&self, did: &str) -> Option<DidDocument>;

    fn credentials_for(&self, did: &str) -> Vec<VerifiableCredential>;
}

#[derive(Default)]
pub struct InMemoryIdentityProvider {
    documents: RwLock<HashMap<Did, DidDocument>>,
    credentials: RwLock<HashMap<Did, Vec<VerifiableCredential>>>,
}

impl InMemoryIdentityProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish_document(&self, document: DidDocument) {
        self.documents
            .write()
            .insert(document.did.clone(), document);
    }

    pub fn issue_credential(&self, credential: VerifiableCredential) {
        self.credentials
            .write()
            .entry(credential.subject_did.clone())
            .or_default()
            .push(credential);
    }
}

impl IdentityProvider for InMemoryIdentityProvider {
    fn resolve(&self, did: &str) -> Option<DidDocument> {
        self.documents.read().get(did).cloned()
    }

    fn credentials_for(&self, did: &str) -> Vec<VerifiableCredential> {
        self.credentials
            .read()
            .get(did)
            .cloned()
            .unwrap_or_default()
    }
}
