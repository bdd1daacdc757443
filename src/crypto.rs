use base64::{engine::general_purpose, Engine};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};

/// Signature and hashing primitives, treated as a black box by the rest of
/// the crate.
pub trait CryptoProvider: Send + Sync {
    /// Signs a payload, returning the signature in base64.
    fn sign(&self, payload: &[u8], key: &SigningKey) -> String;

    /// Verifies a base64 signature over a payload.
    fn verify(&self, payload: &[u8], signature_b64: &str, key: &VerifyingKey) -> bool;

    /// Hex fingerprint of a DID string.
    fn fingerprint(&self, did: &str) -> String;

    /// Hex commitment digest over ordered byte segments.
    fn commitment_hash(&self, parts: &[&[u8]]) -> String;
}

#[derive(Debug, Default, Clone)]
pub struct Ed25519Provider;

impl Ed25519Provider {
    pub fn generate_keypair() -> (SigningKey, VerifyingKey) {
        let signing = SigningKey::generate(&mut OsRng);
        let verifying = signing.verifying_key();
        (signing, verifying)
    }
}

impl CryptoProvider for Ed25519Provider {
    fn sign(&self, payload: &[u8], key: &SigningKey) -> String {
        let signature = key.sign(payload);
        general_purpose::STANDARD.encode(signature.to_bytes())
    }

    fn verify(&self, payload: &[u8], signature_b64: &str, key: &VerifyingKey) -> bool {
        let Ok(bytes) = general_purpose::STANDARD.decode(signature_b64) else {
            return false;
        };
        let Ok(bytes) = <[u8; 64]>::try_from(bytes.as_slice()) else {
            return false;
        };
        let signature = Signature::from_bytes(&bytes);
        key.verify(payload, &signature).is_ok()
    }

    fn fingerprint(&self, did: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(did.as_bytes());
        hex::encode(hasher.finalize())
    }

    fn commitment_hash(&self, parts: &[&[u8]]) -> String {
        let mut hasher = Sha256::new();
        for part in parts {
            hasher.update(part);
        }
        hex::encode(hasher.finalize())
    }
}
