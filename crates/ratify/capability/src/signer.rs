//! Local signer/hasher implementations: Ed25519 signatures over BLAKE3
//! digests, and a deterministic hasher double for chain tests.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;

use ratify_types::Digest;

use crate::{CapabilityError, SignerHasher};

/// In-process Ed25519 signer with BLAKE3 hashing.
///
/// Keys are held in memory and addressed by `key_id`. Suitable as the default
/// capability when no external signer is wired in.
pub struct LocalEd25519 {
    keys: Mutex<HashMap<String, SigningKey>>,
}

impl LocalEd25519 {
    pub fn new() -> Self {
        Self {
            keys: Mutex::new(HashMap::new()),
        }
    }

    /// Generate a fresh keypair under `key_id`, returning the public half.
    pub fn generate_key(&self, key_id: impl Into<String>) -> VerifyingKey {
        let signing_key = SigningKey::generate(&mut OsRng);
        let verifying_key = signing_key.verifying_key();
        self.keys.lock().unwrap().insert(key_id.into(), signing_key);
        verifying_key
    }

    fn with_key<T>(
        &self,
        key_id: &str,
        f: impl FnOnce(&SigningKey) -> T,
    ) -> Result<T, CapabilityError> {
        let keys = self.keys.lock().unwrap();
        keys.get(key_id)
            .map(f)
            .ok_or_else(|| CapabilityError::UnknownKey(key_id.to_string()))
    }
}

impl Default for LocalEd25519 {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SignerHasher for LocalEd25519 {
    fn hash(&self, bytes: &[u8]) -> Digest {
        Digest::from_bytes(*blake3::hash(bytes).as_bytes())
    }

    async fn sign(&self, payload: &[u8], key_id: &str) -> Result<Vec<u8>, CapabilityError> {
        self.with_key(key_id, |key| key.sign(payload).to_bytes().to_vec())
    }

    async fn verify(
        &self,
        payload: &[u8],
        signature: &[u8],
        key_id: &str,
    ) -> Result<bool, CapabilityError> {
        let signature = Signature::from_slice(signature)
            .map_err(|e| CapabilityError::MalformedSignature(e.to_string()))?;
        let verifying_key = self.with_key(key_id, |key| key.verifying_key())?;
        Ok(verifying_key.verify(payload, &signature).is_ok())
    }
}

/// Deterministic hasher double for chain and replay tests.
///
/// Signs nothing real: `sign` returns a tagged copy of the payload digest and
/// `verify` accepts exactly those signatures. Hashing remains BLAKE3 so chain
/// semantics match production.
pub struct StaticHasher;

impl StaticHasher {
    fn stamp(payload: &[u8], key_id: &str) -> Vec<u8> {
        let mut bytes = blake3::hash(payload).as_bytes().to_vec();
        bytes.extend_from_slice(key_id.as_bytes());
        bytes
    }
}

#[async_trait]
impl SignerHasher for StaticHasher {
    fn hash(&self, bytes: &[u8]) -> Digest {
        Digest::from_bytes(*blake3::hash(bytes).as_bytes())
    }

    async fn sign(&self, payload: &[u8], key_id: &str) -> Result<Vec<u8>, CapabilityError> {
        Ok(Self::stamp(payload, key_id))
    }

    async fn verify(
        &self,
        payload: &[u8],
        signature: &[u8],
        key_id: &str,
    ) -> Result<bool, CapabilityError> {
        Ok(signature == Self::stamp(payload, key_id).as_slice())
    }
}
