//! Ed25519 keypairs, key-id derivation, and event/manifest signatures.
//!
//! Signatures are detached Ed25519 over canonical JSON bytes. Private keys
//! never enter a vault; they travel as base64 32-byte seeds held by the
//! operator.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use ed25519_dalek::{Signature, SigningKey, VerifyingKey};
use rand_core::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use signature::{Signer, Verifier};

use crate::error::{ProvaraError, Result};
use crate::event::SPEC_VERSION;
use crate::hash::sha256_bytes;

/// An Ed25519 keypair with its derived key id.
pub struct KeyPair {
    signing_key: SigningKey,
    verifying_key: VerifyingKey,
}

impl KeyPair {
    /// Generate a new random keypair.
    pub fn generate<R: CryptoRng + RngCore>(rng: &mut R) -> Self {
        let signing_key = SigningKey::generate(rng);
        let verifying_key = VerifyingKey::from(&signing_key);
        KeyPair {
            signing_key,
            verifying_key,
        }
    }

    /// Rebuild a keypair from a raw 32-byte seed.
    pub fn from_bytes(seed: &[u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(seed);
        let verifying_key = VerifyingKey::from(&signing_key);
        KeyPair {
            signing_key,
            verifying_key,
        }
    }

    /// Rebuild a keypair from a base64-encoded seed.
    pub fn from_seed_b64(seed_b64: &str) -> Result<Self> {
        let raw = BASE64
            .decode(seed_b64)
            .map_err(|e| ProvaraError::Encoding {
                context: format!("private key base64: {e}"),
            })?;
        let seed: [u8; 32] = raw.as_slice().try_into().map_err(|_| ProvaraError::Crypto {
            context: format!("private key must be 32 bytes, got {}", raw.len()),
        })?;
        Ok(Self::from_bytes(&seed))
    }

    /// Raw public key bytes.
    pub fn public_key(&self) -> [u8; 32] {
        self.verifying_key.to_bytes()
    }

    /// Base64-encoded raw public key, as stored in `keys.json`.
    pub fn public_key_b64(&self) -> String {
        BASE64.encode(self.public_key())
    }

    /// Base64-encoded seed. Never write this into a vault.
    pub fn seed_b64(&self) -> String {
        BASE64.encode(self.signing_key.to_bytes())
    }

    /// Derived key id (`bp1_` + first 16 hex of SHA-256 of the public key).
    pub fn key_id(&self) -> String {
        derive_key_id(&self.public_key())
    }

    /// Verification half of the pair.
    pub fn verifying_key(&self) -> &VerifyingKey {
        &self.verifying_key
    }

    /// Sign a message and return the base64 signature.
    pub fn sign_b64(&self, message: &[u8]) -> String {
        let sig: Signature = self.signing_key.sign(message);
        BASE64.encode(sig.to_bytes())
    }
}

/// Derive a key id from raw public key bytes.
pub fn derive_key_id(public_key_bytes: &[u8; 32]) -> String {
    let hash = sha256_bytes(public_key_bytes);
    format!("bp1_{}", hex::encode(&hash[0..8]))
}

/// Parse a base64-encoded raw Ed25519 public key.
pub fn verifying_key_from_b64(public_key_b64: &str) -> Result<VerifyingKey> {
    let raw = BASE64
        .decode(public_key_b64)
        .map_err(|e| ProvaraError::Encoding {
            context: format!("public key base64: {e}"),
        })?;
    let bytes: [u8; 32] = raw.as_slice().try_into().map_err(|_| ProvaraError::Crypto {
        context: format!("public key must be 32 bytes, got {}", raw.len()),
    })?;
    VerifyingKey::from_bytes(&bytes).map_err(|e| ProvaraError::Crypto {
        context: format!("public key rejected: {e}"),
    })
}

fn decode_signature(sig_b64: &str) -> Option<Signature> {
    let bytes = BASE64.decode(sig_b64).ok()?;
    let arr: [u8; 64] = bytes.as_slice().try_into().ok()?;
    Some(Signature::from_bytes(&arr))
}

/// Verify an event's detached signature.
///
/// The signature covers the canonical bytes of the envelope without `sig`.
/// Every malformed input (missing signature, bad base64, wrong length,
/// non-canonical content) verifies as `false` rather than erroring, so a
/// batch verifier can keep walking the log.
pub fn verify_event_signature(event: &Value, public_key: &VerifyingKey) -> bool {
    let Some(map) = event.as_object() else {
        return false;
    };
    let Some(sig_b64) = map.get("sig").and_then(Value::as_str) else {
        return false;
    };
    let Some(signature) = decode_signature(sig_b64) else {
        return false;
    };

    let mut unsigned = map.clone();
    unsigned.remove("sig");
    let Ok(payload_bytes) = jcs_rs::canonicalize(&Value::Object(unsigned)) else {
        return false;
    };

    public_key.verify(&payload_bytes, &signature).is_ok()
}

/// The signed record persisted as `manifest.sig`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestSignature {
    pub merkle_root: String,
    pub key_id: String,
    pub spec_version: String,
    pub signed_at_utc: String,
    pub sig: String,
}

/// Sign a Merkle root, committing to the key id and signing time.
pub fn sign_manifest(
    merkle_root: &str,
    keypair: &KeyPair,
    signed_at_utc: String,
) -> Result<ManifestSignature> {
    let signable = serde_json::json!({
        "merkle_root": merkle_root,
        "key_id": keypair.key_id(),
        "spec_version": SPEC_VERSION,
        "signed_at_utc": signed_at_utc,
    });
    let bytes = jcs_rs::canonicalize(&signable)?;
    Ok(ManifestSignature {
        merkle_root: merkle_root.to_string(),
        key_id: keypair.key_id(),
        spec_version: SPEC_VERSION.to_string(),
        signed_at_utc,
        sig: keypair.sign_b64(&bytes),
    })
}

/// Verify a `manifest.sig` record, optionally asserting the root it names.
pub fn verify_manifest_signature(
    record: &Value,
    public_key: &VerifyingKey,
    expected_merkle_root: Option<&str>,
) -> bool {
    let Some(map) = record.as_object() else {
        return false;
    };
    let Some(sig_b64) = map.get("sig").and_then(Value::as_str) else {
        return false;
    };
    let Some(signature) = decode_signature(sig_b64) else {
        return false;
    };

    let mut unsigned = map.clone();
    unsigned.remove("sig");
    let Ok(bytes) = jcs_rs::canonicalize(&Value::Object(unsigned)) else {
        return false;
    };
    if public_key.verify(&bytes, &signature).is_err() {
        return false;
    }

    match expected_merkle_root {
        Some(expected) => map.get("merkle_root").and_then(Value::as_str) == Some(expected),
        None => true,
    }
}
