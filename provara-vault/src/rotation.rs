//! Key rotation: revoke a compromised key and promote its replacement.
//!
//! A KEY_REVOCATION must be signed by a key other than the one it revokes;
//! self-revocation is refused as a security violation. Revoked keys stay in
//! `keys.json` so historical signatures keep verifying.

use rand::rngs::OsRng;
use serde_json::json;
use tracing::info;

use provara_core::{
    new_key_entry, EventType, KeyPair, KeyRegistry, Namespace, ProvaraError, Result,
};

use crate::layout::VaultLayout;
use crate::log::append_signed_event;
use crate::now_utc_iso;
use crate::state::finalize_mutation;

/// Outcome of a key rotation. The replacement private key exists only here.
#[derive(Debug)]
pub struct RotationResult {
    pub revocation_event_id: String,
    pub promotion_event_id: String,
    pub new_key_id: String,
    pub new_private_key_b64: String,
}

/// Rotate `revoked_key_id` out, signing with `signer` on `actor`'s chain.
pub fn rotate_key(
    layout: &VaultLayout,
    revoked_key_id: &str,
    signer: &KeyPair,
    actor: &str,
) -> Result<RotationResult> {
    if signer.key_id() == revoked_key_id {
        return Err(ProvaraError::SelfRevocation {
            context: revoked_key_id.to_string(),
        });
    }

    let mut registry = KeyRegistry::load(&layout.keys_file())?;
    let old_entry = registry
        .get(revoked_key_id)
        .ok_or_else(|| ProvaraError::UnknownKeyId {
            context: revoked_key_id.to_string(),
        })?
        .clone();
    // The signing authority itself must currently be active.
    registry.resolve(&signer.key_id())?;

    let replacement = KeyPair::generate(&mut OsRng);

    let revocation = append_signed_event(
        layout,
        EventType::KeyRevocation,
        Namespace::Canonical,
        actor,
        json!({
            "revoked_key_id": revoked_key_id,
            "reason": "rotation",
        }),
        signer,
    )?;

    let promotion = append_signed_event(
        layout,
        EventType::KeyPromotion,
        Namespace::Canonical,
        actor,
        json!({
            "new_key_id": replacement.key_id(),
            "new_public_key_b64": replacement.public_key_b64(),
            "algorithm": "Ed25519",
            "replaces_key_id": revoked_key_id,
        }),
        signer,
    )?;

    registry.revoke(revoked_key_id)?;
    registry.insert(new_key_entry(
        replacement.key_id(),
        replacement.public_key_b64(),
        old_entry.roles.clone(),
        old_entry.scopes.clone(),
        now_utc_iso(),
    ));
    registry.save(&layout.keys_file())?;

    finalize_mutation(layout, Some(signer))?;
    info!(
        revoked = %revoked_key_id,
        promoted = %replacement.key_id(),
        "key rotated"
    );

    Ok(RotationResult {
        revocation_event_id: revocation["event_id"]
            .as_str()
            .unwrap_or_default()
            .to_string(),
        promotion_event_id: promotion["event_id"]
            .as_str()
            .unwrap_or_default()
            .to_string(),
        new_key_id: replacement.key_id(),
        new_private_key_b64: replacement.seed_b64(),
    })
}
