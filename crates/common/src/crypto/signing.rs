use std::collections::{BTreeMap, BTreeSet};

use base64::Engine;

use super::SecretKey;
use crate::tuf::{canonical_json, RoleKeys, RoleMeta, Signature, Signed, TufError, TufKey};

pub const SIGNATURE_METHOD: &str = "ed25519";

/// Sign a role body with every key in `keys`
pub fn sign_metadata<T: RoleMeta>(body: T, keys: &[&SecretKey]) -> Result<Signed<T>, TufError> {
    let bytes = canonical_json(&body)?;
    let signatures = keys
        .iter()
        .map(|key| Signature {
            keyid: key.public().key_id(),
            method: SIGNATURE_METHOD.to_string(),
            sig: base64::engine::general_purpose::STANDARD.encode(key.sign(&bytes).to_bytes()),
        })
        .collect();

    Ok(Signed {
        signed: body,
        signatures,
    })
}

/// Check that `signed` carries at least `role.threshold` valid signatures
///  from distinct keys listed for the role.
///
/// `signed` is the raw body as received; it is canonicalised before
///  verification.
pub fn verify_role_signatures(
    signed: &serde_json::Value,
    signatures: &[Signature],
    keys: &BTreeMap<String, TufKey>,
    role: &RoleKeys,
) -> Result<(), TufError> {
    if role.threshold == 0 {
        return Err(TufError::Signature("role threshold must be at least 1".into()));
    }

    let bytes = canonical_json(signed)?;
    let mut valid = BTreeSet::new();

    for signature in signatures {
        if !role.keyids.contains(&signature.keyid) || valid.contains(&signature.keyid) {
            continue;
        }
        let Some(key) = keys.get(&signature.keyid) else {
            continue;
        };
        let Ok(public) = key.public_key() else {
            continue;
        };
        let Ok(raw) = base64::engine::general_purpose::STANDARD.decode(&signature.sig) else {
            continue;
        };
        let Ok(sig) = ed25519_dalek::Signature::from_slice(&raw) else {
            continue;
        };
        if public.verify(&bytes, &sig).is_ok() {
            valid.insert(signature.keyid.clone());
        }
    }

    if valid.len() < role.threshold as usize {
        return Err(TufError::Signature(format!(
            "expected {} valid signature(s), found {}",
            role.threshold,
            valid.len()
        )));
    }
    Ok(())
}
