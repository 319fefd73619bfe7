//! RSA signature verification of the credential assertion.

use rsa::{Pkcs1v15Sign, RsaPublicKey};
use sha2::{Digest, Sha512};
use tracing::{debug, warn};

use crate::error::KeyStoreError;
use crate::keystore::KeyLookup;
use crate::payload::GROUP_DELIMITER;

/// Result of trying the candidate keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verification {
    Verified { key_id: u64 },
    /// No candidate key produced a valid signature.
    NoMatch,
}

/// Build the signed assertion: `group1 × group2`.
pub fn build_assertion(group1: &str, group2: &str) -> String {
    format!("{}{}{}", group1, GROUP_DELIMITER, group2)
}

/// Verify an RSASSA-PKCS1-v1_5 / SHA-512 signature with a single key.
pub fn verify_with_key(key: &RsaPublicKey, assertion: &[u8], signature: &[u8]) -> bool {
    let digest = Sha512::digest(assertion);
    key.verify(Pkcs1v15Sign::new::<Sha512>(), &digest, signature)
        .is_ok()
}

/// Try each candidate key in order until one verifies `signature` over
/// `assertion`.
///
/// Keys that are missing or malformed are skipped. An error is returned only
/// when no candidate could be tried at all.
pub fn verify_assertion(
    assertion: &[u8],
    signature: &[u8],
    candidates: &[u64],
    keys: &impl KeyLookup,
) -> Result<Verification, KeyStoreError> {
    if candidates.is_empty() {
        return Err(KeyStoreError::NoKeys);
    }

    let mut tried = 0usize;
    let mut last_error = None;

    for &key_id in candidates {
        let key = match keys.lookup(key_id) {
            Ok(Some(key)) => key,
            Ok(None) => {
                last_error = Some(KeyStoreError::KeyUnavailable(key_id));
                continue;
            }
            Err(e) => {
                warn!(key_id, error = %e, "Skipping unusable key");
                last_error = Some(e);
                continue;
            }
        };

        tried += 1;
        if verify_with_key(&key, assertion, signature) {
            debug!(key_id, "Signature verified");
            return Ok(Verification::Verified { key_id });
        }
    }

    if tried == 0 {
        return Err(last_error.unwrap_or(KeyStoreError::NoKeys));
    }

    debug!(tried, "No cached key verified the signature");
    Ok(Verification::NoMatch)
}
