//! Detached Ed25519 verification of downloaded packages.
//!
//! The signing key lives with the release pipeline; only the public half is
//! baked into the binary. Every failure path returns `false`; a package
//! that cannot be verified is a package that does not get installed.

use std::path::Path;

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use tracing::{error, info};

/// Base64 Ed25519 public key matching the release signing key.
pub const SERVER_UPDATE_PUBLIC_KEY: &str = "RuYl+DYGrXPNq68CTBMcx4uqPB507Lwi84FFd5hLu7s=";

const ED25519_PUBLIC_KEY_LEN: usize = 32;
const ED25519_SIGNATURE_LEN: usize = 64;

/// Verify the Ed25519 signature of a file's full contents.
///
/// Returns `false` on any base64 decode failure, length mismatch, file read
/// error, or signature mismatch.
#[must_use]
pub fn verify_ed25519(
    file_path: &Path,
    signature_base64: &str,
    public_key_base64: &str,
) -> bool {
    let public_key_bytes = match BASE64.decode(public_key_base64) {
        Ok(bytes) => bytes,
        Err(e) => {
            error!(error = %e, "failed to decode public key from base64");
            return false;
        }
    };
    let Ok(public_key_array) = <[u8; ED25519_PUBLIC_KEY_LEN]>::try_from(public_key_bytes.as_slice())
    else {
        error!(
            len = public_key_bytes.len(),
            expected = ED25519_PUBLIC_KEY_LEN,
            "invalid public key length"
        );
        return false;
    };
    let key = match VerifyingKey::from_bytes(&public_key_array) {
        Ok(key) => key,
        Err(e) => {
            error!(error = %e, "public key is not a valid Ed25519 point");
            return false;
        }
    };

    let signature_bytes = match BASE64.decode(signature_base64) {
        Ok(bytes) => bytes,
        Err(e) => {
            error!(error = %e, "failed to decode signature from base64");
            return false;
        }
    };
    let Ok(signature_array) = <[u8; ED25519_SIGNATURE_LEN]>::try_from(signature_bytes.as_slice())
    else {
        error!(
            len = signature_bytes.len(),
            expected = ED25519_SIGNATURE_LEN,
            "invalid signature length"
        );
        return false;
    };
    let signature = Signature::from_bytes(&signature_array);

    let contents = match std::fs::read(file_path) {
        Ok(bytes) => bytes,
        Err(e) => {
            error!(path = %file_path.display(), error = %e, "failed to read file for signature verification");
            return false;
        }
    };

    match key.verify(&contents, &signature) {
        Ok(()) => {
            info!(path = %file_path.display(), "Ed25519 signature verified");
            true
        }
        Err(_) => {
            error!(path = %file_path.display(), "Ed25519 signature verification failed");
            false
        }
    }
}
