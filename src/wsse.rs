//! WS-Security UsernameToken digest validation.
//!
//! Implements the OASIS UsernameToken profile password digest:
//! `digest = base64(sha1(base64decode(nonce) || created || password))`.
//!
//! Validation is an optional policy: the device façade only calls in here
//! when credentials are configured.

use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine as _;
use sha1::{Digest, Sha1};
use subtle::ConstantTimeEq;

use crate::config::AuthConfig;
use crate::errors::{Result, ServerError};
use crate::soap;

pub fn compute_digest(nonce_b64: &str, created: &str, password: &str) -> Result<String> {
    let nonce_bytes = B64
        .decode(nonce_b64)
        .map_err(|_| ServerError::auth("Invalid nonce encoding"))?;

    let mut hasher = Sha1::new();
    hasher.update(&nonce_bytes);
    hasher.update(created.as_bytes());
    hasher.update(password.as_bytes());
    Ok(B64.encode(hasher.finalize()))
}

/// Validate the UsernameToken carried in a SOAP request body against the
/// configured credentials. The error message never contains the expected
/// digest value.
pub fn authenticate(body: &str, credentials: &AuthConfig) -> Result<()> {
    if !soap::has_element(body, "Security") {
        return Err(ServerError::auth("Missing security header"));
    }

    let username = soap::element_text(body, "Username")
        .ok_or_else(|| ServerError::auth("Missing username"))?;
    let supplied_digest = soap::element_text(body, "Password")
        .ok_or_else(|| ServerError::auth("Missing password digest"))?;
    let nonce = soap::element_text(body, "Nonce")
        .ok_or_else(|| ServerError::auth("Missing nonce"))?;
    let created = soap::element_text(body, "Created")
        .ok_or_else(|| ServerError::auth("Missing created timestamp"))?;

    if username != credentials.username {
        return Err(ServerError::auth("Unknown user"));
    }

    let expected = compute_digest(&nonce, &created, &credentials.password)?;
    let matches: bool = expected
        .as_bytes()
        .ct_eq(supplied_digest.as_bytes())
        .into();
    if !matches {
        return Err(ServerError::auth("Digest mismatch"));
    }
    Ok(())
}
