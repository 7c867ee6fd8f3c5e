//! Signed session tokens.
//!
//! The token issued at login is an HMAC-SHA256 signature over
//! `session_id.user_id.timestamp`, encoded as
//! `session_id.user_id.timestamp.signature`. It is a lightweight integrity
//! check on the bearer credential, not a replacement for validating the
//! session row itself.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;

type HmacSha256 = Hmac<Sha256>;

/// Parsed, signature-verified token contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenClaims {
    pub session_id: String,
    pub user_id: String,
    pub issued_at: i64,
}

fn signature(secret: &str, session_id: &str, user_id: &str, issued_at: i64) -> Option<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(format!("{session_id}.{user_id}.{issued_at}").as_bytes());
    Some(URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes()))
}

/// Sign a session token. Returns `None` only if the secret is unusable as an
/// HMAC key, which cannot happen for SHA-256 (any key length is accepted).
#[must_use]
pub fn sign_session_token(
    secret: &str,
    session_id: &str,
    user_id: &str,
    issued_at: i64,
) -> Option<String> {
    let sig = signature(secret, session_id, user_id, issued_at)?;
    Some(format!("{session_id}.{user_id}.{issued_at}.{sig}"))
}

/// Verify a token's signature and parse its claims. Any malformed or
/// tampered token yields `None`.
///
/// Session ids are generated without dots, and the timestamp and signature
/// contain none, so the first and the last two dot-separated fields are
/// unambiguous; everything between belongs to the user id.
#[must_use]
pub fn verify_session_token(secret: &str, token: &str) -> Option<TokenClaims> {
    let (session_id, rest) = token.split_once('.')?;
    let (rest, sig) = rest.rsplit_once('.')?;
    let (user_id, issued_at) = rest.rsplit_once('.')?;
    let issued_at: i64 = issued_at.parse().ok()?;

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(format!("{session_id}.{user_id}.{issued_at}").as_bytes());
    let expected = URL_SAFE_NO_PAD.decode(sig).ok()?;
    mac.verify_slice(&expected).ok()?;

    Some(TokenClaims {
        session_id: session_id.to_string(),
        user_id: user_id.to_string(),
        issued_at,
    })
}
