//! VAPID (RFC 8292) bearer tokens.
//!
//! Each send gets a compact ES256 JWT scoped to the push service's origin.
use autonotify_common::util::{b64_encode_url, sec_since_epoch};
use openssl::hash::MessageDigest;
use openssl::sign::Signer;
use serde::{Deserialize, Serialize};
use url::{Origin, Url};

use crate::error::{WebPushError, WebPushResult};
use crate::keys::ServerIdentity;
use crate::signature::der_to_raw;

/// How long a token stays valid: 12 hours
pub const TOKEN_LIFETIME_SECS: u64 = 12 * 60 * 60;

/// JOSE header of every token
#[derive(Debug, Serialize, Deserialize)]
pub struct VapidHeader {
    pub typ: String,
    pub alg: String,
}

impl Default for VapidHeader {
    fn default() -> Self {
        Self {
            typ: "JWT".to_owned(),
            alg: "ES256".to_owned(),
        }
    }
}

/// Claims carried in the token
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct VapidClaims {
    pub aud: String,
    pub exp: u64,
    pub iat: u64,
    pub sub: String,
}

impl VapidClaims {
    pub fn new(audience: &str, subject: &str, issued_at: u64) -> Self {
        Self {
            aud: audience.to_owned(),
            exp: issued_at + TOKEN_LIFETIME_SECS,
            iat: issued_at,
            sub: subject.to_owned(),
        }
    }
}

/// The audience for a push endpoint: its origin, i.e. scheme, host and any
/// non-default port.
pub fn audience_for(endpoint: &Url) -> WebPushResult<String> {
    if !matches!(endpoint.scheme(), "https" | "http") {
        return Err(WebPushError::InvalidEndpoint(format!(
            "unsupported scheme {}",
            endpoint.scheme()
        )));
    }
    match endpoint.origin() {
        origin @ Origin::Tuple(..) => Ok(origin.ascii_serialization()),
        Origin::Opaque(_) => Err(WebPushError::InvalidEndpoint(
            "endpoint has no origin".to_owned(),
        )),
    }
}

/// Build a token for `audience` issued now
pub fn build_token(audience: &str, subject: &str, identity: &ServerIdentity) -> WebPushResult<String> {
    build_token_at(audience, subject, identity, sec_since_epoch())
}

/// Build a token issued at `issued_at` (seconds since the epoch)
pub fn build_token_at(
    audience: &str,
    subject: &str,
    identity: &ServerIdentity,
    issued_at: u64,
) -> WebPushResult<String> {
    let header = serde_json::to_vec(&VapidHeader::default())?;
    let claims = serde_json::to_vec(&VapidClaims::new(audience, subject, issued_at))?;
    let signing_input = format!("{}.{}", b64_encode_url(&header), b64_encode_url(&claims));

    let mut signer = Signer::new(MessageDigest::sha256(), identity.signing_key())?;
    signer.update(signing_input.as_bytes())?;
    let signature = der_to_raw(&signer.sign_to_vec()?)?;

    Ok(format!("{}.{}", signing_input, b64_encode_url(&signature)))
}

/// The `Authorization` header value for a token
pub fn authorization(token: &str, identity: &ServerIdentity) -> String {
    format!("vapid t={}, k={}", token, identity.public_key_base64url())
}
