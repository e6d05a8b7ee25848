//! P-256 key material handling.
//!
//! Keys arrive as bare base64url strings: the public key is the 65 byte
//! uncompressed SEC1 point (`0x04 || x || y`) and the private key is the raw
//! 32 byte scalar. OpenSSL wants structured keys, so the raw bytes are first
//! split into JWK style `{crv, x, y[, d]}` values and then rebuilt from their
//! affine coordinates.

use std::fmt;

use autonotify_common::util::{b64_decode_lenient, b64_decode_url, b64_encode_url};
use openssl::bn::{BigNum, BigNumContext};
use openssl::ec::{EcGroup, EcKey, EcKeyRef, PointConversionForm};
use openssl::nid::Nid;
use openssl::pkey::{HasPublic, PKey, PKeyRef, Private, Public};
use serde::{Deserialize, Serialize};

use crate::error::{WebPushError, WebPushResult};

/// Length of an uncompressed P-256 point
pub const PUBLIC_KEY_LEN: usize = 65;
/// Length of a raw P-256 private scalar
pub const PRIVATE_KEY_LEN: usize = 32;
const COORDINATE_LEN: usize = 32;
const UNCOMPRESSED_TAG: u8 = 0x04;

const JWK_KTY: &str = "EC";
const JWK_CRV: &str = "P-256";

/// The curve every Web Push key lives on
pub fn p256_group() -> WebPushResult<EcGroup> {
    Ok(EcGroup::from_curve_name(Nid::X9_62_PRIME256V1)?)
}

/// Structured form of a P-256 public key
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct EcPublicJwk {
    pub kty: String,
    pub crv: String,
    pub x: String,
    pub y: String,
}

/// Structured form of a P-256 private key
#[derive(Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct EcPrivateJwk {
    pub kty: String,
    pub crv: String,
    pub x: String,
    pub y: String,
    pub d: String,
}

// Never print the scalar.
impl fmt::Debug for EcPrivateJwk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EcPrivateJwk")
            .field("kty", &self.kty)
            .field("crv", &self.crv)
            .field("x", &self.x)
            .field("y", &self.y)
            .finish_non_exhaustive()
    }
}

fn check_public_bytes(public: &[u8]) -> WebPushResult<()> {
    if public.len() != PUBLIC_KEY_LEN {
        return Err(WebPushError::KeyFormat(format!(
            "public key must be {} bytes, got {}",
            PUBLIC_KEY_LEN,
            public.len()
        )));
    }
    if public[0] != UNCOMPRESSED_TAG {
        return Err(WebPushError::KeyFormat(
            "public key is not an uncompressed point".to_owned(),
        ));
    }
    Ok(())
}

fn decode_coordinate(name: &str, value: &str) -> WebPushResult<Vec<u8>> {
    let bytes = b64_decode_url(value)
        .map_err(|e| WebPushError::KeyFormat(format!("JWK member {name}: {e}")))?;
    if bytes.len() != COORDINATE_LEN {
        return Err(WebPushError::KeyFormat(format!(
            "JWK member {name} must be {COORDINATE_LEN} bytes, got {}",
            bytes.len()
        )));
    }
    Ok(bytes)
}

impl EcPublicJwk {
    /// Split an uncompressed point into its coordinates
    pub fn from_raw(public: &[u8]) -> WebPushResult<Self> {
        check_public_bytes(public)?;
        Ok(Self {
            kty: JWK_KTY.to_owned(),
            crv: JWK_CRV.to_owned(),
            x: b64_encode_url(&public[1..1 + COORDINATE_LEN]),
            y: b64_encode_url(&public[1 + COORDINATE_LEN..]),
        })
    }

    fn ec_key(&self) -> WebPushResult<EcKey<Public>> {
        if self.kty != JWK_KTY || self.crv != JWK_CRV {
            return Err(WebPushError::KeyFormat(format!(
                "unsupported key type {}/{}",
                self.kty, self.crv
            )));
        }
        let group = p256_group()?;
        let x = BigNum::from_slice(&decode_coordinate("x", &self.x)?)?;
        let y = BigNum::from_slice(&decode_coordinate("y", &self.y)?)?;
        // OpenSSL verifies that the point is on the curve here.
        EcKey::from_public_key_affine_coordinates(&group, &x, &y)
            .map_err(|_| WebPushError::KeyFormat("point is not on P-256".to_owned()))
    }

    /// Build the OpenSSL key used for ECDH and signature checks
    pub fn to_pkey(&self) -> WebPushResult<PKey<Public>> {
        Ok(PKey::from_ec_key(self.ec_key()?)?)
    }
}

impl EcPrivateJwk {
    /// Combine an uncompressed public point and its raw private scalar
    pub fn from_raw(public: &[u8], private: &[u8]) -> WebPushResult<Self> {
        if private.len() != PRIVATE_KEY_LEN {
            return Err(WebPushError::KeyFormat(format!(
                "private key must be {} bytes, got {}",
                PRIVATE_KEY_LEN,
                private.len()
            )));
        }
        let public = EcPublicJwk::from_raw(public)?;
        Ok(Self {
            kty: public.kty,
            crv: public.crv,
            x: public.x,
            y: public.y,
            d: b64_encode_url(private),
        })
    }

    /// The public half of this key
    pub fn public(&self) -> EcPublicJwk {
        EcPublicJwk {
            kty: self.kty.clone(),
            crv: self.crv.clone(),
            x: self.x.clone(),
            y: self.y.clone(),
        }
    }

    /// Build the OpenSSL signing key, checking that `d` matches `(x, y)`
    pub fn to_pkey(&self) -> WebPushResult<PKey<Private>> {
        let group = p256_group()?;
        let public = self.public().ec_key()?;
        let d = BigNum::from_slice(&decode_coordinate("d", &self.d)?)?;
        let key = EcKey::from_private_components(&group, &d, public.public_key())
            .map_err(|_| WebPushError::KeyFormat("unusable private scalar".to_owned()))?;
        key.check_key().map_err(|_| {
            WebPushError::KeyFormat("private key does not match the public key".to_owned())
        })?;
        Ok(PKey::from_ec_key(key)?)
    }
}

/// Serialize the public point of an EC key in uncompressed form
pub fn encode_public_key<T: HasPublic>(key: &EcKeyRef<T>) -> WebPushResult<[u8; PUBLIC_KEY_LEN]> {
    let mut ctx = BigNumContext::new()?;
    let bytes = key
        .public_key()
        .to_bytes(key.group(), PointConversionForm::UNCOMPRESSED, &mut ctx)?;
    bytes
        .as_slice()
        .try_into()
        .map_err(|_| WebPushError::KeyFormat("unexpected public key length".to_owned()))
}

/// Parse an uncompressed point received from a browser.
pub fn public_key_from_raw(public: &[u8]) -> WebPushResult<PKey<Public>> {
    EcPublicJwk::from_raw(public)?.to_pkey()
}

/// The server's VAPID identity.
///
/// Loaded once at startup and shared read only by every send.
pub struct ServerIdentity {
    public_key: [u8; PUBLIC_KEY_LEN],
    public_key_b64: String,
    signing_key: PKey<Private>,
}

impl fmt::Debug for ServerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerIdentity")
            .field("public_key", &self.public_key_b64)
            .finish_non_exhaustive()
    }
}

impl ServerIdentity {
    /// Load the identity from the two configured values. Either being absent
    /// is a configuration error.
    pub fn from_config(public_key: Option<&str>, private_key: Option<&str>) -> WebPushResult<Self> {
        let public_key = public_key
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| WebPushError::Configuration("VAPID public key is not set".to_owned()))?;
        let private_key = private_key
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| {
                WebPushError::Configuration("VAPID private key is not set".to_owned())
            })?;
        Self::from_base64url(public_key, private_key)
    }

    /// Load the identity from base64url encoded raw keys
    pub fn from_base64url(public_key: &str, private_key: &str) -> WebPushResult<Self> {
        let public = b64_decode_lenient(public_key)
            .map_err(|e| WebPushError::KeyFormat(format!("VAPID public key: {e}")))?;
        let private = b64_decode_lenient(private_key)
            .map_err(|e| WebPushError::KeyFormat(format!("VAPID private key: {e}")))?;
        let signing_key = EcPrivateJwk::from_raw(&public, &private)?.to_pkey()?;
        let public_key: [u8; PUBLIC_KEY_LEN] = public
            .as_slice()
            .try_into()
            .map_err(|_| WebPushError::KeyFormat("unexpected public key length".to_owned()))?;
        Ok(Self {
            public_key_b64: b64_encode_url(&public_key),
            public_key,
            signing_key,
        })
    }

    /// Create a fresh identity
    pub fn generate() -> WebPushResult<Self> {
        let group = p256_group()?;
        let key = EcKey::generate(&group)?;
        let public_key = encode_public_key(&key)?;
        Ok(Self {
            public_key_b64: b64_encode_url(&public_key),
            public_key,
            signing_key: PKey::from_ec_key(key)?,
        })
    }

    /// Uncompressed public key bytes
    pub fn public_key(&self) -> &[u8; PUBLIC_KEY_LEN] {
        &self.public_key
    }

    /// base64url form of the public key, as sent in the `k=` parameter and
    /// handed to browsers as the `applicationServerKey`
    pub fn public_key_base64url(&self) -> &str {
        &self.public_key_b64
    }

    /// base64url form of the raw private scalar
    pub fn private_key_base64url(&self) -> WebPushResult<String> {
        let scalar = self
            .signing_key
            .ec_key()?
            .private_key()
            .to_vec_padded(PRIVATE_KEY_LEN as i32)?;
        Ok(b64_encode_url(&scalar))
    }

    pub(crate) fn signing_key(&self) -> &PKeyRef<Private> {
        &self.signing_key
    }

    /// The public key as an OpenSSL key, for verification
    pub fn verifying_key(&self) -> WebPushResult<PKey<Public>> {
        public_key_from_raw(&self.public_key)
    }
}
