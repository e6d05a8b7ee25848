//! Message encryption for Web Push (RFC 8291) using the `aes128gcm` content
//! coding (RFC 8188).
//!
//! Messages always fit a single record, so the body is the header followed
//! by one sealed record ending in the `0x02` last record delimiter.

use openssl::derive::Deriver;
use openssl::ec::{EcKey, EcKeyRef};
use openssl::hash::MessageDigest;
use openssl::pkey::{PKey, PKeyRef, Private};
use openssl::rand::rand_bytes;
use openssl::sign::Signer;
use openssl::symm::{decrypt_aead, encrypt_aead, Cipher};

use crate::error::{WebPushError, WebPushResult};
use crate::keys::{encode_public_key, p256_group, public_key_from_raw, PUBLIC_KEY_LEN};

/// Record size advertised in the header
pub const RECORD_SIZE: u32 = 4096;
pub const SALT_LEN: usize = 16;
pub const AUTH_SECRET_LEN: usize = 16;
pub const TAG_LEN: usize = 16;
/// `salt || rs || idlen || keyid`
pub const HEADER_LEN: usize = SALT_LEN + 4 + 1 + PUBLIC_KEY_LEN;
/// Largest plaintext that fits one record with its tag and delimiter
pub const MAX_PLAINTEXT_LEN: usize = RECORD_SIZE as usize - TAG_LEN - 1;

const KEY_INFO_PREFIX: &[u8] = b"WebPush: info\0";
const CEK_INFO: &[u8] = b"Content-Encoding: aes128gcm\0";
const NONCE_INFO: &[u8] = b"Content-Encoding: nonce\0";
const CEK_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const IKM_LEN: usize = 32;
const LAST_RECORD: u8 = 0x02;

fn hmac_sha256(key: &[u8], parts: &[&[u8]]) -> WebPushResult<Vec<u8>> {
    let key = PKey::hmac(key)?;
    let mut signer = Signer::new(MessageDigest::sha256(), &key)?;
    for part in parts {
        signer.update(part)?;
    }
    Ok(signer.sign_to_vec()?)
}

/// HKDF-SHA256 (RFC 5869). Every output here is at most one hash long, so a
/// single expand block is all that is ever needed.
fn hkdf(salt: &[u8], ikm: &[u8], info: &[u8], len: usize) -> WebPushResult<Vec<u8>> {
    debug_assert!(len <= 32);
    let prk = hmac_sha256(salt, &[ikm])?;
    let mut okm = hmac_sha256(&prk, &[info, &[0x01]])?;
    okm.truncate(len);
    Ok(okm)
}

/// Content encryption key and nonce for one message
struct RecordKeys {
    cek: Vec<u8>,
    nonce: Vec<u8>,
}

impl RecordKeys {
    fn derive(
        ecdh_secret: &[u8],
        auth_secret: &[u8],
        salt: &[u8],
        ua_public: &[u8],
        as_public: &[u8],
    ) -> WebPushResult<Self> {
        let key_info = [KEY_INFO_PREFIX, ua_public, as_public].concat();
        let ikm = hkdf(auth_secret, ecdh_secret, &key_info, IKM_LEN)?;
        Ok(Self {
            cek: hkdf(salt, &ikm, CEK_INFO, CEK_LEN)?,
            nonce: hkdf(salt, &ikm, NONCE_INFO, NONCE_LEN)?,
        })
    }
}

fn ecdh(private: &PKeyRef<Private>, peer_public: &[u8]) -> WebPushResult<Vec<u8>> {
    let peer = public_key_from_raw(peer_public)?;
    let mut deriver = Deriver::new(private)?;
    deriver.set_peer(&peer)?;
    Ok(deriver.derive_to_vec()?)
}

/// Encrypt `plaintext` for a subscriber, using a fresh ephemeral key and salt.
pub fn encrypt(
    plaintext: &[u8],
    ua_public: &[u8; PUBLIC_KEY_LEN],
    auth_secret: &[u8; AUTH_SECRET_LEN],
) -> WebPushResult<Vec<u8>> {
    let group = p256_group()?;
    let ephemeral = EcKey::generate(&group)?;
    let mut salt = [0u8; SALT_LEN];
    rand_bytes(&mut salt)?;
    encrypt_with(plaintext, ua_public, auth_secret, &ephemeral, &salt)
}

pub(crate) fn encrypt_with(
    plaintext: &[u8],
    ua_public: &[u8; PUBLIC_KEY_LEN],
    auth_secret: &[u8; AUTH_SECRET_LEN],
    ephemeral: &EcKeyRef<Private>,
    salt: &[u8; SALT_LEN],
) -> WebPushResult<Vec<u8>> {
    if plaintext.len() > MAX_PLAINTEXT_LEN {
        return Err(WebPushError::PayloadTooLarge(
            plaintext.len() - MAX_PLAINTEXT_LEN,
        ));
    }

    let as_public = encode_public_key(ephemeral)?;
    let as_private = PKey::from_ec_key(ephemeral.to_owned())?;
    let secret = ecdh(&as_private, ua_public)?;
    let keys = RecordKeys::derive(&secret, auth_secret, salt, ua_public, &as_public)?;

    let mut padded = Vec::with_capacity(plaintext.len() + 1);
    padded.extend_from_slice(plaintext);
    padded.push(LAST_RECORD);

    let mut tag = [0u8; TAG_LEN];
    let ciphertext = encrypt_aead(
        Cipher::aes_128_gcm(),
        &keys.cek,
        Some(&keys.nonce),
        &[],
        &padded,
        &mut tag,
    )?;

    let mut body = Vec::with_capacity(HEADER_LEN + ciphertext.len() + TAG_LEN);
    body.extend_from_slice(salt);
    body.extend_from_slice(&RECORD_SIZE.to_be_bytes());
    body.push(PUBLIC_KEY_LEN as u8);
    body.extend_from_slice(&as_public);
    body.extend_from_slice(&ciphertext);
    body.extend_from_slice(&tag);
    Ok(body)
}

/// Open the record, returning the plaintext with its padding and delimiter.
fn open(
    body: &[u8],
    ua_private: &PKeyRef<Private>,
    auth_secret: &[u8; AUTH_SECRET_LEN],
) -> WebPushResult<Vec<u8>> {
    if body.len() < HEADER_LEN + TAG_LEN + 1 {
        return Err(WebPushError::InvalidRecord("body is too short".to_owned()));
    }
    let (salt, rest) = body.split_at(SALT_LEN);
    let (rs, rest) = rest.split_at(4);
    let rs = u32::from_be_bytes([rs[0], rs[1], rs[2], rs[3]]) as usize;
    let (idlen, rest) = rest.split_at(1);
    if idlen[0] as usize != PUBLIC_KEY_LEN {
        return Err(WebPushError::InvalidRecord(format!(
            "unexpected key id length {}",
            idlen[0]
        )));
    }
    let (as_public, record) = rest.split_at(PUBLIC_KEY_LEN);
    if rs <= TAG_LEN || record.len() > rs {
        return Err(WebPushError::InvalidRecord(
            "more than one record or bad record size".to_owned(),
        ));
    }

    let ua_key = ua_private.ec_key()?;
    let ua_public = encode_public_key(&ua_key)?;
    let secret = ecdh(ua_private, as_public)?;
    let keys = RecordKeys::derive(&secret, auth_secret, salt, &ua_public, as_public)?;

    let (ciphertext, tag) = record.split_at(record.len() - TAG_LEN);
    decrypt_aead(
        Cipher::aes_128_gcm(),
        &keys.cek,
        Some(&keys.nonce),
        &[],
        ciphertext,
        tag,
    )
    .map_err(|_| WebPushError::InvalidRecord("authentication failed".to_owned()))
}

/// Decrypt a message as the subscriber would. The inverse of [`encrypt`].
pub fn decrypt(
    body: &[u8],
    ua_private: &PKeyRef<Private>,
    auth_secret: &[u8; AUTH_SECRET_LEN],
) -> WebPushResult<Vec<u8>> {
    let mut padded = open(body, ua_private, auth_secret)?;
    // Trailing zeros are padding; the byte before them is the delimiter.
    let end = padded
        .iter()
        .rposition(|&b| b != 0)
        .ok_or_else(|| WebPushError::InvalidRecord("missing delimiter".to_owned()))?;
    if padded[end] != LAST_RECORD {
        return Err(WebPushError::InvalidRecord(format!(
            "unexpected delimiter {:#04x}",
            padded[end]
        )));
    }
    padded.truncate(end);
    Ok(padded)
}

#[cfg(test)]
mod tests {
    use autonotify_common::util::{b64_decode_url, b64_encode_url};

    use super::*;
    use crate::keys::EcPrivateJwk;

    // RFC 8291 Appendix A
    const PLAINTEXT: &[u8] = b"When I grow up, I want to be a watermelon";
    const AS_PUBLIC: &str =
        "BP4z9KsN6nGRTbVYI_c7VJSPQTBtkgcy27mlmlMoZIIgDll6e3vCYLocInmYWAmS6TlzAC8wEqKK6PBru3jl7A8";
    const AS_PRIVATE: &str = "yfWPiYE-n46HLnH0KqZOF1fJJU3MYrct3AELtAQ-oRw";
    const UA_PUBLIC: &str =
        "BCVxsr7N_eNgVRqvHtD0zTZsEc6-VV-JvLexhqUzORcxaOzi6-AYWXvTBHm4bjyPjs7Vd8pZGH6SRpkNtoIAiw4";
    const UA_PRIVATE: &str = "q1dXpw3UpT5VOmu_cf_v6ih07Aems3njxI-JWgLcM94";
    const AUTH: &str = "BTBZMqHH6r4Tts7J_aSIgg";
    const SALT: &str = "DGv6ra1nlYgDCS1FRnbzlw";
    const RECORD: &str = "DGv6ra1nlYgDCS1FRnbzlwAAEABBBP4z9KsN6nGRTbVYI_c7VJSPQTBtkgcy27mlmlMoZIIgDll6e3vCYLocInmYWAmS6TlzAC8wEqKK6PBru3jl7A_yl95bQpu6cVPTpK4Mqgkf1CXztLVBSt2Ks3oZwbuwXPXLWyouBWLVWGNWQexSgSxsj_Qulcy4a-fN";

    fn private_key(public: &str, private: &str) -> PKey<Private> {
        EcPrivateJwk::from_raw(
            &b64_decode_url(public).unwrap(),
            &b64_decode_url(private).unwrap(),
        )
        .unwrap()
        .to_pkey()
        .unwrap()
    }

    fn fixed<const N: usize>(value: &str) -> [u8; N] {
        b64_decode_url(value).unwrap().try_into().unwrap()
    }

    /// A fresh subscriber keypair plus auth secret
    fn subscriber() -> (PKey<Private>, [u8; 65], [u8; 16]) {
        let key = EcKey::generate(&p256_group().unwrap()).unwrap();
        let public = encode_public_key(&key).unwrap();
        let mut auth = [0u8; 16];
        rand_bytes(&mut auth).unwrap();
        (PKey::from_ec_key(key).unwrap(), public, auth)
    }

    #[test]
    fn hkdf_matches_rfc5869_case_1() {
        let ikm = [0x0bu8; 22];
        let salt: Vec<u8> = (0x00..=0x0c).collect();
        let info: Vec<u8> = (0xf0..=0xf9).collect();
        let okm = hkdf(&salt, &ikm, &info, 32).unwrap();
        assert_eq!(
            b64_encode_url(&okm),
            b64_encode_url(&[
                0x3c, 0xb2, 0x5f, 0x25, 0xfa, 0xac, 0xd5, 0x7a, 0x90, 0x43, 0x4f, 0x64, 0xd0,
                0x36, 0x2f, 0x2a, 0x2d, 0x2d, 0x0a, 0x90, 0xcf, 0x1a, 0x5a, 0x4c, 0x5d, 0xb0,
                0x2d, 0x56, 0xec, 0xc4, 0xc5, 0xbf,
            ])
        );
    }

    #[test]
    fn matches_the_rfc8291_example() {
        let ephemeral = private_key(AS_PUBLIC, AS_PRIVATE).ec_key().unwrap();
        let body = encrypt_with(
            PLAINTEXT,
            &fixed(UA_PUBLIC),
            &fixed(AUTH),
            &ephemeral,
            &fixed(SALT),
        )
        .unwrap();
        assert_eq!(b64_encode_url(&body), RECORD);

        let receiver = private_key(UA_PUBLIC, UA_PRIVATE);
        let plaintext = decrypt(&body, &receiver, &fixed(AUTH)).unwrap();
        assert_eq!(plaintext, PLAINTEXT);
    }

    #[test]
    fn roundtrip_with_fresh_keys() {
        let (receiver, public, auth) = subscriber();
        let payload = br#"{"title":"Lesson moved","body":"Now at 10:00"}"#;
        let body = encrypt(payload, &public, &auth).unwrap();

        let padded = open(&body, &receiver, &auth).unwrap();
        assert_eq!(padded.last(), Some(&0x02));
        assert_eq!(decrypt(&body, &receiver, &auth).unwrap(), payload);
    }

    #[test]
    fn header_layout() {
        let (_, public, auth) = subscriber();
        let payload = b"hello";
        let body = encrypt(payload, &public, &auth).unwrap();

        assert_eq!(&body[16..20], &[0x00, 0x00, 0x10, 0x00]);
        assert_eq!(body[20], 65);
        assert_eq!(body[21], 0x04);
        assert_eq!(body.len(), HEADER_LEN + payload.len() + 1 + TAG_LEN);
    }

    #[test]
    fn salt_and_key_are_fresh() {
        let (_, public, auth) = subscriber();
        let a = encrypt(b"same", &public, &auth).unwrap();
        let b = encrypt(b"same", &public, &auth).unwrap();
        assert_ne!(&a[..16], &b[..16]);
        assert_ne!(&a[21..86], &b[21..86]);
    }

    #[test]
    fn wrong_auth_secret_fails() {
        let (receiver, public, auth) = subscriber();
        let body = encrypt(b"secret", &public, &auth).unwrap();
        let mut other = auth;
        other[0] ^= 0xff;
        assert!(matches!(
            decrypt(&body, &receiver, &other),
            Err(WebPushError::InvalidRecord(_))
        ));
    }

    #[test]
    fn tampered_records_fail() {
        let (receiver, public, auth) = subscriber();
        let body = encrypt(b"secret", &public, &auth).unwrap();

        let mut flipped = body.clone();
        let last = flipped.len() - 1;
        flipped[last] ^= 0x01;
        assert!(decrypt(&flipped, &receiver, &auth).is_err());

        let mut bad_idlen = body.clone();
        bad_idlen[20] = 64;
        assert!(matches!(
            decrypt(&bad_idlen, &receiver, &auth),
            Err(WebPushError::InvalidRecord(_))
        ));

        assert!(decrypt(&body[..HEADER_LEN], &receiver, &auth).is_err());
    }

    #[test]
    fn oversized_payload_is_rejected() {
        let (receiver, public, auth) = subscriber();
        let largest = vec![b'a'; MAX_PLAINTEXT_LEN];
        let body = encrypt(&largest, &public, &auth).unwrap();
        assert_eq!(body.len() - HEADER_LEN, RECORD_SIZE as usize);
        assert_eq!(decrypt(&body, &receiver, &auth).unwrap(), largest);

        let too_big = vec![b'a'; MAX_PLAINTEXT_LEN + 10];
        assert!(matches!(
            encrypt(&too_big, &public, &auth),
            Err(WebPushError::PayloadTooLarge(10))
        ));
    }

    #[test]
    fn invalid_subscriber_key_is_rejected() {
        let (_, mut public, auth) = subscriber();
        public[0] = 0x05;
        assert!(matches!(
            encrypt(b"x", &public, &auth),
            Err(WebPushError::KeyFormat(_))
        ));
    }
}
