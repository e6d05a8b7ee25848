//! ECDSA signature re-encoding.
//!
//! OpenSSL produces DER encoded `SEQUENCE { INTEGER r, INTEGER s }`
//! signatures. JWS (RFC 7518 section 3.4) wants the fixed width `r || s`
//! form instead, each half left padded to the 32 byte scalar size.

use crate::error::{WebPushError, WebPushResult};

/// Length of a raw P-256 `r || s` signature
pub const RAW_SIGNATURE_LEN: usize = 64;
const SCALAR_LEN: usize = 32;

const TAG_SEQUENCE: u8 = 0x30;
const TAG_INTEGER: u8 = 0x02;
// Lengths with the high bit set use the long form, which a P-256 signature
// never needs.
const LONG_FORM: u8 = 0x80;

fn malformed(msg: &str) -> WebPushError {
    WebPushError::SignatureFormat(msg.to_owned())
}

/// Convert a DER ECDSA signature into the raw 64 byte form.
///
/// A 64 byte value that does not start with a SEQUENCE tag is taken to be
/// raw already and returned unchanged.
pub fn der_to_raw(signature: &[u8]) -> WebPushResult<[u8; RAW_SIGNATURE_LEN]> {
    if signature.len() == RAW_SIGNATURE_LEN && signature[0] != TAG_SEQUENCE {
        let mut raw = [0u8; RAW_SIGNATURE_LEN];
        raw.copy_from_slice(signature);
        return Ok(raw);
    }

    let (tag, body) = read_tlv(signature)?;
    if tag != TAG_SEQUENCE {
        return Err(malformed("expected a SEQUENCE"));
    }
    if body.len() + 2 != signature.len() {
        return Err(malformed("trailing bytes after the SEQUENCE"));
    }

    let mut raw = [0u8; RAW_SIGNATURE_LEN];
    let (r, rest) = read_integer(body)?;
    let (s, rest) = read_integer(rest)?;
    if !rest.is_empty() {
        return Err(malformed("trailing bytes after s"));
    }
    place(r, &mut raw[..SCALAR_LEN])?;
    place(s, &mut raw[SCALAR_LEN..])?;
    Ok(raw)
}

/// Read one short form TLV from the front of `input`, returning the tag and
/// the content. With a SEQUENCE this also checks the declared length fits.
fn read_tlv(input: &[u8]) -> WebPushResult<(u8, &[u8])> {
    let (&tag, rest) = input
        .split_first()
        .ok_or_else(|| malformed("truncated: missing tag"))?;
    let (&len, rest) = rest
        .split_first()
        .ok_or_else(|| malformed("truncated: missing length"))?;
    if len & LONG_FORM != 0 {
        return Err(malformed("long form lengths are not supported"));
    }
    let len = len as usize;
    if rest.len() < len {
        return Err(malformed("truncated: length exceeds input"));
    }
    Ok((tag, &rest[..len]))
}

fn read_integer(input: &[u8]) -> WebPushResult<(&[u8], &[u8])> {
    let (tag, value) = read_tlv(input)?;
    if tag != TAG_INTEGER {
        return Err(malformed("expected an INTEGER"));
    }
    if value.is_empty() {
        return Err(malformed("zero length INTEGER"));
    }
    let consumed = 2 + value.len();
    Ok((value, &input[consumed..]))
}

/// Copy a big endian integer right aligned into a 32 byte slot.
fn place(value: &[u8], slot: &mut [u8]) -> WebPushResult<()> {
    // A leading zero only marks the value as positive.
    let value = if value.len() > SCALAR_LEN && value[0] == 0 {
        &value[1..]
    } else {
        value
    };
    if value.len() > SCALAR_LEN {
        return Err(malformed("integer is longer than 32 bytes"));
    }
    slot[SCALAR_LEN - value.len()..].copy_from_slice(value);
    Ok(())
}
