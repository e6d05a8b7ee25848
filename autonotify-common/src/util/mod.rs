//! Various small utilities shared by the notification crates
use base64::{
    engine::general_purpose::{STANDARD_NO_PAD, URL_SAFE_NO_PAD},
    Engine,
};

pub mod timing;

pub use self::timing::sec_since_epoch;

/// Encode bytes as unpadded, URL safe base64 (the form used by Web Push)
pub fn b64_encode_url(input: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(input)
}

/// Decode unpadded, URL safe base64
pub fn b64_decode_url(input: &str) -> Result<Vec<u8>, base64::DecodeError> {
    URL_SAFE_NO_PAD.decode(input)
}

/// Decode unpadded, standard alphabet base64
pub fn b64_decode_std(input: &str) -> Result<Vec<u8>, base64::DecodeError> {
    STANDARD_NO_PAD.decode(input)
}

/// Decode a base64 key value from a browser or an operator.
///
/// NOTE: Browsers hand out URL safe values, but copies of them regularly
/// pick up `=` padding or get re-encoded with the standard alphabet along
/// the way. Accept either form.
pub fn b64_decode_lenient(input: &str) -> Result<Vec<u8>, base64::DecodeError> {
    let trimmed = input.trim().trim_end_matches('=');
    if trimmed.contains(['/', '+']) {
        b64_decode_std(trimmed)
    } else {
        b64_decode_url(trimmed)
    }
}
