//! Push subscriptions as stored and as used for sending.
use autonotify_common::util::b64_decode_lenient;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::ece::AUTH_SECRET_LEN;
use crate::error::{WebPushError, WebPushResult};
use crate::keys::PUBLIC_KEY_LEN;

/// A browser push subscription as kept by the subscription store.
///
/// The key values are the base64url strings from the browser's
/// `PushSubscription.toJSON()`.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionRecord {
    #[serde(deserialize_with = "id_from_string_or_number")]
    pub id: String,
    pub endpoint: String,
    pub p256dh: String,
    pub auth: String,
    pub user_id: String,
    pub tenant_id: String,
}

// Row ids may be serial integers or uuids depending on the table.
fn id_from_string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "unexpected subscription id {other}"
        ))),
    }
}

/// A subscription whose endpoint and keys have been decoded and checked
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Subscriber {
    pub id: String,
    pub endpoint: Url,
    pub public_key: [u8; PUBLIC_KEY_LEN],
    pub auth_secret: [u8; AUTH_SECRET_LEN],
}

fn decode_exact<const N: usize>(name: &str, value: &str) -> WebPushResult<[u8; N]> {
    let bytes = b64_decode_lenient(value)
        .map_err(|e| WebPushError::InvalidSubscription(format!("{name}: {e}")))?;
    let len = bytes.len();
    bytes.try_into().map_err(|_| {
        WebPushError::InvalidSubscription(format!("{name} must be {N} bytes, got {len}"))
    })
}

impl TryFrom<&SubscriptionRecord> for Subscriber {
    type Error = WebPushError;

    fn try_from(record: &SubscriptionRecord) -> WebPushResult<Self> {
        let endpoint = Url::parse(&record.endpoint)
            .map_err(|e| WebPushError::InvalidEndpoint(e.to_string()))?;
        if !matches!(endpoint.scheme(), "https" | "http") {
            return Err(WebPushError::InvalidEndpoint(format!(
                "unsupported scheme {}",
                endpoint.scheme()
            )));
        }
        let public_key: [u8; PUBLIC_KEY_LEN] = decode_exact("p256dh", &record.p256dh)?;
        if public_key[0] != 0x04 {
            return Err(WebPushError::InvalidSubscription(
                "p256dh is not an uncompressed point".to_owned(),
            ));
        }
        Ok(Self {
            id: record.id.clone(),
            endpoint,
            public_key,
            auth_secret: decode_exact("auth", &record.auth)?,
        })
    }
}
