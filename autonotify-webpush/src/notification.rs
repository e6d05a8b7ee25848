use serde::{Deserialize, Serialize};

use crate::error::WebPushResult;

/// The message shown by the service worker. Serialized to JSON and
/// encrypted once per subscriber.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct NotificationPayload {
    pub title: String,
    pub body: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub badge: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
}

impl NotificationPayload {
    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            ..Default::default()
        }
    }

    pub fn to_bytes(&self) -> WebPushResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}
