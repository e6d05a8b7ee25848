//! Application settings

use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use autonotify_webpush::{
    DeliverySettings, NotificationPayload, ServerIdentity, Urgency, WebPushResult,
};

pub const ENV_PREFIX: &str = "autonotify";

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub host: String,
    pub port: u16,

    /// base64url uncompressed P-256 public key
    pub vapid_public_key: Option<String>,
    /// base64url raw P-256 private scalar
    pub vapid_private_key: Option<String>,
    /// Contact for push service operators (`mailto:` or `https:`)
    pub vapid_subject: String,

    /// Seconds a push service may hold an undelivered message
    pub ttl: u64,
    pub urgency: String,
    pub max_concurrent_sends: usize,
    /// Seconds to wait for a push service response
    pub request_timeout: u64,

    /// Base URL of the REST interface in front of the subscription table
    pub store_url: String,
    pub store_api_key: Option<String>,
    pub store_table: String,

    pub notification_icon: Option<String>,
    pub notification_badge: Option<String>,
    pub notification_tag: Option<String>,

    pub human_logs: bool,

    pub statsd_host: Option<String>,
    pub statsd_port: u16,
    pub statsd_label: String,
}

impl Default for Settings {
    fn default() -> Settings {
        Settings {
            host: "127.0.0.1".to_string(),
            port: 8000,
            vapid_public_key: None,
            vapid_private_key: None,
            vapid_subject: "mailto:admin@example.com".to_string(),
            ttl: 86400,
            urgency: "high".to_string(),
            max_concurrent_sends: 8,
            request_timeout: 30,
            store_url: "http://localhost:3000".to_string(),
            store_api_key: None,
            store_table: "push_subscriptions".to_string(),
            notification_icon: None,
            notification_badge: None,
            notification_tag: None,
            human_logs: false,
            statsd_host: None,
            statsd_port: 8125,
            statsd_label: "autonotify".to_string(),
        }
    }
}

impl Settings {
    /// Load the settings from the config files in order first then the environment.
    pub fn with_env_and_config_files(filenames: &[String]) -> Result<Self, ConfigError> {
        let mut s = Config::builder();

        for filename in filenames {
            s = s.add_source(File::with_name(filename));
        }

        // e.g. `AUTONOTIFY__VAPID_PRIVATE_KEY`
        s = s.add_source(Environment::with_prefix(&ENV_PREFIX.to_uppercase()).separator("__"));

        let built = s.build()?;
        let s = built.try_deserialize::<Settings>().map_err(|error| {
            error!("Configuration error: {:?}", &error);
            error
        })?;
        s.validate()?;
        Ok(s)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent_sends == 0 {
            return Err(ConfigError::Message(format!(
                "Invalid {}__MAX_CONCURRENT_SENDS: cannot be 0",
                ENV_PREFIX.to_uppercase()
            )));
        }
        if self.request_timeout == 0 {
            return Err(ConfigError::Message(format!(
                "Invalid {}__REQUEST_TIMEOUT: cannot be 0",
                ENV_PREFIX.to_uppercase()
            )));
        }
        self.urgency
            .parse::<Urgency>()
            .map_err(|e| ConfigError::Message(e.to_string()))?;
        Ok(())
    }

    /// Load the VAPID keypair. Fails if either half is missing or unusable.
    pub fn server_identity(&self) -> WebPushResult<ServerIdentity> {
        ServerIdentity::from_config(
            self.vapid_public_key.as_deref(),
            self.vapid_private_key.as_deref(),
        )
    }

    pub fn delivery_settings(&self) -> WebPushResult<DeliverySettings> {
        Ok(DeliverySettings {
            subject: self.vapid_subject.clone(),
            ttl: self.ttl,
            urgency: self.urgency.parse()?,
            max_concurrent_sends: self.max_concurrent_sends,
            request_timeout: Duration::from_secs(self.request_timeout),
        })
    }

    /// Build the payload for a notification, adding the configured
    /// presentation defaults
    pub fn notification_payload(&self, title: &str, body: &str) -> NotificationPayload {
        NotificationPayload {
            icon: self.notification_icon.clone(),
            badge: self.notification_badge.clone(),
            tag: self.notification_tag.clone(),
            ..NotificationPayload::new(title, body)
        }
    }
}
