//! Web Push delivery: VAPID authentication, `aes128gcm` message encryption
//! and fan-out to push services.
#![warn(rust_2018_idioms)]

#[macro_use]
extern crate slog_scope;

pub mod delivery;
pub mod ece;
pub mod error;
pub mod keys;
pub mod notification;
pub mod signature;
pub mod store;
pub mod subscription;
pub mod vapid;

pub use delivery::{DeliveryOutcome, DeliveryReport, DeliverySettings, Dispatcher, Urgency};
pub use error::{WebPushError, WebPushResult};
pub use keys::ServerIdentity;
pub use notification::NotificationPayload;
pub use store::SubscriptionStore;
pub use subscription::{Subscriber, SubscriptionRecord};
