//! Defines standard metric names used across the application.
//!
//! This module provides a type-safe way to refer to metrics by replacing
//! string literals with enum variants, ensuring consistency and discoverability.

use strum::{AsRefStr, Display, EnumString};
use strum_macros::IntoStaticStr;

/// Represents all metric names used in the application.
#[derive(Debug, Clone, IntoStaticStr, AsRefStr, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum MetricName {
    //
    // Notify API metrics
    //
    /// A notify request was accepted
    #[strum(serialize = "notify.request")]
    NotifyRequest,

    /// A notify request failed before any send was attempted
    #[strum(serialize = "notify.request.error")]
    NotifyRequestError,

    //
    // Push delivery metrics
    //
    /// The push service accepted the message
    #[strum(serialize = "notification.push.sent")]
    NotificationPushSent,

    /// The push service reported the subscription as gone
    #[strum(serialize = "notification.push.stale")]
    NotificationPushStale,

    /// The push service or the network failed the send
    #[strum(serialize = "notification.push.failed")]
    NotificationPushFailed,

    /// The message could not be built for this subscriber
    #[strum(serialize = "notification.push.rejected")]
    NotificationPushRejected,

    /// Stale subscriptions removed from the store
    #[strum(serialize = "notification.push.removed")]
    NotificationPushRemoved,
}
