//! Subscription store clients
pub mod rest;

pub use self::rest::RestStore;
