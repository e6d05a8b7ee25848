use async_trait::async_trait;
use mockall::automock;

use crate::error::WebPushResult;
use crate::subscription::SubscriptionRecord;

/// Where subscriptions come from and where stale ones go.
///
/// Registration is handled elsewhere; the dispatcher only reads records and
/// asks for the removal of the ones a push service reported as gone.
#[automock] // must appear before #[async_trait]
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    /// Fetch every subscription belonging to `user_ids` within a tenant
    async fn find_subscriptions(
        &self,
        tenant_id: &str,
        user_ids: &[String],
    ) -> WebPushResult<Vec<SubscriptionRecord>>;

    /// Delete the subscriptions with the given ids. Returns how many rows
    /// were actually removed.
    async fn remove_subscriptions(&self, ids: &[String]) -> WebPushResult<usize>;

    /// Check that the store is reachable
    async fn health_check(&self) -> WebPushResult<bool>;
}
