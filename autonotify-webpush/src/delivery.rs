//! Fan a notification out to a batch of subscriptions.
//!
//! Every subscription gets its own token and its own encrypted body. Sends
//! run concurrently up to `max_concurrent_sends`; their outcomes are
//! gathered by the calling task, which then removes any subscriptions the
//! push services reported as gone.
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use autonotify_common::metric_name::MetricName;
use autonotify_common::metrics::StatsdClientExt;
use cadence::StatsdClient;
use futures::stream::{self, StreamExt};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::ece;
use crate::error::{WebPushError, WebPushResult};
use crate::keys::ServerIdentity;
use crate::notification::NotificationPayload;
use crate::store::SubscriptionStore;
use crate::subscription::{Subscriber, SubscriptionRecord};
use crate::vapid;

/// Push message urgency (RFC 8030 section 5.3)
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Urgency {
    VeryLow,
    Low,
    Normal,
    #[default]
    High,
}

impl Urgency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Urgency::VeryLow => "very-low",
            Urgency::Low => "low",
            Urgency::Normal => "normal",
            Urgency::High => "high",
        }
    }
}

impl fmt::Display for Urgency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Urgency {
    type Err = WebPushError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "very-low" => Ok(Urgency::VeryLow),
            "low" => Ok(Urgency::Low),
            "normal" => Ok(Urgency::Normal),
            "high" => Ok(Urgency::High),
            other => Err(WebPushError::Configuration(format!(
                "unknown urgency {other:?}"
            ))),
        }
    }
}

/// Per deployment send options
#[derive(Clone, Debug)]
pub struct DeliverySettings {
    /// VAPID `sub` claim, a `mailto:` or `https:` contact
    pub subject: String,
    /// Seconds the push service should hold an undelivered message
    pub ttl: u64,
    pub urgency: Urgency,
    pub max_concurrent_sends: usize,
    pub request_timeout: Duration,
}

impl Default for DeliverySettings {
    fn default() -> Self {
        Self {
            subject: "mailto:admin@example.com".to_owned(),
            ttl: 86400,
            urgency: Urgency::High,
            max_concurrent_sends: 8,
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// What happened to one subscription
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DeliveryOutcome {
    /// The push service accepted the message
    Delivered,
    /// The subscription no longer exists (404/410) and was queued for removal
    StaleSubscription { status: u16 },
    /// The push service or the network failed. The subscription is kept.
    TransientFailure { status: Option<u16> },
    /// The message could not be built for this subscription
    Rejected { reason: String },
}

impl DeliveryOutcome {
    /// Map a push service response status
    pub fn from_status(status: StatusCode) -> Self {
        match status {
            StatusCode::OK | StatusCode::CREATED => DeliveryOutcome::Delivered,
            StatusCode::NOT_FOUND | StatusCode::GONE => DeliveryOutcome::StaleSubscription {
                status: status.as_u16(),
            },
            _ => DeliveryOutcome::TransientFailure {
                status: Some(status.as_u16()),
            },
        }
    }

    fn metric(&self) -> MetricName {
        match self {
            DeliveryOutcome::Delivered => MetricName::NotificationPushSent,
            DeliveryOutcome::StaleSubscription { .. } => MetricName::NotificationPushStale,
            DeliveryOutcome::TransientFailure { .. } => MetricName::NotificationPushFailed,
            DeliveryOutcome::Rejected { .. } => MetricName::NotificationPushRejected,
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct SubscriberOutcome {
    pub id: String,
    #[serde(flatten)]
    pub outcome: DeliveryOutcome,
}

/// Totals for one batch
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct DeliveryReport {
    pub sent: usize,
    pub total: usize,
    pub removed: usize,
    pub outcomes: Vec<SubscriberOutcome>,
}

impl DeliveryReport {
    /// Ids of the subscriptions reported as gone
    pub fn stale_ids(&self) -> Vec<String> {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.outcome, DeliveryOutcome::StaleSubscription { .. }))
            .map(|o| o.id.clone())
            .collect()
    }
}

/// A fully built push message, ready to post
struct PushRequest {
    endpoint: Url,
    authorization: String,
    body: Vec<u8>,
}

/// Longest push service error body kept for the logs
const MAX_LOGGED_BODY: usize = 512;

/// Read at most `MAX_LOGGED_BODY` bytes of a response body
async fn error_body(mut response: reqwest::Response) -> String {
    let mut body = Vec::new();
    while body.len() < MAX_LOGGED_BODY {
        match response.chunk().await {
            Ok(Some(chunk)) => body.extend_from_slice(&chunk),
            _ => break,
        }
    }
    body.truncate(MAX_LOGGED_BODY);
    String::from_utf8_lossy(&body).into_owned()
}

/// Sends notifications to push services
pub struct Dispatcher {
    http: reqwest::Client,
    identity: Arc<ServerIdentity>,
    settings: DeliverySettings,
    store: Arc<dyn SubscriptionStore>,
    metrics: Arc<StatsdClient>,
}

impl Dispatcher {
    pub fn new(
        http: reqwest::Client,
        identity: Arc<ServerIdentity>,
        settings: DeliverySettings,
        store: Arc<dyn SubscriptionStore>,
        metrics: Arc<StatsdClient>,
    ) -> Self {
        Self {
            http,
            identity,
            settings,
            store,
            metrics,
        }
    }

    /// Look up the users' subscriptions and deliver to all of them.
    ///
    /// Only a failed lookup is an error; individual send failures are part
    /// of the report.
    pub async fn notify_users(
        &self,
        tenant_id: &str,
        user_ids: &[String],
        payload: &NotificationPayload,
    ) -> WebPushResult<DeliveryReport> {
        let records = self.store.find_subscriptions(tenant_id, user_ids).await?;
        debug!("📬 Delivering notification";
               "tenant_id" => tenant_id,
               "users" => user_ids.len(),
               "subscriptions" => records.len());
        Ok(self.deliver(&records, payload).await)
    }

    /// Deliver `payload` to every record
    pub async fn deliver(
        &self,
        records: &[SubscriptionRecord],
        payload: &NotificationPayload,
    ) -> DeliveryReport {
        if records.is_empty() {
            return DeliveryReport::default();
        }

        let plaintext = match payload.to_bytes() {
            Ok(plaintext) => plaintext,
            Err(e) => return self.reject_all(records, &e),
        };
        let outcomes: Vec<SubscriberOutcome> = stream::iter(records)
            .map(|record| self.send_one(record, &plaintext))
            .buffer_unordered(self.settings.max_concurrent_sends.max(1))
            .collect()
            .await;

        let mut report = DeliveryReport {
            sent: outcomes
                .iter()
                .filter(|o| o.outcome == DeliveryOutcome::Delivered)
                .count(),
            total: records.len(),
            removed: 0,
            outcomes,
        };
        let stale = report.stale_ids();
        if !stale.is_empty() {
            report.removed = self.remove_stale(&stale).await;
        }
        report
    }

    /// Mark every record rejected when there is no message to send at all
    fn reject_all(&self, records: &[SubscriptionRecord], error: &WebPushError) -> DeliveryReport {
        error!("Could not serialize notification: {}", error; "subscriptions" => records.len());
        let outcomes = records
            .iter()
            .map(|record| {
                let outcome = DeliveryOutcome::Rejected {
                    reason: error.to_string(),
                };
                self.metrics.incr(outcome.metric()).ok();
                SubscriberOutcome {
                    id: record.id.clone(),
                    outcome,
                }
            })
            .collect();
        DeliveryReport {
            sent: 0,
            total: records.len(),
            removed: 0,
            outcomes,
        }
    }

    async fn remove_stale(&self, ids: &[String]) -> usize {
        match self.store.remove_subscriptions(ids).await {
            Ok(removed) => {
                info!("🧹 Removed stale subscriptions"; "requested" => ids.len(), "removed" => removed);
                self.metrics
                    .incr_by(MetricName::NotificationPushRemoved, removed as i64)
                    .ok();
                removed
            }
            Err(e) => {
                error!("Could not remove stale subscriptions: {}", e; "requested" => ids.len());
                0
            }
        }
    }

    async fn send_one(
        &self,
        record: &SubscriptionRecord,
        plaintext: &[u8],
    ) -> SubscriberOutcome {
        let outcome = match self.prepare(record, plaintext) {
            Ok(request) => self.post(&record.id, request).await,
            Err(e) => {
                if e.is_format_error() {
                    warn!("Push message rejected: {}", e; "subscription_id" => &record.id);
                } else {
                    error!("Could not build push message: {}", e; "subscription_id" => &record.id);
                }
                DeliveryOutcome::Rejected {
                    reason: e.to_string(),
                }
            }
        };
        self.metrics.incr(outcome.metric()).ok();
        SubscriberOutcome {
            id: record.id.clone(),
            outcome,
        }
    }

    fn prepare(&self, record: &SubscriptionRecord, plaintext: &[u8]) -> WebPushResult<PushRequest> {
        let subscriber = Subscriber::try_from(record)?;
        let audience = vapid::audience_for(&subscriber.endpoint)?;
        let token = vapid::build_token(&audience, &self.settings.subject, &self.identity)?;
        let body = ece::encrypt(plaintext, &subscriber.public_key, &subscriber.auth_secret)?;
        Ok(PushRequest {
            endpoint: subscriber.endpoint,
            authorization: vapid::authorization(&token, &self.identity),
            body,
        })
    }

    async fn post(&self, id: &str, request: PushRequest) -> DeliveryOutcome {
        let response = self
            .http
            .post(request.endpoint)
            .header("Authorization", request.authorization)
            .header("Content-Type", "application/octet-stream")
            .header("Content-Encoding", "aes128gcm")
            .header("TTL", self.settings.ttl.to_string())
            .header("Urgency", self.settings.urgency.as_str())
            .body(request.body)
            .timeout(self.settings.request_timeout)
            .send()
            .await;

        match response {
            Ok(response) => {
                let status = response.status();
                let outcome = DeliveryOutcome::from_status(status);
                match &outcome {
                    DeliveryOutcome::Delivered => {
                        trace!("Push delivered"; "subscription_id" => id, "status" => status.as_u16());
                    }
                    DeliveryOutcome::StaleSubscription { .. } => {
                        debug!("Subscription is gone"; "subscription_id" => id, "status" => status.as_u16());
                    }
                    _ => {
                        let reason = error_body(response).await;
                        warn!("Push service refused message";
                              "subscription_id" => id,
                              "status" => status.as_u16(),
                              "reason" => reason);
                    }
                }
                outcome
            }
            Err(e) => {
                warn!("Push request failed: {}", e;
                      "subscription_id" => id,
                      "timeout" => e.is_timeout());
                DeliveryOutcome::TransientFailure { status: None }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use autonotify_common::util::b64_encode_url;
    use autonotify_common::{logging, metrics};
    use openssl::ec::EcKey;
    use openssl::pkey::{PKey, Private};

    use super::*;
    use crate::keys::{encode_public_key, p256_group};
    use crate::store::MockSubscriptionStore;

    fn subscriber_key() -> (PKey<Private>, String) {
        let key = EcKey::generate(&p256_group().unwrap()).unwrap();
        let public = b64_encode_url(&encode_public_key(&key).unwrap());
        (PKey::from_ec_key(key).unwrap(), public)
    }

    fn record(id: &str, path: &str) -> SubscriptionRecord {
        let (_, p256dh) = subscriber_key();
        SubscriptionRecord {
            id: id.to_owned(),
            endpoint: format!("{}{}", mockito::server_url(), path),
            p256dh,
            auth: b64_encode_url(&[0x05; 16]),
            user_id: "user".to_owned(),
            tenant_id: "tenant".to_owned(),
        }
    }

    fn dispatcher(store: MockSubscriptionStore) -> Dispatcher {
        dispatcher_with(store, DeliverySettings::default())
    }

    fn dispatcher_with(store: MockSubscriptionStore, settings: DeliverySettings) -> Dispatcher {
        logging::init_test_logging();
        Dispatcher::new(
            reqwest::Client::new(),
            Arc::new(ServerIdentity::generate().unwrap()),
            settings,
            Arc::new(store),
            Arc::new(metrics::noop()),
        )
    }

    fn payload() -> NotificationPayload {
        NotificationPayload::new("Lesson moved", "Tomorrow at 9")
    }

    #[test]
    fn urgency_parses_and_prints() {
        assert_eq!("very-low".parse::<Urgency>().unwrap(), Urgency::VeryLow);
        assert_eq!(" High ".parse::<Urgency>().unwrap(), Urgency::High);
        assert_eq!(Urgency::Normal.to_string(), "normal");
        assert!("urgent".parse::<Urgency>().is_err());
        assert_eq!(Urgency::default(), Urgency::High);
    }

    #[test]
    fn statuses_are_classified() {
        assert_eq!(
            DeliveryOutcome::from_status(StatusCode::OK),
            DeliveryOutcome::Delivered
        );
        assert_eq!(
            DeliveryOutcome::from_status(StatusCode::CREATED),
            DeliveryOutcome::Delivered
        );
        assert_eq!(
            DeliveryOutcome::from_status(StatusCode::NOT_FOUND),
            DeliveryOutcome::StaleSubscription { status: 404 }
        );
        assert_eq!(
            DeliveryOutcome::from_status(StatusCode::GONE),
            DeliveryOutcome::StaleSubscription { status: 410 }
        );
        assert_eq!(
            DeliveryOutcome::from_status(StatusCode::TOO_MANY_REQUESTS),
            DeliveryOutcome::TransientFailure { status: Some(429) }
        );
        assert_eq!(
            DeliveryOutcome::from_status(StatusCode::ACCEPTED),
            DeliveryOutcome::TransientFailure { status: Some(202) }
        );
    }

    #[tokio::test]
    async fn sends_the_expected_request() {
        let mock = mockito::mock("POST", "/delivery/request/ok")
            .match_header("Content-Type", "application/octet-stream")
            .match_header("Content-Encoding", "aes128gcm")
            .match_header("TTL", "86400")
            .match_header("Urgency", "high")
            .match_header(
                "Authorization",
                mockito::Matcher::Regex(r"^vapid t=[\w-]+\.[\w-]+\.[\w-]+, k=[\w-]{87}$".to_owned()),
            )
            .with_status(201)
            .create();

        let mut store = MockSubscriptionStore::new();
        store.expect_remove_subscriptions().never();
        let report = dispatcher(store)
            .deliver(&[record("a", "/delivery/request/ok")], &payload())
            .await;

        mock.assert();
        assert_eq!(report.sent, 1);
        assert_eq!(report.total, 1);
        assert_eq!(report.removed, 0);
    }

    #[tokio::test]
    async fn mixed_batch_removes_only_gone_subscriptions() {
        let _ok = mockito::mock("POST", "/delivery/mixed/ok")
            .with_status(201)
            .create();
        let _gone = mockito::mock("POST", "/delivery/mixed/gone")
            .with_status(410)
            .create();
        let err_mock = mockito::mock("POST", "/delivery/mixed/err")
            .with_status(500)
            .with_body("try later")
            .expect(1)
            .create();

        let mut store = MockSubscriptionStore::new();
        store
            .expect_remove_subscriptions()
            .withf(|ids: &[String]| ids == ["gone".to_owned()])
            .times(1)
            .return_once(|ids| Ok(ids.len()));

        let records = vec![
            record("ok", "/delivery/mixed/ok"),
            record("gone", "/delivery/mixed/gone"),
            record("err", "/delivery/mixed/err"),
        ];
        let report = dispatcher(store).deliver(&records, &payload()).await;

        // Failures are reported, not retried.
        err_mock.assert();
        assert_eq!(report.sent, 1);
        assert_eq!(report.total, 3);
        assert_eq!(report.removed, 1);
        assert_eq!(report.stale_ids(), vec!["gone".to_owned()]);
        let err = report.outcomes.iter().find(|o| o.id == "err").unwrap();
        assert_eq!(
            err.outcome,
            DeliveryOutcome::TransientFailure { status: Some(500) }
        );
    }

    #[tokio::test]
    async fn sends_one_at_a_time_when_bounded() {
        for (bound, prefix) in [(1, "/delivery/bounded/one"), (0, "/delivery/bounded/zero")] {
            let paths: Vec<String> = (0..4).map(|i| format!("{prefix}/{i}")).collect();
            let mocks: Vec<_> = paths
                .iter()
                .map(|path| mockito::mock("POST", path.as_str()).with_status(201).expect(1).create())
                .collect();
            let records: Vec<SubscriptionRecord> = paths
                .iter()
                .enumerate()
                .map(|(i, path)| record(&i.to_string(), path))
                .collect();

            let mut store = MockSubscriptionStore::new();
            store.expect_remove_subscriptions().never();
            let settings = DeliverySettings {
                max_concurrent_sends: bound,
                ..Default::default()
            };
            let report = dispatcher_with(store, settings)
                .deliver(&records, &payload())
                .await;

            for mock in &mocks {
                mock.assert();
            }
            assert_eq!((report.sent, report.total, report.removed), (4, 4, 0));
            assert_eq!(report.outcomes.len(), 4);
            assert!(report
                .outcomes
                .iter()
                .all(|o| o.outcome == DeliveryOutcome::Delivered));
        }
    }

    #[tokio::test]
    async fn unserializable_payload_rejects_everyone() {
        let mock = mockito::mock("POST", "/delivery/no-payload").expect(0).create();
        let mut store = MockSubscriptionStore::new();
        store.expect_remove_subscriptions().never();
        let dispatcher = dispatcher(store);

        let error = WebPushError::from(serde_json::from_str::<u8>("not json").unwrap_err());
        let records = [
            record("a", "/delivery/no-payload"),
            record("b", "/delivery/no-payload"),
        ];
        let report = dispatcher.reject_all(&records, &error);

        mock.assert();
        assert_eq!((report.sent, report.total, report.removed), (0, 2, 0));
        for outcome in &report.outcomes {
            assert_eq!(
                outcome.outcome,
                DeliveryOutcome::Rejected {
                    reason: error.to_string()
                }
            );
        }
    }

    #[tokio::test]
    async fn error_bodies_are_cut_short() {
        let _mock = mockito::mock("GET", "/delivery/long-error")
            .with_status(500)
            .with_body("x".repeat(10 * MAX_LOGGED_BODY))
            .create();
        let response = reqwest::get(format!("{}/delivery/long-error", mockito::server_url()))
            .await
            .unwrap();
        assert_eq!(error_body(response).await, "x".repeat(MAX_LOGGED_BODY));
    }

    #[tokio::test]
    async fn empty_batch_does_nothing() {
        let mut store = MockSubscriptionStore::new();
        store.expect_remove_subscriptions().never();
        let report = dispatcher(store).deliver(&[], &payload()).await;
        assert_eq!(report, DeliveryReport::default());
    }

    #[tokio::test]
    async fn malformed_records_are_rejected_without_sending() {
        let mock = mockito::mock("POST", "/delivery/rejected").expect(0).create();

        let mut bad_key = record("bad-key", "/delivery/rejected");
        bad_key.p256dh = b64_encode_url(&[0x04; 10]);
        let mut bad_endpoint = record("bad-endpoint", "/delivery/rejected");
        bad_endpoint.endpoint = "ftp://push.example.com/x".to_owned();

        let mut store = MockSubscriptionStore::new();
        store.expect_remove_subscriptions().never();
        let report = dispatcher(store)
            .deliver(&[bad_key, bad_endpoint], &payload())
            .await;

        mock.assert();
        assert_eq!(report.sent, 0);
        assert_eq!(report.total, 2);
        assert!(report
            .outcomes
            .iter()
            .all(|o| matches!(o.outcome, DeliveryOutcome::Rejected { .. })));
    }

    #[tokio::test]
    async fn network_errors_are_transient() {
        // Nothing listens on port 9 of localhost.
        let mut unreachable = record("down", "/unused");
        unreachable.endpoint = "http://127.0.0.1:9/wpush".to_owned();

        let mut store = MockSubscriptionStore::new();
        store.expect_remove_subscriptions().never();
        let report = dispatcher(store).deliver(&[unreachable], &payload()).await;
        assert_eq!(
            report.outcomes[0].outcome,
            DeliveryOutcome::TransientFailure { status: None }
        );
    }

    #[tokio::test]
    async fn failed_removal_reports_zero() {
        let _gone = mockito::mock("POST", "/delivery/remove-fails")
            .with_status(404)
            .create();

        let mut store = MockSubscriptionStore::new();
        store
            .expect_remove_subscriptions()
            .times(1)
            .return_once(|_| Err(WebPushError::Store("connection reset".to_owned())));
        let report = dispatcher(store)
            .deliver(&[record("a", "/delivery/remove-fails")], &payload())
            .await;

        assert_eq!(report.removed, 0);
        assert_eq!(
            report.outcomes[0].outcome,
            DeliveryOutcome::StaleSubscription { status: 404 }
        );
    }

    #[tokio::test]
    async fn notify_users_looks_up_subscriptions() {
        let _ok = mockito::mock("POST", "/delivery/notify-users")
            .with_status(200)
            .create();

        let mut store = MockSubscriptionStore::new();
        store
            .expect_find_subscriptions()
            .withf(|tenant, users: &[String]| tenant == "t1" && users == ["u1".to_owned()])
            .return_once(|_, _| Ok(vec![record("a", "/delivery/notify-users")]));
        let report = dispatcher(store)
            .notify_users("t1", &["u1".to_owned()], &payload())
            .await
            .unwrap();
        assert_eq!((report.sent, report.total, report.removed), (1, 1, 0));

        let mut store = MockSubscriptionStore::new();
        store
            .expect_find_subscriptions()
            .return_once(|_, _| Err(WebPushError::Store("down".to_owned())));
        assert!(dispatcher(store)
            .notify_users("t1", &["u1".to_owned()], &payload())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn subscriber_can_decrypt_the_body() {
        let (receiver, p256dh) = subscriber_key();
        let mut rec = record("a", "/delivery/decrypt");
        rec.p256dh = p256dh;

        let dispatcher = dispatcher(MockSubscriptionStore::new());
        let request = dispatcher.prepare(&rec, &payload().to_bytes().unwrap()).unwrap();
        let plaintext = ece::decrypt(&request.body, &receiver, &[0x05; 16]).unwrap();
        let received: NotificationPayload = serde_json::from_slice(&plaintext).unwrap();
        assert_eq!(received, payload());
    }
}
