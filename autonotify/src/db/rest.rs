//! Subscription store backed by a PostgREST style HTTP interface.
//!
//! Rows are filtered with `column=op.value` query parameters, e.g.
//! `GET /push_subscriptions?tenant_id=eq.t1&user_id=in.("u1","u2")`.
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response};
use url::Url;

use autonotify_webpush::{SubscriptionRecord, SubscriptionStore, WebPushError, WebPushResult};

const RECORD_COLUMNS: &str = "id,endpoint,p256dh,auth,user_id,tenant_id";

pub struct RestStore {
    http: reqwest::Client,
    table_url: Url,
    api_key: Option<String>,
    timeout: Duration,
}

/// Format a list for an `in.(...)` filter. Values are always quoted so that
/// commas and parentheses inside ids survive.
fn in_list(values: &[String]) -> String {
    let quoted: Vec<String> = values
        .iter()
        .map(|v| format!("\"{}\"", v.replace('\\', "\\\\").replace('"', "\\\"")))
        .collect();
    format!("in.({})", quoted.join(","))
}

fn store_error(context: &str, error: impl std::fmt::Display) -> WebPushError {
    WebPushError::Store(format!("{context}: {error}"))
}

impl RestStore {
    pub fn new(
        base_url: &str,
        table: &str,
        api_key: Option<String>,
        timeout: Duration,
        http: reqwest::Client,
    ) -> WebPushResult<Self> {
        let mut base = Url::parse(base_url)
            .map_err(|e| WebPushError::Configuration(format!("Invalid store URL: {e}")))?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let table_url = base
            .join(table)
            .map_err(|e| WebPushError::Configuration(format!("Invalid store table: {e}")))?;
        Ok(Self {
            http,
            table_url,
            api_key,
            timeout,
        })
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let builder = self
            .http
            .request(method, url)
            .header("Accept", "application/json")
            .timeout(self.timeout);
        match &self.api_key {
            Some(key) => builder
                .header("apikey", key)
                .header("Authorization", format!("Bearer {key}")),
            None => builder,
        }
    }

    async fn check(response: Response, context: &str) -> WebPushResult<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(store_error(context, format!("status {status}: {body}")))
    }
}

#[async_trait]
impl SubscriptionStore for RestStore {
    async fn find_subscriptions(
        &self,
        tenant_id: &str,
        user_ids: &[String],
    ) -> WebPushResult<Vec<SubscriptionRecord>> {
        if user_ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut url = self.table_url.clone();
        url.query_pairs_mut()
            .append_pair("select", RECORD_COLUMNS)
            .append_pair("tenant_id", &format!("eq.{tenant_id}"))
            .append_pair("user_id", &in_list(user_ids));

        let response = self
            .request(Method::GET, url)
            .send()
            .await
            .map_err(|e| store_error("lookup failed", e))?;
        let records: Vec<SubscriptionRecord> = Self::check(response, "lookup failed")
            .await?
            .json()
            .await
            .map_err(|e| store_error("unreadable lookup response", e))?;
        trace!("Found subscriptions"; "tenant_id" => tenant_id, "count" => records.len());
        Ok(records)
    }

    async fn remove_subscriptions(&self, ids: &[String]) -> WebPushResult<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let mut url = self.table_url.clone();
        url.query_pairs_mut()
            .append_pair("id", &in_list(ids))
            .append_pair("select", "id");

        let response = self
            .request(Method::DELETE, url)
            .header("Prefer", "return=representation")
            .send()
            .await
            .map_err(|e| store_error("delete failed", e))?;
        let deleted: Vec<serde_json::Value> = Self::check(response, "delete failed")
            .await?
            .json()
            .await
            .map_err(|e| store_error("unreadable delete response", e))?;
        Ok(deleted.len())
    }

    async fn health_check(&self) -> WebPushResult<bool> {
        let mut url = self.table_url.clone();
        url.query_pairs_mut()
            .append_pair("select", "id")
            .append_pair("limit", "1");
        let response = self
            .request(Method::GET, url)
            .send()
            .await
            .map_err(|e| store_error("health check failed", e))?;
        Ok(response.status().is_success())
    }
}
