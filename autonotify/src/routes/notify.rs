//! The notify API
use actix_web::{
    web::{Data, Json},
    HttpResponse,
};
use serde::{Deserialize, Serialize};

use autonotify_common::metric_name::MetricName;
use autonotify_common::metrics::StatsdClientExt;

use crate::error::{ApiErrorKind, ApiResult};
use crate::server::AppState;

/// Body of `POST /v1/notify`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotifyRequest {
    pub user_ids: Vec<String>,
    pub title: String,
    pub body: String,
    pub tenant_id: String,
}

impl NotifyRequest {
    fn validate(&self) -> ApiResult<()> {
        if self.tenant_id.trim().is_empty() {
            return Err(ApiErrorKind::Validation("tenantId is required".to_owned()).into());
        }
        if self.title.trim().is_empty() {
            return Err(ApiErrorKind::Validation("title is required".to_owned()).into());
        }
        if self.user_ids.iter().any(|id| id.trim().is_empty()) {
            return Err(ApiErrorKind::Validation("userIds contains an empty id".to_owned()).into());
        }
        Ok(())
    }
}

#[derive(Debug, Serialize)]
pub struct NotifyResponse {
    pub success: bool,
    pub sent: usize,
    pub total: usize,
    pub removed: usize,
}

/// Handle the `POST /v1/notify` route
pub async fn notify_route(
    request: Json<NotifyRequest>,
    state: Data<AppState>,
) -> ApiResult<HttpResponse> {
    let request = request.into_inner();
    request.validate()?;
    state.metrics.incr(MetricName::NotifyRequest).ok();

    let payload = state
        .settings
        .notification_payload(&request.title, &request.body);
    let report = state
        .dispatcher
        .notify_users(&request.tenant_id, &request.user_ids, &payload)
        .await
        .map_err(|e| {
            state.metrics.incr(MetricName::NotifyRequestError).ok();
            e
        })?;

    info!("Notification delivered";
          "tenant_id" => &request.tenant_id,
          "sent" => report.sent,
          "total" => report.total,
          "removed" => report.removed);
    Ok(HttpResponse::Ok().json(NotifyResponse {
        success: true,
        sent: report.sent,
        total: report.total,
        removed: report.removed,
    }))
}
