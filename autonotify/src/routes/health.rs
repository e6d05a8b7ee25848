//! Health and Dockerflow routes
use actix_web::{
    web::{Data, Json},
    HttpResponse,
};
use serde_json::json;

use crate::server::AppState;

/// Handle the `/health` and `/__heartbeat__` routes
pub async fn health_route(state: Data<AppState>) -> Json<serde_json::Value> {
    let store = match state.store.health_check().await {
        Ok(true) => json!({ "status": "OK" }),
        Ok(false) => json!({ "status": "NOT OK", "cause": "Subscription table not readable" }),
        Err(e) => {
            error!("Autonotify health error: {:?}", e);
            json!({ "status": "NOT OK", "cause": e.to_string() })
        }
    };
    Json(json!({
        "status": if store["status"] == "OK" { "OK" } else { "ERROR" },
        "version": env!("CARGO_PKG_VERSION"),
        "subscription_store": store,
    }))
}

/// Handle the `/status` route
pub async fn status_route() -> Json<serde_json::Value> {
    Json(json!({
        "status": "OK",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Handle the `/__lbheartbeat__` route
pub async fn lb_heartbeat_route() -> HttpResponse {
    // Used by the load balancers, just return OK.
    HttpResponse::Ok().finish()
}

/// Handle the `/__version__` route
pub async fn version_route() -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "source": env!("CARGO_PKG_REPOSITORY"),
        "version": env!("CARGO_PKG_VERSION"),
        "name": env!("CARGO_PKG_NAME"),
    }))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use actix_web::{http::StatusCode, test, web, App};
    use serde_json::Value;

    use autonotify_webpush::store::MockSubscriptionStore;
    use autonotify_webpush::{ServerIdentity, WebPushError};

    use crate::server::{config, AppState};
    use crate::settings::Settings;

    fn state(store: MockSubscriptionStore) -> AppState {
        let identity = ServerIdentity::generate().unwrap();
        let settings = Settings {
            vapid_public_key: Some(identity.public_key_base64url().to_owned()),
            vapid_private_key: Some(identity.private_key_base64url().unwrap()),
            ..Default::default()
        };
        AppState::from_settings(settings, Arc::new(store)).unwrap()
    }

    #[actix_rt::test]
    async fn heartbeat_reports_store_health() {
        let mut store = MockSubscriptionStore::new();
        store.expect_health_check().times(1).return_once(|| Ok(true));
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state(store)))
                .configure(config),
        )
        .await;

        let req = test::TestRequest::get().uri("/__heartbeat__").to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["status"], "OK");
        assert_eq!(body["subscription_store"]["status"], "OK");
    }

    #[actix_rt::test]
    async fn heartbeat_reports_store_errors() {
        let mut store = MockSubscriptionStore::new();
        store
            .expect_health_check()
            .return_once(|| Err(WebPushError::Store("no route to host".to_owned())));
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state(store)))
                .configure(config),
        )
        .await;

        let req = test::TestRequest::get().uri("/health").to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["status"], "ERROR");
        assert_eq!(body["subscription_store"]["status"], "NOT OK");
    }

    #[actix_rt::test]
    async fn dockerflow_routes() {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state(MockSubscriptionStore::new())))
                .configure(config),
        )
        .await;

        let req = test::TestRequest::get().uri("/__lbheartbeat__").to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);

        let req = test::TestRequest::get().uri("/__version__").to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));

        let req = test::TestRequest::get().uri("/status").to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["status"], "OK");
    }
}
