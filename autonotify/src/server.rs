//! Main application server

use std::sync::Arc;
use std::time::Duration;

use actix_cors::Cors;
use actix_web::{dev, http::StatusCode, middleware::ErrorHandlers, web, App, HttpServer};
use cadence::StatsdClient;

use autonotify_common::metrics;
use autonotify_webpush::{Dispatcher, SubscriptionStore, WebPushError};

use crate::db::RestStore;
use crate::error::{render_404, ApiError, ApiErrorKind, ApiResult};
use crate::routes::health::{health_route, lb_heartbeat_route, status_route, version_route};
use crate::routes::notify::notify_route;
use crate::settings::Settings;

#[derive(Clone)]
pub struct AppState {
    pub metrics: Arc<StatsdClient>,
    pub settings: Settings,
    pub store: Arc<dyn SubscriptionStore>,
    pub dispatcher: Arc<Dispatcher>,
}

impl AppState {
    /// Build the shared state. The VAPID keypair is loaded here, so a
    /// missing or malformed key stops the server before it accepts anything.
    pub fn from_settings(settings: Settings, store: Arc<dyn SubscriptionStore>) -> ApiResult<Self> {
        let identity = Arc::new(settings.server_identity()?);
        let delivery = settings.delivery_settings()?;
        let metrics = Arc::new(
            metrics::builder(
                &settings.statsd_label,
                &settings.statsd_host,
                settings.statsd_port,
            )?
            .build(),
        );
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(settings.request_timeout))
            .build()
            .map_err(WebPushError::from)?;
        info!("🔑 VAPID identity loaded"; "public_key" => identity.public_key_base64url());

        let dispatcher = Arc::new(Dispatcher::new(
            http,
            identity,
            delivery,
            store.clone(),
            metrics.clone(),
        ));
        Ok(Self {
            metrics,
            settings,
            store,
            dispatcher,
        })
    }
}

/// Route table, shared by the server and the route tests
pub fn config(cfg: &mut web::ServiceConfig) {
    // Malformed bodies get the same `{error}` response as other failures
    cfg.app_data(web::JsonConfig::default().error_handler(|err, _req| {
        ApiError::from(ApiErrorKind::Validation(err.to_string())).into()
    }))
    .service(web::resource("/v1/notify").route(web::post().to(notify_route)))
    // Health checks
    .service(web::resource("/status").route(web::get().to(status_route)))
    .service(web::resource("/health").route(web::get().to(health_route)))
    // Dockerflow
    .service(web::resource("/__heartbeat__").route(web::get().to(health_route)))
    .service(web::resource("/__lbheartbeat__").route(web::get().to(lb_heartbeat_route)))
    .service(web::resource("/__version__").route(web::get().to(version_route)));
}

pub struct Server;

impl Server {
    pub fn with_settings(settings: Settings) -> ApiResult<dev::Server> {
        let store: Arc<dyn SubscriptionStore> = Arc::new(RestStore::new(
            &settings.store_url,
            &settings.store_table,
            settings.store_api_key.clone(),
            Duration::from_secs(settings.request_timeout),
            reqwest::Client::new(),
        )?);
        let bind_address = format!("{}:{}", settings.host, settings.port);
        let state = AppState::from_settings(settings, store)?;

        let server = HttpServer::new(move || {
            App::new()
                .app_data(web::Data::new(state.clone()))
                // Middleware
                .wrap(ErrorHandlers::new().handler(StatusCode::NOT_FOUND, render_404))
                .wrap(sentry_actix::Sentry::new())
                .wrap(Cors::default())
                .configure(config)
        })
        .bind(bind_address)?
        .run();

        Ok(server)
    }
}
