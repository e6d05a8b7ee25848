//! Error types for the HTTP API
use std::fmt::{self, Display};

use actix_web::{
    dev::ServiceResponse, http::StatusCode, middleware::ErrorHandlerResponse, HttpResponse,
    HttpResponseBuilder, ResponseError,
};
use backtrace::Backtrace;
use serde_json::json;
use thiserror::Error;

use autonotify_common::errors::CommonError;
use autonotify_webpush::WebPushError;

/// Common `Result` type.
pub type ApiResult<T> = Result<T, ApiError>;

/// Top-level error type.
#[derive(Debug)]
pub struct ApiError {
    pub kind: ApiErrorKind,
    pub backtrace: Box<Backtrace>,
}

/// Top-level ErrorKind.
#[derive(Debug, Error)]
pub enum ApiErrorKind {
    #[error("Server configuration error: {0}")]
    Configuration(String),

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Subscription store unavailable: {0}")]
    Store(String),

    #[error(transparent)]
    WebPush(WebPushError),

    #[error(transparent)]
    Common(#[from] CommonError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Metrics(#[from] cadence::MetricError),
}

impl From<WebPushError> for ApiErrorKind {
    fn from(error: WebPushError) -> Self {
        match error {
            WebPushError::Configuration(msg) => ApiErrorKind::Configuration(msg),
            WebPushError::KeyFormat(msg) => {
                ApiErrorKind::Configuration(format!("Invalid key material: {msg}"))
            }
            WebPushError::Store(msg) => ApiErrorKind::Store(msg),
            e => ApiErrorKind::WebPush(e),
        }
    }
}

impl ApiErrorKind {
    /// Get the associated HTTP status code
    pub fn status(&self) -> StatusCode {
        match self {
            ApiErrorKind::Validation(_) => StatusCode::BAD_REQUEST,
            ApiErrorKind::Store(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiErrorKind::Configuration(_)
            | ApiErrorKind::WebPush(_)
            | ApiErrorKind::Common(_)
            | ApiErrorKind::Io(_)
            | ApiErrorKind::Metrics(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether this error should be reported to Sentry
    pub fn is_sentry_event(&self) -> bool {
        !matches!(self, ApiErrorKind::Validation(_))
    }
}

// Forward From impls to ApiError from ApiErrorKind. Because From is reflexive,
// this impl also takes care of From<ApiErrorKind>.
impl<T> From<T> for ApiError
where
    ApiErrorKind: From<T>,
{
    fn from(item: T) -> Self {
        ApiError {
            kind: ApiErrorKind::from(item),
            backtrace: Box::new(Backtrace::new()),
        }
    }
}

impl Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)
    }
}

impl std::error::Error for ApiError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.kind.source()
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        self.kind.status()
    }

    fn error_response(&self) -> HttpResponse {
        let code = self.status_code();
        if code.is_server_error() {
            error!("API error: {}", self.kind; "status" => code.as_u16());
            if self.kind.is_sentry_event() {
                debug!("Backtrace: {:?}", &self.backtrace);
            }
        } else {
            debug!("Rejected request: {}", self.kind; "status" => code.as_u16());
        }
        HttpResponseBuilder::new(code).json(json!({
            "error": self.kind.to_string(),
        }))
    }
}

/// Render a 404 response
pub fn render_404<B>(
    res: ServiceResponse<B>,
) -> Result<ErrorHandlerResponse<B>, actix_web::Error> {
    // Replace the outbound error message with our own.
    let resp = HttpResponseBuilder::new(StatusCode::NOT_FOUND).json(json!({
        "error": "Not found",
    }));
    Ok(ErrorHandlerResponse::Response(
        res.into_response(resp).map_into_right_body(),
    ))
}
