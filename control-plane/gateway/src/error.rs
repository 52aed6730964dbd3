//! HTTP-facing error taxonomy (§7): one stable machine-readable code per
//! variant, translated straight into a status code and a `{"error": "..."}`
//! body. Handlers never leak `source`/stack detail to callers; that detail
//! only ever reaches the logs.

use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde::Serialize;
use snafu::Snafu;
use std::fmt;

#[derive(Debug, Snafu)]
pub enum ApiError {
    #[snafu(display("missing required field: {}", field))]
    MissingField { field: String },

    #[snafu(display("human verification failed"))]
    CaptchaFailed,

    #[snafu(display("all clusters in use"))]
    AllClustersInUse,

    #[snafu(display("device already claimed"))]
    DeviceAlreadyClaimed,

    #[snafu(display("cluster unavailable"))]
    ClusterUnavailable,

    #[snafu(display("not authenticated"))]
    Unauthenticated,

    #[snafu(display("internal error: {}", source))]
    Internal { source: common::error::Error },
}

impl From<common::error::Error> for ApiError {
    fn from(source: common::error::Error) -> Self {
        ApiError::Internal { source }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
}

impl ApiError {
    fn code(&self) -> &'static str {
        match self {
            ApiError::MissingField { .. } => "missing_field",
            ApiError::CaptchaFailed => "captcha_failed",
            ApiError::AllClustersInUse => "all_clusters_in_use",
            ApiError::DeviceAlreadyClaimed => "device_already_claimed",
            ApiError::ClusterUnavailable => "cluster_unavailable",
            ApiError::Unauthenticated => "unauthenticated",
            ApiError::Internal { .. } => "internal_error",
        }
    }
}

impl fmt::Display for ErrorBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::MissingField { .. } => StatusCode::BAD_REQUEST,
            ApiError::CaptchaFailed => StatusCode::FORBIDDEN,
            ApiError::AllClustersInUse => StatusCode::NOT_FOUND,
            ApiError::DeviceAlreadyClaimed => StatusCode::CONFLICT,
            ApiError::ClusterUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Unauthenticated => StatusCode::UNAUTHORIZED,
            ApiError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        if let ApiError::Internal { source } = self {
            tracing::error!(error = ?source, "internal error serving request");
        }
        HttpResponse::build(self.status_code()).json(ErrorBody { error: self.code() })
    }
}
