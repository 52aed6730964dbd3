//! HTTP surface (§5): the handful of JSON endpoints the web form and the
//! admin dashboard speak to. Every handler is a thin translation layer onto
//! [`crate::assignment::AssignmentService`] and [`crate::admin`] — no policy
//! lives here.

use crate::{admin::AdminSessions, assignment::AssignmentService, error::ApiError};
use actix_web::{web, HttpRequest, HttpResponse};
use common::resource_store::ResourceStore;
use serde::{Deserialize, Serialize};

pub struct AppState {
    pub assignment: AssignmentService,
    pub admin_sessions: AdminSessions,
    pub store: ResourceStore,
    pub pool_name: String,
    pub recaptcha_site_key: String,
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/api/claim").route(web::post().to(claim)))
        .service(web::resource("/api/cluster/ready").route(web::get().to(cluster_ready)))
        .service(web::resource("/api/config").route(web::get().to(public_config)))
        .service(web::resource("/api/admin/login").route(web::post().to(admin_login)))
        .service(web::resource("/api/admin").route(web::get().to(admin_snapshot)));
}

#[derive(Debug, Deserialize)]
struct ClaimRequest {
    phone: String,
    password: String,
    #[serde(default, rename = "recaptchaToken")]
    recaptcha_token: String,
    #[serde(default)]
    fingerprint: String,
}

async fn claim(state: web::Data<AppState>, body: web::Json<ClaimRequest>) -> Result<HttpResponse, ApiError> {
    let response = state
        .assignment
        .claim_cluster(&body.phone, &body.password, &body.recaptcha_token, &body.fingerprint)
        .await?;
    Ok(HttpResponse::Ok().json(response))
}

#[derive(Debug, Deserialize)]
struct ReadyQuery {
    phone: String,
}

#[derive(Debug, Serialize)]
struct ReadyResponse {
    ready: bool,
}

/// Never fails: an unready or unknown phone number simply reports `false`,
/// per §4.3's readiness probe contract — this endpoint is polled from the web
/// form while the user waits, and a transient error must not look different
/// from "not ready yet".
async fn cluster_ready(state: web::Data<AppState>, query: web::Query<ReadyQuery>) -> HttpResponse {
    let ready = state.assignment.cluster_ready(&query.phone).await;
    HttpResponse::Ok().json(ReadyResponse { ready })
}

#[derive(Debug, Serialize)]
struct PublicConfig {
    #[serde(rename = "recaptchaSiteKey")]
    recaptcha_site_key: String,
}

async fn public_config(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(PublicConfig {
        recaptcha_site_key: state.recaptcha_site_key.clone(),
    })
}

#[derive(Debug, Deserialize)]
struct AdminLoginRequest {
    password: String,
}

#[derive(Debug, Serialize)]
struct AdminLoginResponse {
    token: String,
}

async fn admin_login(state: web::Data<AppState>, body: web::Json<AdminLoginRequest>) -> Result<HttpResponse, ApiError> {
    let token = state.admin_sessions.login(&body.password)?;
    Ok(HttpResponse::Ok().json(AdminLoginResponse { token }))
}

async fn admin_snapshot(state: web::Data<AppState>, req: HttpRequest) -> Result<HttpResponse, ApiError> {
    let token = bearer_token(&req).unwrap_or_default();
    if !state.admin_sessions.authorize(token) {
        return Err(ApiError::Unauthenticated);
    }
    let snapshot = crate::admin::snapshot(&state.store, &state.pool_name).await?;
    Ok(HttpResponse::Ok().json(snapshot))
}

fn bearer_token(req: &HttpRequest) -> Option<&str> {
    req.headers()
        .get(actix_web::http::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
}
