use std::sync::Arc;

use actix_web::{get, post, web, HttpResponse, Responder};
use serde::{Deserialize, Serialize};

use super::preserialized::health_response;
use super::Core;
use crate::engine::Verdict;
use crate::metrics;

#[derive(Clone)]
pub struct AppState {
    pub core: Arc<Core>,
}

#[derive(Deserialize)]
struct AddrQuery {
    addr: String,
}

#[derive(Deserialize)]
struct MisbehaveRequest {
    addr: String,
    amount: i64,
}

#[derive(Serialize)]
struct MembershipResponse {
    addr: String,
    matched: bool,
}

#[derive(Serialize)]
struct VerdictResponse {
    addr: String,
    verdict: &'static str,
    code: u8,
}

fn verdict_response(addr: &str, verdict: Verdict) -> VerdictResponse {
    let label = match verdict {
        Verdict::Allow => "allow",
        Verdict::BlockT1 => "block_t1",
        Verdict::BlockT2 => "block_t2",
    };
    VerdictResponse {
        addr: addr.to_owned(),
        verdict: label,
        code: verdict.as_code(),
    }
}

#[get("/health")]
pub async fn health_check() -> impl Responder {
    health_response(true)
}

#[get("/metrics")]
pub async fn metrics_endpoint() -> impl Responder {
    let body = metrics::gather_metrics();
    HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4; charset=utf-8")
        .body(body)
}

#[get("/v1/whitelist")]
pub async fn whitelist_check(
    state: web::Data<AppState>,
    query: web::Query<AddrQuery>,
) -> impl Responder {
    let matched = state.core.is_in_whitelist(query.addr.as_bytes());
    HttpResponse::Ok().json(MembershipResponse {
        addr: query.addr.clone(),
        matched,
    })
}

#[get("/v1/proxylist")]
pub async fn proxylist_check(
    state: web::Data<AppState>,
    query: web::Query<AddrQuery>,
) -> impl Responder {
    let matched = state.core.is_in_proxylist(query.addr.as_bytes());
    HttpResponse::Ok().json(MembershipResponse {
        addr: query.addr.clone(),
        matched,
    })
}

#[get("/v1/verdict")]
pub async fn get_bin(
    state: web::Data<AppState>,
    query: web::Query<AddrQuery>,
) -> impl Responder {
    let verdict = state.core.get_bin(query.addr.as_bytes()).await;
    HttpResponse::Ok().json(verdict_response(&query.addr, verdict))
}

#[post("/v1/connect")]
pub async fn connecting(
    state: web::Data<AppState>,
    body: web::Json<AddrQuery>,
) -> impl Responder {
    let verdict = state.core.connecting(body.addr.as_bytes()).await;
    HttpResponse::Ok().json(verdict_response(&body.addr, verdict))
}

#[post("/v1/disconnect")]
pub async fn disconnected(
    state: web::Data<AppState>,
    body: web::Json<AddrQuery>,
) -> impl Responder {
    state.core.disconnected(body.addr.as_bytes()).await;
    HttpResponse::NoContent().finish()
}

#[post("/v1/misbehave")]
pub async fn misbehaved(
    state: web::Data<AppState>,
    body: web::Json<MisbehaveRequest>,
) -> impl Responder {
    state
        .core
        .misbehaved(body.addr.as_bytes(), body.amount)
        .await;
    HttpResponse::NoContent().finish()
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(health_check)
        .service(metrics_endpoint)
        .service(whitelist_check)
        .service(proxylist_check)
        .service(get_bin)
        .service(connecting)
        .service(disconnected)
        .service(misbehaved);
}
