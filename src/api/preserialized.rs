use std::sync::OnceLock;

use actix_web::body::BoxBody;
use actix_web::http::header::ContentType;
use actix_web::http::StatusCode;
use actix_web::{HttpResponse, Responder};

pub struct PreserializedJson {
    body: &'static [u8],
    status: StatusCode,
}

impl PreserializedJson {
    pub const fn new(body: &'static [u8], status: StatusCode) -> Self {
        Self { body, status }
    }

    pub const fn ok(body: &'static [u8]) -> Self {
        Self::new(body, StatusCode::OK)
    }

    pub const fn service_unavailable(body: &'static [u8]) -> Self {
        Self::new(body, StatusCode::SERVICE_UNAVAILABLE)
    }

    pub const fn bad_request(body: &'static [u8]) -> Self {
        Self::new(body, StatusCode::BAD_REQUEST)
    }
}

impl Responder for PreserializedJson {
    type Body = BoxBody;

    fn respond_to(self, _req: &actix_web::HttpRequest) -> HttpResponse<Self::Body> {
        self.into_response()
    }
}

impl PreserializedJson {
    fn into_response(self) -> HttpResponse<BoxBody> {
        HttpResponse::build(self.status)
            .content_type(ContentType::json())
            .body(self.body.to_vec())
    }
}

impl From<PreserializedJson> for HttpResponse {
    fn from(value: PreserializedJson) -> Self {
        value.into_response()
    }
}

fn leaked_json(value: serde_json::Value) -> &'static [u8] {
    Box::leak(value.to_string().into_bytes().into_boxed_slice())
}

fn health_ok() -> &'static [u8] {
    static BODY: OnceLock<&'static [u8]> = OnceLock::new();
    BODY.get_or_init(|| leaked_json(serde_json::json!({ "status": "healthy" })))
}

fn health_unavailable() -> &'static [u8] {
    static BODY: OnceLock<&'static [u8]> = OnceLock::new();
    BODY.get_or_init(|| leaked_json(serde_json::json!({ "status": "unhealthy" })))
}

pub fn health_response(healthy: bool) -> PreserializedJson {
    if healthy {
        PreserializedJson::ok(health_ok())
    } else {
        PreserializedJson::service_unavailable(health_unavailable())
    }
}
