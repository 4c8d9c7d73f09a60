use rocket::serde::json::Json;
use rocket::{catch, get};

use crate::models::{ApiResponse, STATUS_ERROR};

#[get("/api/v1/health")]
pub fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": "relay-im",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

fn catcher_envelope(message: &str) -> Json<ApiResponse> {
    Json(ApiResponse {
        request_id: uuid::Uuid::new_v4().to_string(),
        status: STATUS_ERROR,
        error: Some(message.to_string()),
        data: None,
    })
}

#[catch(404)]
pub fn not_found() -> Json<ApiResponse> {
    catcher_envelope("not found")
}

#[catch(400)]
pub fn bad_request() -> Json<ApiResponse> {
    catcher_envelope("bad request")
}

#[catch(422)]
pub fn unprocessable() -> Json<ApiResponse> {
    catcher_envelope("request body invalid")
}
