// Route module decomposition — each endpoint area in its own file.
// Shared types (request guards, envelope helpers) live here; route functions
// in submodules.

mod auth_routes;
mod chat_routes;
mod friend_routes;
mod group_routes;
mod profile;
mod subscribe;
mod system;
mod ws;

pub use auth_routes::{captcha, captcha_post, login, logout, register};
pub use chat_routes::{delete_message, last_messages, rollback_message, send_message};
pub use friend_routes::{add_invite, find_friend, update_friend, update_invite};
pub use group_routes::{
    add_group_members, create_group, join_group, leave_group, remove_group_members,
    update_group, update_group_member,
};
pub use profile::profile_info;
pub use subscribe::register_handlers;
pub use system::{bad_request, health, not_found, unprocessable};
pub use ws::ws_connect;

use std::sync::Arc;

use rocket::request::{FromRequest, Outcome, Request};
use rocket::serde::json::Json;
use serde::Serialize;

use crate::auth::verify_token;
use crate::config::Config;
use crate::error::Error;
use crate::models::*;
use crate::users::UserEngine;

// --- Request id ---

/// Per-request correlation id, echoed in every envelope.
pub struct RequestId(pub String);

#[rocket::async_trait]
impl<'r> FromRequest<'r> for RequestId {
    type Error = ();

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let id = req
            .headers()
            .get_one("X-Request-Id")
            .map(|s| s.to_string())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        Outcome::Success(RequestId(id))
    }
}

// --- Client IP extraction ---

pub struct ClientIp(pub String);

#[rocket::async_trait]
impl<'r> FromRequest<'r> for ClientIp {
    type Error = ();

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let ip = req
            .headers()
            .get_one("X-Forwarded-For")
            .and_then(|s| s.split(',').next())
            .map(|s| s.trim().to_string())
            .or_else(|| req.remote().map(|r| r.ip().to_string()))
            .unwrap_or_else(|| "unknown".to_string());
        Outcome::Success(ClientIp(ip))
    }
}

// --- Authentication ---

/// Bearer-token authentication. Always succeeds as a guard so handlers can
/// answer inside the HTTP-200 envelope; `user()` unwraps or produces the
/// error response.
pub struct AuthGuard(std::result::Result<User, String>);

impl AuthGuard {
    pub fn user(self, rid: &RequestId) -> std::result::Result<User, Json<ApiResponse>> {
        self.0.map_err(|msg| fail(rid, &msg))
    }
}

fn authenticate(req: &Request<'_>) -> std::result::Result<User, String> {
    let token = req
        .headers()
        .get_one("Authorization")
        .and_then(|auth| auth.strip_prefix("Bearer "))
        .map(|t| t.to_string())
        .or_else(|| req.query_value::<String>("token").and_then(|r| r.ok()));
    let token = match token {
        Some(token) if !token.is_empty() => token,
        _ => return Err("token required".to_string()),
    };

    let config = req
        .rocket()
        .state::<Config>()
        .ok_or_else(|| "internal server error".to_string())?;
    let users = req
        .rocket()
        .state::<Arc<UserEngine>>()
        .ok_or_else(|| "internal server error".to_string())?;

    let user_id = verify_token(&token, &config.jwt_signing_key)
        .map_err(|_| "invalid token".to_string())?;

    let user = match users.get(user_id) {
        Ok(user) => user,
        Err(err) if err.is_not_found() => return Err("account does not exist".to_string()),
        Err(err) => {
            log::error!("user load during auth failed: {err}");
            return Err("internal server error".to_string());
        }
    };
    match user.status {
        USER_STATUS_ACTIVE => Ok(user),
        USER_STATUS_DISABLED => Err("account disabled".to_string()),
        _ => Err("account deleted".to_string()),
    }
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for AuthGuard {
    type Error = ();

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        Outcome::Success(AuthGuard(authenticate(req)))
    }
}

// --- Envelope helpers ---

pub fn ok<T: Serialize>(rid: &RequestId, data: T) -> Json<ApiResponse> {
    Json(ApiResponse {
        request_id: rid.0.clone(),
        status: STATUS_OK,
        error: None,
        data: serde_json::to_value(data).ok(),
    })
}

pub fn ok_empty(rid: &RequestId) -> Json<ApiResponse> {
    Json(ApiResponse {
        request_id: rid.0.clone(),
        status: STATUS_OK,
        error: None,
        data: None,
    })
}

pub fn fail(rid: &RequestId, message: &str) -> Json<ApiResponse> {
    Json(ApiResponse {
        request_id: rid.0.clone(),
        status: STATUS_ERROR,
        error: Some(message.to_string()),
        data: None,
    })
}

pub fn fail_with<T: Serialize>(rid: &RequestId, message: &str, data: T) -> Json<ApiResponse> {
    Json(ApiResponse {
        request_id: rid.0.clone(),
        status: STATUS_ERROR,
        error: Some(message.to_string()),
        data: serde_json::to_value(data).ok(),
    })
}

/// Map an engine error onto the envelope. Internal detail stays in the log.
pub fn fail_error(rid: &RequestId, err: Error) -> Json<ApiResponse> {
    let err = err.into_engine();
    match &err {
        Error::Internal(detail) => {
            log::error!("internal error: {detail}");
            fail(rid, "internal server error")
        }
        Error::Transient(detail) => {
            log::error!("transient failure: {detail}");
            fail(rid, "temporary failure, please retry")
        }
        other => fail(rid, &other.to_string()),
    }
}

// --- WebSocket frames ---

/// Frame pushed to clients over `/ws`.
#[derive(Debug, Serialize)]
pub struct WsFrame<T: Serialize> {
    pub action: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub action_id: String,
    pub data: T,
}

impl<T: Serialize> WsFrame<T> {
    pub fn new(action: &str, action_id: &str, data: T) -> Self {
        WsFrame {
            action: action.to_string(),
            action_id: action_id.to_string(),
            data,
        }
    }
}
