use std::sync::Arc;

use rocket::serde::json::Json;
use rocket::{State, get, post};

use crate::auth::{
    CaptchaStore, LoginGuard, MAX_LOGIN_FAIL_TIMES, NEED_CAPTCHA_FAIL_TIMES, password_hash,
    sign_token,
};
use crate::config::Config;
use crate::models::*;
use crate::rate_limit::{RateLimitConfig, RateLimiter};
use crate::users::UserEngine;

use super::{AuthGuard, ClientIp, RequestId, fail, fail_error, fail_with, ok, ok_empty};

const USERNAME_MIN: usize = 2;
const USERNAME_MAX: usize = 32;
const PASSWORD_MIN: usize = 6;

fn valid_username(username: &str) -> bool {
    let len = username.chars().count();
    (USERNAME_MIN..=USERNAME_MAX).contains(&len)
        && username
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

#[post("/api/v1/auth/register", format = "json", data = "<body>")]
pub fn register(
    rid: RequestId,
    ip: ClientIp,
    users: &State<Arc<UserEngine>>,
    captchas: &State<CaptchaStore>,
    rate_limiter: &State<RateLimiter>,
    rate_config: &State<RateLimitConfig>,
    body: Json<RegisterRequest>,
) -> Json<ApiResponse> {
    if !rate_limiter.check(
        &format!("auth:{}", ip.0),
        rate_config.auth_max,
        rate_config.auth_window_secs,
    ) {
        return fail(&rid, "too many requests");
    }

    let username = body.username.trim();
    if !valid_username(username) {
        return fail(&rid, "'username' invalid");
    }
    if body.password.chars().count() < PASSWORD_MIN {
        return fail(&rid, "'password' invalid");
    }
    if body.password != body.confirm_password {
        return fail(&rid, "confirm password does not match");
    }
    if body.captcha_id.is_empty() || body.captcha.is_empty() {
        return fail(&rid, "captcha required");
    }
    if !captchas.verify(&body.captcha_id, &body.captcha) {
        return fail(&rid, "captcha invalid");
    }

    match users.create(username, &password_hash(&body.password)) {
        Ok(user) => ok(
            &rid,
            serde_json::json!({"user_id": user.id, "username": user.username}),
        ),
        Err(err) => fail_error(&rid, err),
    }
}

#[post("/api/v1/auth/login", format = "json", data = "<body>")]
#[allow(clippy::too_many_arguments)]
pub fn login(
    rid: RequestId,
    ip: ClientIp,
    config: &State<Config>,
    users: &State<Arc<UserEngine>>,
    captchas: &State<CaptchaStore>,
    login_guard: &State<LoginGuard>,
    rate_limiter: &State<RateLimiter>,
    rate_config: &State<RateLimitConfig>,
    body: Json<LoginRequest>,
) -> Json<ApiResponse> {
    if !rate_limiter.check(
        &format!("auth:{}", ip.0),
        rate_config.auth_max,
        rate_config.auth_window_secs,
    ) {
        return fail(&rid, "too many requests");
    }

    let username = body.username.trim();
    if username.is_empty() || body.password.is_empty() {
        return fail(&rid, "incorrect username or password");
    }

    let fails = login_guard.fail_times(username);
    if fails >= MAX_LOGIN_FAIL_TIMES {
        return fail_with(
            &rid,
            "too many failed logins, try again later",
            serde_json::json!({"need_captcha": true, "fail_times": fails}),
        );
    }
    if fails >= NEED_CAPTCHA_FAIL_TIMES {
        if body.captcha_id.is_empty() || body.captcha.is_empty() {
            return fail_with(
                &rid,
                "captcha required",
                serde_json::json!({"need_captcha": true, "fail_times": fails}),
            );
        }
        if !captchas.verify(&body.captcha_id, &body.captcha) {
            return fail_with(
                &rid,
                "captcha invalid",
                serde_json::json!({"need_captcha": true, "fail_times": fails}),
            );
        }
    }

    let user = match users.get_by_username(username) {
        Ok(user) => Some(user),
        Err(err) if err.is_not_found() => None,
        Err(err) => return fail_error(&rid, err),
    };
    let verified = user
        .as_ref()
        .is_some_and(|u| u.password_hash == password_hash(&body.password));
    if !verified {
        let fail_times = login_guard.record_failure(username);
        if fail_times >= MAX_LOGIN_FAIL_TIMES {
            return fail_with(
                &rid,
                "username or password wrong too many times",
                serde_json::json!({"need_captcha": true, "fail_times": fail_times}),
            );
        }
        return fail_with(
            &rid,
            "incorrect username or password",
            serde_json::json!({
                "need_captcha": fail_times >= NEED_CAPTCHA_FAIL_TIMES,
                "fail_times": fail_times
            }),
        );
    }
    let user = user.unwrap();
    match user.status {
        USER_STATUS_ACTIVE => {}
        USER_STATUS_DISABLED => return fail(&rid, "account disabled"),
        _ => return fail(&rid, "account deleted"),
    }

    login_guard.clear(username);
    let token = match sign_token(user.id, &config.jwt_signing_key) {
        Ok(token) => token,
        Err(err) => return fail_error(&rid, err),
    };
    ok(
        &rid,
        serde_json::json!({"token": token, "user": user.public()}),
    )
}

fn issue_captcha(rid: &RequestId, captchas: &CaptchaStore) -> Json<ApiResponse> {
    let (captcha_id, data) = captchas.generate();
    ok(
        rid,
        serde_json::json!({"captcha_id": captcha_id, "data": data}),
    )
}

#[get("/api/v1/auth/captcha")]
pub fn captcha(rid: RequestId, captchas: &State<CaptchaStore>) -> Json<ApiResponse> {
    issue_captcha(&rid, captchas)
}

#[post("/api/v1/auth/captcha")]
pub fn captcha_post(rid: RequestId, captchas: &State<CaptchaStore>) -> Json<ApiResponse> {
    issue_captcha(&rid, captchas)
}

/// Tokens are stateless; logout is an acknowledgement for the client to drop
/// its copy.
#[post("/api/v1/auth/logout")]
pub fn logout(rid: RequestId, auth: AuthGuard) -> Json<ApiResponse> {
    match auth.user(&rid) {
        Ok(_) => ok_empty(&rid),
        Err(resp) => resp,
    }
}
