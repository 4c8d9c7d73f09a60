use std::sync::Arc;

use rocket::serde::json::Json;
use rocket::{State, post};

use crate::groups::GroupEngine;
use crate::models::*;
use crate::rate_limit::{RateLimitConfig, RateLimiter};

use super::{AuthGuard, ClientIp, RequestId, fail, fail_error, ok, ok_empty};

/// Every mutating group endpoint spends from the same "social" bucket.
fn social_limited(
    ip: &ClientIp,
    rate_limiter: &RateLimiter,
    rate_config: &RateLimitConfig,
) -> bool {
    !rate_limiter.check(
        &format!("social:{}", ip.0),
        rate_config.social_max,
        rate_config.social_window_secs,
    )
}

#[post("/api/v1/group/create", format = "json", data = "<body>")]
pub fn create_group(
    rid: RequestId,
    auth: AuthGuard,
    ip: ClientIp,
    groups: &State<Arc<GroupEngine>>,
    rate_limiter: &State<RateLimiter>,
    rate_config: &State<RateLimitConfig>,
    body: Json<CreateGroupRequest>,
) -> Json<ApiResponse> {
    let user = match auth.user(&rid) {
        Ok(user) => user,
        Err(resp) => return resp,
    };
    if social_limited(&ip, rate_limiter, rate_config) {
        return fail(&rid, "too many requests");
    }
    if body.member_ids.is_empty() {
        return fail(&rid, "'member_ids' cannot be empty");
    }

    match groups.create(user.id, &body.member_ids) {
        Ok(group) => ok(
            &rid,
            serde_json::json!({"group_id": group.id, "group_name": group.name}),
        ),
        Err(err) => fail_error(&rid, err),
    }
}

#[post("/api/v1/group/join", format = "json", data = "<body>")]
pub fn join_group(
    rid: RequestId,
    auth: AuthGuard,
    ip: ClientIp,
    groups: &State<Arc<GroupEngine>>,
    rate_limiter: &State<RateLimiter>,
    rate_config: &State<RateLimitConfig>,
    body: Json<JoinGroupRequest>,
) -> Json<ApiResponse> {
    let user = match auth.user(&rid) {
        Ok(user) => user,
        Err(resp) => return resp,
    };
    if social_limited(&ip, rate_limiter, rate_config) {
        return fail(&rid, "too many requests");
    }
    match groups.join(user.id, body.group_id) {
        Ok(()) => ok_empty(&rid),
        Err(err) => fail_error(&rid, err),
    }
}

#[post("/api/v1/group/leave", format = "json", data = "<body>")]
pub fn leave_group(
    rid: RequestId,
    auth: AuthGuard,
    ip: ClientIp,
    groups: &State<Arc<GroupEngine>>,
    rate_limiter: &State<RateLimiter>,
    rate_config: &State<RateLimitConfig>,
    body: Json<JoinGroupRequest>,
) -> Json<ApiResponse> {
    let user = match auth.user(&rid) {
        Ok(user) => user,
        Err(resp) => return resp,
    };
    if social_limited(&ip, rate_limiter, rate_config) {
        return fail(&rid, "too many requests");
    }
    match groups.leave(user.id, body.group_id) {
        Ok(()) => ok_empty(&rid),
        Err(err) => fail_error(&rid, err),
    }
}

#[post("/api/v1/group/update", format = "json", data = "<body>")]
pub fn update_group(
    rid: RequestId,
    auth: AuthGuard,
    ip: ClientIp,
    groups: &State<Arc<GroupEngine>>,
    rate_limiter: &State<RateLimiter>,
    rate_config: &State<RateLimitConfig>,
    body: Json<UpdateGroupRequest>,
) -> Json<ApiResponse> {
    let user = match auth.user(&rid) {
        Ok(user) => user,
        Err(resp) => return resp,
    };
    if social_limited(&ip, rate_limiter, rate_config) {
        return fail(&rid, "too many requests");
    }
    if body.group_id <= 0 {
        return fail(&rid, "'group_id' invalid");
    }

    match groups.update(
        user.id,
        body.group_id,
        body.name.as_deref(),
        body.speak_status,
        body.owner_id,
    ) {
        Ok(()) => ok_empty(&rid),
        Err(err) => fail_error(&rid, err),
    }
}

#[post("/api/v1/group/member/add", format = "json", data = "<body>")]
pub fn add_group_members(
    rid: RequestId,
    auth: AuthGuard,
    ip: ClientIp,
    groups: &State<Arc<GroupEngine>>,
    rate_limiter: &State<RateLimiter>,
    rate_config: &State<RateLimitConfig>,
    body: Json<AddGroupMembersRequest>,
) -> Json<ApiResponse> {
    let user = match auth.user(&rid) {
        Ok(user) => user,
        Err(resp) => return resp,
    };
    if social_limited(&ip, rate_limiter, rate_config) {
        return fail(&rid, "too many requests");
    }
    if body.group_id <= 0 {
        return fail(&rid, "'group_id' invalid");
    }

    match groups.add_members(user.id, body.group_id, &body.user_ids) {
        Ok(count) => ok(&rid, serde_json::json!({"count": count})),
        Err(err) => fail_error(&rid, err),
    }
}

#[post("/api/v1/group/member/update", format = "json", data = "<body>")]
pub fn update_group_member(
    rid: RequestId,
    auth: AuthGuard,
    ip: ClientIp,
    groups: &State<Arc<GroupEngine>>,
    rate_limiter: &State<RateLimiter>,
    rate_config: &State<RateLimitConfig>,
    body: Json<UpdateGroupMemberRequest>,
) -> Json<ApiResponse> {
    let user = match auth.user(&rid) {
        Ok(user) => user,
        Err(resp) => return resp,
    };
    if social_limited(&ip, rate_limiter, rate_config) {
        return fail(&rid, "too many requests");
    }
    if body.group_id <= 0 || body.user_id <= 0 {
        return fail(&rid, "'group_id' or 'user_id' invalid");
    }

    match groups.update_member(
        user.id,
        body.group_id,
        body.user_id,
        body.role,
        body.speak_status,
    ) {
        Ok(()) => ok_empty(&rid),
        Err(err) => fail_error(&rid, err),
    }
}

#[post("/api/v1/group/member/remove", format = "json", data = "<body>")]
pub fn remove_group_members(
    rid: RequestId,
    auth: AuthGuard,
    ip: ClientIp,
    groups: &State<Arc<GroupEngine>>,
    rate_limiter: &State<RateLimiter>,
    rate_config: &State<RateLimitConfig>,
    body: Json<RemoveGroupMembersRequest>,
) -> Json<ApiResponse> {
    let user = match auth.user(&rid) {
        Ok(user) => user,
        Err(resp) => return resp,
    };
    if social_limited(&ip, rate_limiter, rate_config) {
        return fail(&rid, "too many requests");
    }
    if body.group_id <= 0 {
        return fail(&rid, "'group_id' invalid");
    }

    match groups.remove_members(user.id, body.group_id, &body.user_ids) {
        Ok(count) => ok(&rid, serde_json::json!({"count": count})),
        Err(err) => fail_error(&rid, err),
    }
}
