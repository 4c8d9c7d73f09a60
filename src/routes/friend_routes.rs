use std::sync::Arc;

use rocket::serde::json::Json;
use rocket::{State, get, post};

use crate::bus::{BusChatMessage, BusFriendInvite, PubSub};
use crate::friends::{FriendEngine, InviteOutcome};
use crate::models::*;
use crate::rate_limit::{RateLimitConfig, RateLimiter};
use crate::users::UserEngine;

use super::{AuthGuard, ClientIp, RequestId, fail, fail_error, ok, ok_empty};

#[get("/api/v1/friend/find?<user_id>&<nickname>")]
pub fn find_friend(
    rid: RequestId,
    auth: AuthGuard,
    users: &State<Arc<UserEngine>>,
    user_id: Option<i64>,
    nickname: Option<&str>,
) -> Json<ApiResponse> {
    if let Err(resp) = auth.user(&rid) {
        return resp;
    }
    match users.search(user_id, nickname) {
        Ok(found) => ok(&rid, found),
        Err(err) => fail_error(&rid, err),
    }
}

/// Unilateral relationship edits: delete, block/unblock, remark.
#[post("/api/v1/friend/update", format = "json", data = "<body>")]
pub fn update_friend(
    rid: RequestId,
    auth: AuthGuard,
    ip: ClientIp,
    friends: &State<Arc<FriendEngine>>,
    rate_limiter: &State<RateLimiter>,
    rate_config: &State<RateLimitConfig>,
    body: Json<UpdateFriendRequest>,
) -> Json<ApiResponse> {
    let user = match auth.user(&rid) {
        Ok(user) => user,
        Err(resp) => return resp,
    };
    if !rate_limiter.check(
        &format!("social:{}", ip.0),
        rate_config.social_max,
        rate_config.social_window_secs,
    ) {
        return fail(&rid, "too many requests");
    }
    if body.user_id <= 0 || body.user_id == user.id {
        return fail(&rid, "'user_id' invalid");
    }

    match friends.update_friend(
        user.id,
        body.user_id,
        body.status,
        body.block_status,
        body.remark.as_deref(),
    ) {
        Ok(()) => ok_empty(&rid),
        Err(err) => fail_error(&rid, err),
    }
}

/// Publish a hello chat message born from a mutual transition. Exactly one
/// publish per transition; failures are logged, the friendship stands.
async fn publish_hello(pubsub: &PubSub, hello: Option<ChatMessage>) {
    let Some(hello) = hello else { return };
    let bus_msg = BusChatMessage::from_message(&hello, "", None);
    if let Err(err) = pubsub.publish_chat_message(&bus_msg).await {
        log::error!(
            "hello publish failed, pair ({}, {}): {err}",
            hello.sender_id,
            hello.receiver_id
        );
    }
}

async fn publish_invite(pubsub: &PubSub, invite: &Invite) {
    if let Err(err) = pubsub.publish_friend_invite(&BusFriendInvite::from(invite)).await {
        log::error!("invite publish failed, invite {}: {err}", invite.id);
    }
}

#[post("/api/v1/friend/invite/add", format = "json", data = "<body>")]
#[allow(clippy::too_many_arguments)]
pub async fn add_invite(
    rid: RequestId,
    auth: AuthGuard,
    ip: ClientIp,
    users: &State<Arc<UserEngine>>,
    friends: &State<Arc<FriendEngine>>,
    pubsub: &State<Arc<PubSub>>,
    rate_limiter: &State<RateLimiter>,
    rate_config: &State<RateLimitConfig>,
    body: Json<AddInviteRequest>,
) -> Json<ApiResponse> {
    let user = match auth.user(&rid) {
        Ok(user) => user,
        Err(resp) => return resp,
    };
    if !rate_limiter.check(
        &format!("social:{}", ip.0),
        rate_config.social_max,
        rate_config.social_window_secs,
    ) {
        return fail(&rid, "too many requests");
    }
    if body.user_id <= 0 || body.user_id == user.id {
        return fail(&rid, "'user_id' invalid");
    }

    // The target must exist and be usable.
    let target = match users.get(body.user_id) {
        Ok(target) => target,
        Err(err) if err.is_not_found() => return fail(&rid, "target does not exist"),
        Err(err) => return fail_error(&rid, err),
    };
    match target.status {
        USER_STATUS_ACTIVE => {}
        USER_STATUS_DISABLED => return fail(&rid, "target account disabled"),
        _ => return fail(&rid, "target account deleted"),
    }

    match friends.invite(user.id, body.user_id, body.note.trim()) {
        Ok(InviteOutcome::Pending(invite)) => {
            publish_invite(pubsub, &invite).await;
            ok(&rid, serde_json::json!({"invite_id": invite.id}))
        }
        Ok(InviteOutcome::Mutual { hello }) => {
            publish_hello(pubsub, hello).await;
            ok(&rid, serde_json::json!({"mutual": true}))
        }
        Err(err) => fail_error(&rid, err),
    }
}

/// Accept or reject a pending invite (target only).
#[post("/api/v1/friend/invite/update", format = "json", data = "<body>")]
#[allow(clippy::too_many_arguments)]
pub async fn update_invite(
    rid: RequestId,
    auth: AuthGuard,
    ip: ClientIp,
    friends: &State<Arc<FriendEngine>>,
    pubsub: &State<Arc<PubSub>>,
    rate_limiter: &State<RateLimiter>,
    rate_config: &State<RateLimitConfig>,
    body: Json<UpdateInviteRequest>,
) -> Json<ApiResponse> {
    let user = match auth.user(&rid) {
        Ok(user) => user,
        Err(resp) => return resp,
    };
    if !rate_limiter.check(
        &format!("social:{}", ip.0),
        rate_config.social_max,
        rate_config.social_window_secs,
    ) {
        return fail(&rid, "too many requests");
    }

    match friends.decide(body.id, user.id, body.status, body.reply.trim()) {
        Ok(outcome) => {
            // The inviter learns the verdict on the notify channel; an
            // acceptance additionally fans out the hello chat message.
            publish_invite(pubsub, &outcome.invite).await;
            publish_hello(pubsub, outcome.hello).await;
            ok(&rid, serde_json::json!({"status": outcome.invite.status}))
        }
        Err(err) => fail_error(&rid, err),
    }
}
