use std::sync::Arc;

use rocket::serde::json::Json;
use rocket::{State, get, post};

use crate::bus::{BusChatMessage, PubSub};
use crate::chat::{ChatEngine, group_room_id, private_room_id, world_room_id};
use crate::friends::FriendEngine;
use crate::groups::GroupEngine;
use crate::models::*;
use crate::rate_limit::{RateLimitConfig, RateLimiter};

use super::{AuthGuard, ClientIp, RequestId, fail, fail_error, ok};

fn valid_kind(kind: i64) -> bool {
    (MESSAGE_KIND_PLAIN..=MESSAGE_KIND_LOCATION).contains(&kind)
}

/// The send endpoint: authorise per session type, append through the message
/// engine, answer the sender, then fan out on the bus. A failed publish is
/// logged and the request still succeeds — the message is already durable.
#[post("/api/v1/chat/message/send", format = "json", data = "<body>")]
#[allow(clippy::too_many_arguments)]
pub async fn send_message(
    rid: RequestId,
    auth: AuthGuard,
    ip: ClientIp,
    chat: &State<Arc<ChatEngine>>,
    friends: &State<Arc<FriendEngine>>,
    groups: &State<Arc<GroupEngine>>,
    pubsub: &State<Arc<PubSub>>,
    rate_limiter: &State<RateLimiter>,
    rate_config: &State<RateLimitConfig>,
    body: Json<SendMessageRequest>,
) -> Json<ApiResponse> {
    let user = match auth.user(&rid) {
        Ok(user) => user,
        Err(resp) => return resp,
    };
    if !rate_limiter.check(
        &format!("chat:{}", ip.0),
        rate_config.chat_max,
        rate_config.chat_window_secs,
    ) {
        return fail(&rid, "too many requests");
    }

    let req = body.into_inner();
    if req.receiver_id <= 0 {
        return fail(&rid, "'receiver_id' invalid");
    }
    if !valid_kind(req.kind) {
        return fail(&rid, "'type' invalid");
    }

    // Authorise and derive the room per session type.
    let room_id = match req.session_type {
        SESSION_TYPE_PRIVATE => {
            if req.receiver_id == user.id {
                return fail(&rid, "cannot chat with yourself");
            }
            let relation = match friends.relation_of(user.id, req.receiver_id) {
                Ok(relation) => relation,
                Err(err) if err.is_not_found() => return fail(&rid, "you are not friends"),
                Err(err) => return fail_error(&rid, err),
            };
            let view = relation.view_for(user.id);
            if !view.is_mutual {
                return fail(&rid, "you are not friends");
            }
            if view.they_blocked_me {
                return fail(&rid, "the other side has blocked you");
            }
            private_room_id(user.id, req.receiver_id)
        }
        SESSION_TYPE_GROUP => {
            let group = match groups.get(req.receiver_id) {
                Ok(group) => group,
                Err(err) if err.is_not_found() => return fail(&rid, "group not found"),
                Err(err) => return fail_error(&rid, err),
            };
            let member = match groups.member(req.receiver_id, user.id) {
                Ok(member) => member,
                Err(err) if err.is_not_found() => {
                    return fail(&rid, "you are not a group member");
                }
                Err(err) => return fail_error(&rid, err),
            };
            if group.speak_status == 0 && member.role == ROLE_NORMAL {
                return fail(&rid, "the whole group is muted");
            }
            if member.speak_status == 0 {
                return fail(&rid, "you are muted");
            }
            group_room_id(req.receiver_id)
        }
        SESSION_TYPE_WORLD => world_room_id(req.receiver_id),
        _ => return fail(&rid, "'session_type' invalid"),
    };

    let now = now_millis();
    let mut msg = ChatMessage {
        id: String::new(),
        message_id: 0,
        room_id,
        kind: req.kind,
        session_type: req.session_type,
        sender_id: user.id,
        receiver_id: req.receiver_id,
        send_status: 1,
        read_status: 0,
        status: MESSAGE_STATUS_NORMAL,
        body: req.body.clone(),
        created_at: now,
        updated_at: now,
    };
    if let Err(err) = chat.append(&mut msg) {
        log::error!(
            "append failed, sender {} receiver {} session {}: {err}",
            user.id,
            req.receiver_id,
            req.session_type
        );
        return fail_error(&rid, err);
    }

    // Group fan-out pre-computes the recipient list so subscribers don't
    // re-query membership.
    let publish_targets = if req.session_type == SESSION_TYPE_GROUP {
        match groups.member_ids(req.receiver_id) {
            Ok(ids) => Some(ids),
            Err(err) => {
                log::error!("member ids for group {} failed: {err}", req.receiver_id);
                None
            }
        }
    } else {
        None
    };

    let action_id = req.action_id.clone();
    let response = SendMessageResponse {
        sender_id: user.id,
        message_id: msg.message_id,
        created_at: msg.created_at,
        request: req,
    };

    let bus_msg = BusChatMessage::from_message(&msg, &action_id, publish_targets);
    if let Err(err) = pubsub.publish_chat_message(&bus_msg).await {
        log::error!(
            "chat publish failed, sender {} room {}: {err}",
            user.id,
            msg.room_id
        );
    }

    ok(&rid, response)
}

/// Recall a message inside the two-minute window. Sender only.
#[post("/api/v1/chat/message/rollback", format = "json", data = "<body>")]
pub fn rollback_message(
    rid: RequestId,
    auth: AuthGuard,
    chat: &State<Arc<ChatEngine>>,
    body: Json<RollbackMessageRequest>,
) -> Json<ApiResponse> {
    let user = match auth.user(&rid) {
        Ok(user) => user,
        Err(resp) => return resp,
    };

    let msg = match chat.get(&body.message_id) {
        Ok(msg) => msg,
        Err(err) if err.is_not_found() => return fail(&rid, "message not found"),
        Err(err) => return fail_error(&rid, err),
    };
    if msg.sender_id != user.id {
        return fail(&rid, "only the sender may recall a message");
    }
    match chat.rollback(&body.message_id) {
        Ok(changed) => ok(&rid, serde_json::json!({"changed": changed})),
        Err(err) => fail_error(&rid, err),
    }
}

#[post("/api/v1/chat/message/delete", format = "json", data = "<body>")]
pub fn delete_message(
    rid: RequestId,
    auth: AuthGuard,
    chat: &State<Arc<ChatEngine>>,
    body: Json<DeleteMessageRequest>,
) -> Json<ApiResponse> {
    let user = match auth.user(&rid) {
        Ok(user) => user,
        Err(resp) => return resp,
    };

    let msg = match chat.get(&body.message_id) {
        Ok(msg) => msg,
        Err(err) if err.is_not_found() => return fail(&rid, "message not found"),
        Err(err) => return fail_error(&rid, err),
    };
    if msg.sender_id != user.id {
        return fail(&rid, "only the sender may delete a message");
    }
    match chat.delete(&body.message_id) {
        Ok(changed) => ok(&rid, serde_json::json!({"changed": changed})),
        Err(err) => fail_error(&rid, err),
    }
}

/// Recent messages for a conversation. With `last_message_id` the reply is
/// the `[last_message_id, last_message_id + limit)` window instead of the
/// cached last-20 view.
#[get("/api/v1/chat/message/last?<target_id>&<session_type>&<last_message_id>&<limit>")]
pub fn last_messages(
    rid: RequestId,
    auth: AuthGuard,
    chat: &State<Arc<ChatEngine>>,
    groups: &State<Arc<GroupEngine>>,
    target_id: i64,
    session_type: i64,
    last_message_id: Option<i64>,
    limit: Option<i64>,
) -> Json<ApiResponse> {
    let user = match auth.user(&rid) {
        Ok(user) => user,
        Err(resp) => return resp,
    };
    if target_id <= 0 {
        return fail(&rid, "'target_id' invalid");
    }

    let room_id = match session_type {
        SESSION_TYPE_PRIVATE => private_room_id(user.id, target_id),
        SESSION_TYPE_GROUP => {
            if groups.member(target_id, user.id).is_err() {
                return fail(&rid, "you are not a group member");
            }
            group_room_id(target_id)
        }
        SESSION_TYPE_WORLD => world_room_id(target_id),
        _ => return fail(&rid, "'session_type' invalid"),
    };

    let listed = match last_message_id {
        Some(from) => chat.list_window(&room_id, session_type, from, limit.unwrap_or(0)),
        None => chat.list_last(&room_id, session_type),
    };
    match listed {
        Ok(messages) => ok(&rid, messages),
        Err(err) if err.is_not_found() => ok(&rid, Vec::<ChatMessage>::new()),
        Err(err) => fail_error(&rid, err),
    }
}
