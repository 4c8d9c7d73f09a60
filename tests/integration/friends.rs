use crate::common::{get_json, make_friends, post_json, register_and_login, test_client};

#[test]
fn test_invite_accept_creates_friendship_and_hello_message() {
    let client = test_client();
    let (id1, token1) = register_and_login(&client, "ping");
    let (id2, token2) = register_and_login(&client, "pong");

    let body = post_json(
        &client,
        &token1,
        "/api/v1/friend/invite/add",
        serde_json::json!({"user_id": id2, "note": "be my friend"}),
    );
    assert_eq!(body["status"], 1);
    let invite_id = body["data"]["invite_id"].as_i64().unwrap();

    let body = post_json(
        &client,
        &token2,
        "/api/v1/friend/invite/update",
        serde_json::json!({"id": invite_id, "status": 1, "reply": "ok"}),
    );
    assert_eq!(body["status"], 1);
    assert_eq!(body["data"]["status"], 1);

    // The hello chat message was injected from inviter to invitee.
    let body = get_json(
        &client,
        &token2,
        &format!("/api/v1/chat/message/last?target_id={id1}&session_type=1"),
    );
    let messages = body["data"].as_array().unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0]["message_id"], 1);
    assert_eq!(messages[0]["sender_id"], id1);
    assert_eq!(messages[0]["receiver_id"], id2);
    assert_eq!(messages[0]["body"]["text"], "You are now friends, say hi!");

    // Now both directions of private chat work.
    let body = post_json(
        &client,
        &token2,
        "/api/v1/chat/message/send",
        serde_json::json!({
            "receiver_id": id1, "session_type": 1, "type": 1,
            "body": {"text": "thanks for the add"},
        }),
    );
    assert_eq!(body["status"], 1);
}

#[test]
fn test_invite_rules() {
    let client = test_client();
    let (id1, token1) = register_and_login(&client, "solo");
    let (id2, token2) = register_and_login(&client, "duo");

    // Self-invites and ghosts are rejected.
    let body = post_json(
        &client,
        &token1,
        "/api/v1/friend/invite/add",
        serde_json::json!({"user_id": id1}),
    );
    assert_eq!(body["error"], "'user_id' invalid");
    let body = post_json(
        &client,
        &token1,
        "/api/v1/friend/invite/add",
        serde_json::json!({"user_id": 987654}),
    );
    assert_eq!(body["error"], "target does not exist");

    // Re-inviting in the same direction republishes the same row.
    let body = post_json(
        &client,
        &token1,
        "/api/v1/friend/invite/add",
        serde_json::json!({"user_id": id2, "note": "first"}),
    );
    let first = body["data"]["invite_id"].as_i64().unwrap();
    let body = post_json(
        &client,
        &token1,
        "/api/v1/friend/invite/add",
        serde_json::json!({"user_id": id2, "note": "second"}),
    );
    assert_eq!(body["data"]["invite_id"].as_i64().unwrap(), first);

    // The opposite direction counts as acceptance.
    let body = post_json(
        &client,
        &token2,
        "/api/v1/friend/invite/add",
        serde_json::json!({"user_id": id1}),
    );
    assert_eq!(body["status"], 1);
    assert_eq!(body["data"]["mutual"], true);

    // Inviting an existing friend is a conflict.
    let body = post_json(
        &client,
        &token1,
        "/api/v1/friend/invite/add",
        serde_json::json!({"user_id": id2}),
    );
    assert_eq!(body["error"], "already friends");
}

#[test]
fn test_invite_decide_authorisation() {
    let client = test_client();
    let (_id1, token1) = register_and_login(&client, "asker");
    let (id2, token2) = register_and_login(&client, "asked");
    let (_id3, token3) = register_and_login(&client, "meddler");

    let body = post_json(
        &client,
        &token1,
        "/api/v1/friend/invite/add",
        serde_json::json!({"user_id": id2}),
    );
    let invite_id = body["data"]["invite_id"].as_i64().unwrap();

    // Neither the inviter nor a third party may decide.
    let body = post_json(
        &client,
        &token1,
        "/api/v1/friend/invite/update",
        serde_json::json!({"id": invite_id, "status": 1}),
    );
    assert_eq!(body["error"], "not the invite target");
    let body = post_json(
        &client,
        &token3,
        "/api/v1/friend/invite/update",
        serde_json::json!({"id": invite_id, "status": 1}),
    );
    assert_eq!(body["error"], "not the invite target");

    // Bad status values are refused.
    let body = post_json(
        &client,
        &token2,
        "/api/v1/friend/invite/update",
        serde_json::json!({"id": invite_id, "status": 7}),
    );
    assert_eq!(body["error"], "'status' must be 1 or 2");

    // Reject, then the decision is final.
    let body = post_json(
        &client,
        &token2,
        "/api/v1/friend/invite/update",
        serde_json::json!({"id": invite_id, "status": 2, "reply": "not now"}),
    );
    assert_eq!(body["status"], 1);
    let body = post_json(
        &client,
        &token2,
        "/api/v1/friend/invite/update",
        serde_json::json!({"id": invite_id, "status": 1}),
    );
    assert_eq!(body["error"], "invite already resolved");

    // A rejected pair can start over.
    let body = post_json(
        &client,
        &token1,
        "/api/v1/friend/invite/add",
        serde_json::json!({"user_id": id2, "note": "second chance"}),
    );
    assert_eq!(body["status"], 1);
    assert!(body["data"]["invite_id"].as_i64().unwrap() > invite_id);
}

#[test]
fn test_find_friend_by_nickname_and_id() {
    let client = test_client();
    let (id1, token1) = register_and_login(&client, "findable");
    register_and_login(&client, "findme2");

    let body = get_json(&client, &token1, "/api/v1/friend/find?nickname=find");
    assert_eq!(body["status"], 1);
    let found = body["data"].as_array().unwrap();
    assert_eq!(found.len(), 2);
    assert!(found.iter().all(|u| u.get("password_hash").is_none()));

    let body = get_json(&client, &token1, &format!("/api/v1/friend/find?user_id={id1}"));
    assert_eq!(body["data"][0]["username"], "findable");

    let body = get_json(&client, &token1, "/api/v1/friend/find");
    assert_eq!(body["error"], "'user_id' or 'nickname' required");
}

#[test]
fn test_update_friend_delete_block_remark() {
    let client = test_client();
    let (id1, token1) = register_and_login(&client, "left");
    let (id2, token2) = register_and_login(&client, "right");
    make_friends(&client, &token1, &token2, id2);

    // Remark is per-side.
    let body = post_json(
        &client,
        &token1,
        "/api/v1/friend/update",
        serde_json::json!({"user_id": id2, "remark": "the other one"}),
    );
    assert_eq!(body["status"], 1);

    // Only 0 is a legal status (unilateral delete).
    let body = post_json(
        &client,
        &token1,
        "/api/v1/friend/update",
        serde_json::json!({"user_id": id2, "status": 3}),
    );
    assert_eq!(body["error"], "'status' only accepts 0");

    // Delete: the pair is no longer mutual, chatting stops.
    let body = post_json(
        &client,
        &token1,
        "/api/v1/friend/update",
        serde_json::json!({"user_id": id2, "status": 0}),
    );
    assert_eq!(body["status"], 1);
    let body = post_json(
        &client,
        &token2,
        "/api/v1/chat/message/send",
        serde_json::json!({
            "receiver_id": id1, "session_type": 1, "type": 1, "body": {"text": "still there?"},
        }),
    );
    assert_eq!(body["error"], "you are not friends");

    // An empty patch and a no-op patch are both rejected.
    let body = post_json(
        &client,
        &token1,
        "/api/v1/friend/update",
        serde_json::json!({"user_id": id2}),
    );
    assert_eq!(body["error"], "nothing to update");
    let body = post_json(
        &client,
        &token1,
        "/api/v1/friend/update",
        serde_json::json!({"user_id": id2, "status": 0}),
    );
    assert_eq!(body["error"], "not change");
}
