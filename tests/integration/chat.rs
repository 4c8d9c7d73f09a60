use crate::common::{get_json, make_friends, post_json, register_and_login, test_client};

fn send_text(
    client: &rocket::local::blocking::Client,
    token: &str,
    receiver_id: i64,
    session_type: i64,
    text: &str,
) -> serde_json::Value {
    post_json(
        client,
        token,
        "/api/v1/chat/message/send",
        serde_json::json!({
            "receiver_id": receiver_id,
            "session_type": session_type,
            "type": 1,
            "body": {"text": text},
        }),
    )
}

// --- Private chat ---

#[test]
fn test_private_chat_happy_path() {
    let client = test_client();
    let (id1, token1) = register_and_login(&client, "alice");
    let (id2, token2) = register_and_login(&client, "bob");
    make_friends(&client, &token1, &token2, id2);

    let body = send_text(&client, &token1, id2, 1, "hi");
    assert_eq!(body["status"], 1, "send failed: {body}");
    // message_id 1 went to the hello message when the friendship formed.
    let sent_id = body["data"]["message_id"].as_i64().unwrap();
    assert!(sent_id >= 1);
    assert_eq!(body["data"]["sender_id"], id1);
    assert_eq!(body["data"]["receiver_id"], id2);
    assert_eq!(body["data"]["body"]["text"], "hi");
    assert!(body["data"]["created_at"].as_i64().unwrap() > 0);

    // The receiver sees it in the conversation's recent list, newest first.
    let body = get_json(
        &client,
        &token2,
        &format!("/api/v1/chat/message/last?target_id={id1}&session_type=1"),
    );
    assert_eq!(body["status"], 1);
    let messages = body["data"].as_array().unwrap();
    assert_eq!(messages[0]["body"]["text"], "hi");
    assert_eq!(messages[0]["sender_id"], id1);
    assert_eq!(messages[0]["message_id"], sent_id);
}

#[test]
fn test_private_chat_requires_mutual_friendship() {
    let client = test_client();
    let (_id1, token1) = register_and_login(&client, "carol");
    let (id2, _token2) = register_and_login(&client, "dave");

    let body = send_text(&client, &token1, id2, 1, "hello stranger");
    assert_eq!(body["error"], "you are not friends");

    let body = send_text(&client, &token1, 99999, 1, "ghost");
    assert_eq!(body["error"], "you are not friends");
}

#[test]
fn test_private_chat_blocked_by_peer() {
    let client = test_client();
    let (id1, token1) = register_and_login(&client, "erin");
    let (id2, token2) = register_and_login(&client, "frank");
    make_friends(&client, &token1, &token2, id2);

    // frank blocks erin; erin can no longer reach frank.
    let body = post_json(
        &client,
        &token2,
        "/api/v1/friend/update",
        serde_json::json!({"user_id": id1, "block_status": 1}),
    );
    assert_eq!(body["status"], 1);

    let body = send_text(&client, &token1, id2, 1, "hello?");
    assert_eq!(body["error"], "the other side has blocked you");

    // The blocker can still write (spec keeps the gate one-sided).
    let body = send_text(&client, &token2, id1, 1, "muted you");
    assert_eq!(body["status"], 1);
}

#[test]
fn test_chat_input_validation() {
    let client = test_client();
    let (id1, token1) = register_and_login(&client, "vera");

    let body = send_text(&client, &token1, id1, 1, "me myself");
    assert_eq!(body["error"], "cannot chat with yourself");

    let body = send_text(&client, &token1, 5, 42, "odd session");
    assert_eq!(body["error"], "'session_type' invalid");

    let body = post_json(
        &client,
        &token1,
        "/api/v1/chat/message/send",
        serde_json::json!({
            "receiver_id": 5, "session_type": 1, "type": 9, "body": {"text": "x"}
        }),
    );
    assert_eq!(body["error"], "'type' invalid");

    let body = post_json(
        &client,
        &token1,
        "/api/v1/chat/message/send",
        serde_json::json!({
            "receiver_id": 0, "session_type": 1, "type": 1, "body": {"text": "x"}
        }),
    );
    assert_eq!(body["error"], "'receiver_id' invalid");
}

// --- Rollback and delete ---

#[test]
fn test_rollback_is_sender_only_and_idempotent() {
    let client = test_client();
    let (id1, token1) = register_and_login(&client, "gus");
    let (id2, token2) = register_and_login(&client, "hana");
    make_friends(&client, &token1, &token2, id2);
    send_text(&client, &token1, id2, 1, "oops");

    // Find the internal id through the recent list.
    let body = get_json(
        &client,
        &token1,
        &format!("/api/v1/chat/message/last?target_id={id2}&session_type=1"),
    );
    let msg = &body["data"][0];
    assert_eq!(msg["body"]["text"], "oops");
    let internal_id = msg["id"].as_str().unwrap().to_string();

    // Only the sender may recall.
    let body = post_json(
        &client,
        &token2,
        "/api/v1/chat/message/rollback",
        serde_json::json!({"message_id": internal_id}),
    );
    assert_eq!(body["error"], "only the sender may recall a message");

    let body = post_json(
        &client,
        &token1,
        "/api/v1/chat/message/rollback",
        serde_json::json!({"message_id": internal_id}),
    );
    assert_eq!(body["status"], 1);
    assert_eq!(body["data"]["changed"], true);

    // Second rollback changes nothing.
    let body = post_json(
        &client,
        &token1,
        "/api/v1/chat/message/rollback",
        serde_json::json!({"message_id": internal_id}),
    );
    assert_eq!(body["data"]["changed"], false);

    let body = post_json(
        &client,
        &token1,
        "/api/v1/chat/message/rollback",
        serde_json::json!({"message_id": "no-such-id"}),
    );
    assert_eq!(body["error"], "message not found");
}

#[test]
fn test_delete_message() {
    let client = test_client();
    let (id1, token1) = register_and_login(&client, "iris");
    let (id2, token2) = register_and_login(&client, "jack");
    make_friends(&client, &token1, &token2, id2);
    send_text(&client, &token1, id2, 1, "delete me");

    let body = get_json(
        &client,
        &token1,
        &format!("/api/v1/chat/message/last?target_id={id2}&session_type=1"),
    );
    let internal_id = body["data"][0]["id"].as_str().unwrap().to_string();

    let body = post_json(
        &client,
        &token2,
        "/api/v1/chat/message/delete",
        serde_json::json!({"message_id": internal_id}),
    );
    assert_eq!(body["error"], "only the sender may delete a message");

    let body = post_json(
        &client,
        &token1,
        "/api/v1/chat/message/delete",
        serde_json::json!({"message_id": internal_id}),
    );
    assert_eq!(body["data"]["changed"], true);
}

// --- Recent list and window ---

#[test]
fn test_last_messages_cap_and_window() {
    let client = test_client();
    let (id1, token1) = register_and_login(&client, "kate");
    let (id2, token2) = register_and_login(&client, "liam");
    make_friends(&client, &token1, &token2, id2);

    for i in 1..=25 {
        let body = send_text(&client, &token1, id2, 1, &format!("m{i}"));
        assert_eq!(body["status"], 1);
    }

    let body = get_json(
        &client,
        &token1,
        &format!("/api/v1/chat/message/last?target_id={id2}&session_type=1"),
    );
    let messages = body["data"].as_array().unwrap();
    assert_eq!(messages.len(), 20);
    assert_eq!(messages[0]["body"]["text"], "m25");
    let first = messages[0]["message_id"].as_i64().unwrap();
    let second = messages[1]["message_id"].as_i64().unwrap();
    assert_eq!(first, second + 1);

    // Window query: [2, 2 + 3).
    let body = get_json(
        &client,
        &token1,
        &format!(
            "/api/v1/chat/message/last?target_id={id2}&session_type=1&last_message_id=2&limit=3"
        ),
    );
    let window = body["data"].as_array().unwrap();
    let ids: Vec<i64> = window
        .iter()
        .map(|m| m["message_id"].as_i64().unwrap())
        .collect();
    assert_eq!(ids, vec![4, 3, 2]);
}

#[test]
fn test_last_messages_empty_room_is_an_empty_list() {
    let client = test_client();
    let (_id1, token1) = register_and_login(&client, "mona");
    let (id2, token2) = register_and_login(&client, "nils");
    make_friends(&client, &token1, &token2, id2);

    // The hello message lives in the private room; the world room is empty.
    let body = get_json(
        &client,
        &token1,
        "/api/v1/chat/message/last?target_id=7&session_type=99",
    );
    assert_eq!(body["status"], 1);
    assert_eq!(body["data"].as_array().unwrap().len(), 0);
}

// --- Group chat ---

#[test]
fn test_group_chat_gates() {
    let client = test_client();
    let (id1, token1) = register_and_login(&client, "owner1");
    let (id2, token2) = register_and_login(&client, "member2");
    let (id3, token3) = register_and_login(&client, "member3");
    let (_id4, token4) = register_and_login(&client, "outsider");

    let body = post_json(
        &client,
        &token1,
        "/api/v1/group/create",
        serde_json::json!({"member_ids": [id2, id3]}),
    );
    assert_eq!(body["status"], 1);
    let group_id = body["data"]["group_id"].as_i64().unwrap();

    // A member can send, an outsider cannot, a missing group errors.
    let body = send_text(&client, &token2, group_id, 2, "hello group");
    assert_eq!(body["status"], 1);
    assert_eq!(body["data"]["message_id"], 1);
    let body = send_text(&client, &token4, group_id, 2, "let me in");
    assert_eq!(body["error"], "you are not a group member");
    let body = send_text(&client, &token1, 424242, 2, "void");
    assert_eq!(body["error"], "group not found");

    // Muting one member silences only that member.
    let body = post_json(
        &client,
        &token1,
        "/api/v1/group/member/update",
        serde_json::json!({"group_id": group_id, "user_id": id3, "speak_status": 0}),
    );
    assert_eq!(body["status"], 1);
    let body = send_text(&client, &token3, group_id, 2, "muffled");
    assert_eq!(body["error"], "you are muted");

    // Group-wide mute: normals are silent, the owner still speaks.
    let body = post_json(
        &client,
        &token1,
        "/api/v1/group/update",
        serde_json::json!({"group_id": group_id, "speak_status": 0}),
    );
    assert_eq!(body["status"], 1);
    let body = send_text(&client, &token2, group_id, 2, "pssst");
    assert_eq!(body["error"], "the whole group is muted");
    let body = send_text(&client, &token1, group_id, 2, "announcement");
    assert_eq!(body["status"], 1);

    // Group messages share one monotonic room counter.
    let body = get_json(
        &client,
        &token1,
        &format!("/api/v1/chat/message/last?target_id={group_id}&session_type=2"),
    );
    assert_eq!(body["data"][0]["message_id"], 2);
    assert_eq!(body["data"][0]["body"]["text"], "announcement");

    // Non-members cannot read the group's history either.
    let body = get_json(
        &client,
        &token4,
        &format!("/api/v1/chat/message/last?target_id={group_id}&session_type=2"),
    );
    assert_eq!(body["error"], "you are not a group member");
}

// --- World chat ---

#[test]
fn test_world_chat_needs_no_relationship() {
    let client = test_client();
    let (_id1, token1) = register_and_login(&client, "wanda");

    let body = send_text(&client, &token1, 1, 99, "hello world");
    assert_eq!(body["status"], 1);
    assert_eq!(body["data"]["message_id"], 1);

    let body = get_json(
        &client,
        &token1,
        "/api/v1/chat/message/last?target_id=1&session_type=99",
    );
    assert_eq!(body["data"][0]["body"]["text"], "hello world");
}
