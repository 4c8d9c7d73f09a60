use crate::common::{post_json, register_and_login, test_client};

#[test]
fn test_group_lifecycle() {
    let client = test_client();
    let (_id1, token1) = register_and_login(&client, "gown");
    let (id2, token2) = register_and_login(&client, "gmem");
    let (_id3, token3) = register_and_login(&client, "gjoin");

    let body = post_json(
        &client,
        &token1,
        "/api/v1/group/create",
        serde_json::json!({"member_ids": [id2]}),
    );
    assert_eq!(body["status"], 1);
    let group_id = body["data"]["group_id"].as_i64().unwrap();
    assert_eq!(body["data"]["group_name"], "gown,gmem");

    // Join once, not twice.
    let body = post_json(
        &client,
        &token3,
        "/api/v1/group/join",
        serde_json::json!({"group_id": group_id}),
    );
    assert_eq!(body["status"], 1);
    let body = post_json(
        &client,
        &token3,
        "/api/v1/group/join",
        serde_json::json!({"group_id": group_id}),
    );
    assert_eq!(body["error"], "already a member");
    let body = post_json(
        &client,
        &token3,
        "/api/v1/group/join",
        serde_json::json!({"group_id": 777}),
    );
    assert_eq!(body["error"], "no records found");

    // The owner cannot leave; a member can.
    let body = post_json(
        &client,
        &token1,
        "/api/v1/group/leave",
        serde_json::json!({"group_id": group_id}),
    );
    assert_eq!(body["error"], "the owner cannot leave the group");
    let body = post_json(
        &client,
        &token3,
        "/api/v1/group/leave",
        serde_json::json!({"group_id": group_id}),
    );
    assert_eq!(body["status"], 1);

    // An empty group update is rejected.
    let body = post_json(
        &client,
        &token1,
        "/api/v1/group/update",
        serde_json::json!({"group_id": group_id}),
    );
    assert_eq!(body["error"], "nothing to update");

    // Members cannot rename; the owner can.
    let body = post_json(
        &client,
        &token2,
        "/api/v1/group/update",
        serde_json::json!({"group_id": group_id, "name": "renamed"}),
    );
    assert_eq!(body["error"], "only admins may rename the group");
    let body = post_json(
        &client,
        &token1,
        "/api/v1/group/update",
        serde_json::json!({"group_id": group_id, "name": "renamed"}),
    );
    assert_eq!(body["status"], 1);
}

#[test]
fn test_group_create_validations() {
    let client = test_client();
    let (_id1, token1) = register_and_login(&client, "lonely");

    let body = post_json(
        &client,
        &token1,
        "/api/v1/group/create",
        serde_json::json!({"member_ids": []}),
    );
    assert_eq!(body["error"], "'member_ids' cannot be empty");

    // More members than the cap allows.
    let mut ids = Vec::new();
    for i in 0..10 {
        let (id, _) = register_and_login(&client, &format!("capfill{i}"));
        ids.push(id);
    }
    let body = post_json(
        &client,
        &token1,
        "/api/v1/group/create",
        serde_json::json!({"member_ids": ids}),
    );
    assert_eq!(body["error"], "member count cannot exceed 10");
}

#[test]
fn test_group_member_add_and_capacity() {
    let client = test_client();
    let (_id1, token1) = register_and_login(&client, "madder");
    let (id2, _token2) = register_and_login(&client, "mfirst");

    let body = post_json(
        &client,
        &token1,
        "/api/v1/group/create",
        serde_json::json!({"member_ids": [id2]}),
    );
    let group_id = body["data"]["group_id"].as_i64().unwrap();

    // Add a batch; existing members are filtered from the count.
    let mut new_ids = Vec::new();
    for i in 0..3 {
        let (id, _) = register_and_login(&client, &format!("madd{i}"));
        new_ids.push(id);
    }
    let mut with_dup = new_ids.clone();
    with_dup.push(id2);
    let body = post_json(
        &client,
        &token1,
        "/api/v1/group/member/add",
        serde_json::json!({"group_id": group_id, "user_ids": with_dup}),
    );
    assert_eq!(body["status"], 1);
    assert_eq!(body["data"]["count"], 3);

    // Over capacity: 5 in, a batch of 6 more would overflow the cap of 10.
    let mut overflow = Vec::new();
    for i in 0..6 {
        let (id, _) = register_and_login(&client, &format!("mover{i}"));
        overflow.push(id);
    }
    let body = post_json(
        &client,
        &token1,
        "/api/v1/group/member/add",
        serde_json::json!({"group_id": group_id, "user_ids": overflow}),
    );
    assert_eq!(body["error"], "group is full");
}

#[test]
fn test_group_owner_transfer_and_roles() {
    let client = test_client();
    let (id1, token1) = register_and_login(&client, "king");
    let (id2, token2) = register_and_login(&client, "heir");
    let (id3, token3) = register_and_login(&client, "pawn");

    let body = post_json(
        &client,
        &token1,
        "/api/v1/group/create",
        serde_json::json!({"member_ids": [id2, id3]}),
    );
    let group_id = body["data"]["group_id"].as_i64().unwrap();

    // Promote heir to admin; admins cannot promote others.
    let body = post_json(
        &client,
        &token1,
        "/api/v1/group/member/update",
        serde_json::json!({"group_id": group_id, "user_id": id2, "role": 2}),
    );
    assert_eq!(body["status"], 1);
    let body = post_json(
        &client,
        &token2,
        "/api/v1/group/member/update",
        serde_json::json!({"group_id": group_id, "user_id": id3, "role": 2}),
    );
    assert_eq!(body["error"], "only the owner may change roles");

    // Only the owner transfers ownership, and only to a member.
    let body = post_json(
        &client,
        &token2,
        "/api/v1/group/update",
        serde_json::json!({"group_id": group_id, "owner_id": id2}),
    );
    assert_eq!(body["error"], "only the owner may transfer ownership");
    let body = post_json(
        &client,
        &token1,
        "/api/v1/group/update",
        serde_json::json!({"group_id": group_id, "owner_id": 31337}),
    );
    assert_ne!(body["status"], 1);
    let body = post_json(
        &client,
        &token1,
        "/api/v1/group/update",
        serde_json::json!({"group_id": group_id, "owner_id": id2}),
    );
    assert_eq!(body["status"], 1);

    // The old owner is a normal member now and may leave.
    let body = post_json(
        &client,
        &token1,
        "/api/v1/group/leave",
        serde_json::json!({"group_id": group_id}),
    );
    assert_eq!(body["status"], 1);

    // The new owner governs: removes the pawn.
    let body = post_json(
        &client,
        &token2,
        "/api/v1/group/member/remove",
        serde_json::json!({"group_id": group_id, "user_ids": [id3, id1]}),
    );
    assert_eq!(body["status"], 1);
    assert_eq!(body["data"]["count"], 1);

    // Normals cannot remove anyone.
    let body = post_json(
        &client,
        &token3,
        "/api/v1/group/member/remove",
        serde_json::json!({"group_id": group_id, "user_ids": [id2]}),
    );
    assert_ne!(body["status"], 1);
}
