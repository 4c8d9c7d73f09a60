use rocket::http::{ContentType, Status};

use crate::common::{bearer, get_json, register_and_login, solve_captcha, test_client};

// --- Health ---

#[test]
fn test_health() {
    let client = test_client();
    let res = client.get("/api/v1/health").dispatch();
    assert_eq!(res.status(), Status::Ok);
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["service"], "relay-im");
}

// --- Captcha ---

#[test]
fn test_captcha_issues_id_and_image() {
    let client = test_client();
    let res = client.get("/api/v1/auth/captcha").dispatch();
    assert_eq!(res.status(), Status::Ok);
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["status"], 1);
    assert!(!body["data"]["captcha_id"].as_str().unwrap().is_empty());
    assert!(!body["data"]["data"].as_str().unwrap().is_empty());

    // POST works too.
    let res = client.post("/api/v1/auth/captcha").dispatch();
    assert_eq!(res.status(), Status::Ok);
}

// --- Register ---

#[test]
fn test_register_and_login_flow() {
    let client = test_client();
    let (user_id, token) = register_and_login(&client, "ada");
    assert!(user_id > 0);

    let body = get_json(&client, &token, "/api/v1/profile/info");
    assert_eq!(body["status"], 1);
    assert_eq!(body["data"]["username"], "ada");
    assert_eq!(body["data"]["nickname"], "ada");
    assert!(body["data"].get("password_hash").is_none());
    assert!(!body["request_id"].as_str().unwrap().is_empty());
}

#[test]
fn test_register_validations() {
    let client = test_client();

    // Username too short.
    let (captcha_id, code) = solve_captcha(&client);
    let body: serde_json::Value = client
        .post("/api/v1/auth/register")
        .header(ContentType::JSON)
        .body(
            serde_json::json!({
                "username": "x",
                "password": "password1",
                "confirm_password": "password1",
                "captcha_id": captcha_id,
                "captcha": code,
            })
            .to_string(),
        )
        .dispatch()
        .into_json()
        .unwrap();
    assert_ne!(body["status"], 1);

    // Password confirmation mismatch.
    let (captcha_id, code) = solve_captcha(&client);
    let body: serde_json::Value = client
        .post("/api/v1/auth/register")
        .header(ContentType::JSON)
        .body(
            serde_json::json!({
                "username": "grace",
                "password": "password1",
                "confirm_password": "password2",
                "captcha_id": captcha_id,
                "captcha": code,
            })
            .to_string(),
        )
        .dispatch()
        .into_json()
        .unwrap();
    assert_ne!(body["status"], 1);

    // Missing captcha.
    let body: serde_json::Value = client
        .post("/api/v1/auth/register")
        .header(ContentType::JSON)
        .body(
            serde_json::json!({
                "username": "grace",
                "password": "password1",
                "confirm_password": "password1",
            })
            .to_string(),
        )
        .dispatch()
        .into_json()
        .unwrap();
    assert_eq!(body["error"], "captcha required");

    // Duplicate account.
    register_and_login(&client, "grace");
    let (captcha_id, code) = solve_captcha(&client);
    let body: serde_json::Value = client
        .post("/api/v1/auth/register")
        .header(ContentType::JSON)
        .body(
            serde_json::json!({
                "username": "grace",
                "password": "password1",
                "confirm_password": "password1",
                "captcha_id": captcha_id,
                "captcha": code,
            })
            .to_string(),
        )
        .dispatch()
        .into_json()
        .unwrap();
    assert_eq!(body["error"], "account already exists");
}

// --- Login failure gating ---

fn attempt_login(
    client: &rocket::local::blocking::Client,
    username: &str,
    password: &str,
    captcha: Option<(String, String)>,
) -> serde_json::Value {
    let mut body = serde_json::json!({"username": username, "password": password});
    if let Some((id, code)) = captcha {
        body["captcha_id"] = id.into();
        body["captcha"] = code.into();
    }
    client
        .post("/api/v1/auth/login")
        .header(ContentType::JSON)
        .body(body.to_string())
        .dispatch()
        .into_json()
        .unwrap()
}

#[test]
fn test_captcha_gated_login_lockout() {
    let client = test_client();
    register_and_login(&client, "victim");

    // Three wrong passwords: the third answer flags the captcha requirement.
    for expected in 1..=3 {
        let body = attempt_login(&client, "victim", "wrong-pass", None);
        assert_ne!(body["status"], 1);
        assert_eq!(body["data"]["fail_times"], expected);
        assert_eq!(body["data"]["need_captcha"], expected >= 3);
    }

    // Fourth attempt without a captcha is refused before the password check.
    let body = attempt_login(&client, "victim", "wrong-pass", None);
    assert_eq!(body["error"], "captcha required");
    assert_eq!(body["data"]["fail_times"], 3);

    // With captchas the counter keeps climbing to the hard limit.
    let body = attempt_login(&client, "victim", "wrong-pass", Some(solve_captcha(&client)));
    assert_eq!(body["data"]["fail_times"], 4);
    let body = attempt_login(&client, "victim", "wrong-pass", Some(solve_captcha(&client)));
    assert_eq!(body["data"]["fail_times"], 5);

    // Locked: even the right password is refused until the counter expires.
    let body = attempt_login(&client, "victim", "password1", Some(solve_captcha(&client)));
    assert_ne!(body["status"], 1);
    assert_eq!(body["data"]["need_captcha"], true);
}

#[test]
fn test_successful_login_clears_the_counter() {
    let client = test_client();
    register_and_login(&client, "bouncy");

    attempt_login(&client, "bouncy", "nope", None);
    attempt_login(&client, "bouncy", "nope", None);
    let body = attempt_login(&client, "bouncy", "password1", None);
    assert_eq!(body["status"], 1);

    // Counter reset: the next failure starts from one again.
    let body = attempt_login(&client, "bouncy", "nope", None);
    assert_eq!(body["data"]["fail_times"], 1);
}

#[test]
fn test_login_unknown_user_counts_failures_too() {
    let client = test_client();
    let body = attempt_login(&client, "nobody", "whatever1", None);
    assert_ne!(body["status"], 1);
    assert_eq!(body["data"]["fail_times"], 1);
}

// --- Tokens ---

#[test]
fn test_requests_without_valid_token_fail_in_envelope() {
    let client = test_client();

    // No token at all.
    let res = client.get("/api/v1/profile/info").dispatch();
    assert_eq!(res.status(), Status::Ok);
    let body: serde_json::Value = res.into_json().unwrap();
    assert_ne!(body["status"], 1);
    assert_eq!(body["error"], "token required");

    // Garbage token.
    let res = client
        .get("/api/v1/profile/info")
        .header(bearer("garbage.token.here"))
        .dispatch();
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["error"], "invalid token");

    // Token in the query string works.
    let (_, token) = register_and_login(&client, "queenie");
    let res = client
        .get(format!("/api/v1/profile/info?token={token}"))
        .dispatch();
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["status"], 1);
}

#[test]
fn test_logout_requires_auth() {
    let client = test_client();
    let (_, token) = register_and_login(&client, "leaver");

    let res = client
        .post("/api/v1/auth/logout")
        .header(bearer(&token))
        .dispatch();
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["status"], 1);

    let res = client.post("/api/v1/auth/logout").dispatch();
    let body: serde_json::Value = res.into_json().unwrap();
    assert_ne!(body["status"], 1);
}
