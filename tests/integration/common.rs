use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use rocket::http::{ContentType, Header};
use rocket::local::blocking::Client;

/// Wrapper around Client that auto-deletes the temp DB on drop.
/// Uses Option<Client> so we can drop the SQLite connection before deleting
/// the file (WAL mode holds it open).
pub struct TestClient {
    client: Option<Client>,
    db_path: String,
}

impl Drop for TestClient {
    fn drop(&mut self) {
        drop(self.client.take());
        let _ = std::fs::remove_file(&self.db_path);
        let _ = std::fs::remove_file(format!("{}-wal", self.db_path));
        let _ = std::fs::remove_file(format!("{}-shm", self.db_path));
    }
}

impl std::ops::Deref for TestClient {
    type Target = Client;
    fn deref(&self) -> &Client {
        self.client.as_ref().unwrap()
    }
}

pub fn test_client() -> TestClient {
    // Unique temp DB for each test (avoids parallel test contention)
    let db_path = format!(
        "/tmp/relay_test_{}.db",
        uuid::Uuid::new_v4().to_string().split('-').next().unwrap()
    );

    let rocket = relay_im::rocket_with_db(&db_path);
    let client = Client::tracked(rocket).expect("valid rocket instance");
    TestClient {
        client: Some(client),
        db_path,
    }
}

/// Fetch a captcha challenge and read the digits back out of the SVG.
pub fn solve_captcha(client: &Client) -> (String, String) {
    let res = client.get("/api/v1/auth/captcha").dispatch();
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["status"], 1);
    let captcha_id = body["data"]["captcha_id"].as_str().unwrap().to_string();
    let svg_bytes = BASE64
        .decode(body["data"]["data"].as_str().unwrap())
        .unwrap();
    let svg = String::from_utf8(svg_bytes).unwrap();
    let start = svg.find("monospace\">").unwrap() + "monospace\">".len();
    let end = svg[start..].find('<').unwrap();
    (captcha_id, svg[start..start + end].to_string())
}

/// Register a fresh user and log them in. Returns (user_id, token).
pub fn register_and_login(client: &Client, username: &str) -> (i64, String) {
    let (captcha_id, code) = solve_captcha(client);
    let res = client
        .post("/api/v1/auth/register")
        .header(ContentType::JSON)
        .body(
            serde_json::json!({
                "username": username,
                "password": "password1",
                "confirm_password": "password1",
                "captcha_id": captcha_id,
                "captcha": code,
            })
            .to_string(),
        )
        .dispatch();
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["status"], 1, "register failed: {body}");
    let user_id = body["data"]["user_id"].as_i64().unwrap();

    let res = client
        .post("/api/v1/auth/login")
        .header(ContentType::JSON)
        .body(
            serde_json::json!({"username": username, "password": "password1"}).to_string(),
        )
        .dispatch();
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["status"], 1, "login failed: {body}");
    let token = body["data"]["token"].as_str().unwrap().to_string();
    (user_id, token)
}

pub fn bearer(token: &str) -> Header<'static> {
    Header::new("Authorization", format!("Bearer {token}"))
}

/// POST a JSON body with auth and return the decoded envelope.
pub fn post_json(
    client: &Client,
    token: &str,
    path: &str,
    body: serde_json::Value,
) -> serde_json::Value {
    client
        .post(path.to_string())
        .header(ContentType::JSON)
        .header(bearer(token))
        .body(body.to_string())
        .dispatch()
        .into_json()
        .unwrap()
}

pub fn get_json(client: &Client, token: &str, path: &str) -> serde_json::Value {
    client
        .get(path.to_string())
        .header(bearer(token))
        .dispatch()
        .into_json()
        .unwrap()
}

/// Make two users mutual friends through the invite flow.
pub fn make_friends(
    client: &Client,
    inviter_token: &str,
    target_token: &str,
    target_id: i64,
) {
    let body = post_json(
        client,
        inviter_token,
        "/api/v1/friend/invite/add",
        serde_json::json!({"user_id": target_id, "note": "hi"}),
    );
    assert_eq!(body["status"], 1, "invite failed: {body}");
    let invite_id = body["data"]["invite_id"].as_i64().unwrap();

    let body = post_json(
        client,
        target_token,
        "/api/v1/friend/invite/update",
        serde_json::json!({"id": invite_id, "status": 1, "reply": "sure"}),
    );
    assert_eq!(body["status"], 1, "accept failed: {body}");
}
