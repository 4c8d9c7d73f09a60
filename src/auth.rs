use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// Consecutive wrong passwords after which login is refused outright.
pub const MAX_LOGIN_FAIL_TIMES: u32 = 5;

/// Consecutive wrong passwords after which a captcha becomes mandatory.
pub const NEED_CAPTCHA_FAIL_TIMES: u32 = 3;

/// Max age of the login failure counter.
const FAIL_WINDOW: Duration = Duration::from_secs(5 * 60);

const CAPTCHA_TTL: Duration = Duration::from_secs(5 * 60);
const CAPTCHA_LEN: usize = 4;

const TOKEN_TTL_SECS: i64 = 24 * 60 * 60;

// Extra pepper on top of the per-user salt-free hash. Must never change once
// accounts exist.
const PASSWORD_PEPPER: &str = "relay-im/credential-pepper";

// --- Bearer tokens ---

#[derive(Debug, Serialize, Deserialize)]
pub struct UserClaims {
    pub user_id: i64,
    pub exp: i64,
}

pub fn sign_token(user_id: i64, signing_key: &str) -> Result<String> {
    let claims = UserClaims {
        user_id,
        exp: chrono::Utc::now().timestamp() + TOKEN_TTL_SECS,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(signing_key.as_bytes()),
    )
    .map_err(|e| Error::Internal(format!("token signing: {e}")))
}

/// Verify signature and expiry, returning the embedded user id.
pub fn verify_token(token: &str, signing_key: &str) -> Result<i64> {
    decode::<UserClaims>(
        token,
        &DecodingKey::from_secret(signing_key.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims.user_id)
    .map_err(|_| Error::Forbidden("invalid token".to_string()))
}

// --- Credentials ---

fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Double SHA-256 over the peppered password.
pub fn password_hash(password: &str) -> String {
    let first = sha256_hex(format!("{password}{PASSWORD_PEPPER}").as_bytes());
    sha256_hex(first.as_bytes())
}

// --- Captcha ---

/// One-shot captcha store: id → expected code with a TTL. The rendered
/// challenge is a base64 SVG; anything fancier is an external concern.
pub struct CaptchaStore {
    entries: Mutex<HashMap<String, (String, Instant)>>,
}

impl Default for CaptchaStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptchaStore {
    pub fn new() -> Self {
        CaptchaStore {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Issue a new challenge: (captcha_id, base64-encoded SVG image).
    pub fn generate(&self) -> (String, String) {
        let mut rng = rand::thread_rng();
        let code: String = (0..CAPTCHA_LEN)
            .map(|_| char::from(b'0' + rng.gen_range(0..10)))
            .collect();
        let id = uuid::Uuid::new_v4().to_string();

        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.retain(|_, (_, created)| created.elapsed() < CAPTCHA_TTL);
        entries.insert(id.clone(), (code.clone(), Instant::now()));

        (id, BASE64.encode(render_svg(&code)))
    }

    /// Check an answer. The challenge is consumed whether or not it matched.
    pub fn verify(&self, id: &str, answer: &str) -> bool {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        match entries.remove(id) {
            Some((code, created)) if created.elapsed() < CAPTCHA_TTL => {
                code.eq_ignore_ascii_case(answer.trim())
            }
            _ => false,
        }
    }
}

fn render_svg(code: &str) -> String {
    format!(
        "<svg xmlns=\"http://www.w3.org/2000/svg\" width=\"120\" height=\"44\">\
         <rect width=\"120\" height=\"44\" fill=\"#f2f2f2\"/>\
         <text x=\"60\" y=\"30\" font-size=\"26\" letter-spacing=\"6\" \
         text-anchor=\"middle\" font-family=\"monospace\">{code}</text></svg>"
    )
}

// --- Login failure tracking ---

/// Per-username failure counter with a five-minute lifetime.
pub struct LoginGuard {
    fails: Mutex<HashMap<String, (u32, Instant)>>,
}

impl Default for LoginGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl LoginGuard {
    pub fn new() -> Self {
        LoginGuard {
            fails: Mutex::new(HashMap::new()),
        }
    }

    pub fn fail_times(&self, username: &str) -> u32 {
        let mut fails = self.fails.lock().unwrap_or_else(|e| e.into_inner());
        match fails.get(username) {
            Some((count, last)) if last.elapsed() < FAIL_WINDOW => *count,
            Some(_) => {
                fails.remove(username);
                0
            }
            None => 0,
        }
    }

    /// Record one wrong password and return the updated count.
    pub fn record_failure(&self, username: &str) -> u32 {
        let mut fails = self.fails.lock().unwrap_or_else(|e| e.into_inner());
        let entry = match fails.get(username) {
            Some((count, last)) if last.elapsed() < FAIL_WINDOW => (*count + 1, Instant::now()),
            _ => (1, Instant::now()),
        };
        fails.insert(username.to_string(), entry);
        entry.0
    }

    pub fn clear(&self, username: &str) {
        let mut fails = self.fails.lock().unwrap_or_else(|e| e.into_inner());
        fails.remove(username);
    }
}
