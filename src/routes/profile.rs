use rocket::get;
use rocket::serde::json::Json;

use crate::models::ApiResponse;

use super::{AuthGuard, RequestId, ok};

/// Current user's own profile, credential hash excluded.
#[get("/api/v1/profile/info")]
pub fn profile_info(rid: RequestId, auth: AuthGuard) -> Json<ApiResponse> {
    match auth.user(&rid) {
        Ok(user) => ok(&rid, user.public()),
        Err(resp) => resp,
    }
}
