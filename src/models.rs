use serde::{Deserialize, Serialize};

// --- Enumerations (kept bit/value-compatible with the stores) ---

pub const SESSION_TYPE_PRIVATE: i64 = 1;
pub const SESSION_TYPE_GROUP: i64 = 2;
pub const SESSION_TYPE_WORLD: i64 = 99;

// Message kinds: 1 plain text, 2 image, 3 voice, 4 video, 5 location.
pub const MESSAGE_KIND_PLAIN: i64 = 1;
pub const MESSAGE_KIND_LOCATION: i64 = 5;

pub const MESSAGE_STATUS_NORMAL: i64 = 1;
pub const MESSAGE_STATUS_DELETED: i64 = 2;
pub const MESSAGE_STATUS_ROLLED_BACK: i64 = 3;

pub const USER_STATUS_DISABLED: i64 = 0;
pub const USER_STATUS_ACTIVE: i64 = 1;
pub const USER_STATUS_DELETED: i64 = 2;

pub const INVITE_STATUS_PENDING: i64 = 0;
pub const INVITE_STATUS_ACCEPTED: i64 = 1;
pub const INVITE_STATUS_REJECTED: i64 = 2;

pub const ROLE_NORMAL: i64 = 0;
pub const ROLE_OWNER: i64 = 1;
pub const ROLE_ADMIN: i64 = 2;

/// Both friendship bits set: the pair is mutual.
pub const RELATION_MUTUAL: i64 = 0b11;

/// Current time as epoch milliseconds; every persisted timestamp uses this.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

// --- Users ---

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub password_hash: String,
    pub nickname: String,
    pub avatar: String,
    pub online_status: i64,
    pub status: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

/// What other users (and the profile endpoint) are allowed to see.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct UserPublic {
    pub id: i64,
    pub username: String,
    pub nickname: String,
    pub avatar: String,
    pub online_status: i64,
    pub status: i64,
}

impl User {
    pub fn public(&self) -> UserPublic {
        UserPublic {
            id: self.id,
            username: self.username.clone(),
            nickname: self.nickname.clone(),
            avatar: self.avatar.clone(),
            online_status: self.online_status,
            status: self.status,
        }
    }
}

// --- Friendship ---

/// Stored unordered pair, normalised so `user_a_id < user_b_id`.
/// `status` and `block_status` are 2-bit masks: bit 0b01 belongs to the
/// smaller id (A), bit 0b10 to the larger (B). A status bit set means that
/// side sees the other as a friend; a block bit set means that side has
/// blocked the other.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Relation {
    pub id: i64,
    pub user_a_id: i64,
    pub user_b_id: i64,
    pub status: i64,
    pub block_status: i64,
    pub remark_on_a: String,
    pub remark_on_b: String,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Typed projection of the bit masks from one participant's point of view.
/// Call sites never touch the raw bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelationView {
    pub is_mutual: bool,
    pub i_added_them: bool,
    pub they_added_me: bool,
    pub i_blocked_them: bool,
    pub they_blocked_me: bool,
}

impl Relation {
    /// The mask bit owned by `user_id` in this pair.
    pub fn bit_for(&self, user_id: i64) -> i64 {
        if user_id == self.user_a_id { 0b01 } else { 0b10 }
    }

    pub fn view_for(&self, me: i64) -> RelationView {
        let mine = self.bit_for(me);
        let theirs = mine ^ 0b11;
        RelationView {
            is_mutual: self.status == RELATION_MUTUAL,
            i_added_them: self.status & mine != 0,
            they_added_me: self.status & theirs != 0,
            i_blocked_them: self.block_status & mine != 0,
            they_blocked_me: self.block_status & theirs != 0,
        }
    }

    /// The remark `me` keeps for the other side (A writes `remark_on_b`).
    pub fn remark_of(&self, me: i64) -> &str {
        if me == self.user_a_id {
            &self.remark_on_b
        } else {
            &self.remark_on_a
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Invite {
    pub id: i64,
    pub user_id: i64,
    pub target_id: i64,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub note: String,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub reply: String,
    pub status: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

// --- Groups ---

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Group {
    pub id: i64,
    pub name: String,
    pub max_member: i64,
    pub owner_id: i64,
    pub speak_status: i64,
    pub creator_id: i64,
    pub created_at: i64,
    pub updater_id: i64,
    pub updated_at: i64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GroupMember {
    pub id: i64,
    pub group_id: i64,
    pub user_id: i64,
    pub role: i64,
    pub speak_status: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

// --- Chat ---

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct MessageBody {
    /// Text content. Message kind 1.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub text: Option<String>,
    /// Source URL. Message kinds 2, 3, 4.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub src: Option<String>,
    /// File format. Message kinds 2, 3, 4.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub format: Option<String>,
    /// File size. Message kinds 2, 3, 4.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub size: Option<String>,
    // Location fields. Message kind 5.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub longitude: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub latitude: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub scale: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub location_label: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ChatMessage {
    /// Internal object id (UUID), distinct from the per-room sequence.
    pub id: String,
    pub message_id: i64,
    pub room_id: String,
    #[serde(rename = "type")]
    pub kind: i64,
    pub session_type: i64,
    pub sender_id: i64,
    pub receiver_id: i64,
    pub send_status: i64,
    pub read_status: i64,
    pub status: i64,
    pub body: MessageBody,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ChatRoom {
    pub room_id: String,
    pub session_type: i64,
    pub last_message_id: i64,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub last_message: Option<ChatMessage>,
    pub created_at: i64,
    pub updated_at: i64,
}

// --- Response envelope ---

/// Every handled request answers HTTP 200 with this envelope; clients branch
/// on `status` (1 = OK).
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse {
    pub request_id: String,
    pub status: i64,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub data: Option<serde_json::Value>,
}

pub const STATUS_OK: i64 = 1;
pub const STATUS_ERROR: i64 = 2;

// --- Auth request/response shapes ---

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub password: String,
    pub confirm_password: String,
    #[serde(default)]
    pub captcha_id: String,
    #[serde(default)]
    pub captcha: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub captcha_id: String,
    #[serde(default)]
    pub captcha: String,
}

// --- Chat request/response shapes ---

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SendMessageRequest {
    /// Client-generated correlation id, echoed through the fan-out.
    #[serde(default)]
    pub action_id: String,
    /// Peer user id for private, group id for group, channel id for world.
    pub receiver_id: i64,
    pub session_type: i64,
    #[serde(rename = "type")]
    pub kind: i64,
    pub body: MessageBody,
}

#[derive(Debug, Serialize)]
pub struct SendMessageResponse {
    pub sender_id: i64,
    pub message_id: i64,
    pub created_at: i64,
    #[serde(flatten)]
    pub request: SendMessageRequest,
}

#[derive(Debug, Deserialize)]
pub struct RollbackMessageRequest {
    /// Internal message id (UUID).
    pub message_id: String,
}

#[derive(Debug, Deserialize)]
pub struct DeleteMessageRequest {
    pub message_id: String,
}

// --- Friend request shapes ---

#[derive(Debug, Deserialize)]
pub struct UpdateFriendRequest {
    pub user_id: i64,
    /// Only 0 is accepted: unilateral delete.
    #[serde(default)]
    pub status: Option<i64>,
    /// 1 = block the peer, 0 = unblock.
    #[serde(default)]
    pub block_status: Option<i64>,
    #[serde(default)]
    pub remark: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AddInviteRequest {
    pub user_id: i64,
    #[serde(default)]
    pub note: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateInviteRequest {
    pub id: i64,
    /// 1 = accept, 2 = reject.
    pub status: i64,
    #[serde(default)]
    pub reply: String,
}

// --- Group request shapes ---

#[derive(Debug, Deserialize)]
pub struct CreateGroupRequest {
    pub member_ids: Vec<i64>,
}

#[derive(Debug, Deserialize)]
pub struct JoinGroupRequest {
    pub group_id: i64,
}

#[derive(Debug, Deserialize)]
pub struct UpdateGroupRequest {
    pub group_id: i64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub speak_status: Option<i64>,
    #[serde(default)]
    pub owner_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct AddGroupMembersRequest {
    pub group_id: i64,
    pub user_ids: Vec<i64>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateGroupMemberRequest {
    pub group_id: i64,
    pub user_id: i64,
    /// 0 = demote to normal, 2 = promote to admin. Owner transfer goes
    /// through the group update call instead.
    #[serde(default)]
    pub role: Option<i64>,
    #[serde(default)]
    pub speak_status: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct RemoveGroupMembersRequest {
    pub group_id: i64,
    pub user_ids: Vec<i64>,
}
