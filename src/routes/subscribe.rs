use crate::bus::{
    BusChatMessage, BusFriendInvite, CHANNEL_CHAT_MESSAGE, CHANNEL_NOTIFY, HandlerTable,
    PAYLOAD_TYPE_CHAT_MESSAGE, PAYLOAD_TYPE_FRIEND_INVITE,
};
use crate::models::*;
use crate::sessions::{SessionKey, SessionRouter};

use super::WsFrame;

/// Wire the bus into the local connection router. Every instance runs these
/// handlers, so a message published anywhere reaches every online recipient.
pub fn register_handlers(table: &mut HandlerTable, router: SessionRouter) {
    let chat_router = router.clone();
    table.handle(CHANNEL_CHAT_MESSAGE, PAYLOAD_TYPE_CHAT_MESSAGE, move |payload| {
        let msg: BusChatMessage = match payload.decode_data() {
            Ok(msg) => msg,
            Err(err) => {
                log::error!("undecodable chat payload: {err}");
                return;
            }
        };
        // Private messages reach both participants (the sender's other
        // devices included); group messages use the pre-computed targets;
        // world messages broadcast to every attached session.
        let keys: Vec<SessionKey> = match msg.session_type {
            SESSION_TYPE_PRIVATE => {
                vec![msg.receiver_id.into(), msg.sender_id.into()]
            }
            SESSION_TYPE_GROUP => match &msg.publish_targets {
                Some(targets) if !targets.is_empty() => {
                    targets.iter().copied().map(SessionKey::from).collect()
                }
                _ => {
                    log::warn!("group chat payload without publish_targets, dropping");
                    return;
                }
            },
            SESSION_TYPE_WORLD => Vec::new(),
            other => {
                log::warn!("unroutable session type {other}");
                return;
            }
        };
        let frame = WsFrame::new("chat_message", &msg.action_id, &msg);
        chat_router.push_json(&frame, &keys);
    });

    table.handle(CHANNEL_NOTIFY, PAYLOAD_TYPE_FRIEND_INVITE, move |payload| {
        let invite: BusFriendInvite = match payload.decode_data() {
            Ok(invite) => invite,
            Err(err) => {
                log::error!("undecodable invite payload: {err}");
                return;
            }
        };
        // Pending goes to the person being asked; resolutions go back to
        // the inviter.
        let recipient = if invite.status == INVITE_STATUS_PENDING {
            invite.target_id
        } else {
            invite.user_id
        };
        let frame = WsFrame::new("friend_invite", "", &invite);
        router.push_json(&frame, &[SessionKey::from(recipient)]);
    });
}
