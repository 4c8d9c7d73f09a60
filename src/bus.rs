use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use rocket::futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};

use crate::error::{Error, Result};
use crate::models::{ChatMessage, Invite, MessageBody};

// --- Channels and payload types (closed enumerations) ---

pub const CHANNEL_CHAT_MESSAGE: &str = "chat_message";
pub const CHANNEL_NOTIFY: &str = "notify";

pub const PAYLOAD_TYPE_CHAT_MESSAGE: &str = "chat_message";
pub const PAYLOAD_TYPE_FRIEND_INVITE: &str = "friend_invite";

/// Bound on how long a publish may hold up the producing request.
const PUBLISH_TIMEOUT: Duration = Duration::from_secs(5);

/// Wire envelope. `data` is itself JSON-encoded so the dispatcher can route
/// by `type` without parsing the body; handlers decode only their own type.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Payload {
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub channel: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub data: String,
}

impl Payload {
    pub fn decode_data<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_str(&self.data)?)
    }
}

// --- Domain payloads ---

/// Chat event as carried across instances. `publish_targets` is pre-computed
/// by the publisher so subscribers never re-query group membership.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct BusChatMessage {
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub action_id: String,
    pub receiver_id: i64,
    pub session_type: i64,
    #[serde(rename = "type")]
    pub kind: i64,
    pub sender_id: i64,
    pub message_id: i64,
    pub created_at: i64,
    pub body: MessageBody,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub publish_targets: Option<Vec<i64>>,
}

impl BusChatMessage {
    pub fn from_message(
        msg: &ChatMessage,
        action_id: &str,
        publish_targets: Option<Vec<i64>>,
    ) -> Self {
        BusChatMessage {
            action_id: action_id.to_string(),
            receiver_id: msg.receiver_id,
            session_type: msg.session_type,
            kind: msg.kind,
            sender_id: msg.sender_id,
            message_id: msg.message_id,
            created_at: msg.created_at,
            body: msg.body.clone(),
            publish_targets,
        }
    }
}

/// Invite snapshot for the notify channel.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct BusFriendInvite {
    pub id: i64,
    pub user_id: i64,
    pub target_id: i64,
    pub status: i64,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub note: String,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub reply: String,
    pub created_at: i64,
}

impl From<&Invite> for BusFriendInvite {
    fn from(invite: &Invite) -> Self {
        BusFriendInvite {
            id: invite.id,
            user_id: invite.user_id,
            target_id: invite.target_id,
            status: invite.status,
            note: invite.note.clone(),
            reply: invite.reply.clone(),
            created_at: invite.created_at,
        }
    }
}

// --- Broker abstraction ---

/// Named-channel publish/subscribe. Any broker with matching semantics fits.
#[rocket::async_trait]
pub trait Broker: Send + Sync {
    async fn publish(&self, channel: &str, payload: String) -> Result<()>;
    async fn subscribe(&self, channel: &str) -> Result<mpsc::UnboundedReceiver<String>>;
}

/// In-process broker for single-instance deployments and tests.
pub struct LocalBroker {
    tx: broadcast::Sender<(String, String)>,
}

impl Default for LocalBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalBroker {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1024);
        LocalBroker { tx }
    }
}

#[rocket::async_trait]
impl Broker for LocalBroker {
    async fn publish(&self, channel: &str, payload: String) -> Result<()> {
        // No subscribers is fine.
        let _ = self.tx.send((channel.to_string(), payload));
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<mpsc::UnboundedReceiver<String>> {
        let mut source = self.tx.subscribe();
        let channel = channel.to_string();
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            loop {
                match source.recv().await {
                    Ok((ch, payload)) if ch == channel => {
                        if tx.send(payload).is_err() {
                            break;
                        }
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        log::warn!("local broker lagged on {channel}, missed {missed}");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        Ok(rx)
    }
}

/// Redis-backed broker for multi-instance fan-out. The publish connection
/// is established lazily and shared; subscriptions each hold their own.
pub struct RedisBroker {
    client: redis::Client,
    conn: tokio::sync::OnceCell<redis::aio::MultiplexedConnection>,
}

impl RedisBroker {
    pub fn new(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| Error::Invalid(format!("broker url: {e}")))?;
        Ok(RedisBroker {
            client,
            conn: tokio::sync::OnceCell::new(),
        })
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection> {
        let conn = self
            .conn
            .get_or_try_init(|| self.client.get_multiplexed_async_connection())
            .await?;
        Ok(conn.clone())
    }
}

#[rocket::async_trait]
impl Broker for RedisBroker {
    async fn publish(&self, channel: &str, payload: String) -> Result<()> {
        let mut conn = self.connection().await?;
        let _: () = redis::AsyncCommands::publish(&mut conn, channel, payload).await?;
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<mpsc::UnboundedReceiver<String>> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(channel).await?;
        let channel = channel.to_string();
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            let mut stream = pubsub.on_message();
            while let Some(msg) = stream.next().await {
                match msg.get_payload::<String>() {
                    Ok(payload) => {
                        if tx.send(payload).is_err() {
                            break;
                        }
                    }
                    Err(err) => log::warn!("undecodable broker frame on {channel}: {err}"),
                }
            }
            // Dropping tx ends the receiver; the subscriber loop resubscribes.
        });
        Ok(rx)
    }
}

// --- Instance-level pub/sub ---

pub type HandlerFn = Arc<dyn Fn(Payload) + Send + Sync>;

/// Handler registry built at start-up. A (channel, type) pair maps to exactly
/// one handler; later registrations are ignored with a warning.
#[derive(Default)]
pub struct HandlerTable {
    handlers: HashMap<(String, String), HandlerFn>,
}

impl HandlerTable {
    pub fn new() -> Self {
        HandlerTable::default()
    }

    pub fn handle<F>(&mut self, channel: &str, kind: &str, handler: F)
    where
        F: Fn(Payload) + Send + Sync + 'static,
    {
        let key = (channel.to_string(), kind.to_string());
        if self.handlers.contains_key(&key) {
            log::warn!("already subscribed {channel}:{kind}");
            return;
        }
        self.handlers.insert(key, Arc::new(handler));
    }
}

/// One per instance: owns the broker handle, subscribes each channel exactly
/// once and dispatches received payloads to registered handlers.
pub struct PubSub {
    broker: Arc<dyn Broker>,
    handlers: HashMap<(String, String), HandlerFn>,
}

impl PubSub {
    pub fn new(broker: Arc<dyn Broker>, table: HandlerTable) -> Self {
        PubSub {
            broker,
            handlers: table.handlers,
        }
    }

    /// Serialise `data`, wrap it in the envelope and emit. Bounded: a stuck
    /// broker fails the publish instead of parking the request task.
    pub async fn publish<T: Serialize>(&self, channel: &str, kind: &str, data: &T) -> Result<()> {
        let payload = Payload {
            channel: String::new(),
            kind: kind.to_string(),
            data: serde_json::to_string(data)?,
        };
        let raw = serde_json::to_string(&payload)?;
        tokio::time::timeout(PUBLISH_TIMEOUT, self.broker.publish(channel, raw))
            .await
            .map_err(|_| Error::Transient("broker publish timed out".to_string()))?
    }

    pub async fn publish_chat_message(&self, msg: &BusChatMessage) -> Result<()> {
        self.publish(CHANNEL_CHAT_MESSAGE, PAYLOAD_TYPE_CHAT_MESSAGE, msg)
            .await
    }

    pub async fn publish_friend_invite(&self, invite: &BusFriendInvite) -> Result<()> {
        self.publish(CHANNEL_NOTIFY, PAYLOAD_TYPE_FRIEND_INVITE, invite)
            .await
    }

    /// Subscribe every channel with a registered handler and keep the
    /// subscriptions alive. Each received message is dispatched on its own
    /// task, so a panicking handler never tears down the subscription.
    pub async fn start(self: Arc<Self>) -> Result<()> {
        let channels: HashSet<String> =
            self.handlers.keys().map(|(ch, _)| ch.clone()).collect();
        for channel in channels {
            let mut rx = self.broker.subscribe(&channel).await?;
            let pubsub = Arc::clone(&self);
            tokio::spawn(async move {
                loop {
                    while let Some(raw) = rx.recv().await {
                        pubsub.dispatch(&channel, raw);
                    }
                    log::warn!("subscription on {channel} ended, resubscribing");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    match pubsub.broker.subscribe(&channel).await {
                        Ok(new_rx) => rx = new_rx,
                        Err(err) => {
                            log::error!("resubscribe on {channel} failed: {err}")
                        }
                    }
                }
            });
        }
        Ok(())
    }

    fn dispatch(&self, channel: &str, raw: String) {
        let mut payload: Payload = match serde_json::from_str(&raw) {
            Ok(payload) => payload,
            Err(err) => {
                log::error!("undecodable payload on {channel}: {err}");
                return;
            }
        };
        payload.channel = channel.to_string();
        let key = (payload.channel.clone(), payload.kind.clone());
        match self.handlers.get(&key) {
            Some(handler) => {
                let handler = Arc::clone(handler);
                tokio::spawn(async move { handler(payload) });
            }
            None => log::warn!("no handler for {}:{}", key.0, key.1),
        }
    }
}
