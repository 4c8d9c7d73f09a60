use rocket::futures::{SinkExt, StreamExt};
use rocket::serde::json::Json;
use rocket::{State, get};
use rocket_ws as ws;
use tokio::sync::mpsc;

use crate::models::ApiResponse;
use crate::sessions::{Session, SessionKey, SessionRouter};

use super::{AuthGuard, RequestId};

/// Long-lived push channel. The connection is keyed by the authenticated
/// user id; everything the router enqueues for that key is forwarded as a
/// text frame. Inbound traffic is drained only to detect the close.
#[get("/api/v1/ws")]
pub fn ws_connect(
    rid: RequestId,
    auth: AuthGuard,
    router: &State<SessionRouter>,
    ws: ws::WebSocket,
) -> Result<ws::Channel<'static>, Json<ApiResponse>> {
    let user = auth.user(&rid)?;
    let router = router.inner().clone();
    let key = SessionKey::from(user.id);

    Ok(ws.channel(move |stream| {
        Box::pin(async move {
            let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<String>();
            let session = Session::new(outbound_tx);
            let session_id = session.id();
            router.attach(key.clone(), session);

            let (mut sink, mut source) = stream.split();
            loop {
                tokio::select! {
                    queued = outbound_rx.recv() => match queued {
                        Some(text) => {
                            if sink.send(ws::Message::Text(text)).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    },
                    incoming = source.next() => match incoming {
                        Some(Ok(ws::Message::Close(_))) | Some(Err(_)) | None => break,
                        Some(Ok(_)) => {}
                    },
                }
            }

            router.detach(&key, session_id);
            Ok(())
        })
    }))
}
