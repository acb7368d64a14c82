//! Websocket client sessions.
//!
//! Two tasks per socket: the receive loop (this module's entry point) and a
//! send task draining the session's outbound queue. The receive loop owns
//! the session's lifecycle - it performs the init handshake, resolves
//! permission, registers with the hub and unregisters on any exit path. The
//! send task only writes; a failed or timed-out write is logged and the
//! frame dropped, closing is the receive loop's job.

use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt as _, StreamExt as _};
use stanza_core::{Permission, SessionInfo};
use stanza_proto::payloads::collab::InitPayload;
use stanza_proto::{Envelope, MessageType};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;

use crate::hub::HubHandle;
use crate::room::{ClientHandle, RoomMessage};
use crate::services::Services;

/// Per-write deadline on the send side.
const WRITE_DEADLINE: Duration = Duration::from_secs(10);

/// Run a session until its socket closes.
///
/// Consumes the upgraded websocket; returns once the receive loop exits and
/// the client (if registered) has been detached from its room.
pub async fn run(
    hub: HubHandle,
    services: Services,
    socket: WebSocketStream<TcpStream>,
    session: SessionInfo,
) {
    let (sink, stream) = socket.split();

    // Outbound queue: rooms write into it, the send task drains it. The
    // queue is deliberately tiny - a slow consumer backpressures the room
    // rather than buffering without bound.
    let (outbound_tx, outbound_rx) = mpsc::channel::<String>(1);

    let send_task = tokio::spawn(handle_send(sink, outbound_rx));

    handle_receive(hub, services, stream, session, outbound_tx).await;

    // The receive loop dropped every outbound sender it owned; the send
    // task ends once the room lets go of the client handle too. Nothing to
    // join on: the task cleans itself up.
    drop(send_task);
}

/// The session's receive loop.
async fn handle_receive(
    hub: HubHandle,
    services: Services,
    mut stream: SplitStream<WebSocketStream<TcpStream>>,
    session: SessionInfo,
    outbound_tx: mpsc::Sender<String>,
) {
    let mut client = ClientHandle::new(session.user_id.clone(), String::new(), outbound_tx);
    let mut permission = Permission::None;
    let mut handler: Option<mpsc::Sender<RoomMessage>> = None;

    loop {
        let frame = match stream.next().await {
            Some(Ok(frame)) => frame,
            Some(Err(e)) => {
                tracing::debug!(user_id = %client.user_id, error = %e, "socket read failed");
                break;
            },
            None => {
                tracing::debug!(user_id = %client.user_id, "socket closed");
                break;
            },
        };

        let text = match frame {
            Message::Text(text) => text,
            Message::Close(_) => {
                tracing::debug!(user_id = %client.user_id, "socket closed normally");
                break;
            },
            // Pings are answered by the protocol layer; everything else on
            // this endpoint is text.
            _ => continue,
        };

        let envelope = match Envelope::decode(text.as_str()) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::debug!(
                    user_id = %client.user_id,
                    error = %e,
                    content = %text.as_str(),
                    "could not decode request"
                );
                continue;
            },
        };

        // First init on this socket: resolve the room and the permission.
        if envelope.kind == MessageType::Init && client.document_id.is_empty() {
            match init_session(&hub, &services, &session, &envelope, &mut client).await {
                Ok((resolved, room_handler)) => {
                    permission = resolved;
                    handler = Some(room_handler);
                },
                Err(()) => break,
            }
        }

        // Everything below the edit level is dropped before it can reach a
        // room; an unregistered socket ends here as well.
        if permission == Permission::None {
            tracing::debug!(user_id = %client.user_id, "permission denied, message not handled");
            break;
        }

        let Some(room_handler) = handler.as_ref() else {
            continue;
        };

        let message = RoomMessage {
            kind: envelope.kind,
            payload: envelope.payload,
            document_id: client.document_id.clone(),
            user_id: client.user_id.clone(),
            permission,
            reply: client.outbound.clone(),
        };

        if room_handler.send(message).await.is_err() {
            tracing::debug!(user_id = %client.user_id, "room handler closed");
            break;
        }
    }

    if handler.is_some() {
        if let Err(e) = hub.unregister(client.clone()).await {
            tracing::debug!(user_id = %client.user_id, error = %e, "could not unregister client");
        }
    }
}

/// Handle the first init of a socket: record the document, resolve
/// permission, register with the hub.
///
/// `Err(())` means the socket must be closed without registering.
async fn init_session(
    hub: &HubHandle,
    services: &Services,
    session: &SessionInfo,
    envelope: &Envelope,
    client: &mut ClientHandle,
) -> Result<(Permission, mpsc::Sender<RoomMessage>), ()> {
    let payload: InitPayload = match envelope.payload_as() {
        Ok(payload) => payload,
        Err(e) => {
            tracing::debug!(user_id = %session.user_id, error = %e, "could not parse init message");
            return Err(());
        },
    };

    client.document_id = payload.document_id.clone();
    client.schema = payload.schema.clone();

    let permission = match services
        .repository
        .fetch_permission(&payload.document_id, &session.user_id)
        .await
    {
        Ok(permission) => permission,
        Err(e) => {
            tracing::debug!(
                user_id = %session.user_id,
                document_id = %payload.document_id,
                error = %e,
                "could not fetch permission for client"
            );
            Permission::None
        },
    };

    if permission == Permission::None {
        tracing::debug!(
            user_id = %session.user_id,
            document_id = %payload.document_id,
            "permission denied, client not registered"
        );
        return Err(());
    }

    let handler = match hub.register(client.clone()).await {
        Ok(handler) => handler,
        Err(e) => {
            tracing::debug!(user_id = %session.user_id, error = %e, "could not register client");
            return Err(());
        },
    };

    tracing::debug!(
        user_id = %session.user_id,
        document_id = %payload.document_id,
        permission = %permission,
        "client registered"
    );

    Ok((permission, handler))
}

/// The session's send loop: drain the outbound queue onto the socket.
async fn handle_send(
    mut sink: SplitSink<WebSocketStream<TcpStream>, Message>,
    mut outbound: mpsc::Receiver<String>,
) {
    while let Some(payload) = outbound.recv().await {
        match tokio::time::timeout(WRITE_DEADLINE, sink.send(Message::text(payload))).await {
            Ok(Ok(())) => {},
            Ok(Err(e)) => tracing::debug!(error = %e, "could not write message"),
            Err(_) => tracing::debug!("write deadline exceeded, message dropped"),
        }
    }
}
