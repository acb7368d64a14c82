//! Websocket transport.
//!
//! Accepts TCP connections, gates the upgrade on the `Session` header and
//! hands upgraded sockets to the client session module. The header is
//! checked inside the handshake callback so a connection without a valid
//! session is rejected *before* the upgrade completes.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use stanza_core::SessionInfo;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::accept_hdr_async_with_config;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;

use crate::client;
use crate::error::ServerError;
use crate::hub::HubHandle;
use crate::services::Services;

/// Per-frame read limit: 3 MB, sized for large paste operations.
const READ_LIMIT: usize = 3_000_000;

/// Accept connections forever, one session task per socket.
pub async fn serve(
    listener: TcpListener,
    hub: HubHandle,
    services: Services,
) -> Result<(), ServerError> {
    let local_addr = listener.local_addr()?;
    tracing::info!(%local_addr, "websocket transport listening");

    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                let hub = hub.clone();
                let services = services.clone();
                tokio::spawn(async move {
                    handle_connection(stream, peer, hub, services).await;
                });
            },
            Err(e) => {
                tracing::error!(error = %e, "accept failed");
            },
        }
    }
}

/// Upgrade one TCP connection and run its session.
async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    hub: HubHandle,
    services: Services,
) {
    // The handshake callback runs synchronously inside the upgrade; the
    // parsed session is passed out through this slot.
    let session_slot: Arc<Mutex<Option<SessionInfo>>> = Arc::new(Mutex::new(None));
    let slot = Arc::clone(&session_slot);

    let callback = move |request: &Request, response: Response| {
        let header = request
            .headers()
            .get("Session")
            .and_then(|value| value.to_str().ok())
            .unwrap_or("");

        match SessionInfo::parse(header) {
            Ok(session) => {
                if let Ok(mut guard) = slot.lock() {
                    *guard = Some(session);
                }
                Ok(response)
            },
            Err(e) => {
                tracing::debug!(%peer, error = %e, "rejecting connection without session");

                let mut reject = ErrorResponse::new(Some(e.to_string()));
                *reject.status_mut() = StatusCode::UNAUTHORIZED;
                Err(reject)
            },
        }
    };

    let config = WebSocketConfig::default()
        .max_message_size(Some(READ_LIMIT))
        .max_frame_size(Some(READ_LIMIT));

    let socket = match accept_hdr_async_with_config(stream, callback, Some(config)).await {
        Ok(socket) => socket,
        Err(e) => {
            tracing::debug!(%peer, error = %e, "websocket handshake failed");
            return;
        },
    };

    let session = session_slot.lock().ok().and_then(|mut guard| guard.take());
    let Some(session) = session else {
        tracing::debug!(%peer, "handshake completed without session information");
        return;
    };

    tracing::debug!(%peer, user_id = %session.user_id, "connection established");

    client::run(hub, services, socket, session).await;
}
