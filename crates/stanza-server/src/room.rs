//! Per-document rooms.
//!
//! A room is the serialization point for one document: a single task owns
//! the version counter, the schema blob and the client set, and multiplexes
//! five inbound channels - register, unregister, broadcast, notify and the
//! message handler. Exactly one inbound item is processed at a time, so room
//! state needs no locking.
//!
//! The notify and broadcast channels are buffered: a message handler must be
//! able to enqueue a broadcast for the *next* loop iteration while the loop
//! is still busy with the current message. Register, unregister and handler
//! are rendezvous-like so senders observe backpressure from the room.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::value::RawValue;
use stanza_core::Permission;
use stanza_proto::MessageType;
use tokio::sync::{mpsc, oneshot};

use crate::collab;
use crate::services::Services;

/// Sentinel version of a room no client has initialized yet.
pub(crate) const UNINITIALIZED: i64 = -1;

/// Buffer size of the notify and broadcast channels.
const FANOUT_BUFFER: usize = 50;

/// Monotonic source of session-unique client ids.
static NEXT_CLIENT_ID: AtomicU64 = AtomicU64::new(0);

/// A client as seen by the hub and its room.
///
/// This is a capability handle, not the session itself: it carries the
/// client's identity and the sending half of its outbound queue. Clones
/// refer to the same session.
#[derive(Debug, Clone)]
pub struct ClientHandle {
    id: u64,

    /// Authenticated user behind the socket.
    pub user_id: String,

    /// Document the client registered for.
    pub document_id: String,

    /// Schema blob the client reported at init; opaque.
    pub schema: Option<Box<RawValue>>,

    /// Outbound message queue, drained by the session's send task.
    pub outbound: mpsc::Sender<String>,
}

impl ClientHandle {
    /// Create a handle with a fresh session-unique id.
    pub fn new(
        user_id: impl Into<String>,
        document_id: impl Into<String>,
        outbound: mpsc::Sender<String>,
    ) -> Self {
        Self {
            id: NEXT_CLIENT_ID.fetch_add(1, Ordering::Relaxed),
            user_id: user_id.into(),
            document_id: document_id.into(),
            schema: None,
            outbound,
        }
    }

    /// Session-unique id; distinguishes two sockets of the same user.
    pub fn id(&self) -> u64 {
        self.id
    }
}

/// A request to join a room.
///
/// The `done` half is signalled once the client is a member, which is what
/// makes hub registration synchronous for the caller.
#[derive(Debug)]
pub struct Registration {
    /// The client joining.
    pub client: ClientHandle,

    /// Signalled with the room attachment once the client is a member.
    pub done: oneshot::Sender<RoomAttachment>,
}

/// What a room reports back after a registration.
#[derive(Debug)]
pub struct RoomAttachment {
    /// Member count after the join.
    pub members: usize,

    /// The room's message handler; sessions forward inbound frames here.
    pub handler: mpsc::Sender<RoomMessage>,
}

/// A request to leave a room.
///
/// Acknowledged with the member count after the removal; the hub reaps the
/// room at zero.
#[derive(Debug)]
pub struct Unregistration {
    /// The client leaving.
    pub client: ClientHandle,

    /// Signalled with the remaining member count.
    pub done: oneshot::Sender<usize>,
}

/// A broadcast to every member except one.
#[derive(Debug)]
pub struct NotifyMessage {
    /// Client id to skip (usually the originator).
    pub exclude: u64,

    /// Encoded frame to deliver.
    pub payload: String,
}

/// A decoded inbound frame enriched with session context.
#[derive(Debug)]
pub struct RoomMessage {
    /// Triage discriminant.
    pub kind: MessageType,

    /// Raw payload as received.
    pub payload: Option<Box<RawValue>>,

    /// Document the sending session registered for.
    pub document_id: String,

    /// Authenticated user behind the session.
    pub user_id: String,

    /// Permission resolved at init.
    pub permission: Permission,

    /// Private reply queue of the sending session.
    pub reply: mpsc::Sender<String>,
}

/// Sending halves of a room's five inbound channels.
#[derive(Debug, Clone)]
pub(crate) struct RoomHandle {
    pub(crate) register: mpsc::Sender<Registration>,
    pub(crate) unregister: mpsc::Sender<Unregistration>,
    #[allow(dead_code)]
    pub(crate) broadcast: mpsc::Sender<String>,
    #[allow(dead_code)]
    pub(crate) notify: mpsc::Sender<NotifyMessage>,
    pub(crate) handler: mpsc::Sender<RoomMessage>,
}

/// Room state, owned exclusively by the room task.
pub(crate) struct RoomState {
    pub(crate) document_id: String,
    pub(crate) version: i64,
    pub(crate) schema: Option<Box<RawValue>>,
    pub(crate) clients: HashMap<u64, ClientHandle>,

    /// The room's own broadcast sender; handlers enqueue here.
    pub(crate) broadcast: mpsc::Sender<String>,
}

impl RoomState {
    pub(crate) fn new(document_id: String, broadcast: mpsc::Sender<String>) -> Self {
        Self {
            document_id,
            version: UNINITIALIZED,
            schema: None,
            clients: HashMap::new(),
            broadcast,
        }
    }

    /// Write a frame to every member's outbound queue.
    async fn deliver_all(&self, payload: &str) {
        for client in self.clients.values() {
            if client.outbound.send(payload.to_string()).await.is_err() {
                tracing::debug!(
                    user_id = %client.user_id,
                    "dropping broadcast for closed client"
                );
            }
        }
    }

    /// Write a frame to every member's outbound queue except one.
    async fn deliver_except(&self, exclude: u64, payload: &str) {
        for client in self.clients.values() {
            if client.id == exclude {
                continue;
            }
            if client.outbound.send(payload.to_string()).await.is_err() {
                tracing::debug!(
                    user_id = %client.user_id,
                    "dropping notify for closed client"
                );
            }
        }
    }
}

/// Spawn a room's serial handler task and return its channel handle.
pub(crate) fn spawn_room(services: Services, document_id: String) -> RoomHandle {
    let (register_tx, register_rx) = mpsc::channel(1);
    let (unregister_tx, unregister_rx) = mpsc::channel(1);
    let (broadcast_tx, broadcast_rx) = mpsc::channel(FANOUT_BUFFER);
    let (notify_tx, notify_rx) = mpsc::channel(FANOUT_BUFFER);
    let (handler_tx, handler_rx) = mpsc::channel(1);

    let state = RoomState::new(document_id, broadcast_tx.clone());

    tokio::spawn(run_room(
        services,
        state,
        register_rx,
        unregister_rx,
        broadcast_rx,
        notify_rx,
        handler_rx,
        handler_tx.clone(),
    ));

    RoomHandle {
        register: register_tx,
        unregister: unregister_tx,
        broadcast: broadcast_tx,
        notify: notify_tx,
        handler: handler_tx,
    }
}

/// The room's serial handler loop.
///
/// Exits when the hub has dropped its handle (the register channel closes);
/// at that point the client set is empty and nothing else can arrive.
#[allow(clippy::too_many_arguments)]
async fn run_room(
    services: Services,
    mut state: RoomState,
    mut register_rx: mpsc::Receiver<Registration>,
    mut unregister_rx: mpsc::Receiver<Unregistration>,
    mut broadcast_rx: mpsc::Receiver<String>,
    mut notify_rx: mpsc::Receiver<NotifyMessage>,
    mut handler_rx: mpsc::Receiver<RoomMessage>,
    handler_tx: mpsc::Sender<RoomMessage>,
) {
    loop {
        tokio::select! {
            registration = register_rx.recv() => {
                let Some(registration) = registration else { break };

                let user_id = registration.client.user_id.clone();
                state.clients.insert(registration.client.id(), registration.client);

                let _ = registration.done.send(RoomAttachment {
                    members: state.clients.len(),
                    handler: handler_tx.clone(),
                });

                tracing::debug!(
                    document_id = %state.document_id,
                    user_id = %user_id,
                    members = state.clients.len(),
                    "client joined room"
                );
            },

            unregistration = unregister_rx.recv() => {
                let Some(unregistration) = unregistration else { break };

                state.clients.remove(&unregistration.client.id());

                let _ = unregistration.done.send(state.clients.len());

                tracing::debug!(
                    document_id = %state.document_id,
                    user_id = %unregistration.client.user_id,
                    members = state.clients.len(),
                    "client left room"
                );
            },

            payload = broadcast_rx.recv() => {
                let Some(payload) = payload else { break };
                state.deliver_all(&payload).await;
            },

            notify = notify_rx.recv() => {
                let Some(notify) = notify else { break };
                state.deliver_except(notify.exclude, &notify.payload).await;
            },

            message = handler_rx.recv() => {
                let Some(message) = message else { break };
                handle_message(&services, &mut state, message).await;
            },
        }
    }

    tracing::debug!(document_id = %state.document_id, "room handler stopped");
}

/// Triage one inbound message.
///
/// Anything below edit permission is dropped here; init resolves permission
/// before the message ever reaches the room (see the client session).
async fn handle_message(services: &Services, state: &mut RoomState, message: RoomMessage) {
    if message.permission != Permission::Edit {
        tracing::debug!(
            user_id = %message.user_id,
            permission = %message.permission,
            "permission denied"
        );
        return;
    }

    match message.kind {
        MessageType::Init => {
            tracing::debug!(document_id = %state.document_id, "handle prosemirror init");
            collab::handle_init(services, state, &message).await;
            // Run the submission path against the same payload so a joining
            // client is offered the steps it is missing right away.
            collab::handle_steps(services, state, &message, true).await;
        },

        MessageType::Update | MessageType::Steps => {
            tracing::debug!(document_id = %state.document_id, "handle prosemirror steps");
            collab::handle_steps(services, state, &message, false).await;
        },

        // Reserved; no core behavior.
        MessageType::Approval => {},

        // Server-to-client or unrecognized; nothing to do.
        MessageType::Reload | MessageType::Unknown => {},
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use tokio::sync::{mpsc, oneshot};

    use super::*;
    use crate::image::MemoryImageService;
    use crate::repository::MemoryRepository;
    use crate::step_log::{MemoryStepLog, STEP_LOG_TTL};

    fn services() -> Services {
        Services::new(
            Arc::new(MemoryStepLog::new(STEP_LOG_TTL)),
            Arc::new(MemoryRepository::new()),
            Arc::new(MemoryImageService::new()),
        )
    }

    async fn join(room: &RoomHandle, user: &str) -> (ClientHandle, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(8);
        let client = ClientHandle::new(user, "doc-1", tx);

        let (done_tx, done_rx) = oneshot::channel();
        room.register
            .send(Registration { client: client.clone(), done: done_tx })
            .await
            .expect("register send failed");
        done_rx.await.expect("registration not acknowledged");

        (client, rx)
    }

    async fn recv(rx: &mut mpsc::Receiver<String>) -> String {
        tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("timed out waiting for a frame")
            .expect("outbound queue closed")
    }

    #[tokio::test]
    async fn broadcast_reaches_every_member() {
        let room = spawn_room(services(), "doc-1".to_string());

        let (_alice, mut alice_rx) = join(&room, "alice").await;
        let (_bob, mut bob_rx) = join(&room, "bob").await;

        room.broadcast.send("hello".to_string()).await.expect("broadcast send failed");

        assert_eq!(recv(&mut alice_rx).await, "hello");
        assert_eq!(recv(&mut bob_rx).await, "hello");
    }

    #[tokio::test]
    async fn notify_skips_the_excluded_client() {
        let room = spawn_room(services(), "doc-1".to_string());

        let (alice, mut alice_rx) = join(&room, "alice").await;
        let (_bob, mut bob_rx) = join(&room, "bob").await;

        room.notify
            .send(NotifyMessage { exclude: alice.id(), payload: "psst".to_string() })
            .await
            .expect("notify send failed");

        assert_eq!(recv(&mut bob_rx).await, "psst");

        // Alice sees the next broadcast but never the notify.
        room.broadcast.send("all".to_string()).await.expect("broadcast send failed");
        assert_eq!(recv(&mut alice_rx).await, "all");
    }

    #[tokio::test]
    async fn unregistered_clients_stop_receiving() {
        let room = spawn_room(services(), "doc-1".to_string());

        let (alice, mut alice_rx) = join(&room, "alice").await;
        let (_bob, mut bob_rx) = join(&room, "bob").await;

        let (done_tx, done_rx) = oneshot::channel();
        room.unregister
            .send(Unregistration { client: alice, done: done_tx })
            .await
            .expect("unregister send failed");
        assert_eq!(done_rx.await.expect("unregistration not acknowledged"), 1);

        room.broadcast.send("after".to_string()).await.expect("broadcast send failed");

        assert_eq!(recv(&mut bob_rx).await, "after");
        assert!(alice_rx.try_recv().is_err());
    }
}
