//! The hub: registry of live rooms.
//!
//! One process-wide task owns the `documentId → room` map and serves
//! registration and unregistration strictly in series. That serialization is
//! the whole point: "registration creates the room" can never race
//! "unregistration removes it", so checking for emptiness after an
//! unregistration needs no lock on the map.

use std::collections::HashMap;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use crate::room::{self, ClientHandle, Registration, RoomHandle, RoomMessage, Unregistration};
use crate::services::Services;

/// Errors surfaced to sessions by hub operations.
#[derive(Debug, Error)]
pub enum HubError {
    /// The hub task is no longer running.
    #[error("hub is not running")]
    Closed,

    /// The room's handler task went away mid-registration.
    #[error("room handler is not running")]
    RoomClosed,
}

/// Handle to the hub task.
///
/// Cheap to clone; one per session plus one for the accept loop.
#[derive(Debug, Clone)]
pub struct HubHandle {
    register: mpsc::Sender<Registration>,
    unregister: mpsc::Sender<Unregistration>,
}

/// The hub itself; only [`Hub::spawn`] is public.
pub struct Hub;

impl Hub {
    /// Spawn the hub task and return its handle.
    pub fn spawn(services: Services) -> HubHandle {
        let (register_tx, register_rx) = mpsc::channel(1);
        let (unregister_tx, unregister_rx) = mpsc::channel(1);

        tokio::spawn(run_hub(services, register_rx, unregister_rx));

        HubHandle { register: register_tx, unregister: unregister_tx }
    }
}

impl HubHandle {
    /// Attach a client to its document's room, creating the room on demand.
    ///
    /// Returns the room's message handler once the client is a member; every
    /// subsequent frame from the session is forwarded there.
    pub async fn register(
        &self,
        client: ClientHandle,
    ) -> Result<mpsc::Sender<RoomMessage>, HubError> {
        let (done_tx, done_rx) = oneshot::channel();

        self.register
            .send(Registration { client, done: done_tx })
            .await
            .map_err(|_| HubError::Closed)?;

        let attachment = done_rx.await.map_err(|_| HubError::RoomClosed)?;
        Ok(attachment.handler)
    }

    /// Detach a client from its document's room.
    ///
    /// Returns once the client is no longer a member. Unregistering from an
    /// unknown room is a no-op. The hub reaps the room when its last member
    /// leaves.
    pub async fn unregister(&self, client: ClientHandle) -> Result<(), HubError> {
        let (done_tx, done_rx) = oneshot::channel();

        self.unregister
            .send(Unregistration { client, done: done_tx })
            .await
            .map_err(|_| HubError::Closed)?;

        done_rx.await.map_err(|_| HubError::Closed)?;
        Ok(())
    }
}

/// The hub's serial register/unregister loop.
async fn run_hub(
    services: Services,
    mut register_rx: mpsc::Receiver<Registration>,
    mut unregister_rx: mpsc::Receiver<Unregistration>,
) {
    let mut rooms: HashMap<String, RoomHandle> = HashMap::new();

    loop {
        tokio::select! {
            registration = register_rx.recv() => {
                let Some(registration) = registration else { break };
                handle_register(&services, &mut rooms, registration).await;
            },

            unregistration = unregister_rx.recv() => {
                let Some(unregistration) = unregistration else { break };
                handle_unregister(&mut rooms, unregistration).await;
            },
        }
    }

    tracing::debug!("hub stopped");
}

async fn handle_register(
    services: &Services,
    rooms: &mut HashMap<String, RoomHandle>,
    registration: Registration,
) {
    let document_id = registration.client.document_id.clone();

    let room = rooms
        .entry(document_id.clone())
        .or_insert_with(|| {
            tracing::debug!(document_id = %document_id, "creating room");
            room::spawn_room(services.clone(), document_id.clone())
        })
        .clone();

    // The room acks the registration itself; if its task is gone the
    // caller's done channel drops and the session sees the failure.
    if room.register.send(registration).await.is_err() {
        tracing::warn!(document_id = %document_id, "room handler gone; removing room");
        rooms.remove(&document_id);
    }
}

async fn handle_unregister(
    rooms: &mut HashMap<String, RoomHandle>,
    unregistration: Unregistration,
) {
    let document_id = unregistration.client.document_id.clone();
    let caller_done = unregistration.done;

    let Some(room) = rooms.get(&document_id) else {
        let _ = caller_done.send(0);
        return;
    };

    let (done_tx, done_rx) = oneshot::channel();
    let request = Unregistration { client: unregistration.client, done: done_tx };

    let remaining = if room.unregister.send(request).await.is_err() {
        // Room task died; treat as empty.
        0
    } else {
        done_rx.await.unwrap_or(0)
    };

    // No registration can run until this branch finishes, so the emptiness
    // check cannot race a concurrent join.
    if remaining == 0 {
        tracing::debug!(document_id = %document_id, "removing room");
        rooms.remove(&document_id);
    }

    let _ = caller_done.send(remaining);
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use tokio::sync::mpsc;

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

    fn client(user: &str, document: &str) -> (ClientHandle, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(8);
        (ClientHandle::new(user, document, tx), rx)
    }

    #[tokio::test]
    async fn register_attaches_and_returns_a_handler() {
        let hub = Hub::spawn(services());
        let (client, _rx) = client("user-1", "doc-1");

        let handler = hub.register(client.clone()).await.expect("register failed");
        assert!(!handler.is_closed());

        hub.unregister(client).await.expect("unregister failed");
    }

    #[tokio::test]
    async fn unregister_of_unknown_room_is_a_noop() {
        let hub = Hub::spawn(services());
        let (client1, _rx) = client("user-1", "never-registered");

        hub.unregister(client1).await.expect("noop unregister failed");

        // Hub still serves registrations afterwards.
        let (client2, _rx2) = client("user-2", "doc-1");
        hub.register(client2).await.expect("register after noop unregister failed");
    }

    #[tokio::test]
    async fn last_unregister_reaps_the_room() {
        let hub = Hub::spawn(services());

        let (first, _rx1) = client("user-1", "doc-1");
        let (second, _rx2) = client("user-2", "doc-1");

        let first_handler = hub.register(first.clone()).await.expect("register failed");
        hub.register(second.clone()).await.expect("register failed");

        hub.unregister(second).await.expect("unregister failed");

        // One member left: the room survives and its handler stays open.
        assert!(!first_handler.is_closed());

        hub.unregister(first).await.expect("unregister failed");

        // Room is gone; its handler closes once the hub drops its handle.
        tokio::time::timeout(Duration::from_secs(1), first_handler.closed())
            .await
            .expect("room handler should close after reaping");
    }

    #[tokio::test]
    async fn registering_the_same_client_twice_keeps_one_membership() {
        let hub = Hub::spawn(services());
        let (client, _rx) = client("user-1", "doc-1");

        hub.register(client.clone()).await.expect("first register failed");
        let handler = hub.register(client.clone()).await.expect("second register failed");

        // A single unregister empties the room: the handler closes, which
        // it would not if a duplicate membership were left behind.
        hub.unregister(client).await.expect("unregister failed");
        tokio::time::timeout(Duration::from_secs(1), handler.closed())
            .await
            .expect("room handler should close after the only client left");
    }

    #[tokio::test]
    async fn rooms_are_recreated_after_reaping() {
        let hub = Hub::spawn(services());

        let (first, _rx1) = client("user-1", "doc-1");
        hub.register(first.clone()).await.expect("register failed");
        hub.unregister(first).await.expect("unregister failed");

        // The next registration for the document creates a fresh room.
        let (second, _rx2) = client("user-2", "doc-1");
        let handler = hub.register(second).await.expect("register failed");
        assert!(!handler.is_closed());
    }
}
