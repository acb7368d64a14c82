//! Room flow tests through the hub.
//!
//! These drive real hub and room tasks over their channels, with fake
//! clients standing in for sockets: each "client" is a registered handle
//! plus the receiving half of its outbound queue.

use std::sync::Arc;
use std::time::Duration;

use serde_json::value::RawValue;
use stanza_core::Permission;
use stanza_proto::payloads::collab::StepsResponse;
use stanza_proto::{Envelope, MessageType};
use stanza_server::image::MemoryImageService;
use stanza_server::repository::MemoryRepository;
use stanza_server::step_log::{MemoryStepLog, STEP_LOG_TTL};
use stanza_server::{ClientHandle, Hub, HubHandle, RoomMessage, Services};
use tokio::sync::mpsc;

struct TestClient {
    handle: ClientHandle,
    handler: mpsc::Sender<RoomMessage>,
    inbox: mpsc::Receiver<String>,
}

impl TestClient {
    /// Send a frame the way the receive loop would after init.
    async fn send(&self, kind: MessageType, payload: &str) {
        let message = RoomMessage {
            kind,
            payload: Some(
                RawValue::from_string(payload.to_string()).expect("payload must be valid JSON"),
            ),
            document_id: self.handle.document_id.clone(),
            user_id: self.handle.user_id.clone(),
            permission: Permission::Edit,
            reply: self.handle.outbound.clone(),
        };
        self.handler.send(message).await.expect("room handler closed");
    }

    /// Next frame on this client's outbound queue.
    async fn next_frame(&mut self) -> String {
        tokio::time::timeout(Duration::from_secs(2), self.inbox.recv())
            .await
            .expect("timed out waiting for a frame")
            .expect("outbound queue closed")
    }

    async fn next_steps(&mut self) -> StepsResponse {
        let frame = self.next_frame().await;
        let envelope = Envelope::decode(&frame).expect("frame must decode");
        assert_eq!(envelope.kind, MessageType::Steps);
        envelope.payload_as().expect("steps payload must decode")
    }
}

fn test_services() -> Services {
    Services::new(
        Arc::new(MemoryStepLog::new(STEP_LOG_TTL)),
        Arc::new(MemoryRepository::new()),
        Arc::new(MemoryImageService::new()),
    )
}

async fn join(hub: &HubHandle, user: &str, document: &str) -> TestClient {
    let (tx, inbox) = mpsc::channel(16);
    let handle = ClientHandle::new(user, document, tx);
    let handler = hub.register(handle.clone()).await.expect("register failed");
    TestClient { handle, handler, inbox }
}

#[tokio::test]
async fn accepted_batch_round_trips_to_the_sender_first() {
    let hub = Hub::spawn(test_services());
    let mut alice = join(&hub, "alice", "doc-rt").await;

    alice.send(MessageType::Init, r#"{"documentid":"doc-rt","version":0}"#).await;
    alice
        .send(
            MessageType::Steps,
            r#"{"documentid":"doc-rt","version":0,"clientID":7,"steps":[{"s":1},{"s":2}]}"#,
        )
        .await;

    // The first frame the submitter sees is the acknowledgement broadcast,
    // based on exactly the version it submitted.
    let response = alice.next_steps().await;
    assert_eq!(response.base_version, 0);
    assert_eq!(response.version, 2);
    assert_eq!(response.client_ids, vec![7, 7]);
}

#[tokio::test]
async fn broadcasts_reach_every_member_in_emission_order() {
    let hub = Hub::spawn(test_services());
    let mut alice = join(&hub, "alice", "doc-bc").await;
    let mut bob = join(&hub, "bob", "doc-bc").await;

    alice.send(MessageType::Init, r#"{"documentid":"doc-bc","version":0}"#).await;
    alice
        .send(
            MessageType::Steps,
            r#"{"documentid":"doc-bc","version":0,"clientID":1,"steps":[{"a":1}]}"#,
        )
        .await;
    alice
        .send(
            MessageType::Update,
            r#"{"documentid":"doc-bc","version":1,"clientID":1,"steps":[{"a":2},{"a":3}]}"#,
        )
        .await;

    for client in [&mut alice, &mut bob] {
        let first = client.next_steps().await;
        assert_eq!((first.base_version, first.version), (0, 1));

        let second = client.next_steps().await;
        assert_eq!((second.base_version, second.version), (1, 3));
    }
}

#[tokio::test]
async fn joining_client_is_caught_up_from_its_init() {
    let hub = Hub::spawn(test_services());
    let mut alice = join(&hub, "alice", "doc-cu").await;

    alice.send(MessageType::Init, r#"{"documentid":"doc-cu","version":0}"#).await;
    alice
        .send(
            MessageType::Steps,
            r#"{"documentid":"doc-cu","version":0,"clientID":4,"steps":[{"x":1},{"x":2}]}"#,
        )
        .await;
    let _ = alice.next_steps().await;

    // Carol joins while still holding version 0; her init doubles as a
    // catch-up request.
    let mut carol = join(&hub, "carol", "doc-cu").await;
    carol.send(MessageType::Init, r#"{"documentid":"doc-cu","version":0}"#).await;

    let response = carol.next_steps().await;
    assert_eq!(response.base_version, 0);
    assert_eq!(response.version, 2);
    assert_eq!(response.steps.len(), 2);
    assert_eq!(response.client_ids, vec![4, 4]);
}

#[tokio::test]
async fn non_edit_messages_are_dropped_at_triage() {
    let hub = Hub::spawn(test_services());
    let mut alice = join(&hub, "alice", "doc-perm").await;
    alice.send(MessageType::Init, r#"{"documentid":"doc-perm","version":0}"#).await;

    // A comment-level message reaches the room but is dropped silently.
    let message = RoomMessage {
        kind: MessageType::Steps,
        payload: Some(
            RawValue::from_string(
                r#"{"documentid":"doc-perm","version":0,"clientID":9,"steps":[{"s":1}]}"#
                    .to_string(),
            )
            .expect("valid JSON"),
        ),
        document_id: "doc-perm".to_string(),
        user_id: "mallory".to_string(),
        permission: Permission::Comment,
        reply: alice.handle.outbound.clone(),
    };
    alice.handler.send(message).await.expect("room handler closed");

    // The room did not move: an in-order edit from alice still bases on 0.
    alice
        .send(
            MessageType::Steps,
            r#"{"documentid":"doc-perm","version":0,"clientID":1,"steps":[{"s":2}]}"#,
        )
        .await;
    let response = alice.next_steps().await;
    assert_eq!(response.base_version, 0);
    assert_eq!(response.version, 1);
}

#[tokio::test]
async fn reaped_rooms_start_over_uninitialized() {
    let services = test_services();
    let hub = Hub::spawn(services.clone());

    let mut alice = join(&hub, "alice", "doc-reap").await;
    alice.send(MessageType::Init, r#"{"documentid":"doc-reap","version":5}"#).await;
    alice
        .send(
            MessageType::Steps,
            r#"{"documentid":"doc-reap","version":5,"clientID":2,"steps":[{"s":1}]}"#,
        )
        .await;
    let _ = alice.next_steps().await;

    hub.unregister(alice.handle.clone()).await.expect("unregister failed");

    // A fresh room revives its version from the step log: starting version
    // 5 plus one buffered step.
    let mut bob = join(&hub, "bob", "doc-reap").await;
    bob.send(MessageType::Init, r#"{"documentid":"doc-reap","version":6}"#).await;
    bob.send(
        MessageType::Steps,
        r#"{"documentid":"doc-reap","version":6,"clientID":3,"steps":[{"s":2}]}"#,
    )
    .await;

    let response = bob.next_steps().await;
    assert_eq!(response.base_version, 6);
    assert_eq!(response.version, 7);
}
