//! Init handshake and step submission handling.
//!
//! This is the version gate at the heart of the protocol. There is no
//! operational transform on the server: a batch is accepted only when it is
//! based on the room's current version. Clients ahead of the room are told
//! to reload, clients behind it are sent the slice they are missing from
//! the step log.

use serde::de::DeserializeOwned;
use serde_json::value::RawValue;
use stanza_proto::payloads::collab::{InitPayload, ReloadResponse, StepSubmission, StepsResponse};
use stanza_proto::{MessageType, ProtocolError, Response};

use crate::inspector;
use crate::room::{RoomMessage, RoomState, UNINITIALIZED};
use crate::services::Services;

/// Decode a room message's payload into the typed shape `T`.
fn payload_as<T: DeserializeOwned>(message: &RoomMessage) -> Result<T, ProtocolError> {
    let raw = message.payload.as_deref().ok_or(ProtocolError::MissingPayload)?;
    serde_json::from_str(raw.get()).map_err(|e| ProtocolError::Payload(e.to_string()))
}

/// Handle an init message inside the room.
///
/// The first init a room sees settles its version: either the step log
/// still has a starting version (the room was recently abandoned and is
/// being revived), or the client's reported version is adopted and written
/// back as the new starting version.
pub(crate) async fn handle_init(
    services: &Services,
    room: &mut RoomState,
    message: &RoomMessage,
) {
    let payload: InitPayload = match payload_as(message) {
        Ok(payload) => payload,
        Err(e) => {
            tracing::debug!(error = %e, "could not decode init payload");
            return;
        },
    };

    if room.version == UNINITIALIZED {
        room.schema = payload.schema.clone();

        let stored = match services.step_log.starting_version(&room.document_id).await {
            Ok(stored) => stored,
            Err(e) => {
                tracing::debug!(
                    document_id = %room.document_id,
                    error = %e,
                    "could not read starting version; treating log as empty"
                );
                None
            },
        };

        match stored {
            Some(starting_version) => {
                // The buffered steps count toward the room version.
                let step_count = match services.step_log.step_count(&room.document_id).await {
                    Ok(count) => count,
                    Err(e) => {
                        tracing::debug!(
                            document_id = %room.document_id,
                            error = %e,
                            "could not fetch step count"
                        );
                        0
                    },
                };
                room.version = starting_version + step_count;
            },
            None => {
                room.version = payload.version;
                if let Err(e) = services
                    .step_log
                    .set_starting_version(&room.document_id, room.version)
                    .await
                {
                    tracing::debug!(
                        document_id = %room.document_id,
                        error = %e,
                        "could not persist starting version"
                    );
                }
            },
        }
    }

    // A client ahead of the room means the cached log is stale. Adopt the
    // client's version and drop the buffered steps; this is the only path
    // on which a room's version moves other than batch acceptance.
    if room.version < payload.version {
        tracing::debug!(
            message_version = payload.version,
            room_version = room.version,
            document_id = %room.document_id,
            "client version is newer than cached version; resetting"
        );

        room.version = payload.version;

        if let Err(e) =
            services.step_log.set_starting_version(&room.document_id, room.version).await
        {
            tracing::debug!(error = %e, "could not reset starting version");
        }
        if let Err(e) = services.step_log.clear_steps(&room.document_id).await {
            tracing::debug!(error = %e, "could not clear buffered steps");
        }
    }
}

/// Handle a step submission inside the room.
///
/// Triages on the relation between the submitted version and the room's:
/// ahead means reload, equal means accept, behind means catch-up.
pub(crate) async fn handle_steps(
    services: &Services,
    room: &mut RoomState,
    message: &RoomMessage,
    from_init: bool,
) {
    let submission: StepSubmission = match payload_as(message) {
        Ok(submission) => submission,
        Err(e) => {
            tracing::debug!(error = %e, "could not decode steps payload");
            return;
        },
    };

    tracing::debug!(
        message_version = submission.version,
        room_version = room.version,
        "step message"
    );

    if submission.version > room.version {
        // The client is ahead of the server; it has state we cannot verify.
        tracing::debug!(
            message_version = submission.version,
            room_version = room.version,
            "client version is newer, nothing to do"
        );
        reply_reload(message, submission.version, room.version).await;
        return;
    }

    if submission.version == room.version {
        accept_batch(services, room, message, &submission, from_init).await;
        return;
    }

    send_missing_steps(services, room, message, &submission).await;
}

/// Tell the submitting client to reload the document.
async fn reply_reload(message: &RoomMessage, base_version: i64, version: i64) {
    let response = Response::new(MessageType::Reload, ReloadResponse { base_version, version });

    match response.encode() {
        Ok(encoded) => {
            let _ = message.reply.send(encoded).await;
        },
        Err(e) => tracing::debug!(error = %e, "could not encode reload response"),
    }
}

/// Accept an in-order batch: inspect, append, advance, broadcast.
async fn accept_batch(
    services: &Services,
    room: &mut RoomState,
    message: &RoomMessage,
    submission: &StepSubmission,
    from_init: bool,
) {
    let step_count = submission.steps.len();
    if step_count == 0 {
        return;
    }

    tracing::debug!(
        count = step_count,
        message_version = submission.version,
        room_version = room.version,
        "transactions received"
    );

    // Inspect the whole batch before anything is appended: acceptance is
    // all-or-nothing with respect to side effects.
    for step in &submission.steps {
        if let Err(e) = inspector::inspect_step(
            services,
            &room.document_id,
            &message.user_id,
            message.permission,
            step,
        )
        .await
        {
            tracing::debug!(
                document_id = %room.document_id,
                user_id = %message.user_id,
                error = %e,
                "step batch rejected"
            );
            return;
        }
    }

    let mut appended: i64 = 0;
    for step in &submission.steps {
        let stored = services
            .step_log
            .append(&room.document_id, step.get(), submission.client_id, &message.user_id)
            .await;

        if let Err(e) = stored {
            tracing::debug!(error = %e, "could not store step");
            break;
        }
        appended += 1;
    }

    if let Err(e) = services.step_log.touch(&room.document_id).await {
        tracing::debug!(error = %e, "could not refresh step log expiry");
    }

    // The version tracks exactly what the log holds, so a partial append
    // leaves `room.version == starting version + step count` intact.
    let base_version = room.version;
    room.version += appended;

    if appended != step_count as i64 {
        tracing::debug!(
            appended,
            submitted = step_count,
            "batch truncated by step log failure; not broadcasting"
        );
        return;
    }

    let response = StepsResponse {
        base_version,
        version: room.version,
        client_ids: vec![submission.client_id; step_count],
        steps: submission.steps.clone(),
        from_init,
        save_immediate: submission.save_immediate,
    };

    match Response::new(MessageType::Steps, response).encode() {
        Ok(encoded) => {
            if room.broadcast.send(encoded).await.is_err() {
                tracing::debug!(document_id = %room.document_id, "broadcast channel closed");
            }
        },
        Err(e) => tracing::debug!(error = %e, "could not encode steps broadcast"),
    }
}

/// Send a lagging client the slice of steps it is missing.
async fn send_missing_steps(
    services: &Services,
    room: &RoomState,
    message: &RoomMessage,
    submission: &StepSubmission,
) {
    tracing::debug!(
        room_version = room.version,
        client_version = submission.version,
        "missing some steps"
    );

    // Nothing buffered yet; nothing to send.
    if room.version == 0 {
        return;
    }

    // Negative offset: the log reads it as "the last N entries". The buffer
    // may not reach back to the beginning of the document.
    let fetch_from = submission.version - room.version;

    let steps = match services.step_log.steps_from(&room.document_id, fetch_from).await {
        Ok(steps) => steps,
        Err(e) => {
            tracing::debug!(error = %e, "could not fetch steps from log");
            return;
        },
    };

    if steps.is_empty() {
        // The buffer was reset during initialisation while this client held
        // an older version; it cannot be brought forward incrementally.
        tracing::debug!(
            room_version = room.version,
            client_version = submission.version,
            document_id = %room.document_id,
            "no steps buffered, log was probably reset"
        );
        reply_reload(message, submission.version, room.version).await;
        return;
    }

    let client_ids_raw =
        match services.step_log.client_ids_from(&room.document_id, fetch_from).await {
            Ok(client_ids) => client_ids,
            Err(e) => {
                tracing::debug!(error = %e, "could not fetch client ids from log");
                return;
            },
        };

    let mut raw_steps = Vec::with_capacity(steps.len());
    for step in steps {
        match RawValue::from_string(step) {
            Ok(raw) => raw_steps.push(raw),
            Err(e) => {
                tracing::debug!(error = %e, "buffered step is not valid JSON");
                return;
            },
        }
    }

    // The log hands client ids back as strings.
    let client_ids = client_ids_raw
        .iter()
        .map(|id| {
            id.parse::<i64>().unwrap_or_else(|_| {
                tracing::debug!(client_id = %id, "could not parse buffered client id");
                0
            })
        })
        .collect();

    let response = StepsResponse {
        base_version: submission.version,
        version: room.version,
        client_ids,
        steps: raw_steps,
        from_init: false,
        save_immediate: false,
    };

    match Response::new(MessageType::Steps, response).encode() {
        Ok(encoded) => {
            let _ = message.reply.send(encoded).await;
        },
        Err(e) => tracing::debug!(error = %e, "could not encode steps response"),
    }
}
