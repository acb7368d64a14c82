//! The ephemeral ordered step log.
//!
//! Accepted steps are buffered per document so that clients behind the room
//! version can be caught up without reloading. The log is a short-lived
//! rebroadcast buffer, not an audit trail: every key expires five hours
//! after the last accepted batch.
//!
//! Per document the store keeps three parallel ordered lists - the encoded
//! steps, the originating collaboration client id per step, and the
//! originating user id per step - plus one scalar, the version at which the
//! buffer begins. At quiescence the three lists have equal length and
//! `room version == starting version + step count`.

mod error;
mod memory;
mod redis;

use std::time::Duration;

use async_trait::async_trait;
pub use error::StepLogError;
pub use memory::MemoryStepLog;
pub use self::redis::RedisStepLog;

/// Expire a document's log after this long without an accepted batch.
pub const STEP_LOG_TTL: Duration = Duration::from_secs(5 * 60 * 60);

/// Upper bound on the absolute index of a ranged read.
///
/// Catch-up reads pass a negative `from` ("last N entries"); the cap keeps a
/// pathological gap from turning into an unbounded reply.
pub const RANGE_LIMIT: i64 = 50_000;

/// Storage abstraction for the per-document step buffer.
///
/// Implementations are shared behind an `Arc` and must be safe to call from
/// many rooms at once; each document's keys are only ever written from its
/// own room handler, so per-document writes are effectively single-writer.
#[async_trait]
pub trait StepLog: Send + Sync + 'static {
    /// The version at which the buffer begins. `None` if absent or expired.
    async fn starting_version(&self, document_id: &str) -> Result<Option<i64>, StepLogError>;

    /// Set the starting version, (re)arming the TTL.
    async fn set_starting_version(
        &self,
        document_id: &str,
        version: i64,
    ) -> Result<(), StepLogError>;

    /// Append one accepted step with its originating client and user.
    ///
    /// The triple is appended atomically so the three lists cannot drift.
    async fn append(
        &self,
        document_id: &str,
        step: &str,
        client_id: i64,
        user_id: &str,
    ) -> Result<(), StepLogError>;

    /// Number of buffered steps.
    async fn step_count(&self, document_id: &str) -> Result<i64, StepLogError>;

    /// Buffered steps from `from` through the end of the list.
    ///
    /// A negative `from` counts from the tail: `-2` reads the last two
    /// entries. Out-of-range reads return an empty vec.
    async fn steps_from(&self, document_id: &str, from: i64) -> Result<Vec<String>, StepLogError>;

    /// Originating client ids for the same range as [`StepLog::steps_from`].
    ///
    /// Returned as strings, the way the backend stores them; callers parse
    /// them back to integers.
    async fn client_ids_from(
        &self,
        document_id: &str,
        from: i64,
    ) -> Result<Vec<String>, StepLogError>;

    /// Drop the three lists, keeping the starting version.
    ///
    /// Used by the stale-cache reset during init: the starting version is
    /// rewritten by the caller, the buffered steps are gone.
    async fn clear_steps(&self, document_id: &str) -> Result<(), StepLogError>;

    /// Refresh the TTL on all of the document's keys.
    async fn touch(&self, document_id: &str) -> Result<(), StepLogError>;
}
