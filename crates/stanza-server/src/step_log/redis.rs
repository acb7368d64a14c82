//! Redis-backed step log.
//!
//! Key layout per document: `<docId>-steps`, `<docId>-clientids` and
//! `<docId>-userids` are ordered lists, `<docId>-starting-version` is a
//! scalar integer. All four carry the same TTL, re-armed on every accepted
//! batch. Negative range reads map directly onto `LRANGE`.

use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::MultiplexedConnection;

use super::{RANGE_LIMIT, StepLog, StepLogError};

/// Step log backed by a shared redis instance.
///
/// Clones share one multiplexed connection; the redis server pipelines the
/// commands of concurrent rooms.
#[derive(Clone)]
pub struct RedisStepLog {
    connection: MultiplexedConnection,
    ttl: Duration,
}

fn steps_key(document_id: &str) -> String {
    format!("{document_id}-steps")
}

fn client_ids_key(document_id: &str) -> String {
    format!("{document_id}-clientids")
}

fn user_ids_key(document_id: &str) -> String {
    format!("{document_id}-userids")
}

fn starting_version_key(document_id: &str) -> String {
    format!("{document_id}-starting-version")
}

impl RedisStepLog {
    /// Connect to the redis instance at `url` (e.g. `redis://host:6379`).
    pub async fn connect(url: &str, ttl: Duration) -> Result<Self, StepLogError> {
        let client = redis::Client::open(url)?;
        let connection = client.get_multiplexed_async_connection().await?;

        tracing::info!(url, "connected to redis step log");

        Ok(Self { connection, ttl })
    }

    fn ttl_secs(&self) -> i64 {
        self.ttl.as_secs() as i64
    }
}

#[async_trait]
impl StepLog for RedisStepLog {
    async fn starting_version(&self, document_id: &str) -> Result<Option<i64>, StepLogError> {
        let mut con = self.connection.clone();
        let version: Option<i64> = con.get(starting_version_key(document_id)).await?;
        Ok(version)
    }

    async fn set_starting_version(
        &self,
        document_id: &str,
        version: i64,
    ) -> Result<(), StepLogError> {
        let mut con = self.connection.clone();
        let _: () = con
            .set_ex(starting_version_key(document_id), version, self.ttl.as_secs())
            .await?;
        Ok(())
    }

    async fn append(
        &self,
        document_id: &str,
        step: &str,
        client_id: i64,
        user_id: &str,
    ) -> Result<(), StepLogError> {
        let mut con = self.connection.clone();

        // One pipeline so the three lists cannot drift on a partial failure.
        let _: () = redis::pipe()
            .atomic()
            .rpush(steps_key(document_id), step)
            .ignore()
            .rpush(client_ids_key(document_id), client_id)
            .ignore()
            .rpush(user_ids_key(document_id), user_id)
            .ignore()
            .query_async(&mut con)
            .await?;

        Ok(())
    }

    async fn step_count(&self, document_id: &str) -> Result<i64, StepLogError> {
        let mut con = self.connection.clone();
        let count: i64 = con.llen(steps_key(document_id)).await?;
        Ok(count)
    }

    async fn steps_from(&self, document_id: &str, from: i64) -> Result<Vec<String>, StepLogError> {
        let mut con = self.connection.clone();
        let steps: Vec<String> = con
            .lrange(steps_key(document_id), from as isize, RANGE_LIMIT as isize)
            .await?;
        Ok(steps)
    }

    async fn client_ids_from(
        &self,
        document_id: &str,
        from: i64,
    ) -> Result<Vec<String>, StepLogError> {
        let mut con = self.connection.clone();
        let client_ids: Vec<String> = con
            .lrange(client_ids_key(document_id), from as isize, RANGE_LIMIT as isize)
            .await?;
        Ok(client_ids)
    }

    async fn clear_steps(&self, document_id: &str) -> Result<(), StepLogError> {
        let mut con = self.connection.clone();
        let _: i64 = con
            .del(vec![
                steps_key(document_id),
                client_ids_key(document_id),
                user_ids_key(document_id),
            ])
            .await?;
        Ok(())
    }

    async fn touch(&self, document_id: &str) -> Result<(), StepLogError> {
        let mut con = self.connection.clone();
        let ttl = self.ttl_secs();

        let _: () = redis::pipe()
            .expire(steps_key(document_id), ttl)
            .ignore()
            .expire(client_ids_key(document_id), ttl)
            .ignore()
            .expire(user_ids_key(document_id), ttl)
            .ignore()
            .expire(starting_version_key(document_id), ttl)
            .ignore()
            .query_async(&mut con)
            .await?;

        Ok(())
    }
}
