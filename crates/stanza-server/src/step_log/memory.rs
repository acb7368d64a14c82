//! In-memory step log for tests and single-node development.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;

use super::{RANGE_LIMIT, StepLog, StepLogError};

/// In-memory step log.
///
/// One entry per document, expired lazily on access the way the redis
/// backend expires keys. All state sits behind `Arc<Mutex<..>>` so clones
/// share the same buffer. Uses `lock().expect()` which will panic if the
/// mutex is poisoned - acceptable for test/development code.
#[derive(Clone)]
pub struct MemoryStepLog {
    ttl: Duration,
    inner: Arc<Mutex<HashMap<String, DocumentLog>>>,
}

struct DocumentLog {
    starting_version: Option<i64>,
    steps: Vec<String>,
    client_ids: Vec<String>,
    user_ids: Vec<String>,
    expires_at: Instant,
}

impl DocumentLog {
    fn new(ttl: Duration) -> Self {
        Self {
            starting_version: None,
            steps: Vec::new(),
            client_ids: Vec::new(),
            user_ids: Vec::new(),
            expires_at: Instant::now() + ttl,
        }
    }
}

/// Resolve a possibly-negative range start against a list length.
fn resolve_range(from: i64, len: usize) -> std::ops::Range<usize> {
    let len_i = len as i64;
    let start = if from < 0 { (len_i + from).max(0) } else { from.min(len_i) };
    let end = (RANGE_LIMIT + 1).min(len_i);
    let start = start as usize;
    let end = (end as usize).max(start);
    start..end
}

impl MemoryStepLog {
    /// Create an empty log whose entries expire after `ttl` of inactivity.
    pub fn new(ttl: Duration) -> Self {
        Self { ttl, inner: Arc::new(Mutex::new(HashMap::new())) }
    }

    /// Run `f` against the (non-expired) entry for a document.
    #[allow(clippy::expect_used)]
    fn with_doc<T>(&self, document_id: &str, f: impl FnOnce(Option<&mut DocumentLog>) -> T) -> T {
        let mut inner = self.inner.lock().expect("Mutex poisoned");

        let expired = inner
            .get(document_id)
            .is_some_and(|doc| doc.expires_at <= Instant::now());
        if expired {
            inner.remove(document_id);
        }

        f(inner.get_mut(document_id))
    }

    /// Run `f` against the entry for a document, creating it if needed.
    #[allow(clippy::expect_used)]
    fn with_doc_mut<T>(&self, document_id: &str, f: impl FnOnce(&mut DocumentLog) -> T) -> T {
        let mut inner = self.inner.lock().expect("Mutex poisoned");

        let expired = inner
            .get(document_id)
            .is_some_and(|doc| doc.expires_at <= Instant::now());
        if expired {
            inner.remove(document_id);
        }

        let doc = inner
            .entry(document_id.to_string())
            .or_insert_with(|| DocumentLog::new(self.ttl));
        f(doc)
    }

    /// User ids recorded for a document's steps, oldest first.
    ///
    /// Not part of the [`StepLog`] trait - catch-up never sends user ids -
    /// but tests verify the parallel list stays in step.
    pub fn user_ids(&self, document_id: &str) -> Vec<String> {
        self.with_doc(document_id, |doc| {
            doc.map(|d| d.user_ids.clone()).unwrap_or_default()
        })
    }
}

#[async_trait]
impl StepLog for MemoryStepLog {
    async fn starting_version(&self, document_id: &str) -> Result<Option<i64>, StepLogError> {
        Ok(self.with_doc(document_id, |doc| doc.and_then(|d| d.starting_version)))
    }

    async fn set_starting_version(
        &self,
        document_id: &str,
        version: i64,
    ) -> Result<(), StepLogError> {
        let ttl = self.ttl;
        self.with_doc_mut(document_id, |doc| {
            doc.starting_version = Some(version);
            doc.expires_at = Instant::now() + ttl;
        });
        Ok(())
    }

    async fn append(
        &self,
        document_id: &str,
        step: &str,
        client_id: i64,
        user_id: &str,
    ) -> Result<(), StepLogError> {
        self.with_doc_mut(document_id, |doc| {
            doc.steps.push(step.to_string());
            doc.client_ids.push(client_id.to_string());
            doc.user_ids.push(user_id.to_string());
        });
        Ok(())
    }

    async fn step_count(&self, document_id: &str) -> Result<i64, StepLogError> {
        Ok(self.with_doc(document_id, |doc| doc.map_or(0, |d| d.steps.len() as i64)))
    }

    async fn steps_from(&self, document_id: &str, from: i64) -> Result<Vec<String>, StepLogError> {
        Ok(self.with_doc(document_id, |doc| {
            doc.map_or_else(Vec::new, |d| {
                let range = resolve_range(from, d.steps.len());
                d.steps[range].to_vec()
            })
        }))
    }

    async fn client_ids_from(
        &self,
        document_id: &str,
        from: i64,
    ) -> Result<Vec<String>, StepLogError> {
        Ok(self.with_doc(document_id, |doc| {
            doc.map_or_else(Vec::new, |d| {
                let range = resolve_range(from, d.client_ids.len());
                d.client_ids[range].to_vec()
            })
        }))
    }

    async fn clear_steps(&self, document_id: &str) -> Result<(), StepLogError> {
        self.with_doc(document_id, |doc| {
            if let Some(doc) = doc {
                doc.steps.clear();
                doc.client_ids.clear();
                doc.user_ids.clear();
            }
        });
        Ok(())
    }

    async fn touch(&self, document_id: &str) -> Result<(), StepLogError> {
        let ttl = self.ttl;
        self.with_doc(document_id, |doc| {
            if let Some(doc) = doc {
                doc.expires_at = Instant::now() + ttl;
            }
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::STEP_LOG_TTL;
    use super::*;

    fn log() -> MemoryStepLog {
        MemoryStepLog::new(STEP_LOG_TTL)
    }

    #[tokio::test]
    async fn starting_version_round_trips() {
        let log = log();

        assert_eq!(log.starting_version("doc").await.unwrap(), None);

        log.set_starting_version("doc", 12).await.unwrap();
        assert_eq!(log.starting_version("doc").await.unwrap(), Some(12));
    }

    #[tokio::test]
    async fn append_keeps_the_three_lists_parallel() {
        let log = log();

        log.append("doc", r#"{"stepType":"replace"}"#, 7, "user-a").await.unwrap();
        log.append("doc", r#"{"stepType":"addMark"}"#, 9, "user-b").await.unwrap();

        assert_eq!(log.step_count("doc").await.unwrap(), 2);
        assert_eq!(log.steps_from("doc", 0).await.unwrap().len(), 2);
        assert_eq!(log.client_ids_from("doc", 0).await.unwrap(), vec!["7", "9"]);
        assert_eq!(log.user_ids("doc"), vec!["user-a", "user-b"]);
    }

    #[tokio::test]
    async fn negative_from_reads_from_the_tail() {
        let log = log();

        for (i, step) in ["a", "b", "c", "d", "e"].iter().enumerate() {
            log.append("doc", step, i as i64, "u").await.unwrap();
        }

        // The catch-up branch asks for `submitted - room`, here 3 - 5.
        let steps = log.steps_from("doc", -2).await.unwrap();
        assert_eq!(steps, vec!["d", "e"]);

        let client_ids = log.client_ids_from("doc", -2).await.unwrap();
        assert_eq!(client_ids, vec!["3", "4"]);
    }

    #[tokio::test]
    async fn negative_from_beyond_length_reads_everything() {
        let log = log();
        log.append("doc", "a", 1, "u").await.unwrap();

        let steps = log.steps_from("doc", -10).await.unwrap();
        assert_eq!(steps, vec!["a"]);
    }

    #[tokio::test]
    async fn reads_on_unknown_documents_are_empty() {
        let log = log();

        assert_eq!(log.step_count("nope").await.unwrap(), 0);
        assert!(log.steps_from("nope", -5).await.unwrap().is_empty());
        assert!(log.client_ids_from("nope", 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn clear_drops_lists_but_keeps_starting_version() {
        let log = log();

        log.set_starting_version("doc", 3).await.unwrap();
        log.append("doc", "a", 1, "u").await.unwrap();
        log.append("doc", "b", 2, "u").await.unwrap();

        log.clear_steps("doc").await.unwrap();

        assert_eq!(log.step_count("doc").await.unwrap(), 0);
        assert!(log.user_ids("doc").is_empty());
        assert_eq!(log.starting_version("doc").await.unwrap(), Some(3));
    }

    #[tokio::test]
    async fn entries_expire_after_the_ttl() {
        let log = MemoryStepLog::new(Duration::ZERO);

        log.set_starting_version("doc", 3).await.unwrap();
        log.append("doc", "a", 1, "u").await.unwrap();

        // TTL of zero: everything is already stale on the next access.
        assert_eq!(log.starting_version("doc").await.unwrap(), None);
        assert_eq!(log.step_count("doc").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn touch_rearms_the_ttl() {
        let log = MemoryStepLog::new(Duration::from_secs(60));

        log.set_starting_version("doc", 0).await.unwrap();
        log.touch("doc").await.unwrap();

        assert_eq!(log.starting_version("doc").await.unwrap(), Some(0));
    }
}
