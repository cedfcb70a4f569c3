//! Durable submission state.
//!
//! The judge writes through the [`ResultStore`] trait so the persistence
//! backend can be swapped without touching the orchestrator. Production uses
//! [`RedisStore`]; tests use [`MemoryStore`].

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;

use crate::redis::{log_key, record_key};
use crate::types::{SubmissionLog, SubmissionRecord, SubmissionStatus};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Insert-or-overwrite storage for submission outcomes, keyed by submission
/// id. `commit` must make the record and the log visible together, or
/// neither.
#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Create or reset the record for a run that is about to start.
    async fn mark_pending(&self, submission_id: i64, counts: u32) -> Result<(), StoreError>;

    /// Terminal write for a fatally failed run: status `error`, no score,
    /// no log.
    async fn mark_error(&self, submission_id: i64, counts: u32) -> Result<(), StoreError>;

    /// Terminal write for a completed run. Overwrites any prior log row for
    /// the same submission id.
    async fn commit(
        &self,
        record: &SubmissionRecord,
        log: &SubmissionLog,
    ) -> Result<(), StoreError>;

    async fn record(&self, submission_id: i64) -> Result<Option<SubmissionRecord>, StoreError>;

    async fn log(&self, submission_id: i64) -> Result<Option<SubmissionLog>, StoreError>;
}

/// Redis-backed store. Record and log live under deterministic keys; the
/// terminal write goes through an atomic MULTI pipeline so a poller can never
/// observe one half of the pair.
#[derive(Clone)]
pub struct RedisStore {
    conn: redis::aio::ConnectionManager,
}

impl RedisStore {
    pub fn new(conn: redis::aio::ConnectionManager) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl ResultStore for RedisStore {
    async fn mark_pending(&self, submission_id: i64, counts: u32) -> Result<(), StoreError> {
        let record = SubmissionRecord::pending(submission_id, counts);
        let payload = serde_json::to_string(&record)?;
        let mut conn = self.conn.clone();
        let _: () = redis::cmd("SET")
            .arg(record_key(submission_id))
            .arg(payload)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn mark_error(&self, submission_id: i64, counts: u32) -> Result<(), StoreError> {
        let record = SubmissionRecord {
            submission_id,
            status: SubmissionStatus::Error,
            score: None,
            counts,
            judged_at: Some(Utc::now()),
        };
        let payload = serde_json::to_string(&record)?;
        let mut conn = self.conn.clone();
        let _: () = redis::cmd("SET")
            .arg(record_key(submission_id))
            .arg(payload)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn commit(
        &self,
        record: &SubmissionRecord,
        log: &SubmissionLog,
    ) -> Result<(), StoreError> {
        let record_payload = serde_json::to_string(record)?;
        let log_payload = serde_json::to_string(log)?;
        let mut conn = self.conn.clone();
        let _: () = redis::pipe()
            .atomic()
            .set(record_key(record.submission_id), record_payload)
            .set(log_key(log.submission_id), log_payload)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn record(&self, submission_id: i64) -> Result<Option<SubmissionRecord>, StoreError> {
        let mut conn = self.conn.clone();
        let payload: Option<String> = redis::cmd("GET")
            .arg(record_key(submission_id))
            .query_async(&mut conn)
            .await?;
        match payload {
            Some(data) => Ok(Some(serde_json::from_str(&data)?)),
            None => Ok(None),
        }
    }

    async fn log(&self, submission_id: i64) -> Result<Option<SubmissionLog>, StoreError> {
        let mut conn = self.conn.clone();
        let payload: Option<String> = redis::cmd("GET")
            .arg(log_key(submission_id))
            .query_async(&mut conn)
            .await?;
        match payload {
            Some(data) => Ok(Some(serde_json::from_str(&data)?)),
            None => Ok(None),
        }
    }
}

/// In-process store for tests. A single mutex over both maps gives the same
/// both-or-neither visibility as the Redis pipeline.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    records: HashMap<i64, SubmissionRecord>,
    logs: HashMap<i64, SubmissionLog>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ResultStore for MemoryStore {
    async fn mark_pending(&self, submission_id: i64, counts: u32) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("store mutex poisoned");
        inner
            .records
            .insert(submission_id, SubmissionRecord::pending(submission_id, counts));
        Ok(())
    }

    async fn mark_error(&self, submission_id: i64, counts: u32) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("store mutex poisoned");
        inner.records.insert(
            submission_id,
            SubmissionRecord {
                submission_id,
                status: SubmissionStatus::Error,
                score: None,
                counts,
                judged_at: Some(Utc::now()),
            },
        );
        Ok(())
    }

    async fn commit(
        &self,
        record: &SubmissionRecord,
        log: &SubmissionLog,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("store mutex poisoned");
        inner.records.insert(record.submission_id, record.clone());
        inner.logs.insert(log.submission_id, log.clone());
        Ok(())
    }

    async fn record(&self, submission_id: i64) -> Result<Option<SubmissionRecord>, StoreError> {
        let inner = self.inner.lock().expect("store mutex poisoned");
        Ok(inner.records.get(&submission_id).cloned())
    }

    async fn log(&self, submission_id: i64) -> Result<Option<SubmissionLog>, StoreError> {
        let inner = self.inner.lock().expect("store mutex poisoned");
        Ok(inner.logs.get(&submission_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CaseResult, Verdict};

    fn sample_log(submission_id: i64, verdict: Verdict) -> SubmissionLog {
        SubmissionLog {
            submission_id,
            details: vec![CaseResult {
                id: 1,
                result: verdict,
                time: 0.01,
                memory: 4,
            }],
            score: if verdict == Verdict::Accepted { 10 } else { 0 },
            counts: 10,
        }
    }

    #[tokio::test]
    async fn commit_makes_record_and_log_visible_together() {
        let store = MemoryStore::new();
        store.mark_pending(1, 10).await.unwrap();
        assert!(store.log(1).await.unwrap().is_none());

        let record = SubmissionRecord {
            submission_id: 1,
            status: SubmissionStatus::Success,
            score: Some(10),
            counts: 10,
            judged_at: Some(Utc::now()),
        };
        store.commit(&record, &sample_log(1, Verdict::Accepted)).await.unwrap();

        let stored = store.record(1).await.unwrap().unwrap();
        assert_eq!(stored.status, SubmissionStatus::Success);
        assert_eq!(stored.score, Some(10));
        assert_eq!(store.log(1).await.unwrap().unwrap().details.len(), 1);
    }

    #[tokio::test]
    async fn recommit_overwrites_the_log_in_place() {
        let store = MemoryStore::new();
        let record = SubmissionRecord {
            submission_id: 5,
            status: SubmissionStatus::Success,
            score: Some(0),
            counts: 10,
            judged_at: Some(Utc::now()),
        };
        store.commit(&record, &sample_log(5, Verdict::WrongAnswer)).await.unwrap();
        store.commit(&record, &sample_log(5, Verdict::Accepted)).await.unwrap();

        let log = store.log(5).await.unwrap().unwrap();
        assert_eq!(log.details.len(), 1);
        assert_eq!(log.details[0].result, Verdict::Accepted);
    }

    #[tokio::test]
    async fn mark_error_leaves_no_score() {
        let store = MemoryStore::new();
        store.mark_pending(9, 20).await.unwrap();
        store.mark_error(9, 20).await.unwrap();

        let record = store.record(9).await.unwrap().unwrap();
        assert_eq!(record.status, SubmissionStatus::Error);
        assert_eq!(record.score, None);
        assert!(record.judged_at.is_some());
    }

    #[tokio::test]
    async fn mark_pending_resets_a_judged_record() {
        let store = MemoryStore::new();
        let record = SubmissionRecord {
            submission_id: 3,
            status: SubmissionStatus::Error,
            score: Some(0),
            counts: 10,
            judged_at: Some(Utc::now()),
        };
        store.commit(&record, &sample_log(3, Verdict::WrongAnswer)).await.unwrap();

        store.mark_pending(3, 10).await.unwrap();
        let reset = store.record(3).await.unwrap().unwrap();
        assert_eq!(reset.status, SubmissionStatus::Pending);
        assert_eq!(reset.score, None);
        assert!(reset.judged_at.is_none());
    }
}
