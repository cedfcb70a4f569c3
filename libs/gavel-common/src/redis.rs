use crate::types::JudgeRequest;
use redis::{AsyncCommands, RedisResult};

/// Redis key semantics shared by the judge and the submitting layer.
/// Defines only semantics, not runtime logic, so the two sides never drift
/// and every key is deterministic.

pub const QUEUE_KEY: &str = "gavel:queue:judge";
pub const RECORD_PREFIX: &str = "gavel:submission";
pub const LOG_PREFIX: &str = "gavel:log";

/// Key holding the SubmissionRecord for a submission
pub fn record_key(submission_id: i64) -> String {
    format!("{}:{}", RECORD_PREFIX, submission_id)
}

/// Key holding the SubmissionLog for a submission
pub fn log_key(submission_id: i64) -> String {
    format!("{}:{}", LOG_PREFIX, submission_id)
}

/// Push a judge request onto the intake queue.
/// Uses RPUSH for FIFO semantics.
pub async fn push_request(
    conn: &mut redis::aio::ConnectionManager,
    request: &JudgeRequest,
) -> RedisResult<()> {
    let payload = serde_json::to_string(request).map_err(|e| {
        redis::RedisError::from((redis::ErrorKind::TypeError, "serialization error", e.to_string()))
    })?;

    conn.rpush(QUEUE_KEY, payload).await
}

/// Pop the next judge request from the intake queue.
/// Uses BLPOP with a timeout so the worker loop can check for shutdown.
pub async fn pop_request(
    conn: &mut redis::aio::ConnectionManager,
    timeout_seconds: f64,
) -> RedisResult<Option<JudgeRequest>> {
    let result: Option<(String, String)> = conn.blpop(QUEUE_KEY, timeout_seconds).await?;

    match result {
        Some((_key, payload)) => {
            let request: JudgeRequest = serde_json::from_str(&payload).map_err(|e| {
                redis::RedisError::from((
                    redis::ErrorKind::TypeError,
                    "deserialization error",
                    e.to_string(),
                ))
            })?;
            Ok(Some(request))
        }
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_key_deterministic() {
        let key1 = record_key(42);
        let key2 = record_key(42);
        assert_eq!(key1, key2);
        assert_eq!(key1, "gavel:submission:42");
    }

    #[test]
    fn test_log_key_format() {
        let key = log_key(42);
        assert!(key.starts_with("gavel:log:"));
        assert!(key.contains("42"));
    }

    #[test]
    fn test_record_and_log_keys_never_collide() {
        assert_ne!(record_key(7), log_key(7));
    }
}
