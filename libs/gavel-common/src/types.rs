use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One pending evaluation, handed to the judge by the submitting layer.
/// Consumed entirely within a single judge run; never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JudgeRequest {
    pub submission_id: i64,
    pub language: String,
    pub code: String,
    pub test_cases: Vec<TestCase>,
    /// Wall-clock budget per test case, in seconds.
    #[serde(default = "default_time_limit")]
    pub time_limit: f64,
    /// Resident-memory ceiling per test case, in megabytes. 0 disables the
    /// memory monitor.
    #[serde(default = "default_memory_limit")]
    pub memory_limit: u64,
}

fn default_time_limit() -> f64 {
    3.0
}

fn default_memory_limit() -> u64 {
    128
}

impl JudgeRequest {
    /// Maximum attainable score: 10 points per test case.
    pub fn counts(&self) -> u32 {
        self.test_cases.len() as u32 * 10
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestCase {
    pub input: String,
    /// Expected stdout, compared trailing-whitespace-insensitively.
    pub output: String,
}

/// Per-test-case classification outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verdict {
    #[serde(rename = "AC")]
    Accepted,
    #[serde(rename = "WA")]
    WrongAnswer,
    #[serde(rename = "TLE")]
    TimeLimitExceeded,
    #[serde(rename = "MLE")]
    MemoryLimitExceeded,
    #[serde(rename = "RE")]
    RuntimeError,
    #[serde(rename = "CE")]
    CompileError,
    #[serde(rename = "UNK")]
    Unknown,
}

/// One entry of the per-case log. `id` is the 1-based test case position;
/// a compile failure is recorded as a single entry with id 0.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseResult {
    pub id: u32,
    pub result: Verdict,
    /// Seconds. For TLE this is the configured limit, not wall time.
    pub time: f64,
    /// Peak resident memory observed, in megabytes.
    pub memory: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubmissionStatus {
    Pending,
    Success,
    Error,
}

/// Durable submission state polled by the status endpoint. Created in
/// `pending` by the submitting layer; the judge writes it exactly once per
/// run, at the end.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionRecord {
    pub submission_id: i64,
    pub status: SubmissionStatus,
    pub score: Option<u32>,
    pub counts: u32,
    /// When the run reached a terminal status. None while pending.
    pub judged_at: Option<DateTime<Utc>>,
}

impl SubmissionRecord {
    pub fn pending(submission_id: i64, counts: u32) -> Self {
        Self {
            submission_id,
            status: SubmissionStatus::Pending,
            score: None,
            counts,
            judged_at: None,
        }
    }
}

/// Detailed per-case log, 1:1 with a SubmissionRecord. A rejudge overwrites
/// the existing row for the same submission id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionLog {
    pub submission_id: i64,
    pub details: Vec<CaseResult>,
    pub score: u32,
    pub counts: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verdict_wire_codes() {
        assert_eq!(serde_json::to_string(&Verdict::Accepted).unwrap(), "\"AC\"");
        assert_eq!(serde_json::to_string(&Verdict::MemoryLimitExceeded).unwrap(), "\"MLE\"");
        assert_eq!(serde_json::to_string(&Verdict::Unknown).unwrap(), "\"UNK\"");
        let v: Verdict = serde_json::from_str("\"TLE\"").unwrap();
        assert_eq!(v, Verdict::TimeLimitExceeded);
    }

    #[test]
    fn status_is_lowercase_on_the_wire() {
        assert_eq!(
            serde_json::to_string(&SubmissionStatus::Pending).unwrap(),
            "\"pending\""
        );
        assert_eq!(
            serde_json::to_string(&SubmissionStatus::Success).unwrap(),
            "\"success\""
        );
    }

    #[test]
    fn request_limits_default_when_omitted() {
        let req: JudgeRequest = serde_json::from_str(
            r#"{
                "submission_id": 7,
                "language": "python",
                "code": "print(input())",
                "test_cases": [{"input": "5\n", "output": "5"}]
            }"#,
        )
        .unwrap();

        assert_eq!(req.time_limit, 3.0);
        assert_eq!(req.memory_limit, 128);
        assert_eq!(req.counts(), 10);
    }

    #[test]
    fn counts_is_ten_per_case() {
        let req = JudgeRequest {
            submission_id: 1,
            language: "cpp".to_string(),
            code: String::new(),
            test_cases: vec![
                TestCase {
                    input: "1\n".to_string(),
                    output: "1".to_string(),
                },
                TestCase {
                    input: "2\n".to_string(),
                    output: "2".to_string(),
                },
                TestCase {
                    input: "3\n".to_string(),
                    output: "3".to_string(),
                },
            ],
            time_limit: 1.0,
            memory_limit: 64,
        };
        assert_eq!(req.counts(), 30);
    }
}
