/// Verdict Evaluator - Language-Agnostic Classification and Scoring
///
/// **Core Responsibility:**
/// Turn raw execution outcomes into verdicts and aggregate them into a score.
///
/// **Critical Properties:**
/// - Knows nothing about processes or toolchains
/// - Knows nothing about Redis
/// - Pure functions: (outcome, expected output) → verdict, verdicts → score
///
/// **Classification precedence (order-sensitive by design):**
/// 1. Memory exceedance → MLE (preempts everything; the resource-limit
///    violation is the more specific diagnosis, including over a timeout)
/// 2. Timeout → TLE
/// 3. Runner fault → UNK
/// 4. Non-empty stderr → RE (even when stdout happens to match)
/// 5. Output comparison → AC / WA
///
/// **Normalization:** trailing whitespace is trimmed on both sides of the
/// comparison. Leading whitespace and internal spacing are significant.

use gavel_common::types::{CaseResult, Verdict};

use crate::engine::CaseOutcome;

fn normalize(output: &str) -> &str {
    output.trim_end()
}

/// Classify one raw outcome against the expected stdout.
pub fn classify(outcome: &CaseOutcome, expected: &str) -> Verdict {
    if outcome.memory_exceeded {
        return Verdict::MemoryLimitExceeded;
    }
    if outcome.timed_out {
        return Verdict::TimeLimitExceeded;
    }
    if outcome.runner_fault {
        return Verdict::Unknown;
    }
    if !outcome.stderr.trim().is_empty() {
        return Verdict::RuntimeError;
    }
    if normalize(&outcome.stdout) == normalize(expected) {
        Verdict::Accepted
    } else {
        Verdict::WrongAnswer
    }
}

/// Build the log entry for one case. `case_id` is the 1-based position.
pub fn case_result(case_id: u32, verdict: Verdict, outcome: &CaseOutcome) -> CaseResult {
    CaseResult {
        id: case_id,
        result: verdict,
        time: outcome.time,
        memory: outcome.memory_mb,
    }
}

/// 10 points per accepted case.
pub fn score(details: &[CaseResult]) -> u32 {
    details
        .iter()
        .filter(|case| case.result == Verdict::Accepted)
        .count() as u32
        * 10
}

#[cfg(test)]
mod tests {
    use super::*;

    fn completed(stdout: &str, stderr: &str) -> CaseOutcome {
        CaseOutcome {
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
            time: 0.02,
            memory_mb: 5,
            ..CaseOutcome::default()
        }
    }

    #[test]
    fn matching_output_is_accepted() {
        assert_eq!(classify(&completed("42\n", ""), "42"), Verdict::Accepted);
    }

    #[test]
    fn trailing_whitespace_is_insignificant() {
        assert_eq!(classify(&completed("hello  \n\n", ""), "hello"), Verdict::Accepted);
        assert_eq!(classify(&completed("hello", ""), "hello\n"), Verdict::Accepted);
    }

    #[test]
    fn leading_whitespace_is_significant() {
        assert_eq!(classify(&completed("  hello", ""), "hello"), Verdict::WrongAnswer);
    }

    #[test]
    fn mismatch_is_wrong_answer() {
        assert_eq!(classify(&completed("41", ""), "42"), Verdict::WrongAnswer);
    }

    #[test]
    fn case_matters() {
        assert_eq!(classify(&completed("Hello", ""), "hello"), Verdict::WrongAnswer);
    }

    #[test]
    fn stderr_beats_matching_stdout() {
        // A program that prints errors is never accepted, even when its
        // stdout happens to be right.
        let outcome = completed("42", "Traceback (most recent call last):");
        assert_eq!(classify(&outcome, "42"), Verdict::RuntimeError);
    }

    #[test]
    fn whitespace_only_stderr_is_ignored() {
        assert_eq!(classify(&completed("42", "  \n"), "42"), Verdict::Accepted);
    }

    #[test]
    fn timeout_classifies_tle() {
        let outcome = CaseOutcome {
            time: 1.0,
            timed_out: true,
            ..CaseOutcome::default()
        };
        assert_eq!(classify(&outcome, "42"), Verdict::TimeLimitExceeded);
    }

    #[test]
    fn memory_exceedance_beats_timeout() {
        let outcome = CaseOutcome {
            time: 1.0,
            timed_out: true,
            memory_exceeded: true,
            ..CaseOutcome::default()
        };
        assert_eq!(classify(&outcome, "42"), Verdict::MemoryLimitExceeded);
    }

    #[test]
    fn memory_exceedance_beats_stderr() {
        let outcome = CaseOutcome {
            stderr: "std::bad_alloc".to_string(),
            memory_exceeded: true,
            ..CaseOutcome::default()
        };
        assert_eq!(classify(&outcome, "42"), Verdict::MemoryLimitExceeded);
    }

    #[test]
    fn runner_fault_is_unclassified() {
        let outcome = CaseOutcome {
            runner_fault: true,
            ..CaseOutcome::default()
        };
        assert_eq!(classify(&outcome, "42"), Verdict::Unknown);
    }

    #[test]
    fn case_result_carries_measurements() {
        let outcome = completed("42", "");
        let result = case_result(3, Verdict::Accepted, &outcome);
        assert_eq!(result.id, 3);
        assert_eq!(result.time, 0.02);
        assert_eq!(result.memory, 5);
    }

    #[test]
    fn score_counts_only_accepted_cases() {
        let details = vec![
            case_result(1, Verdict::Accepted, &completed("a", "")),
            case_result(2, Verdict::WrongAnswer, &completed("b", "")),
            case_result(3, Verdict::Accepted, &completed("c", "")),
            case_result(4, Verdict::TimeLimitExceeded, &CaseOutcome::default()),
        ];
        assert_eq!(score(&details), 20);
    }

    #[test]
    fn empty_details_score_zero() {
        assert_eq!(score(&[]), 0);
    }
}
