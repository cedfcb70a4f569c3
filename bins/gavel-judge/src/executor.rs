/// Judge Orchestrator - High-Level Run Coordination
///
/// **Responsibility:**
/// Drive one submission through the full lifecycle: prepare a scratch
/// workspace, build, run every test case through the engine, classify with
/// the evaluator, and commit the terminal state to the result store.
///
/// This module is the glue layer - it knows nothing about:
/// - How code executes (engine's job)
/// - How verdicts are assigned (evaluator's job)
/// - How state is persisted (store's job)
///
/// It does own two run-level guarantees:
/// - single-flight per submission id: a second run for an id that is still
///   in flight is refused, never raced
/// - every run is a handle the caller can await, not a fire-and-forget task

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::Utc;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use gavel_common::store::{ResultStore, StoreError};
use gavel_common::types::{
    CaseResult, JudgeRequest, SubmissionLog, SubmissionRecord, SubmissionStatus, Verdict,
};

use crate::config::ToolchainRegistry;
use crate::engine;
use crate::evaluator;

/// Run-level faults. Case-level failures never surface here; they become
/// CaseResult entries and the run continues.
#[derive(Debug, Error)]
pub enum JudgeFault {
    #[error("unsupported language '{0}'")]
    UnsupportedLanguage(String),

    #[error("a judge run for submission {0} is already active")]
    AlreadyRunning(i64),

    #[error("failed to prepare run workspace: {0}")]
    Workspace(#[source] std::io::Error),

    #[error("failed to start toolchain: {0}")]
    Toolchain(#[source] std::io::Error),

    #[error("result store failure: {0}")]
    Store(#[from] StoreError),

    #[error("judge task failed: {0}")]
    Task(String),
}

/// What a finished run produced. Mirrors the committed record and log.
#[derive(Debug, Clone)]
pub struct JudgeOutcome {
    pub submission_id: i64,
    pub status: SubmissionStatus,
    pub score: u32,
    pub details: Vec<CaseResult>,
}

/// Awaitable handle to a spawned judge run.
pub struct RunHandle {
    pub submission_id: i64,
    handle: JoinHandle<Result<JudgeOutcome, JudgeFault>>,
}

impl RunHandle {
    pub async fn wait(self) -> Result<JudgeOutcome, JudgeFault> {
        match self.handle.await {
            Ok(result) => result,
            Err(e) => Err(JudgeFault::Task(e.to_string())),
        }
    }
}

pub struct JudgeOrchestrator<S> {
    registry: ToolchainRegistry,
    store: S,
    scratch_root: PathBuf,
    active: Arc<Mutex<HashMap<i64, Instant>>>,
}

impl<S: ResultStore + 'static> JudgeOrchestrator<S> {
    pub fn new(registry: ToolchainRegistry, store: S, scratch_root: PathBuf) -> Self {
        Self {
            registry,
            store,
            scratch_root,
            active: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn languages(&self) -> Vec<String> {
        self.registry.list_languages()
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Submission ids currently being judged, with run age. Long-running
    /// entries here are how stuck submissions get diagnosed.
    pub fn active_runs(&self) -> Vec<(i64, Duration)> {
        let active = self.active.lock().expect("flight registry poisoned");
        active
            .iter()
            .map(|(id, started)| (*id, started.elapsed()))
            .collect()
    }

    /// Spawn a detached judge run and hand back its handle. Used identically
    /// for a first judge and a rejudge; refuses ids already in flight.
    pub fn spawn_judge(self: Arc<Self>, request: JudgeRequest) -> Result<RunHandle, JudgeFault> {
        let submission_id = request.submission_id;
        let flight = self.begin_flight(submission_id)?;

        let handle = tokio::spawn(async move {
            let _flight = flight;
            self.run(request).await
        });

        Ok(RunHandle {
            submission_id,
            handle,
        })
    }

    fn begin_flight(&self, submission_id: i64) -> Result<FlightGuard, JudgeFault> {
        let mut active = self.active.lock().expect("flight registry poisoned");
        if active.contains_key(&submission_id) {
            return Err(JudgeFault::AlreadyRunning(submission_id));
        }
        active.insert(submission_id, Instant::now());
        Ok(FlightGuard {
            active: Arc::clone(&self.active),
            submission_id,
        })
    }

    #[instrument(
        skip(self, request),
        fields(submission_id = request.submission_id, language = %request.language)
    )]
    async fn run(&self, request: JudgeRequest) -> Result<JudgeOutcome, JudgeFault> {
        let submission_id = request.submission_id;
        let counts = request.counts();

        // Configuration fault: fatal, no per-case verdicts.
        let toolchain = match self.registry.get(&request.language) {
            Some(toolchain) => toolchain.clone(),
            None => {
                let fault = JudgeFault::UnsupportedLanguage(request.language.clone());
                return self.fail(submission_id, counts, fault).await;
            }
        };

        // Re-enter the state machine from pending; on a rejudge this clears
        // the previous terminal state while the new run is in flight.
        self.store.mark_pending(submission_id, counts).await?;

        let workspace = match Workspace::create(&self.scratch_root) {
            Ok(workspace) => workspace,
            Err(e) => return self.fail(submission_id, counts, JudgeFault::Workspace(e)).await,
        };

        let source_path = workspace.path().join(toolchain.source_name(submission_id));
        if let Err(e) = tokio::fs::write(&source_path, &request.code).await {
            return self.fail(submission_id, counts, JudgeFault::Workspace(e)).await;
        }

        // Build phase. A compile failure is a verdict, not a fault: one
        // synthetic CE entry, score 0, and the run stops here.
        if let Some(compile_command) = toolchain.compile_command(submission_id) {
            let build = match engine::run_build(&compile_command, workspace.path()).await {
                Ok(build) => build,
                Err(e) => return self.fail(submission_id, counts, JudgeFault::Toolchain(e)).await,
            };

            if !build.success {
                info!("compilation failed");
                debug!(stderr = %build.stderr, "compiler output");
                let details = vec![CaseResult {
                    id: 0,
                    result: Verdict::CompileError,
                    time: 0.0,
                    memory: 0,
                }];
                return self
                    .commit(submission_id, SubmissionStatus::Error, details, counts)
                    .await;
            }
        }

        // Execute phase: strictly sequential, one sandbox invocation per
        // case. A fault inside one case becomes its UNK entry and the
        // remaining cases still run.
        let run_command = toolchain.run_command(submission_id);
        let mut details = Vec::with_capacity(request.test_cases.len());

        for (index, case) in request.test_cases.iter().enumerate() {
            let case_id = index as u32 + 1;
            let outcome = engine::run_case(
                &run_command,
                workspace.path(),
                &case.input,
                request.time_limit,
                request.memory_limit,
            )
            .await;

            let verdict = evaluator::classify(&outcome, &case.output);
            info!(
                case = case_id,
                verdict = ?verdict,
                time = outcome.time,
                memory_mb = outcome.memory_mb,
                "case judged"
            );
            details.push(evaluator::case_result(case_id, verdict, &outcome));
        }

        // Success reflects orchestration health, not correctness: a clean
        // run that failed every case still finalizes as success with score 0.
        self.commit(submission_id, SubmissionStatus::Success, details, counts)
            .await
    }

    async fn commit(
        &self,
        submission_id: i64,
        status: SubmissionStatus,
        details: Vec<CaseResult>,
        counts: u32,
    ) -> Result<JudgeOutcome, JudgeFault> {
        let score = evaluator::score(&details);
        let record = SubmissionRecord {
            submission_id,
            status,
            score: Some(score),
            counts,
            judged_at: Some(Utc::now()),
        };
        let log = SubmissionLog {
            submission_id,
            details: details.clone(),
            score,
            counts,
        };

        // A failed commit leaves the record pending, which the health
        // endpoint surfaces as a stuck run; it must not half-write the pair.
        self.store.commit(&record, &log).await?;

        info!(status = ?status, score, cases = log.details.len(), "run committed");
        Ok(JudgeOutcome {
            submission_id,
            status,
            score,
            details,
        })
    }

    /// Fatal run-level error: mark the submission errored with no score and
    /// propagate the fault to the caller's handle.
    async fn fail(
        &self,
        submission_id: i64,
        counts: u32,
        fault: JudgeFault,
    ) -> Result<JudgeOutcome, JudgeFault> {
        error!(error = %fault, "judge run failed");
        if let Err(e) = self.store.mark_error(submission_id, counts).await {
            warn!(error = %e, "failed to record fatal fault");
        }
        Err(fault)
    }
}

/// Releases the single-flight registration on every exit path, panics
/// included.
struct FlightGuard {
    active: Arc<Mutex<HashMap<i64, Instant>>>,
    submission_id: i64,
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        let mut active = self.active.lock().expect("flight registry poisoned");
        active.remove(&self.submission_id);
    }
}

/// Per-run scratch directory. Dropped unconditionally at run end, taking
/// the source file and any compile artifact with it.
struct Workspace {
    dir: PathBuf,
}

impl Workspace {
    fn create(root: &Path) -> std::io::Result<Self> {
        let dir = root.join(format!("gavel-run-{}", Uuid::new_v4()));
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn path(&self) -> &Path {
        &self.dir
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_dir_all(&self.dir) {
            warn!(dir = %self.dir.display(), error = %e, "failed to clean run workspace");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gavel_common::store::MemoryStore;

    fn orchestrator() -> Arc<JudgeOrchestrator<MemoryStore>> {
        Arc::new(JudgeOrchestrator::new(
            ToolchainRegistry::builtin(),
            MemoryStore::new(),
            std::env::temp_dir(),
        ))
    }

    #[tokio::test]
    async fn flight_registration_is_released_on_drop() {
        let orchestrator = orchestrator();

        let guard = orchestrator.begin_flight(11).unwrap();
        assert_eq!(orchestrator.active_runs().len(), 1);

        assert!(matches!(
            orchestrator.begin_flight(11),
            Err(JudgeFault::AlreadyRunning(11))
        ));

        drop(guard);
        assert!(orchestrator.active_runs().is_empty());
        assert!(orchestrator.begin_flight(11).is_ok());
    }

    #[tokio::test]
    async fn distinct_submissions_fly_concurrently() {
        let orchestrator = orchestrator();
        let _a = orchestrator.begin_flight(1).unwrap();
        let _b = orchestrator.begin_flight(2).unwrap();
        assert_eq!(orchestrator.active_runs().len(), 2);
    }

    #[test]
    fn workspace_is_removed_on_drop() {
        let workspace = Workspace::create(&std::env::temp_dir()).unwrap();
        let dir = workspace.path().to_path_buf();
        std::fs::write(dir.join("submission_1.py"), "print(1)").unwrap();

        drop(workspace);
        assert!(!dir.exists());
    }
}
