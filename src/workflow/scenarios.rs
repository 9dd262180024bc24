//! End-to-end runs against in-memory collaborators.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tempfile::TempDir;

use crate::agent::{AgentCapability, AgentRequest, AgentResponse, Identity, Role};
use crate::artifacts::{ArtifactKind, ArtifactStore};
use crate::config::SolverErrorPolicy;
use crate::error::{AppError, Result};
use crate::platform::types::Task;
use crate::platform::TaskSource;
use crate::workflow::orchestrator::{Orchestrator, WorkflowRun, WorkflowSettings};
use crate::workflow::state::Phase;
use crate::workflow::types::{
    Approach, DecisionRecord, FinalImplementation, Review, RunId, SolverId, WorkflowOutcome,
};
use crate::workspace::{
    ChangeSet, FileChange, LineHandle, RepositoryGateway, RequestRef, SnapshotRef,
};

struct FakeTasks {
    fetches: AtomicUsize,
}

#[async_trait]
impl TaskSource for FakeTasks {
    async fn fetch(&self, task_id: &str) -> Result<Task> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if task_id != "T1" {
            return Err(AppError::TaskNotFound(task_id.to_string()));
        }
        Ok(Task {
            id: "T1".to_string(),
            title: "Fix file.txt".to_string(),
            body: "file.txt has the wrong content".to_string(),
            fetched_at: Utc::now(),
        })
    }
}

/// Lines are plain path → change maps.
#[derive(Default)]
struct FakeGateway {
    lines: Mutex<HashMap<String, BTreeMap<String, FileChange>>>,
    snapshots: AtomicUsize,
    requests: Mutex<Vec<(String, String)>>,
}

impl FakeGateway {
    fn new() -> Self {
        let gateway = Self::default();
        gateway.lines.lock().unwrap().insert(
            "main".to_string(),
            BTreeMap::from([("file.txt".to_string(), FileChange::file("base"))]),
        );
        gateway
    }

    fn handle(name: &str) -> LineHandle {
        LineHandle {
            name: name.to_string(),
            path: PathBuf::from("/fake").join(name),
        }
    }

    fn files_on(&self, prefix: &str) -> Option<BTreeMap<String, FileChange>> {
        let lines = self.lines.lock().unwrap();
        lines
            .iter()
            .find(|(name, _)| name.starts_with(prefix))
            .map(|(_, files)| files.clone())
    }
}

#[async_trait]
impl RepositoryGateway for FakeGateway {
    async fn current_line(&self) -> Result<LineHandle> {
        Ok(Self::handle("main"))
    }

    async fn switch(&self, _line: &LineHandle) -> Result<()> {
        Ok(())
    }

    async fn create_isolated_line(&self, base: &LineHandle, name: &str) -> Result<LineHandle> {
        let mut lines = self.lines.lock().unwrap();
        if lines.contains_key(name) {
            return Err(AppError::Git(format!("branch {name} exists")));
        }
        let files = lines
            .get(&base.name)
            .cloned()
            .ok_or_else(|| AppError::Git(format!("no line {}", base.name)))?;
        lines.insert(name.to_string(), files);
        Ok(Self::handle(name))
    }

    async fn apply(&self, line: &LineHandle, changes: &ChangeSet) -> Result<()> {
        let mut lines = self.lines.lock().unwrap();
        let files = lines
            .get_mut(&line.name)
            .ok_or_else(|| AppError::Git(format!("no line {}", line.name)))?;
        for (path, change) in &changes.files {
            match change {
                FileChange::Delete => {
                    files.remove(path);
                }
                other => {
                    files.insert(path.clone(), other.clone());
                }
            }
        }
        Ok(())
    }

    async fn snapshot(&self, line: &LineHandle, _message: &str) -> Result<SnapshotRef> {
        let n = self.snapshots.fetch_add(1, Ordering::SeqCst);
        Ok(SnapshotRef(format!("{}@{n}", line.name)))
    }

    async fn diff(&self, from: &LineHandle, to: &LineHandle) -> Result<ChangeSet> {
        let lines = self.lines.lock().unwrap();
        let (Some(old), Some(new)) = (lines.get(&from.name), lines.get(&to.name)) else {
            return Err(AppError::Git("unknown line".to_string()));
        };
        let mut changes = ChangeSet::default();
        for (path, change) in new {
            if old.get(path) != Some(change) {
                changes.insert(path.as_str(), change.clone());
            }
        }
        for path in old.keys() {
            if !new.contains_key(path) {
                changes.delete(path.as_str());
            }
        }
        Ok(changes)
    }

    async fn open_change_request(
        &self,
        _base: &LineHandle,
        line: &LineHandle,
        title: &str,
        body: &str,
    ) -> Result<RequestRef> {
        self.requests
            .lock()
            .unwrap()
            .push((title.to_string(), body.to_string()));
        Ok(RequestRef::LocalBranch {
            branch: line.name.clone(),
        })
    }
}

/// Solvers return fixed files, reviewers a fixed line of text, and the
/// arbiter replays queued replies. Every invocation is recorded.
#[derive(Default)]
struct ScriptedAgent {
    files: HashMap<SolverId, ChangeSet>,
    stalled: Vec<(Role, Identity)>,
    arbiter_replies: Mutex<VecDeque<String>>,
    calls: Mutex<Vec<(Role, Identity, PathBuf)>>,
}

impl ScriptedAgent {
    fn solving(a: &[(&str, &str)], b: &[(&str, &str)]) -> Self {
        let changes = |files: &[(&str, &str)]| {
            let mut set = ChangeSet::default();
            for (path, content) in files {
                set.write(*path, *content);
            }
            set
        };
        Self {
            files: HashMap::from([(SolverId::A, changes(a)), (SolverId::B, changes(b))]),
            ..Self::default()
        }
    }

    /// Make `identity` acting as `role` hang past any phase timeout.
    fn stalling(mut self, role: Role, identity: Identity) -> Self {
        self.stalled.push((role, identity));
        self
    }

    fn working_dir_of(&self, role: Role, identity: Identity) -> Option<PathBuf> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .find(|(r, i, _)| *r == role && *i == identity)
            .map(|(_, _, dir)| dir.clone())
    }

    fn deciding(self, replies: &[&str]) -> Self {
        *self.arbiter_replies.lock().unwrap() = replies.iter().map(|r| r.to_string()).collect();
        self
    }
}

#[async_trait]
impl AgentCapability for ScriptedAgent {
    async fn invoke(&self, request: AgentRequest) -> Result<AgentResponse> {
        self.calls.lock().unwrap().push((
            request.role,
            request.identity,
            request.working_dir.clone(),
        ));
        if self.stalled.contains(&(request.role, request.identity)) {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }

        match (request.role, request.identity) {
            (Role::Solver, Identity::Solver(solver)) => Ok(AgentResponse {
                narrative: format!("solver {solver} rationale"),
                files: self.files.get(&solver).cloned().unwrap_or_default(),
            }),
            (Role::Reviewer, identity) => Ok(AgentResponse::narrative(format!(
                "review written by {identity}"
            ))),
            (Role::Arbiter, _) => match self.arbiter_replies.lock().unwrap().pop_front() {
                Some(reply) => Ok(AgentResponse::narrative(reply)),
                None => Err(AppError::Capability("arbiter has nothing to say".to_string())),
            },
            (role, identity) => Err(AppError::Capability(format!(
                "unexpected {role} as {identity}"
            ))),
        }
    }
}

struct Harness {
    _tmp: TempDir,
    tasks: Arc<FakeTasks>,
    gateway: Arc<FakeGateway>,
    agent: Arc<ScriptedAgent>,
    store: Arc<ArtifactStore>,
    orchestrator: Orchestrator,
}

fn settings(policy: SolverErrorPolicy, concurrent: bool) -> WorkflowSettings {
    WorkflowSettings {
        on_solver_error: policy,
        phase_timeout: Duration::from_millis(200),
        concurrent_implementation: concurrent,
    }
}

fn harness(agent: ScriptedAgent, settings: WorkflowSettings) -> Harness {
    let tmp = tempfile::tempdir().unwrap();
    let tasks = Arc::new(FakeTasks {
        fetches: AtomicUsize::new(0),
    });
    let gateway = Arc::new(FakeGateway::new());
    let agent = Arc::new(agent);
    let store = Arc::new(ArtifactStore::new(tmp.path().join("runs")));
    let orchestrator = Orchestrator::new(
        tasks.clone(),
        gateway.clone(),
        agent.clone(),
        store.clone(),
        settings,
    );
    Harness {
        _tmp: tmp,
        tasks,
        gateway,
        agent,
        store,
        orchestrator,
    }
}

fn decision(json: &str) -> String {
    format!("After reading both reviews:\n\n```json\n{json}\n```")
}

fn aborted(outcome: &WorkflowOutcome) -> (Phase, &'static str) {
    match outcome {
        WorkflowOutcome::Aborted { phase, kind, .. } => (*phase, *kind),
        other => panic!("expected Aborted, got {other:?}"),
    }
}

async fn is_finalized(store: &ArtifactStore, run: &RunId, kind: ArtifactKind) -> bool {
    store
        .record(run, kind)
        .await
        .unwrap()
        .is_some_and(|r| r.is_finalized())
}

#[tokio::test]
async fn test_hybrid_from_b_ships_b() {
    let agent = ScriptedAgent::solving(&[("file.txt", "a")], &[("file.txt", "b")]).deciding(&[
        &decision(r#"{"verdict":"hybrid","units":{"file.txt":"b"},"rationale":"B handles the empty case"}"#),
    ]);
    let h = harness(agent, settings(SolverErrorPolicy::AbortRun, true));

    let outcome = h.orchestrator.execute("T1").await.unwrap();
    assert!(outcome.is_submitted(), "{outcome:?}");
    let run = outcome.run_id();

    let final_files = h.gateway.files_on("duet/final/T1/").unwrap();
    assert_eq!(final_files["file.txt"], FileChange::file("b"));

    let implementation: FinalImplementation = h
        .store
        .get_json(run, ArtifactKind::FinalImplementation)
        .await
        .unwrap();
    assert_eq!(
        implementation.changes.get("file.txt"),
        Some(&FileChange::file("b"))
    );

    let submission = h.store.get(run, ArtifactKind::Submission).await.unwrap();
    assert!(submission.contains("## Decision"));
    assert!(submission.contains("B handles the empty case"));
    assert!(submission.contains("review written by solver B"));
    assert!(submission.contains("review written by solver A"));
    assert!(submission.contains("Change request: branch duet/final/T1/"));

    let requests = h.gateway.requests.lock().unwrap();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].0, "Fix file.txt (T1)");
}

#[tokio::test]
async fn test_submitted_run_has_every_artifact_and_full_audit_log() {
    let agent = ScriptedAgent::solving(&[("file.txt", "a")], &[("other.txt", "b")])
        .deciding(&[&decision(r#"{"verdict":"a","rationale":"simpler"}"#)]);
    let h = harness(agent, settings(SolverErrorPolicy::AbortRun, true));

    let outcome = h.orchestrator.execute("T1").await.unwrap();
    let run = outcome.run_id();

    assert!(h.store.missing(run).await.unwrap().is_empty());

    let visited: Vec<Phase> = h
        .store
        .read_audit_log(run)
        .await
        .unwrap()
        .iter()
        .map(|r| r.to)
        .collect();
    assert_eq!(
        visited,
        vec![
            Phase::Setup,
            Phase::ImplementA,
            Phase::ImplementB,
            Phase::ReviewBOfA,
            Phase::ReviewAOfB,
            Phase::Decide,
            Phase::FinalImplement,
            Phase::Submit,
            Phase::Submitted,
        ]
    );
}

#[tokio::test]
async fn test_reviews_finalized_after_their_approach() {
    let agent = ScriptedAgent::solving(&[("file.txt", "a")], &[("file.txt", "b")])
        .deciding(&[&decision(r#"{"verdict":"b"}"#)]);
    let h = harness(agent, settings(SolverErrorPolicy::AbortRun, true));

    let outcome = h.orchestrator.execute("T1").await.unwrap();
    let run = outcome.run_id();

    for solver in SolverId::ALL {
        let approach = h
            .store
            .record(run, ArtifactKind::Approach(solver))
            .await
            .unwrap()
            .unwrap();
        let review = h
            .store
            .record(run, ArtifactKind::Review { of: solver })
            .await
            .unwrap()
            .unwrap();
        assert!(review.written_at >= approach.written_at);
    }

    let review_of_a: Review = h
        .store
        .get_json(run, ArtifactKind::Review { of: SolverId::A })
        .await
        .unwrap();
    assert_eq!(review_of_a.author, SolverId::B);
}

#[tokio::test]
async fn test_solver_timeout_continues_with_empty_approach() {
    let agent = ScriptedAgent::solving(&[("file.txt", "a")], &[("file.txt", "b")])
        .stalling(Role::Solver, Identity::Solver(SolverId::A))
        .deciding(&[&decision(r#"{"verdict":"b","rationale":"A produced nothing"}"#)]);
    let h = harness(agent, settings(SolverErrorPolicy::ContinueWithEmpty, true));

    let outcome = h.orchestrator.execute("T1").await.unwrap();
    assert!(outcome.is_submitted(), "{outcome:?}");
    let run = outcome.run_id();

    let a: Approach = h
        .store
        .get_json(run, ArtifactKind::Approach(SolverId::A))
        .await
        .unwrap();
    assert!(a.changes.is_empty());
    assert!(a.is_degraded());
    assert!(a.rationale.contains("timed out"));

    let review_of_a: Review = h
        .store
        .get_json(run, ArtifactKind::Review { of: SolverId::A })
        .await
        .unwrap();
    assert_eq!(review_of_a.author, SolverId::B);
    assert!(review_of_a.error.is_none());
}

#[tokio::test]
async fn test_solver_timeout_aborts_before_reviews() {
    let agent = ScriptedAgent::solving(&[("file.txt", "a")], &[("file.txt", "b")])
        .stalling(Role::Solver, Identity::Solver(SolverId::A));
    let h = harness(agent, settings(SolverErrorPolicy::AbortRun, true));

    let outcome = h.orchestrator.execute("T1").await.unwrap();
    assert_eq!(aborted(&outcome), (Phase::ImplementA, "capability_timeout"));
    let run = outcome.run_id();

    let draft = h
        .store
        .record(run, ArtifactKind::Approach(SolverId::A))
        .await
        .unwrap()
        .unwrap();
    assert!(!draft.is_finalized());
    assert_eq!(draft.note.as_deref(), Some("capability_timeout"));

    for of in SolverId::ALL {
        assert!(h
            .store
            .record(run, ArtifactKind::Review { of })
            .await
            .unwrap()
            .is_none());
    }

    let log = h.store.read_audit_log(run).await.unwrap();
    assert_eq!(log.last().unwrap().to, Phase::Aborted);
}

#[tokio::test]
async fn test_setup_twice_conflicts_without_refetching() {
    let h = harness(ScriptedAgent::default(), settings(SolverErrorPolicy::AbortRun, true));
    let mut run = WorkflowRun::new("T1");

    h.orchestrator.setup(&mut run).await.unwrap();
    let err = h.orchestrator.setup(&mut run).await.unwrap_err();

    assert!(matches!(err, AppError::ArtifactConflict(_)));
    assert_eq!(h.tasks.fetches.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_unknown_task_aborts_in_setup() {
    let h = harness(ScriptedAgent::default(), settings(SolverErrorPolicy::AbortRun, true));

    let outcome = h.orchestrator.execute("T404").await.unwrap();
    assert_eq!(aborted(&outcome), (Phase::Setup, "task_not_found"));
    assert!(h.gateway.files_on("duet/").is_none());
}

#[tokio::test]
async fn test_both_approaches_empty_aborts_before_reviews() {
    let agent = ScriptedAgent::solving(&[], &[]);
    let h = harness(agent, settings(SolverErrorPolicy::AbortRun, true));

    let outcome = h.orchestrator.execute("T1").await.unwrap();
    assert_eq!(aborted(&outcome), (Phase::ImplementB, "empty_approaches"));
    let run = outcome.run_id();

    assert!(is_finalized(&h.store, run, ArtifactKind::Approach(SolverId::A)).await);
    assert!(!is_finalized(&h.store, run, ArtifactKind::Review { of: SolverId::A }).await);
}

#[tokio::test]
async fn test_invalid_hybrid_is_retried_then_aborts() {
    let ghost = decision(r#"{"verdict":"hybrid","units":{"file.txt":"a","ghost.txt":"b"}}"#);
    let agent = ScriptedAgent::solving(&[("file.txt", "a")], &[("file.txt", "b")])
        .deciding(&[&ghost, &ghost]);
    let h = harness(agent, settings(SolverErrorPolicy::AbortRun, true));

    let outcome = h.orchestrator.execute("T1").await.unwrap();
    assert_eq!(aborted(&outcome), (Phase::Decide, "incomplete_decision"));
    let run = outcome.run_id();

    let draft = h
        .store
        .record(run, ArtifactKind::Decision)
        .await
        .unwrap()
        .unwrap();
    assert!(!draft.is_finalized());
    assert!(draft.note.unwrap().contains("ghost.txt"));

    let log = h.store.read_audit_log(run).await.unwrap();
    assert!(log
        .iter()
        .any(|r| r.from == Some(Phase::Decide) && r.to == Phase::Decide));
}

#[tokio::test]
async fn test_invalid_decision_then_valid_retry_submits() {
    let agent = ScriptedAgent::solving(&[("file.txt", "a")], &[("file.txt", "b")]).deciding(&[
        "I prefer B.",
        &decision(r#"{"verdict":"b","rationale":"B is correct"}"#),
    ]);
    let h = harness(agent, settings(SolverErrorPolicy::AbortRun, true));

    let outcome = h.orchestrator.execute("T1").await.unwrap();
    assert!(outcome.is_submitted(), "{outcome:?}");

    let decision: DecisionRecord = h
        .store
        .get_json(outcome.run_id(), ArtifactKind::Decision)
        .await
        .unwrap();
    assert_eq!(decision.attempt, 2);
}

#[tokio::test]
async fn test_merge_conflict_triggers_redecision() {
    let agent = ScriptedAgent::solving(&[("file.txt", "a")], &[("file.txt", "b")]).deciding(&[
        &decision(r#"{"verdict":"hybrid","units":{"file.txt":"both"}}"#),
        &decision(r#"{"verdict":"hybrid","units":{"file.txt":"a"},"rationale":"A after all"}"#),
    ]);
    let h = harness(agent, settings(SolverErrorPolicy::AbortRun, true));

    let outcome = h.orchestrator.execute("T1").await.unwrap();
    assert!(outcome.is_submitted(), "{outcome:?}");
    let run = outcome.run_id();

    let record = h
        .store
        .record(run, ArtifactKind::Decision)
        .await
        .unwrap()
        .unwrap();
    assert!(record.is_finalized());
    assert_eq!(record.revision, 2);

    assert_eq!(
        h.gateway.files_on("duet/final/").unwrap()["file.txt"],
        FileChange::file("a")
    );

    let log = h.store.read_audit_log(run).await.unwrap();
    assert!(log
        .iter()
        .any(|r| r.from == Some(Phase::FinalImplement) && r.to == Phase::Decide));
}

#[tokio::test]
async fn test_merge_conflict_without_budget_aborts_with_draft() {
    let agent = ScriptedAgent::solving(&[("file.txt", "a")], &[("file.txt", "b")]).deciding(&[
        "no json here",
        &decision(r#"{"verdict":"hybrid","units":{"file.txt":"both"}}"#),
    ]);
    let h = harness(agent, settings(SolverErrorPolicy::AbortRun, true));

    let outcome = h.orchestrator.execute("T1").await.unwrap();
    assert_eq!(aborted(&outcome), (Phase::FinalImplement, "merge_conflict"));

    let (record, content) = h
        .store
        .inspect(outcome.run_id(), ArtifactKind::FinalImplementation)
        .await
        .unwrap()
        .unwrap();
    assert!(!record.is_finalized());
    assert!(content.contains("file.txt"));
    assert!(h.gateway.files_on("duet/final/").is_none());
}

#[tokio::test]
async fn test_sequential_mode_matches_concurrent() {
    let script = || {
        ScriptedAgent::solving(&[("file.txt", "a"), ("a.txt", "x")], &[("file.txt", "b")])
            .deciding(&[&decision(
                r#"{"verdict":"hybrid","units":{"file.txt":"b","a.txt":"a"}}"#,
            )])
    };

    let mut finals = Vec::new();
    for concurrent in [true, false] {
        let h = harness(script(), settings(SolverErrorPolicy::AbortRun, concurrent));
        let outcome = h.orchestrator.execute("T1").await.unwrap();
        assert!(outcome.is_submitted(), "{outcome:?}");

        let implementation: FinalImplementation = h
            .store
            .get_json(outcome.run_id(), ArtifactKind::FinalImplementation)
            .await
            .unwrap();
        finals.push((implementation.changes, implementation.sources));
    }
    assert_eq!(finals[0], finals[1]);
}

#[tokio::test]
async fn test_degraded_approach_is_reviewed_on_the_base_line() {
    let agent = ScriptedAgent::solving(&[("file.txt", "a")], &[("file.txt", "b")])
        .stalling(Role::Solver, Identity::Solver(SolverId::A))
        .deciding(&[&decision(r#"{"verdict":"b","rationale":"A produced nothing"}"#)]);
    let h = harness(agent, settings(SolverErrorPolicy::ContinueWithEmpty, true));

    let outcome = h.orchestrator.execute("T1").await.unwrap();
    assert!(outcome.is_submitted(), "{outcome:?}");

    // B reviews the empty approach of A against the base, not A's line.
    let b_reviewing = h
        .agent
        .working_dir_of(Role::Reviewer, Identity::Solver(SolverId::B))
        .unwrap();
    assert_eq!(b_reviewing, PathBuf::from("/fake/main"));

    let a_reviewing = h
        .agent
        .working_dir_of(Role::Reviewer, Identity::Solver(SolverId::A))
        .unwrap();
    assert!(a_reviewing.starts_with("/fake/duet/b/T1/"), "{a_reviewing:?}");
}

#[tokio::test]
async fn test_reviewer_timeout_continues_with_degraded_review() {
    let agent = ScriptedAgent::solving(&[("file.txt", "a")], &[("other.txt", "b")])
        .stalling(Role::Reviewer, Identity::Solver(SolverId::B))
        .deciding(&[&decision(r#"{"verdict":"a","rationale":"A is enough"}"#)]);
    let h = harness(agent, settings(SolverErrorPolicy::ContinueWithEmpty, true));

    let outcome = h.orchestrator.execute("T1").await.unwrap();
    assert!(outcome.is_submitted(), "{outcome:?}");
    let run = outcome.run_id();

    let kind = ArtifactKind::Review { of: SolverId::A };
    assert!(is_finalized(&h.store, run, kind).await);
    let review_of_a: Review = h.store.get_json(run, kind).await.unwrap();
    assert_eq!(review_of_a.author, SolverId::B);
    assert!(review_of_a.error.as_deref().unwrap().contains("timed out"));

    let review_of_b: Review = h
        .store
        .get_json(run, ArtifactKind::Review { of: SolverId::B })
        .await
        .unwrap();
    assert!(review_of_b.error.is_none());

    let submission = h.store.get(run, ArtifactKind::Submission).await.unwrap();
    assert!(submission.contains("could not review approach A"));
}

#[tokio::test]
async fn test_reviewer_timeout_aborts_in_its_review_phase() {
    let cases = [
        (SolverId::B, SolverId::A, Phase::ReviewBOfA, true),
        (SolverId::A, SolverId::B, Phase::ReviewAOfB, false),
    ];
    for (reviewer, of, phase, concurrent) in cases {
        let agent = ScriptedAgent::solving(&[("file.txt", "a")], &[("other.txt", "b")])
            .stalling(Role::Reviewer, Identity::Solver(reviewer));
        let h = harness(agent, settings(SolverErrorPolicy::AbortRun, concurrent));

        let outcome = h.orchestrator.execute("T1").await.unwrap();
        assert_eq!(aborted(&outcome), (phase, "capability_timeout"));
        let run = outcome.run_id();

        let draft = h
            .store
            .record(run, ArtifactKind::Review { of })
            .await
            .unwrap()
            .unwrap();
        assert!(!draft.is_finalized());
        assert_eq!(draft.note.as_deref(), Some("capability_timeout"));

        assert!(h
            .store
            .record(run, ArtifactKind::Decision)
            .await
            .unwrap()
            .is_none());
        let log = h.store.read_audit_log(run).await.unwrap();
        assert_eq!(log.last().unwrap().from, Some(phase));
        assert_eq!(log.last().unwrap().to, Phase::Aborted);
    }
}

#[tokio::test]
async fn test_arbiter_timeout_stores_draft_decision_and_aborts() {
    let agent = ScriptedAgent::solving(&[("file.txt", "a")], &[("file.txt", "b")])
        .stalling(Role::Arbiter, Identity::Arbiter);
    // The solver policy does not cover the arbiter.
    let h = harness(agent, settings(SolverErrorPolicy::ContinueWithEmpty, true));

    let outcome = h.orchestrator.execute("T1").await.unwrap();
    assert_eq!(aborted(&outcome), (Phase::Decide, "capability_timeout"));
    let run = outcome.run_id();

    let (record, content) = h
        .store
        .inspect(run, ArtifactKind::Decision)
        .await
        .unwrap()
        .unwrap();
    assert!(!record.is_finalized());
    assert_eq!(record.note.as_deref(), Some("capability_timeout"));
    assert!(content.starts_with("Arbiter failed:"));
    assert!(h.gateway.files_on("duet/final/").is_none());
}

#[tokio::test]
async fn test_arbiter_error_stores_draft_decision_and_aborts() {
    let agent = ScriptedAgent::solving(&[("file.txt", "a")], &[("file.txt", "b")]).deciding(&[]);
    let h = harness(agent, settings(SolverErrorPolicy::AbortRun, true));

    let outcome = h.orchestrator.execute("T1").await.unwrap();
    assert_eq!(aborted(&outcome), (Phase::Decide, "capability_error"));
    let run = outcome.run_id();

    let record = h
        .store
        .record(run, ArtifactKind::Decision)
        .await
        .unwrap()
        .unwrap();
    assert!(!record.is_finalized());
    assert_eq!(record.note.as_deref(), Some("capability_error"));
    assert!(is_finalized(&h.store, run, ArtifactKind::Review { of: SolverId::B }).await);
}

#[tokio::test]
async fn test_sequential_abort_never_starts_solver_b() {
    let agent = ScriptedAgent::solving(&[("file.txt", "a")], &[("file.txt", "b")])
        .stalling(Role::Solver, Identity::Solver(SolverId::A));
    let h = harness(agent, settings(SolverErrorPolicy::AbortRun, false));

    let outcome = h.orchestrator.execute("T1").await.unwrap();
    assert_eq!(aborted(&outcome), (Phase::ImplementA, "capability_timeout"));
    let run = outcome.run_id();

    assert!(h
        .agent
        .working_dir_of(Role::Solver, Identity::Solver(SolverId::B))
        .is_none());
    assert!(h.gateway.files_on("duet/b/").is_none());
    assert!(h
        .store
        .record(run, ArtifactKind::Approach(SolverId::B))
        .await
        .unwrap()
        .is_none());

    let log = h.store.read_audit_log(run).await.unwrap();
    assert!(log.iter().all(|entry| entry.to != Phase::ImplementB));
}
