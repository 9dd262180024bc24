use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::agent::{AgentCapability, AgentRequest, AgentResponse, Identity, Role};
use crate::artifacts::{ArtifactKind, ArtifactStore, OverwriteToken};
use crate::config::{SolverErrorPolicy, WorkflowConfig};
use crate::error::{AppError, Result};
use crate::platform::types::Task;
use crate::platform::TaskSource;
use crate::workflow::state::{Phase, StateMachine};
use crate::workflow::types::{
    sanitize, Approach, DecisionRecord, FinalImplementation, Review, RunId, SolverId,
    WorkflowOutcome,
};
use crate::workflow::{context, decision, merge, submission};
use crate::workspace::{LineHandle, RepositoryGateway, RequestRef};

#[derive(Debug, Clone)]
pub struct WorkflowSettings {
    pub on_solver_error: SolverErrorPolicy,
    pub phase_timeout: Duration,
    pub concurrent_implementation: bool,
}

impl From<&WorkflowConfig> for WorkflowSettings {
    fn from(config: &WorkflowConfig) -> Self {
        Self {
            on_solver_error: config.on_solver_error,
            phase_timeout: config.phase_timeout(),
            concurrent_implementation: config.concurrent_implementation,
        }
    }
}

/// State of one run, passed to every phase function.
#[derive(Debug)]
pub struct WorkflowRun {
    pub id: RunId,
    pub task_id: String,
    pub started_at: DateTime<Utc>,
    pub machine: StateMachine,
    /// Line the run started from; set by Setup.
    pub base: Option<LineHandle>,
    pub decide_attempts: u32,
}

impl WorkflowRun {
    pub fn new(task_id: &str) -> Self {
        let started_at = Utc::now();
        Self {
            id: RunId::new(task_id, started_at),
            task_id: task_id.to_string(),
            started_at,
            machine: StateMachine::new(),
            base: None,
            decide_attempts: 0,
        }
    }

    /// Branch name for an isolation line owned by `owner` (`a`, `b` or `final`).
    fn line_name(&self, owner: &str) -> String {
        format!(
            "duet/{owner}/{}/{}",
            sanitize(&self.task_id),
            self.started_at.format("%Y%m%dT%H%M%S%3fZ")
        )
    }

    fn base(&self) -> Result<&LineHandle> {
        self.base
            .as_ref()
            .ok_or_else(|| AppError::Internal(format!("run {} has no base line", self.id)))
    }
}

/// Drives a run through the fixed phase sequence.
pub struct Orchestrator {
    tasks: Arc<dyn TaskSource>,
    gateway: Arc<dyn RepositoryGateway>,
    agent: Arc<dyn AgentCapability>,
    store: Arc<ArtifactStore>,
    settings: WorkflowSettings,
}

impl Orchestrator {
    pub fn new(
        tasks: Arc<dyn TaskSource>,
        gateway: Arc<dyn RepositoryGateway>,
        agent: Arc<dyn AgentCapability>,
        store: Arc<ArtifactStore>,
        settings: WorkflowSettings,
    ) -> Self {
        Self {
            tasks,
            gateway,
            agent,
            store,
            settings,
        }
    }

    /// Run the whole workflow for `task_id`.
    ///
    /// Phase failures end in `WorkflowOutcome::Aborted`; only a failure to
    /// persist the audit log itself is returned as an error.
    pub async fn execute(&self, task_id: &str) -> Result<WorkflowOutcome> {
        let mut run = WorkflowRun::new(task_id);
        tracing::info!(run = %run.id, task = task_id, "Starting run");
        self.store
            .write_audit_log(&run.id, run.machine.log())
            .await?;

        match self.drive(&mut run).await {
            Ok(request) => {
                tracing::info!(run = %run.id, request = %request, "Run submitted");
                Ok(WorkflowOutcome::Submitted {
                    run_id: run.id,
                    request,
                })
            }
            Err(e) => {
                let phase = run.machine.current();
                let kind = e.kind();
                let reason = e.to_string();
                tracing::error!(run = %run.id, phase = %phase, kind, error = %reason, "Run aborted");

                run.machine.abort(format!("{kind}: {reason}"));
                self.store
                    .write_audit_log(&run.id, run.machine.log())
                    .await?;

                Ok(WorkflowOutcome::Aborted {
                    run_id: run.id,
                    phase,
                    kind,
                    reason,
                })
            }
        }
    }

    async fn drive(&self, run: &mut WorkflowRun) -> Result<RequestRef> {
        self.setup(run).await?;
        self.implement(run).await?;
        self.review(run).await?;

        let mut feedback = None;
        let (decision, implementation) = loop {
            let decision = self.decide(run, feedback.take()).await?;
            match self.final_implement(run, &decision).await {
                Ok(implementation) => break (decision, implementation),
                Err(AppError::MergeConflict(paths)) if run.machine.can_redecide() => {
                    self.transition(
                        run,
                        Phase::Decide,
                        format!("merge conflict on {}", paths.join(", ")),
                    )
                    .await?;
                    feedback = Some(format!(
                        "The approaches edit these files differently, so `both` cannot be applied: {}. \
                         Take each of them from a single approach.",
                        paths.join(", ")
                    ));
                }
                Err(e) => return Err(e),
            }
        };

        self.submit(run, &decision, &implementation).await
    }

    async fn transition(
        &self,
        run: &mut WorkflowRun,
        to: Phase,
        outcome: impl Into<String>,
    ) -> Result<()> {
        run.machine.advance(to, outcome)?;
        self.store.write_audit_log(&run.id, run.machine.log()).await
    }

    /// Invoke the agent, bounded by the phase timeout.
    async fn invoke(&self, phase: Phase, request: AgentRequest) -> Result<AgentResponse> {
        let limit = self.settings.phase_timeout;
        match tokio::time::timeout(limit, self.agent.invoke(request)).await {
            Ok(result) => result,
            Err(_) => Err(AppError::CapabilityTimeout {
                phase: phase.to_string(),
                seconds: limit.as_secs(),
            }),
        }
    }

    /// Fetch the task and store its snapshot. Fails with `ArtifactConflict`
    /// without fetching if the run already has one.
    pub async fn setup(&self, run: &mut WorkflowRun) -> Result<()> {
        if self.store.record(&run.id, ArtifactKind::Task).await?.is_some() {
            return Err(AppError::ArtifactConflict(format!(
                "{} of run {}",
                ArtifactKind::Task,
                run.id
            )));
        }

        let task = self.tasks.fetch(&run.task_id).await?;
        self.store.put_json(&run.id, ArtifactKind::Task, &task).await?;

        let base = self.gateway.current_line().await?;
        tracing::info!(run = %run.id, base = %base.name, title = %task.title, "Task fetched");
        run.base = Some(base);

        self.transition(run, Phase::ImplementA, format!("task {} fetched", task.id))
            .await
    }

    /// Run both solvers, each on its own line, and finalize their approaches.
    pub async fn implement(&self, run: &mut WorkflowRun) -> Result<()> {
        let task: Task = self.store.get_json(&run.id, ArtifactKind::Task).await?;
        let base = run.base()?.clone();
        let names = [run.line_name(SolverId::A.slug()), run.line_name(SolverId::B.slug())];

        let (a, b) = if self.settings.concurrent_implementation {
            let (a, b) = tokio::join!(
                self.implement_one(&run.id, &base, &task, &names[0], SolverId::A),
                self.implement_one(&run.id, &base, &task, &names[1], SolverId::B),
            );
            let a = a?;
            self.transition(run, Phase::ImplementB, approach_outcome(&a))
                .await?;
            (a, b?)
        } else {
            let a = self
                .implement_one(&run.id, &base, &task, &names[0], SolverId::A)
                .await?;
            self.transition(run, Phase::ImplementB, approach_outcome(&a))
                .await?;
            let b = self
                .implement_one(&run.id, &base, &task, &names[1], SolverId::B)
                .await?;
            (a, b)
        };

        if a.changes.is_empty() && b.changes.is_empty() {
            return Err(AppError::EmptyApproaches);
        }

        self.transition(run, Phase::ReviewBOfA, approach_outcome(&b))
            .await
    }

    async fn implement_one(
        &self,
        run: &RunId,
        base: &LineHandle,
        task: &Task,
        line_name: &str,
        solver: SolverId,
    ) -> Result<Approach> {
        let line = self.gateway.create_isolated_line(base, line_name).await?;
        tracing::info!(run = %run, solver = %solver, line = %line.name, "Solver starting");

        let request = AgentRequest {
            role: Role::Solver,
            identity: Identity::Solver(solver),
            context: context::solver_context(task),
            working_dir: line.path.clone(),
        };

        let response = match self.invoke(solver.implement_phase(), request).await {
            Ok(response) => response,
            Err(e) if e.is_phase_local() => {
                let degraded = Approach::degraded(solver, line, &e.to_string());
                self.on_solver_error(run, ArtifactKind::Approach(solver), &degraded, e)
                    .await?;
                return Ok(degraded);
            }
            Err(e) => return Err(e),
        };

        if !response.files.is_empty() {
            self.gateway.apply(&line, &response.files).await?;
        }
        let snapshot = self
            .gateway
            .snapshot(&line, &format!("duet: approach {solver} for {}", task.id))
            .await?;
        let changes = self.gateway.diff(base, &line).await?;

        let approach = Approach {
            solver,
            line,
            snapshot: Some(snapshot),
            changes,
            rationale: response.narrative,
            error: None,
        };
        self.store
            .put_json(run, ArtifactKind::Approach(solver), &approach)
            .await?;

        tracing::info!(run = %run, solver = %solver, files = approach.changes.len(), "Approach finalized");
        Ok(approach)
    }

    /// Apply `on_solver_error` to a failed solver or reviewer invocation.
    ///
    /// `Ok` means the degraded stand-in was finalized and the run continues.
    async fn on_solver_error<T: serde::Serialize>(
        &self,
        run: &RunId,
        kind: ArtifactKind,
        degraded: &T,
        error: AppError,
    ) -> Result<()> {
        match self.settings.on_solver_error {
            SolverErrorPolicy::ContinueWithEmpty => {
                tracing::warn!(run = %run, artifact = %kind, error = %error, "Continuing with empty output");
                self.store.put_json(run, kind, degraded).await?;
                Ok(())
            }
            SolverErrorPolicy::AbortRun => {
                self.store
                    .put_draft_json(run, kind, degraded, error.kind())
                    .await?;
                Err(error)
            }
        }
    }

    /// Each solver reviews the other's finalized approach.
    pub async fn review(&self, run: &mut WorkflowRun) -> Result<()> {
        let task: Task = self.store.get_json(&run.id, ArtifactKind::Task).await?;
        let base = run.base()?.clone();

        if self.settings.concurrent_implementation {
            let (of_a, of_b) = tokio::join!(
                self.review_one(&run.id, &base, &task, SolverId::A),
                self.review_one(&run.id, &base, &task, SolverId::B),
            );
            let of_a = of_a?;
            self.transition(run, Phase::ReviewAOfB, review_outcome(&of_a))
                .await?;
            let of_b = of_b?;
            self.transition(run, Phase::Decide, review_outcome(&of_b))
                .await
        } else {
            let of_a = self.review_one(&run.id, &base, &task, SolverId::A).await?;
            self.transition(run, Phase::ReviewAOfB, review_outcome(&of_a))
                .await?;
            let of_b = self.review_one(&run.id, &base, &task, SolverId::B).await?;
            self.transition(run, Phase::Decide, review_outcome(&of_b))
                .await
        }
    }

    async fn review_one(
        &self,
        run: &RunId,
        base: &LineHandle,
        task: &Task,
        of: SolverId,
    ) -> Result<Review> {
        let approach: Approach = self.store.get_json(run, ArtifactKind::Approach(of)).await?;
        let reviewer = of.other();
        tracing::info!(run = %run, reviewer = %reviewer, of = %of, "Review starting");

        // A solver that failed may have left uncommitted edits on its line;
        // its (empty) approach is the base itself.
        let working_dir = if approach.is_degraded() {
            base.path.clone()
        } else {
            approach.line.path.clone()
        };
        let request = AgentRequest {
            role: Role::Reviewer,
            identity: Identity::Solver(reviewer),
            context: context::review_context(task, &approach),
            working_dir,
        };

        let kind = ArtifactKind::Review { of };
        let review = match self.invoke(of.reviewed_in_phase(), request).await {
            Ok(response) => Review::new(of, response.narrative),
            Err(e) if e.is_phase_local() => {
                let degraded = Review::degraded(of, &e.to_string());
                self.on_solver_error(run, kind, &degraded, e).await?;
                return Ok(degraded);
            }
            Err(e) => return Err(e),
        };

        self.store.put_json(run, kind, &review).await?;
        Ok(review)
    }

    /// Ask the arbiter for a verdict and validate it against both approaches.
    ///
    /// An incomplete decision is stored as a draft and retried once with the
    /// problems fed back, as long as the retry budget allows.
    pub async fn decide(
        &self,
        run: &mut WorkflowRun,
        mut feedback: Option<String>,
    ) -> Result<DecisionRecord> {
        let task: Task = self.store.get_json(&run.id, ArtifactKind::Task).await?;
        let a: Approach = self
            .store
            .get_json(&run.id, ArtifactKind::Approach(SolverId::A))
            .await?;
        let b: Approach = self
            .store
            .get_json(&run.id, ArtifactKind::Approach(SolverId::B))
            .await?;
        let review_of_a: Review = self
            .store
            .get_json(&run.id, ArtifactKind::Review { of: SolverId::A })
            .await?;
        let review_of_b: Review = self
            .store
            .get_json(&run.id, ArtifactKind::Review { of: SolverId::B })
            .await?;
        let working_dir = run.base()?.path.clone();

        loop {
            run.decide_attempts += 1;
            let attempt = run.decide_attempts;
            tracing::info!(run = %run.id, attempt, "Arbiter deciding");

            let request = AgentRequest {
                role: Role::Arbiter,
                identity: Identity::Arbiter,
                context: context::arbiter_context(
                    &task,
                    &a,
                    &b,
                    &review_of_a,
                    &review_of_b,
                    feedback.as_deref(),
                ),
                working_dir: working_dir.clone(),
            };

            let output = match self.invoke(Phase::Decide, request).await {
                Ok(response) => response.narrative,
                Err(e) => {
                    if e.is_phase_local() {
                        self.decision_draft(&run.id, &format!("Arbiter failed: {e}"), e.kind())
                            .await?;
                    }
                    return Err(e);
                }
            };

            let checked = decision::parse(&output, attempt).and_then(|decision| {
                decision::validate(&decision, &a, &b)?;
                Ok(decision)
            });

            match checked {
                Ok(decision) => {
                    self.store_decision(&run.id, &decision).await?;
                    self.transition(
                        run,
                        Phase::FinalImplement,
                        format!("verdict: {}", decision.verdict),
                    )
                    .await?;
                    return Ok(decision);
                }
                Err(AppError::IncompleteDecision(problems)) => {
                    let summary = problems.join("; ");
                    tracing::warn!(run = %run.id, attempt, problems = %summary, "Decision incomplete");
                    self.decision_draft(&run.id, &output, &summary).await?;

                    if !run.machine.can_redecide() {
                        return Err(AppError::IncompleteDecision(problems));
                    }
                    self.transition(run, Phase::Decide, format!("decision incomplete: {summary}"))
                        .await?;
                    feedback = Some(
                        problems
                            .iter()
                            .map(|p| format!("- {p}"))
                            .collect::<Vec<_>>()
                            .join("\n"),
                    );
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Finalize `decision`, replacing the one from an earlier attempt if needed.
    async fn store_decision(&self, run: &RunId, decision: &DecisionRecord) -> Result<()> {
        let finalized = self
            .store
            .record(run, ArtifactKind::Decision)
            .await?
            .is_some_and(|r| r.is_finalized());

        if finalized {
            let content = serde_json::to_string_pretty(decision)?;
            self.store
                .put_overwrite(
                    run,
                    ArtifactKind::Decision,
                    &content,
                    &OverwriteToken::for_decision_retry(),
                )
                .await?;
        } else {
            self.store
                .put_json(run, ArtifactKind::Decision, decision)
                .await?;
        }
        Ok(())
    }

    /// Keep rejected arbiter output next to the decision. A finalized decision
    /// from an earlier attempt stays authoritative.
    async fn decision_draft(&self, run: &RunId, content: &str, note: &str) -> Result<()> {
        match self
            .store
            .put_draft(run, ArtifactKind::Decision, content, note)
            .await
        {
            Ok(_) => Ok(()),
            Err(AppError::ArtifactConflict(_)) => {
                tracing::warn!(run = %run, note, "Decision already finalized; rejected output not stored");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Materialize the decision on a fresh final line.
    ///
    /// The merge is computed before the line exists, so a conflicting
    /// decision leaves only a draft artifact behind.
    pub async fn final_implement(
        &self,
        run: &mut WorkflowRun,
        decision: &DecisionRecord,
    ) -> Result<FinalImplementation> {
        let a: Approach = self
            .store
            .get_json(&run.id, ArtifactKind::Approach(SolverId::A))
            .await?;
        let b: Approach = self
            .store
            .get_json(&run.id, ArtifactKind::Approach(SolverId::B))
            .await?;

        let (changes, sources) = match merge::materialize(&decision.verdict, &a, &b) {
            Ok(merged) => merged,
            Err(AppError::MergeConflict(paths)) => {
                tracing::warn!(run = %run.id, paths = ?paths, "Merge conflict");
                let draft = serde_json::json!({
                    "decision_attempt": decision.attempt,
                    "verdict": decision.verdict,
                    "conflicts": paths,
                });
                self.store
                    .put_draft_json(
                        &run.id,
                        ArtifactKind::FinalImplementation,
                        &draft,
                        "merge_conflict",
                    )
                    .await?;
                return Err(AppError::MergeConflict(paths));
            }
            Err(e) => return Err(e),
        };

        let base = run.base()?.clone();
        let line = self
            .gateway
            .create_isolated_line(&base, &run.line_name("final"))
            .await?;
        self.gateway.apply(&line, &changes).await?;
        let snapshot = self
            .gateway
            .snapshot(
                &line,
                &format!("duet: {} for {}", decision.verdict, run.task_id),
            )
            .await?;

        let implementation = FinalImplementation {
            line,
            snapshot,
            changes,
            sources,
        };
        self.store
            .put_json(&run.id, ArtifactKind::FinalImplementation, &implementation)
            .await?;

        self.transition(
            run,
            Phase::Submit,
            format!(
                "{} file(s) on {}",
                implementation.changes.len(),
                implementation.line.name
            ),
        )
        .await?;
        Ok(implementation)
    }

    /// Open the change request and finalize the submission.
    pub async fn submit(
        &self,
        run: &mut WorkflowRun,
        decision: &DecisionRecord,
        implementation: &FinalImplementation,
    ) -> Result<RequestRef> {
        let task: Task = self.store.get_json(&run.id, ArtifactKind::Task).await?;
        let review_of_a: Review = self
            .store
            .get_json(&run.id, ArtifactKind::Review { of: SolverId::A })
            .await?;
        let review_of_b: Review = self
            .store
            .get_json(&run.id, ArtifactKind::Review { of: SolverId::B })
            .await?;

        let body = submission::compose(
            &run.id,
            &task,
            decision,
            &review_of_a,
            &review_of_b,
            implementation,
        );
        self.store
            .put_draft(
                &run.id,
                ArtifactKind::Submission,
                &body,
                "change request not opened yet",
            )
            .await?;

        let base = run.base()?.clone();
        let request = self
            .gateway
            .open_change_request(
                &base,
                &implementation.line,
                &submission::title(&task),
                &body,
            )
            .await?;

        self.store
            .put(
                &run.id,
                ArtifactKind::Submission,
                &format!("{body}\nChange request: {request}\n"),
            )
            .await?;

        let missing = self.store.missing(&run.id).await?;
        if !missing.is_empty() {
            let names: Vec<String> = missing.iter().map(ToString::to_string).collect();
            return Err(AppError::Internal(format!(
                "artifacts not finalized: {}",
                names.join(", ")
            )));
        }

        self.transition(run, Phase::Submitted, format!("opened {request}"))
            .await?;
        Ok(request)
    }
}

fn approach_outcome(approach: &Approach) -> String {
    match &approach.error {
        Some(error) => format!("approach {} degraded: {error}", approach.solver),
        None => format!(
            "approach {} finalized with {} file(s)",
            approach.solver,
            approach.changes.len()
        ),
    }
}

fn review_outcome(review: &Review) -> String {
    match &review.error {
        Some(error) => format!("review of {} degraded: {error}", review.of),
        None => format!("review of {} by {} finalized", review.of, review.author),
    }
}
