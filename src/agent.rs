use async_trait::async_trait;
use nanoid::nanoid;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::fs as async_fs;
use tracing::{debug, info, warn};

use crate::action::{Command, GroundedAction, InputOp};
use crate::executor::{Executor, ExecutorConfig, SubtaskContext};
use crate::grounding::{ground_observation, AppCatalog, AppEntry, Grounder, GroundingConfig, UiTree};
use crate::knowledge::{lookup_or_none, KnowledgeKind, KnowledgeStore};
use crate::llm::Completion;
use crate::ocr::TextDetector;
use crate::planner::{Planner, PlannerConfig, Subtask, SubtaskQueue, SubtaskStatus};

// ========================= Core Types =========================

/// One capture of the UI: the structural tree and a PNG screenshot (may be empty).
#[derive(Clone, Debug, Default)]
pub struct Observation {
    pub tree: UiTree,
    pub screenshot: Vec<u8>,
}

#[derive(Debug, Error, Clone, PartialEq, Serialize, Deserialize)]
pub enum AgentError {
    #[error("computer error: {0}")]
    Computer(String),
    #[error("completion error: {0}")]
    Completion(String),
    #[error("knowledge error: {0}")]
    Knowledge(String),
    #[error("config error: {0}")]
    Config(String),
    #[error("other error: {0}")]
    Other(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    Success,
    Failed,
    BudgetExhausted,
}

#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct RunMetrics {
    pub turns: usize,
    pub actions: usize,
    pub subtasks_done: usize,
    pub replans: usize,
    pub time_ms: u128,
    pub success: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct StepLog {
    pub turn: usize,
    pub subtask: String,
    pub plan_code: String,
    pub action: String,
    pub result_hint: String,
    pub error: Option<String>,
    pub timestamp_ms: u128,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub goal: String,
    pub status: RunStatus,
    pub metrics: RunMetrics,
    pub steps: Vec<StepLog>,
    pub done_subtasks: Vec<String>,
    pub error: Option<String>,
}

/// What happened inside one call to [`Agent::predict`].
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TurnInfo {
    pub subtask: String,
    pub subtask_info: String,
    pub subtask_status: Option<SubtaskStatus>,
    pub search_query: String,
    /// Set when the planner ran during this turn.
    pub planner_plan: Option<String>,
    pub executor_plan: String,
    pub plan_code: String,
    pub feedback: Option<String>,
    pub replans: usize,
}

// ========================= Pluggable Subsystems =========================

#[async_trait]
pub trait Computer: Send + Sync {
    async fn observe(&self) -> Result<Observation, AgentError>;
    async fn perform(&self, op: &InputOp) -> Result<(), AgentError>;
    async fn installed_apps(&self) -> Result<Vec<AppEntry>, AgentError>;
}

#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn save(&self, run_id: &str, turn: usize, observation: &Observation) -> Result<(), AgentError>;
}

/// Runs the primitives of `cmd` in order, stopping at the first failure.
pub async fn execute_command<C: Computer + ?Sized>(computer: &C, cmd: &Command) -> Result<(), AgentError> {
    for op in &cmd.ops {
        computer.perform(op).await?;
    }
    Ok(())
}

// ========================= Agent Core =========================

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub max_turns: usize,
    pub max_replans: usize,
    pub wait_delay: Duration,
    pub settle_delay: Duration,
    pub update_memory: bool,
    pub knowledge_dir: PathBuf,
    pub grounding: GroundingConfig,
    pub planner: PlannerConfig,
    pub executor: ExecutorConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_turns: 15,
            max_replans: 5,
            wait_delay: Duration::from_secs(5),
            settle_delay: Duration::from_secs(1),
            update_memory: true,
            knowledge_dir: PathBuf::from("kb"),
            grounding: GroundingConfig::default(),
            planner: PlannerConfig::default(),
            executor: ExecutorConfig::default(),
        }
    }
}

impl AgentConfig {
    /// Defaults overridden by `GLASS_MAX_TURNS` and `GLASS_KNOWLEDGE_DIR`.
    pub fn from_env() -> Result<Self, AgentError> {
        let mut cfg = Self::default();
        if let Ok(v) = std::env::var("GLASS_MAX_TURNS") {
            cfg.max_turns = v
                .trim()
                .parse()
                .map_err(|e| AgentError::Config(format!("GLASS_MAX_TURNS={v}: {e}")))?;
        }
        if let Ok(dir) = std::env::var("GLASS_KNOWLEDGE_DIR") {
            cfg.knowledge_dir = PathBuf::from(dir);
        }
        Ok(cfg)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskOutcome {
    Done,
    Failed,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    #[default]
    Planning,
    SelectSubtask,
    Executing,
    Finished(TaskOutcome),
}

/// Everything the orchestrator carries between turns of one task.
#[derive(Clone, Debug, Default)]
pub struct TaskState {
    pub phase: Phase,
    /// The first plan has been made; later plans are replans.
    pub planned: bool,
    pub queue: SubtaskQueue,
    pub current: Option<Subtask>,
    pub done: Vec<Subtask>,
    pub failure_feedback: String,
    pub search_query: String,
    pub replans: usize,
    pub turns: usize,
}

impl TaskState {
    pub fn done_names(&self) -> Vec<String> {
        self.done.iter().map(|s| s.name.clone()).collect()
    }
}

const PLAN_SEPARATOR: &str = "\n----------------------\n\nPlan:\n";

/// Knowledge key of a subtask summary.
pub fn subtask_signature(search_query: &str, subtask_name: &str, subtask_info: &str) -> String {
    format!("Task:\n{search_query}\n\nSubtask: {subtask_name}\nSubtask Instruction: {subtask_info}")
}

/// The part of a subtask trajectory before its first plan.
pub fn trajectory_signature(trajectory: &str) -> &str {
    trajectory.split_once(PLAN_SEPARATOR).map_or(trajectory, |(sig, _)| sig)
}

/// Text record of the task and of the subtask in progress, fed to the
/// summarization and reflection prompts.
#[derive(Clone, Debug, Default)]
pub struct Trajectory {
    task: String,
    subtask: String,
}

impl Trajectory {
    pub fn start(goal: &str) -> Self {
        Self { task: format!("Task:\n{goal}"), subtask: String::new() }
    }

    pub fn record(&mut self, info: &TurnInfo) {
        if info.subtask_status == Some(SubtaskStatus::Start) || self.subtask.is_empty() {
            self.subtask = subtask_signature(&info.search_query, &info.subtask, &info.subtask_info);
        }
        self.subtask.push_str(PLAN_SEPARATOR);
        self.subtask.push_str(&info.executor_plan);
        self.task
            .push_str(&format!("\n\nSubtask: {}\nPlan:\n{}", info.subtask, info.executor_plan));
    }

    pub fn note_replan(&mut self, feedback: &str) {
        self.task.push_str(&format!("\n\nReflection:\n{feedback}"));
        self.subtask.clear();
    }

    pub fn take_subtask(&mut self) -> Option<String> {
        (!self.subtask.is_empty()).then(|| std::mem::take(&mut self.subtask))
    }

    pub fn task(&self) -> &str {
        &self.task
    }
}

/// Planner/executor orchestrator: plans subtasks, executes them one action per
/// turn, replans on failure and writes experience memory.
pub struct Agent<C, K>
where
    C: Computer,
    K: KnowledgeStore,
{
    computer: C,
    planner: Planner,
    executor: Executor,
    knowledge: K,
    cfg: AgentConfig,
    detector: Option<Arc<dyn TextDetector>>,
    snapshot_store: Option<Arc<dyn SnapshotStore>>,
    state: TaskState,
    trajectory: Trajectory,
}

impl<C, K> Agent<C, K>
where
    C: Computer,
    K: KnowledgeStore,
{
    pub fn new(
        computer: C,
        planner_llm: Arc<dyn Completion>,
        executor_llm: Arc<dyn Completion>,
        knowledge: K,
        cfg: AgentConfig,
    ) -> Self {
        Self {
            computer,
            planner: Planner::new(planner_llm, cfg.planner.clone()),
            executor: Executor::new(executor_llm, cfg.executor.clone()),
            knowledge,
            cfg,
            detector: None,
            snapshot_store: None,
            state: TaskState::default(),
            trajectory: Trajectory::default(),
        }
    }

    pub fn with_text_detector(mut self, detector: Arc<dyn TextDetector>) -> Self {
        self.detector = Some(detector);
        self
    }

    pub fn with_snapshot_store(mut self, store: Arc<dyn SnapshotStore>) -> Self {
        self.snapshot_store = Some(store);
        self
    }

    pub fn computer(&self) -> &C {
        &self.computer
    }

    pub fn state(&self) -> &TaskState {
        &self.state
    }

    pub fn reset(&mut self) {
        self.state = TaskState::default();
        self.trajectory = Trajectory::default();
        self.planner.reset();
        self.executor.reset();
    }

    /// Advances the task state machine until it yields exactly one action for
    /// the UI, or a terminal `DONE`/`FAIL`. Planning, subtask completion and
    /// replanning happen silently inside the call.
    pub async fn predict(&mut self, goal: &str, grounder: &mut Grounder) -> (TurnInfo, GroundedAction) {
        self.state.turns += 1;
        let mut info = TurnInfo::default();

        loop {
            match self.state.phase {
                Phase::Finished(outcome) => {
                    info.search_query = self.state.search_query.clone();
                    info.replans = self.state.replans;
                    let action = match outcome {
                        TaskOutcome::Done => GroundedAction::Done,
                        TaskOutcome::Failed => GroundedAction::Fail,
                    };
                    return (info, action);
                }

                Phase::Planning => {
                    let replan = self.state.planned;
                    if replan && self.state.replans > self.cfg.max_replans {
                        warn!(replans = self.state.replans, "replanning cap reached; giving up");
                        self.state.phase = Phase::Finished(TaskOutcome::Failed);
                        continue;
                    }
                    let (plan, queue) = self
                        .planner
                        .get_action_queue(goal, grounder.linearized(), &self.state.failure_feedback, replan)
                        .await;
                    self.state.planned = true;
                    self.state.queue = queue;
                    self.state.search_query = plan.search_query;
                    info.planner_plan = Some(plan.plan);
                    self.state.phase = Phase::SelectSubtask;
                }

                Phase::SelectSubtask => match self.state.queue.pop_front() {
                    Some(mut subtask) => {
                        subtask.status = SubtaskStatus::Start;
                        info!(subtask = %subtask.name, remaining = self.state.queue.len(), "subtask selected");
                        self.state.current = Some(subtask);
                        self.executor.reset();
                        self.state.phase = Phase::Executing;
                    }
                    None => {
                        warn!("subtask queue empty outside of a terminal state; replanning");
                        self.state.replans += 1;
                        self.state.phase = Phase::Planning;
                    }
                },

                Phase::Executing => {
                    let Some(mut current) = self.state.current.clone() else {
                        self.state.phase = Phase::SelectSubtask;
                        continue;
                    };
                    let future = self.state.queue.names();
                    let done = self.state.done_names();
                    let experience = if self.cfg.update_memory && current.status == SubtaskStatus::Start {
                        let key = subtask_signature(&self.state.search_query, &current.name, &current.info);
                        lookup_or_none(&self.knowledge, KnowledgeKind::SubtaskExperience, &key).await
                    } else {
                        None
                    };
                    let ctx = SubtaskContext {
                        subtask: &current,
                        future: &future,
                        done: &done,
                        experience: experience.as_deref(),
                    };
                    let (exec, action) = self.executor.generate_next_action(goal, &ctx, grounder).await;

                    info.subtask = current.name.clone();
                    info.subtask_info = current.info.clone();
                    info.subtask_status = Some(current.status);
                    info.search_query = self.state.search_query.clone();
                    info.executor_plan = exec.plan.clone();
                    info.plan_code = exec.plan_code.clone();
                    info.feedback = exec.feedback.clone();

                    match action {
                        GroundedAction::Fail => {
                            // the model's reasoning is whatever precedes its code block
                            let reasoning = exec.plan.split("```").next().unwrap_or_default().trim();
                            let detail = exec
                                .feedback
                                .clone()
                                .or_else(|| Some(reasoning.to_string()).filter(|r| !r.is_empty()))
                                .unwrap_or_else(|| "the executor reported FAIL".to_string());
                            let detail = detail.trim_end_matches('.');
                            let completed = if done.is_empty() { "none".to_string() } else { done.join(", ") };
                            self.state.failure_feedback = format!(
                                "Completed subtasks: {completed}. The subtask {} could not be completed: {detail}. Please replan the remaining work.",
                                current.name
                            );
                            self.state.replans += 1;
                            info.replans = self.state.replans;
                            self.state.current = None;
                            self.executor.reset();
                            self.trajectory.note_replan(&self.state.failure_feedback);
                            warn!(subtask = %current.name, replans = self.state.replans, "subtask failed");

                            if !self.state.queue.is_empty() && self.state.replans <= self.cfg.max_replans {
                                self.state.phase = Phase::Planning;
                                continue;
                            }
                            self.state.phase = Phase::Finished(TaskOutcome::Failed);
                            return (info, GroundedAction::Fail);
                        }
                        GroundedAction::Done => {
                            current.status = SubtaskStatus::Done;
                            info!(subtask = %current.name, "subtask done");
                            self.state.done.push(current);
                            self.state.current = None;
                            self.executor.reset();
                            self.remember_subtask().await;

                            if self.state.queue.is_empty() {
                                self.state.phase = Phase::Finished(TaskOutcome::Done);
                                info.replans = self.state.replans;
                                return (info, GroundedAction::Done);
                            }
                            self.state.phase = Phase::SelectSubtask;
                        }
                        other => {
                            if let Some(c) = self.state.current.as_mut() {
                                c.status = SubtaskStatus::In;
                            }
                            info.replans = self.state.replans;
                            return (info, other);
                        }
                    }
                }
            }
        }
    }

    async fn remember_subtask(&mut self) {
        let Some(trajectory) = self.trajectory.take_subtask() else {
            return;
        };
        if !self.cfg.update_memory {
            return;
        }
        let key = trajectory_signature(&trajectory).to_string();
        if lookup_or_none(&self.knowledge, KnowledgeKind::SubtaskExperience, &key).await.is_some() {
            debug!("subtask experience already stored");
            return;
        }
        let summary = self.planner.generate_subtask_summarization(&trajectory).await;
        if summary.is_empty() {
            return;
        }
        if let Err(e) = self
            .knowledge
            .insert_if_absent(KnowledgeKind::SubtaskExperience, &key, &summary)
            .await
        {
            warn!(error = %e, "failed to store subtask experience");
        }
    }

    async fn remember_task(&mut self) {
        let key = self.state.search_query.clone();
        if key.is_empty() {
            return;
        }
        if lookup_or_none(&self.knowledge, KnowledgeKind::TaskReflection, &key).await.is_some() {
            return;
        }
        let reflection = self.planner.generate_lifelong_learning_reflection(self.trajectory.task()).await;
        if reflection.is_empty() {
            return;
        }
        if let Err(e) = self
            .knowledge
            .insert_if_absent(KnowledgeKind::TaskReflection, &key, &reflection)
            .await
        {
            warn!(error = %e, "failed to store task reflection");
        }
    }

    /// Runs `goal` to completion, failure or the turn cap.
    pub async fn run(&mut self, goal: &str) -> Result<RunReport, AgentError> {
        let run_id = nanoid!();
        let start = Instant::now();
        self.reset();
        self.trajectory = Trajectory::start(goal);

        let apps = app_catalog_for(&self.computer, &self.cfg.grounding).await;
        if self.cfg.update_memory {
            let experience = lookup_or_none(&self.knowledge, KnowledgeKind::TaskReflection, goal).await;
            self.planner.set_experience(experience);
        }

        info!(run_id = %run_id, goal, "run started");
        let mut metrics = RunMetrics::default();
        let mut steps: Vec<StepLog> = Vec::new();
        let mut status = RunStatus::BudgetExhausted;
        let mut last_error: Option<AgentError> = None;

        for turn in 0..self.cfg.max_turns {
            let observation = self.computer.observe().await?;
            if let Some(store) = &self.snapshot_store {
                if let Err(e) = store.save(&run_id, turn, &observation).await {
                    warn!(turn, error = %e, "snapshot not saved");
                }
            }
            let mut grounder =
                ground_observation(&observation, &self.cfg.grounding, apps.clone(), self.detector.as_deref()).await;
            let (turn_info, action) = self.predict(goal, &mut grounder).await;
            metrics.turns = turn + 1;

            let mut step = StepLog {
                turn,
                subtask: turn_info.subtask.clone(),
                plan_code: turn_info.plan_code.clone(),
                action: action.to_string(),
                result_hint: String::new(),
                error: None,
                timestamp_ms: start.elapsed().as_millis(),
            };
            info!(turn, subtask = %turn_info.subtask, action = %action, "turn");

            match &action {
                GroundedAction::Done => {
                    step.result_hint = "done".into();
                    steps.push(step);
                    status = RunStatus::Success;
                    break;
                }
                GroundedAction::Fail => {
                    step.result_hint = "fail".into();
                    steps.push(step);
                    status = RunStatus::Failed;
                    break;
                }
                GroundedAction::Wait => {
                    step.result_hint = "wait".into();
                    steps.push(step);
                    tokio::time::sleep(self.cfg.wait_delay).await;
                }
                GroundedAction::Execute(cmd) => {
                    match execute_command(&self.computer, cmd).await {
                        Ok(()) => {
                            step.result_hint = "executed".into();
                            metrics.actions += 1;
                        }
                        Err(e) => {
                            warn!(turn, error = %e, "command failed");
                            self.executor
                                .set_execution_feedback(format!("The previous action could not be executed: {e}"));
                            step.result_hint = "error".into();
                            step.error = Some(e.to_string());
                            last_error = Some(e);
                        }
                    }
                    self.trajectory.record(&turn_info);
                    steps.push(step);
                    tokio::time::sleep(self.cfg.settle_delay).await;
                }
            }
        }

        if self.cfg.update_memory {
            self.remember_task().await;
        }

        metrics.subtasks_done = self.state.done.len();
        metrics.replans = self.state.replans;
        metrics.success = status == RunStatus::Success;
        metrics.time_ms = start.elapsed().as_millis();
        let msg = match status {
            RunStatus::Success => "Goal met",
            RunStatus::Failed => "Task failed",
            RunStatus::BudgetExhausted => "Turn budget exceeded",
        };
        Ok(self.finish(run_id, goal, steps, metrics, status, msg, last_error.map(|e| e.to_string())))
    }

    #[allow(clippy::too_many_arguments)]
    fn finish(
        &self,
        run_id: String,
        goal: &str,
        steps: Vec<StepLog>,
        metrics: RunMetrics,
        status: RunStatus,
        msg: &str,
        err: Option<String>,
    ) -> RunReport {
        info!(run_id = %run_id, ?status, turns = metrics.turns, "run finished");
        RunReport {
            run_id,
            goal: goal.to_string(),
            status,
            metrics,
            steps,
            done_subtasks: self.state.done_names(),
            error: err.or_else(|| (status != RunStatus::Success).then(|| msg.to_string())),
        }
    }
}

// ========================= Defaults & Helpers =========================

pub struct DiskSnapshotStore {
    base_dir: PathBuf,
}

impl DiskSnapshotStore {
    pub fn new<P: AsRef<Path>>(base: P) -> Self {
        Self { base_dir: base.as_ref().to_path_buf() }
    }
}

#[async_trait]
impl SnapshotStore for DiskSnapshotStore {
    async fn save(&self, run_id: &str, turn: usize, observation: &Observation) -> Result<(), AgentError> {
        if observation.screenshot.is_empty() {
            return Ok(());
        }
        let dir = self.base_dir.join(run_id);
        async_fs::create_dir_all(&dir)
            .await
            .map_err(|e| AgentError::Other(format!("create_dir: {}", e)))?;
        let path = dir.join(format!("turn_{:03}.png", turn));
        async_fs::write(&path, &observation.screenshot)
            .await
            .map_err(|e| AgentError::Other(format!("write: {}", e)))
    }
}

/// Scripted computer for tests and dry runs. Hands out observations in order,
/// repeating the last one, and records every primitive it is asked to perform.
#[derive(Default)]
pub struct StaticComputer {
    observations: Mutex<VecDeque<Observation>>,
    apps: Vec<AppEntry>,
    performed: Mutex<Vec<InputOp>>,
    fail_ops: bool,
}

impl StaticComputer {
    pub fn new(observations: Vec<Observation>, apps: Vec<AppEntry>) -> Self {
        Self {
            observations: Mutex::new(observations.into()),
            apps,
            performed: Mutex::new(Vec::new()),
            fail_ops: false,
        }
    }

    /// Every `perform` call fails after being recorded.
    pub fn failing(mut self) -> Self {
        self.fail_ops = true;
        self
    }

    pub fn performed(&self) -> Vec<InputOp> {
        self.performed.lock().map(|p| p.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Computer for StaticComputer {
    async fn observe(&self) -> Result<Observation, AgentError> {
        let mut queue = self
            .observations
            .lock()
            .map_err(|_| AgentError::Computer("observation queue poisoned".into()))?;
        if queue.len() > 1 {
            return Ok(queue.pop_front().unwrap_or_default());
        }
        Ok(queue.front().cloned().unwrap_or_default())
    }

    async fn perform(&self, op: &InputOp) -> Result<(), AgentError> {
        if let Ok(mut performed) = self.performed.lock() {
            performed.push(op.clone());
        }
        if self.fail_ops {
            return Err(AgentError::Computer(format!("cannot perform {op}")));
        }
        Ok(())
    }

    async fn installed_apps(&self) -> Result<Vec<AppEntry>, AgentError> {
        Ok(self.apps.clone())
    }
}

/// Builds the catalogue `computer` reports, logging enumeration failures.
pub async fn app_catalog_for<C: Computer + ?Sized>(computer: &C, cfg: &GroundingConfig) -> AppCatalog {
    match computer.installed_apps().await {
        Ok(apps) => cfg.app_catalog(apps),
        Err(e) => {
            warn!(error = %e, "could not enumerate applications");
            cfg.app_catalog(Vec::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_is_the_prefix_before_the_first_plan() {
        let mut traj = Trajectory::start("goal");
        let info = TurnInfo {
            subtask: "OpenApp".into(),
            subtask_info: "open it".into(),
            subtask_status: Some(SubtaskStatus::Start),
            search_query: "goal".into(),
            executor_plan: "click".into(),
            ..TurnInfo::default()
        };
        traj.record(&info);
        traj.record(&TurnInfo { subtask_status: Some(SubtaskStatus::In), executor_plan: "type".into(), ..info.clone() });

        let sub = traj.take_subtask().unwrap();
        assert_eq!(trajectory_signature(&sub), subtask_signature("goal", "OpenApp", "open it"));
        assert_eq!(sub.matches("Plan:\n").count(), 2);
        assert!(traj.take_subtask().is_none());
        assert!(traj.task().starts_with("Task:\ngoal"));
    }

    #[tokio::test]
    async fn static_computer_repeats_the_last_observation() {
        let first = Observation { screenshot: vec![1], ..Observation::default() };
        let second = Observation { screenshot: vec![2], ..Observation::default() };
        let computer = StaticComputer::new(vec![first, second], Vec::new());
        assert_eq!(computer.observe().await.unwrap().screenshot, vec![1]);
        assert_eq!(computer.observe().await.unwrap().screenshot, vec![2]);
        assert_eq!(computer.observe().await.unwrap().screenshot, vec![2]);
    }

    #[tokio::test]
    async fn disk_snapshot_store_names_files_by_turn() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskSnapshotStore::new(dir.path());
        let obs = Observation { screenshot: vec![0x89, b'P', b'N', b'G'], ..Observation::default() };
        store.save("run1", 3, &obs).await.unwrap();
        store.save("run1", 4, &Observation::default()).await.unwrap();
        assert!(dir.path().join("run1/turn_003.png").exists());
        assert!(!dir.path().join("run1/turn_004.png").exists());
    }

    #[test]
    fn config_round_trips_through_json() {
        let cfg = AgentConfig { max_turns: 3, ..AgentConfig::default() };
        let json = serde_json::to_string(&cfg).unwrap();
        let back: AgentConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.max_turns, 3);
        assert_eq!(back.grounding.iou_threshold, 0.1);
    }
}
