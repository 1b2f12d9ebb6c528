use nanoid::nanoid;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::action::{ControlToken, GroundedAction};
use crate::agent::{app_catalog_for, execute_command, AgentError, Computer, RunMetrics, RunReport, RunStatus, StepLog};
use crate::executor::decide;
use crate::grounding::{ground_observation, Grounder, GroundingConfig};
use crate::llm::{generate_or_empty, Completion, Conversation, GenerationParams};
use crate::ocr::TextDetector;
use crate::prompts;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ReactiveConfig {
    pub max_turns: usize,
    pub max_window: usize,
    pub enable_reflection: bool,
    pub wait_delay: Duration,
    pub settle_delay: Duration,
    pub generation: GenerationParams,
    pub grounding: GroundingConfig,
}

impl Default for ReactiveConfig {
    fn default() -> Self {
        Self {
            max_turns: 15,
            max_window: 3,
            enable_reflection: true,
            wait_delay: Duration::from_secs(5),
            settle_delay: Duration::from_secs(1),
            generation: GenerationParams::default(),
            grounding: GroundingConfig::default(),
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ReactiveInfo {
    pub plan: String,
    pub plan_code: String,
    pub reflection: Option<String>,
    pub feedback: Option<String>,
}

pub struct ReactiveAgent<C: Computer> {
    computer: C,
    actor: Arc<dyn Completion>,
    reflector: Arc<dyn Completion>,
    cfg: ReactiveConfig,
    detector: Option<Arc<dyn TextDetector>>,
    acting: Conversation,
    reflection: Conversation,
    last_plan: Option<String>,
    pending: Option<ControlToken>,
    feedback: Option<String>,
    turn: usize,
}

impl<C: Computer> ReactiveAgent<C> {
    pub fn new(computer: C, actor: Arc<dyn Completion>, reflector: Arc<dyn Completion>, cfg: ReactiveConfig) -> Self {
        Self {
            computer,
            actor,
            reflector,
            cfg,
            detector: None,
            acting: Conversation::new(String::new()),
            reflection: Conversation::new(prompts::REFLECTION_ON_TRAJECTORY),
            last_plan: None,
            pending: None,
            feedback: None,
            turn: 0,
        }
    }

    pub fn with_text_detector(mut self, detector: Arc<dyn TextDetector>) -> Self {
        self.detector = Some(detector);
        self
    }

    pub fn computer(&self) -> &C {
        &self.computer
    }

    pub fn reset(&mut self) {
        self.acting.reset();
        self.reflection.reset();
        self.last_plan = None;
        self.pending = None;
        self.feedback = None;
        self.turn = 0;
    }

    pub fn set_execution_feedback(&mut self, feedback: impl Into<String>) {
        self.feedback = Some(feedback.into());
    }

    async fn reflect(&mut self, goal: &str) -> Option<String> {
        if !self.cfg.enable_reflection || self.turn == 0 {
            return None;
        }
        let last_plan = self.last_plan.clone().unwrap_or_default();
        let prompt = if self.reflection.is_empty() {
            format!("Task: {goal}\n\nLatest plan and action of the agent:\n{last_plan}")
        } else {
            format!("Latest plan and action of the agent:\n{last_plan}")
        };
        self.reflection.prune(self.cfg.max_window);
        self.reflection.push_user(prompt);
        let reply = generate_or_empty(self.reflector.as_ref(), self.reflection.messages(), self.cfg.generation).await;
        self.reflection.push_assistant(reply.clone());
        Some(reply).filter(|r| !r.trim().is_empty())
    }

    pub async fn predict(&mut self, goal: &str, grounder: &mut Grounder) -> (ReactiveInfo, GroundedAction) {
        if let Some(token) = self.pending.take() {
            let info = ReactiveInfo { plan_code: token.to_string(), ..ReactiveInfo::default() };
            return (info, token.into());
        }
        if self.turn == 0 {
            self.acting
                .set_system_prompt(prompts::reactive_system_prompt(goal, &grounder.apps().names()));
        }

        let reflection = self.reflect(goal).await;
        let mut prompt = format!("Accessibility tree:\n{}\n", grounder.linearized());
        if let Some(r) = &reflection {
            prompt.push_str(&format!("\nReflection on the previous steps:\n{r}\n"));
        }
        if let Some(fb) = &self.feedback {
            prompt.push_str(&format!("\nExecution level feedback of the previous action:\n{fb}\n"));
        }
        self.acting.prune(self.cfg.max_window);
        self.acting.push_user(prompt);
        let reply = generate_or_empty(self.actor.as_ref(), self.acting.messages(), self.cfg.generation).await;
        self.acting.push_assistant(reply.clone());

        let decision = decide(&reply, grounder);
        self.feedback = decision.feedback.clone();
        self.pending = decision.trailing;
        self.last_plan = Some(reply.clone());
        self.turn += 1;

        let info = ReactiveInfo {
            plan: reply,
            plan_code: decision.plan_code,
            reflection,
            feedback: decision.feedback,
        };
        (info, decision.action)
    }

    pub async fn run(&mut self, goal: &str) -> Result<RunReport, AgentError> {
        let run_id = nanoid!();
        let start = Instant::now();
        self.reset();
        let apps = app_catalog_for(&self.computer, &self.cfg.grounding).await;

        info!(run_id = %run_id, goal, "reactive run started");
        let mut metrics = RunMetrics::default();
        let mut steps = Vec::new();
        let mut status = RunStatus::BudgetExhausted;
        let mut last_error: Option<String> = None;

        for turn in 0..self.cfg.max_turns {
            let observation = self.computer.observe().await?;
            let mut grounder =
                ground_observation(&observation, &self.cfg.grounding, apps.clone(), self.detector.as_deref()).await;
            let (turn_info, action) = self.predict(goal, &mut grounder).await;
            metrics.turns = turn + 1;
            info!(turn, action = %action, "reactive turn");

            let mut step = StepLog {
                turn,
                plan_code: turn_info.plan_code,
                action: action.to_string(),
                timestamp_ms: start.elapsed().as_millis(),
                ..StepLog::default()
            };
            match &action {
                GroundedAction::Done | GroundedAction::Fail => {
                    status = if action == GroundedAction::Done { RunStatus::Success } else { RunStatus::Failed };
                    step.result_hint = action.to_string().to_lowercase();
                    steps.push(step);
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
                            self.set_execution_feedback(format!("The previous action could not be executed: {e}"));
                            step.result_hint = "error".into();
                            step.error = Some(e.to_string());
                            last_error = Some(e.to_string());
                        }
                    }
                    steps.push(step);
                    tokio::time::sleep(self.cfg.settle_delay).await;
                }
            }
        }

        metrics.success = status == RunStatus::Success;
        metrics.time_ms = start.elapsed().as_millis();
        info!(run_id = %run_id, ?status, "reactive run finished");
        Ok(RunReport {
            run_id,
            goal: goal.to_string(),
            status,
            metrics,
            steps,
            done_subtasks: Vec::new(),
            error: last_error,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{Observation, StaticComputer};
    use crate::grounding::{UiNode, UiTree};
    use crate::llm::ScriptedCompletion;

    fn observation() -> Observation {
        Observation {
            tree: UiTree::single(
                UiNode::new("frame")
                    .with_frame(0.0, 0.0, 300.0, 200.0)
                    .with_child(UiNode::new("push button").with_title("Save").with_frame(10.0, 10.0, 50.0, 20.0)),
            ),
            screenshot: Vec::new(),
        }
    }

    fn quick() -> ReactiveConfig {
        ReactiveConfig { wait_delay: Duration::ZERO, settle_delay: Duration::ZERO, ..ReactiveConfig::default() }
    }

    #[tokio::test]
    async fn reflection_joins_from_the_second_turn() {
        let actor = Arc::new(ScriptedCompletion::new(["```agent.click(1)```", "```agent.click(17)```", "```DONE```"]));
        let reflector = Arc::new(ScriptedCompletion::new(["on track", "wrong id"]));
        let computer = StaticComputer::new(vec![observation()], Vec::new());
        let mut agent = ReactiveAgent::new(computer, actor.clone(), reflector.clone(), quick());

        let report = agent.run("save the file").await.unwrap();
        assert_eq!(report.status, RunStatus::Success);
        assert_eq!(reflector.calls(), 2);
        // the hallucinated id was held back as WAIT
        assert_eq!(report.steps[1].action, "WAIT");
        assert_eq!(agent.computer().performed().len(), 2);

        let third = &actor.requests()[2];
        let prompt = third.last().unwrap().text();
        assert!(prompt.contains("wrong id"));
        assert!(prompt.contains("Execution level feedback"));
    }
}
