use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::action::{parse_action_code, parse_call, Action, ControlToken, GroundedAction};
use crate::grounding::Grounder;
use crate::llm::{generate_or_empty, Completion, Conversation, GenerationParams};
use crate::planner::Subtask;
use crate::prompts;

/// The model's reply turned into at most one grounded action.
#[derive(Clone, Debug, PartialEq)]
pub struct Decision {
    /// The code that was acted on, or the control token.
    pub plan_code: String,
    pub action: GroundedAction,
    /// Control token that trailed the code in the same block.
    pub trailing: Option<ControlToken>,
    pub feedback: Option<String>,
}

/// Parses `reply` and grounds its action against `grounder`. Every failure
/// (no block, bad code, out-of-range id, unknown app) becomes `WAIT` plus feedback.
pub fn decide(reply: &str, grounder: &mut Grounder) -> Decision {
    let parsed = parse_action_code(reply);
    let outcome = parsed.outcome;
    let wait = |feedback: String| Decision {
        plan_code: ControlToken::Wait.to_string(),
        action: GroundedAction::Wait,
        trailing: None,
        feedback: Some(feedback),
    };

    let code = match (parsed.code, outcome) {
        (None, None) if reply.trim().is_empty() => return wait("no response from the model".to_string()),
        (None, None) => {
            return wait("The response had no code block. Reply with exactly one action in a fenced code block.".to_string())
        }
        (None, Some(token)) => {
            return Decision { plan_code: token.to_string(), action: token.into(), trailing: None, feedback: None }
        }
        (Some(code), _) => code,
    };

    let action = match parse_call(&code).and_then(|call| Action::from_call(&call)) {
        Ok(action) => action,
        Err(e) => match outcome {
            // the trailing token still decides the subtask
            Some(token) => {
                debug!(code = %code, error = %e, "ignoring unparseable code before a control token");
                return Decision { plan_code: token.to_string(), action: token.into(), trailing: None, feedback: None };
            }
            None => return wait(format!("Could not run `{code}`: {e}.")),
        },
    };

    let hits_before = grounder.out_of_range_hits();
    let grounded = grounder.ground(&action);
    let feedback = grounder.take_feedback();
    if grounder.out_of_range_hits() > hits_before {
        warn!(code = %code, "element id out of range; holding the action");
        return wait(feedback.unwrap_or_else(|| "Element id out of range.".to_string()));
    }

    let trailing = match grounded {
        GroundedAction::Execute(_) => parsed.outcome,
        _ => None,
    };
    let plan_code = match grounded.control() {
        Some(token) => token.to_string(),
        None => code,
    };
    Decision { plan_code, action: grounded, trailing, feedback }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    pub max_window: usize,
    /// Model calls allowed per subtask before it is declared failed.
    pub max_steps: usize,
    pub generation: GenerationParams,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self { max_window: 5, max_steps: 8, generation: GenerationParams::default() }
    }
}

/// What the executor needs to know about where the subtask sits in the plan.
#[derive(Clone, Copy, Debug)]
pub struct SubtaskContext<'a> {
    pub subtask: &'a Subtask,
    pub future: &'a [String],
    pub done: &'a [String],
    /// Stored summary of a previous run of this subtask.
    pub experience: Option<&'a str>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutorInfo {
    pub plan: String,
    pub plan_code: String,
    pub feedback: Option<String>,
    pub step: usize,
}

pub struct Executor {
    llm: Arc<dyn Completion>,
    cfg: ExecutorConfig,
    conversation: Conversation,
    step: usize,
    pending: Option<ControlToken>,
    feedback: Option<String>,
}

impl Executor {
    pub fn new(llm: Arc<dyn Completion>, cfg: ExecutorConfig) -> Self {
        Self {
            llm,
            cfg,
            conversation: Conversation::new(String::new()),
            step: 0,
            pending: None,
            feedback: None,
        }
    }

    /// Forgets the current subtask. Called whenever a subtask starts or ends.
    pub fn reset(&mut self) {
        self.conversation.reset();
        self.step = 0;
        self.pending = None;
        self.feedback = None;
    }

    pub fn step_count(&self) -> usize {
        self.step
    }

    /// Feedback from running the previous command, shown in the next prompt.
    pub fn set_execution_feedback(&mut self, feedback: impl Into<String>) {
        self.feedback = Some(feedback.into());
    }

    fn build_prompt(&self, goal: &str, ctx: &SubtaskContext<'_>, grounder: &Grounder) -> String {
        let mut prompt = String::new();
        if self.step == 0 {
            prompt.push_str(&format!("Overall task: {goal}\n"));
            if !ctx.done.is_empty() {
                prompt.push_str(&format!("Completed subtasks: {}\n", ctx.done.join(", ")));
            }
            if !ctx.future.is_empty() {
                prompt.push_str(&format!("Subtasks after this one: {}\n", ctx.future.join(", ")));
            }
            prompt.push_str(&format!("Current subtask: {}: {}\n", ctx.subtask.name, ctx.subtask.info));
            if let Some(exp) = ctx.experience {
                prompt.push_str(&format!("Experience from a previous run of this subtask:\n{exp}\n"));
            }
        } else {
            prompt.push_str(&format!("Current subtask: {}: {}\n", ctx.subtask.name, ctx.subtask.info));
        }
        if let Some(fb) = &self.feedback {
            prompt.push_str(&format!("\nExecution level feedback of the previous action:\n{fb}\n"));
        }
        prompt.push_str(&format!("\nAccessibility tree:\n{}\n", grounder.linearized()));
        prompt
    }

    pub async fn generate_next_action(
        &mut self,
        goal: &str,
        ctx: &SubtaskContext<'_>,
        grounder: &mut Grounder,
    ) -> (ExecutorInfo, GroundedAction) {
        if let Some(token) = self.pending.take() {
            debug!(subtask = %ctx.subtask.name, %token, "reporting trailing control token");
            let info = ExecutorInfo { plan_code: token.to_string(), step: self.step, ..ExecutorInfo::default() };
            return (info, token.into());
        }

        if self.step >= self.cfg.max_steps {
            warn!(subtask = %ctx.subtask.name, steps = self.step, "step budget exhausted");
            let info = ExecutorInfo {
                plan: format!("Step budget of {} actions exhausted.", self.cfg.max_steps),
                plan_code: ControlToken::Fail.to_string(),
                feedback: None,
                step: self.step,
            };
            return (info, GroundedAction::Fail);
        }

        if self.step == 0 {
            self.conversation.set_system_prompt(prompts::executor_system_prompt(&grounder.apps().names()));
        }
        let prompt = self.build_prompt(goal, ctx, grounder);
        self.conversation.prune(self.cfg.max_window);
        self.conversation.push_user(prompt);

        let reply = generate_or_empty(self.llm.as_ref(), self.conversation.messages(), self.cfg.generation).await;
        self.conversation.push_assistant(reply.clone());

        let decision = decide(&reply, grounder);
        self.feedback = decision.feedback.clone();
        self.pending = decision.trailing;
        self.step += 1;
        info!(subtask = %ctx.subtask.name, step = self.step, action = %decision.plan_code, "executor step");

        let info = ExecutorInfo {
            plan: reply,
            plan_code: decision.plan_code,
            feedback: decision.feedback,
            step: self.step,
        };
        (info, decision.action)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::InputOp;
    use crate::grounding::{AppCatalog, GroundingConfig, UiNode, UiTree};
    use crate::llm::ScriptedCompletion;

    fn grounder() -> Grounder {
        let tree = UiTree::single(
            UiNode::new("frame")
                .with_frame(0.0, 0.0, 400.0, 300.0)
                .with_child(UiNode::new("text").with_title("Result").with_frame(10.0, 10.0, 100.0, 20.0)),
        );
        Grounder::observe(&tree, &GroundingConfig::default(), AppCatalog::default())
    }

    #[test]
    fn out_of_range_id_forces_wait() {
        let mut g = grounder();
        let decision = decide("```agent.click(17)```", &mut g);
        assert_eq!(decision.action, GroundedAction::Wait);
        assert_eq!(decision.plan_code, "WAIT");
        assert!(decision.feedback.unwrap().contains("17"));
    }

    #[test]
    fn unparseable_code_waits_with_feedback() {
        let mut g = grounder();
        let decision = decide("```agent.levitate(1)```", &mut g);
        assert_eq!(decision.action, GroundedAction::Wait);
        assert!(decision.feedback.unwrap().contains("levitate"));

        let decision = decide("", &mut g);
        assert_eq!(decision.feedback.as_deref(), Some("no response from the model"));
    }

    #[test]
    fn comment_before_a_control_token_is_not_code() {
        let mut g = grounder();
        let decision = decide("```python\n# the value is already typed\nDONE\n```", &mut g);
        assert_eq!(decision.action, GroundedAction::Done);
        assert_eq!(decision.feedback, None);

        // prose that is not a call still yields the token
        let decision = decide("```python\nprint('finished')\nFAIL\n```", &mut g);
        assert_eq!(decision.action, GroundedAction::Fail);
        assert_eq!(decision.plan_code, "FAIL");
    }

    #[test]
    fn trailing_comment_after_a_call_is_ignored() {
        let mut g = grounder();
        let decision = decide("```python\nagent.click(1)  # press OK\n```", &mut g);
        assert!(matches!(decision.action, GroundedAction::Execute(_)));
        assert_eq!(decision.feedback, None);

        let decision = decide("```python\n# open the result\nagent.double_click(1); # twice\n```", &mut g);
        match decision.action {
            GroundedAction::Execute(cmd) => {
                assert!(cmd.ops.iter().any(|op| matches!(op, InputOp::Click { count: 2, .. })))
            }
            other => panic!("expected a command, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn trailing_token_is_reported_on_the_next_call() {
        let llm = Arc::new(ScriptedCompletion::new(["```agent.click(1)\nDONE```"]));
        let mut exec = Executor::new(llm.clone(), ExecutorConfig::default());
        let subtask = Subtask::new("Check", "click the result");
        let ctx = SubtaskContext { subtask: &subtask, future: &[], done: &[], experience: None };

        let mut g = grounder();
        let (info, action) = exec.generate_next_action("goal", &ctx, &mut g).await;
        assert_eq!(info.plan_code, "agent.click(1)");
        let GroundedAction::Execute(cmd) = action else { panic!("expected a command") };
        assert_eq!(cmd.ops[0], InputOp::MoveTo { x: 60.0, y: 20.0 });

        let (_, action) = exec.generate_next_action("goal", &ctx, &mut grounder()).await;
        assert_eq!(action, GroundedAction::Done);
        assert_eq!(llm.calls(), 1);
    }

    #[tokio::test]
    async fn step_budget_fails_the_subtask() {
        let llm = Arc::new(ScriptedCompletion::new(["```WAIT```", "```WAIT```"]));
        let cfg = ExecutorConfig { max_steps: 2, ..ExecutorConfig::default() };
        let mut exec = Executor::new(llm, cfg);
        let subtask = Subtask::new("Wait", "wait");
        let ctx = SubtaskContext { subtask: &subtask, future: &[], done: &[], experience: None };

        for _ in 0..2 {
            let (_, action) = exec.generate_next_action("goal", &ctx, &mut grounder()).await;
            assert_eq!(action, GroundedAction::Wait);
        }
        let (_, action) = exec.generate_next_action("goal", &ctx, &mut grounder()).await;
        assert_eq!(action, GroundedAction::Fail);
        exec.reset();
        assert_eq!(exec.step_count(), 0);
    }

    #[tokio::test]
    async fn feedback_reaches_the_next_prompt_and_history_is_pruned() {
        let replies: Vec<String> = std::iter::once("```agent.click(42)```".to_string())
            .chain(std::iter::repeat("```WAIT```".to_string()).take(7))
            .collect();
        let llm = Arc::new(ScriptedCompletion::new(replies));
        let cfg = ExecutorConfig { max_window: 2, ..ExecutorConfig::default() };
        let mut exec = Executor::new(llm.clone(), cfg);
        let subtask = Subtask::new("Click", "click");
        let ctx = SubtaskContext { subtask: &subtask, future: &[], done: &[], experience: None };

        for _ in 0..8 {
            exec.generate_next_action("goal", &ctx, &mut grounder()).await;
        }
        let requests = llm.requests();
        assert!(requests[1].last().unwrap().text().contains("Execution level feedback"));
        for request in &requests {
            // pruned to 2*2+1 before the new user turn is added
            assert!(request.len() <= 6);
        }
    }
}
