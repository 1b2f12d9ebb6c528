use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, OnceLock};
use tracing::{debug, info, warn};

use crate::action::first_code_block;
use crate::llm::{generate_or_empty, Completion, Conversation, GenerationParams, Message};
use crate::prompts;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubtaskStatus {
    #[default]
    Start,
    In,
    Done,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subtask {
    pub name: String,
    pub info: String,
    #[serde(default)]
    pub status: SubtaskStatus,
}

impl Subtask {
    pub fn new(name: impl Into<String>, info: impl Into<String>) -> Self {
        Self { name: name.into(), info: info.into(), status: SubtaskStatus::Start }
    }
}

/// Ordered subtasks, consumed from the front.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SubtaskQueue {
    items: VecDeque<Subtask>,
}

impl SubtaskQueue {
    pub fn pop_front(&mut self) -> Option<Subtask> {
        self.items.pop_front()
    }

    pub fn push_back(&mut self, subtask: Subtask) {
        self.items.push_back(subtask);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Subtask> {
        self.items.iter()
    }

    pub fn names(&self) -> Vec<String> {
        self.items.iter().map(|s| s.name.clone()).collect()
    }
}

impl FromIterator<Subtask> for SubtaskQueue {
    fn from_iter<I: IntoIterator<Item = Subtask>>(iter: I) -> Self {
        Self { items: iter.into_iter().collect() }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PlannerInfo {
    pub plan: String,
    pub search_query: String,
    pub subtasks: Vec<String>,
    pub replan: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    pub generation: GenerationParams,
    pub max_window: usize,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self { generation: GenerationParams::default(), max_window: 5 }
    }
}

pub struct Planner {
    llm: Arc<dyn Completion>,
    cfg: PlannerConfig,
    conversation: Conversation,
    experience: Option<String>,
}

impl Planner {
    pub fn new(llm: Arc<dyn Completion>, cfg: PlannerConfig) -> Self {
        Self { llm, cfg, conversation: Conversation::new(prompts::planner_system_prompt()), experience: None }
    }

    /// Reflection from an earlier run on the same goal, added to the next plan prompt.
    pub fn set_experience(&mut self, experience: Option<String>) {
        self.experience = experience;
    }

    pub fn reset(&mut self) {
        self.conversation.reset();
    }

    /// Plans (or, with `replan`, revises the plan for) `goal`. Never returns an
    /// empty queue: an unusable reply becomes a single subtask carrying the goal.
    pub async fn get_action_queue(
        &mut self,
        goal: &str,
        observation: &str,
        failure_feedback: &str,
        replan: bool,
    ) -> (PlannerInfo, SubtaskQueue) {
        let mut prompt = String::new();
        if replan {
            prompt.push_str(&format!("Feedback on the previous plan:\n{failure_feedback}\n\n"));
            prompt.push_str("Revise the plan for the remaining work.\n\n");
        } else {
            self.conversation.reset();
            prompt.push_str(&format!("Task: {goal}\n\n"));
            if let Some(exp) = &self.experience {
                prompt.push_str(&format!("Experience from a similar task:\n{exp}\n\n"));
            }
        }
        prompt.push_str(&format!("Current accessibility tree:\n{observation}\n"));

        self.conversation.prune(self.cfg.max_window);
        self.conversation.push_user(prompt);
        let reply = generate_or_empty(self.llm.as_ref(), self.conversation.messages(), self.cfg.generation).await;
        self.conversation.push_assistant(reply.clone());

        let mut subtasks = parse_subtasks(&reply);
        if subtasks.is_empty() {
            warn!(replan, "planner returned no usable subtasks; falling back to the whole goal");
            subtasks.push(Subtask::new("CompleteTask", goal));
        }
        let queue: SubtaskQueue = subtasks.into_iter().collect();
        info!(replan, subtasks = ?queue.names(), "plan ready");

        let info = PlannerInfo {
            plan: reply,
            search_query: goal.to_string(),
            subtasks: queue.names(),
            replan,
        };
        (info, queue)
    }

    async fn one_shot(&self, system: &str, body: &str) -> String {
        let messages = [Message::system(system), Message::user(body)];
        let reply = generate_or_empty(self.llm.as_ref(), &messages, self.cfg.generation).await;
        debug!(chars = reply.len(), "planner summary generated");
        reply.trim().to_string()
    }

    pub async fn generate_subtask_summarization(&self, trajectory: &str) -> String {
        self.one_shot(prompts::SUBTASK_SUMMARIZATION, trajectory).await
    }

    pub async fn generate_lifelong_learning_reflection(&self, trajectory: &str) -> String {
        self.one_shot(prompts::LIFELONG_REFLECTION, trajectory).await
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PlanDoc {
    List(Vec<PlanItem>),
    Wrapped { subtasks: Vec<PlanItem> },
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PlanItem {
    Full {
        name: String,
        #[serde(default, alias = "description", alias = "instruction")]
        info: String,
    },
    Bare(String),
}

impl From<PlanItem> for Subtask {
    fn from(item: PlanItem) -> Self {
        match item {
            PlanItem::Full { name, info } if info.trim().is_empty() => Subtask::new(name.clone(), name),
            PlanItem::Full { name, info } => Subtask::new(name, info),
            PlanItem::Bare(line) => subtask_from_line(&line),
        }
    }
}

fn subtask_from_line(line: &str) -> Subtask {
    match line.split_once(':') {
        Some((name, info)) if !name.trim().is_empty() && !info.trim().is_empty() => {
            Subtask::new(name.trim().trim_matches('*').trim(), info.trim())
        }
        _ => Subtask::new(line.trim(), line.trim()),
    }
}

fn list_item_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*(?:\d+[.)]|[-*])\s+(.+?)\s*$").expect("static regex"))
}

/// Reads a subtask list from a planner reply: a JSON list (bare or in a code
/// block), else a numbered or bulleted list.
pub fn parse_subtasks(reply: &str) -> Vec<Subtask> {
    let candidates = [first_code_block(reply), Some(reply.trim())];
    for text in candidates.into_iter().flatten() {
        if let Ok(doc) = serde_json::from_str::<PlanDoc>(text) {
            let items = match doc {
                PlanDoc::List(items) | PlanDoc::Wrapped { subtasks: items } => items,
            };
            return items
                .into_iter()
                .map(Subtask::from)
                .filter(|s| !s.name.is_empty())
                .collect();
        }
    }

    reply
        .lines()
        .filter_map(|line| list_item_re().captures(line))
        .filter_map(|c| c.get(1).map(|m| subtask_from_line(m.as_str())))
        .collect()
}
