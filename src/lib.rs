pub mod action;
pub mod agent;
pub mod browser;
pub mod executor;
pub mod grounding;
pub mod knowledge;
pub mod llm;
pub mod ocr;
pub mod planner;
pub mod prompts;
pub mod reactive;

pub use action::{parse_action_code, Action, Command, ControlToken, GroundedAction, InputOp};
pub use agent::{Agent, AgentConfig, AgentError, Computer, Observation, RunReport, RunStatus, StaticComputer};
pub use browser::{Browser, BrowserConfig, ChromiumComputer};
pub use grounding::{AppCatalog, AppEntry, Grounder, GroundingConfig, UiNode, UiTree};
pub use knowledge::{JsonKnowledgeStore, KnowledgeStore, NullKnowledgeStore};
pub use llm::{Completion, LlmConfig, OpenAiClient, ScriptedCompletion};
pub use reactive::{ReactiveAgent, ReactiveConfig};
