use glass_pilot::agent::subtask_signature;
use glass_pilot::knowledge::KnowledgeKind;
use glass_pilot::{
    Agent, AgentConfig, JsonKnowledgeStore, KnowledgeStore, Observation, RunStatus, ScriptedCompletion,
    StaticComputer, UiNode, UiTree,
};
use std::sync::Arc;
use std::time::Duration;

fn screen() -> Observation {
    Observation {
        tree: UiTree::single(
            UiNode::new("window")
                .with_frame(0.0, 0.0, 800.0, 600.0)
                .with_child(UiNode::new("push button").with_title("Save").with_frame(10.0, 10.0, 60.0, 24.0)),
        ),
        screenshot: Vec::new(),
    }
}

fn config() -> AgentConfig {
    AgentConfig {
        wait_delay: Duration::ZERO,
        settle_delay: Duration::ZERO,
        update_memory: true,
        ..AgentConfig::default()
    }
}

const PLAN: &str = "```json\n[{\"name\": \"SaveFile\", \"info\": \"Press the Save button\"}]\n```";
const GOAL: &str = "save the document";

#[tokio::test]
async fn existing_keys_are_never_overwritten() {
    let dir = tempfile::tempdir().unwrap();
    let store = JsonKnowledgeStore::new(dir.path());

    assert!(store.insert_if_absent(KnowledgeKind::SubtaskExperience, "key", "first").await.unwrap());
    assert!(!store.insert_if_absent(KnowledgeKind::SubtaskExperience, "key", "second").await.unwrap());
    assert_eq!(
        store.lookup(KnowledgeKind::SubtaskExperience, "key").await.unwrap().as_deref(),
        Some("first")
    );

    // a fresh handle on the same directory sees the persisted value
    let reopened = JsonKnowledgeStore::new(dir.path());
    assert_eq!(
        reopened.lookup(KnowledgeKind::SubtaskExperience, "key").await.unwrap().as_deref(),
        Some("first")
    );
}

#[tokio::test]
async fn runs_write_experience_once_and_reuse_it() {
    let dir = tempfile::tempdir().unwrap();

    // first run: plan, then a subtask summary on completion, then the task reflection
    let planner = Arc::new(ScriptedCompletion::new([PLAN, "Click Save once.", "Saving needs one click."]));
    let executor = Arc::new(ScriptedCompletion::new(["```agent.click(0)```", "```DONE```"]));
    let computer = StaticComputer::new(vec![screen()], Vec::new());
    let mut agent = Agent::new(computer, planner.clone(), executor, JsonKnowledgeStore::new(dir.path()), config());

    let report = agent.run(GOAL).await.unwrap();
    assert_eq!(report.status, RunStatus::Success);
    assert_eq!(planner.calls(), 3);

    let store = JsonKnowledgeStore::new(dir.path());
    let key = subtask_signature(GOAL, "SaveFile", "Press the Save button");
    assert_eq!(
        store.lookup(KnowledgeKind::SubtaskExperience, &key).await.unwrap().as_deref(),
        Some("Click Save once.")
    );
    assert_eq!(
        store.lookup(KnowledgeKind::TaskReflection, GOAL).await.unwrap().as_deref(),
        Some("Saving needs one click.")
    );

    // second run: both keys exist, so no summarization calls and the stored text is fed back
    let planner = Arc::new(ScriptedCompletion::new([PLAN]));
    let executor = Arc::new(ScriptedCompletion::new(["```agent.click(0)```", "```DONE```"]));
    let computer = StaticComputer::new(vec![screen()], Vec::new());
    let mut agent = Agent::new(
        computer,
        planner.clone(),
        executor.clone(),
        JsonKnowledgeStore::new(dir.path()),
        config(),
    );

    let report = agent.run(GOAL).await.unwrap();
    assert_eq!(report.status, RunStatus::Success);
    assert_eq!(planner.calls(), 1);
    assert!(planner.requests()[0][1].text().contains("Saving needs one click."));
    assert!(executor.requests()[0].last().unwrap().text().contains("Click Save once."));
    assert_eq!(
        store.lookup(KnowledgeKind::SubtaskExperience, &key).await.unwrap().as_deref(),
        Some("Click Save once.")
    );
}
