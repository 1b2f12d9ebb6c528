use glass_pilot::action::{InputOp, MouseButton};
use glass_pilot::agent::{Phase, TaskOutcome};
use glass_pilot::grounding::{GroundingConfig, Rect};
use glass_pilot::ocr::{FixedTextDetector, OcrBox};
use glass_pilot::{
    Agent, AgentConfig, AppEntry, NullKnowledgeStore, Observation, RunStatus, ScriptedCompletion, StaticComputer,
    UiNode, UiTree,
};
use std::sync::Arc;
use std::time::Duration;

fn quick_config() -> AgentConfig {
    AgentConfig {
        wait_delay: Duration::ZERO,
        settle_delay: Duration::ZERO,
        update_memory: false,
        ..AgentConfig::default()
    }
}

fn desktop() -> Observation {
    Observation {
        tree: UiTree::single(
            UiNode::new("window")
                .with_frame(0.0, 0.0, 1280.0, 800.0)
                .with_child(UiNode::new("push button").with_title("Activities").with_frame(0.0, 0.0, 100.0, 30.0)),
        ),
        screenshot: Vec::new(),
    }
}

fn calculator() -> Observation {
    Observation {
        tree: UiTree::single(
            UiNode::new("window")
                .with_title("Calculator")
                .with_frame(200.0, 100.0, 400.0, 500.0)
                .with_child(
                    UiNode::new("entry")
                        .with_title("Display")
                        .with_value("0")
                        .with_frame(210.0, 110.0, 380.0, 40.0),
                )
                .with_child(UiNode::new("push button").with_title("=").with_frame(500.0, 500.0, 80.0, 80.0)),
        ),
        screenshot: Vec::new(),
    }
}

fn plan_json(subtasks: &[(&str, &str)]) -> String {
    let items: Vec<serde_json::Value> = subtasks
        .iter()
        .map(|(name, info)| serde_json::json!({ "name": name, "info": info }))
        .collect();
    format!("Plan:\n```json\n{}\n```", serde_json::Value::Array(items))
}

#[tokio::test]
async fn opens_calculator_and_types_42() {
    let planner = Arc::new(ScriptedCompletion::new([plan_json(&[
        ("OpenApp", "Open the Calculator application"),
        ("TypeValue", "Type 42 into the calculator display"),
    ])]));
    let executor = Arc::new(ScriptedCompletion::new([
        "The calculator is not open yet.\n```python\nagent.open_app(\"Calculator\")\n```",
        "```DONE```",
        "The display is element 0.\n```python\nagent.type(0, \"42\")\n```",
        "```DONE```",
    ]));
    let computer = StaticComputer::new(vec![desktop(), calculator()], vec![AppEntry::named("Calculator")]);
    let mut agent = Agent::new(computer, planner.clone(), executor.clone(), NullKnowledgeStore, quick_config());

    let report = agent.run("open Calculator and type 42").await.unwrap();

    assert_eq!(report.status, RunStatus::Success);
    assert_eq!(report.metrics.turns, 3);
    assert_eq!(report.done_subtasks, vec!["OpenApp".to_string(), "TypeValue".to_string()]);
    assert_eq!(planner.calls(), 1);
    assert_eq!(executor.calls(), 4);
    assert_eq!(agent.state().phase, Phase::Finished(TaskOutcome::Done));

    let performed = agent.computer().performed();
    assert_eq!(
        performed[0],
        InputOp::Launch { app: "Calculator".into(), target: "Calculator".into() }
    );
    // display center: (210 + 380/2, 110 + 40/2)
    assert_eq!(
        &performed[1..],
        &[
            InputOp::MoveTo { x: 400.0, y: 130.0 },
            InputOp::Click { x: 400.0, y: 130.0, button: MouseButton::Left, count: 1 },
            InputOp::TypeText { text: "42".into() },
        ]
    );

    // the TypeValue prompt was built from the calculator's element table
    let type_prompt = executor.requests()[2].last().unwrap().text();
    assert!(type_prompt.contains("0\tentry\tDisplay\t0"));
    assert!(type_prompt.contains("Completed subtasks: OpenApp"));
}

#[tokio::test]
async fn consecutive_failures_replan_with_growing_done_list() {
    let planner = Arc::new(ScriptedCompletion::new([
        plan_json(&[("A", "first"), ("B", "second"), ("C", "third")]),
        plan_json(&[("B2", "second again"), ("C", "third"), ("D", "fourth")]),
        plan_json(&[("C2", "third again"), ("D", "fourth")]),
        plan_json(&[("C3", "third, another way"), ("D", "fourth")]),
    ]));
    let executor = Arc::new(ScriptedCompletion::new([
        "```DONE```",
        "```FAIL```",
        "```DONE```",
        "The button is gone.\n```FAIL```",
        "```FAIL```",
        "```agent.click(0)```",
    ]));
    let computer = StaticComputer::new(vec![desktop()], Vec::new());
    let cfg = AgentConfig { max_turns: 1, ..quick_config() };
    let mut agent = Agent::new(computer, planner.clone(), executor.clone(), NullKnowledgeStore, cfg);

    let report = agent.run("do four things").await.unwrap();

    // all three failures and replans happened silently inside the single turn
    assert_eq!(report.status, RunStatus::BudgetExhausted);
    assert_eq!(report.metrics.turns, 1);
    assert_eq!(report.metrics.replans, 3);
    assert_eq!(planner.calls(), 4);
    assert_eq!(agent.computer().performed().len(), 2);

    let feedback: Vec<String> = planner.requests()[1..]
        .iter()
        .map(|r| r.last().unwrap().text())
        .collect();
    assert!(feedback[0].contains("Completed subtasks: A. The subtask B could not be completed"));
    assert!(feedback[1].contains("Completed subtasks: A, B2. The subtask C could not be completed: The button is gone."));
    assert!(feedback[2].contains("Completed subtasks: A, B2. The subtask C2 could not be completed"));
    assert_eq!(agent.state().done_names(), vec!["A".to_string(), "B2".to_string()]);
}

#[tokio::test]
async fn failing_the_last_subtask_ends_the_run() {
    let planner = Arc::new(ScriptedCompletion::new([plan_json(&[("Only", "the only step")])]));
    let executor = Arc::new(ScriptedCompletion::new(["I cannot find it.\n```FAIL```"]));
    let computer = StaticComputer::new(vec![desktop()], Vec::new());
    let mut agent = Agent::new(computer, planner.clone(), executor, NullKnowledgeStore, quick_config());

    let report = agent.run("impossible").await.unwrap();

    assert_eq!(report.status, RunStatus::Failed);
    assert_eq!(report.steps.last().map(|s| s.action.as_str()), Some("FAIL"));
    assert_eq!(planner.calls(), 1);
    assert!(agent.computer().performed().is_empty());
}

#[tokio::test]
async fn execution_errors_and_unknown_apps_become_feedback() {
    let planner = Arc::new(ScriptedCompletion::new([plan_json(&[("Press", "press the button")])]));
    let executor = Arc::new(ScriptedCompletion::new([
        "```agent.open_app(\"Photoshop\")```",
        "```agent.click(0)```",
        "```DONE```",
    ]));
    let computer = StaticComputer::new(vec![desktop()], vec![AppEntry::named("Calculator")]).failing();
    let mut agent = Agent::new(computer, planner, executor.clone(), NullKnowledgeStore, quick_config());

    let report = agent.run("press the button").await.unwrap();

    assert_eq!(report.status, RunStatus::Success);
    assert_eq!(report.steps[0].action, "WAIT");
    assert_eq!(report.steps[1].result_hint, "error");

    let requests = executor.requests();
    let second = requests[1].last().unwrap().text();
    assert!(second.contains("There is no application Photoshop installed on the system."));
    let third = requests[2].last().unwrap().text();
    assert!(third.contains("could not be executed"));
}

#[tokio::test]
async fn turn_cap_bounds_a_model_that_only_waits() {
    let planner = Arc::new(ScriptedCompletion::new([plan_json(&[("Wait", "wait for it")])]));
    let executor = Arc::new(ScriptedCompletion::new(["```WAIT```", "```WAIT```", "```WAIT```"]));
    let computer = StaticComputer::new(vec![desktop()], Vec::new());
    let cfg = AgentConfig { max_turns: 3, ..quick_config() };
    let mut agent = Agent::new(computer, planner, executor, NullKnowledgeStore, cfg);

    let report = agent.run("wait").await.unwrap();

    assert_eq!(report.status, RunStatus::BudgetExhausted);
    assert_eq!(report.steps.len(), 3);
    assert!(report.steps.iter().all(|s| s.action == "WAIT"));
}

#[tokio::test]
async fn ocr_text_on_a_canvas_becomes_a_clickable_element() {
    let drawing = Observation {
        tree: UiTree::single(
            UiNode::new("window")
                .with_frame(0.0, 0.0, 800.0, 600.0)
                .with_child(UiNode::new("push button").with_title("OK").with_frame(10.0, 10.0, 40.0, 20.0))
                .with_child(UiNode::new("canvas").with_frame(100.0, 100.0, 400.0, 300.0)),
        ),
        screenshot: vec![0x89, b'P', b'N', b'G'],
    };
    let detector = FixedTextDetector {
        boxes: vec![
            // same place as the native button
            OcrBox { text: "OK".into(), confidence: 0.9, rect: Rect::new(10.0, 10.0, 40.0, 20.0) },
            OcrBox { text: "Go".into(), confidence: 0.8, rect: Rect::new(300.0, 200.0, 60.0, 20.0) },
        ],
    };

    let planner = Arc::new(ScriptedCompletion::new([plan_json(&[("PressGo", "press the Go control")])]));
    let executor = Arc::new(ScriptedCompletion::new(["```agent.click(2)```", "```DONE```"]));
    let computer = StaticComputer::new(vec![drawing], Vec::new());
    let cfg = AgentConfig {
        grounding: GroundingConfig { ocr_fusion: true, ..GroundingConfig::default() },
        ..quick_config()
    };
    let mut agent = Agent::new(computer, planner, executor.clone(), NullKnowledgeStore, cfg)
        .with_text_detector(Arc::new(detector));

    let report = agent.run("press Go").await.unwrap();
    assert_eq!(report.status, RunStatus::Success);

    // native ids first, the synthetic one after them
    let prompt = executor.requests()[0].last().unwrap().text();
    assert!(prompt.contains("0\tpush button\tOK"));
    assert!(prompt.contains("1\tcanvas"));
    assert!(prompt.contains("2\tbutton\tGo"));
    assert!(!prompt.contains("3\t"));

    assert_eq!(
        agent.computer().performed(),
        vec![
            InputOp::MoveTo { x: 330.0, y: 210.0 },
            InputOp::Click { x: 330.0, y: 210.0, button: MouseButton::Left, count: 1 },
        ]
    );
}
