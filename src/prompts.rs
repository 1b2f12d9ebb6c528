use crate::action::ActionName;

fn signature(action: ActionName) -> &'static str {
    match action {
        ActionName::OpenApp => "open_app(app_name: str)",
        ActionName::SwitchApplications => "switch_applications(app_name: str)",
        ActionName::Click => "click(element_id: int, num_clicks: int = 1, button_type: str = \"left\")",
        ActionName::ClickAtCoordinates => {
            "click_at_coordinates(x: float, y: float, num_clicks: int = 1, click_type: str = \"left\")"
        }
        ActionName::DoubleClick => "double_click(element_id: int)",
        ActionName::RightClick => "right_click(element_id: int)",
        ActionName::Type => "type(element_id: int, text: str, append: bool = True)",
        ActionName::TypeAndEnter => "type_and_enter(element_id: int, text: str, append: bool = True)",
        ActionName::DragAndDrop => "drag_and_drop(element1_id: int, element2_id: int)",
        ActionName::Scroll => "scroll(clicks: int) | scroll(element_id: int, clicks: int)",
        ActionName::Hotkey => "hotkey(keys: list[str])",
        ActionName::Wait => "wait(time: float)",
        ActionName::Done => "done()",
        ActionName::Fail => "fail()",
    }
}

fn describe(action: ActionName) -> &'static str {
    match action {
        ActionName::OpenApp => "Open an installed application by name.",
        ActionName::SwitchApplications => "Bring an already open application from the list to the front.",
        ActionName::Click => "Click an element; button_type is left, right or middle.",
        ActionName::ClickAtCoordinates => {
            "Click at screen coordinates. Only use if the element is missing from the accessibility tree."
        }
        ActionName::DoubleClick => "Double click an element.",
        ActionName::RightClick => "Right click an element.",
        ActionName::Type => "Click an element and type text. append=False replaces the existing text.",
        ActionName::TypeAndEnter => "Like type, then press Enter.",
        ActionName::DragAndDrop => "Drag element1 onto element2.",
        ActionName::Scroll => "Scroll the page, optionally over an element. Positive scrolls up.",
        ActionName::Hotkey => "Press a key combination, e.g. ['ctrl', 'c'].",
        ActionName::Wait => "Wait for the UI to update.",
        ActionName::Done => "The current subtask is complete.",
        ActionName::Fail => "The current subtask cannot be completed.",
    }
}

/// The `agent.*` API, one entry per action the parser accepts.
pub fn action_api() -> String {
    let mut out = String::from("class Agent:\n");
    for action in ActionName::ALL {
        out.push_str(&format!("    def {}:\n        \"\"\"{}\"\"\"\n", signature(action), describe(action)));
    }
    out
}

fn app_list(apps: &[String]) -> String {
    if apps.is_empty() {
        "(none reported)".to_string()
    } else {
        apps.join(", ")
    }
}

pub fn executor_system_prompt(apps: &[String]) -> String {
    format!(
        "You are an expert in graphical user interfaces. You control a computer through the Python-like API below \
to complete one subtask of a larger task.\n\n{api}\n\
Each turn you receive the accessibility tree of the focused window as a table (id, role, title, text). \
Element ids are only valid for the table in the current turn.\n\
Installed applications: {apps}\n\n\
Rules:\n\
1. Reply with a short plan, then exactly one action in a fenced code block, e.g.\n```python\nagent.click(3)\n```\n\
2. Only one agent call per code block. Use element ids from the current table.\n\
3. When the subtask is finished reply with ```DONE```. If it cannot be finished reply with ```FAIL```.\n\
4. If the screen is still loading reply with ```WAIT```.\n\
5. Only do what the current subtask asks; later subtasks are handled separately.",
        api = action_api(),
        apps = app_list(apps),
    )
}

pub fn planner_system_prompt() -> String {
    "You are an expert planner for computer-use tasks. Break the user's task into a short ordered list of \
subtasks that can each be done with a few UI actions.\n\
Answer with a short explanation followed by a JSON list in a fenced code block:\n\
```json\n[{\"name\": \"OpenApp\", \"info\": \"Open the Calculator application\"}]\n```\n\
Names are short CamelCase labels; info is a one-sentence instruction. \
When you are told a subtask failed, produce a revised plan for the remaining work only: do not repeat completed \
subtasks and change the failed subtask's approach rather than repeating it verbatim."
        .to_string()
}

pub fn reactive_system_prompt(goal: &str, apps: &[String]) -> String {
    format!(
        "You are an expert in graphical user interfaces and complete tasks on a computer through the Python-like API below.\n\n\
{api}\nYour task: {goal}\nInstalled applications: {apps}\n\n\
Each turn you receive the accessibility tree of the focused window (id, role, title, text) and, when available, \
reflection on your progress. Reply with a short plan and exactly one action in a fenced code block. \
Reply with ```DONE``` when the task is complete, ```FAIL``` if it is impossible, or ```WAIT``` to let the screen settle.",
        api = action_api(),
        apps = app_list(apps),
    )
}

pub const REFLECTION_ON_TRAJECTORY: &str = "You are a reflection agent supervising a computer-use agent. \
You receive the task and the agent's plans and actions so far. Point out if the agent is stuck in a loop, \
made a mistake or is drifting from the task, and suggest a concrete correction. If it is on track, say so in one sentence.";

pub const SUBTASK_SUMMARIZATION: &str = "You summarize a successful subtask trajectory of a computer-use agent into \
reusable experience. Keep the steps that mattered, generalize element ids into element descriptions and drop \
failed attempts. Answer in a few short sentences.";

pub const LIFELONG_REFLECTION: &str = "You review a full task trajectory of a computer-use agent and write a short \
reflection that would help with the same or a similar task next time: which plan worked, what went wrong, what to avoid.";
