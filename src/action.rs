use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;
use thiserror::Error;

// ========================= Control tokens & reply parsing =========================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ControlToken {
    Wait,
    Done,
    Fail,
}

impl ControlToken {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "WAIT" => Some(Self::Wait),
            "DONE" => Some(Self::Done),
            "FAIL" => Some(Self::Fail),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Wait => "WAIT",
            Self::Done => "DONE",
            Self::Fail => "FAIL",
        }
    }
}

impl fmt::Display for ControlToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What [`parse_action_code`] recovered from a reply.
///
/// `code` is the command line(s) of the first code block. `outcome` is a control
/// token, either the whole reply/block or the block's trailing line.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ParsedReply {
    pub code: Option<String>,
    pub outcome: Option<ControlToken>,
}

impl ParsedReply {
    pub fn is_empty(&self) -> bool {
        self.code.is_none() && self.outcome.is_none()
    }
}

fn code_block_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // Matches ```code``` as well as ```python code```; non-greedy so the first block wins.
    RE.get_or_init(|| Regex::new(r"(?s)```(?:\w+\s+)?(.*?)```").expect("static regex"))
}

/// Returns the trimmed body of the first fenced code block in `reply`.
pub fn first_code_block(reply: &str) -> Option<&str> {
    let caps = code_block_re().captures(reply)?;
    let body = caps.get(1).map_or("", |m| m.as_str().trim());
    if body.is_empty() {
        // a lone word such as ```WAIT\n``` is swallowed by the language tag
        let whole = caps.get(0)?.as_str();
        return Some(whole.trim_matches('`').trim());
    }
    Some(body)
}

/// Extracts the single action from a model reply.
///
/// Rules, in order:
/// 1. a reply that is exactly `WAIT`, `DONE` or `FAIL` is that token;
/// 2. otherwise only the first fenced block is considered, the rest is ignored;
/// 3. a block that is a control token is that token;
/// 4. a block whose last line is a control token yields the preceding lines as
///    code and the token as the outcome.
pub fn parse_action_code(reply: &str) -> ParsedReply {
    let reply = reply.trim();
    if let Some(token) = ControlToken::parse(reply) {
        return ParsedReply { code: None, outcome: Some(token) };
    }

    let Some(block) = first_code_block(reply) else {
        return ParsedReply::default();
    };
    if block.is_empty() {
        return ParsedReply::default();
    }
    if let Some(token) = ControlToken::parse(block) {
        return ParsedReply { code: None, outcome: Some(token) };
    }

    let lines: Vec<&str> = block.lines().collect();
    if let Some((last, rest)) = lines.split_last() {
        if let Some(token) = ControlToken::parse(last) {
            return ParsedReply { code: code_lines(rest), outcome: Some(token) };
        }
    }

    ParsedReply { code: code_lines(&lines), outcome: None }
}

/// Joins `lines`, or `None` when they hold only comments and blank lines.
fn code_lines(lines: &[&str]) -> Option<String> {
    let has_code = lines.iter().map(|l| l.trim()).any(|l| !l.is_empty() && !l.starts_with('#'));
    has_code.then(|| lines.join("\n").trim().to_string())
}

// ========================= Call syntax =========================

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ActionParseError {
    #[error("no `agent.<action>(...)` call found in `{0}`")]
    NoCall(String),
    #[error("unexpected `{found}` at offset {at}")]
    Unexpected { found: char, at: usize },
    #[error("unexpected end of input while reading {0}")]
    UnexpectedEnd(&'static str),
    #[error("unknown action `{0}`")]
    UnknownAction(String),
    #[error("`{action}` is missing argument `{arg}`")]
    MissingArgument { action: &'static str, arg: &'static str },
    #[error("argument `{arg}` of `{action}` has the wrong type")]
    WrongType { action: &'static str, arg: &'static str },
}

#[derive(Clone, Debug, PartialEq)]
pub enum Literal {
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
    List(Vec<Literal>),
    None,
}

impl Literal {
    fn as_int(&self) -> Option<i64> {
        match self {
            Literal::Int(i) => Some(*i),
            Literal::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            Literal::Str(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    fn as_float(&self) -> Option<f64> {
        match self {
            Literal::Int(i) => Some(*i as f64),
            Literal::Float(f) => Some(*f),
            Literal::Str(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    fn as_str(&self) -> Option<&str> {
        match self {
            Literal::Str(s) => Some(s),
            _ => None,
        }
    }

    fn as_bool(&self) -> Option<bool> {
        match self {
            Literal::Bool(b) => Some(*b),
            Literal::Int(i) => Some(*i != 0),
            _ => None,
        }
    }

    fn as_string_list(&self) -> Option<Vec<String>> {
        match self {
            Literal::List(items) => items.iter().map(|i| i.as_str().map(str::to_string)).collect(),
            Literal::Str(s) => Some(s.split('+').map(|k| k.trim().to_string()).collect()),
            _ => None,
        }
    }
}

/// A parsed `agent.name(arg, key=value)` call.
#[derive(Clone, Debug, PartialEq)]
pub struct ActionCall {
    pub name: String,
    pub args: Vec<Literal>,
    pub kwargs: Vec<(String, Literal)>,
}

impl ActionCall {
    fn arg(&self, index: usize, name: &str) -> Option<&Literal> {
        self.kwargs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v)
            .or_else(|| self.args.get(index))
    }
}

/// Parses the code of one action. Only the first line that looks like a call is read.
pub fn parse_call(code: &str) -> Result<ActionCall, ActionParseError> {
    let line = code
        .lines()
        .map(str::trim)
        .find(|l| l.starts_with("agent."))
        .or_else(|| code.lines().map(str::trim).find(|l| !l.starts_with('#') && l.contains('(')))
        .ok_or_else(|| ActionParseError::NoCall(code.trim().to_string()))?;
    CallParser::new(line).call()
}

struct CallParser {
    chars: Vec<char>,
    pos: usize,
}

impl CallParser {
    fn new(src: &str) -> Self {
        Self { chars: src.chars().collect(), pos: 0 }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        Some(c)
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn expect(&mut self, want: char, what: &'static str) -> Result<(), ActionParseError> {
        self.skip_ws();
        match self.bump() {
            Some(c) if c == want => Ok(()),
            Some(c) => Err(ActionParseError::Unexpected { found: c, at: self.pos - 1 }),
            None => Err(ActionParseError::UnexpectedEnd(what)),
        }
    }

    fn ident(&mut self) -> Result<String, ActionParseError> {
        self.skip_ws();
        let start = self.pos;
        while self.peek().is_some_and(|c| c.is_alphanumeric() || c == '_') {
            self.pos += 1;
        }
        if start == self.pos {
            return match self.peek() {
                Some(c) => Err(ActionParseError::Unexpected { found: c, at: self.pos }),
                None => Err(ActionParseError::UnexpectedEnd("identifier")),
            };
        }
        Ok(self.chars[start..self.pos].iter().collect())
    }

    fn call(mut self) -> Result<ActionCall, ActionParseError> {
        let mut name = self.ident()?;
        self.skip_ws();
        if self.peek() == Some('.') {
            self.pos += 1;
            name = self.ident()?;
        }
        self.expect('(', "argument list")?;

        let mut args = Vec::new();
        let mut kwargs = Vec::new();
        loop {
            self.skip_ws();
            match self.peek() {
                Some(')') => {
                    self.pos += 1;
                    break;
                }
                None => return Err(ActionParseError::UnexpectedEnd("argument list")),
                _ => {}
            }

            let checkpoint = self.pos;
            let keyword = match self.peek() {
                Some(c) if c.is_alphabetic() || c == '_' => {
                    let word = self.ident()?;
                    self.skip_ws();
                    if self.peek() == Some('=') {
                        self.pos += 1;
                        Some(word)
                    } else {
                        self.pos = checkpoint;
                        None
                    }
                }
                _ => None,
            };
            let value = self.literal()?;
            match keyword {
                Some(k) => kwargs.push((k, value)),
                None => args.push(value),
            }

            self.skip_ws();
            match self.bump() {
                Some(',') => continue,
                Some(')') => break,
                Some(c) => return Err(ActionParseError::Unexpected { found: c, at: self.pos - 1 }),
                None => return Err(ActionParseError::UnexpectedEnd("argument list")),
            }
        }

        self.skip_ws();
        while self.peek() == Some(';') {
            self.pos += 1;
            self.skip_ws();
        }
        // a trailing comment runs to the end of the line
        if self.peek() == Some('#') {
            self.pos = self.chars.len();
        }
        if let Some(c) = self.peek() {
            return Err(ActionParseError::Unexpected { found: c, at: self.pos });
        }
        Ok(ActionCall { name, args, kwargs })
    }

    fn literal(&mut self) -> Result<Literal, ActionParseError> {
        self.skip_ws();
        match self.peek() {
            Some('"') | Some('\'') => self.string().map(Literal::Str),
            Some('[') | Some('(') => self.list(),
            Some(c) if c == '-' || c == '+' || c == '.' || c.is_ascii_digit() => self.number(),
            Some(c) if c.is_alphabetic() => {
                let word = self.ident()?;
                match word.as_str() {
                    "True" | "true" => Ok(Literal::Bool(true)),
                    "False" | "false" => Ok(Literal::Bool(false)),
                    "None" | "null" => Ok(Literal::None),
                    _ => Ok(Literal::Str(word)),
                }
            }
            Some(c) => Err(ActionParseError::Unexpected { found: c, at: self.pos }),
            None => Err(ActionParseError::UnexpectedEnd("value")),
        }
    }

    fn string(&mut self) -> Result<String, ActionParseError> {
        let quote = self.bump().ok_or(ActionParseError::UnexpectedEnd("string"))?;
        // Python triple quotes: '''text''' or """text"""
        let triple = self.chars.get(self.pos..self.pos + 2) == Some(&[quote, quote][..]);
        if triple {
            self.pos += 2;
        }
        let mut out = String::new();
        loop {
            let c = self.bump().ok_or(ActionParseError::UnexpectedEnd("string"))?;
            if c == '\\' {
                let escaped = self.bump().ok_or(ActionParseError::UnexpectedEnd("string"))?;
                out.push(match escaped {
                    'n' => '\n',
                    't' => '\t',
                    'r' => '\r',
                    other => other,
                });
                continue;
            }
            if c == quote {
                if !triple {
                    return Ok(out);
                }
                if self.chars.get(self.pos..self.pos + 2) == Some(&[quote, quote][..]) {
                    self.pos += 2;
                    return Ok(out);
                }
            }
            out.push(c);
        }
    }

    fn list(&mut self) -> Result<Literal, ActionParseError> {
        let open = self.bump().ok_or(ActionParseError::UnexpectedEnd("list"))?;
        let close = if open == '[' { ']' } else { ')' };
        let mut items = Vec::new();
        loop {
            self.skip_ws();
            if self.peek() == Some(close) {
                self.pos += 1;
                return Ok(Literal::List(items));
            }
            items.push(self.literal()?);
            self.skip_ws();
            match self.bump() {
                Some(',') => continue,
                Some(c) if c == close => return Ok(Literal::List(items)),
                Some(c) => return Err(ActionParseError::Unexpected { found: c, at: self.pos - 1 }),
                None => return Err(ActionParseError::UnexpectedEnd("list")),
            }
        }
    }

    fn number(&mut self) -> Result<Literal, ActionParseError> {
        let start = self.pos;
        if matches!(self.peek(), Some('-') | Some('+')) {
            self.pos += 1;
        }
        while self
            .peek()
            .is_some_and(|c| c.is_ascii_digit() || c == '.' || c == '_' || c == 'e' || c == 'E')
        {
            self.pos += 1;
        }
        let text: String = self.chars[start..self.pos].iter().filter(|c| **c != '_').collect();
        if let Ok(i) = text.parse::<i64>() {
            return Ok(Literal::Int(i));
        }
        text.parse::<f64>()
            .map(Literal::Float)
            .map_err(|_| ActionParseError::Unexpected { found: self.chars[start], at: start })
    }
}

// ========================= Action union =========================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MouseButton {
    #[default]
    Left,
    Right,
    Middle,
}

impl MouseButton {
    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "left" => Some(Self::Left),
            "right" => Some(Self::Right),
            "middle" => Some(Self::Middle),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Left => "left",
            Self::Right => "right",
            Self::Middle => "middle",
        }
    }
}

/// Every call the model may emit. Unknown names are rejected by [`ActionName::parse`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ActionName {
    OpenApp,
    SwitchApplications,
    Click,
    ClickAtCoordinates,
    DoubleClick,
    RightClick,
    Type,
    TypeAndEnter,
    DragAndDrop,
    Scroll,
    Hotkey,
    Wait,
    Done,
    Fail,
}

impl ActionName {
    pub const ALL: [ActionName; 14] = [
        Self::OpenApp,
        Self::SwitchApplications,
        Self::Click,
        Self::ClickAtCoordinates,
        Self::DoubleClick,
        Self::RightClick,
        Self::Type,
        Self::TypeAndEnter,
        Self::DragAndDrop,
        Self::Scroll,
        Self::Hotkey,
        Self::Wait,
        Self::Done,
        Self::Fail,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenApp => "open_app",
            Self::SwitchApplications => "switch_applications",
            Self::Click => "click",
            Self::ClickAtCoordinates => "click_at_coordinates",
            Self::DoubleClick => "double_click",
            Self::RightClick => "right_click",
            Self::Type => "type",
            Self::TypeAndEnter => "type_and_enter",
            Self::DragAndDrop => "drag_and_drop",
            Self::Scroll => "scroll",
            Self::Hotkey => "hotkey",
            Self::Wait => "wait",
            Self::Done => "done",
            Self::Fail => "fail",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|a| a.as_str() == name)
    }
}

/// Element ids are kept signed: the model may hallucinate negative ids and
/// those must reach the bounds check rather than fail parsing.
pub type ElementId = i64;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Action {
    Click { element: ElementId, clicks: u32, button: MouseButton },
    /// Raw screen coordinates, for targets missing from the tree.
    ClickAt { x: f64, y: f64, clicks: u32, button: MouseButton },
    Type { element: ElementId, text: String, append: bool, enter: bool },
    Drag { from: ElementId, to: ElementId },
    Scroll { element: Option<ElementId>, clicks: i32 },
    Hotkey { keys: Vec<String> },
    OpenApp { name: String },
    SwitchApp { name: String },
    Wait { seconds: f64 },
    Done,
    Fail,
}

impl Action {
    /// Parses model code such as `agent.type(4, "hello", append=False)`.
    pub fn parse(code: &str) -> Result<Self, ActionParseError> {
        Self::from_call(&parse_call(code)?)
    }

    pub fn from_call(call: &ActionCall) -> Result<Self, ActionParseError> {
        let name = ActionName::parse(&call.name)
            .ok_or_else(|| ActionParseError::UnknownAction(call.name.clone()))?;
        let action = name.as_str();

        let int = |index: usize, arg: &'static str| -> Result<i64, ActionParseError> {
            call.arg(index, arg)
                .ok_or(ActionParseError::MissingArgument { action, arg })?
                .as_int()
                .ok_or(ActionParseError::WrongType { action, arg })
        };
        let text = |index: usize, arg: &'static str| -> Result<String, ActionParseError> {
            let lit = call.arg(index, arg).ok_or(ActionParseError::MissingArgument { action, arg })?;
            match lit {
                Literal::Str(s) => Ok(s.clone()),
                Literal::Int(i) => Ok(i.to_string()),
                Literal::Float(f) => Ok(f.to_string()),
                _ => Err(ActionParseError::WrongType { action, arg }),
            }
        };
        let flag = |index: usize, arg: &'static str, default: bool| -> Result<bool, ActionParseError> {
            match call.arg(index, arg) {
                None => Ok(default),
                Some(lit) => lit.as_bool().ok_or(ActionParseError::WrongType { action, arg }),
            }
        };
        let float = |index: usize, arg: &'static str| -> Result<f64, ActionParseError> {
            call.arg(index, arg)
                .ok_or(ActionParseError::MissingArgument { action, arg })?
                .as_float()
                .filter(|v| v.is_finite())
                .ok_or(ActionParseError::WrongType { action, arg })
        };
        let clicks = |index: usize| -> Result<u32, ActionParseError> {
            let arg = "num_clicks";
            match call.arg(index, arg) {
                None => Ok(1),
                Some(lit) => lit
                    .as_int()
                    .filter(|n| *n > 0)
                    .and_then(|n| u32::try_from(n).ok())
                    .ok_or(ActionParseError::WrongType { action, arg }),
            }
        };
        let button = |index: usize| -> Result<MouseButton, ActionParseError> {
            match call.arg(index, "button_type").or_else(|| call.arg(index, "click_type")) {
                None => Ok(MouseButton::Left),
                Some(lit) => lit
                    .as_str()
                    .and_then(MouseButton::parse)
                    .ok_or(ActionParseError::WrongType { action, arg: "button_type" }),
            }
        };

        Ok(match name {
            ActionName::OpenApp => Action::OpenApp { name: text(0, "app_name")? },
            ActionName::SwitchApplications => Action::SwitchApp { name: text(0, "app_name")? },
            ActionName::Click => Action::Click {
                element: int(0, "element_id")?,
                clicks: clicks(1)?,
                button: button(2)?,
            },
            ActionName::ClickAtCoordinates => Action::ClickAt {
                x: float(0, "x")?,
                y: float(1, "y")?,
                clicks: clicks(2)?,
                button: button(3)?,
            },
            ActionName::DoubleClick => Action::Click {
                element: int(0, "element_id")?,
                clicks: 2,
                button: MouseButton::Left,
            },
            ActionName::RightClick => Action::Click {
                element: int(0, "element_id")?,
                clicks: 1,
                button: MouseButton::Right,
            },
            ActionName::Type | ActionName::TypeAndEnter => Action::Type {
                element: int(0, "element_id")?,
                text: text(1, "text")?,
                append: flag(2, "append", true)?,
                enter: name == ActionName::TypeAndEnter,
            },
            ActionName::DragAndDrop => Action::Drag {
                from: int(0, "element1_id")?,
                to: int(1, "element2_id")?,
            },
            ActionName::Scroll => {
                // scroll(clicks) or scroll(element_id, clicks)
                let positional_element = call.args.len() >= 2;
                let element = match call.arg(usize::MAX, "element_id") {
                    Some(lit) => Some(lit.as_int().ok_or(ActionParseError::WrongType { action, arg: "element_id" })?),
                    None if positional_element => Some(int(0, "element_id")?),
                    None => None,
                };
                let clicks_index = if positional_element { 1 } else { 0 };
                let clicks = i32::try_from(int(clicks_index, "clicks")?)
                    .map_err(|_| ActionParseError::WrongType { action, arg: "clicks" })?;
                Action::Scroll { element, clicks }
            }
            ActionName::Hotkey => {
                let keys = call
                    .arg(0, "keys")
                    .ok_or(ActionParseError::MissingArgument { action, arg: "keys" })?
                    .as_string_list()
                    .ok_or(ActionParseError::WrongType { action, arg: "keys" })?;
                Action::Hotkey { keys }
            }
            ActionName::Wait => Action::Wait {
                seconds: call.arg(0, "time").and_then(Literal::as_float).unwrap_or(1.0),
            },
            ActionName::Done => Action::Done,
            ActionName::Fail => Action::Fail,
        })
    }

    /// Element ids this action needs geometry for.
    pub fn element_ids(&self) -> Vec<ElementId> {
        match self {
            Action::Click { element, .. } | Action::Type { element, .. } => vec![*element],
            Action::Drag { from, to } => vec![*from, *to],
            Action::Scroll { element: Some(e), .. } => vec![*e],
            _ => Vec::new(),
        }
    }
}

// ========================= Input primitives =========================

/// One primitive of the input-injection interface, in absolute screen coordinates.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum InputOp {
    MoveTo { x: f64, y: f64 },
    Click { x: f64, y: f64, button: MouseButton, count: u32 },
    ButtonDown { button: MouseButton },
    ButtonUp { button: MouseButton },
    KeyDown { key: String },
    KeyUp { key: String },
    TypeText { text: String },
    Scroll { amount: i32 },
    Launch { app: String, target: String },
}

impl fmt::Display for InputOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputOp::MoveTo { x, y } => write!(f, "move({x}, {y})"),
            InputOp::Click { x, y, button, count } => {
                write!(f, "click({x}, {y}, button={}, clicks={count})", button.as_str())
            }
            InputOp::ButtonDown { button } => write!(f, "mouse_down({})", button.as_str()),
            InputOp::ButtonUp { button } => write!(f, "mouse_up({})", button.as_str()),
            InputOp::KeyDown { key } => write!(f, "key_down({key:?})"),
            InputOp::KeyUp { key } => write!(f, "key_up({key:?})"),
            InputOp::TypeText { text } => write!(f, "type({text:?})"),
            InputOp::Scroll { amount } => write!(f, "scroll({amount})"),
            InputOp::Launch { app, target } => write!(f, "launch({app:?}, {target:?})"),
        }
    }
}

/// An executable command: the ordered primitives for one model action.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub ops: Vec<InputOp>,
}

impl Command {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(mut self, op: InputOp) -> Self {
        self.ops.push(op);
        self
    }

    pub fn press(self, key: &str) -> Self {
        self.push(InputOp::KeyDown { key: key.to_string() })
            .push(InputOp::KeyUp { key: key.to_string() })
    }

    /// Keys go down in order and come back up in reverse.
    pub fn hotkey<S: AsRef<str>>(mut self, keys: &[S]) -> Self {
        for k in keys {
            self.ops.push(InputOp::KeyDown { key: k.as_ref().to_string() });
        }
        for k in keys.iter().rev() {
            self.ops.push(InputOp::KeyUp { key: k.as_ref().to_string() });
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, op) in self.ops.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{op}")?;
        }
        Ok(())
    }
}

/// The resolved outcome of one model action: a control token or a command, never both.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "command", rename_all = "snake_case")]
pub enum GroundedAction {
    Wait,
    Done,
    Fail,
    Execute(Command),
}

impl GroundedAction {
    pub fn is_terminal(&self) -> bool {
        matches!(self, GroundedAction::Done | GroundedAction::Fail)
    }

    pub fn control(&self) -> Option<ControlToken> {
        match self {
            GroundedAction::Wait => Some(ControlToken::Wait),
            GroundedAction::Done => Some(ControlToken::Done),
            GroundedAction::Fail => Some(ControlToken::Fail),
            GroundedAction::Execute(_) => None,
        }
    }
}

impl From<ControlToken> for GroundedAction {
    fn from(token: ControlToken) -> Self {
        match token {
            ControlToken::Wait => GroundedAction::Wait,
            ControlToken::Done => GroundedAction::Done,
            ControlToken::Fail => GroundedAction::Fail,
        }
    }
}

impl fmt::Display for GroundedAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GroundedAction::Execute(cmd) => write!(f, "{cmd}"),
            other => match other.control() {
                Some(token) => f.write_str(token.as_str()),
                None => Ok(()),
            },
        }
    }
}
