use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, warn};

use crate::action::{Action, Command, ElementId, GroundedAction, InputOp, MouseButton};
use crate::agent::Observation;
use crate::ocr::{OcrBox, TextDetector};

// ========================= Geometry =========================

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self { x, y, width, height }
    }

    pub fn from_corners(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self::new(x1.min(x2), y1.min(y2), (x2 - x1).abs(), (y2 - y1).abs())
    }

    /// Non-negative origin and a strictly positive area.
    pub fn is_valid(&self) -> bool {
        [self.x, self.y, self.width, self.height].iter().all(|v| v.is_finite())
            && self.x >= 0.0
            && self.y >= 0.0
            && self.width > 0.0
            && self.height > 0.0
    }

    pub fn center(&self) -> (f64, f64) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    pub fn area(&self) -> f64 {
        self.width * self.height
    }

    pub fn intersection_area(&self, other: &Rect) -> f64 {
        let w = (self.x + self.width).min(other.x + other.width) - self.x.max(other.x);
        let h = (self.y + self.height).min(other.y + other.height) - self.y.max(other.y);
        if w <= 0.0 || h <= 0.0 {
            0.0
        } else {
            w * h
        }
    }

    pub fn iou(&self, other: &Rect) -> f64 {
        let inter = self.intersection_area(other);
        let union = self.area() + other.area() - inter;
        if union <= 0.0 {
            0.0
        } else {
            inter / union
        }
    }
}

// ========================= Accessibility collaborator =========================

/// One node of a platform accessibility tree.
///
/// Implemented for lightweight handles (references, platform element refs), so
/// `children` returns owned handles.
pub trait AxNode: Sized {
    fn role(&self) -> String;
    fn title(&self) -> String;
    /// Description, falling back to the value.
    fn text(&self) -> String;
    /// Screen-space bounds, `None` when the platform reports no geometry.
    fn frame(&self) -> Option<Rect>;
    fn children(&self) -> Vec<Self>;
}

pub trait AccessibilityTree {
    type Node: AxNode;
    /// The focused window or application, the root of traversal.
    fn focused_root(&self) -> Option<Self::Node>;
}

/// A captured accessibility node. Computers that snapshot the tree (the browser
/// driver, test doubles) hand these over inside an [`Observation`].
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UiNode {
    pub role: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub value: Option<String>,
    pub position: Option<(f64, f64)>,
    pub size: Option<(f64, f64)>,
    pub children: Vec<UiNode>,
}

impl UiNode {
    pub fn new(role: impl Into<String>) -> Self {
        Self { role: role.into(), ..Self::default() }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }

    pub fn with_frame(mut self, x: f64, y: f64, width: f64, height: f64) -> Self {
        self.position = Some((x, y));
        self.size = Some((width, height));
        self
    }

    pub fn with_child(mut self, child: UiNode) -> Self {
        self.children.push(child);
        self
    }
}

impl<'a> AxNode for &'a UiNode {
    fn role(&self) -> String {
        self.role.clone()
    }

    fn title(&self) -> String {
        self.title.clone().unwrap_or_default()
    }

    fn text(&self) -> String {
        self.description
            .as_deref()
            .filter(|d| !d.trim().is_empty())
            .or(self.value.as_deref())
            .unwrap_or_default()
            .to_string()
    }

    fn frame(&self) -> Option<Rect> {
        let ((x, y), (w, h)) = (self.position?, self.size?);
        Some(Rect::new(x, y, w, h))
    }

    fn children(&self) -> Vec<Self> {
        let node: &'a UiNode = *self;
        node.children.iter().collect()
    }
}

/// Top-level windows/applications with the focused one marked.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct UiTree {
    pub roots: Vec<UiNode>,
    pub focused: Option<usize>,
}

impl UiTree {
    pub fn single(root: UiNode) -> Self {
        Self { roots: vec![root], focused: Some(0) }
    }
}

impl<'a> AccessibilityTree for &'a UiTree {
    type Node = &'a UiNode;

    fn focused_root(&self) -> Option<&'a UiNode> {
        let tree: &'a UiTree = *self;
        tree.focused
            .and_then(|i| tree.roots.get(i))
            .or_else(|| tree.roots.first())
    }
}

// ========================= Element table =========================

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GroundedElement {
    pub id: usize,
    pub role: String,
    pub title: String,
    pub text: String,
    pub rect: Rect,
    /// Recovered from OCR rather than the accessibility tree.
    #[serde(default)]
    pub synthetic: bool,
}

impl GroundedElement {
    pub fn position(&self) -> (f64, f64) {
        (self.rect.x, self.rect.y)
    }

    pub fn size(&self) -> (f64, f64) {
        (self.rect.width, self.rect.height)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct GroundingConfig {
    pub excluded_roles: Vec<String>,
    pub ocr_fusion: bool,
    pub iou_threshold: f64,
    pub fuzzy_apps: bool,
    pub fuzzy_cutoff: f64,
}

impl Default for GroundingConfig {
    fn default() -> Self {
        Self {
            excluded_roles: ["generic", "panel", "window", "filler", "separator", "group"]
                .into_iter()
                .map(String::from)
                .collect(),
            ocr_fusion: false,
            iou_threshold: 0.1,
            fuzzy_apps: true,
            fuzzy_cutoff: 0.6,
        }
    }
}

impl GroundingConfig {
    pub fn app_catalog(&self, entries: Vec<AppEntry>) -> AppCatalog {
        AppCatalog::new(entries).with_fuzzy(self.fuzzy_apps.then_some(self.fuzzy_cutoff))
    }
}

/// Depth-first, pre-order walk from `root`. Children of dropped nodes are still visited.
pub fn collect_elements<N: AxNode>(root: N, excluded_roles: &[String]) -> Vec<GroundedElement> {
    let mut elements = Vec::new();
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        let role = node.role();
        let keep = !excluded_roles.iter().any(|r| r.eq_ignore_ascii_case(role.trim()));
        if let Some(rect) = node.frame().filter(Rect::is_valid).filter(|_| keep) {
            elements.push(GroundedElement {
                id: elements.len(),
                role,
                title: node.title(),
                text: node.text(),
                rect,
                synthetic: false,
            });
        }
        let mut children = node.children();
        children.reverse();
        stack.extend(children);
    }
    elements
}

fn cell(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn linearize(elements: &[GroundedElement]) -> String {
    let mut out = String::from("id\trole\ttitle\ttext");
    for e in elements {
        out.push_str(&format!("\n{}\t{}\t{}\t{}", e.id, cell(&e.role), cell(&e.title), cell(&e.text)));
    }
    out
}

/// Per-observation grounding state: the element table, the app catalogue and
/// any feedback produced while resolving the turn's action.
#[derive(Debug)]
pub struct Grounder {
    elements: Vec<GroundedElement>,
    linearized: String,
    apps: AppCatalog,
    out_of_range_hits: usize,
    feedback: Option<String>,
}

impl Grounder {
    pub fn observe<T: AccessibilityTree>(tree: T, cfg: &GroundingConfig, apps: AppCatalog) -> Self {
        let elements = match tree.focused_root() {
            Some(root) => collect_elements(root, &cfg.excluded_roles),
            None => Vec::new(),
        };
        Self::from_elements(elements, apps)
    }

    pub fn from_elements(elements: Vec<GroundedElement>, apps: AppCatalog) -> Self {
        let linearized = linearize(&elements);
        Self { elements, linearized, apps, out_of_range_hits: 0, feedback: None }
    }

    pub fn elements(&self) -> &[GroundedElement] {
        &self.elements
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn linearized(&self) -> &str {
        &self.linearized
    }

    pub fn apps(&self) -> &AppCatalog {
        &self.apps
    }

    /// Appends OCR boxes that do not overlap any element already in the table.
    /// Returns how many were added.
    pub fn fuse_boxes(&mut self, boxes: Vec<OcrBox>, iou_threshold: f64) -> usize {
        let before = self.elements.len();
        for b in boxes {
            if !b.rect.is_valid() || b.text.trim().is_empty() {
                continue;
            }
            let max_iou = self
                .elements
                .iter()
                .map(|e| e.rect.iou(&b.rect))
                .fold(0.0_f64, f64::max);
            if max_iou < iou_threshold {
                self.elements.push(GroundedElement {
                    id: self.elements.len(),
                    role: "button".to_string(),
                    title: b.text.trim().to_string(),
                    text: String::new(),
                    rect: b.rect,
                    synthetic: true,
                });
            }
        }
        let added = self.elements.len() - before;
        if added > 0 {
            self.linearized = linearize(&self.elements);
        }
        added
    }

    pub async fn fuse_text(&mut self, detector: &dyn TextDetector, png: &[u8], iou_threshold: f64) {
        if png.is_empty() {
            return;
        }
        match detector.detect(png).await {
            Ok(boxes) => {
                let added = self.fuse_boxes(boxes, iou_threshold);
                debug!(added, "fused ocr boxes into element table");
            }
            Err(e) => warn!(error = %e, "ocr detection failed; using accessibility elements only"),
        }
    }

    /// Bounds-checked lookup. An out-of-range id yields element 0 and counts one
    /// out-of-range hit. `None` only when the table is empty.
    pub fn resolve(&mut self, id: ElementId) -> Option<GroundedElement> {
        let in_range = usize::try_from(id).ok().filter(|i| *i < self.elements.len());
        match in_range {
            Some(i) => Some(self.elements[i].clone()),
            None => {
                self.out_of_range_hits += 1;
                self.feedback = Some(format!(
                    "Element id {id} does not exist in the current table ({} elements). Use an id listed in the accessibility tree.",
                    self.elements.len()
                ));
                self.elements.first().cloned()
            }
        }
    }

    pub fn out_of_range(&self) -> bool {
        self.out_of_range_hits > 0
    }

    pub fn out_of_range_hits(&self) -> usize {
        self.out_of_range_hits
    }

    pub fn take_feedback(&mut self) -> Option<String> {
        self.feedback.take()
    }

    fn point(&mut self, id: ElementId) -> Option<(f64, f64)> {
        self.resolve(id).map(|e| e.rect.center())
    }

    fn no_geometry(&mut self) -> GroundedAction {
        self.feedback = Some(
            "The accessibility tree has no interactive elements to target. Wait for the UI or open an application."
                .to_string(),
        );
        GroundedAction::Wait
    }

    /// Turns a model action into a command. Geometry failures degrade to `WAIT`
    /// with feedback; an out-of-range id still produces a command against
    /// element 0, which callers must discard when [`Self::out_of_range`] is set.
    pub fn ground(&mut self, action: &Action) -> GroundedAction {
        match action {
            Action::Click { element, clicks, button } => match self.point(*element) {
                Some((x, y)) => GroundedAction::Execute(
                    Command::new()
                        .push(InputOp::MoveTo { x, y })
                        .push(InputOp::Click { x, y, button: *button, count: *clicks }),
                ),
                None => self.no_geometry(),
            },
            Action::ClickAt { x, y, clicks, button } => {
                if !(x.is_finite() && y.is_finite() && *x >= 0.0 && *y >= 0.0) {
                    self.feedback = Some(format!("({x}, {y}) is not a point on the screen."));
                    return GroundedAction::Wait;
                }
                let (x, y) = (*x, *y);
                GroundedAction::Execute(
                    Command::new()
                        .push(InputOp::MoveTo { x, y })
                        .push(InputOp::Click { x, y, button: *button, count: *clicks }),
                )
            }
            Action::Type { element, text, append, enter } => {
                let Some((x, y)) = self.point(*element) else {
                    return self.no_geometry();
                };
                let mut cmd = Command::new()
                    .push(InputOp::MoveTo { x, y })
                    .push(InputOp::Click { x, y, button: MouseButton::Left, count: 1 });
                if !append {
                    cmd = cmd.hotkey(&["ctrl", "a"]).press("delete");
                }
                cmd = cmd.push(InputOp::TypeText { text: text.clone() });
                if *enter {
                    cmd = cmd.press("enter");
                }
                GroundedAction::Execute(cmd)
            }
            Action::Drag { from, to } => {
                let (Some((x1, y1)), Some((x2, y2))) = (self.point(*from), self.point(*to)) else {
                    return self.no_geometry();
                };
                GroundedAction::Execute(
                    Command::new()
                        .push(InputOp::MoveTo { x: x1, y: y1 })
                        .push(InputOp::ButtonDown { button: MouseButton::Left })
                        .push(InputOp::MoveTo { x: x2, y: y2 })
                        .push(InputOp::ButtonUp { button: MouseButton::Left }),
                )
            }
            Action::Scroll { element, clicks } => {
                let mut cmd = Command::new();
                if let Some(id) = element {
                    let Some((x, y)) = self.point(*id) else {
                        return self.no_geometry();
                    };
                    cmd = cmd.push(InputOp::MoveTo { x, y });
                }
                GroundedAction::Execute(cmd.push(InputOp::Scroll { amount: *clicks }))
            }
            Action::Hotkey { keys } => {
                let keys: Vec<String> = keys
                    .iter()
                    .map(|k| k.trim().to_ascii_lowercase())
                    .filter(|k| !k.is_empty())
                    .collect();
                if keys.is_empty() {
                    self.feedback = Some("hotkey needs at least one key.".to_string());
                    return GroundedAction::Wait;
                }
                GroundedAction::Execute(Command::new().hotkey(&keys))
            }
            // switching re-runs the launcher, which focuses a running instance
            Action::OpenApp { name } | Action::SwitchApp { name } => match self.apps.lookup(name) {
                Some(app) => GroundedAction::Execute(Command::new().push(InputOp::Launch {
                    app: app.name.clone(),
                    target: app.target.clone(),
                })),
                None => {
                    self.feedback = Some(format!(
                        "There is no application {name} installed on the system. Please replan and avoid this action."
                    ));
                    GroundedAction::Wait
                }
            },
            Action::Wait { .. } => GroundedAction::Wait,
            Action::Done => GroundedAction::Done,
            Action::Fail => GroundedAction::Fail,
        }
    }
}

/// Builds the turn's grounder, fusing OCR boxes when enabled and a detector is given.
pub async fn ground_observation(
    observation: &Observation,
    cfg: &GroundingConfig,
    apps: AppCatalog,
    detector: Option<&dyn TextDetector>,
) -> Grounder {
    let mut grounder = Grounder::observe(&observation.tree, cfg, apps);
    if let (true, Some(detector)) = (cfg.ocr_fusion, detector) {
        grounder.fuse_text(detector, &observation.screenshot, cfg.iou_threshold).await;
    }
    debug!(elements = grounder.len(), tree = %grounder.linearized(), "grounded observation");
    grounder
}

// ========================= Applications =========================

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppEntry {
    /// Name shown to the model.
    pub name: String,
    /// What the computer launches: a desktop id, an executable or a URL.
    pub target: String,
}

impl AppEntry {
    pub fn new(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self { name: name.into(), target: target.into() }
    }

    pub fn named(name: impl Into<String>) -> Self {
        let name = name.into();
        Self { target: name.clone(), name }
    }
}

#[derive(Clone, Debug, Default)]
pub struct AppCatalog {
    entries: Vec<AppEntry>,
    fuzzy_cutoff: Option<f64>,
}

impl AppCatalog {
    pub fn new(entries: Vec<AppEntry>) -> Self {
        Self { entries, fuzzy_cutoff: None }
    }

    pub fn with_fuzzy(mut self, cutoff: Option<f64>) -> Self {
        self.fuzzy_cutoff = cutoff;
        self
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.name.clone()).collect()
    }

    /// Exact, then case-insensitive, then (if enabled) the most similar name
    /// scoring at least the cutoff.
    pub fn lookup(&self, name: &str) -> Option<&AppEntry> {
        let name = name.trim();
        if let Some(e) = self.entries.iter().find(|e| e.name == name) {
            return Some(e);
        }
        if let Some(e) = self.entries.iter().find(|e| e.name.eq_ignore_ascii_case(name)) {
            return Some(e);
        }
        let cutoff = self.fuzzy_cutoff?;
        let wanted = name.to_lowercase();
        self.entries
            .iter()
            .map(|e| (similarity(&wanted, &e.name.to_lowercase()), e))
            .filter(|(score, _)| *score >= cutoff)
            .max_by(|a, b| a.0.total_cmp(&b.0))
            .map(|(_, e)| e)
    }

    /// Reads `*.desktop` launchers. The `Name=` key of the `[Desktop Entry]`
    /// section is the display name; the file stem is the launch target.
    pub fn scan_desktop_entries<P: AsRef<Path>>(dirs: &[P]) -> Vec<AppEntry> {
        let mut entries = Vec::new();
        for dir in dirs {
            let Ok(listing) = std::fs::read_dir(dir.as_ref()) else {
                debug!(dir = %dir.as_ref().display(), "application directory not readable");
                continue;
            };
            for item in listing.flatten() {
                let path = item.path();
                if path.extension().and_then(|e| e.to_str()) != Some("desktop") {
                    continue;
                }
                let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                    continue;
                };
                let name = std::fs::read_to_string(&path)
                    .ok()
                    .and_then(|body| desktop_entry_name(&body))
                    .unwrap_or_else(|| stem.to_string());
                entries.push(AppEntry::new(name, stem));
            }
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        entries
    }
}

fn desktop_entry_name(body: &str) -> Option<String> {
    let mut in_entry = false;
    for line in body.lines().map(str::trim) {
        if line.starts_with('[') {
            in_entry = line == "[Desktop Entry]";
            continue;
        }
        if in_entry {
            if let Some(name) = line.strip_prefix("Name=") {
                return Some(name.trim().to_string()).filter(|n| !n.is_empty());
            }
        }
    }
    None
}

/// Normalised edit similarity in `[0, 1]`.
fn similarity(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let longest = a.len().max(b.len());
    if longest == 0 {
        return 1.0;
    }
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut cur = vec![0; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        cur[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            cur[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(cur[j] + 1);
        }
        std::mem::swap(&mut prev, &mut cur);
    }
    1.0 - prev[b.len()] as f64 / longest as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tree() -> UiTree {
        UiTree::single(
            UiNode::new("window")
                .with_frame(0.0, 0.0, 800.0, 600.0)
                .with_child(
                    UiNode::new("push button")
                        .with_title("OK")
                        .with_frame(10.0, 10.0, 40.0, 20.0),
                )
                .with_child(
                    UiNode::new("panel")
                        .with_frame(0.0, 100.0, 800.0, 400.0)
                        .with_child(
                            UiNode::new("text")
                                .with_description("Display")
                                .with_frame(20.0, 120.0, 200.0, 30.0),
                        )
                        .with_child(UiNode::new("label").with_title("Hidden").with_frame(-5.0, 0.0, 10.0, 10.0))
                        .with_child(UiNode::new("label").with_title("Flat").with_frame(5.0, 5.0, 0.0, 10.0))
                        .with_child(UiNode::new("label").with_title("Unplaced")),
                ),
        )
    }

    #[test]
    fn iou_of_known_boxes() {
        let a = Rect::new(0.0, 0.0, 10.0, 10.0);
        let b = Rect::new(5.0, 0.0, 10.0, 10.0);
        assert!((a.iou(&b) - 50.0 / 150.0).abs() < 1e-9);
        assert_eq!(a.iou(&Rect::new(20.0, 20.0, 5.0, 5.0)), 0.0);
        assert_eq!(a.iou(&a), 1.0);
    }

    #[test]
    fn filter_drops_excluded_roles_and_bad_geometry() {
        let grounder = Grounder::observe(&sample_tree(), &GroundingConfig::default(), AppCatalog::default());
        let titles: Vec<_> = grounder.elements().iter().map(|e| (e.role.as_str(), e.id)).collect();
        assert_eq!(titles, vec![("push button", 0), ("text", 1)]);
        for e in grounder.elements() {
            assert!(e.rect.x >= 0.0 && e.rect.y >= 0.0);
            assert!(e.rect.width > 0.0 && e.rect.height > 0.0);
        }
        assert_eq!(
            grounder.linearized(),
            "id\trole\ttitle\ttext\n0\tpush button\tOK\t\n1\ttext\t\tDisplay"
        );
    }

    #[test]
    fn resolve_flags_each_out_of_range_call() {
        let mut grounder = Grounder::observe(&sample_tree(), &GroundingConfig::default(), AppCatalog::default());
        assert_eq!(grounder.resolve(1).map(|e| e.id), Some(1));
        assert!(!grounder.out_of_range());

        assert_eq!(grounder.resolve(9).map(|e| e.id), Some(0));
        assert_eq!(grounder.out_of_range_hits(), 1);
        assert_eq!(grounder.resolve(-1).map(|e| e.id), Some(0));
        assert_eq!(grounder.out_of_range_hits(), 2);
        assert!(grounder.take_feedback().is_some());
    }

    #[test]
    fn ocr_fusion_skips_overlapping_boxes() {
        let mut grounder = Grounder::observe(&sample_tree(), &GroundingConfig::default(), AppCatalog::default());
        let boxes = vec![
            OcrBox { text: "OK".into(), confidence: 0.9, rect: Rect::new(12.0, 10.0, 40.0, 20.0) },
            OcrBox { text: "Canvas Save".into(), confidence: 0.8, rect: Rect::new(500.0, 500.0, 60.0, 20.0) },
            OcrBox { text: "Canvas Save again".into(), confidence: 0.8, rect: Rect::new(502.0, 500.0, 60.0, 20.0) },
        ];
        assert_eq!(grounder.fuse_boxes(boxes, 0.1), 1);
        let added = &grounder.elements()[2];
        assert!(added.synthetic);
        assert_eq!((added.id, added.role.as_str(), added.title.as_str()), (2, "button", "Canvas Save"));
        for (i, a) in grounder.elements().iter().enumerate() {
            for b in &grounder.elements()[i + 1..] {
                assert!(a.rect.iou(&b.rect) < 0.1 || !b.synthetic);
            }
        }
    }

    #[test]
    fn click_targets_the_box_center() {
        let mut grounder = Grounder::observe(&sample_tree(), &GroundingConfig::default(), AppCatalog::default());
        let action = Action::Click { element: 0, clicks: 1, button: MouseButton::Left };
        let GroundedAction::Execute(cmd) = grounder.ground(&action) else {
            panic!("expected a command");
        };
        assert_eq!(cmd.ops[0], InputOp::MoveTo { x: 30.0, y: 20.0 });
    }

    #[test]
    fn coordinate_clicks_skip_the_table() {
        let mut grounder = Grounder::from_elements(Vec::new(), AppCatalog::default());
        let action = Action::ClickAt { x: 640.0, y: 360.0, clicks: 2, button: MouseButton::Left };
        assert_eq!(
            grounder.ground(&action),
            GroundedAction::Execute(
                Command::new()
                    .push(InputOp::MoveTo { x: 640.0, y: 360.0 })
                    .push(InputOp::Click { x: 640.0, y: 360.0, button: MouseButton::Left, count: 2 })
            )
        );
        assert!(!grounder.out_of_range());

        let action = Action::ClickAt { x: -3.0, y: 10.0, clicks: 1, button: MouseButton::Left };
        assert_eq!(grounder.ground(&action), GroundedAction::Wait);
        assert!(grounder.take_feedback().is_some());
    }

    #[test]
    fn switching_uses_the_app_catalog() {
        let apps = AppCatalog::new(vec![AppEntry::new("Calculator", "gnome-calculator")]);
        let mut grounder = Grounder::from_elements(Vec::new(), apps);
        let action = Action::SwitchApp { name: "calculator".into() };
        assert_eq!(
            grounder.ground(&action),
            GroundedAction::Execute(Command::new().push(InputOp::Launch {
                app: "Calculator".into(),
                target: "gnome-calculator".into(),
            }))
        );
        let action = Action::SwitchApp { name: "Terminal".into() };
        assert_eq!(grounder.ground(&action), GroundedAction::Wait);
        assert!(grounder.take_feedback().is_some_and(|f| f.contains("Terminal")));
    }

    #[test]
    fn replacing_text_selects_and_deletes_first() {
        let mut grounder = Grounder::observe(&sample_tree(), &GroundingConfig::default(), AppCatalog::default());
        let action = Action::Type { element: 1, text: "42".into(), append: false, enter: true };
        let GroundedAction::Execute(cmd) = grounder.ground(&action) else {
            panic!("expected a command");
        };
        let keys: Vec<_> = cmd
            .ops
            .iter()
            .filter_map(|op| match op {
                InputOp::KeyDown { key } => Some(key.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(keys, vec!["ctrl", "a", "delete", "enter"]);
        assert!(cmd.ops.contains(&InputOp::TypeText { text: "42".into() }));
    }

    #[test]
    fn empty_table_degrades_to_wait() {
        let mut grounder = Grounder::from_elements(Vec::new(), AppCatalog::default());
        let action = Action::Click { element: 0, clicks: 1, button: MouseButton::Left };
        assert_eq!(grounder.ground(&action), GroundedAction::Wait);
        assert!(grounder.take_feedback().is_some());
    }

    #[test]
    fn unknown_app_waits_with_feedback() {
        let apps = AppCatalog::new(vec![AppEntry::named("Calculator"), AppEntry::named("Text Editor")])
            .with_fuzzy(Some(0.6));
        let mut grounder = Grounder::from_elements(Vec::new(), apps);

        let action = Action::OpenApp { name: "calculator".into() };
        assert!(matches!(grounder.ground(&action), GroundedAction::Execute(_)));
        let action = Action::OpenApp { name: "Calculater".into() };
        assert!(matches!(grounder.ground(&action), GroundedAction::Execute(_)));

        let action = Action::OpenApp { name: "Photoshop".into() };
        assert_eq!(grounder.ground(&action), GroundedAction::Wait);
        assert_eq!(
            grounder.take_feedback().as_deref(),
            Some("There is no application Photoshop installed on the system. Please replan and avoid this action.")
        );
    }

    #[test]
    fn desktop_entries_use_their_display_name() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("org.gnome.Calculator.desktop"),
            "[Desktop Action new]\nName=New Window\n\n[Desktop Entry]\nType=Application\nName=Calculator\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("gedit.desktop"), "[Desktop Entry]\nExec=gedit\n").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "Name=Ignored").unwrap();

        let entries = AppCatalog::scan_desktop_entries(&[dir.path(), Path::new("/nonexistent/applications")]);
        assert_eq!(
            entries,
            vec![AppEntry::new("Calculator", "org.gnome.Calculator"), AppEntry::new("gedit", "gedit")]
        );
    }

    #[test]
    fn similarity_bounds() {
        assert_eq!(similarity("abc", "abc"), 1.0);
        assert_eq!(similarity("abc", "xyz"), 0.0);
        assert!(similarity("calculater", "calculator") > 0.85);
    }
}
