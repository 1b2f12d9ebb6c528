use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chromiumoxide::browser::Browser as OxideBrowser;
use chromiumoxide::cdp::browser_protocol::emulation::SetDeviceMetricsOverrideParams;
use chromiumoxide::cdp::browser_protocol::input::{
    DispatchKeyEventParams, DispatchKeyEventType, DispatchMouseEventParams, DispatchMouseEventType,
    InsertTextParams, MouseButton as CdpMouseButton,
};
use chromiumoxide::layout::Point;
use chromiumoxide::page::{Page, ScreenshotParamsBuilder};
use futures::StreamExt;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::action::{InputOp, MouseButton};
use crate::agent::{AgentError, Computer, Observation};
use crate::grounding::{AppEntry, UiNode, UiTree};

#[derive(Clone, Debug)]
pub struct BrowserConfig {
    pub headless: bool,
    pub user_agent: Option<String>,
    pub viewport: (u32, u32),
    /// Sites offered to the model as applications for `open_app`.
    pub apps: Vec<AppEntry>,
    pub start_url: Option<String>,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self { headless: true, user_agent: None, viewport: (1280, 800), apps: Vec::new(), start_url: None }
    }
}

// Walks the DOM into the UiNode shape. Nodes outside the viewport get a zero
// size so grounding drops them while still visiting their children.
const TREE_SCRIPT: &str = r#"
(() => {
  const roleOf = (el) => {
    const explicit = el.getAttribute('role');
    if (explicit) return explicit;
    const tag = el.tagName.toLowerCase();
    switch (tag) {
      case 'a': return el.hasAttribute('href') ? 'link' : 'generic';
      case 'button': case 'summary': return 'button';
      case 'input': {
        const t = (el.getAttribute('type') || 'text').toLowerCase();
        if (t === 'hidden') return 'generic';
        if (['button', 'submit', 'reset', 'image'].includes(t)) return 'button';
        if (t === 'checkbox' || t === 'radio') return t;
        return 'textbox';
      }
      case 'textarea': return 'textbox';
      case 'select': return 'combobox';
      case 'img': return 'img';
      case 'h1': case 'h2': case 'h3': case 'h4': case 'h5': case 'h6': return 'heading';
      case 'li': return 'listitem';
      case 'p': case 'span': case 'label': case 'td': case 'th':
        return el.children.length === 0 && (el.innerText || '').trim() ? 'text' : 'generic';
      default:
        return el.isContentEditable ? 'textbox' : 'generic';
    }
  };
  const walk = (el) => {
    const style = window.getComputedStyle(el);
    if (style.display === 'none' || style.visibility === 'hidden') return null;
    const r = el.getBoundingClientRect();
    const onScreen = r.bottom > 0 && r.right > 0 && r.top < window.innerHeight && r.left < window.innerWidth;
    const title = el.getAttribute('aria-label') || el.getAttribute('title') || el.getAttribute('alt')
      || el.getAttribute('placeholder') || '';
    const value = (typeof el.value === 'string') ? el.value
      : (el.children.length === 0 ? (el.innerText || '').trim().slice(0, 120) : '');
    const children = [];
    for (const c of el.children) { const n = walk(c); if (n) children.push(n); }
    return {
      role: roleOf(el), title, value,
      position: [Math.max(r.x, 0), Math.max(r.y, 0)],
      size: onScreen ? [r.width, r.height] : [0, 0],
      children,
    };
  };
  const body = document.body ? walk(document.body) : null;
  return {
    role: 'window', title: document.title,
    position: [0, 0], size: [window.innerWidth, window.innerHeight],
    children: body ? [body] : [],
  };
})()
"#;

const SINGLE_TAB_SCRIPT: &str = r#"
(() => {
  for (const a of document.querySelectorAll('a[target]')) a.setAttribute('target', '_self');
  window.open = (url) => { if (url) window.location.href = url; return window; };
})()
"#;

const MOD_ALT: i64 = 1;
const MOD_CTRL: i64 = 2;
const MOD_META: i64 = 4;
const MOD_SHIFT: i64 = 8;

struct KeyDef {
    key: String,
    code: String,
    vk: i64,
    text: Option<String>,
    modifier: i64,
}

fn key_definition(name: &str) -> KeyDef {
    let lower = name.trim().to_ascii_lowercase();
    let named = |key: &str, code: &str, vk: i64, text: Option<&str>, modifier: i64| KeyDef {
        key: key.to_string(),
        code: code.to_string(),
        vk,
        text: text.map(str::to_string),
        modifier,
    };
    match lower.as_str() {
        "enter" | "return" => named("Enter", "Enter", 13, Some("\r"), 0),
        "tab" => named("Tab", "Tab", 9, None, 0),
        "backspace" => named("Backspace", "Backspace", 8, None, 0),
        "delete" | "del" => named("Delete", "Delete", 46, None, 0),
        "escape" | "esc" => named("Escape", "Escape", 27, None, 0),
        "space" => named(" ", "Space", 32, Some(" "), 0),
        "up" | "arrowup" => named("ArrowUp", "ArrowUp", 38, None, 0),
        "down" | "arrowdown" => named("ArrowDown", "ArrowDown", 40, None, 0),
        "left" | "arrowleft" => named("ArrowLeft", "ArrowLeft", 37, None, 0),
        "right" | "arrowright" => named("ArrowRight", "ArrowRight", 39, None, 0),
        "home" => named("Home", "Home", 36, None, 0),
        "end" => named("End", "End", 35, None, 0),
        "pageup" => named("PageUp", "PageUp", 33, None, 0),
        "pagedown" => named("PageDown", "PageDown", 34, None, 0),
        "ctrl" | "control" => named("Control", "ControlLeft", 17, None, MOD_CTRL),
        "shift" => named("Shift", "ShiftLeft", 16, None, MOD_SHIFT),
        "alt" | "option" => named("Alt", "AltLeft", 18, None, MOD_ALT),
        "cmd" | "command" | "meta" | "win" | "super" => named("Meta", "MetaLeft", 91, None, MOD_META),
        _ => {
            let mut chars = lower.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => {
                    let upper = c.to_ascii_uppercase();
                    let code = if c.is_ascii_alphabetic() {
                        format!("Key{upper}")
                    } else if c.is_ascii_digit() {
                        format!("Digit{c}")
                    } else {
                        String::new()
                    };
                    let vk = if c.is_ascii_alphanumeric() { upper as i64 } else { 0 };
                    KeyDef { key: c.to_string(), code, vk, text: Some(c.to_string()), modifier: 0 }
                }
                _ => match lower.strip_prefix('f').and_then(|n| n.parse::<i64>().ok()) {
                    Some(n @ 1..=12) => named(&format!("F{n}"), &format!("F{n}"), 111 + n, None, 0),
                    _ => named(name.trim(), name.trim(), 0, None, 0),
                },
            }
        }
    }
}

fn cdp_button(button: MouseButton) -> CdpMouseButton {
    match button {
        MouseButton::Left => CdpMouseButton::Left,
        MouseButton::Right => CdpMouseButton::Right,
        MouseButton::Middle => CdpMouseButton::Middle,
    }
}

pub struct Browser {
    page: Page,
    _browser: OxideBrowser,
    pointer: Mutex<(f64, f64)>,
    modifiers: Mutex<i64>,
}

impl Browser {
    async fn from_parts(browser: OxideBrowser, cfg: &BrowserConfig) -> Result<Self> {
        let page = browser.new_page("about:blank").await?;
        if let Some(ua) = &cfg.user_agent {
            page.set_user_agent(ua.clone()).await?;
        }
        let (width, height) = cfg.viewport;
        // a zero-sized viewport breaks screenshots
        let metrics = SetDeviceMetricsOverrideParams::builder()
            .width(i64::from(width))
            .height(i64::from(height))
            .device_scale_factor(1.0)
            .mobile(false)
            .build()
            .map_err(|e| anyhow!(e))?;
        if let Err(e) = page.execute(metrics).await {
            warn!(error = %e, "viewport override rejected");
        }
        let browser = Self { page, _browser: browser, pointer: Mutex::new((0.0, 0.0)), modifiers: Mutex::new(0) };
        if let Some(url) = &cfg.start_url {
            browser.goto(url).await?;
        }
        Ok(browser)
    }

    pub async fn launch(cfg: BrowserConfig) -> Result<Self> {
        let mut builder = chromiumoxide::browser::BrowserConfig::builder();
        if !cfg.headless {
            builder = builder.with_head();
        }
        // Unique profile per launch; rapid restarts otherwise trip the profile lock.
        let ts = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis()).unwrap_or_default();
        let mut profile_dir: PathBuf = std::env::temp_dir();
        profile_dir.push(format!("glass-pilot-profile-{}-{}", std::process::id(), ts));
        std::fs::create_dir_all(&profile_dir)?;
        builder = builder
            .user_data_dir(profile_dir)
            .window_size(cfg.viewport.0, cfg.viewport.1)
            .arg("--no-first-run")
            .arg("--no-default-browser-check");
        let bcfg = builder.build().map_err(|e| anyhow!(e))?;
        let (browser, mut handler) = OxideBrowser::launch(bcfg).await?;
        tokio::spawn(async move { while handler.next().await.is_some() {} });
        Self::from_parts(browser, &cfg).await
    }

    /// Attaches to a running browser through its DevTools websocket.
    pub async fn connect(ws_url: &str, cfg: BrowserConfig) -> Result<Self> {
        let (browser, mut handler) = OxideBrowser::connect(ws_url).await?;
        tokio::spawn(async move { while handler.next().await.is_some() {} });
        Self::from_parts(browser, &cfg).await
    }

    pub async fn goto(&self, url: &str) -> Result<()> {
        self.page.goto(url).await?;
        self.page.wait_for_navigation().await?;
        if let Err(e) = self.enable_single_tab_mode().await {
            debug!(error = %e, "single tab mode not applied");
        }
        Ok(())
    }

    pub async fn url(&self) -> Result<String> {
        Ok(self.page.url().await?.unwrap_or_default())
    }

    /// Keeps navigation in the controlled tab.
    pub async fn enable_single_tab_mode(&self) -> Result<()> {
        self.page.evaluate(SINGLE_TAB_SCRIPT).await?;
        Ok(())
    }

    pub async fn ui_tree(&self) -> Result<UiNode> {
        let node = self.page.evaluate(TREE_SCRIPT).await?.into_value::<UiNode>()?;
        Ok(node)
    }

    pub async fn screenshot_png(&self) -> Result<Vec<u8>> {
        let params = ScreenshotParamsBuilder::default().full_page(false).build();
        Ok(self.page.screenshot(params).await?)
    }

    fn modifiers(&self) -> i64 {
        self.modifiers.lock().map(|m| *m).unwrap_or_default()
    }

    fn pointer(&self) -> (f64, f64) {
        self.pointer.lock().map(|p| *p).unwrap_or_default()
    }

    pub async fn move_mouse(&self, x: f64, y: f64) -> Result<()> {
        self.page.move_mouse(Point { x, y }).await?;
        if let Ok(mut p) = self.pointer.lock() {
            *p = (x, y);
        }
        Ok(())
    }

    async fn mouse_event(&self, kind: DispatchMouseEventType, button: MouseButton, count: i64) -> Result<()> {
        let (x, y) = self.pointer();
        let params = DispatchMouseEventParams::builder()
            .r#type(kind)
            .x(x)
            .y(y)
            .button(cdp_button(button))
            .click_count(count)
            .modifiers(self.modifiers())
            .build()
            .map_err(|e| anyhow!(e))?;
        self.page.execute(params).await?;
        Ok(())
    }

    pub async fn click(&self, x: f64, y: f64, button: MouseButton, count: u32) -> Result<()> {
        self.move_mouse(x, y).await?;
        for n in 1..=i64::from(count.max(1)) {
            self.mouse_event(DispatchMouseEventType::MousePressed, button, n).await?;
            self.mouse_event(DispatchMouseEventType::MouseReleased, button, n).await?;
        }
        Ok(())
    }

    pub async fn button_down(&self, button: MouseButton) -> Result<()> {
        self.mouse_event(DispatchMouseEventType::MousePressed, button, 1).await
    }

    pub async fn button_up(&self, button: MouseButton) -> Result<()> {
        self.mouse_event(DispatchMouseEventType::MouseReleased, button, 1).await
    }

    /// Positive amounts scroll up, like a mouse wheel turned away from the user.
    pub async fn scroll(&self, amount: i32) -> Result<()> {
        let (x, y) = self.pointer();
        let params = DispatchMouseEventParams::builder()
            .r#type(DispatchMouseEventType::MouseWheel)
            .x(x)
            .y(y)
            .delta_x(0.0)
            .delta_y(-f64::from(amount) * 10.0)
            .build()
            .map_err(|e| anyhow!(e))?;
        self.page.execute(params).await?;
        Ok(())
    }

    pub async fn key_down(&self, key: &str) -> Result<()> {
        let def = key_definition(key);
        let held = if let Ok(mut m) = self.modifiers.lock() {
            *m |= def.modifier;
            *m
        } else {
            0
        };
        let mut builder = DispatchKeyEventParams::builder()
            .r#type(DispatchKeyEventType::KeyDown)
            .key(def.key)
            .code(def.code)
            .windows_virtual_key_code(def.vk)
            .modifiers(held);
        // with ctrl/alt/meta held the key is a shortcut, not text
        if held & (MOD_CTRL | MOD_ALT | MOD_META) == 0 {
            if let Some(text) = def.text {
                builder = builder.text(text);
            }
        }
        self.page.execute(builder.build().map_err(|e| anyhow!(e))?).await?;
        Ok(())
    }

    pub async fn key_up(&self, key: &str) -> Result<()> {
        let def = key_definition(key);
        let held = if let Ok(mut m) = self.modifiers.lock() {
            *m &= !def.modifier;
            *m
        } else {
            0
        };
        let params = DispatchKeyEventParams::builder()
            .r#type(DispatchKeyEventType::KeyUp)
            .key(def.key)
            .code(def.code)
            .windows_virtual_key_code(def.vk)
            .modifiers(held)
            .build()
            .map_err(|e| anyhow!(e))?;
        self.page.execute(params).await?;
        Ok(())
    }

    pub async fn type_text(&self, text: &str) -> Result<()> {
        self.page.execute(InsertTextParams { text: text.to_string() }).await?;
        Ok(())
    }

    pub async fn wait_for_stable(&self) {
        sleep(Duration::from_millis(400)).await;
    }
}

/// A browser tab driven as a computer: the DOM stands in for the
/// accessibility tree and configured sites stand in for applications.
pub struct ChromiumComputer {
    browser: Browser,
    apps: Vec<AppEntry>,
}

impl ChromiumComputer {
    pub async fn launch(cfg: BrowserConfig) -> Result<Self, AgentError> {
        let apps = cfg.apps.clone();
        let browser = Browser::launch(cfg)
            .await
            .map_err(|e| AgentError::Computer(e.to_string()))?;
        Ok(Self { browser, apps })
    }

    pub async fn connect(ws_url: &str, cfg: BrowserConfig) -> Result<Self, AgentError> {
        let apps = cfg.apps.clone();
        let browser = Browser::connect(ws_url, cfg)
            .await
            .map_err(|e| AgentError::Computer(e.to_string()))?;
        Ok(Self { browser, apps })
    }

    pub fn browser(&self) -> &Browser {
        &self.browser
    }

    async fn perform_op(&self, op: &InputOp) -> Result<()> {
        match op {
            InputOp::MoveTo { x, y } => self.browser.move_mouse(*x, *y).await,
            InputOp::Click { x, y, button, count } => self.browser.click(*x, *y, *button, *count).await,
            InputOp::ButtonDown { button } => self.browser.button_down(*button).await,
            InputOp::ButtonUp { button } => self.browser.button_up(*button).await,
            InputOp::KeyDown { key } => self.browser.key_down(key).await,
            InputOp::KeyUp { key } => self.browser.key_up(key).await,
            InputOp::TypeText { text } => self.browser.type_text(text).await,
            InputOp::Scroll { amount } => self.browser.scroll(*amount).await,
            InputOp::Launch { target, .. } => {
                let current = self.browser.url().await.unwrap_or_default();
                if current.trim_end_matches('/') == target.trim_end_matches('/') {
                    // already in front
                    return Ok(());
                }
                self.browser.goto(target).await
            }
        }
    }
}

#[async_trait]
impl Computer for ChromiumComputer {
    async fn observe(&self) -> Result<Observation, AgentError> {
        self.browser.wait_for_stable().await;
        let root = self
            .browser
            .ui_tree()
            .await
            .map_err(|e| AgentError::Computer(e.to_string()))?;
        let screenshot = match self.browser.screenshot_png().await {
            Ok(png) => png,
            Err(e) => {
                warn!(error = %e, "screenshot failed; continuing without one");
                Vec::new()
            }
        };
        Ok(Observation { tree: UiTree::single(root), screenshot })
    }

    async fn perform(&self, op: &InputOp) -> Result<(), AgentError> {
        debug!(%op, "browser input");
        self.perform_op(op)
            .await
            .map_err(|e| AgentError::Computer(format!("{op}: {e}")))
    }

    async fn installed_apps(&self) -> Result<Vec<AppEntry>, AgentError> {
        Ok(self.apps.clone())
    }
}
