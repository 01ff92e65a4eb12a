//! W3C WebDriver backend
//!
//! Talks JSON over HTTP to chromedriver, geckodriver or a Selenium grid.
//! Frame contexts are applied lazily: before each element command the session
//! switches to the locator's frame path unless it is already there.

use async_trait::async_trait;
use base64::Engine as _;
use reqwest::Method;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use super::locator::{
    implicit_role, ElementAction, ElementInfo, FrameContext, FrameHop, Locator, Selector,
};
use super::{BrowserLauncher, BrowserSession, ATTACH_POLL_INTERVAL};
use crate::config::WebDriverConfig;
use crate::error::{BrowserError, BrowserResult};

/// Key under which W3C drivers serialize element references
const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";

const FIND_BY_TEXT_JS: &str = r#"
const wanted = arguments[0];
const norm = s => (s || '').replace(/\s+/g, ' ').trim();
const found = [];
for (const el of document.querySelectorAll('*')) {
  const own = Array.from(el.childNodes)
    .filter(n => n.nodeType === Node.TEXT_NODE)
    .map(n => n.textContent)
    .join(' ');
  if (wanted && norm(own) === wanted) found.push(el);
}
return found;
"#;

const FIND_BY_ROLE_JS: &str = r#"
const [role, name] = arguments;
const norm = s => (s || '').replace(/\s+/g, ' ').trim();
const implicit = el => {
  const tag = el.tagName.toLowerCase();
  const type = (el.getAttribute('type') || 'text').toLowerCase();
  switch (tag) {
    case 'button': return 'button';
    case 'a': case 'area': return el.hasAttribute('href') ? 'link' : null;
    case 'select': return 'combobox';
    case 'textarea': return 'textbox';
    case 'h1': case 'h2': case 'h3': case 'h4': case 'h5': case 'h6': return 'heading';
    case 'img': return 'img';
    case 'ul': case 'ol': return 'list';
    case 'li': return 'listitem';
    case 'nav': return 'navigation';
    case 'form': return 'form';
    case 'table': return 'table';
    case 'dialog': return 'dialog';
    case 'option': return 'option';
    case 'input':
      if (['button', 'submit', 'reset', 'image'].includes(type)) return 'button';
      if (type === 'checkbox') return 'checkbox';
      if (type === 'radio') return 'radio';
      if (type === 'range') return 'slider';
      if (type === 'number') return 'spinbutton';
      if (type === 'search') return 'searchbox';
      if (type === 'hidden') return null;
      return 'textbox';
  }
  return null;
};
const accessibleName = el => {
  const label = el.getAttribute('aria-label');
  if (label !== null) return norm(label);
  const text = norm(el.textContent);
  if (text) return text;
  const fallback = (el.tagName === 'INPUT' ? el.value : null)
    || el.getAttribute('title') || el.getAttribute('alt') || el.getAttribute('placeholder');
  return norm(fallback);
};
return Array.from(document.querySelectorAll('*')).filter(el =>
  (el.getAttribute('role') || implicit(el)) === role && accessibleName(el) === name);
"#;

const DESCRIBE_JS: &str = r#"
const el = arguments[0];
const style = window.getComputedStyle(el);
const visible = !!(el.offsetWidth || el.offsetHeight || el.getClientRects().length)
  && style.visibility !== 'hidden';
return {
  tag: el.tagName.toLowerCase(),
  inputType: el.getAttribute('type'),
  text: (el.innerText || el.textContent || '').replace(/\s+/g, ' ').trim(),
  placeholder: el.getAttribute('placeholder'),
  role: el.getAttribute('role'),
  hasHref: el.hasAttribute('href'),
  name: el.getAttribute('name') || el.getAttribute('aria-label'),
  value: 'value' in el ? String(el.value) : el.getAttribute('value'),
  visible,
  checked: !!el.checked,
};
"#;

const SELECT_OPTION_JS: &str = r#"
const [select, wanted] = arguments;
const norm = s => (s || '').replace(/\s+/g, ' ').trim();
const option = Array.from(select.options || [])
  .find(o => o.value === wanted || norm(o.text) === norm(wanted));
if (!option) return false;
select.value = option.value;
select.dispatchEvent(new Event('input', { bubbles: true }));
select.dispatchEvent(new Event('change', { bubbles: true }));
return true;
"#;

const LIST_FRAMES_JS: &str = r#"
return Array.from(document.querySelectorAll('iframe, frame'))
  .map(f => ({ name: f.getAttribute('name') || '', src: f.src || '' }));
"#;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NewSession {
    session_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawElementInfo {
    tag: String,
    input_type: Option<String>,
    text: String,
    placeholder: Option<String>,
    role: Option<String>,
    has_href: bool,
    name: Option<String>,
    value: Option<String>,
    visible: bool,
    checked: bool,
}

impl From<RawElementInfo> for ElementInfo {
    fn from(raw: RawElementInfo) -> Self {
        let input_type = raw.input_type.map(|t| t.to_ascii_lowercase());
        let role = raw.role.or_else(|| {
            implicit_role(&raw.tag, input_type.as_deref(), raw.has_href).map(str::to_string)
        });
        Self {
            tag: raw.tag,
            input_type,
            text: Some(raw.text).filter(|t| !t.is_empty()),
            placeholder: raw.placeholder,
            role,
            name: raw.name,
            value: raw.value,
            visible: raw.visible,
            checked: raw.checked,
        }
    }
}

#[derive(Debug, Deserialize)]
struct FrameEntry {
    name: String,
    src: String,
}

/// Opens WebDriver sessions
pub struct WebDriverLauncher {
    config: WebDriverConfig,
    client: reqwest::Client,
}

impl WebDriverLauncher {
    pub fn new(config: WebDriverConfig) -> BrowserResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()?;
        Ok(Self { config, client })
    }

    fn capabilities(&self) -> Value {
        let mut args = self.config.args.clone();
        let browser = self.config.browser.to_ascii_lowercase();
        let mut always_match = json!({ "browserName": browser });

        if browser == "firefox" {
            if self.config.headless {
                args.push("-headless".to_string());
            }
            always_match["moz:firefoxOptions"] = json!({ "args": args });
        } else {
            if self.config.headless {
                args.push("--headless=new".to_string());
            }
            args.push(format!(
                "--window-size={},{}",
                self.config.viewport_width, self.config.viewport_height
            ));
            always_match["goog:chromeOptions"] = json!({ "args": args });
        }

        json!({ "capabilities": { "alwaysMatch": always_match } })
    }
}

#[async_trait]
impl BrowserLauncher for WebDriverLauncher {
    async fn launch(&self) -> BrowserResult<Box<dyn BrowserSession>> {
        let endpoint = self.config.endpoint.trim_end_matches('/');
        let value = send(
            &self.client,
            Method::POST,
            &format!("{}/session", endpoint),
            Some(self.capabilities()),
        )
        .await?;
        let created: NewSession = serde_json::from_value(value)?;
        info!("Opened WebDriver session {} at {}", created.session_id, endpoint);

        let session = WebDriverSession {
            client: self.client.clone(),
            base: format!("{}/session/{}", endpoint, created.session_id),
            frame: Mutex::new(Vec::new()),
        };

        let rect = json!({
            "width": self.config.viewport_width,
            "height": self.config.viewport_height,
        });
        if let Err(e) = session.post("/window/rect", rect).await {
            warn!("Failed to size browser window: {}", e);
        }

        Ok(Box::new(session))
    }
}

/// Issue one WebDriver command and unwrap its `value`
async fn send(
    client: &reqwest::Client,
    method: Method,
    url: &str,
    body: Option<Value>,
) -> BrowserResult<Value> {
    let mut request = client.request(method.clone(), url);
    if method == Method::POST {
        request = request.json(&body.unwrap_or_else(|| json!({})));
    }
    let response = request.send().await?;
    let status = response.status();
    let mut payload: Value = response.json().await?;
    let value = payload.get_mut("value").map(Value::take).unwrap_or(Value::Null);

    if status.is_success() {
        return Ok(value);
    }

    let error = value
        .get("error")
        .and_then(Value::as_str)
        .unwrap_or("unknown error")
        .to_string();
    let message = value
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    debug!("WebDriver {} {} failed: {} ({})", method, url, error, status);

    Err(match error.as_str() {
        "no such element" | "stale element reference" | "no such frame" => {
            BrowserError::NoSuchElement(message)
        }
        "invalid selector" => BrowserError::InvalidSelector(message),
        "invalid session id" => BrowserError::SessionClosed,
        _ => BrowserError::WebDriver { error, message },
    })
}

fn element_ref(id: &str) -> Value {
    json!({ ELEMENT_KEY: id })
}

fn element_ids(value: &Value) -> Vec<String> {
    value
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.get(ELEMENT_KEY).and_then(Value::as_str))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// WebDriver code point for a named key, or the key itself
fn key_code(key: &str) -> String {
    let code = match key.to_ascii_lowercase().as_str() {
        "enter" | "return" => '\u{E007}',
        "tab" => '\u{E004}',
        "escape" | "esc" => '\u{E00C}',
        "backspace" => '\u{E003}',
        "delete" => '\u{E017}',
        "space" => '\u{E00D}',
        "arrowleft" | "left" => '\u{E012}',
        "arrowup" | "up" => '\u{E013}',
        "arrowright" | "right" => '\u{E014}',
        "arrowdown" | "down" => '\u{E015}',
        "home" => '\u{E011}',
        "end" => '\u{E010}',
        "pageup" => '\u{E00E}',
        "pagedown" => '\u{E00F}',
        "shift" => '\u{E008}',
        "control" | "ctrl" => '\u{E009}',
        "alt" => '\u{E00A}',
        "meta" | "command" | "cmd" => '\u{E03D}',
        _ => return key.to_string(),
    };
    code.to_string()
}

/// Key action sequence pressing every key of a `+`-joined combination
fn key_actions(combo: &str) -> Value {
    let keys: Vec<String> = combo
        .split('+')
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(key_code)
        .collect();
    let mut actions: Vec<Value> = keys
        .iter()
        .map(|k| json!({ "type": "keyDown", "value": k }))
        .collect();
    actions.extend(keys.iter().rev().map(|k| json!({ "type": "keyUp", "value": k })));
    json!({ "actions": [{ "type": "key", "id": "keyboard", "actions": actions }] })
}

fn pointer_actions(actions: Vec<Value>) -> Value {
    json!({
        "actions": [{
            "type": "pointer",
            "id": "mouse",
            "parameters": { "pointerType": "mouse" },
            "actions": actions,
        }]
    })
}

fn move_to(element: &str) -> Value {
    json!({ "type": "pointerMove", "duration": 0, "origin": element_ref(element), "x": 0, "y": 0 })
}

/// One WebDriver session
pub struct WebDriverSession {
    client: reqwest::Client,
    base: String,
    /// Frame path the driver is currently switched to
    frame: Mutex<Vec<FrameHop>>,
}

impl WebDriverSession {
    async fn get(&self, path: &str) -> BrowserResult<Value> {
        send(&self.client, Method::GET, &format!("{}{}", self.base, path), None).await
    }

    async fn post(&self, path: &str, body: Value) -> BrowserResult<Value> {
        send(
            &self.client,
            Method::POST,
            &format!("{}{}", self.base, path),
            Some(body),
        )
        .await
    }

    async fn delete(&self, path: &str) -> BrowserResult<Value> {
        send(&self.client, Method::DELETE, &format!("{}{}", self.base, path), None).await
    }

    async fn execute(&self, script: &str, args: Vec<Value>) -> BrowserResult<Value> {
        self.post("/execute/sync", json!({ "script": script, "args": args }))
            .await
    }

    async fn perform_actions(&self, actions: Value) -> BrowserResult<()> {
        self.post("/actions", actions).await?;
        self.delete("/actions").await?;
        Ok(())
    }

    /// Switch to `context` and hold the frame lock while the caller works in it
    async fn enter(&self, context: &FrameContext) -> BrowserResult<MutexGuard<'_, Vec<FrameHop>>> {
        let mut current = self.frame.lock().await;
        if current.as_slice() == context.hops() {
            return Ok(current);
        }

        current.clear();
        self.post("/frame", json!({ "id": null })).await?;
        for hop in context.hops() {
            let id = match hop {
                FrameHop::Selector(css) => {
                    let found = self.find_css(css).await?;
                    let element = found
                        .first()
                        .ok_or_else(|| BrowserError::NoSuchElement(format!("frame {}", css)))?;
                    element_ref(element)
                }
                FrameHop::Index(i) => json!(i),
            };
            self.post("/frame", json!({ "id": id })).await?;
            current.push(hop.clone());
        }
        Ok(current)
    }

    async fn find_css(&self, css: &str) -> BrowserResult<Vec<String>> {
        let value = self
            .post("/elements", json!({ "using": "css selector", "value": css }))
            .await?;
        Ok(element_ids(&value))
    }

    /// Element ids matching a selector in the currently entered frame
    async fn find(&self, selector: &Selector) -> BrowserResult<Vec<String>> {
        match selector {
            Selector::Text(text) => {
                let value = self
                    .execute(FIND_BY_TEXT_JS, vec![json!(super::normalize_text(text))])
                    .await?;
                Ok(element_ids(&value))
            }
            Selector::Role { role, name } => {
                let value = self
                    .execute(
                        FIND_BY_ROLE_JS,
                        vec![json!(role), json!(super::normalize_text(name))],
                    )
                    .await?;
                Ok(element_ids(&value))
            }
            other => {
                let css = other
                    .as_css()
                    .ok_or_else(|| BrowserError::InvalidSelector(other.to_string()))?;
                self.find_css(&css).await
            }
        }
    }

    async fn first(&self, locator: &Locator) -> BrowserResult<String> {
        self.find(&locator.selector)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| BrowserError::NoSuchElement(locator.to_string()))
    }

    async fn navigate<F>(&self, timeout: Duration, what: &str, request: F) -> BrowserResult<()>
    where
        F: std::future::Future<Output = BrowserResult<Value>> + Send,
    {
        let mut frame = self.frame.lock().await;
        let result = tokio::time::timeout(timeout, request).await;
        // Navigation always lands the driver in the top-level browsing context
        frame.clear();
        match result {
            Ok(outcome) => outcome.map(|_| ()),
            Err(_) => Err(BrowserError::Navigation(format!(
                "{} timed out after {} ms",
                what,
                timeout.as_millis()
            ))),
        }
    }

    async fn list_frames(&self, context: &FrameContext) -> BrowserResult<Vec<FrameEntry>> {
        let _entered = self.enter(context).await?;
        let value = self.execute(LIST_FRAMES_JS, Vec::new()).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Depth-first search for a frame whose entry satisfies `pred`
    async fn search_frames(
        &self,
        pred: &(dyn Fn(&FrameEntry) -> bool + Send + Sync),
    ) -> BrowserResult<Option<FrameContext>> {
        let mut pending = vec![FrameContext::Main];
        while let Some(context) = pending.pop() {
            let frames = self.list_frames(&context).await?;
            if let Some(index) = frames.iter().position(pred) {
                return Ok(Some(context.child(FrameHop::Index(index))));
            }
            for index in (0..frames.len()).rev() {
                pending.push(context.child(FrameHop::Index(index)));
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl BrowserSession for WebDriverSession {
    async fn goto(&self, url: &str, timeout: Duration) -> BrowserResult<()> {
        debug!("Navigating to {}", url);
        self.navigate(timeout, url, self.post("/url", json!({ "url": url })))
            .await
    }

    async fn reload(&self, timeout: Duration) -> BrowserResult<()> {
        self.navigate(timeout, "reload", self.post("/refresh", json!({})))
            .await
    }

    async fn current_url(&self) -> BrowserResult<String> {
        let value = self.get("/url").await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn title(&self) -> BrowserResult<String> {
        let value = self.get("/title").await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn wait_for_load(&self, timeout: Duration) -> BrowserResult<bool> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let state = self
                .execute("return document.readyState;", Vec::new())
                .await?;
            if state.as_str() == Some("complete") {
                return Ok(true);
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(ATTACH_POLL_INTERVAL).await;
        }
    }

    async fn press_key(&self, key: &str) -> BrowserResult<()> {
        self.perform_actions(key_actions(key)).await
    }

    async fn scroll_by(&self, dx: i64, dy: i64) -> BrowserResult<()> {
        self.execute(
            "window.scrollBy(arguments[0], arguments[1]);",
            vec![json!(dx), json!(dy)],
        )
        .await?;
        Ok(())
    }

    async fn screenshot(&self) -> BrowserResult<Vec<u8>> {
        let value = self.get("/screenshot").await?;
        let encoded = value
            .as_str()
            .ok_or_else(|| BrowserError::Protocol("screenshot is not a string".to_string()))?;
        Ok(base64::engine::general_purpose::STANDARD.decode(encoded)?)
    }

    async fn close(&self) -> BrowserResult<()> {
        send(&self.client, Method::DELETE, &self.base, None).await?;
        info!("Closed WebDriver session {}", self.base);
        Ok(())
    }

    async fn count(&self, locator: &Locator) -> BrowserResult<usize> {
        let _entered = match self.enter(&locator.frame).await {
            Ok(guard) => guard,
            Err(BrowserError::NoSuchElement(_)) => return Ok(0),
            Err(e) => return Err(e),
        };
        Ok(self.find(&locator.selector).await?.len())
    }

    async fn describe(&self, locator: &Locator) -> BrowserResult<ElementInfo> {
        let _entered = self.enter(&locator.frame).await?;
        let element = self.first(locator).await?;
        let value = self.execute(DESCRIBE_JS, vec![element_ref(&element)]).await?;
        let raw: RawElementInfo = serde_json::from_value(value)?;
        Ok(raw.into())
    }

    async fn perform(&self, locator: &Locator, action: &ElementAction) -> BrowserResult<()> {
        let _entered = self.enter(&locator.frame).await?;
        let element = self.first(locator).await?;
        let path = format!("/element/{}", element);

        match action {
            ElementAction::Click => {
                self.post(&format!("{}/click", path), json!({})).await?;
            }
            ElementAction::DoubleClick => {
                let press = |button: u8| {
                    vec![
                        json!({ "type": "pointerDown", "button": button }),
                        json!({ "type": "pointerUp", "button": button }),
                    ]
                };
                let mut actions = vec![move_to(&element)];
                actions.extend(press(0));
                actions.extend(press(0));
                self.perform_actions(pointer_actions(actions)).await?;
            }
            ElementAction::RightClick => {
                self.perform_actions(pointer_actions(vec![
                    move_to(&element),
                    json!({ "type": "pointerDown", "button": 2 }),
                    json!({ "type": "pointerUp", "button": 2 }),
                ]))
                .await?;
            }
            ElementAction::Hover => {
                self.perform_actions(pointer_actions(vec![move_to(&element)]))
                    .await?;
            }
            ElementAction::Fill(value) => {
                self.post(&format!("{}/clear", path), json!({})).await?;
                self.post(&format!("{}/value", path), json!({ "text": value }))
                    .await?;
            }
            ElementAction::Type(text) => {
                self.post(&format!("{}/value", path), json!({ "text": text }))
                    .await?;
            }
            ElementAction::SelectOption(wanted) => {
                let selected = self
                    .execute(SELECT_OPTION_JS, vec![element_ref(&element), json!(wanted)])
                    .await?;
                if selected.as_bool() != Some(true) {
                    return Err(BrowserError::NoSuchElement(format!(
                        "option \"{}\" in {}",
                        wanted, locator
                    )));
                }
            }
            ElementAction::Check | ElementAction::Uncheck => {
                let selected = self.get(&format!("{}/selected", path)).await?;
                let want = matches!(action, ElementAction::Check);
                if selected.as_bool() != Some(want) {
                    self.post(&format!("{}/click", path), json!({})).await?;
                }
            }
            ElementAction::ScrollIntoView => {
                self.execute(
                    "arguments[0].scrollIntoView({ block: 'center', inline: 'center' });",
                    vec![element_ref(&element)],
                )
                .await?;
            }
            ElementAction::DragTo(target) => {
                if target.frame != locator.frame {
                    return Err(BrowserError::Protocol(
                        "drag and drop across frames is not supported".to_string(),
                    ));
                }
                let target = self.first(target).await?;
                self.perform_actions(pointer_actions(vec![
                    move_to(&element),
                    json!({ "type": "pointerDown", "button": 0 }),
                    json!({ "type": "pause", "duration": 100 }),
                    move_to(&target),
                    json!({ "type": "pointerUp", "button": 0 }),
                ]))
                .await?;
            }
        }
        Ok(())
    }

    async fn frame_by_selector(
        &self,
        parent: &FrameContext,
        selector: &str,
    ) -> BrowserResult<Option<FrameContext>> {
        let _entered = self.enter(parent).await?;
        let Some(element) = self.find_css(selector).await?.into_iter().next() else {
            return Ok(None);
        };
        let tag = self.get(&format!("/element/{}/name", element)).await?;
        match tag.as_str().map(str::to_ascii_lowercase).as_deref() {
            Some("iframe") | Some("frame") => Ok(Some(
                parent.child(FrameHop::Selector(selector.to_string())),
            )),
            _ => Ok(None),
        }
    }

    async fn frame_by_name(&self, name: &str) -> BrowserResult<Option<FrameContext>> {
        self.search_frames(&|entry| entry.name == name).await
    }

    async fn frame_by_url(&self, pattern: &str) -> BrowserResult<Option<FrameContext>> {
        self.search_frames(&|entry| entry.src.contains(pattern)).await
    }
}
