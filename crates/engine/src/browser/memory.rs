//! In-memory DOM backend
//!
//! Pages are static trees of [`Node`]s registered by URL. A session keeps a
//! live copy of the current page, applies actions to it (fill, check, select
//! mutate state) and records every interaction in a journal shared with the
//! [`MemoryBrowser`] that launched it.
//!
//! Supported CSS: type, `#id`, `.class`, `*`, attribute selectors
//! (`[a]`, `[a=v]`, `[a*=v]`, `[a^=v]`, `[a$=v]`, `[a~=v]`), descendant and
//! child combinators, and selector lists.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

use super::locator::{
    implicit_role, normalize_text, ElementAction, ElementInfo, FrameContext, FrameHop, Locator,
    Selector,
};
use super::{BrowserLauncher, BrowserSession};
use crate::error::{BrowserError, BrowserResult};

// ============================================================================
// Document model
// ============================================================================

/// Element of an in-memory document
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    tag: String,
    attrs: Vec<(String, String)>,
    text: String,
    children: Vec<Node>,
    hidden: bool,
    value: Option<String>,
    checked: bool,
    frame: Option<Box<Node>>,
}

impl Node {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into().to_ascii_lowercase(),
            attrs: Vec::new(),
            text: String::new(),
            children: Vec::new(),
            hidden: false,
            value: None,
            checked: false,
            frame: None,
        }
    }

    pub fn with_attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let name = name.into();
        let value = value.into();
        match self.attrs.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = value,
            None => self.attrs.push((name, value)),
        }
        self
    }

    pub fn with_id(self, id: impl Into<String>) -> Self {
        self.with_attr("id", id)
    }

    pub fn with_test_id(self, id: impl Into<String>) -> Self {
        self.with_attr("data-testid", id)
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }

    pub fn with_child(mut self, child: Node) -> Self {
        self.children.push(child);
        self
    }

    pub fn with_children(mut self, children: impl IntoIterator<Item = Node>) -> Self {
        self.children.extend(children);
        self
    }

    /// Make this element a frame hosting `document`
    pub fn with_frame(mut self, document: Node) -> Self {
        self.frame = Some(Box::new(document));
        self
    }

    pub fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }

    pub fn checked(mut self) -> Self {
        self.checked = true;
        self
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn current_value(&self) -> Option<&str> {
        self.value.as_deref().or_else(|| self.attribute("value"))
    }

    pub fn is_checked(&self) -> bool {
        self.checked
    }

    fn input_type(&self) -> Option<String> {
        self.attribute("type").map(|t| t.to_ascii_lowercase())
    }

    fn role(&self) -> Option<String> {
        self.attribute("role").map(str::to_string).or_else(|| {
            implicit_role(
                &self.tag,
                self.input_type().as_deref(),
                self.attribute("href").is_some(),
            )
            .map(str::to_string)
        })
    }

    /// Own text plus descendant text, whitespace collapsed
    fn text_content(&self) -> String {
        let mut parts = vec![self.text.clone()];
        for child in &self.children {
            parts.push(child.text_content());
        }
        normalize_text(&parts.join(" "))
    }

    fn accessible_name(&self) -> String {
        if let Some(label) = self.attribute("aria-label") {
            return normalize_text(label);
        }
        let text = self.text_content();
        if !text.is_empty() {
            return text;
        }
        let fallback = if self.tag == "input" {
            self.current_value()
        } else {
            None
        };
        fallback
            .or_else(|| self.attribute("title"))
            .or_else(|| self.attribute("alt"))
            .or_else(|| self.attribute("placeholder"))
            .map(normalize_text)
            .unwrap_or_default()
    }

    fn is_fillable(&self) -> bool {
        match self.tag.as_str() {
            "textarea" => true,
            "input" => !matches!(
                self.input_type().as_deref(),
                Some(
                    "checkbox" | "radio" | "button" | "submit" | "reset" | "image" | "file"
                        | "hidden"
                )
            ),
            _ => self.attribute("contenteditable").is_some(),
        }
    }

    fn is_checkable(&self) -> bool {
        self.tag == "input" && matches!(self.input_type().as_deref(), Some("checkbox" | "radio"))
    }

    /// Short description used in the journal, e.g. `button#submit`
    fn describe(&self) -> String {
        if let Some(id) = self.attribute("id") {
            format!("{}#{}", self.tag, id)
        } else if let Some(test_id) = self.attribute("data-testid") {
            format!("{}[data-testid=\"{}\"]", self.tag, test_id)
        } else if let Some(name) = self.attribute("name") {
            format!("{}[name=\"{}\"]", self.tag, name)
        } else {
            self.tag.clone()
        }
    }
}

/// A page served by the in-memory browser
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryPage {
    pub title: String,
    pub body: Node,
}

impl MemoryPage {
    pub fn new(title: impl Into<String>, body: Node) -> Self {
        Self {
            title: title.into(),
            body,
        }
    }
}

/// One recorded browser interaction
#[derive(Debug, Clone, PartialEq)]
pub enum Interaction {
    Navigate(String),
    Reload,
    KeyPress(String),
    Scroll { dx: i64, dy: i64 },
    Element { target: String, action: ElementAction },
}

// ============================================================================
// Launcher
// ============================================================================

#[derive(Default)]
struct Shared {
    pages: HashMap<String, MemoryPage>,
    journal: Vec<Interaction>,
    launched: usize,
    closed: usize,
    fail_launch: bool,
    fail_screenshots: bool,
}

/// Launcher for in-memory sessions; clones share pages and journal
#[derive(Clone, Default)]
pub struct MemoryBrowser {
    shared: Arc<Mutex<Shared>>,
}

impl MemoryBrowser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(self, url: impl Into<String>, page: MemoryPage) -> Self {
        self.set_page(url, page);
        self
    }

    /// Register or replace a page. Sessions see it on their next navigation.
    pub fn set_page(&self, url: impl Into<String>, page: MemoryPage) {
        self.shared.lock().pages.insert(url.into(), page);
    }

    /// Make every `launch` fail
    pub fn failing_launch(self) -> Self {
        self.shared.lock().fail_launch = true;
        self
    }

    /// Make every screenshot capture fail
    pub fn failing_screenshots(self) -> Self {
        self.shared.lock().fail_screenshots = true;
        self
    }

    pub fn journal(&self) -> Vec<Interaction> {
        self.shared.lock().journal.clone()
    }

    /// Element interactions only, as `(target, action)` pairs
    pub fn element_actions(&self) -> Vec<(String, ElementAction)> {
        self.shared
            .lock()
            .journal
            .iter()
            .filter_map(|i| match i {
                Interaction::Element { target, action } => Some((target.clone(), action.clone())),
                _ => None,
            })
            .collect()
    }

    pub fn sessions_launched(&self) -> usize {
        self.shared.lock().launched
    }

    pub fn sessions_closed(&self) -> usize {
        self.shared.lock().closed
    }
}

#[async_trait]
impl BrowserLauncher for MemoryBrowser {
    async fn launch(&self) -> BrowserResult<Box<dyn BrowserSession>> {
        let mut shared = self.shared.lock();
        if shared.fail_launch {
            return Err(BrowserError::Protocol(
                "in-memory browser configured to refuse sessions".to_string(),
            ));
        }
        shared.launched += 1;
        debug!("Launched in-memory browser session #{}", shared.launched);
        Ok(Box::new(MemorySession {
            shared: self.shared.clone(),
            state: Mutex::new(SessionState::default()),
        }))
    }
}

// ============================================================================
// Session
// ============================================================================

#[derive(Default)]
struct SessionState {
    url: Option<String>,
    page: Option<MemoryPage>,
    closed: bool,
}

impl SessionState {
    fn ensure_open(&self) -> BrowserResult<()> {
        if self.closed {
            Err(BrowserError::SessionClosed)
        } else {
            Ok(())
        }
    }

    fn body(&self) -> BrowserResult<&Node> {
        self.ensure_open()?;
        self.page
            .as_ref()
            .map(|p| &p.body)
            .ok_or_else(|| BrowserError::Navigation("no page loaded".to_string()))
    }

    fn body_mut(&mut self) -> BrowserResult<&mut Node> {
        self.ensure_open()?;
        self.page
            .as_mut()
            .map(|p| &mut p.body)
            .ok_or_else(|| BrowserError::Navigation("no page loaded".to_string()))
    }
}

/// Session over an in-memory page
pub struct MemorySession {
    shared: Arc<Mutex<Shared>>,
    state: Mutex<SessionState>,
}

impl MemorySession {
    fn record(&self, interaction: Interaction) {
        trace!("memory browser: {:?}", interaction);
        self.shared.lock().journal.push(interaction);
    }

    fn load(&self, url: &str) -> BrowserResult<()> {
        let page = {
            let shared = self.shared.lock();
            shared
                .pages
                .get(url)
                .or_else(|| shared.pages.get(url.trim_end_matches('/')))
                .cloned()
        };
        let page = page.ok_or_else(|| {
            BrowserError::Navigation(format!("net::ERR_NAME_NOT_RESOLVED at {}", url))
        })?;

        let mut state = self.state.lock();
        state.ensure_open()?;
        state.url = Some(url.to_string());
        state.page = Some(page);
        Ok(())
    }
}

#[async_trait]
impl BrowserSession for MemorySession {
    async fn goto(&self, url: &str, _timeout: Duration) -> BrowserResult<()> {
        self.load(url)?;
        self.record(Interaction::Navigate(url.to_string()));
        Ok(())
    }

    async fn reload(&self, _timeout: Duration) -> BrowserResult<()> {
        let url = {
            let state = self.state.lock();
            state.ensure_open()?;
            state.url.clone()
        };
        let url = url.ok_or_else(|| BrowserError::Navigation("no page loaded".to_string()))?;
        self.load(&url)?;
        self.record(Interaction::Reload);
        Ok(())
    }

    async fn current_url(&self) -> BrowserResult<String> {
        let state = self.state.lock();
        state.ensure_open()?;
        Ok(state.url.clone().unwrap_or_else(|| "about:blank".to_string()))
    }

    async fn title(&self) -> BrowserResult<String> {
        let state = self.state.lock();
        state.ensure_open()?;
        Ok(state.page.as_ref().map(|p| p.title.clone()).unwrap_or_default())
    }

    async fn wait_for_load(&self, _timeout: Duration) -> BrowserResult<bool> {
        let state = self.state.lock();
        state.ensure_open()?;
        Ok(state.page.is_some())
    }

    async fn press_key(&self, key: &str) -> BrowserResult<()> {
        self.state.lock().ensure_open()?;
        self.record(Interaction::KeyPress(key.to_string()));
        Ok(())
    }

    async fn scroll_by(&self, dx: i64, dy: i64) -> BrowserResult<()> {
        self.state.lock().body()?;
        self.record(Interaction::Scroll { dx, dy });
        Ok(())
    }

    async fn screenshot(&self) -> BrowserResult<Vec<u8>> {
        self.state.lock().ensure_open()?;
        if self.shared.lock().fail_screenshots {
            return Err(BrowserError::Protocol("screenshot capture failed".to_string()));
        }
        let canvas = image::RgbaImage::from_pixel(320, 200, image::Rgba([255, 255, 255, 255]));
        let mut bytes = Vec::new();
        image::DynamicImage::ImageRgba8(canvas).write_to(
            &mut std::io::Cursor::new(&mut bytes),
            image::ImageOutputFormat::Png,
        )?;
        Ok(bytes)
    }

    async fn close(&self) -> BrowserResult<()> {
        let mut state = self.state.lock();
        state.ensure_open()?;
        state.closed = true;
        state.page = None;
        self.shared.lock().closed += 1;
        Ok(())
    }

    async fn count(&self, locator: &Locator) -> BrowserResult<usize> {
        let state = self.state.lock();
        let doc = frame_document(state.body()?, locator.frame.hops())?;
        Ok(find_paths(doc, &locator.selector)?.len())
    }

    async fn describe(&self, locator: &Locator) -> BrowserResult<ElementInfo> {
        let state = self.state.lock();
        let doc = frame_document(state.body()?, locator.frame.hops())?;
        let path = first_path(doc, locator)?;
        let node = node_at(doc, &path);
        let text = node.text_content();

        Ok(ElementInfo {
            tag: node.tag.clone(),
            input_type: node.input_type(),
            text: non_empty(text),
            placeholder: node.attribute("placeholder").map(str::to_string),
            role: node.role(),
            name: node
                .attribute("name")
                .or_else(|| node.attribute("aria-label"))
                .map(str::to_string),
            value: node.current_value().map(str::to_string),
            visible: is_visible(doc, &path),
            checked: node.checked,
        })
    }

    async fn perform(&self, locator: &Locator, action: &ElementAction) -> BrowserResult<()> {
        let target = {
            let mut state = self.state.lock();
            let root = state.body_mut()?;

            if let ElementAction::DragTo(drop_target) = action {
                let doc = frame_document(root, drop_target.frame.hops())?;
                first_path(doc, drop_target)?;
            }

            let doc = frame_document_mut(root, locator.frame.hops())?;
            let path = first_path(doc, locator)?;
            let node = node_at_mut(doc, &path);
            apply_action(node, action)?;
            node.describe()
        };

        self.record(Interaction::Element {
            target,
            action: action.clone(),
        });
        Ok(())
    }

    async fn frame_by_selector(
        &self,
        parent: &FrameContext,
        selector: &str,
    ) -> BrowserResult<Option<FrameContext>> {
        let state = self.state.lock();
        let doc = frame_document(state.body()?, parent.hops())?;
        let hop = FrameHop::Selector(selector.to_string());
        match hop_path(doc, &hop) {
            Ok(_) => Ok(Some(parent.child(hop))),
            Err(BrowserError::NoSuchElement(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn frame_by_name(&self, name: &str) -> BrowserResult<Option<FrameContext>> {
        let state = self.state.lock();
        let body = state.body()?;
        Ok(search_frames(body, &FrameContext::Main, &|node| {
            node.attribute("name") == Some(name)
        }))
    }

    async fn frame_by_url(&self, pattern: &str) -> BrowserResult<Option<FrameContext>> {
        let state = self.state.lock();
        let body = state.body()?;
        Ok(search_frames(body, &FrameContext::Main, &|node| {
            node.attribute("src").map_or(false, |src| src.contains(pattern))
        }))
    }
}

fn non_empty(text: String) -> Option<String> {
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

fn apply_action(node: &mut Node, action: &ElementAction) -> BrowserResult<()> {
    match action {
        ElementAction::Click => {
            if node.is_checkable() {
                let is_radio = node.input_type().as_deref() == Some("radio");
                node.checked = is_radio || !node.checked;
            }
        }
        ElementAction::Fill(value) => {
            if !node.is_fillable() {
                return Err(BrowserError::Protocol(format!(
                    "Element {} is not an <input>, <textarea> or [contenteditable] element",
                    node.describe()
                )));
            }
            node.value = Some(value.clone());
        }
        ElementAction::Type(text) => {
            let mut current = node.current_value().unwrap_or_default().to_string();
            current.push_str(text);
            node.value = Some(current);
        }
        ElementAction::SelectOption(wanted) => {
            if node.tag != "select" {
                return Err(BrowserError::Protocol(format!(
                    "Element {} is not a <select> element",
                    node.describe()
                )));
            }
            let option = node
                .children
                .iter()
                .filter(|c| c.tag == "option")
                .find(|o| {
                    o.attribute("value") == Some(wanted.as_str())
                        || o.text_content() == normalize_text(wanted)
                })
                .map(|o| {
                    o.attribute("value")
                        .map(str::to_string)
                        .unwrap_or_else(|| o.text_content())
                })
                .ok_or_else(|| {
                    BrowserError::NoSuchElement(format!("option \"{}\" in {}", wanted, node.describe()))
                })?;
            node.value = Some(option);
        }
        ElementAction::Check | ElementAction::Uncheck => {
            if !node.is_checkable() {
                return Err(BrowserError::Protocol(format!(
                    "Element {} is not a checkbox or radio input",
                    node.describe()
                )));
            }
            node.checked = matches!(action, ElementAction::Check);
        }
        ElementAction::DoubleClick
        | ElementAction::RightClick
        | ElementAction::Hover
        | ElementAction::ScrollIntoView
        | ElementAction::DragTo(_) => {}
    }
    Ok(())
}

// ============================================================================
// Tree navigation
// ============================================================================

fn node_at<'a>(mut node: &'a Node, path: &[usize]) -> &'a Node {
    for &i in path {
        node = &node.children[i];
    }
    node
}

fn node_at_mut<'a>(mut node: &'a mut Node, path: &[usize]) -> &'a mut Node {
    for &i in path {
        node = &mut node.children[i];
    }
    node
}

fn is_visible(doc: &Node, path: &[usize]) -> bool {
    let mut node = doc;
    if node.hidden {
        return false;
    }
    for &i in path {
        node = &node.children[i];
        if node.hidden {
            return false;
        }
    }
    true
}

/// Depth-first, document-order walk that does not enter frame documents
fn walk<'a>(
    node: &'a Node,
    path: &mut Vec<usize>,
    ancestors: &mut Vec<&'a Node>,
    visit: &mut dyn FnMut(&'a Node, &[&'a Node], &[usize]),
) {
    visit(node, ancestors, path);
    ancestors.push(node);
    for (i, child) in node.children.iter().enumerate() {
        path.push(i);
        walk(child, path, ancestors, visit);
        path.pop();
    }
    ancestors.pop();
}

fn paths_where(doc: &Node, pred: &dyn Fn(&Node, &[&Node]) -> bool) -> Vec<Vec<usize>> {
    let mut found = Vec::new();
    walk(doc, &mut Vec::new(), &mut Vec::new(), &mut |node, ancestors, path| {
        if pred(node, ancestors) {
            found.push(path.to_vec());
        }
    });
    found
}

fn find_paths(doc: &Node, selector: &Selector) -> BrowserResult<Vec<Vec<usize>>> {
    let matcher = Matcher::new(selector)?;
    Ok(paths_where(doc, &|node, ancestors| matcher.matches(node, ancestors)))
}

fn first_path(doc: &Node, locator: &Locator) -> BrowserResult<Vec<usize>> {
    find_paths(doc, &locator.selector)?
        .into_iter()
        .next()
        .ok_or_else(|| BrowserError::NoSuchElement(locator.to_string()))
}

fn frame_paths(doc: &Node) -> Vec<Vec<usize>> {
    paths_where(doc, &|node, _| node.frame.is_some())
}

fn hop_path(doc: &Node, hop: &FrameHop) -> BrowserResult<Vec<usize>> {
    let found = match hop {
        FrameHop::Selector(css) => {
            let matcher = Matcher::new(&Selector::css(css.as_str()))?;
            paths_where(doc, &|node, ancestors| {
                node.frame.is_some() && matcher.matches(node, ancestors)
            })
            .into_iter()
            .next()
        }
        FrameHop::Index(i) => frame_paths(doc).into_iter().nth(*i),
    };
    found.ok_or_else(|| BrowserError::NoSuchElement(format!("frame {:?}", hop)))
}

fn frame_document<'a>(mut doc: &'a Node, hops: &[FrameHop]) -> BrowserResult<&'a Node> {
    for hop in hops {
        let path = hop_path(doc, hop)?;
        doc = node_at(doc, &path)
            .frame
            .as_deref()
            .ok_or_else(|| BrowserError::NoSuchElement(format!("frame {:?}", hop)))?;
    }
    Ok(doc)
}

fn frame_document_mut<'a>(mut doc: &'a mut Node, hops: &[FrameHop]) -> BrowserResult<&'a mut Node> {
    for hop in hops {
        let path = hop_path(doc, hop)?;
        doc = node_at_mut(doc, &path)
            .frame
            .as_deref_mut()
            .ok_or_else(|| BrowserError::NoSuchElement(format!("frame {:?}", hop)))?;
    }
    Ok(doc)
}

fn search_frames(
    doc: &Node,
    context: &FrameContext,
    pred: &dyn Fn(&Node) -> bool,
) -> Option<FrameContext> {
    let frames = frame_paths(doc);
    for (index, path) in frames.iter().enumerate() {
        if pred(node_at(doc, path)) {
            return Some(context.child(FrameHop::Index(index)));
        }
    }
    for (index, path) in frames.iter().enumerate() {
        if let Some(inner) = node_at(doc, path).frame.as_deref() {
            let child = context.child(FrameHop::Index(index));
            if let Some(found) = search_frames(inner, &child, pred) {
                return Some(found);
            }
        }
    }
    None
}

// ============================================================================
// Selector matching
// ============================================================================

enum Matcher {
    Css(Vec<Complex>),
    Text(String),
    Role { role: String, name: String },
}

impl Matcher {
    fn new(selector: &Selector) -> BrowserResult<Self> {
        match selector {
            Selector::Text(text) => Ok(Matcher::Text(normalize_text(text))),
            Selector::Role { role, name } => Ok(Matcher::Role {
                role: role.clone(),
                name: normalize_text(name),
            }),
            other => {
                let css = other
                    .as_css()
                    .ok_or_else(|| BrowserError::InvalidSelector(other.to_string()))?;
                Ok(Matcher::Css(parse_selector_list(&css)?))
            }
        }
    }

    fn matches(&self, node: &Node, ancestors: &[&Node]) -> bool {
        match self {
            Matcher::Css(list) => list.iter().any(|c| c.matches(node, ancestors)),
            Matcher::Text(text) => !text.is_empty() && normalize_text(&node.text) == *text,
            Matcher::Role { role, name } => {
                node.role().as_deref() == Some(role.as_str()) && node.accessible_name() == *name
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Combinator {
    Descendant,
    Child,
}

#[derive(Debug, Clone, PartialEq)]
enum AttrOp {
    Exists,
    Equals(String),
    Contains(String),
    Prefix(String),
    Suffix(String),
    Word(String),
}

#[derive(Debug, Clone, Default, PartialEq)]
struct Compound {
    tag: Option<String>,
    id: Option<String>,
    classes: Vec<String>,
    attrs: Vec<(String, AttrOp)>,
}

impl Compound {
    fn matches(&self, node: &Node) -> bool {
        if let Some(tag) = &self.tag {
            if *tag != node.tag {
                return false;
            }
        }
        if let Some(id) = &self.id {
            if node.attribute("id") != Some(id.as_str()) {
                return false;
            }
        }
        let classes: Vec<&str> = node
            .attribute("class")
            .map(|c| c.split_whitespace().collect())
            .unwrap_or_default();
        if !self.classes.iter().all(|c| classes.contains(&c.as_str())) {
            return false;
        }
        self.attrs.iter().all(|(name, op)| {
            let actual = match name.as_str() {
                "value" => node.current_value(),
                _ => node.attribute(name),
            };
            match (op, actual) {
                (_, None) => false,
                (AttrOp::Exists, Some(_)) => true,
                (AttrOp::Equals(v), Some(a)) => a == v,
                (AttrOp::Contains(v), Some(a)) => !v.is_empty() && a.contains(v.as_str()),
                (AttrOp::Prefix(v), Some(a)) => !v.is_empty() && a.starts_with(v.as_str()),
                (AttrOp::Suffix(v), Some(a)) => !v.is_empty() && a.ends_with(v.as_str()),
                (AttrOp::Word(v), Some(a)) => a.split_whitespace().any(|w| w == v),
            }
        })
    }
}

/// Compound selectors joined by combinators, left to right
#[derive(Debug, Clone, PartialEq)]
struct Complex {
    parts: Vec<(Combinator, Compound)>,
}

impl Complex {
    fn matches(&self, node: &Node, ancestors: &[&Node]) -> bool {
        match_parts(&self.parts, node, ancestors)
    }
}

fn match_parts(parts: &[(Combinator, Compound)], node: &Node, ancestors: &[&Node]) -> bool {
    let Some(((combinator, last), rest)) = parts.split_last() else {
        return false;
    };
    if !last.matches(node) {
        return false;
    }
    if rest.is_empty() {
        return true;
    }
    match combinator {
        Combinator::Child => match ancestors.split_last() {
            Some((parent, above)) => match_parts(rest, parent, above),
            None => false,
        },
        Combinator::Descendant => (0..ancestors.len())
            .rev()
            .any(|i| match_parts(rest, ancestors[i], &ancestors[..i])),
    }
}

fn parse_selector_list(input: &str) -> BrowserResult<Vec<Complex>> {
    split_top_level(input)
        .into_iter()
        .map(|part| parse_complex(part, input))
        .collect()
}

/// Split on commas that are not inside brackets or quotes
fn split_top_level(input: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut start = 0;
    for (i, c) in input.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"') | (None, '\'') => quote = Some(c),
            (None, '[') => depth += 1,
            (None, ']') => depth = depth.saturating_sub(1),
            (None, ',') if depth == 0 => {
                parts.push(&input[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&input[start..]);
    parts
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '-' || c == '_'
}

fn parse_complex(part: &str, full: &str) -> BrowserResult<Complex> {
    let invalid = || BrowserError::InvalidSelector(full.to_string());
    let chars: Vec<char> = part.chars().collect();
    let mut parts = Vec::new();
    let mut combinator = Combinator::Descendant;
    let mut current = Compound::default();
    let mut has_current = false;
    let mut i = 0;

    let read_ident = |start: usize| -> (String, usize) {
        let mut end = start;
        while end < chars.len() && (is_ident_char(chars[end]) || chars[end] == '\\') {
            end += 1;
        }
        (chars[start..end].iter().filter(|c| **c != '\\').collect(), end)
    };

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => {
                if has_current {
                    parts.push((combinator, std::mem::take(&mut current)));
                    has_current = false;
                    combinator = Combinator::Descendant;
                }
                i += 1;
            }
            '>' => {
                if has_current {
                    parts.push((combinator, std::mem::take(&mut current)));
                    has_current = false;
                } else if parts.is_empty() {
                    return Err(invalid());
                }
                combinator = Combinator::Child;
                i += 1;
            }
            '*' => {
                has_current = true;
                i += 1;
            }
            '#' | '.' => {
                let (ident, end) = read_ident(i + 1);
                if ident.is_empty() {
                    return Err(invalid());
                }
                if c == '#' {
                    current.id = Some(ident);
                } else {
                    current.classes.push(ident);
                }
                has_current = true;
                i = end;
            }
            '[' => {
                let (attr, end) = parse_attribute(&chars, i + 1).ok_or_else(invalid)?;
                current.attrs.push(attr);
                has_current = true;
                i = end;
            }
            c if is_ident_char(c) => {
                let (ident, end) = read_ident(i);
                current.tag = Some(ident.to_ascii_lowercase());
                has_current = true;
                i = end;
            }
            _ => return Err(invalid()),
        }
    }

    if has_current {
        parts.push((combinator, current));
    } else if combinator == Combinator::Child || parts.is_empty() {
        return Err(invalid());
    }

    Ok(Complex { parts })
}

/// Parse `name op value]` starting right after `[`; returns the index after `]`
fn parse_attribute(chars: &[char], mut i: usize) -> Option<((String, AttrOp), usize)> {
    let skip_ws = |i: &mut usize| {
        while *i < chars.len() && chars[*i].is_whitespace() {
            *i += 1;
        }
    };

    skip_ws(&mut i);
    let start = i;
    while i < chars.len() && is_ident_char(chars[i]) {
        i += 1;
    }
    let name: String = chars[start..i].iter().collect();
    if name.is_empty() {
        return None;
    }
    skip_ws(&mut i);

    if chars.get(i) == Some(&']') {
        return Some(((name, AttrOp::Exists), i + 1));
    }

    let op = match (chars.get(i)?, chars.get(i + 1)) {
        ('=', _) => {
            i += 1;
            '='
        }
        (c @ ('*' | '^' | '$' | '~'), Some('=')) => {
            i += 2;
            *c
        }
        _ => return None,
    };
    skip_ws(&mut i);

    let mut value = String::new();
    match chars.get(i)? {
        q @ ('"' | '\'') => {
            let quote = *q;
            i += 1;
            loop {
                match chars.get(i)? {
                    '\\' => {
                        value.push(*chars.get(i + 1)?);
                        i += 2;
                    }
                    c if *c == quote => {
                        i += 1;
                        break;
                    }
                    c => {
                        value.push(*c);
                        i += 1;
                    }
                }
            }
        }
        _ => {
            while i < chars.len() && is_ident_char(chars[i]) {
                value.push(chars[i]);
                i += 1;
            }
        }
    }
    skip_ws(&mut i);
    if chars.get(i) != Some(&']') {
        return None;
    }

    let op = match op {
        '=' => AttrOp::Equals(value),
        '*' => AttrOp::Contains(value),
        '^' => AttrOp::Prefix(value),
        '$' => AttrOp::Suffix(value),
        _ => AttrOp::Word(value),
    };
    Some(((name, op), i + 1))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn form_page() -> MemoryPage {
        MemoryPage::new(
            "Sign in",
            Node::new("body").with_children([
                Node::new("form").with_id("login").with_children([
                    Node::new("input")
                        .with_id("email")
                        .with_attr("type", "email")
                        .with_attr("name", "email")
                        .with_attr("placeholder", "Email"),
                    Node::new("select").with_id("country").with_children([
                        Node::new("option").with_attr("value", "fr").with_text("France"),
                        Node::new("option").with_attr("value", "de").with_text("Germany"),
                    ]),
                    Node::new("input").with_id("terms").with_attr("type", "checkbox"),
                    Node::new("button")
                        .with_attr("class", "btn primary")
                        .with_test_id("submit-btn")
                        .with_text("Sign in"),
                ]),
                Node::new("div").with_id("banner").with_text("Welcome").hidden(),
                Node::new("iframe")
                    .with_id("pay")
                    .with_attr("name", "payment")
                    .with_attr("src", "https://pay.test/widget")
                    .with_frame(Node::new("body").with_child(
                        Node::new("iframe")
                            .with_attr("name", "card")
                            .with_frame(Node::new("body").with_child(
                                Node::new("input").with_id("card-number"),
                            )),
                    )),
            ]),
        )
    }

    async fn session() -> (MemoryBrowser, Box<dyn BrowserSession>) {
        let browser = MemoryBrowser::new().with_page("https://app.test/login", form_page());
        let session = browser.launch().await.unwrap();
        session
            .goto("https://app.test/login", Duration::from_secs(1))
            .await
            .unwrap();
        (browser, session)
    }

    fn main_css(css: &str) -> Locator {
        Locator::css(&FrameContext::Main, css)
    }

    #[tokio::test]
    async fn test_css_matching() {
        let (_browser, session) = session().await;
        for (css, expected) in [
            ("#email", 1),
            ("form > input", 2),
            ("body input", 2),
            ("body > input", 0),
            ("button.btn.primary", 1),
            ("[data-testid=\"submit-btn\"]", 1),
            ("[placeholder^=Em]", 1),
            ("input[type='checkbox'], #country", 2),
            ("*", 10),
            ("#missing", 0),
        ] {
            assert_eq!(session.count(&main_css(css)).await.unwrap(), expected, "{}", css);
        }
    }

    #[tokio::test]
    async fn test_invalid_selector() {
        let (_browser, session) = session().await;
        let err = session.count(&main_css("input[type=")).await.unwrap_err();
        assert!(matches!(err, BrowserError::InvalidSelector(_)));
    }

    #[tokio::test]
    async fn test_semantic_selectors() {
        let (_browser, session) = session().await;
        let role = Locator::new(
            FrameContext::Main,
            Selector::Role {
                role: "button".into(),
                name: "Sign in".into(),
            },
        );
        assert_eq!(session.count(&role).await.unwrap(), 1);

        let text = Locator::new(FrameContext::Main, Selector::Text("  Sign   in ".into()));
        assert_eq!(session.count(&text).await.unwrap(), 1);

        let combobox = Locator::new(
            FrameContext::Main,
            Selector::Role {
                role: "combobox".into(),
                name: "France Germany".into(),
            },
        );
        assert_eq!(session.count(&combobox).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_describe_reports_state() {
        let (_browser, session) = session().await;
        let email = session.describe(&main_css("#email")).await.unwrap();
        assert_eq!(email.tag, "input");
        assert_eq!(email.input_type.as_deref(), Some("email"));
        assert_eq!(email.role.as_deref(), Some("textbox"));
        assert_eq!(email.name.as_deref(), Some("email"));
        assert!(email.visible);

        let banner = session.describe(&main_css("#banner")).await.unwrap();
        assert!(!banner.visible);
        assert_eq!(banner.text.as_deref(), Some("Welcome"));
    }

    #[tokio::test]
    async fn test_actions_mutate_and_journal() {
        let (browser, session) = session().await;

        session
            .perform(&main_css("#country"), &ElementAction::SelectOption("Germany".into()))
            .await
            .unwrap();
        session
            .perform(&main_css("#terms"), &ElementAction::Check)
            .await
            .unwrap();
        session
            .perform(&main_css("#email"), &ElementAction::Fill("a@b.test".into()))
            .await
            .unwrap();

        assert_eq!(
            session.describe(&main_css("#country")).await.unwrap().value.as_deref(),
            Some("de")
        );
        assert!(session.describe(&main_css("#terms")).await.unwrap().checked);

        let err = session
            .perform(&main_css("#country"), &ElementAction::Fill("x".into()))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not an <input>"));

        let actions = browser.element_actions();
        assert_eq!(actions.len(), 3);
        assert_eq!(actions[0].0, "select#country");
    }

    #[tokio::test]
    async fn test_frame_lookup() {
        let (_browser, session) = session().await;

        let by_selector = session
            .frame_by_selector(&FrameContext::Main, "#pay")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_selector.hops(), &[FrameHop::Selector("#pay".into())]);
        assert!(session
            .frame_by_selector(&FrameContext::Main, "#email")
            .await
            .unwrap()
            .is_none());

        let card = session.frame_by_name("card").await.unwrap().unwrap();
        assert_eq!(card.hops(), &[FrameHop::Index(0), FrameHop::Index(0)]);
        assert_eq!(
            session
                .count(&Locator::css(&card, "#card-number"))
                .await
                .unwrap(),
            1
        );

        let by_url = session.frame_by_url("pay.test").await.unwrap().unwrap();
        assert_eq!(by_url.hops(), &[FrameHop::Index(0)]);
        assert!(session.frame_by_url("nowhere").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_closed_session_rejects_calls() {
        let (browser, session) = session().await;
        session.close().await.unwrap();
        assert!(matches!(
            session.title().await,
            Err(BrowserError::SessionClosed)
        ));
        assert_eq!(browser.sessions_closed(), 1);
    }
}
