//! Selectors, frame paths and locators shared by every browser backend

use serde::{Deserialize, Serialize};
use std::fmt;

/// How an element is looked up within one document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "strategy", content = "value", rename_all = "snake_case")]
pub enum Selector {
    /// CSS selector as recorded in a step
    Css(String),
    /// `data-testid` attribute
    TestId(String),
    /// ARIA role (explicit or implicit) plus accessible name
    Role { role: String, name: String },
    /// Element whose own text equals the given text (whitespace collapsed)
    Text(String),
    /// `placeholder` attribute
    Placeholder(String),
    /// `name` attribute
    Name(String),
}

impl Selector {
    pub fn css(selector: impl Into<String>) -> Self {
        Self::Css(selector.into())
    }

    /// CSS equivalent for attribute-based strategies
    pub fn as_css(&self) -> Option<String> {
        match self {
            Selector::Css(css) => Some(css.clone()),
            Selector::TestId(id) => Some(format!("[data-testid=\"{}\"]", escape_css(id))),
            Selector::Placeholder(p) => Some(format!("[placeholder=\"{}\"]", escape_css(p))),
            Selector::Name(n) => Some(format!("[name=\"{}\"]", escape_css(n))),
            Selector::Role { .. } | Selector::Text(_) => None,
        }
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Selector::Css(css) => write!(f, "{}", css),
            Selector::TestId(id) => write!(f, "[data-testid=\"{}\"]", id),
            Selector::Role { role, name } => write!(f, "role={}[name=\"{}\"]", role, name),
            Selector::Text(text) => write!(f, "text=\"{}\"", text),
            Selector::Placeholder(p) => write!(f, "[placeholder=\"{}\"]", p),
            Selector::Name(n) => write!(f, "[name=\"{}\"]", n),
        }
    }
}

fn escape_css(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

/// One step down from a document into a child frame
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameHop {
    /// First frame element matching a CSS selector in the parent document
    Selector(String),
    /// N-th frame of the parent document, in document order
    Index(usize),
}

/// The document subsequent locator operations apply to
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FrameContext {
    #[default]
    Main,
    /// Path of hops from the top-level page
    Frame(Vec<FrameHop>),
}

impl FrameContext {
    pub fn hops(&self) -> &[FrameHop] {
        match self {
            FrameContext::Main => &[],
            FrameContext::Frame(hops) => hops,
        }
    }

    pub fn is_main(&self) -> bool {
        self.hops().is_empty()
    }

    /// Context one hop deeper than `self`
    pub fn child(&self, hop: FrameHop) -> Self {
        let mut hops = self.hops().to_vec();
        hops.push(hop);
        FrameContext::Frame(hops)
    }
}

impl fmt::Display for FrameContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameContext::Main => write!(f, "main"),
            FrameContext::Frame(hops) => {
                let parts: Vec<String> = hops
                    .iter()
                    .map(|hop| match hop {
                        FrameHop::Selector(s) => s.clone(),
                        FrameHop::Index(i) => format!("frame[{}]", i),
                    })
                    .collect();
                write!(f, "{}", parts.join(" >> "))
            }
        }
    }
}

/// Handle to an element: a selector evaluated within a frame context.
///
/// Locators are lazy; every operation re-resolves them against the live page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Locator {
    pub frame: FrameContext,
    pub selector: Selector,
}

impl Locator {
    pub fn new(frame: FrameContext, selector: Selector) -> Self {
        Self { frame, selector }
    }

    pub fn css(frame: &FrameContext, css: &str) -> Self {
        Self::new(frame.clone(), Selector::css(css))
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.frame.is_main() {
            write!(f, "{}", self.selector)
        } else {
            write!(f, "{} >> {}", self.frame, self.selector)
        }
    }
}

/// Snapshot of the first element a locator resolves to
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementInfo {
    /// Lower-case tag name
    pub tag: String,
    /// `type` attribute, lower-cased
    pub input_type: Option<String>,
    /// Rendered text, whitespace collapsed
    pub text: Option<String>,
    pub placeholder: Option<String>,
    /// Explicit role attribute, else implicit role
    pub role: Option<String>,
    /// `name` attribute, else `aria-label`
    pub name: Option<String>,
    pub value: Option<String>,
    pub visible: bool,
    pub checked: bool,
}

/// Element-level interaction performed by a backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", content = "arg", rename_all = "snake_case")]
pub enum ElementAction {
    Click,
    DoubleClick,
    RightClick,
    Hover,
    /// Clear, then set the value
    Fill(String),
    /// Keystrokes appended to the current value
    Type(String),
    /// Option matched by value or visible text
    SelectOption(String),
    Check,
    Uncheck,
    ScrollIntoView,
    DragTo(Locator),
}

impl ElementAction {
    pub fn name(&self) -> &'static str {
        match self {
            ElementAction::Click => "click",
            ElementAction::DoubleClick => "double_click",
            ElementAction::RightClick => "right_click",
            ElementAction::Hover => "hover",
            ElementAction::Fill(_) => "fill",
            ElementAction::Type(_) => "type",
            ElementAction::SelectOption(_) => "select_option",
            ElementAction::Check => "check",
            ElementAction::Uncheck => "uncheck",
            ElementAction::ScrollIntoView => "scroll_into_view",
            ElementAction::DragTo(_) => "drag_to",
        }
    }
}

/// Implicit ARIA role of an element, following the common HTML mappings
pub fn implicit_role(tag: &str, input_type: Option<&str>, has_href: bool) -> Option<&'static str> {
    let role = match tag {
        "button" => "button",
        "a" | "area" if has_href => "link",
        "select" => "combobox",
        "textarea" => "textbox",
        "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => "heading",
        "img" => "img",
        "ul" | "ol" => "list",
        "li" => "listitem",
        "nav" => "navigation",
        "form" => "form",
        "table" => "table",
        "dialog" => "dialog",
        "option" => "option",
        "input" => match input_type.unwrap_or("text") {
            "button" | "submit" | "reset" | "image" => "button",
            "checkbox" => "checkbox",
            "radio" => "radio",
            "range" => "slider",
            "number" => "spinbutton",
            "search" => "searchbox",
            "hidden" => return None,
            _ => "textbox",
        },
        _ => return None,
    };
    Some(role)
}

/// Collapse runs of whitespace and trim
pub fn normalize_text(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}
