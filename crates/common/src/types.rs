//! Core types for uiheal

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use uuid::Uuid;

use crate::{Error, Result};

// ============================================================================
// Scenarios and steps
// ============================================================================

/// A named, ordered list of steps belonging to a project
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(default)]
    pub steps: Vec<Step>,
}

impl Scenario {
    pub fn new(name: impl Into<String>, steps: Vec<Step>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            project_id: None,
            steps,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_project(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }

    /// Parse a scenario from a YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let scenario: Self = serde_yaml::from_str(yaml)?;
        scenario.validate()?;
        Ok(scenario)
    }

    /// Parse a scenario from a JSON string
    pub fn from_json(json: &str) -> Result<Self> {
        let scenario: Self = serde_json::from_str(json)?;
        scenario.validate()?;
        Ok(scenario)
    }

    /// Load a scenario file, choosing the format from its extension
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => Self::from_yaml(&content),
            Some("json") => Self::from_json(&content),
            other => Err(Error::InvalidScenario(format!(
                "unsupported scenario file extension: {:?}",
                other
            ))),
        }
    }

    fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(Error::InvalidScenario("scenario id is empty".to_string()));
        }
        Ok(())
    }
}

/// Closed set of step kinds.
///
/// Kinds this build does not know are preserved as `Unknown` so that a stored
/// scenario written by a newer recorder still loads and runs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum StepKind {
    Goto,
    Click,
    DoubleClick,
    RightClick,
    Hover,
    DragAndDrop,
    SwitchFrame,
    Fill,
    Type,
    KeyPress,
    Select,
    Check,
    Uncheck,
    Submit,
    Reload,
    AssertVisible,
    AssertHidden,
    AssertText,
    AssertValue,
    AssertUrl,
    AssertTitle,
    Wait,
    Scroll,
    Comment,
    Unknown(String),
}

impl StepKind {
    /// Every known kind, in declaration order
    pub const KNOWN: [StepKind; 24] = [
        StepKind::Goto,
        StepKind::Click,
        StepKind::DoubleClick,
        StepKind::RightClick,
        StepKind::Hover,
        StepKind::DragAndDrop,
        StepKind::SwitchFrame,
        StepKind::Fill,
        StepKind::Type,
        StepKind::KeyPress,
        StepKind::Select,
        StepKind::Check,
        StepKind::Uncheck,
        StepKind::Submit,
        StepKind::Reload,
        StepKind::AssertVisible,
        StepKind::AssertHidden,
        StepKind::AssertText,
        StepKind::AssertValue,
        StepKind::AssertUrl,
        StepKind::AssertTitle,
        StepKind::Wait,
        StepKind::Scroll,
        StepKind::Comment,
    ];

    pub fn as_str(&self) -> &str {
        match self {
            StepKind::Goto => "GOTO",
            StepKind::Click => "CLICK",
            StepKind::DoubleClick => "DOUBLE_CLICK",
            StepKind::RightClick => "RIGHT_CLICK",
            StepKind::Hover => "HOVER",
            StepKind::DragAndDrop => "DRAG_AND_DROP",
            StepKind::SwitchFrame => "SWITCH_FRAME",
            StepKind::Fill => "FILL",
            StepKind::Type => "TYPE",
            StepKind::KeyPress => "KEY_PRESS",
            StepKind::Select => "SELECT",
            StepKind::Check => "CHECK",
            StepKind::Uncheck => "UNCHECK",
            StepKind::Submit => "SUBMIT",
            StepKind::Reload => "RELOAD",
            StepKind::AssertVisible => "ASSERT_VISIBLE",
            StepKind::AssertHidden => "ASSERT_HIDDEN",
            StepKind::AssertText => "ASSERT_TEXT",
            StepKind::AssertValue => "ASSERT_VALUE",
            StepKind::AssertUrl => "ASSERT_URL",
            StepKind::AssertTitle => "ASSERT_TITLE",
            StepKind::Wait => "WAIT",
            StepKind::Scroll => "SCROLL",
            StepKind::Comment => "COMMENT",
            StepKind::Unknown(name) => name,
        }
    }

    /// Kinds that never take a selector
    pub fn is_selector_free(&self) -> bool {
        matches!(
            self,
            StepKind::Goto
                | StepKind::Reload
                | StepKind::Wait
                | StepKind::AssertUrl
                | StepKind::AssertTitle
                | StepKind::KeyPress
        )
    }
}

impl From<String> for StepKind {
    fn from(name: String) -> Self {
        let normalized = name.trim().to_ascii_uppercase().replace(['-', ' '], "_");
        StepKind::KNOWN
            .iter()
            .find(|kind| kind.as_str() == normalized)
            .cloned()
            .unwrap_or(StepKind::Unknown(name))
    }
}

impl From<StepKind> for String {
    fn from(kind: StepKind) -> Self {
        kind.as_str().to_string()
    }
}

impl std::fmt::Display for StepKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Descriptive hints recorded alongside a step.
///
/// Not authoritative: refreshed from the live element during execution.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_id: Option<String>,
}

impl StepMetadata {
    pub fn test_id(id: impl Into<String>) -> Self {
        Self {
            test_id: Some(id.into()),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_none()
            && self.placeholder.is_none()
            && self.role.is_none()
            && self.name.is_none()
            && self.test_id.is_none()
    }
}

/// One atomic UI action or assertion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    #[serde(rename = "type")]
    pub kind: StepKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<StepMetadata>,
}

impl Step {
    pub fn new(kind: StepKind) -> Self {
        Self {
            kind,
            selector: None,
            value: None,
            metadata: None,
        }
    }

    pub fn with_selector(mut self, selector: impl Into<String>) -> Self {
        self.selector = Some(selector.into());
        self
    }

    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }

    pub fn with_metadata(mut self, metadata: StepMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Selector, if present and non-blank
    pub fn selector(&self) -> Option<&str> {
        self.selector.as_deref().map(str::trim).filter(|s| !s.is_empty())
    }

    /// Value, if present and non-blank
    pub fn value(&self) -> Option<&str> {
        self.value.as_deref().filter(|v| !v.trim().is_empty())
    }

    /// Human-readable label used in execution logs (1-based position)
    pub fn label(&self, index: usize) -> String {
        match (self.selector(), self.value()) {
            (Some(selector), _) => format!("{}. {} {}", index + 1, self.kind, selector),
            (None, Some(value)) if self.kind != StepKind::Comment => {
                format!("{}. {} {}", index + 1, self.kind, value)
            }
            _ => format!("{}. {}", index + 1, self.kind),
        }
    }
}

// ============================================================================
// Execution records
// ============================================================================

/// Strategy that produced a healed locator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HealingMethod {
    TestId,
    Role,
    Text,
    Placeholder,
    Name,
}

impl std::fmt::Display for HealingMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealingMethod::TestId => write!(f, "TEST_ID"),
            HealingMethod::Role => write!(f, "ROLE"),
            HealingMethod::Text => write!(f, "TEXT"),
            HealingMethod::Placeholder => write!(f, "PLACEHOLDER"),
            HealingMethod::Name => write!(f, "NAME"),
        }
    }
}

/// What healing did for one step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealingReport {
    pub method: HealingMethod,
    pub score: f64,
    pub descriptor: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogStatus {
    Healed,
}

/// One entry of an execution log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub step: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<LogStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub healing: Option<HealingReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    pub timestamp: DateTime<Utc>,
}

impl LogEntry {
    pub fn new(step: impl Into<String>) -> Self {
        Self {
            step: step.into(),
            info: None,
            error: None,
            status: None,
            healing: None,
            duration_ms: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_info(mut self, info: impl Into<String>) -> Self {
        self.info = Some(info.into());
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    pub fn healed(mut self, report: HealingReport) -> Self {
        self.status = Some(LogStatus::Healed);
        self.healing = Some(report);
        self
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    pub fn is_healed(&self) -> bool {
        self.status == Some(LogStatus::Healed)
    }
}

/// Final outcome of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    Success,
    Failed,
    Stopped,
}

impl Default for ExecutionStatus {
    fn default() -> Self {
        Self::Success
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionStatus::Success => write!(f, "SUCCESS"),
            ExecutionStatus::Failed => write!(f, "FAILED"),
            ExecutionStatus::Stopped => write!(f, "STOPPED"),
        }
    }
}

/// Persisted record of one scenario run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Execution {
    pub id: String,
    pub scenario_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment_id: Option<String>,
    pub status: ExecutionStatus,
    pub duration_ms: u64,
    pub logs: Vec<LogEntry>,
    /// Base64-encoded PNG
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

// ============================================================================
// Run control
// ============================================================================

/// Ephemeral control state of an in-flight run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunState {
    Running,
    Paused,
    Stopped,
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunState::Running => write!(f, "RUNNING"),
            RunState::Paused => write!(f, "PAUSED"),
            RunState::Stopped => write!(f, "STOPPED"),
        }
    }
}

/// Run status as broadcast to observers; `Idle` once no run is active
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Running,
    Paused,
    Stopped,
    Idle,
}

impl From<RunState> for RunStatus {
    fn from(state: RunState) -> Self {
        match state {
            RunState::Running => RunStatus::Running,
            RunState::Paused => RunStatus::Paused,
            RunState::Stopped => RunStatus::Stopped,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_kind_names() {
        assert_eq!(StepKind::from("DOUBLE_CLICK".to_string()), StepKind::DoubleClick);
        assert_eq!(StepKind::from("assert_text".to_string()), StepKind::AssertText);
        assert_eq!(StepKind::from("drag-and-drop".to_string()), StepKind::DragAndDrop);
        assert_eq!(
            StepKind::from("TELEPORT".to_string()),
            StepKind::Unknown("TELEPORT".to_string())
        );
        assert_eq!(StepKind::Unknown("TELEPORT".to_string()).as_str(), "TELEPORT");
    }

    #[test]
    fn test_selector_free_kinds() {
        let free = StepKind::KNOWN.iter().filter(|k| k.is_selector_free()).count();
        assert_eq!(free, 6);
        assert!(!StepKind::AssertHidden.is_selector_free());
        assert!(!StepKind::Scroll.is_selector_free());
    }

    #[test]
    fn test_parse_yaml_scenario() {
        let yaml = r##"
id: login
name: Login flow
steps:
  - type: GOTO
    value: "{{baseUrl}}/login"
  - type: FILL
    selector: "#email"
    value: "{{user}}"
    metadata:
      placeholder: Email
      testId: email-input
  - type: CLICK
    selector: "#submit"
  - type: TELEPORT
"##;
        let scenario = Scenario::from_yaml(yaml).unwrap();
        assert_eq!(scenario.id, "login");
        assert_eq!(scenario.steps.len(), 4);
        let meta = scenario.steps[1].metadata.as_ref().unwrap();
        assert_eq!(meta.test_id.as_deref(), Some("email-input"));
        assert_eq!(scenario.steps[3].kind, StepKind::Unknown("TELEPORT".to_string()));
    }

    #[test]
    fn test_scenario_from_file_by_extension() {
        let dir = tempfile::tempdir().unwrap();

        let yaml = dir.path().join("login.yml");
        std::fs::write(&yaml, "id: login\nname: Login\nsteps:\n  - type: RELOAD\n").unwrap();
        let scenario = Scenario::from_file(&yaml).unwrap();
        assert_eq!(scenario.id, "login");
        assert_eq!(scenario.steps[0].kind, StepKind::Reload);

        let json = dir.path().join("search.json");
        std::fs::write(
            &json,
            r#"{"id":"search","name":"Search","steps":[{"type":"KEY_PRESS","value":"Enter"}]}"#,
        )
        .unwrap();
        let scenario = Scenario::from_file(&json).unwrap();
        assert_eq!(scenario.steps[0].value(), Some("Enter"));

        let text = dir.path().join("notes.txt");
        std::fs::write(&text, "id: notes").unwrap();
        assert!(matches!(
            Scenario::from_file(&text),
            Err(Error::InvalidScenario(_))
        ));

        assert!(matches!(
            Scenario::from_file(&dir.path().join("absent.yaml")),
            Err(Error::Io(_))
        ));
    }

    #[test]
    fn test_metadata_uses_camel_case_keys() {
        let step = Step::new(StepKind::Click)
            .with_selector("#go")
            .with_metadata(StepMetadata::test_id("go-btn"));
        let json = serde_json::to_value(&step).unwrap();
        assert_eq!(json["type"], "CLICK");
        assert_eq!(json["metadata"]["testId"], "go-btn");
        assert!(json.get("value").is_none());
    }

    #[test]
    fn test_step_labels() {
        let click = Step::new(StepKind::Click).with_selector("  #old-id ");
        assert_eq!(click.label(1), "2. CLICK #old-id");

        let goto = Step::new(StepKind::Goto).with_value("https://example.test");
        assert_eq!(goto.label(0), "1. GOTO https://example.test");

        let comment = Step::new(StepKind::Comment).with_value("just a note");
        assert_eq!(comment.label(4), "5. COMMENT");
    }

    #[test]
    fn test_healed_log_entry_serialization() {
        let entry = LogEntry::new("2. CLICK #old-id")
            .with_duration(12)
            .healed(HealingReport {
                method: HealingMethod::TestId,
                score: 1.0,
                descriptor: "[data-testid=\"submit-btn\"]".to_string(),
            });
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["status"], "HEALED");
        assert_eq!(json["healing"]["method"], "TEST_ID");
        assert!(json.get("error").is_none());
    }
}
