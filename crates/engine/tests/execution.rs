//! End-to-end runs against the in-memory browser

mod common;

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use uiheal_common::{
    Error, Execution, ExecutionStatus, ExecutionStore, HealingMethod, MemoryStore, RunStatus,
    Scenario, ScenarioStore, Step, StepKind, StepMetadata,
};
use uiheal_engine::browser::memory::Interaction;
use uiheal_engine::browser::ElementAction;
use uiheal_engine::{
    EngineError, MemoryBrowser, Orchestrator, RunEvent, TemplateVariables, Variables,
};

use common::{app_page, fast_config, goto, Harness, BASE_URL};

#[tokio::test]
async fn test_broken_selector_heals_via_test_id() {
    let h = Harness::new();
    let id = h.add(vec![
        goto(),
        Step::new(StepKind::Click)
            .with_selector("#old-id")
            .with_metadata(StepMetadata::test_id("submit-btn")),
    ]);

    let execution = h.engine().execute(&id, None).await.unwrap();

    assert_eq!(execution.status, ExecutionStatus::Success);
    assert_eq!(execution.logs.len(), 2);
    let healed = &execution.logs[1];
    assert!(healed.is_healed());
    let report = healed.healing.as_ref().unwrap();
    assert_eq!(report.method, HealingMethod::TestId);
    assert_eq!(report.score, 1.0);

    assert_eq!(
        h.browser.element_actions(),
        vec![("button#submit".to_string(), ElementAction::Click)]
    );
    let healings = h.events.healings();
    assert_eq!(healings.len(), 1);
    assert!(matches!(
        &healings[0],
        RunEvent::Healed { method: HealingMethod::TestId, .. }
    ));
}

#[tokio::test]
async fn test_resolving_selectors_never_heal() {
    let h = Harness::new();
    let id = h.add(vec![
        goto(),
        Step::new(StepKind::Fill)
            .with_selector("#email")
            .with_value("ana@example.test")
            .with_metadata(StepMetadata::test_id("email-field")),
        Step::new(StepKind::Click)
            .with_selector("#submit")
            .with_metadata(StepMetadata::test_id("submit-btn")),
    ]);

    let execution = h.engine().execute(&id, None).await.unwrap();

    assert_eq!(execution.status, ExecutionStatus::Success);
    assert!(execution.logs.iter().all(|entry| !entry.is_healed()));
    assert!(h.events.healings().is_empty());
}

#[tokio::test]
async fn test_failed_assertion_fails_run_with_screenshot() {
    let h = Harness::new();
    let id = h.add(vec![
        goto(),
        Step::new(StepKind::AssertText)
            .with_selector("#msg")
            .with_value("Done"),
        Step::new(StepKind::Click).with_selector("#submit"),
    ]);

    let execution = h.engine().execute(&id, None).await.unwrap();

    assert_eq!(execution.status, ExecutionStatus::Failed);
    assert_eq!(execution.logs.len(), 2);
    let failure = execution.logs.last().unwrap();
    let message = failure.error.as_deref().unwrap();
    assert!(message.contains("\"Done\" not found"), "{}", message);
    assert!(failure.duration_ms.is_some());
    assert!(execution.screenshot.is_some());
    assert!(h.browser.element_actions().is_empty());

    assert_eq!(h.events.statuses(), vec![RunStatus::Running, RunStatus::Idle]);
    assert_eq!(h.store.executions(), vec![execution]);
    assert_eq!(h.browser.sessions_closed(), 1);
}

#[tokio::test]
async fn test_missing_scenario_is_an_error() {
    let h = Harness::new();
    let err = h.engine().execute("does-not-exist", None).await.unwrap_err();

    assert!(matches!(err, EngineError::ScenarioNotFound(ref id) if id == "does-not-exist"));
    assert!(h.store.executions().is_empty());
    assert_eq!(h.browser.sessions_launched(), 0);
    assert!(h.events.events().is_empty());
}

#[tokio::test]
async fn test_unknown_step_kind_does_not_abort() {
    let h = Harness::new();
    let scenario = Scenario::from_yaml(
        r##"
id: yaml-scenario
name: Unknown kinds
steps:
  - type: GOTO
    value: https://example.test
  - type: HOVER_TWICE
    selector: "#next"
  - type: ASSERT_TITLE
    value: checkout
"##,
    )
    .unwrap();
    h.store.insert_scenario(scenario);

    let execution = h.engine().execute("yaml-scenario", None).await.unwrap();

    assert_eq!(execution.status, ExecutionStatus::Success);
    assert_eq!(execution.logs.len(), 3);
    assert_eq!(
        execution.logs[1].info.as_deref(),
        Some("Unknown step type: HOVER_TWICE")
    );
}

#[tokio::test]
async fn test_form_steps_drive_the_right_actions() {
    let h = Harness::new();
    let id = h.add(vec![
        goto(),
        Step::new(StepKind::Fill)
            .with_selector("#email")
            .with_value("ana@example.test"),
        Step::new(StepKind::Fill)
            .with_selector("#shipping")
            .with_value("Express"),
        Step::new(StepKind::Fill)
            .with_selector("#terms")
            .with_value("true"),
        Step::new(StepKind::AssertValue)
            .with_selector("#shipping")
            .with_value("exp"),
        Step::new(StepKind::Submit).with_selector("#submit"),
        Step::new(StepKind::AssertHidden).with_selector("#toast"),
    ]);

    let execution = h.engine().execute(&id, None).await.unwrap();

    assert_eq!(execution.status, ExecutionStatus::Success, "{:?}", execution.logs);
    assert_eq!(
        h.browser.element_actions(),
        vec![
            (
                "input#email".to_string(),
                ElementAction::Fill("ana@example.test".into())
            ),
            (
                "select#shipping".to_string(),
                ElementAction::SelectOption("Express".into())
            ),
            ("input#terms".to_string(), ElementAction::Check),
            ("button#submit".to_string(), ElementAction::Click),
        ]
    );
}

#[tokio::test]
async fn test_frame_steps_target_the_active_document() {
    let h = Harness::new();
    let id = h.add(vec![
        goto(),
        Step::new(StepKind::SwitchFrame).with_selector("payment"),
        Step::new(StepKind::Fill)
            .with_selector("#card-number")
            .with_value("4242"),
        Step::new(StepKind::Click).with_selector("#pay-now"),
        Step::new(StepKind::SwitchFrame).with_selector("main"),
        Step::new(StepKind::Click).with_selector("#next"),
    ]);

    let execution = h.engine().execute(&id, None).await.unwrap();

    assert_eq!(execution.status, ExecutionStatus::Success, "{:?}", execution.logs);
    let targets: Vec<String> = h
        .browser
        .element_actions()
        .into_iter()
        .map(|(target, _)| target)
        .collect();
    assert_eq!(targets, vec!["input#card-number", "button#pay-now", "button#next"]);
}

#[tokio::test]
async fn test_missing_frame_fails_the_run() {
    let h = Harness::new();
    let id = h.add(vec![
        goto(),
        Step::new(StepKind::SwitchFrame).with_selector("#no-such-frame"),
        Step::new(StepKind::Click).with_selector("#next"),
    ]);

    let execution = h.engine().execute(&id, None).await.unwrap();

    assert_eq!(execution.status, ExecutionStatus::Failed);
    assert!(execution.logs[1]
        .error
        .as_deref()
        .unwrap()
        .contains("Frame not found"));
}

#[tokio::test]
async fn test_environment_variables_and_overrides() {
    let h = Harness::new();
    let id = h.add(vec![
        Step::new(StepKind::Goto).with_value("{{ base }}"),
        Step::new(StepKind::Fill)
            .with_selector("{{field}}")
            .with_value("{{user}}@example.test"),
    ]);

    let mut staging = Variables::new();
    staging.insert("base".into(), BASE_URL.into());
    staging.insert("field".into(), "#email".into());
    staging.insert("user".into(), "staging-bot".into());
    let variables = TemplateVariables::new().with_environment("staging", staging);

    let mut overrides = HashMap::new();
    overrides.insert("user".to_string(), "ana".to_string());

    let execution = h
        .engine()
        .with_variables(Arc::new(variables))
        .execute_with(&id, Some("staging"), overrides)
        .await
        .unwrap();

    assert_eq!(execution.status, ExecutionStatus::Success, "{:?}", execution.logs);
    assert_eq!(execution.environment_id.as_deref(), Some("staging"));
    assert_eq!(
        h.browser.journal().first(),
        Some(&Interaction::Navigate(BASE_URL.into()))
    );
    assert_eq!(
        h.browser.element_actions(),
        vec![(
            "input#email".to_string(),
            ElementAction::Fill("ana@example.test".into())
        )]
    );
    // Labels keep the recorded templates
    assert_eq!(execution.logs[1].step, "2. FILL {{field}}");
}

#[tokio::test]
async fn test_unknown_environment_fails_without_browser() {
    let h = Harness::new();
    let id = h.add(vec![goto()]);

    let execution = h.engine().execute(&id, Some("prod")).await.unwrap();

    assert_eq!(execution.status, ExecutionStatus::Failed);
    assert!(execution.logs[0]
        .error
        .as_deref()
        .unwrap()
        .contains("Unknown environment: prod"));
    assert_eq!(h.browser.sessions_launched(), 0);
    assert_eq!(h.store.executions().len(), 1);
}

#[tokio::test]
async fn test_launch_failure_is_recorded() {
    let h = Harness::with_browser(MemoryBrowser::new().failing_launch());
    let id = h.add(vec![goto()]);

    let execution = h.engine().execute(&id, None).await.unwrap();

    assert_eq!(execution.status, ExecutionStatus::Failed);
    assert_eq!(execution.logs.len(), 1);
    assert!(execution.screenshot.is_none());
    assert!(h.registry.active_runs().is_empty());
}

#[tokio::test]
async fn test_screenshot_failure_is_swallowed() {
    let h = Harness::with_browser(
        MemoryBrowser::new()
            .with_page(BASE_URL, app_page())
            .failing_screenshots(),
    );
    let id = h.add(vec![goto(), Step::new(StepKind::Click).with_selector("#next")]);

    let execution = h.engine().execute(&id, None).await.unwrap();

    assert_eq!(execution.status, ExecutionStatus::Success);
    assert!(execution.screenshot.is_none());
    assert_eq!(h.browser.sessions_closed(), 1);
}

#[tokio::test]
async fn test_changed_metadata_is_persisted_once() {
    let h = Harness::new();
    let id = h.add(vec![
        goto(),
        Step::new(StepKind::Click)
            .with_selector("#old-submit")
            .with_metadata(StepMetadata {
                text: Some("Buy now".into()),
                test_id: Some("submit-btn".into()),
                ..StepMetadata::default()
            }),
        Step::new(StepKind::Fill)
            .with_selector("#email")
            .with_value("ana@example.test"),
    ]);

    let execution = h.engine().execute(&id, None).await.unwrap();
    assert_eq!(execution.status, ExecutionStatus::Success);

    assert_eq!(h.store.step_update_count(&id), 1);
    let stored = h.store.scenario(&id).unwrap();
    assert_eq!(stored.steps.len(), 3);

    let click = &stored.steps[1];
    assert_eq!(click.selector.as_deref(), Some("#old-submit"));
    let learned = click.metadata.as_ref().unwrap();
    assert_eq!(learned.text.as_deref(), Some("Place order"));
    assert_eq!(learned.role.as_deref(), Some("button"));
    assert_eq!(learned.test_id.as_deref(), Some("submit-btn"));

    let fill = stored.steps[2].metadata.as_ref().unwrap();
    assert_eq!(fill.placeholder.as_deref(), Some("Email"));
    assert_eq!(fill.name.as_deref(), Some("email"));
}

#[tokio::test]
async fn test_unchanged_metadata_is_not_written() {
    let h = Harness::new();
    let id = h.add(vec![
        goto(),
        Step::new(StepKind::Click)
            .with_selector("#next")
            .with_metadata(StepMetadata {
                text: Some("Next".into()),
                role: Some("button".into()),
                ..StepMetadata::default()
            }),
        Step::new(StepKind::AssertUrl).with_value("example.test"),
    ]);

    h.engine().execute(&id, None).await.unwrap();
    assert_eq!(h.store.step_update_count(&id), 0);
}

/// Scenario store whose step updates always fail
struct ReadOnlyScenarios(MemoryStore);

#[async_trait]
impl ScenarioStore for ReadOnlyScenarios {
    async fn get_scenario(&self, id: &str) -> uiheal_common::Result<Option<Scenario>> {
        self.0.get_scenario(id).await
    }

    async fn update_steps(&self, _id: &str, _steps: &[Step]) -> uiheal_common::Result<()> {
        Err(Error::Internal("scenario store is read-only".into()))
    }
}

#[async_trait]
impl ExecutionStore for ReadOnlyScenarios {
    async fn create_execution(&self, execution: &Execution) -> uiheal_common::Result<()> {
        self.0.create_execution(execution).await
    }
}

#[tokio::test]
async fn test_metadata_write_failure_keeps_status() {
    let h = Harness::new();
    let id = h.add(vec![goto(), Step::new(StepKind::Click).with_selector("#next")]);
    let store = Arc::new(ReadOnlyScenarios((*h.store).clone()));

    let engine = Orchestrator::with_store(fast_config(), store, Arc::new(h.browser.clone()));
    let execution = engine.execute(&id, None).await.unwrap();

    assert_eq!(execution.status, ExecutionStatus::Success);
    assert_eq!(h.store.executions().len(), 1);
}
