//! Runs against the SQLite store

mod common;

use std::sync::Arc;
use tempfile::TempDir;
use uiheal_common::{Database, ExecutionStatus, HealingMethod, Scenario};
use uiheal_engine::{EngineConfig, Orchestrator};

use common::{fast_config, init_tracing, Harness};

const CHECKOUT: &str = r##"
id: checkout
name: Checkout
project_id: shop
steps:
  - type: GOTO
    value: https://example.test
  - type: FILL
    selector: "input[name=mail]"
    value: ana@example.test
    metadata:
      placeholder: Email
  - type: CLICK
    selector: "#buy"
    metadata:
      testId: submit-btn
      text: Place order
"##;

fn open_store(dir: &TempDir) -> Database {
    let db = Database::open(dir.path().join("uiheal.db")).unwrap();
    db.insert_scenario(&Scenario::from_yaml(CHECKOUT).unwrap())
        .unwrap();
    db
}

#[tokio::test]
async fn test_healed_run_is_recorded_and_learned() {
    let dir = TempDir::new().unwrap();
    let db = open_store(&dir);
    assert_eq!(db.scenario_generation("checkout").unwrap(), Some(1));

    let h = Harness::new();
    let engine = Orchestrator::with_store(fast_config(), Arc::new(db.clone()), Arc::new(h.browser.clone()));
    let execution = engine.execute("checkout", None).await.unwrap();

    assert_eq!(execution.status, ExecutionStatus::Success, "{:?}", execution.logs);
    let methods: Vec<HealingMethod> = execution
        .logs
        .iter()
        .filter_map(|e| e.healing.as_ref().map(|r| r.method))
        .collect();
    assert_eq!(methods, vec![HealingMethod::Placeholder, HealingMethod::TestId]);

    let stored = db.list_executions("checkout").unwrap();
    assert_eq!(stored, vec![execution.clone()]);
    assert_eq!(db.get_execution(&execution.id).unwrap(), Some(execution));

    assert_eq!(db.scenario_generation("checkout").unwrap(), Some(2));
    let scenario = db.load_scenario("checkout").unwrap().unwrap();
    assert_eq!(scenario.project_id.as_deref(), Some("shop"));
    assert_eq!(scenario.steps[1].selector.as_deref(), Some("input[name=mail]"));
    let learned = scenario.steps[1].metadata.as_ref().unwrap();
    assert_eq!(learned.name.as_deref(), Some("email"));
    assert_eq!(learned.placeholder.as_deref(), Some("Email"));
}

#[tokio::test]
async fn test_reopened_store_keeps_history() {
    let dir = TempDir::new().unwrap();
    let h = Harness::new();
    {
        let db = open_store(&dir);
        let engine = Orchestrator::with_store(fast_config(), Arc::new(db), Arc::new(h.browser.clone()));
        engine.execute("checkout", None).await.unwrap();
        engine.execute("checkout", None).await.unwrap();
    }

    let db = Database::open(dir.path().join("uiheal.db")).unwrap();
    assert_eq!(db.list_executions("checkout").unwrap().len(), 2);
    // Second run found nothing new to learn
    assert_eq!(db.scenario_generation("checkout").unwrap(), Some(2));
}

#[tokio::test]
async fn test_open_builds_engine_from_config() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let config = EngineConfig {
        store_path: dir.path().join("nested").join("engine.db"),
        ..fast_config()
    };

    let engine = Orchestrator::open(config).unwrap();
    assert!(dir.path().join("nested").join("engine.db").exists());
    assert!(engine.state("checkout").is_none());
    assert!(engine.execute("missing", None).await.is_err());
}
