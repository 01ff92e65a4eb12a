//! Pause, resume and stop observed by live runs

mod common;

use std::sync::Arc;
use std::time::Duration;
use uiheal_common::{ExecutionStatus, RunState, RunStatus, Step, StepKind};
use uiheal_engine::orchestrator::STOPPED_LABEL;
use uiheal_engine::{EventSink, RunEvent, RunRegistry, Variables};

use common::{goto, Harness};

/// Calls back into the registry when a given step is announced
struct OnProgress<F> {
    step: usize,
    action: F,
}

impl<F> EventSink for OnProgress<F>
where
    F: Fn(&str) + Send + Sync,
{
    fn emit(&self, event: RunEvent) {
        if let RunEvent::Progress {
            scenario_id,
            current,
            ..
        } = event
        {
            if current == self.step {
                (self.action)(&scenario_id);
            }
        }
    }
}

fn five_steps() -> Vec<Step> {
    vec![
        goto(),
        Step::new(StepKind::Click).with_selector("#next"),
        Step::new(StepKind::Wait).with_value("5"),
        Step::new(StepKind::Comment).with_value("checkpoint"),
        Step::new(StepKind::AssertTitle).with_value("checkout"),
    ]
}

#[tokio::test]
async fn test_stop_ends_run_before_next_step() {
    let h = Harness::new();
    let id = h.add(five_steps());

    let registry = h.registry.clone();
    let sink = OnProgress {
        step: 2,
        action: move |id: &str| {
            assert!(registry.stop(id));
        },
    };
    let execution = h
        .engine_with(Some(Arc::new(sink)))
        .execute(&id, None)
        .await
        .unwrap();

    assert_eq!(execution.status, ExecutionStatus::Stopped);
    assert_eq!(execution.logs.len(), 3);
    let last = execution.logs.last().unwrap();
    assert_eq!(last.step, STOPPED_LABEL);
    assert_eq!(last.info.as_deref(), Some("Stopped by user"));
    assert!(!last.is_error());

    assert_eq!(
        h.events.statuses(),
        vec![RunStatus::Running, RunStatus::Stopped, RunStatus::Idle]
    );
    assert!(execution.screenshot.is_some());
    assert_eq!(h.browser.sessions_closed(), 1);
    assert!(h.registry.state(&id).is_none());
}

#[tokio::test]
async fn test_pause_holds_run_until_resume() {
    let h = Harness::new();
    let id = h.add(five_steps());

    let registry = h.registry.clone();
    let sink = OnProgress {
        step: 2,
        action: move |id: &str| {
            assert!(registry.pause(id));
            let registry = registry.clone();
            let id = id.to_string();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(60)).await;
                registry.resume(&id);
            });
        },
    };
    let execution = h
        .engine_with(Some(Arc::new(sink)))
        .execute(&id, None)
        .await
        .unwrap();

    assert_eq!(execution.status, ExecutionStatus::Success, "{:?}", execution.logs);
    let labels: Vec<&str> = execution.logs.iter().map(|e| e.step.as_str()).collect();
    assert_eq!(
        labels,
        vec![
            "1. GOTO https://example.test",
            "2. CLICK #next",
            "3. WAIT 5",
            "4. COMMENT",
            "5. ASSERT_TITLE checkout",
        ]
    );

    let statuses = h.events.statuses();
    assert_eq!(statuses.first(), Some(&RunStatus::Running));
    assert!(statuses.contains(&RunStatus::Paused));
    assert_eq!(statuses.last(), Some(&RunStatus::Idle));
}

#[tokio::test]
async fn test_stop_while_paused() {
    let h = Harness::new();
    let id = h.add(five_steps());

    let registry = h.registry.clone();
    let sink = OnProgress {
        step: 3,
        action: move |id: &str| {
            registry.pause(id);
            let registry = registry.clone();
            let id = id.to_string();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(40)).await;
                registry.stop(&id);
            });
        },
    };
    let execution = h
        .engine_with(Some(Arc::new(sink)))
        .execute(&id, None)
        .await
        .unwrap();

    assert_eq!(execution.status, ExecutionStatus::Stopped);
    assert_eq!(execution.logs.len(), 4);
    assert_eq!(execution.logs[3].step, STOPPED_LABEL);
    assert!(h.registry.active_runs().is_empty());
}

#[tokio::test]
async fn test_control_of_unknown_run_is_a_noop() {
    let h = Harness::new();
    let engine = h.engine();

    engine.pause("ghost");
    engine.resume("ghost");
    engine.stop("ghost");

    assert!(engine.state("ghost").is_none());
    assert!(engine.controller().active_runs().is_empty());
}

#[tokio::test]
async fn test_concurrent_runs_are_independent() {
    let h = Harness::new();
    let first = h.add(five_steps());
    let second = h.add(vec![
        goto(),
        Step::new(StepKind::AssertText)
            .with_selector("#msg")
            .with_value("Done"),
    ]);

    let registry = h.registry.clone();
    let stop_first = first.clone();
    let sink = OnProgress {
        step: 2,
        action: move |id: &str| {
            if id == stop_first {
                registry.stop(id);
            }
        },
    };
    let engine = h.engine_with(Some(Arc::new(sink)));

    let results = futures::future::join_all(vec![
        engine.execute(&first, None),
        engine.execute(&second, None),
    ])
    .await;

    let statuses: Vec<ExecutionStatus> = results
        .into_iter()
        .map(|r| r.unwrap().status)
        .collect();
    assert_eq!(
        statuses,
        vec![ExecutionStatus::Stopped, ExecutionStatus::Failed]
    );
    assert_eq!(h.browser.sessions_launched(), 2);
    assert_eq!(h.browser.sessions_closed(), 2);
    assert!(h.registry.active_runs().is_empty());
}

fn target(selector: &str) -> Variables {
    let mut variables = Variables::new();
    variables.insert("target".to_string(), selector.to_string());
    variables
}

#[tokio::test]
async fn test_stop_reaches_run_that_outlives_sibling() {
    let h = Harness::new();
    let mut steps = vec![goto(), Step::new(StepKind::Click).with_selector("{{target}}")];
    steps.extend((0..8).map(|_| Step::new(StepKind::Wait).with_value("80")));
    let id = h.add(steps);
    let engine = h.engine();

    let long = engine.execute_with(&id, None, target("#next"));
    let short_then_stop = async {
        let short = engine
            .execute_with(&id, None, target("#missing"))
            .await
            .unwrap();
        assert_eq!(h.registry.live_runs(&id), 1);
        assert_eq!(engine.state(&id), Some(RunState::Running));
        engine.stop(&id);
        short
    };
    let (long, short) = tokio::join!(long, short_then_stop);
    let long = long.unwrap();

    assert_eq!(short.status, ExecutionStatus::Failed);
    assert_eq!(long.status, ExecutionStatus::Stopped);
    assert!(long.logs.len() < 11, "{:?}", long.logs);
    assert_eq!(long.logs.last().unwrap().step, STOPPED_LABEL);

    let statuses = h.events.statuses();
    let idle = statuses.iter().filter(|s| **s == RunStatus::Idle).count();
    assert_eq!(idle, 1);
    assert_eq!(statuses.last(), Some(&RunStatus::Idle));
    assert!(h.registry.active_runs().is_empty());
}

#[test]
fn test_shared_registry_sees_all_engines() {
    let registry = RunRegistry::new();
    let h1 = Harness::new();
    let h2 = Harness::new();
    let a = h1.engine().with_registry(registry.clone());
    let b = h2.engine().with_registry(registry.clone());

    registry.start("shared");
    a.pause("shared");
    assert_eq!(b.state("shared"), Some(RunState::Paused));
    b.stop("shared");
    assert_eq!(a.state("shared"), Some(RunState::Stopped));
}
