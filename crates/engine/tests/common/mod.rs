//! Shared fixtures for the engine integration tests

#![allow(dead_code)]

use std::sync::Arc;
use uiheal_common::{MemoryStore, Scenario, Step, StepKind};
use uiheal_engine::config::{ControlConfig, TimeoutConfig};
use uiheal_engine::{
    EngineConfig, EventSink, FanoutEvents, MemoryBrowser, MemoryPage, Node, Orchestrator,
    RecordingEvents, RunRegistry,
};

pub const BASE_URL: &str = "https://example.test";

/// Install a test subscriber once; honours `RUST_LOG`
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Short timeouts so failing lookups resolve quickly
pub fn fast_config() -> EngineConfig {
    EngineConfig {
        timeouts: TimeoutConfig {
            heal_lookup_ms: 40,
            heal_attach_ms: 40,
            action_ms: 80,
            assertion_ms: 80,
            navigation_ms: 1_000,
            settle_ms: 40,
            default_wait_ms: 10,
        },
        control: ControlConfig {
            poll_interval_ms: 10,
        },
        ..EngineConfig::default()
    }
}

/// Checkout-like page: a form, a status message, a payment iframe
pub fn app_page() -> MemoryPage {
    MemoryPage::new(
        "Example checkout",
        Node::new("body").with_children([
            Node::new("form").with_id("checkout").with_children([
                Node::new("input")
                    .with_id("email")
                    .with_attr("type", "email")
                    .with_attr("name", "email")
                    .with_attr("placeholder", "Email"),
                Node::new("select").with_id("shipping").with_children([
                    Node::new("option").with_attr("value", "std").with_text("Standard"),
                    Node::new("option").with_attr("value", "exp").with_text("Express"),
                ]),
                Node::new("input").with_id("terms").with_attr("type", "checkbox"),
                Node::new("button")
                    .with_id("submit")
                    .with_test_id("submit-btn")
                    .with_text("Place order"),
            ]),
            Node::new("div").with_id("msg").with_text("Failed"),
            Node::new("div").with_id("toast").with_text("Saving").hidden(),
            Node::new("button").with_id("next").with_text("Next"),
            Node::new("iframe")
                .with_id("pay")
                .with_attr("name", "payment")
                .with_attr("src", "https://pay.example.test/widget")
                .with_frame(
                    Node::new("body")
                        .with_child(Node::new("input").with_id("card-number"))
                        .with_child(Node::new("button").with_id("pay-now").with_text("Pay")),
                ),
        ]),
    )
}

pub fn goto() -> Step {
    Step::new(StepKind::Goto).with_value(BASE_URL)
}

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub browser: MemoryBrowser,
    pub events: RecordingEvents,
    pub registry: RunRegistry,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_browser(MemoryBrowser::new().with_page(BASE_URL, app_page()))
    }

    pub fn with_browser(browser: MemoryBrowser) -> Self {
        init_tracing();
        Self {
            store: Arc::new(MemoryStore::new()),
            browser,
            events: RecordingEvents::new(),
            registry: RunRegistry::new(),
        }
    }

    /// Store a scenario and return its id
    pub fn add(&self, steps: Vec<Step>) -> String {
        let scenario = Scenario::new("integration", steps);
        let id = scenario.id.clone();
        self.store.insert_scenario(scenario);
        id
    }

    pub fn engine(&self) -> Orchestrator {
        self.engine_with(None)
    }

    /// Engine whose events also reach `extra`
    pub fn engine_with(&self, extra: Option<Arc<dyn EventSink>>) -> Orchestrator {
        let mut events = FanoutEvents::new().with(Arc::new(self.events.clone()));
        if let Some(extra) = extra {
            events = events.with(extra);
        }
        Orchestrator::with_store(fast_config(), self.store.clone(), Arc::new(self.browser.clone()))
            .with_registry(self.registry.clone())
            .with_events(Arc::new(events))
    }
}
