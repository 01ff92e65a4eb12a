//! uiheal Execution Engine
//!
//! Replays recorded browser scenarios step by step, heals locators that no
//! longer match from the metadata recorded with each step, and reports every
//! run as an [`Execution`](uiheal_common::Execution).
//!
//! # Components
//!
//! - [`Orchestrator`]: one run end to end, with session cleanup on every path
//! - [`StepInterpreter`]: per-kind side effects of the 24 step kinds
//! - [`HealingResolver`]: weighted fallback locators
//! - [`FrameTracker`]: the document steps currently operate in
//! - [`RunController`]: pause, resume and stop of in-flight runs
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use uiheal_common::{MemoryStore, Scenario, Step, StepKind};
//! use uiheal_engine::{EngineConfig, MemoryBrowser, Orchestrator};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(MemoryStore::new());
//! let scenario = Scenario::new("smoke", vec![
//!     Step::new(StepKind::Goto).with_value("https://example.test"),
//! ]);
//! let id = scenario.id.clone();
//! store.insert_scenario(scenario);
//!
//! let engine = Orchestrator::with_store(
//!     EngineConfig::default(),
//!     store,
//!     Arc::new(MemoryBrowser::new()),
//! );
//! let execution = engine.execute(&id, None).await?;
//! println!("{}", execution.status);
//! # Ok(())
//! # }
//! ```

pub mod browser;
pub mod config;
pub mod control;
pub mod error;
pub mod events;
pub mod frame;
pub mod healing;
pub mod interpreter;
pub mod orchestrator;
pub mod screenshot;
pub mod variables;

pub use browser::memory::{MemoryBrowser, MemoryPage, Node};
pub use browser::webdriver::WebDriverLauncher;
pub use browser::{BrowserLauncher, BrowserSession, FrameContext, Locator, Selector};
pub use config::EngineConfig;
pub use control::{RunController, RunRegistry};
pub use error::{BrowserError, EngineError, EngineResult, StepError, StepResult};
pub use events::{
    BroadcastEvents, EventSink, FanoutEvents, NoopEvents, RecordingEvents, RunEvent,
    TracingEvents,
};
pub use frame::FrameTracker;
pub use healing::{HealingCandidate, HealingResolver, Resolution};
pub use interpreter::{StepInterpreter, StepOutcome};
pub use orchestrator::Orchestrator;
pub use variables::{TemplateVariables, VariableResolver, Variables};
