//! Execution orchestrator
//!
//! Owns one run end to end: scenario lookup, variable resolution, the browser
//! session, the step loop with its run-control checkpoints, the final
//! screenshot, metadata persistence and the `Execution` record.

use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};
use uiheal_common::{
    Database, Execution, ExecutionStatus, ExecutionStore, LogEntry, RunState, RunStatus,
    Scenario, ScenarioStore, Step,
};
use uuid::Uuid;

use crate::browser::webdriver::WebDriverLauncher;
use crate::browser::{BrowserLauncher, SessionGuard};
use crate::config::EngineConfig;
use crate::control::{Checkpoint, RunController, RunRegistry};
use crate::error::{EngineError, EngineResult};
use crate::events::{EventSink, NoopEvents, RunEvent};
use crate::healing::HealingResolver;
use crate::interpreter::StepInterpreter;
use crate::screenshot;
use crate::variables::{TemplateVariables, VariableResolver, Variables};

/// Log label of the entry appended when a stop is observed
pub const STOPPED_LABEL: &str = "Execution stopped";

/// One run's hold on its registry key. Dropping it releases the hold
/// exactly once; the last run out removes the key and announces `IDLE`.
struct RunGuard<'a> {
    registry: &'a RunRegistry,
    events: &'a dyn EventSink,
    id: &'a str,
}

impl<'a> RunGuard<'a> {
    fn start(registry: &'a RunRegistry, events: &'a dyn EventSink, id: &'a str) -> Self {
        registry.start(id);
        events.emit(RunEvent::Status {
            scenario_id: id.to_string(),
            status: RunStatus::Running,
        });
        Self {
            registry,
            events,
            id,
        }
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        if self.registry.finish(self.id) {
            self.events.emit(RunEvent::Status {
                scenario_id: self.id.to_string(),
                status: RunStatus::Idle,
            });
        } else {
            debug!("Run of {} ended, other runs still hold it", self.id);
        }
    }
}

/// Runs scenarios and exposes their run control
#[derive(Clone)]
pub struct Orchestrator {
    config: Arc<EngineConfig>,
    scenarios: Arc<dyn ScenarioStore>,
    executions: Arc<dyn ExecutionStore>,
    launcher: Arc<dyn BrowserLauncher>,
    variables: Arc<dyn VariableResolver>,
    events: Arc<dyn EventSink>,
    controller: RunController,
}

impl Orchestrator {
    pub fn new(
        config: EngineConfig,
        scenarios: Arc<dyn ScenarioStore>,
        executions: Arc<dyn ExecutionStore>,
        launcher: Arc<dyn BrowserLauncher>,
    ) -> Self {
        let controller = RunController::new(RunRegistry::new(), config.control.poll_interval());
        Self {
            config: Arc::new(config),
            scenarios,
            executions,
            launcher,
            variables: Arc::new(TemplateVariables::new()),
            events: Arc::new(NoopEvents),
            controller,
        }
    }

    /// Orchestrator over a store that holds both scenarios and executions
    pub fn with_store<S>(config: EngineConfig, store: Arc<S>, launcher: Arc<dyn BrowserLauncher>) -> Self
    where
        S: ScenarioStore + ExecutionStore + 'static,
    {
        Self::new(config, store.clone(), store, launcher)
    }

    /// SQLite store at `config.store_path` and a WebDriver backend
    pub fn open(config: EngineConfig) -> EngineResult<Self> {
        let db = Arc::new(Database::open(&config.store_path)?);
        let launcher = Arc::new(WebDriverLauncher::new(config.webdriver.clone())?);
        info!("Opened store at {}", config.store_path.display());
        Ok(Self::with_store(config, db, launcher))
    }

    pub fn with_variables(mut self, variables: Arc<dyn VariableResolver>) -> Self {
        self.variables = variables;
        self
    }

    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Share a run registry, e.g. with another orchestrator in the process
    pub fn with_registry(mut self, registry: RunRegistry) -> Self {
        self.controller = RunController::new(registry, self.config.control.poll_interval());
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn controller(&self) -> &RunController {
        &self.controller
    }

    pub fn pause(&self, scenario_id: &str) {
        self.controller.pause(scenario_id);
    }

    pub fn resume(&self, scenario_id: &str) {
        self.controller.resume(scenario_id);
    }

    pub fn stop(&self, scenario_id: &str) {
        self.controller.stop(scenario_id);
    }

    pub fn state(&self, scenario_id: &str) -> Option<RunState> {
        self.controller.state(scenario_id)
    }

    /// Run a scenario against an environment
    pub async fn execute(
        &self,
        scenario_id: &str,
        environment_id: Option<&str>,
    ) -> EngineResult<Execution> {
        self.execute_with(scenario_id, environment_id, Variables::new())
            .await
    }

    /// Run a scenario with caller-supplied variables layered over the
    /// environment's.
    ///
    /// Only a missing scenario (or an unreadable store) is returned as an
    /// error; everything that goes wrong once the run starts is recorded in
    /// the returned `Execution`.
    pub async fn execute_with(
        &self,
        scenario_id: &str,
        environment_id: Option<&str>,
        overrides: Variables,
    ) -> EngineResult<Execution> {
        let scenario = self
            .scenarios
            .get_scenario(scenario_id)
            .await?
            .ok_or_else(|| EngineError::ScenarioNotFound(scenario_id.to_string()))?;

        let started_at = Utc::now();
        let clock = Instant::now();
        info!(
            "Executing scenario {} ({}) with {} step(s)",
            scenario.name,
            scenario.id,
            scenario.steps.len()
        );

        let mut run = RunRecord::default();
        match self.variables.variables(environment_id).await {
            Ok(mut variables) => {
                variables.extend(overrides);
                self.run(&scenario, variables, &mut run).await;
            }
            Err(e) => {
                error!("Variable resolution failed for {}: {}", scenario.id, e);
                run.fail(LogEntry::new("Resolve variables").with_error(e.to_string()));
            }
        }

        let execution = Execution {
            id: Uuid::new_v4().to_string(),
            scenario_id: scenario.id.clone(),
            environment_id: environment_id.map(str::to_string),
            status: run.status,
            duration_ms: clock.elapsed().as_millis() as u64,
            logs: run.logs,
            screenshot: run.screenshot,
            started_at,
            finished_at: Utc::now(),
        };

        if let Err(e) = self.executions.create_execution(&execution).await {
            error!("Failed to persist execution {}: {}", execution.id, e);
        }

        info!(
            "Scenario {} finished {} in {} ms ({} log entries)",
            scenario.id,
            execution.status,
            execution.duration_ms,
            execution.logs.len()
        );
        Ok(execution)
    }

    /// Everything between acquiring the session and releasing it
    async fn run(&self, scenario: &Scenario, variables: Variables, record: &mut RunRecord) {
        let max_width = self.config.screenshot.max_width;

        let session = match self.launcher.launch().await {
            Ok(session) => SessionGuard::new(session),
            Err(e) => {
                error!("Failed to launch browser for {}: {}", scenario.id, e);
                record.fail(
                    LogEntry::new("Launch browser")
                        .with_error(format!("Failed to launch browser: {}", e)),
                );
                return;
            }
        };

        let run_guard = RunGuard::start(
            self.controller.registry(),
            self.events.as_ref(),
            &scenario.id,
        );

        let timeouts = &self.config.timeouts;
        let healer = HealingResolver::new(
            scenario.id.clone(),
            timeouts.heal_lookup(),
            timeouts.heal_attach(),
            self.events.clone(),
        );
        let mut interpreter = StepInterpreter::new(
            session.session(),
            healer,
            timeouts.clone(),
            self.variables.as_ref(),
            variables,
        );

        let total = scenario.steps.len();
        for (index, step) in scenario.steps.iter().enumerate() {
            if self
                .controller
                .checkpoint(&scenario.id, self.events.as_ref())
                .await
                == Checkpoint::Stopped
            {
                info!("Scenario {} stopped before step {}", scenario.id, index + 1);
                record
                    .logs
                    .push(LogEntry::new(STOPPED_LABEL).with_info("Stopped by user"));
                record.status = ExecutionStatus::Stopped;
                self.events.emit(RunEvent::Status {
                    scenario_id: scenario.id.clone(),
                    status: RunStatus::Stopped,
                });
                break;
            }

            self.events.emit(RunEvent::Progress {
                scenario_id: scenario.id.clone(),
                current: index + 1,
                total,
                kind: step.kind.to_string(),
            });

            let label = step.label(index);
            let step_clock = Instant::now();
            let result = interpreter.execute(index, step).await;
            let elapsed = step_clock.elapsed().as_millis() as u64;

            match result {
                Ok(outcome) => {
                    let mut entry = LogEntry::new(label).with_duration(elapsed);
                    if let Some(info) = outcome.info {
                        entry = entry.with_info(info);
                    }
                    if let Some(report) = outcome.healing {
                        entry = entry.healed(report);
                    }
                    record.logs.push(entry);
                }
                Err(e) => {
                    error!("Step {} failed: {}", label, e);
                    record.fail(
                        LogEntry::new(label)
                            .with_error(e.to_string())
                            .with_duration(elapsed),
                    );
                    record.screenshot = screenshot::capture(session.session(), max_width).await;
                    break;
                }
            }
        }

        let staged = interpreter.take_staged();
        drop(interpreter);

        if record.screenshot.is_none() {
            record.screenshot = screenshot::capture(session.session(), max_width).await;
        }
        session.release().await;
        drop(run_guard);

        if !staged.is_empty() {
            self.persist_metadata(scenario, staged.into_iter().collect())
                .await;
        }
    }

    /// Write the learned step copies back in a single steps update
    async fn persist_metadata(&self, scenario: &Scenario, learned: Vec<(usize, Step)>) {
        let count = learned.len();
        let mut steps = scenario.steps.clone();
        for (index, step) in learned {
            if let Some(slot) = steps.get_mut(index) {
                *slot = step;
            }
        }

        match self.scenarios.update_steps(&scenario.id, &steps).await {
            Ok(()) => info!(
                "Persisted learned metadata for {} step(s) of {}",
                count, scenario.id
            ),
            Err(e) => warn!("Failed to persist learned metadata for {}: {}", scenario.id, e),
        }
    }
}

/// Outcome accumulated while a run progresses
#[derive(Debug, Default)]
struct RunRecord {
    status: ExecutionStatus,
    logs: Vec<LogEntry>,
    screenshot: Option<String>,
}

impl RunRecord {
    fn fail(&mut self, entry: LogEntry) {
        debug!("Run failed at {}", entry.step);
        self.status = ExecutionStatus::Failed;
        self.logs.push(entry);
    }
}
