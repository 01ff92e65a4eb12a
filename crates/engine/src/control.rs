//! Run control: pause, resume and stop signals for in-flight runs
//!
//! The registry is the only state shared between the orchestrator's step loop
//! and external callers. Every transition is a single atomic operation on one
//! key, so a control call made from a request handler is visible to the loop
//! at its next checkpoint.
//!
//! Runs are keyed by scenario id and the registry lives in one process.
//! Concurrent runs of the same scenario share a key: a signal reaches all of
//! them and the key lives until the last one finishes. A deployment with
//! several engine instances needs an external registry to route signals.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use uiheal_common::{RunState, RunStatus};

use crate::events::{EventSink, RunEvent};

/// State of one key plus the number of runs currently holding it
#[derive(Debug, Clone, Copy)]
struct RunEntry {
    state: RunState,
    live: usize,
}

/// Shared map of run id to run state
#[derive(Debug, Clone, Default)]
pub struct RunRegistry {
    runs: Arc<DashMap<String, RunEntry>>,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a run. A new key starts `RUNNING`; joining a key that other
    /// runs still hold keeps its current state.
    pub fn start(&self, id: &str) {
        self.runs
            .entry(id.to_string())
            .and_modify(|entry| entry.live += 1)
            .or_insert(RunEntry {
                state: RunState::Running,
                live: 1,
            });
    }

    pub fn state(&self, id: &str) -> Option<RunState> {
        self.runs.get(id).map(|entry| entry.state)
    }

    /// Number of runs currently registered under `id`
    pub fn live_runs(&self, id: &str) -> usize {
        self.runs.get(id).map_or(0, |entry| entry.live)
    }

    /// Apply `next` when the current state satisfies `allowed`
    fn transition(&self, id: &str, allowed: fn(RunState) -> bool, next: RunState) -> bool {
        match self.runs.get_mut(id) {
            Some(mut entry) if allowed(entry.state) => {
                entry.state = next;
                true
            }
            _ => false,
        }
    }

    /// `RUNNING` to `PAUSED`
    pub fn pause(&self, id: &str) -> bool {
        self.transition(id, |s| s == RunState::Running, RunState::Paused)
    }

    /// `PAUSED` to `RUNNING`
    pub fn resume(&self, id: &str) -> bool {
        self.transition(id, |s| s == RunState::Paused, RunState::Running)
    }

    /// Any state to `STOPPED`
    pub fn stop(&self, id: &str) -> bool {
        self.transition(id, |_| true, RunState::Stopped)
    }

    /// Release one run's hold on `id`. The entry is removed with its last
    /// run; returns true when that happened.
    pub fn finish(&self, id: &str) -> bool {
        match self.runs.entry(id.to_string()) {
            Entry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                entry.live = entry.live.saturating_sub(1);
                if entry.live == 0 {
                    occupied.remove();
                    true
                } else {
                    false
                }
            }
            Entry::Vacant(_) => false,
        }
    }

    pub fn active_runs(&self) -> Vec<(String, RunState)> {
        let mut runs: Vec<(String, RunState)> = self
            .runs
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().state))
            .collect();
        runs.sort_by(|a, b| a.0.cmp(&b.0));
        runs
    }
}

/// What the step loop should do next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Checkpoint {
    Proceed,
    Stopped,
}

/// Control API over a [`RunRegistry`]
#[derive(Debug, Clone)]
pub struct RunController {
    registry: RunRegistry,
    poll_interval: Duration,
}

impl RunController {
    pub fn new(registry: RunRegistry, poll_interval: Duration) -> Self {
        Self {
            registry,
            poll_interval,
        }
    }

    pub fn registry(&self) -> &RunRegistry {
        &self.registry
    }

    /// Pause a running run. No-op otherwise.
    pub fn pause(&self, id: &str) {
        if self.registry.pause(id) {
            info!("Paused run {}", id);
        } else {
            debug!("Pause ignored for {}", id);
        }
    }

    /// Resume a paused run. No-op otherwise.
    pub fn resume(&self, id: &str) {
        if self.registry.resume(id) {
            info!("Resumed run {}", id);
        } else {
            debug!("Resume ignored for {}", id);
        }
    }

    /// Stop a run before its next step. No-op for unknown runs.
    pub fn stop(&self, id: &str) {
        if self.registry.stop(id) {
            info!("Stop requested for run {}", id);
        } else {
            debug!("Stop ignored for {}", id);
        }
    }

    pub fn state(&self, id: &str) -> Option<RunState> {
        self.registry.state(id)
    }

    pub fn active_runs(&self) -> Vec<(String, RunState)> {
        self.registry.active_runs()
    }

    /// Gate before each step.
    ///
    /// While the run is paused this re-checks every poll interval and
    /// re-emits the paused status. Returns once the run is running again or
    /// has been stopped.
    pub async fn checkpoint(&self, id: &str, events: &dyn EventSink) -> Checkpoint {
        loop {
            match self.registry.state(id) {
                Some(RunState::Stopped) => return Checkpoint::Stopped,
                Some(RunState::Paused) => {
                    events.emit(RunEvent::Status {
                        scenario_id: id.to_string(),
                        status: RunStatus::Paused,
                    });
                    tokio::time::sleep(self.poll_interval).await;
                }
                Some(RunState::Running) | None => return Checkpoint::Proceed,
            }
        }
    }
}
