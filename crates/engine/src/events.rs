//! Run events and the sinks that receive them
//!
//! The engine emits an event for every status change, before every step and
//! for every healed locator. Emission is fire-and-forget: a sink must never
//! block the run, and the engine never waits for delivery.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info};
use uiheal_common::{HealingMethod, RunStatus};

/// Event emitted while a scenario runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEvent {
    Status {
        scenario_id: String,
        status: RunStatus,
    },
    Progress {
        scenario_id: String,
        /// 1-based index of the step about to run
        current: usize,
        total: usize,
        kind: String,
    },
    Healed {
        scenario_id: String,
        method: HealingMethod,
        score: f64,
        descriptor: String,
    },
}

impl RunEvent {
    pub fn scenario_id(&self) -> &str {
        match self {
            RunEvent::Status { scenario_id, .. }
            | RunEvent::Progress { scenario_id, .. }
            | RunEvent::Healed { scenario_id, .. } => scenario_id,
        }
    }
}

/// Receives run events
pub trait EventSink: Send + Sync {
    fn emit(&self, event: RunEvent);
}

/// Discards every event
#[derive(Debug, Clone, Default)]
pub struct NoopEvents;

impl EventSink for NoopEvents {
    fn emit(&self, _event: RunEvent) {}
}

/// Writes events to the tracing subscriber
#[derive(Debug, Clone, Default)]
pub struct TracingEvents;

impl EventSink for TracingEvents {
    fn emit(&self, event: RunEvent) {
        match &event {
            RunEvent::Status {
                scenario_id,
                status,
            } => info!("Scenario {} is {:?}", scenario_id, status),
            RunEvent::Progress {
                scenario_id,
                current,
                total,
                kind,
            } => debug!("Scenario {} step {}/{} ({})", scenario_id, current, total, kind),
            RunEvent::Healed {
                scenario_id,
                method,
                score,
                descriptor,
            } => info!(
                "Scenario {} healed locator via {} ({:.1}): {}",
                scenario_id, method, score, descriptor
            ),
        }
    }
}

/// Publishes events on a tokio broadcast channel.
///
/// Sending never fails the run: with no subscribers the event is dropped, and
/// slow subscribers observe `RecvError::Lagged`.
#[derive(Debug, Clone)]
pub struct BroadcastEvents {
    sender: broadcast::Sender<RunEvent>,
}

impl BroadcastEvents {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RunEvent> {
        self.sender.subscribe()
    }
}

impl Default for BroadcastEvents {
    fn default() -> Self {
        Self::new(256)
    }
}

impl EventSink for BroadcastEvents {
    fn emit(&self, event: RunEvent) {
        let _ = self.sender.send(event);
    }
}

/// Forwards every event to each inner sink in order
#[derive(Clone, Default)]
pub struct FanoutEvents {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl FanoutEvents {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl EventSink for FanoutEvents {
    fn emit(&self, event: RunEvent) {
        for sink in &self.sinks {
            sink.emit(event.clone());
        }
    }
}

/// Keeps every event in memory, for inspection after a run
#[derive(Debug, Clone, Default)]
pub struct RecordingEvents {
    events: Arc<Mutex<Vec<RunEvent>>>,
}

impl RecordingEvents {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<RunEvent> {
        self.events.lock().clone()
    }

    pub fn statuses(&self) -> Vec<RunStatus> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                RunEvent::Status { status, .. } => Some(*status),
                _ => None,
            })
            .collect()
    }

    pub fn healings(&self) -> Vec<RunEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| matches!(e, RunEvent::Healed { .. }))
            .cloned()
            .collect()
    }
}

impl EventSink for RecordingEvents {
    fn emit(&self, event: RunEvent) {
        self.events.lock().push(event);
    }
}
