//! Locator healing
//!
//! A recorded selector is first tried with a short attach timeout. When it no
//! longer matches, the step's metadata is turned into alternative locators,
//! each tried once and scored by a fixed per-strategy weight:
//!
//! | strategy    | metadata used          | weight |
//! |-------------|------------------------|--------|
//! | test id     | `testId`               | 1.0    |
//! | role        | `role` + `text`/`name` | 0.8    |
//! | text        | `text`                 | 0.7    |
//! | placeholder | `placeholder`          | 0.6    |
//! | name        | `name`                 | 0.5    |
//!
//! The best match wins, first-listed on ties. With no match the original
//! locator is returned unchanged so the caller's own lookup fails normally.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uiheal_common::{HealingMethod, HealingReport, StepMetadata};

use crate::browser::{BrowserSession, FrameContext, Locator, Selector};
use crate::error::{BrowserError, StepError, StepResult};
use crate::events::{EventSink, RunEvent};

/// Fixed score of a healing strategy
pub fn weight(method: HealingMethod) -> f64 {
    match method {
        HealingMethod::TestId => 1.0,
        HealingMethod::Role => 0.8,
        HealingMethod::Text => 0.7,
        HealingMethod::Placeholder => 0.6,
        HealingMethod::Name => 0.5,
    }
}

/// Alternative locator proposed by one strategy
#[derive(Debug, Clone, PartialEq)]
pub struct HealingCandidate {
    pub locator: Locator,
    pub score: f64,
    pub method: HealingMethod,
    pub descriptor: String,
}

impl HealingCandidate {
    fn new(context: &FrameContext, method: HealingMethod, selector: Selector) -> Self {
        let descriptor = selector.to_string();
        Self {
            locator: Locator::new(context.clone(), selector),
            score: weight(method),
            method,
            descriptor,
        }
    }

    pub fn report(&self) -> HealingReport {
        HealingReport {
            method: self.method,
            score: self.score,
            descriptor: self.descriptor.clone(),
        }
    }
}

/// Outcome of resolving a step's selector
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub locator: Locator,
    /// Set when the locator came from healing
    pub healing: Option<HealingReport>,
}

impl Resolution {
    fn original(locator: Locator) -> Self {
        Self {
            locator,
            healing: None,
        }
    }

    pub fn healed(&self) -> bool {
        self.healing.is_some()
    }
}

/// Candidates in probing order. Strategies whose metadata is absent are skipped.
pub fn candidates(context: &FrameContext, metadata: &StepMetadata) -> Vec<HealingCandidate> {
    let present = |field: &Option<String>| {
        field
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    };

    let mut found = Vec::new();
    if let Some(id) = present(&metadata.test_id) {
        found.push(HealingCandidate::new(context, HealingMethod::TestId, Selector::TestId(id)));
    }
    if let Some(role) = present(&metadata.role) {
        if let Some(name) = present(&metadata.text).or_else(|| present(&metadata.name)) {
            found.push(HealingCandidate::new(
                context,
                HealingMethod::Role,
                Selector::Role { role, name },
            ));
        }
    }
    if let Some(text) = present(&metadata.text) {
        found.push(HealingCandidate::new(context, HealingMethod::Text, Selector::Text(text)));
    }
    if let Some(placeholder) = present(&metadata.placeholder) {
        found.push(HealingCandidate::new(
            context,
            HealingMethod::Placeholder,
            Selector::Placeholder(placeholder),
        ));
    }
    if let Some(name) = present(&metadata.name) {
        found.push(HealingCandidate::new(context, HealingMethod::Name, Selector::Name(name)));
    }
    found
}

/// Resolves step selectors, healing them from metadata when they break
#[derive(Clone)]
pub struct HealingResolver {
    scenario_id: String,
    lookup_timeout: Duration,
    attach_timeout: Duration,
    events: Arc<dyn EventSink>,
}

impl HealingResolver {
    pub fn new(
        scenario_id: impl Into<String>,
        lookup_timeout: Duration,
        attach_timeout: Duration,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            scenario_id: scenario_id.into(),
            lookup_timeout,
            attach_timeout,
            events,
        }
    }

    pub async fn resolve(
        &self,
        session: &dyn BrowserSession,
        context: &FrameContext,
        selector: &str,
        metadata: Option<&StepMetadata>,
    ) -> StepResult<Resolution> {
        let original = Locator::css(context, selector);

        let lookup_error = match session.wait_attached(&original, self.lookup_timeout).await {
            Ok(true) => return Ok(Resolution::original(original)),
            Ok(false) => None,
            Err(e @ BrowserError::InvalidSelector(_)) => Some(e),
            Err(e) => return Err(e.into()),
        };

        let metadata = match metadata.filter(|m| !m.is_empty()) {
            Some(metadata) => metadata,
            None => {
                return Err(match lookup_error {
                    Some(e) => e.into(),
                    None => StepError::ElementNotFound {
                        selector: original.to_string(),
                        timeout_ms: self.lookup_timeout.as_millis() as u64,
                    },
                })
            }
        };

        debug!("Selector {} did not attach, trying healing", original);

        let mut best: Option<HealingCandidate> = None;
        for candidate in candidates(context, metadata) {
            match session.count(&candidate.locator).await {
                Ok(0) => debug!("Healing via {} found nothing", candidate.method),
                Ok(n) => {
                    debug!(
                        "Healing via {} matched {} element(s) with {}",
                        candidate.method, n, candidate.descriptor
                    );
                    if best.as_ref().map_or(true, |b| candidate.score > b.score) {
                        best = Some(candidate);
                    }
                }
                Err(e) => debug!("Healing via {} failed: {}", candidate.method, e),
            }
        }

        let Some(winner) = best else {
            warn!("No healing candidate matched {}", original);
            return Ok(Resolution::original(original));
        };

        match session
            .wait_attached(&winner.locator, self.attach_timeout)
            .await
        {
            Ok(true) => {}
            Ok(false) => warn!("Healed locator {} did not attach in time", winner.descriptor),
            Err(e) => warn!("Healed locator {} failed to attach: {}", winner.descriptor, e),
        }

        info!(
            "Healed {} via {} ({:.1}) -> {}",
            original, winner.method, winner.score, winner.descriptor
        );
        self.events.emit(RunEvent::Healed {
            scenario_id: self.scenario_id.clone(),
            method: winner.method,
            score: winner.score,
            descriptor: winner.descriptor.clone(),
        });

        Ok(Resolution {
            healing: Some(winner.report()),
            locator: winner.locator,
        })
    }
}
