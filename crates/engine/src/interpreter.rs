//! Step interpreter
//!
//! Executes one [`Step`] at a time against a browser session. Selector-bearing
//! steps go through the [`HealingResolver`] (except `ASSERT_HIDDEN`), and the
//! element a step acts on is re-described so drifted metadata can be staged
//! for persistence once the run ends.

use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};
use uiheal_common::{HealingReport, Step, StepKind, StepMetadata};

use crate::browser::{
    normalize_text, BrowserSession, ElementAction, ElementInfo, Locator, ATTACH_POLL_INTERVAL,
};
use crate::config::TimeoutConfig;
use crate::error::{BrowserError, StepError, StepResult};
use crate::frame::FrameTracker;
use crate::healing::HealingResolver;
use crate::variables::{VariableResolver, Variables};

/// Longest learned `text` hint, in characters
pub const MAX_LEARNED_TEXT: usize = 100;

/// Default page scroll of a `SCROLL` step without selector, in pixels
pub const DEFAULT_SCROLL_PX: i64 = 500;

/// Key pressed by `SUBMIT` when no selector is given
pub const SUBMIT_KEY: &str = "Enter";

/// What a successful step reports back to the log
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepOutcome {
    pub info: Option<String>,
    pub healing: Option<HealingReport>,
}

impl StepOutcome {
    fn info(info: impl Into<String>) -> Self {
        Self {
            info: Some(info.into()),
            healing: None,
        }
    }

    fn on(target: &Target, info: impl Into<String>) -> Self {
        Self {
            info: Some(info.into()),
            healing: target.healing.clone(),
        }
    }
}

/// Element a step resolved to
struct Target {
    locator: Locator,
    healing: Option<HealingReport>,
    element: Option<ElementInfo>,
}

/// Re-run `check` until it reports success or `timeout` elapses.
/// Returns the last observation either way.
async fn poll<T, F, Fut>(timeout: Duration, mut check: F) -> StepResult<(bool, T)>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = StepResult<(bool, T)>>,
{
    let deadline = Instant::now() + timeout;
    loop {
        let (done, observed) = check().await?;
        if done || Instant::now() >= deadline {
            return Ok((done, observed));
        }
        tokio::time::sleep(ATTACH_POLL_INTERVAL).await;
    }
}

/// Metadata observed on a live element, keeping the stored test id
pub fn observed_metadata(stored: Option<&StepMetadata>, element: &ElementInfo) -> StepMetadata {
    let clean = |value: &Option<String>| {
        value
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    };

    StepMetadata {
        text: element
            .text
            .as_deref()
            .map(normalize_text)
            .filter(|t| !t.is_empty())
            .map(|t| t.chars().take(MAX_LEARNED_TEXT).collect()),
        placeholder: clean(&element.placeholder),
        role: clean(&element.role),
        name: clean(&element.name),
        test_id: stored.and_then(|m| m.test_id.clone()),
    }
}

fn required(field: Option<String>, kind: &StepKind, what: &str) -> StepResult<String> {
    field.ok_or_else(|| StepError::InvalidStep(format!("{} step requires a {}", kind, what)))
}

/// Executes steps of one run, in order, against one session
pub struct StepInterpreter<'a> {
    session: &'a dyn BrowserSession,
    frames: FrameTracker,
    healer: HealingResolver,
    timeouts: TimeoutConfig,
    resolver: &'a dyn VariableResolver,
    variables: Variables,
    staged: BTreeMap<usize, Step>,
}

impl<'a> StepInterpreter<'a> {
    pub fn new(
        session: &'a dyn BrowserSession,
        healer: HealingResolver,
        timeouts: TimeoutConfig,
        resolver: &'a dyn VariableResolver,
        variables: Variables,
    ) -> Self {
        Self {
            session,
            frames: FrameTracker::new(),
            healer,
            timeouts,
            resolver,
            variables,
            staged: BTreeMap::new(),
        }
    }

    pub fn frames(&self) -> &FrameTracker {
        &self.frames
    }

    /// Steps whose observed metadata differed from the stored one, by index
    pub fn staged(&self) -> &BTreeMap<usize, Step> {
        &self.staged
    }

    pub fn take_staged(&mut self) -> BTreeMap<usize, Step> {
        std::mem::take(&mut self.staged)
    }

    fn expand(&self, template: Option<&str>) -> Option<String> {
        template.map(|t| self.resolver.substitute(t, &self.variables))
    }

    /// Execute the step at `index` (0-based)
    pub async fn execute(&mut self, index: usize, step: &Step) -> StepResult<StepOutcome> {
        let kind = &step.kind;
        let selector = self.expand(step.selector());
        let value = self.expand(step.value());
        let session = self.session;
        let timeouts = self.timeouts.clone();

        debug!("Executing step {} ({})", index + 1, kind);

        match kind {
            StepKind::Goto => {
                let url = required(value, kind, "value (URL)")?;
                session.goto(&url, timeouts.navigation()).await?;
                Ok(StepOutcome::info(format!("Navigated to {}", url)))
            }
            StepKind::Reload => {
                session.reload(timeouts.navigation()).await?;
                Ok(StepOutcome::info("Page reloaded"))
            }
            StepKind::Click
            | StepKind::DoubleClick
            | StepKind::RightClick
            | StepKind::Hover => {
                let selector = required(selector, kind, "selector")?;
                let target = self.target(index, step, &selector, timeouts.action()).await?;
                let (action, verb) = match kind {
                    StepKind::Click => (ElementAction::Click, "Clicked"),
                    StepKind::DoubleClick => (ElementAction::DoubleClick, "Double-clicked"),
                    StepKind::RightClick => (ElementAction::RightClick, "Right-clicked"),
                    _ => (ElementAction::Hover, "Hovered"),
                };
                session.perform(&target.locator, &action).await?;
                Ok(StepOutcome::on(&target, format!("{} {}", verb, target.locator)))
            }
            StepKind::DragAndDrop => {
                let selector = required(selector, kind, "selector")?;
                let drop_css = required(value, kind, "value (drop target selector)")?;
                let source = self.target(index, step, &selector, timeouts.action()).await?;

                let drop_target = Locator::css(self.frames.current(), &drop_css);
                if !session
                    .wait_attached(&drop_target, timeouts.action())
                    .await?
                {
                    return Err(StepError::ElementNotFound {
                        selector: drop_target.to_string(),
                        timeout_ms: timeouts.action_ms,
                    });
                }
                session
                    .perform(&source.locator, &ElementAction::DragTo(drop_target.clone()))
                    .await?;
                Ok(StepOutcome::on(
                    &source,
                    format!("Dragged {} to {}", source.locator, drop_target),
                ))
            }
            StepKind::SwitchFrame => {
                let frame = self.frames.switch(session, selector.as_deref()).await?;
                if frame.is_main() {
                    Ok(StepOutcome::info("Switched to main document"))
                } else {
                    Ok(StepOutcome::info(format!("Switched to frame {}", frame)))
                }
            }
            StepKind::Fill => {
                let selector = required(selector, kind, "selector")?;
                let text = required(self.expand(step.value.as_deref()), kind, "value")?;
                let target = self.target(index, step, &selector, timeouts.action()).await?;
                let element = match target.element.clone() {
                    Some(element) => element,
                    None => session.describe(&target.locator).await?,
                };

                let is_toggle = element.tag == "input"
                    && matches!(element.input_type.as_deref(), Some("checkbox" | "radio"));
                let (action, info) = if element.tag == "select" {
                    (
                        ElementAction::SelectOption(text.clone()),
                        format!("Selected option \"{}\" in {}", text, target.locator),
                    )
                } else if is_toggle {
                    (ElementAction::Check, format!("Checked {}", target.locator))
                } else {
                    (
                        ElementAction::Fill(text.clone()),
                        format!("Filled {}", target.locator),
                    )
                };
                session.perform(&target.locator, &action).await?;
                Ok(StepOutcome::on(&target, info))
            }
            StepKind::Type => {
                let selector = required(selector, kind, "selector")?;
                let text = required(self.expand(step.value.as_deref()), kind, "value")?;
                let target = self.target(index, step, &selector, timeouts.action()).await?;
                session
                    .perform(&target.locator, &ElementAction::Type(text))
                    .await?;
                Ok(StepOutcome::on(&target, format!("Typed into {}", target.locator)))
            }
            StepKind::KeyPress => {
                let key = required(value, kind, "value (key)")?;
                session.press_key(&key).await?;
                Ok(StepOutcome::info(format!("Pressed {}", key)))
            }
            StepKind::Select => {
                let selector = required(selector, kind, "selector")?;
                let option = required(value, kind, "value (option)")?;
                let target = self.target(index, step, &selector, timeouts.action()).await?;
                session
                    .perform(&target.locator, &ElementAction::SelectOption(option.clone()))
                    .await?;
                Ok(StepOutcome::on(
                    &target,
                    format!("Selected option \"{}\" in {}", option, target.locator),
                ))
            }
            StepKind::Check | StepKind::Uncheck => {
                let selector = required(selector, kind, "selector")?;
                let target = self.target(index, step, &selector, timeouts.action()).await?;
                let (action, verb) = if *kind == StepKind::Check {
                    (ElementAction::Check, "Checked")
                } else {
                    (ElementAction::Uncheck, "Unchecked")
                };
                session.perform(&target.locator, &action).await?;
                Ok(StepOutcome::on(&target, format!("{} {}", verb, target.locator)))
            }
            StepKind::Submit => {
                let mut outcome = match selector {
                    Some(selector) => {
                        let target =
                            self.target(index, step, &selector, timeouts.action()).await?;
                        session
                            .perform(&target.locator, &ElementAction::Click)
                            .await?;
                        StepOutcome::on(&target, format!("Submitted via {}", target.locator))
                    }
                    None => {
                        session.press_key(SUBMIT_KEY).await?;
                        StepOutcome::info(format!("Submitted via {}", SUBMIT_KEY))
                    }
                };
                if !session.wait_for_load(timeouts.settle()).await? {
                    warn!(
                        "Page did not settle within {} ms after submit",
                        timeouts.settle_ms
                    );
                    outcome.info = outcome
                        .info
                        .map(|i| format!("{} (page still loading)", i));
                }
                Ok(outcome)
            }
            StepKind::AssertVisible => {
                let selector = required(selector, kind, "selector")?;
                let target = self
                    .target(index, step, &selector, timeouts.assertion())
                    .await?;
                let locator = &target.locator;
                let (visible, _) = poll(timeouts.assertion(), || async move {
                    match session.describe(locator).await {
                        Ok(info) => Ok((info.visible, ())),
                        Err(BrowserError::NoSuchElement(_)) => Ok((false, ())),
                        Err(e) => Err(StepError::from(e)),
                    }
                })
                .await?;
                if !visible {
                    return Err(StepError::Assertion(format!(
                        "Element {} is not visible",
                        target.locator
                    )));
                }
                Ok(StepOutcome::on(&target, format!("{} is visible", target.locator)))
            }
            StepKind::AssertHidden => {
                let selector = required(selector, kind, "selector")?;
                let locator = Locator::css(self.frames.current(), &selector);
                let watched = &locator;
                let (hidden, _) = poll(timeouts.assertion(), || async move {
                    match session.count(watched).await {
                        Ok(0) => return Ok((true, ())),
                        Ok(_) => {}
                        Err(e) => return Err(StepError::from(e)),
                    }
                    match session.describe(watched).await {
                        Ok(info) => Ok((!info.visible, ())),
                        Err(BrowserError::NoSuchElement(_)) => Ok((true, ())),
                        Err(e) => Err(StepError::from(e)),
                    }
                })
                .await?;
                if !hidden {
                    return Err(StepError::Assertion(format!(
                        "Element {} is still visible",
                        locator
                    )));
                }
                Ok(StepOutcome::info(format!("{} is hidden", locator)))
            }
            StepKind::AssertText => {
                let selector = required(selector, kind, "selector")?;
                let expected = normalize_text(&required(value, kind, "value (expected text)")?);
                let target = self
                    .target(index, step, &selector, timeouts.assertion())
                    .await?;
                let (locator, wanted) = (&target.locator, expected.as_str());
                let (found, actual) = poll(timeouts.assertion(), || async move {
                    match session.describe(locator).await {
                        Ok(info) => {
                            let text = info.text.unwrap_or_default();
                            Ok((text.contains(wanted), text))
                        }
                        Err(BrowserError::NoSuchElement(_)) => Ok((false, String::new())),
                        Err(e) => Err(StepError::from(e)),
                    }
                })
                .await?;
                if !found {
                    return Err(StepError::Assertion(format!(
                        "Expected text \"{}\" not found in {} (actual: \"{}\")",
                        expected, target.locator, actual
                    )));
                }
                Ok(StepOutcome::on(
                    &target,
                    format!("{} contains \"{}\"", target.locator, expected),
                ))
            }
            StepKind::AssertValue => {
                let selector = required(selector, kind, "selector")?;
                let expected = required(self.expand(step.value.as_deref()), kind, "value")?;
                let target = self
                    .target(index, step, &selector, timeouts.assertion())
                    .await?;
                let (locator, wanted) = (&target.locator, expected.as_str());
                let (equal, actual) = poll(timeouts.assertion(), || async move {
                    match session.describe(locator).await {
                        Ok(info) => {
                            let value = info.value.unwrap_or_default();
                            Ok((value == wanted, value))
                        }
                        Err(BrowserError::NoSuchElement(_)) => Ok((false, String::new())),
                        Err(e) => Err(StepError::from(e)),
                    }
                })
                .await?;
                if !equal {
                    return Err(StepError::Assertion(format!(
                        "Expected value \"{}\" in {} but found \"{}\"",
                        expected, target.locator, actual
                    )));
                }
                Ok(StepOutcome::on(
                    &target,
                    format!("{} has value \"{}\"", target.locator, expected),
                ))
            }
            StepKind::AssertUrl => {
                let expected = required(value, kind, "value (URL fragment)")?;
                let wanted = expected.as_str();
                let (found, actual) = poll(timeouts.assertion(), || async move {
                    match session.current_url().await {
                        Ok(url) => Ok((url.contains(wanted), url)),
                        Err(e) => Err(StepError::from(e)),
                    }
                })
                .await?;
                if !found {
                    return Err(StepError::Assertion(format!(
                        "Expected URL to contain \"{}\" but was \"{}\"",
                        expected, actual
                    )));
                }
                Ok(StepOutcome::info(format!("URL contains \"{}\"", expected)))
            }
            StepKind::AssertTitle => {
                let expected = required(value, kind, "value (title fragment)")?;
                let wanted = expected.as_str();
                let (found, actual) = poll(timeouts.assertion(), || async move {
                    match session.title().await {
                        Ok(title) => Ok((title.contains(wanted), title)),
                        Err(e) => Err(StepError::from(e)),
                    }
                })
                .await?;
                if !found {
                    return Err(StepError::Assertion(format!(
                        "Expected title to contain \"{}\" but was \"{}\"",
                        expected, actual
                    )));
                }
                Ok(StepOutcome::info(format!("Title contains \"{}\"", expected)))
            }
            StepKind::Wait => {
                let ms = value
                    .as_deref()
                    .and_then(|v| v.trim().parse::<u64>().ok())
                    .unwrap_or(timeouts.default_wait_ms);
                tokio::time::sleep(Duration::from_millis(ms)).await;
                Ok(StepOutcome::info(format!("Waited {} ms", ms)))
            }
            StepKind::Scroll => match selector {
                Some(selector) => {
                    let target = self.target(index, step, &selector, timeouts.action()).await?;
                    session
                        .perform(&target.locator, &ElementAction::ScrollIntoView)
                        .await?;
                    Ok(StepOutcome::on(
                        &target,
                        format!("Scrolled {} into view", target.locator),
                    ))
                }
                None => {
                    let dy = value
                        .as_deref()
                        .and_then(|v| v.trim().parse::<i64>().ok())
                        .unwrap_or(DEFAULT_SCROLL_PX);
                    session.scroll_by(0, dy).await?;
                    Ok(StepOutcome::info(format!("Scrolled page by {} px", dy)))
                }
            },
            StepKind::Comment => Ok(StepOutcome {
                info: value,
                healing: None,
            }),
            StepKind::Unknown(name) => {
                warn!("Skipping unknown step type {}", name);
                Ok(StepOutcome::info(format!("Unknown step type: {}", name)))
            }
        }
    }

    /// Resolve (and heal) a selector, wait for the element, then learn from it
    async fn target(
        &mut self,
        index: usize,
        step: &Step,
        selector: &str,
        wait: Duration,
    ) -> StepResult<Target> {
        let session = self.session;
        let resolution = self
            .healer
            .resolve(session, self.frames.current(), selector, step.metadata.as_ref())
            .await?;

        if !session.wait_attached(&resolution.locator, wait).await? {
            return Err(StepError::ElementNotFound {
                selector: resolution.locator.to_string(),
                timeout_ms: wait.as_millis() as u64,
            });
        }

        let element = match session.describe(&resolution.locator).await {
            Ok(element) => {
                self.learn(index, step, &element);
                Some(element)
            }
            Err(e) => {
                warn!("Could not describe {}: {}", resolution.locator, e);
                None
            }
        };

        Ok(Target {
            locator: resolution.locator,
            healing: resolution.healing,
            element,
        })
    }

    /// Stage an updated copy of `step` when the live element's metadata drifted
    fn learn(&mut self, index: usize, step: &Step, element: &ElementInfo) {
        let observed = observed_metadata(step.metadata.as_ref(), element);
        let stored = step.metadata.clone().unwrap_or_default();
        if observed == stored {
            return;
        }
        debug!("Step {} metadata changed: {:?} -> {:?}", index + 1, stored, observed);
        let mut updated = step.clone();
        updated.metadata = if observed.is_empty() {
            None
        } else {
            Some(observed)
        };
        self.staged.insert(index, updated);
    }
}
