//! Frame context tracking across steps

use tracing::{debug, warn};

use crate::browser::{BrowserSession, FrameContext};
use crate::error::{BrowserError, StepError, StepResult};

/// Remembers which document locator operations apply to
#[derive(Debug, Clone, Default)]
pub struct FrameTracker {
    current: FrameContext,
}

impl FrameTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> &FrameContext {
        &self.current
    }

    pub fn reset(&mut self) {
        self.current = FrameContext::Main;
    }

    /// Handle a `SWITCH_FRAME` target.
    ///
    /// Empty, `main` and `top` return to the page. Anything else is tried as a
    /// frame selector inside the current context, then as a frame name, then
    /// as a URL fragment.
    pub async fn switch(
        &mut self,
        session: &dyn BrowserSession,
        target: Option<&str>,
    ) -> StepResult<&FrameContext> {
        let target = target.map(str::trim).unwrap_or_default();
        if is_top_level(target) {
            debug!("Switching to main document");
            self.reset();
            return Ok(&self.current);
        }

        let resolved = match session.frame_by_selector(&self.current, target).await {
            Ok(Some(frame)) => Some(frame),
            Ok(None) => None,
            Err(BrowserError::InvalidSelector(_)) | Err(BrowserError::NoSuchElement(_)) => None,
            Err(e) => return Err(e.into()),
        };

        let resolved = match resolved {
            Some(frame) => Some(frame),
            None => match session.frame_by_name(target).await? {
                Some(frame) => Some(frame),
                None => session.frame_by_url(target).await?,
            },
        };

        match resolved {
            Some(frame) => {
                debug!("Switched to frame {}", frame);
                self.current = frame;
                Ok(&self.current)
            }
            None => {
                warn!("No frame matches {}", target);
                Err(StepError::FrameResolution(target.to_string()))
            }
        }
    }
}

fn is_top_level(target: &str) -> bool {
    target.is_empty() || target.eq_ignore_ascii_case("main") || target.eq_ignore_ascii_case("top")
}
