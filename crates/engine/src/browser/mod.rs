//! Browser seam
//!
//! The engine talks to a live page only through [`BrowserSession`]. Two
//! backends ship with the crate:
//!
//! - [`webdriver`]: a W3C WebDriver client (chromedriver, geckodriver, grid)
//! - [`memory`]: an in-memory DOM used for tests and dry runs

pub mod locator;
pub mod memory;
pub mod webdriver;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::BrowserResult;

pub use locator::{
    implicit_role, normalize_text, ElementAction, ElementInfo, FrameContext, FrameHop, Locator,
    Selector,
};

/// Interval at which attach waits re-check the page
pub const ATTACH_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Opens one exclusive browser session per run
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn launch(&self) -> BrowserResult<Box<dyn BrowserSession>>;
}

/// One live browser page
#[async_trait]
pub trait BrowserSession: Send + Sync {
    // ------------------------------------------------------------------
    // Page level
    // ------------------------------------------------------------------

    async fn goto(&self, url: &str, timeout: Duration) -> BrowserResult<()>;

    async fn reload(&self, timeout: Duration) -> BrowserResult<()>;

    async fn current_url(&self) -> BrowserResult<String>;

    async fn title(&self) -> BrowserResult<String>;

    /// Wait for the document to finish loading. Returns false on timeout.
    async fn wait_for_load(&self, timeout: Duration) -> BrowserResult<bool>;

    /// Press a key or a `+`-joined combination such as `Control+A`
    async fn press_key(&self, key: &str) -> BrowserResult<()>;

    async fn scroll_by(&self, dx: i64, dy: i64) -> BrowserResult<()>;

    /// PNG bytes of the viewport
    async fn screenshot(&self) -> BrowserResult<Vec<u8>>;

    async fn close(&self) -> BrowserResult<()>;

    // ------------------------------------------------------------------
    // Element level
    // ------------------------------------------------------------------

    /// Number of elements the locator currently matches
    async fn count(&self, locator: &Locator) -> BrowserResult<usize>;

    /// Describe the first matching element
    async fn describe(&self, locator: &Locator) -> BrowserResult<ElementInfo>;

    /// Perform an action on the first matching element
    async fn perform(&self, locator: &Locator, action: &ElementAction) -> BrowserResult<()>;

    // ------------------------------------------------------------------
    // Frames
    // ------------------------------------------------------------------

    /// Frame element matching `selector` inside `parent`
    async fn frame_by_selector(
        &self,
        parent: &FrameContext,
        selector: &str,
    ) -> BrowserResult<Option<FrameContext>>;

    /// Any frame in the page whose `name` equals `name`
    async fn frame_by_name(&self, name: &str) -> BrowserResult<Option<FrameContext>>;

    /// Any frame in the page whose URL contains `pattern`
    async fn frame_by_url(&self, pattern: &str) -> BrowserResult<Option<FrameContext>>;

    /// Poll until the locator matches at least one element.
    /// Returns false if nothing attached within `timeout`.
    async fn wait_attached(&self, locator: &Locator, timeout: Duration) -> BrowserResult<bool> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.count(locator).await? > 0 {
                return Ok(true);
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(ATTACH_POLL_INTERVAL).await;
        }
    }
}

/// Owns a session for the duration of one run.
///
/// `release` closes it explicitly; a guard dropped without release closes the
/// session on the current runtime so no exit path leaks a browser.
pub struct SessionGuard {
    session: Arc<dyn BrowserSession>,
    released: bool,
}

impl SessionGuard {
    pub fn new(session: Box<dyn BrowserSession>) -> Self {
        Self {
            session: Arc::from(session),
            released: false,
        }
    }

    pub fn session(&self) -> &dyn BrowserSession {
        self.session.as_ref()
    }

    /// Close the session, logging failures
    pub async fn release(mut self) {
        self.released = true;
        match self.session.close().await {
            Ok(()) => debug!("Browser session released"),
            Err(e) => warn!("Failed to close browser session: {}", e),
        }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let session = self.session.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = session.close().await {
                        warn!("Failed to close dropped browser session: {}", e);
                    }
                });
            }
            Err(_) => warn!("Browser session dropped outside a runtime; not closed"),
        }
    }
}
