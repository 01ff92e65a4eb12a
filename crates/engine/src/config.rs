//! Engine configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// SQLite file used by the persistent store
    pub store_path: PathBuf,

    /// WebDriver backend configuration
    pub webdriver: WebDriverConfig,

    /// Step-local timeouts
    pub timeouts: TimeoutConfig,

    /// Run control configuration
    pub control: ControlConfig,

    /// Screenshot configuration
    pub screenshot: ScreenshotConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            store_path: uiheal_common::default_db_path(),
            webdriver: WebDriverConfig::default(),
            timeouts: TimeoutConfig::default(),
            control: ControlConfig::default(),
            screenshot: ScreenshotConfig::default(),
        }
    }
}

/// WebDriver-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebDriverConfig {
    /// Base URL of the WebDriver server (chromedriver, geckodriver, grid)
    pub endpoint: String,

    /// Browser name requested in the session capabilities
    pub browser: String,

    /// Run without a visible window
    pub headless: bool,

    /// Extra browser command line arguments
    pub args: Vec<String>,

    pub viewport_width: u32,
    pub viewport_height: u32,

    /// Timeout of a single WebDriver HTTP request
    pub request_timeout_ms: u64,
}

impl Default for WebDriverConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:4444".to_string(),
            browser: "chrome".to_string(),
            headless: true,
            args: Vec::new(),
            viewport_width: 1280,
            viewport_height: 720,
            request_timeout_ms: 30_000,
        }
    }
}

impl WebDriverConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Timeouts applied inside a single step. None of them cancels a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Fast-fail attach check of a recorded selector before healing
    pub heal_lookup_ms: u64,

    /// Attach wait for the winning healing candidate
    pub heal_attach_ms: u64,

    /// Attach wait before an element action
    pub action_ms: u64,

    /// Polling window of assertions
    pub assertion_ms: u64,

    pub navigation_ms: u64,

    /// Page settle wait after SUBMIT
    pub settle_ms: u64,

    /// WAIT duration when the step has no numeric value
    pub default_wait_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            heal_lookup_ms: 2_000,
            heal_attach_ms: 1_000,
            action_ms: 10_000,
            assertion_ms: 5_000,
            navigation_ms: 30_000,
            settle_ms: 5_000,
            default_wait_ms: 1_000,
        }
    }
}

impl TimeoutConfig {
    pub fn heal_lookup(&self) -> Duration {
        Duration::from_millis(self.heal_lookup_ms)
    }

    pub fn heal_attach(&self) -> Duration {
        Duration::from_millis(self.heal_attach_ms)
    }

    pub fn action(&self) -> Duration {
        Duration::from_millis(self.action_ms)
    }

    pub fn assertion(&self) -> Duration {
        Duration::from_millis(self.assertion_ms)
    }

    pub fn navigation(&self) -> Duration {
        Duration::from_millis(self.navigation_ms)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }
}

/// Run control configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    /// Re-check interval while a run is paused
    pub poll_interval_ms: u64,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 500,
        }
    }
}

impl ControlConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Screenshot configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScreenshotConfig {
    /// Wider captures are downscaled to this width
    pub max_width: u32,
}

impl Default for ScreenshotConfig {
    fn default() -> Self {
        Self { max_width: 1280 }
    }
}

impl EngineConfig {
    /// Load configuration from file
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = toml::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to file
    pub fn save(&self, path: &std::path::Path) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }
}
