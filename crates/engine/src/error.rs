//! Error types for the execution engine

use thiserror::Error;

/// Errors surfaced to callers of `Orchestrator::execute`.
///
/// Everything that goes wrong once a run has started is recorded in the
/// returned `Execution` instead.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Scenario not found: {0}")]
    ScenarioNotFound(String),

    #[error("Store error: {0}")]
    Store(#[from] uiheal_common::Error),

    #[error("Browser setup error: {0}")]
    Browser(#[from] BrowserError),
}

pub type EngineResult<T> = Result<T, EngineError>;

/// Failure of a single step. Terminates the run and is recorded in its log.
#[derive(Error, Debug)]
pub enum StepError {
    #[error("Element not found: {selector} (waited {timeout_ms} ms)")]
    ElementNotFound { selector: String, timeout_ms: u64 },

    #[error("Frame not found: {0}")]
    FrameResolution(String),

    #[error("Assertion failed: {0}")]
    Assertion(String),

    #[error("Invalid step: {0}")]
    InvalidStep(String),

    #[error(transparent)]
    Browser(#[from] BrowserError),
}

pub type StepResult<T> = Result<T, StepError>;

/// Errors raised by a browser backend
#[derive(Error, Debug)]
pub enum BrowserError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("WebDriver error: {error} - {message}")]
    WebDriver { error: String, message: String },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Invalid selector: {0}")]
    InvalidSelector(String),

    #[error("No such element: {0}")]
    NoSuchElement(String),

    #[error("Navigation failed: {0}")]
    Navigation(String),

    #[error("Session closed")]
    SessionClosed,

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Decode error: {0}")]
    Decode(#[from] base64::DecodeError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type BrowserResult<T> = Result<T, BrowserError>;

/// Errors raised by the variable substitution service
#[derive(Error, Debug)]
pub enum VariableError {
    #[error("Unknown environment: {0}")]
    UnknownEnvironment(String),
}
