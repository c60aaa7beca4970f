//! Flow execution error types

use extensions_bridge::BridgeError;
use thiserror::Error;

use crate::collaborators::CodeError;

/// Why a single step failed. `Display` is the code reported to observers.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FlowError {
    /// The page reported a failed action (`selector_not_found`, ...)
    #[error("{0}")]
    Action(String),

    /// Navigation landed on a page no script may run on
    #[error("non_scriptable_target")]
    NonScriptableTarget(String),

    #[error("navigation_failed: {0}")]
    NavigationFailed(String),

    #[error("navigation_timeout")]
    NavigationTimeout,

    /// The surface could not be reached or did not answer
    #[error("surface_unavailable: {0}")]
    Surface(#[from] BridgeError),

    #[error(transparent)]
    Code(#[from] CodeError),

    /// The variable store could not persist a value
    #[error("variable_store: {0}")]
    Variables(String),
}

/// Errors returned to whoever asks the supervisor for a run.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SupervisorError {
    /// Another run or single step holds the surface
    #[error("a flow is already running")]
    AlreadyRunning,

    #[error("step index {0} is out of range")]
    StepOutOfRange(usize),
}
