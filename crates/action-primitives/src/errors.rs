//! Error types for action primitives

use thiserror::Error;

/// Failures reported by a [`DomPort`](crate::DomPort) implementation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomError {
    /// The selector could not be parsed by the page
    #[error("invalid selector: {0}")]
    InvalidSelector(String),

    /// The node handle no longer refers to an attached element
    #[error("stale node: {0}")]
    StaleNode(String),

    /// The page or its execution context is gone
    #[error("page unavailable: {0}")]
    Unavailable(String),

    /// Script evaluation threw inside the page
    #[error("{0}")]
    Script(String),
}

/// Structured step failures. `Display` yields the wire code carried in
/// [`ActionOutcome::error`](crate::ActionOutcome).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ActionFailure {
    #[error("selector_not_found")]
    SelectorNotFound,

    #[error("selector_not_editable")]
    SelectorNotEditable,

    #[error("insufficient_inputs")]
    InsufficientInputs,

    #[error("control_not_found")]
    ControlNotFound,

    #[error("options_not_found")]
    OptionsNotFound,

    #[error("option_not_found")]
    OptionNotFound,

    #[error("no_files")]
    NoFiles,

    #[error("files_decode_failed")]
    FilesDecodeFailed,

    /// Anything thrown by the page while acting
    #[error(transparent)]
    Dom(#[from] DomError),
}

impl ActionFailure {
    /// Stable wire code for the failure.
    pub fn code(&self) -> String {
        self.to_string()
    }
}
