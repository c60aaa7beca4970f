use std::fmt;

use action_primitives::DomError;
use extensions_bridge::BridgeError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// High-level error categories surfaced by the adapter.
#[derive(Clone, Debug, Error, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdapterErrorKind {
    #[error("navigation timed out")]
    NavTimeout,
    #[error("navigation failed")]
    NavFailed,
    #[error("cdp i/o failure")]
    CdpIo,
    #[error("page script threw")]
    Script,
    #[error("remote object not found")]
    StaleObject,
    #[error("internal error")]
    Internal,
}

/// Enriched error metadata passed back to higher layers.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AdapterError {
    pub kind: AdapterErrorKind,
    pub hint: Option<String>,
    pub retriable: bool,
    pub data: Option<serde_json::Value>,
}

impl fmt::Display for AdapterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(hint) = &self.hint {
            write!(f, ": {}", hint)?;
        }
        Ok(())
    }
}

impl std::error::Error for AdapterError {}

impl AdapterError {
    pub fn new(kind: AdapterErrorKind) -> Self {
        Self {
            kind,
            hint: None,
            retriable: false,
            data: None,
        }
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn retriable(mut self, flag: bool) -> Self {
        self.retriable = flag;
        self
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    fn hint_text(&self) -> String {
        self.hint.clone().unwrap_or_else(|| self.kind.to_string())
    }
}

impl From<AdapterError> for BridgeError {
    fn from(err: AdapterError) -> Self {
        match err.kind {
            AdapterErrorKind::NavTimeout => BridgeError::Timeout,
            _ => BridgeError::Backend(err.to_string()),
        }
    }
}

impl From<AdapterError> for DomError {
    fn from(err: AdapterError) -> Self {
        let hint = err.hint_text();
        match err.kind {
            AdapterErrorKind::StaleObject => DomError::StaleNode(hint),
            AdapterErrorKind::Script if hint.contains("is not a valid selector") => {
                DomError::InvalidSelector(hint)
            }
            AdapterErrorKind::Script => DomError::Script(hint),
            _ => DomError::Unavailable(hint),
        }
    }
}
