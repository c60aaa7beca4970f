//! Result type returned across the executor boundary

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::ActionFailure;

/// `{ok, value?, error?}` result of one page action.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionOutcome {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ActionOutcome {
    pub fn success() -> Self {
        Self {
            ok: true,
            ..Self::default()
        }
    }

    pub fn with_value(value: impl Into<Value>) -> Self {
        Self {
            ok: true,
            value: Some(value.into()),
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            value: None,
            error: Some(error.into()),
        }
    }

    /// Boolean payload, as produced by condition checks.
    pub fn as_bool(&self) -> Option<bool> {
        self.value.as_ref().and_then(Value::as_bool)
    }

    /// Error text for failed outcomes, with a generic code when the executor gave none.
    pub fn error_message(&self) -> String {
        self.error
            .clone()
            .unwrap_or_else(|| "step_failed".to_string())
    }
}

impl From<Result<(), ActionFailure>> for ActionOutcome {
    fn from(result: Result<(), ActionFailure>) -> Self {
        match result {
            Ok(()) => Self::success(),
            Err(failure) => Self::failure(failure.code()),
        }
    }
}

impl From<Result<bool, ActionFailure>> for ActionOutcome {
    fn from(result: Result<bool, ActionFailure>) -> Self {
        match result {
            Ok(flag) => Self::with_value(flag),
            Err(failure) => Self::failure(failure.code()),
        }
    }
}
