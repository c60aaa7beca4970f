use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::step::Step;

pub const DEFAULT_STEP_DELAY_MS: u64 = 300;
pub const DEFAULT_SELECTOR_WAIT_MS: u64 = 5_000;
pub const DEFAULT_NAVIGATION_TIMEOUT_MS: u64 = 30_000;

/// Run-wide knobs applied by the interpreter.
///
/// Deserialization always goes through [`RunSettings::sanitize`], so a config
/// file can never carry a zero navigation timeout or a non-numeric delay.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "Value")]
pub struct RunSettings {
    pub step_delay_ms: u64,
    pub selector_wait_ms: u64,
    pub use_native_click: bool,
    pub navigation_timeout_ms: u64,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            step_delay_ms: DEFAULT_STEP_DELAY_MS,
            selector_wait_ms: DEFAULT_SELECTOR_WAIT_MS,
            use_native_click: false,
            navigation_timeout_ms: DEFAULT_NAVIGATION_TIMEOUT_MS,
        }
    }
}

impl From<Value> for RunSettings {
    fn from(raw: Value) -> Self {
        Self::sanitize(&raw)
    }
}

impl RunSettings {
    /// Lenient parse of user-edited settings; bad fields keep their defaults.
    pub fn sanitize(raw: &Value) -> Self {
        let defaults = Self::default();
        let Some(obj) = raw.as_object() else {
            return defaults;
        };
        let millis = |key: &str, min: f64| {
            obj.get(key)
                .and_then(|value| match value {
                    Value::Number(number) => number.as_f64(),
                    Value::String(raw) => raw.trim().parse::<f64>().ok(),
                    _ => None,
                })
                .filter(|value| value.is_finite() && *value >= min)
                .map(|value| value.floor() as u64)
        };
        Self {
            step_delay_ms: millis("stepDelayMs", 0.0).unwrap_or(defaults.step_delay_ms),
            selector_wait_ms: millis("selectorWaitMs", 0.0).unwrap_or(defaults.selector_wait_ms),
            use_native_click: obj
                .get("useNativeClick")
                .and_then(Value::as_bool)
                .unwrap_or(defaults.use_native_click),
            navigation_timeout_ms: millis("navigationTimeoutMs", 1.0)
                .unwrap_or(defaults.navigation_timeout_ms),
        }
    }

    /// Settings shipped with a page action, merged with the step's own overrides.
    pub fn action_settings(&self, step: &Step) -> ActionSettings {
        let force_click = matches!(step, Step::Click(click) if click.force_click);
        ActionSettings {
            selector_wait_ms: self.selector_wait_ms,
            use_native_click: self.use_native_click || force_click,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionSettings {
    pub selector_wait_ms: u64,
    pub use_native_click: bool,
}

impl Default for ActionSettings {
    fn default() -> Self {
        Self {
            selector_wait_ms: DEFAULT_SELECTOR_WAIT_MS,
            use_native_click: false,
        }
    }
}
