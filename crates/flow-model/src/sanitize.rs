//! Total normalization of raw, user-edited step JSON.
//!
//! A raw step either normalizes into a fully typed [`Step`] or is dropped.
//! Dropping is logged and counted, never fatal to the surrounding flow.

use serde_json::{Map, Value};
use tracing::warn;

use crate::step::*;

pub const DEFAULT_WAIT_MS: u64 = 1_000;
pub const DEFAULT_DROPDOWN_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_EMAIL_TIMEOUT_MS: u64 = 120_000;
pub const DEFAULT_EMAIL_POLL_MS: u64 = 5_000;
pub const MIN_EMAIL_POLL_MS: u64 = 500;
pub const DEFAULT_CODE_VARIABLE: &str = "otp";
pub const DEFAULT_FILE_NAME: &str = "file";
pub const DEFAULT_FILE_MIME: &str = "application/octet-stream";

/// Normalize one raw step, or `None` when a required field is missing.
pub fn sanitize(raw: &Value) -> Option<Step> {
    Sanitizer::default().step(raw)
}

/// Normalize a raw step array, dropping invalid entries. Non-arrays yield nothing.
pub fn sanitize_steps(raw: &Value) -> Vec<Step> {
    Sanitizer::default().steps(raw)
}

/// Sanitizes steps while counting how many were dropped, nested ones included.
#[derive(Debug, Default)]
pub struct Sanitizer {
    dropped: usize,
}

impl Sanitizer {
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    pub fn steps(&mut self, raw: &Value) -> Vec<Step> {
        let Some(items) = raw.as_array() else {
            return Vec::new();
        };
        items.iter().filter_map(|item| self.step(item)).collect()
    }

    pub fn step(&mut self, raw: &Value) -> Option<Step> {
        let result = self.normalize(raw);
        if result.is_none() {
            self.dropped += 1;
        }
        result
    }

    fn normalize(&mut self, raw: &Value) -> Option<Step> {
        let Some(obj) = raw.as_object() else {
            warn!(target: "flow-model", "dropping step: not an object");
            return None;
        };
        let kind = obj
            .get("type")
            .and_then(Value::as_str)
            .map(str::trim)
            .unwrap_or_default();

        match kind {
            "GoToURL" => required(obj, kind, "url").map(|url| Step::GoToUrl(GoToUrlStep { url })),
            "Wait" => Some(Step::Wait(WaitStep {
                ms: non_negative(obj, "ms").unwrap_or(DEFAULT_WAIT_MS),
            })),
            "Click" => required(obj, kind, "selector").map(|selector| {
                Step::Click(ClickStep {
                    selector,
                    force_click: flag(obj, "forceClick"),
                })
            }),
            "FillText" => required(obj, kind, "selector").map(|selector| {
                Step::FillText(FillTextStep {
                    selector,
                    value: stringify(obj.get("value")),
                    split_across_inputs: flag(obj, "splitAcrossInputs"),
                    slow_type: flag(obj, "slowType"),
                    slow_type_delay_ms: non_negative(obj, "slowTypeDelayMs"),
                })
            }),
            "SelectDropdown" => {
                let control_selector = required(obj, kind, "controlSelector")?;
                let option_text = required(obj, kind, "optionText")?;
                Some(Step::SelectDropdown(SelectDropdownStep {
                    control_selector,
                    option_text,
                    option_item_selector: text(obj, "optionItemSelector"),
                    timeout_ms: positive(obj, "timeoutMs").unwrap_or(DEFAULT_DROPDOWN_TIMEOUT_MS),
                }))
            }
            "SelectFiles" => required(obj, kind, "selector").map(|selector| {
                Step::SelectFiles(SelectFilesStep {
                    selector,
                    files: files(obj.get("files")),
                })
            }),
            "EnsureAudio" => Some(Step::EnsureAudio(EnsureAudioStep {
                timeout_ms: positive(obj, "timeoutMs"),
            })),
            "PlaySound" => Some(Step::PlaySound),
            "WaitForEmailCode" | "WaitForEmailGmail" => {
                required(obj, kind, "subject").map(|subject| {
                    Step::WaitForEmailCode(WaitForEmailCodeStep {
                        subject,
                        timeout_ms: positive(obj, "timeoutMs").unwrap_or(DEFAULT_EMAIL_TIMEOUT_MS),
                        poll_ms: positive(obj, "pollMs")
                            .unwrap_or(DEFAULT_EMAIL_POLL_MS)
                            .max(MIN_EMAIL_POLL_MS),
                        variable: text(obj, "variable")
                            .unwrap_or_else(|| DEFAULT_CODE_VARIABLE.to_string()),
                    })
                })
            }
            "If" => {
                let selector = required(obj, kind, "selector")?;
                Some(Step::If(IfStep {
                    mode: mode(obj),
                    selector,
                    timeout_ms: non_negative(obj, "timeoutMs").unwrap_or(0),
                    then_steps: self.branch(obj.get("then")),
                    else_steps: self.branch(obj.get("else")),
                }))
            }
            "Restart" => Some(Step::Restart(RestartStep {
                max: restart_limit(obj.get("max")),
                mode: match text(obj, "mode").as_deref() {
                    Some(raw) if raw.eq_ignore_ascii_case("if") => RestartMode::If,
                    _ => RestartMode::Flow,
                },
                if_index: non_negative(obj, "ifIndex").unwrap_or(0) as usize,
            })),
            "CheckCondition" => required(obj, kind, "selector").map(|selector| {
                Step::CheckCondition(CheckConditionStep {
                    selector,
                    mode: mode(obj),
                    timeout_ms: non_negative(obj, "timeoutMs").unwrap_or(0),
                })
            }),
            other => {
                warn!(target: "flow-model", step_type = other, "dropping step: unknown type");
                None
            }
        }
    }

    fn branch(&mut self, raw: Option<&Value>) -> Vec<Step> {
        raw.map(|value| self.steps(value)).unwrap_or_default()
    }
}

fn required(obj: &Map<String, Value>, kind: &str, key: &str) -> Option<String> {
    let value = text(obj, key);
    if value.is_none() {
        warn!(target: "flow-model", step_type = kind, field = key, "dropping step: missing required field");
    }
    value
}

/// Trimmed, non-empty string field.
fn text(obj: &Map<String, Value>, key: &str) -> Option<String> {
    obj.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

fn stringify(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(raw)) => raw.clone(),
        Some(other) => other.to_string(),
    }
}

/// JSON numbers and numeric strings; anything else is not a number.
fn number(value: Option<&Value>) -> Option<f64> {
    let parsed = match value? {
        Value::Number(number) => number.as_f64(),
        Value::String(raw) => {
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                None
            } else {
                trimmed.parse::<f64>().ok()
            }
        }
        _ => None,
    }?;
    parsed.is_finite().then_some(parsed)
}

fn non_negative(obj: &Map<String, Value>, key: &str) -> Option<u64> {
    number(obj.get(key))
        .filter(|value| *value >= 0.0)
        .map(|value| value.floor() as u64)
}

fn positive(obj: &Map<String, Value>, key: &str) -> Option<u64> {
    number(obj.get(key))
        .filter(|value| *value > 0.0)
        .map(|value| value.floor() as u64)
        .filter(|value| *value > 0)
}

fn flag(obj: &Map<String, Value>, key: &str) -> bool {
    match obj.get(key) {
        None | Some(Value::Null) => false,
        Some(Value::Bool(value)) => *value,
        Some(Value::Number(number)) => number.as_f64().map(|v| v != 0.0 && !v.is_nan()).unwrap_or(false),
        Some(Value::String(raw)) => !raw.is_empty(),
        Some(Value::Array(_)) | Some(Value::Object(_)) => true,
    }
}

fn mode(obj: &Map<String, Value>) -> ConditionMode {
    match text(obj, "mode") {
        Some(raw) if raw.eq_ignore_ascii_case("visible") => ConditionMode::Visible,
        _ => ConditionMode::Exists,
    }
}

fn restart_limit(raw: Option<&Value>) -> RestartLimit {
    match number(raw) {
        Some(value) if value == -1.0 => RestartLimit::Unlimited,
        Some(value) if value >= 1.0 => {
            RestartLimit::Times(value.floor().min(f64::from(u32::MAX)) as u32)
        }
        _ => RestartLimit::Times(1),
    }
}

fn files(raw: Option<&Value>) -> Vec<FilePayload> {
    let Some(items) = raw.and_then(Value::as_array) else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| {
            let obj = item.as_object()?;
            let data_url = text(obj, "dataUrl")?;
            Some(FilePayload {
                name: text(obj, "name").unwrap_or_else(|| DEFAULT_FILE_NAME.to_string()),
                mime: text(obj, "type").unwrap_or_else(|| DEFAULT_FILE_MIME.to_string()),
                size: non_negative(obj, "size").unwrap_or(0),
                data_url,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn drops_steps_missing_required_fields() {
        assert!(sanitize(&json!({ "type": "Click", "selector": "   " })).is_none());
        assert!(sanitize(&json!({ "type": "FillText" })).is_none());
        assert!(sanitize(&json!({ "type": "GoToURL", "url": 42 })).is_none());
        assert!(sanitize(&json!({ "type": "Teleport" })).is_none());
        assert!(sanitize(&json!("Click")).is_none());
    }

    #[test]
    fn wait_falls_back_to_default() {
        let cases = [json!("abc"), json!(-5), json!(null), json!("  ")];
        for ms in cases {
            let step = sanitize(&json!({ "type": "Wait", "ms": ms })).unwrap();
            assert_eq!(step, Step::Wait(WaitStep { ms: DEFAULT_WAIT_MS }));
        }
        let step = sanitize(&json!({ "type": "Wait", "ms": "250" })).unwrap();
        assert_eq!(step, Step::Wait(WaitStep { ms: 250 }));
    }

    #[test]
    fn email_step_defaults_and_poll_floor() {
        let step = sanitize(&json!({
            "type": "WaitForEmailGmail",
            "subject": " Your code ",
            "pollMs": 100
        }))
        .unwrap();
        assert_eq!(
            step,
            Step::WaitForEmailCode(WaitForEmailCodeStep {
                subject: "Your code".into(),
                timeout_ms: DEFAULT_EMAIL_TIMEOUT_MS,
                poll_ms: MIN_EMAIL_POLL_MS,
                variable: DEFAULT_CODE_VARIABLE.into(),
            })
        );
    }

    #[test]
    fn restart_max_normalization() {
        let limit = |max: Value| match sanitize(&json!({ "type": "Restart", "max": max })) {
            Some(Step::Restart(step)) => step.max,
            other => panic!("unexpected {other:?}"),
        };
        assert_eq!(limit(json!(-1)), RestartLimit::Unlimited);
        assert_eq!(limit(json!(0)), RestartLimit::Times(1));
        assert_eq!(limit(json!(-3)), RestartLimit::Times(1));
        assert_eq!(limit(json!("x")), RestartLimit::Times(1));
        assert_eq!(limit(json!(3.7)), RestartLimit::Times(3));
    }

    #[test]
    fn if_branches_drop_invalid_children_individually() {
        let mut sanitizer = Sanitizer::default();
        let step = sanitizer
            .step(&json!({
                "type": "If",
                "mode": "VISIBLE",
                "selector": "#banner",
                "then": [{ "type": "Click", "selector": "" }, { "type": "PlaySound" }],
                "else": "nope"
            }))
            .unwrap();
        let Step::If(step) = step else {
            panic!("expected If");
        };
        assert_eq!(step.mode, ConditionMode::Visible);
        assert_eq!(step.then_steps, vec![Step::PlaySound]);
        assert!(step.else_steps.is_empty());
        assert_eq!(sanitizer.dropped(), 1);
    }

    #[test]
    fn fill_text_stringifies_value_and_strips_unknown_fields() {
        let step = sanitize(&json!({
            "type": "FillText",
            "selector": "#otp",
            "value": 123456,
            "splitAcrossInputs": "yes",
            "bogus": true
        }))
        .unwrap();
        let raw = serde_json::to_value(&step).unwrap();
        assert_eq!(
            raw,
            json!({
                "type": "FillText",
                "selector": "#otp",
                "value": "123456",
                "splitAcrossInputs": true
            })
        );
    }

    #[test]
    fn files_without_data_are_skipped() {
        let step = sanitize(&json!({
            "type": "SelectFiles",
            "selector": "#upload",
            "files": [{ "name": "a.txt" }, { "dataUrl": "data:text/plain;base64,aGk=" }]
        }))
        .unwrap();
        let Step::SelectFiles(step) = step else {
            panic!("expected SelectFiles");
        };
        assert_eq!(step.files.len(), 1);
        assert_eq!(step.files[0].name, DEFAULT_FILE_NAME);
        assert_eq!(step.files[0].mime, DEFAULT_FILE_MIME);
    }

    #[test]
    fn sanitize_is_stable_over_serialization() {
        let raw = json!([
            { "type": "GoToURL", "url": "https://example.com" },
            { "type": "Wait", "ms": 800 },
            { "type": "Click", "selector": "#go", "forceClick": true },
            { "type": "FillText", "selector": "#q", "value": "{{otp}}", "slowType": true, "slowTypeDelayMs": 40 },
            { "type": "SelectDropdown", "controlSelector": "#country", "optionText": "turkey" },
            { "type": "EnsureAudio", "timeoutMs": 60000 },
            { "type": "PlaySound" },
            { "type": "WaitForEmailCode", "subject": "code", "timeoutMs": 30000, "pollMs": 1000, "variable": "pin" },
            {
                "type": "If", "mode": "exists", "selector": "#a", "timeoutMs": 500,
                "then": [
                    { "type": "If", "mode": "visible", "selector": "#b", "timeoutMs": 0,
                      "then": [{ "type": "Restart", "max": -1, "mode": "if", "ifIndex": 8 }],
                      "else": [] }
                ],
                "else": [{ "type": "Wait", "ms": 10 }]
            },
            { "type": "CheckCondition", "selector": "#c", "mode": "visible", "timeoutMs": 100 },
            { "type": "Restart", "max": 2, "mode": "flow", "ifIndex": 0 }
        ]);
        let first = sanitize_steps(&raw);
        assert_eq!(first.len(), 11);

        let serialized = serde_json::to_value(&first).unwrap();
        let second = sanitize_steps(&serialized);
        assert_eq!(first, second);
    }
}
