use std::fs;
use std::path::{Path, PathBuf};

use flowpilot_core_types::{ExecutionPath, PathToken};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::errors::ModelError;
use crate::sanitize::Sanitizer;
use crate::step::{EnsureAudioStep, GoToUrlStep, Step, WaitStep};

pub const DEFAULT_FLOW_NAME: &str = "Example Flow";
pub const UNTITLED_FLOW_NAME: &str = "Untitled flow";

/// A named, ordered list of top-level steps.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Flow {
    pub name: String,
    pub steps: Vec<Step>,
}

impl Flow {
    pub fn new(name: impl Into<String>, steps: Vec<Step>) -> Self {
        Self {
            name: name.into(),
            steps,
        }
    }

    /// Built-in flow used when nothing usable is configured.
    pub fn fallback() -> Self {
        Self::new(
            DEFAULT_FLOW_NAME,
            vec![
                Step::GoToUrl(GoToUrlStep {
                    url: "https://example.com".into(),
                }),
                Step::Wait(WaitStep { ms: 800 }),
                Step::EnsureAudio(EnsureAudioStep {
                    timeout_ms: Some(60_000),
                }),
                Step::PlaySound,
            ],
        )
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Steps in the whole tree, branch children included.
    pub fn total_steps(&self) -> usize {
        self.steps.iter().map(Step::subtree_len).sum()
    }

    /// Resolve a structural path to the step it addresses.
    pub fn step_at(&self, path: &ExecutionPath) -> Option<&Step> {
        let mut list: &[Step] = &self.steps;
        let mut current: Option<&Step> = None;
        for token in path.tokens() {
            match token {
                PathToken::Index(index) => current = Some(list.get(*index)?),
                PathToken::Branch(branch) => match current? {
                    Step::If(step) => list = step.branch(*branch),
                    _ => return None,
                },
            }
        }
        current
    }

    /// Sanitize a raw document: `{name, steps}` or a bare step array.
    pub fn from_value(raw: &Value) -> Result<LoadReport, ModelError> {
        let (name, steps_raw) = match raw {
            Value::Array(_) => (None, raw),
            Value::Object(obj) => (
                obj.get("name")
                    .and_then(Value::as_str)
                    .map(str::trim)
                    .filter(|name| !name.is_empty())
                    .map(str::to_string),
                obj.get("steps").ok_or(ModelError::Shape)?,
            ),
            _ => return Err(ModelError::Shape),
        };

        let mut sanitizer = Sanitizer::default();
        let steps = sanitizer.steps(steps_raw);
        let dropped = sanitizer.dropped();
        if steps.is_empty() {
            warn!(target: "flow-model", dropped, "flow has no usable steps; using built-in flow");
            return Ok(LoadReport {
                flow: Flow::fallback(),
                dropped,
                fell_back: true,
            });
        }

        Ok(LoadReport {
            flow: Flow::new(name.unwrap_or_else(|| UNTITLED_FLOW_NAME.to_string()), steps),
            dropped,
            fell_back: false,
        })
    }
}

impl Default for Flow {
    fn default() -> Self {
        Self::fallback()
    }
}

/// Outcome of loading a flow document.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadReport {
    pub flow: Flow,
    pub dropped: usize,
    pub fell_back: bool,
}

/// Parse a JSON or YAML flow file. Errors are surfaced to the caller.
pub fn load_flow_file(path: &Path) -> Result<LoadReport, ModelError> {
    let content = fs::read_to_string(path).map_err(|source| ModelError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let raw = parse_document(path, &content)?;
    Flow::from_value(&raw)
}

/// Load the flow for a run; any problem falls back to the built-in flow.
pub fn load_active_flow(path: Option<&Path>) -> LoadReport {
    let fallback = || LoadReport {
        flow: Flow::fallback(),
        dropped: 0,
        fell_back: true,
    };
    let Some(path) = path else {
        info!(target: "flow-model", "no flow configured; using built-in flow");
        return fallback();
    };
    match load_flow_file(path) {
        Ok(report) => {
            info!(
                target: "flow-model",
                path = %path.display(),
                steps = report.flow.len(),
                dropped = report.dropped,
                "loaded flow"
            );
            report
        }
        Err(err) => {
            warn!(target: "flow-model", path = %path.display(), %err, "flow load failed; using built-in flow");
            fallback()
        }
    }
}

/// Write a flow as pretty JSON.
pub fn save_flow_file(path: &Path, flow: &Flow) -> Result<PathBuf, ModelError> {
    let body = serde_json::to_string_pretty(flow)?;
    fs::write(path, body).map_err(|source| ModelError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(path.to_path_buf())
}

fn parse_document(path: &Path, content: &str) -> Result<Value, ModelError> {
    let is_yaml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml"))
        .unwrap_or(false);
    if is_yaml {
        Ok(serde_yaml::from_str(content)?)
    } else {
        Ok(serde_json::from_str(content)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowpilot_core_types::BranchName;
    use serde_json::json;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn empty_flow_falls_back_to_default() {
        let report = Flow::from_value(&json!({
            "name": "broken",
            "steps": [{ "type": "Click" }, { "type": "nope" }]
        }))
        .unwrap();
        assert!(report.fell_back);
        assert_eq!(report.dropped, 2);
        assert_eq!(report.flow, Flow::fallback());
    }

    #[test]
    fn bare_arrays_are_accepted() {
        let report = Flow::from_value(&json!([{ "type": "PlaySound" }])).unwrap();
        assert_eq!(report.flow.name, UNTITLED_FLOW_NAME);
        assert_eq!(report.flow.steps, vec![Step::PlaySound]);
        assert!(Flow::from_value(&json!("steps")).is_err());
    }

    #[test]
    fn step_at_walks_branches() {
        let report = Flow::from_value(&json!({
            "name": "nested",
            "steps": [
                { "type": "Wait", "ms": 1 },
                { "type": "If", "selector": "#a", "then": [
                    { "type": "Wait", "ms": 2 },
                    { "type": "Wait", "ms": 3 }
                ]}
            ]
        }))
        .unwrap();
        let flow = report.flow;
        let path = ExecutionPath::top(1).child(BranchName::Then, 1);
        assert_eq!(flow.step_at(&path), Some(&Step::Wait(WaitStep { ms: 3 })));
        assert!(flow
            .step_at(&ExecutionPath::top(0).child(BranchName::Then, 0))
            .is_none());
        assert_eq!(flow.total_steps(), 4);
    }

    #[test]
    fn loads_yaml_files() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "name: yaml flow\nsteps:\n  - type: Click\n    selector: '#go'\n  - type: Wait\n    ms: 50"
        )
        .unwrap();
        let report = load_flow_file(file.path()).unwrap();
        assert_eq!(report.flow.name, "yaml flow");
        assert_eq!(report.flow.len(), 2);
    }

    #[test]
    fn unreadable_active_flow_falls_back() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{{ not json").unwrap();
        let report = load_active_flow(Some(file.path()));
        assert!(report.fell_back);
        assert_eq!(report.flow, Flow::fallback());
    }
}
