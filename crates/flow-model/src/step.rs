//! Step opcodes.
//!
//! Every variant serializes with a `type` discriminator and camelCase fields,
//! matching the persisted flow format.

use flowpilot_core_types::BranchName;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

fn is_false(value: &bool) -> bool {
    !*value
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Step {
    #[serde(rename = "GoToURL")]
    GoToUrl(GoToUrlStep),
    Wait(WaitStep),
    Click(ClickStep),
    FillText(FillTextStep),
    SelectDropdown(SelectDropdownStep),
    SelectFiles(SelectFilesStep),
    EnsureAudio(EnsureAudioStep),
    PlaySound,
    WaitForEmailCode(WaitForEmailCodeStep),
    If(IfStep),
    Restart(RestartStep),
    CheckCondition(CheckConditionStep),
}

impl Step {
    pub fn kind(&self) -> &'static str {
        match self {
            Step::GoToUrl(_) => "GoToURL",
            Step::Wait(_) => "Wait",
            Step::Click(_) => "Click",
            Step::FillText(_) => "FillText",
            Step::SelectDropdown(_) => "SelectDropdown",
            Step::SelectFiles(_) => "SelectFiles",
            Step::EnsureAudio(_) => "EnsureAudio",
            Step::PlaySound => "PlaySound",
            Step::WaitForEmailCode(_) => "WaitForEmailCode",
            Step::If(_) => "If",
            Step::Restart(_) => "Restart",
            Step::CheckCondition(_) => "CheckCondition",
        }
    }

    pub fn is_if(&self) -> bool {
        matches!(self, Step::If(_))
    }

    /// Number of steps in this subtree, the step itself included.
    pub fn subtree_len(&self) -> usize {
        match self {
            Step::If(step) => {
                1 + step
                    .then_steps
                    .iter()
                    .chain(step.else_steps.iter())
                    .map(Step::subtree_len)
                    .sum::<usize>()
            }
            _ => 1,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GoToUrlStep {
    pub url: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WaitStep {
    pub ms: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClickStep {
    pub selector: String,
    #[serde(default, skip_serializing_if = "is_false")]
    pub force_click: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FillTextStep {
    pub selector: String,
    #[serde(default)]
    pub value: String,
    #[serde(default, skip_serializing_if = "is_false")]
    pub split_across_inputs: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub slow_type: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slow_type_delay_ms: Option<u64>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectDropdownStep {
    pub control_selector: String,
    pub option_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub option_item_selector: Option<String>,
    pub timeout_ms: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SelectFilesStep {
    pub selector: String,
    #[serde(default)]
    pub files: Vec<FilePayload>,
}

/// A file pre-encoded as a data URL.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilePayload {
    pub name: String,
    #[serde(rename = "type")]
    pub mime: String,
    pub size: u64,
    pub data_url: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnsureAudioStep {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WaitForEmailCodeStep {
    pub subject: String,
    pub timeout_ms: u64,
    pub poll_ms: u64,
    pub variable: String,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConditionMode {
    #[default]
    Exists,
    Visible,
}

impl ConditionMode {
    pub fn as_str(self) -> &'static str {
        match self {
            ConditionMode::Exists => "exists",
            ConditionMode::Visible => "visible",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IfStep {
    pub mode: ConditionMode,
    pub selector: String,
    pub timeout_ms: u64,
    #[serde(rename = "then", default)]
    pub then_steps: Vec<Step>,
    #[serde(rename = "else", default)]
    pub else_steps: Vec<Step>,
}

impl IfStep {
    pub fn condition(&self) -> CheckConditionStep {
        CheckConditionStep {
            selector: self.selector.clone(),
            mode: self.mode,
            timeout_ms: self.timeout_ms,
        }
    }

    pub fn branch(&self, taken: BranchName) -> &[Step] {
        match taken {
            BranchName::Then => &self.then_steps,
            BranchName::Else => &self.else_steps,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RestartMode {
    #[default]
    Flow,
    If,
}

/// How many times a `Restart` may fire within one run.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum RestartLimit {
    Unlimited,
    Times(u32),
}

impl RestartLimit {
    pub fn as_i64(self) -> i64 {
        match self {
            RestartLimit::Unlimited => -1,
            RestartLimit::Times(times) => i64::from(times),
        }
    }
}

impl Serialize for RestartLimit {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(self.as_i64())
    }
}

impl<'de> Deserialize<'de> for RestartLimit {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = i64::deserialize(deserializer)?;
        match raw {
            -1 => Ok(RestartLimit::Unlimited),
            n if n > 0 => Ok(RestartLimit::Times(n.min(i64::from(u32::MAX)) as u32)),
            other => Err(serde::de::Error::custom(format!(
                "restart max must be -1 or positive, got {other}"
            ))),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestartStep {
    pub max: RestartLimit,
    pub mode: RestartMode,
    pub if_index: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckConditionStep {
    pub selector: String,
    pub mode: ConditionMode,
    pub timeout_ms: u64,
}

/// Leaf steps executed inside the page context.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PageAction {
    Click(ClickStep),
    FillText(FillTextStep),
    SelectDropdown(SelectDropdownStep),
    SelectFiles(SelectFilesStep),
    CheckCondition(CheckConditionStep),
}

impl PageAction {
    pub fn kind(&self) -> &'static str {
        match self {
            PageAction::Click(_) => "Click",
            PageAction::FillText(_) => "FillText",
            PageAction::SelectDropdown(_) => "SelectDropdown",
            PageAction::SelectFiles(_) => "SelectFiles",
            PageAction::CheckCondition(_) => "CheckCondition",
        }
    }

    pub fn selector(&self) -> &str {
        match self {
            PageAction::Click(step) => &step.selector,
            PageAction::FillText(step) => &step.selector,
            PageAction::SelectDropdown(step) => &step.control_selector,
            PageAction::SelectFiles(step) => &step.selector,
            PageAction::CheckCondition(step) => &step.selector,
        }
    }
}
