//! Step model for FlowPilot.
//!
//! Pure data and validation: opcodes, their sanitization rules, flow loading
//! with a built-in fallback, run settings and `{{variable}}` interpolation.

pub mod errors;
pub mod flow;
pub mod sanitize;
pub mod settings;
pub mod step;
pub mod variables;

pub use errors::ModelError;
pub use flow::{load_active_flow, load_flow_file, save_flow_file, Flow, LoadReport};
pub use sanitize::{sanitize, sanitize_steps, Sanitizer};
pub use settings::{ActionSettings, RunSettings};
pub use step::{
    CheckConditionStep, ClickStep, ConditionMode, EnsureAudioStep, FilePayload, FillTextStep,
    GoToUrlStep, IfStep, PageAction, RestartLimit, RestartMode, RestartStep, SelectDropdownStep,
    SelectFilesStep, Step, WaitForEmailCodeStep, WaitStep,
};
pub use variables::{interpolate, placeholders};
