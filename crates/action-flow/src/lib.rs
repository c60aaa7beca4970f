//! Flow execution layer
//!
//! Interprets a [`flow_model::Flow`] against a target surface: nested
//! conditionals, bounded restarts, countdown waits and cooperative stop.
//! The [`RunSupervisor`] guarantees at most one run at a time and owns the
//! element picker session.

pub mod collaborators;
pub mod errors;
pub mod interpreter;
pub mod reporter;
pub mod supervisor;

pub use collaborators::{AudioPort, CodeError, CodeSource, NoMailbox, SilentAudio};
pub use errors::{FlowError, SupervisorError};
pub use flowpilot_state_center::{ProgressEvent, RunOutcome};
pub use interpreter::{
    is_forbidden_url, FlowInterpreter, FlowServices, RunReport, StepFailure, ATTACH_SETTLE,
    WAIT_TICK,
};
pub use reporter::ProgressReporter;
pub use supervisor::{
    PickerResult, PickerSession, RunGuard, RunHandle, RunSupervisor, SupervisorState,
};
