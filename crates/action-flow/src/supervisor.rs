//! Run supervisor
//!
//! Owns the single-run guard, the stop token of the active run and the
//! element picker session. A second start while a run (or single step) holds
//! the guard is rejected, never queued.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use extensions_bridge::TargetSurface;
use flow_model::{load_active_flow, Flow, RunSettings, Step};
use flowpilot_core_types::{RequestId, RunId};
use flowpilot_state_center::{MirrorSnapshot, ProgressEvent, VariableStore};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::collaborators::{AudioPort, CodeSource, NoMailbox, SilentAudio};
use crate::errors::SupervisorError;
use crate::interpreter::{FlowInterpreter, FlowServices, RunReport};
use crate::reporter::ProgressReporter;

/// Holds the run flag for as long as it lives.
#[derive(Debug)]
pub struct RunGuard {
    flag: Arc<AtomicBool>,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

/// A started run.
pub struct RunHandle {
    pub run_id: RunId,
    cancel: CancellationToken,
    join: JoinHandle<RunReport>,
}

impl RunHandle {
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub async fn wait(self) -> RunReport {
        match self.join.await {
            Ok(report) => report,
            Err(err) => {
                error!(target: "action-flow", run_id = %self.run_id, %err, "run task ended abnormally");
                RunReport {
                    outcome: flowpilot_state_center::RunOutcome::Aborted,
                    iteration: 0,
                    last_error: None,
                    statuses: Default::default(),
                }
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PickerSession {
    pub tab: String,
    pub request_id: RequestId,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PickerResult {
    pub request_id: RequestId,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Answer to a state query.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SupervisorState {
    pub running: bool,
    pub picker: Option<PickerSession>,
    pub last_pick: Option<PickerResult>,
    pub mirror: MirrorSnapshot,
}

pub struct RunSupervisor {
    running: Arc<AtomicBool>,
    cancel: Mutex<Option<CancellationToken>>,
    picker: Mutex<Option<PickerSession>>,
    last_pick: Mutex<Option<PickerResult>>,
    settings: RunSettings,
    flow_path: Option<PathBuf>,
    reporter: ProgressReporter,
    variables: Arc<VariableStore>,
    audio: Arc<dyn AudioPort>,
    codes: Arc<dyn CodeSource>,
}

impl RunSupervisor {
    pub fn new(reporter: ProgressReporter, variables: Arc<VariableStore>) -> Self {
        Self {
            running: Arc::new(AtomicBool::new(false)),
            cancel: Mutex::new(None),
            picker: Mutex::new(None),
            last_pick: Mutex::new(None),
            settings: RunSettings::default(),
            flow_path: None,
            reporter,
            variables,
            audio: Arc::new(SilentAudio),
            codes: Arc::new(NoMailbox),
        }
    }

    pub fn with_settings(mut self, settings: RunSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Flow file loaded by [`RunSupervisor::start_active`].
    pub fn with_flow_path(mut self, path: Option<PathBuf>) -> Self {
        self.flow_path = path;
        self
    }

    pub fn with_audio(mut self, audio: Arc<dyn AudioPort>) -> Self {
        self.audio = audio;
        self
    }

    pub fn with_code_source(mut self, codes: Arc<dyn CodeSource>) -> Self {
        self.codes = codes;
        self
    }

    pub fn reporter(&self) -> &ProgressReporter {
        &self.reporter
    }

    pub fn settings(&self) -> &RunSettings {
        &self.settings
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn acquire(&self) -> Result<RunGuard, SupervisorError> {
        self.running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| SupervisorError::AlreadyRunning)?;
        Ok(RunGuard {
            flag: self.running.clone(),
        })
    }

    fn interpreter(
        &self,
        flow: Arc<Flow>,
        surface: Arc<dyn TargetSurface>,
        cancel: CancellationToken,
    ) -> FlowInterpreter {
        let services = FlowServices {
            surface,
            reporter: self.reporter.clone(),
            variables: self.variables.clone(),
            audio: self.audio.clone(),
            codes: self.codes.clone(),
        };
        FlowInterpreter::new(flow, self.settings.clone(), services, cancel)
    }

    fn arm(&self) -> CancellationToken {
        let cancel = CancellationToken::new();
        *self.cancel.lock() = Some(cancel.clone());
        cancel
    }

    /// Start `flow` in the background. Fails at once while another run is active.
    pub fn start(
        &self,
        flow: Flow,
        surface: Arc<dyn TargetSurface>,
    ) -> Result<RunHandle, SupervisorError> {
        let guard = self.acquire()?;
        let run_id = RunId::new();
        let cancel = self.arm();
        let interpreter = self.interpreter(Arc::new(flow), surface, cancel.clone());
        info!(target: "action-flow", %run_id, "run accepted");

        let join = tokio::spawn(async move {
            let _guard = guard;
            interpreter.run().await
        });
        Ok(RunHandle {
            run_id,
            cancel,
            join,
        })
    }

    /// Load the configured flow (or the built-in one) and start it.
    pub fn start_active(&self, surface: Arc<dyn TargetSurface>) -> Result<RunHandle, SupervisorError> {
        if self.is_running() {
            return Err(SupervisorError::AlreadyRunning);
        }
        let report = load_active_flow(self.flow_path.as_deref());
        if report.dropped > 0 {
            warn!(target: "action-flow", dropped = report.dropped, "flow contained invalid steps");
        }
        self.start(report.flow, surface)
    }

    /// Ask the active run to stop at its next step or tick boundary.
    pub fn request_stop(&self) -> bool {
        if !self.is_running() {
            return false;
        }
        if let Some(cancel) = self.cancel.lock().as_ref() {
            info!(target: "action-flow", "stop requested");
            cancel.cancel();
        }
        true
    }

    pub fn query_state(&self) -> SupervisorState {
        SupervisorState {
            running: self.is_running(),
            picker: self.picker.lock().clone(),
            last_pick: self.last_pick.lock().clone(),
            mirror: self.reporter.mirror().snapshot(),
        }
    }

    /// Execute one step on its own, holding the run guard while it runs.
    pub async fn run_single_step(
        &self,
        step: Step,
        index: usize,
        surface: Arc<dyn TargetSurface>,
    ) -> Result<RunReport, SupervisorError> {
        let _guard = self.acquire()?;
        let cancel = self.arm();
        let flow = Arc::new(Flow::new("single step", vec![step.clone()]));
        let interpreter = self.interpreter(flow, surface, cancel);
        info!(target: "action-flow", index, kind = step.kind(), "running single step");
        let report = interpreter.run_single(&step, index).await;
        if let Some(failure) = &report.last_error {
            self.reporter
                .report(ProgressEvent::FlowFailed {
                    path: failure.path.clone(),
                    error: failure.error.clone(),
                })
                .await;
        }
        Ok(report)
    }

    /// Open a picker session on `tab`, replacing any earlier one.
    pub fn start_picker(&self, tab: impl Into<String>, request_id: RequestId) -> PickerSession {
        let session = PickerSession {
            tab: tab.into(),
            request_id,
        };
        let previous = self.picker.lock().replace(session.clone());
        if let Some(previous) = previous {
            info!(target: "action-flow", request_id = %previous.request_id, "picker session replaced");
        }
        session
    }

    /// Record a picker result. The session closes only when the request id matches.
    pub fn finish_picker(&self, result: PickerResult) -> bool {
        let mut picker = self.picker.lock();
        let matches = picker
            .as_ref()
            .is_some_and(|session| session.request_id == result.request_id);
        if matches {
            *picker = None;
        } else {
            warn!(target: "action-flow", request_id = %result.request_id, "picker result for unknown session");
        }
        drop(picker);
        *self.last_pick.lock() = Some(result);
        matches
    }
}
