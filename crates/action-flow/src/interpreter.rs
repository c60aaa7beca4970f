//! Flow interpreter
//!
//! Walks the step tree depth first with a single cursor. Control steps (`If`,
//! `Restart`, `Wait`, navigation, audio, mailbox) run here; page steps are
//! shipped to the target surface. Restarts travel up as a [`StepSignal`] and
//! the top-level loop performs the jump.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use action_primitives::ActionOutcome;
use async_recursion::async_recursion;
use extensions_bridge::{BridgeError, SurfaceEvent, TargetSurface};
use flow_model::{
    interpolate, ActionSettings, Flow, IfStep, PageAction, RestartLimit, RestartMode, RestartStep,
    RunSettings, Step, WaitForEmailCodeStep,
};
use flowpilot_core_types::{BranchName, ExecutionPath, StepStatus};
use flowpilot_state_center::{ProgressEvent, RunOutcome, VariableStore};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::collaborators::{AudioPort, CodeSource, DEFAULT_AUDIO_TIMEOUT_MS};
use crate::errors::FlowError;
use crate::reporter::ProgressReporter;

/// Granularity of `Wait` steps; stop requests are honoured between slices.
pub const WAIT_TICK: Duration = Duration::from_millis(250);

/// Pause after attaching the executor before it is used.
pub const ATTACH_SETTLE: Duration = Duration::from_millis(100);

static FORBIDDEN_URL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^chrome(|-extension|-error)://|^edge://|chromewebstore\.google\.com")
        .expect("valid regex")
});

/// Pages the browser never lets scripts run on.
pub fn is_forbidden_url(url: &str) -> bool {
    FORBIDDEN_URL.is_match(url)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RestartTarget {
    Top,
    /// Top-level index of the `If` to resume at
    If(usize),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct StepFailure {
    pub path: ExecutionPath,
    pub error: String,
}

/// How a step (or step list) ended, as seen by the enclosing list.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StepSignal {
    Continue,
    Restart(RestartTarget),
    Abort,
    Failed(StepFailure),
}

/// Everything a run needs besides the flow itself.
#[derive(Clone)]
pub struct FlowServices {
    pub surface: Arc<dyn TargetSurface>,
    pub reporter: ProgressReporter,
    pub variables: Arc<VariableStore>,
    pub audio: Arc<dyn AudioPort>,
    pub codes: Arc<dyn CodeSource>,
}

/// Final state of one run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub outcome: RunOutcome,
    pub iteration: u64,
    pub last_error: Option<StepFailure>,
    #[serde(skip)]
    pub statuses: BTreeMap<ExecutionPath, StepStatus>,
}

impl RunReport {
    pub fn status(&self, path: &ExecutionPath) -> StepStatus {
        self.statuses.get(path).copied().unwrap_or_default()
    }
}

/// Per-run transient state. Discarded when the run ends.
#[derive(Debug, Default)]
struct RunState {
    statuses: BTreeMap<ExecutionPath, StepStatus>,
    countdowns: BTreeMap<ExecutionPath, u64>,
    iteration: u64,
    /// Remaining jumps per `Restart` path; unlimited restarts have no entry.
    budgets: HashMap<ExecutionPath, u32>,
}

pub struct FlowInterpreter {
    flow: Arc<Flow>,
    settings: RunSettings,
    services: FlowServices,
    cancel: CancellationToken,
}

impl FlowInterpreter {
    pub fn new(
        flow: Arc<Flow>,
        settings: RunSettings,
        services: FlowServices,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            flow,
            settings,
            services,
            cancel,
        }
    }

    /// Run the whole flow, restarts included, and report how it ended.
    #[instrument(skip_all, fields(flow = %self.flow.name))]
    pub async fn run(&self) -> RunReport {
        let mut state = RunState::default();
        let steps = &self.flow.steps;
        info!(target: "action-flow", steps = steps.len(), "flow started");
        self.report(ProgressEvent::FlowStarted {
            name: self.flow.name.clone(),
            step_count: steps.len(),
        })
        .await;
        self.reset_statuses(&mut state);

        let mut start = 0;
        loop {
            let signal = self
                .run_steps(steps, &ExecutionPath::root(), start, &mut state)
                .await;
            match signal {
                StepSignal::Continue => {
                    state.iteration += 1;
                    info!(target: "action-flow", iteration = state.iteration, "flow completed");
                    self.report(ProgressEvent::FlowCompleted {
                        iteration: state.iteration,
                    })
                    .await;
                    return finish(state, RunOutcome::Completed, None);
                }
                StepSignal::Restart(target) => {
                    state.iteration += 1;
                    info!(target: "action-flow", iteration = state.iteration, "restarting flow");
                    self.report(ProgressEvent::FlowReset {
                        step_count: steps.len(),
                        iteration: state.iteration,
                    })
                    .await;
                    // polling loops built from Restart are paced like any other step
                    if !self.pause(Duration::from_millis(self.settings.step_delay_ms)).await {
                        info!(target: "action-flow", "flow aborted");
                        self.report(ProgressEvent::FlowAborted).await;
                        return finish(state, RunOutcome::Aborted, None);
                    }
                    start = match target {
                        RestartTarget::If(index) if steps.get(index).is_some_and(Step::is_if) => {
                            index
                        }
                        RestartTarget::If(index) => {
                            debug!(target: "action-flow", index, "restart target is not an If; jumping to top");
                            0
                        }
                        RestartTarget::Top => 0,
                    };
                    self.reset_statuses(&mut state);
                }
                StepSignal::Abort => {
                    info!(target: "action-flow", "flow aborted");
                    self.report(ProgressEvent::FlowAborted).await;
                    return finish(state, RunOutcome::Aborted, None);
                }
                StepSignal::Failed(failure) => {
                    warn!(target: "action-flow", path = %failure.path, error = %failure.error, "flow failed");
                    self.report(ProgressEvent::FlowFailed {
                        path: failure.path.clone(),
                        error: failure.error.clone(),
                    })
                    .await;
                    return finish(state, RunOutcome::Failed, Some(failure));
                }
            }
        }
    }

    /// Run one step outside of a flow, addressed as top-level step `index`.
    pub async fn run_single(&self, step: &Step, index: usize) -> RunReport {
        let mut state = RunState::default();
        let path = ExecutionPath::top(index);
        if self.cancel.is_cancelled() {
            return finish(state, RunOutcome::Aborted, None);
        }
        self.set_status(&mut state, &path, StepStatus::Running, None)
            .await;
        match self.run_step(step, &path, &mut state).await {
            StepSignal::Abort => finish(state, RunOutcome::Aborted, None),
            StepSignal::Failed(failure) => finish(state, RunOutcome::Failed, Some(failure)),
            StepSignal::Continue | StepSignal::Restart(_) => {
                finish(state, RunOutcome::Completed, None)
            }
        }
    }

    #[async_recursion]
    async fn run_steps(
        &self,
        steps: &[Step],
        prefix: &ExecutionPath,
        start: usize,
        state: &mut RunState,
    ) -> StepSignal {
        for (index, step) in steps.iter().enumerate().skip(start) {
            if self.cancel.is_cancelled() {
                return StepSignal::Abort;
            }
            let path = prefix.with_index(index);
            debug!(target: "action-flow", %path, kind = step.kind(), "running step");
            self.set_status(state, &path, StepStatus::Running, None)
                .await;

            match self.run_step(step, &path, state).await {
                StepSignal::Continue => {}
                other => return other,
            }

            if !self.pause(Duration::from_millis(self.settings.step_delay_ms)).await {
                return StepSignal::Abort;
            }
        }
        StepSignal::Continue
    }

    /// Execute one step whose status is already `running` and record how it ended.
    async fn run_step(
        &self,
        step: &Step,
        path: &ExecutionPath,
        state: &mut RunState,
    ) -> StepSignal {
        let result = match step {
            Step::If(if_step) => return self.run_if(if_step, path, state).await,
            Step::Restart(restart) => {
                let target = self.take_restart(restart, path, state);
                self.set_status(state, path, StepStatus::Success, None)
                    .await;
                return match target {
                    Some(target) => {
                        debug!(target: "action-flow", %path, ?target, "restart fired");
                        StepSignal::Restart(target)
                    }
                    None => StepSignal::Continue,
                };
            }
            Step::Wait(wait) => {
                if !self.wait(wait.ms, path, state).await {
                    return StepSignal::Abort;
                }
                Ok(())
            }
            Step::GoToUrl(goto) => self.navigate(&goto.url).await,
            Step::FillText(fill) => {
                let mut fill = fill.clone();
                fill.value = interpolate(&fill.value, &self.services.variables.snapshot());
                self.page_action(PageAction::FillText(fill), self.settings.action_settings(step))
                    .await
                    .map(|_| ())
            }
            Step::CheckCondition(check) => self
                .page_action(
                    PageAction::CheckCondition(check.clone()),
                    self.settings.action_settings(step),
                )
                .await
                .map(|outcome| {
                    info!(target: "action-flow", %path, result = ?outcome.as_bool(), "condition checked");
                }),
            Step::Click(click) => self
                .page_action(PageAction::Click(click.clone()), self.settings.action_settings(step))
                .await
                .map(|_| ()),
            Step::SelectDropdown(dropdown) => self
                .page_action(
                    PageAction::SelectDropdown(dropdown.clone()),
                    self.settings.action_settings(step),
                )
                .await
                .map(|_| ()),
            Step::SelectFiles(files) => self
                .page_action(
                    PageAction::SelectFiles(files.clone()),
                    self.settings.action_settings(step),
                )
                .await
                .map(|_| ()),
            Step::WaitForEmailCode(mail) => self.wait_for_code(mail).await,
            Step::EnsureAudio(audio) => {
                let timeout = audio.timeout_ms.unwrap_or(DEFAULT_AUDIO_TIMEOUT_MS);
                if !self.services.audio.ensure_ready(timeout).await {
                    warn!(target: "action-flow", %path, "audio not ready; continuing without sound");
                }
                Ok(())
            }
            Step::PlaySound => {
                if !self.services.audio.play_chime().await {
                    warn!(target: "action-flow", %path, "chime playback failed");
                }
                Ok(())
            }
        };

        match result {
            Ok(()) => {
                self.set_status(state, path, StepStatus::Success, None)
                    .await;
                StepSignal::Continue
            }
            Err(err) => {
                let error = err.to_string();
                warn!(target: "action-flow", %path, kind = step.kind(), %error, "step failed");
                self.set_status(state, path, StepStatus::Error, Some(error.clone()))
                    .await;
                StepSignal::Failed(StepFailure {
                    path: path.clone(),
                    error,
                })
            }
        }
    }

    async fn run_if(&self, step: &IfStep, path: &ExecutionPath, state: &mut RunState) -> StepSignal {
        let settings = ActionSettings {
            selector_wait_ms: self.settings.selector_wait_ms,
            use_native_click: self.settings.use_native_click,
        };
        let taken = match self
            .page_action(PageAction::CheckCondition(step.condition()), settings)
            .await
        {
            Ok(outcome) => BranchName::from_condition(outcome.as_bool().unwrap_or(false)),
            Err(err) => {
                let error = err.to_string();
                self.set_status(state, path, StepStatus::Error, Some(error.clone()))
                    .await;
                return StepSignal::Failed(StepFailure {
                    path: path.clone(),
                    error,
                });
            }
        };
        debug!(target: "action-flow", %path, branch = %taken, "condition evaluated");
        self.report(ProgressEvent::BranchResult {
            path: path.clone(),
            taken,
        })
        .await;

        let branch = step.branch(taken);
        match self
            .run_steps(branch, &path.with_branch(taken), 0, state)
            .await
        {
            StepSignal::Continue => {}
            StepSignal::Failed(failure) => {
                // Only the branch stops; the failure is already on the nested step.
                warn!(target: "action-flow", %path, failed = %failure.path, "branch stopped after step failure");
            }
            signal @ (StepSignal::Abort | StepSignal::Restart(_)) => return signal,
        }
        self.set_status(state, path, StepStatus::Success, None)
            .await;
        StepSignal::Continue
    }

    /// Consume one unit of the restart budget, if any is left.
    fn take_restart(
        &self,
        step: &RestartStep,
        path: &ExecutionPath,
        state: &mut RunState,
    ) -> Option<RestartTarget> {
        if let RestartLimit::Times(max) = step.max {
            let remaining = state.budgets.entry(path.clone()).or_insert(max);
            if *remaining == 0 {
                debug!(target: "action-flow", %path, "restart budget exhausted");
                return None;
            }
            *remaining -= 1;
        }
        Some(match step.mode {
            RestartMode::Flow => RestartTarget::Top,
            RestartMode::If => RestartTarget::If(step.if_index),
        })
    }

    async fn wait(&self, ms: u64, path: &ExecutionPath, state: &mut RunState) -> bool {
        let total = Duration::from_millis(ms);
        let started = Instant::now();
        let mut last_reported = None;
        loop {
            let elapsed = started.elapsed();
            if elapsed >= total {
                break;
            }
            let remaining = total - elapsed;
            let seconds = remaining.as_millis().div_ceil(1_000) as u64;
            if last_reported != Some(seconds) {
                last_reported = Some(seconds);
                self.countdown(state, path, seconds).await;
            }
            tokio::select! {
                _ = self.cancel.cancelled() => return false,
                _ = sleep(remaining.min(WAIT_TICK)) => {}
            }
        }
        self.countdown(state, path, 0).await;
        true
    }

    /// Inter-step delay. `false` when a stop arrived meanwhile.
    async fn pause(&self, delay: Duration) -> bool {
        if delay.is_zero() {
            return !self.cancel.is_cancelled();
        }
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = sleep(delay) => true,
        }
    }

    async fn navigate(&self, url: &str) -> Result<(), FlowError> {
        if let Ok(parsed) = Url::parse(url) {
            if is_forbidden_url(parsed.as_str()) {
                return Err(FlowError::NonScriptableTarget(url.to_string()));
            }
        }
        let surface = &self.services.surface;
        let mut events = surface.subscribe();
        surface.navigate(url).await?;

        let timeout = Duration::from_millis(self.settings.navigation_timeout_ms);
        let completion = tokio::time::timeout(timeout, async {
            loop {
                match events.recv().await {
                    Ok(SurfaceEvent::NavigationComplete { ok, error, .. }) => {
                        return Ok((ok, error))
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        debug!(target: "action-flow", skipped, "surface events lagged");
                    }
                    Err(RecvError::Closed) => return Err(BridgeError::ChannelClosed),
                }
            }
        })
        .await
        .map_err(|_| FlowError::NavigationTimeout)?;
        let (ok, error) = completion?;
        if !ok {
            return Err(FlowError::NavigationFailed(
                error.unwrap_or_else(|| "load failed".to_string()),
            ));
        }

        let current = surface.current_url().await?;
        if is_forbidden_url(&current) {
            return Err(FlowError::NonScriptableTarget(current));
        }
        info!(target: "action-flow", url = %current, "navigation complete");
        self.ensure_executor().await
    }

    /// Ping the page executor and attach it when the ping fails.
    async fn ensure_executor(&self) -> Result<(), FlowError> {
        let surface = &self.services.surface;
        if surface.ping().await.is_ok() {
            return Ok(());
        }
        debug!(target: "action-flow", "executor not answering; attaching");
        surface.attach().await?;
        sleep(ATTACH_SETTLE).await;
        Ok(())
    }

    async fn page_action(
        &self,
        action: PageAction,
        settings: ActionSettings,
    ) -> Result<ActionOutcome, FlowError> {
        self.ensure_executor().await?;
        let outcome = self.services.surface.run_action(action, settings).await?;
        if outcome.ok {
            Ok(outcome)
        } else {
            Err(FlowError::Action(outcome.error_message()))
        }
    }

    async fn wait_for_code(&self, step: &WaitForEmailCodeStep) -> Result<(), FlowError> {
        info!(target: "action-flow", subject = %step.subject, variable = %step.variable, "waiting for email code");
        let code = self
            .services
            .codes
            .poll_for_code(&step.subject, step.timeout_ms, step.poll_ms)
            .await?;
        self.services
            .variables
            .set(&step.variable, code)
            .map_err(|err| FlowError::Variables(err.to_string()))?;
        info!(target: "action-flow", variable = %step.variable, "email code stored");
        Ok(())
    }

    async fn report(&self, event: ProgressEvent) {
        self.services.reporter.report(event).await;
    }

    async fn set_status(
        &self,
        state: &mut RunState,
        path: &ExecutionPath,
        status: StepStatus,
        message: Option<String>,
    ) {
        state.statuses.insert(path.clone(), status);
        if status.is_terminal() {
            state.countdowns.remove(path);
        }
        self.report(ProgressEvent::StepStatus {
            path: path.clone(),
            status,
            message,
        })
        .await;
    }

    async fn countdown(&self, state: &mut RunState, path: &ExecutionPath, seconds: u64) {
        state.countdowns.insert(path.clone(), seconds);
        self.report(ProgressEvent::WaitCountdown {
            path: path.clone(),
            seconds_remaining: seconds,
        })
        .await;
    }

    fn reset_statuses(&self, state: &mut RunState) {
        state.statuses = (0..self.flow.len())
            .map(|index| (ExecutionPath::top(index), StepStatus::Pending))
            .collect();
        state.countdowns.clear();
    }
}

fn finish(state: RunState, outcome: RunOutcome, last_error: Option<StepFailure>) -> RunReport {
    RunReport {
        outcome,
        iteration: state.iteration,
        last_error,
        statuses: state.statuses,
    }
}
