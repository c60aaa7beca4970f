#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use action_flow::{CodeError, CodeSource, ProgressReporter, RunSupervisor};
use action_primitives::ActionOutcome;
use async_trait::async_trait;
use extensions_bridge::{BridgeError, SurfaceEvent, TargetSurface};
use flow_model::{
    ActionSettings, ClickStep, ConditionMode, FillTextStep, GoToUrlStep, IfStep, PageAction,
    RestartLimit, RestartMode, RestartStep, RunSettings, Step, WaitStep,
};
use flowpilot_state_center::VariableStore;
use parking_lot::Mutex;
use tokio::sync::broadcast;

/// Surface with a scripted page: a set of present selectors, optional
/// per-selector condition answers and a log of everything the page did.
pub struct ScriptedSurface {
    present: Mutex<HashSet<String>>,
    answers: Mutex<HashMap<String, VecDeque<bool>>>,
    redirects: Mutex<HashMap<String, String>>,
    url: Mutex<String>,
    attached: AtomicBool,
    log: Mutex<Vec<String>>,
    events: broadcast::Sender<SurfaceEvent>,
}

impl ScriptedSurface {
    pub fn new() -> Arc<Self> {
        let (events, _) = broadcast::channel(16);
        Arc::new(Self {
            present: Mutex::new(HashSet::new()),
            answers: Mutex::new(HashMap::new()),
            redirects: Mutex::new(HashMap::new()),
            url: Mutex::new("about:blank".into()),
            attached: AtomicBool::new(false),
            log: Mutex::new(Vec::new()),
            events,
        })
    }

    pub fn with(self: Arc<Self>, selector: &str) -> Arc<Self> {
        self.present.lock().insert(selector.to_string());
        self
    }

    /// Condition results for `selector`, consumed in order. Presence decides once they run out.
    pub fn answer(self: Arc<Self>, selector: &str, answers: &[bool]) -> Arc<Self> {
        self.answers
            .lock()
            .insert(selector.to_string(), answers.iter().copied().collect());
        self
    }

    pub fn redirect(self: Arc<Self>, from: &str, to: &str) -> Arc<Self> {
        self.redirects
            .lock()
            .insert(from.to_string(), to.to_string());
        self
    }

    pub fn log(&self) -> Vec<String> {
        self.log.lock().clone()
    }

    pub fn clicks(&self) -> Vec<String> {
        self.log()
            .into_iter()
            .filter_map(|line| line.strip_prefix("click ").map(str::to_string))
            .collect()
    }

    fn condition(&self, selector: &str) -> bool {
        if let Some(answer) = self
            .answers
            .lock()
            .get_mut(selector)
            .and_then(VecDeque::pop_front)
        {
            return answer;
        }
        self.present.lock().contains(selector)
    }
}

#[async_trait]
impl TargetSurface for ScriptedSurface {
    async fn ping(&self) -> Result<(), BridgeError> {
        if self.attached.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(BridgeError::NotAttached)
        }
    }

    async fn attach(&self) -> Result<(), BridgeError> {
        self.attached.store(true, Ordering::SeqCst);
        self.log.lock().push("attach".into());
        Ok(())
    }

    async fn navigate(&self, url: &str) -> Result<(), BridgeError> {
        self.attached.store(false, Ordering::SeqCst);
        let landed = self
            .redirects
            .lock()
            .get(url)
            .cloned()
            .unwrap_or_else(|| url.to_string());
        *self.url.lock() = landed.clone();
        self.log.lock().push(format!("navigate {url}"));
        let _ = self.events.send(SurfaceEvent::NavigationComplete {
            url: landed,
            ok: true,
            error: None,
        });
        Ok(())
    }

    async fn current_url(&self) -> Result<String, BridgeError> {
        Ok(self.url.lock().clone())
    }

    async fn run_action(
        &self,
        action: PageAction,
        _settings: ActionSettings,
    ) -> Result<ActionOutcome, BridgeError> {
        if !self.attached.load(Ordering::SeqCst) {
            return Err(BridgeError::NotAttached);
        }
        let outcome = match &action {
            PageAction::CheckCondition(check) => {
                ActionOutcome::with_value(self.condition(&check.selector))
            }
            other if !self.present.lock().contains(other.selector()) => {
                ActionOutcome::failure("selector_not_found")
            }
            PageAction::Click(click) => {
                self.log.lock().push(format!("click {}", click.selector));
                ActionOutcome::success()
            }
            PageAction::FillText(fill) => {
                self.log
                    .lock()
                    .push(format!("fill {}={}", fill.selector, fill.value));
                ActionOutcome::success()
            }
            other => {
                self.log.lock().push(format!("{} {}", other.kind(), other.selector()));
                ActionOutcome::success()
            }
        };
        Ok(outcome)
    }

    fn subscribe(&self) -> broadcast::Receiver<SurfaceEvent> {
        self.events.subscribe()
    }
}

/// Mailbox that always has the same code.
pub struct FixedCode(pub &'static str);

#[async_trait]
impl CodeSource for FixedCode {
    async fn poll_for_code(
        &self,
        _subject: &str,
        _timeout_ms: u64,
        _poll_ms: u64,
    ) -> Result<String, CodeError> {
        Ok(self.0.to_string())
    }
}

pub fn quick_settings() -> RunSettings {
    RunSettings {
        step_delay_ms: 0,
        ..RunSettings::default()
    }
}

pub fn supervisor() -> RunSupervisor {
    RunSupervisor::new(
        ProgressReporter::detached(),
        Arc::new(VariableStore::in_memory()),
    )
    .with_settings(quick_settings())
}

pub fn click(selector: &str) -> Step {
    Step::Click(ClickStep {
        selector: selector.into(),
        force_click: false,
    })
}

pub fn fill(selector: &str, value: &str) -> Step {
    Step::FillText(FillTextStep {
        selector: selector.into(),
        value: value.into(),
        split_across_inputs: false,
        slow_type: false,
        slow_type_delay_ms: None,
    })
}

pub fn wait(ms: u64) -> Step {
    Step::Wait(WaitStep { ms })
}

pub fn goto(url: &str) -> Step {
    Step::GoToUrl(GoToUrlStep { url: url.into() })
}

pub fn restart(max: RestartLimit) -> Step {
    Step::Restart(RestartStep {
        max,
        mode: RestartMode::Flow,
        if_index: 0,
    })
}

pub fn restart_to_if(max: RestartLimit, if_index: usize) -> Step {
    Step::Restart(RestartStep {
        max,
        mode: RestartMode::If,
        if_index,
    })
}

pub fn if_exists(selector: &str, timeout_ms: u64, then_steps: Vec<Step>, else_steps: Vec<Step>) -> Step {
    Step::If(IfStep {
        mode: ConditionMode::Exists,
        selector: selector.into(),
        timeout_ms,
        then_steps,
        else_steps,
    })
}
