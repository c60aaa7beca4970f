//! Page action executor
//!
//! Five primitives run against the target page:
//! 1. click - locate the clickable element and fire a native or synthetic click
//! 2. fill - set text, type slowly, or spread a value across OTP boxes
//! 3. dropdown - open a combobox and activate the matching option
//! 4. files - attach decoded files to an input or drop zone
//! 5. condition - poll for existence or visibility

mod click;
mod condition;
mod dropdown;
mod files;
mod fill;

pub use click::*;
pub use condition::*;
pub use dropdown::*;
pub use files::*;
pub use fill::*;

use std::sync::Arc;
use std::time::Duration;

use flow_model::settings::DEFAULT_SELECTOR_WAIT_MS;
use flow_model::{ActionSettings, PageAction};
use tracing::{debug, instrument, warn};

use crate::errors::ActionFailure;
use crate::ports::{DomPort, NodeRef};
use crate::types::ActionOutcome;
use crate::waiting::{wait_for_selector, POLL_INTERVAL};

/// Runs [`PageAction`]s against one page through a [`DomPort`].
#[derive(Clone)]
pub struct ActionExecutor {
    dom: Arc<dyn DomPort>,
    poll_interval: Duration,
}

impl ActionExecutor {
    pub fn new(dom: Arc<dyn DomPort>) -> Self {
        Self {
            dom,
            poll_interval: POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn dom(&self) -> &dyn DomPort {
        self.dom.as_ref()
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Execute one action. Never fails: every problem becomes a failed outcome.
    #[instrument(skip_all, fields(action = action.kind(), selector = action.selector()))]
    pub async fn execute(&self, action: &PageAction, settings: &ActionSettings) -> ActionOutcome {
        let outcome: ActionOutcome = match action {
            PageAction::Click(step) => execute_click(self, step, settings).await.into(),
            PageAction::FillText(step) => execute_fill(self, step, settings).await.into(),
            PageAction::SelectDropdown(step) => execute_select_dropdown(self, step).await.into(),
            PageAction::SelectFiles(step) => execute_select_files(self, step, settings).await.into(),
            PageAction::CheckCondition(step) => check_condition(self, step).await.into(),
        };
        if outcome.ok {
            debug!("action completed");
        } else {
            warn!(error = %outcome.error_message(), "action failed");
        }
        outcome
    }

    /// Bounded wait for the first match of `selector`.
    pub(crate) async fn locate(&self, selector: &str, timeout: Duration) -> Option<NodeRef> {
        wait_for_selector(self.dom(), selector, timeout, self.poll_interval).await
    }

    pub(crate) async fn locate_or_fail(
        &self,
        selector: &str,
        settings: &ActionSettings,
    ) -> Result<NodeRef, ActionFailure> {
        self.locate(selector, selector_wait(settings))
            .await
            .ok_or(ActionFailure::SelectorNotFound)
    }
}

/// Selector wait budget; zero means "use the default".
pub fn selector_wait(settings: &ActionSettings) -> Duration {
    let millis = match settings.selector_wait_ms {
        0 => DEFAULT_SELECTOR_WAIT_MS,
        millis => millis,
    };
    Duration::from_millis(millis)
}

/// Worst-case time an action may legitimately spend polling and typing.
///
/// Transports add their own margin on top before giving up on the page.
pub fn action_budget(action: &PageAction, settings: &ActionSettings) -> Duration {
    match action {
        PageAction::Click(_) | PageAction::SelectFiles(_) => selector_wait(settings),
        PageAction::FillText(step) => {
            let typing = if step.slow_type {
                let chars = if step.split_across_inputs {
                    split_characters(&step.value).len()
                } else {
                    step.value.chars().count()
                };
                slow_type_delay(step) * chars as u32
            } else {
                Duration::ZERO
            };
            selector_wait(settings) + REVEAL_TIMEOUT + typing
        }
        // control lookup and option polling each get the full timeout
        PageAction::SelectDropdown(step) => dropdown_timeout(step) * 2,
        PageAction::CheckCondition(step) => Duration::from_millis(step.timeout_ms),
    }
}

/// Key code for a typed character: `Digit5`, `KeyA`, `Space`.
pub fn key_code(ch: char) -> Option<String> {
    if ch.is_ascii_digit() {
        Some(format!("Digit{ch}"))
    } else if ch.is_ascii_alphabetic() {
        Some(format!("Key{}", ch.to_ascii_uppercase()))
    } else if ch == ' ' {
        Some("Space".to_string())
    } else {
        None
    }
}
