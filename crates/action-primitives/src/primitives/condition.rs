//! Condition primitive - existence and visibility checks

use std::time::Duration;

use flow_model::{CheckConditionStep, ConditionMode};

use crate::errors::ActionFailure;
use crate::ports::DomPort;
use crate::primitives::ActionExecutor;
use crate::waiting::poll_until;

/// Poll until the condition holds or `timeout_ms` elapses.
///
/// A zero timeout checks once. Query errors read as "not satisfied", so the
/// result is `Ok(false)` rather than a failure on timeout.
pub async fn check_condition(
    executor: &ActionExecutor,
    step: &CheckConditionStep,
) -> Result<bool, ActionFailure> {
    if step.selector.trim().is_empty() {
        return Ok(false);
    }
    let dom = executor.dom();
    let selector = step.selector.as_str();
    let mode = step.mode;
    let satisfied = poll_until(
        Duration::from_millis(step.timeout_ms),
        executor.poll_interval(),
        move || async move { test_once(dom, selector, mode).await.then_some(()) },
    )
    .await;
    Ok(satisfied.is_some())
}

async fn test_once(dom: &dyn DomPort, selector: &str, mode: ConditionMode) -> bool {
    let Ok(Some(node)) = dom.query(None, selector).await else {
        return false;
    };
    match mode {
        ConditionMode::Exists => true,
        ConditionMode::Visible => dom
            .layout(&node)
            .await
            .map(|layout| layout.is_visible())
            .unwrap_or(false),
    }
}
