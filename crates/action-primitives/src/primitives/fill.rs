//! Fill primitive - text entry in three flavours
//!
//! Plain mode assigns the value through the native setter and fires the
//! events frameworks listen for. Slow typing replays a key sequence per
//! character. Split mode spreads one value over a row of single-character
//! boxes (OTP inputs), re-polling while the row renders lazily.

use std::time::Duration;

use flow_model::{ActionSettings, FillTextStep};
use tokio::time::{sleep, Instant};
use tracing::{debug, info, trace};

use crate::errors::ActionFailure;
use crate::locator::{collect_inputs, editable_descendant, resolve_editable};
use crate::ports::{DomEvent, DomPort, NodeRef};
use crate::primitives::{key_code, selector_wait, ActionExecutor};
use crate::waiting::poll_until;

pub const DEFAULT_SLOW_TYPE_DELAY_MS: u64 = 100;

/// How long a wrapper gets to reveal its input after being clicked.
pub const REVEAL_TIMEOUT: Duration = Duration::from_millis(2_000);

pub async fn execute_fill(
    executor: &ActionExecutor,
    step: &FillTextStep,
    settings: &ActionSettings,
) -> Result<(), ActionFailure> {
    info!(
        selector = %step.selector,
        split = step.split_across_inputs,
        slow = step.slow_type,
        "filling text"
    );
    if step.split_across_inputs {
        fill_split(executor, step, settings).await
    } else {
        fill_single(executor, step, settings).await
    }
}

pub(crate) fn slow_type_delay(step: &FillTextStep) -> Duration {
    let millis = step
        .slow_type_delay_ms
        .filter(|ms| *ms > 0)
        .unwrap_or(DEFAULT_SLOW_TYPE_DELAY_MS);
    Duration::from_millis(millis)
}

/// Characters to distribute: the digits when there are any, otherwise everything.
pub fn split_characters(value: &str) -> Vec<char> {
    let digits: Vec<char> = value.chars().filter(char::is_ascii_digit).collect();
    if digits.is_empty() {
        value.chars().collect()
    } else {
        digits
    }
}

async fn fill_split(
    executor: &ActionExecutor,
    step: &FillTextStep,
    settings: &ActionSettings,
) -> Result<(), ActionFailure> {
    let dom = executor.dom();
    let started = Instant::now();
    let timeout = selector_wait(settings);
    let interval = executor.poll_interval();
    let delay = if step.slow_type {
        slow_type_delay(step)
    } else {
        Duration::ZERO
    };
    let chars = split_characters(&step.value);

    let mut inputs = collect_inputs(dom, &step.selector).await;
    while inputs.is_empty() && started.elapsed() <= timeout {
        sleep(interval).await;
        inputs = collect_inputs(dom, &step.selector).await;
    }
    if inputs.is_empty() {
        return Err(ActionFailure::SelectorNotFound);
    }

    for (index, ch) in chars.iter().copied().enumerate() {
        // Later boxes may still be rendering.
        while inputs.len() <= index && started.elapsed() <= timeout {
            sleep(interval).await;
            inputs = collect_inputs(dom, &step.selector).await;
        }
        let Some(node) = inputs.get(index) else {
            debug!(needed = chars.len(), found = inputs.len(), "ran out of input slots");
            return Err(ActionFailure::InsufficientInputs);
        };

        if step.slow_type {
            let _ = dom.focus(node).await;
            type_key(dom, node, "keydown", ch).await;
            type_key(dom, node, "keypress", ch).await;
            fire(dom, node, DomEvent::before_input("insertText", &ch.to_string())).await;
            let current = dom.value(node).await.unwrap_or_default();
            dom.set_value(node, &format!("{current}{ch}")).await?;
            fire(dom, node, DomEvent::Input).await;
            type_key(dom, node, "keyup", ch).await;
        } else {
            focus_and_set_value(dom, node, &ch.to_string()).await?;
        }

        if let Some(next) = inputs.get(index + 1) {
            let _ = dom.focus(next).await;
        }
        if !delay.is_zero() {
            sleep(delay).await;
        }
    }
    Ok(())
}

async fn fill_single(
    executor: &ActionExecutor,
    step: &FillTextStep,
    settings: &ActionSettings,
) -> Result<(), ActionFailure> {
    let dom = executor.dom();
    let base = executor.locate_or_fail(&step.selector, settings).await?;

    let mut target = resolve_editable(dom, &base).await?;
    if target.is_none() {
        // Date pickers and similar widgets only render the input once opened.
        if let Err(err) = dom.activate(&base).await {
            trace!(%err, "wrapper activation failed");
        }
        let wrapper = &base;
        target = poll_until(REVEAL_TIMEOUT, executor.poll_interval(), move || {
            editable_descendant(dom, wrapper)
        })
        .await;
    }
    let Some(target) = target else {
        return Err(ActionFailure::SelectorNotEditable);
    };

    if step.slow_type {
        type_slowly(dom, &target, &step.value, slow_type_delay(step)).await
    } else {
        focus_and_set_value(dom, &target, &step.value).await
    }
}

/// Key-by-key typing that replaces the current content without clearing it
/// first, so input masks see ordinary keystrokes.
async fn type_slowly(
    dom: &dyn DomPort,
    node: &NodeRef,
    value: &str,
    delay: Duration,
) -> Result<(), ActionFailure> {
    let _ = dom.focus(node).await;
    if let Ok(Some(_)) = dom.selection(node).await {
        let length = dom.value(node).await.unwrap_or_default().chars().count();
        let _ = dom.set_selection(node, 0, length).await;
    }

    for ch in value.chars() {
        let _ = dom.focus(node).await;
        type_key(dom, node, "keydown", ch).await;
        type_key(dom, node, "keypress", ch).await;
        fire(dom, node, DomEvent::before_input("insertText", &ch.to_string())).await;

        let current: Vec<char> = dom.value(node).await.unwrap_or_default().chars().collect();
        let (start, end) = dom
            .selection(node)
            .await
            .ok()
            .flatten()
            .unwrap_or((current.len(), current.len()));
        let start = start.min(current.len());
        let end = end.clamp(start, current.len());
        let mut next: String = current[..start].iter().collect();
        next.push(ch);
        next.extend(&current[end..]);
        dom.set_value(node, &next).await?;
        let _ = dom.set_selection(node, start + 1, start + 1).await;

        fire(dom, node, DomEvent::Input).await;
        type_key(dom, node, "keyup", ch).await;
        if !delay.is_zero() {
            sleep(delay).await;
        }
    }
    fire(dom, node, DomEvent::Change).await;
    Ok(())
}

/// Focus, assign and announce a value. Single characters typed into text
/// controls also get a key sequence, which OTP widgets often require.
pub async fn focus_and_set_value(
    dom: &dyn DomPort,
    node: &NodeRef,
    value: &str,
) -> Result<(), ActionFailure> {
    let info = dom.describe(node).await?;
    let _ = dom.focus(node).await;

    if info.is_text_control() {
        fire(dom, node, DomEvent::before_input("insertReplacementText", value)).await;
        dom.set_value(node, value).await?;
    } else if info.has_value {
        if let Err(err) = dom.set_value(node, value).await {
            trace!(%err, "custom element rejected value");
        }
    } else {
        dom.set_text(node, value).await?;
    }

    let mut chars = value.chars();
    if let (Some(ch), None) = (chars.next(), chars.next()) {
        if info.is_text_control() {
            let code = ch.is_ascii_digit().then(|| format!("Digit{ch}"));
            let key = ch.to_string();
            for kind in ["keydown", "keypress", "keyup"] {
                fire(dom, node, DomEvent::key(kind, &key, code.clone())).await;
            }
        }
    }

    fire(dom, node, DomEvent::Input).await;
    fire(dom, node, DomEvent::Change).await;
    Ok(())
}

async fn type_key(dom: &dyn DomPort, node: &NodeRef, kind: &str, ch: char) {
    fire(dom, node, DomEvent::key(kind, &ch.to_string(), key_code(ch))).await;
}

/// Dispatch and ignore rejection; listeners throwing must not stop typing.
async fn fire(dom: &dyn DomPort, node: &NodeRef, event: DomEvent) {
    if let Err(err) = dom.dispatch(node, event).await {
        trace!(%err, "event dispatch failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_prefers_digits() {
        assert_eq!(split_characters("Code: 48-29"), vec!['4', '8', '2', '9']);
        assert_eq!(split_characters("abc"), vec!['a', 'b', 'c']);
        assert!(split_characters("").is_empty());
    }

    #[test]
    fn zero_delay_uses_default() {
        let step = FillTextStep {
            selector: "#a".into(),
            value: "x".into(),
            split_across_inputs: false,
            slow_type: true,
            slow_type_delay_ms: Some(0),
        };
        assert_eq!(slow_type_delay(&step), Duration::from_millis(100));
    }
}
