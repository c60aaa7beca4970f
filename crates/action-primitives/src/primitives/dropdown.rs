//! Dropdown primitive - open a combobox and activate an option by text

use std::time::Duration;

use flow_model::sanitize::DEFAULT_DROPDOWN_TIMEOUT_MS;
use flow_model::SelectDropdownStep;
use tracing::{debug, info};

use crate::errors::ActionFailure;
use crate::ports::{DomEvent, DomPort, NodeRef};
use crate::primitives::ActionExecutor;
use crate::waiting::poll_until;

/// Option selector used when the step does not name one.
pub const DEFAULT_OPTION_SELECTOR: &str = "li,[role='option'],.dropdown-item,.agora-dropdown-option";

/// Inner label wrappers checked when the option's own text does not match.
const OPTION_LABEL_SELECTOR: &str = ".option-content, span, div";

const POPUP_ROOT_SELECTOR: &str = "[aria-controls]";

pub(crate) fn dropdown_timeout(step: &SelectDropdownStep) -> Duration {
    Duration::from_millis(match step.timeout_ms {
        0 => DEFAULT_DROPDOWN_TIMEOUT_MS,
        millis => millis,
    })
}

pub async fn execute_select_dropdown(
    executor: &ActionExecutor,
    step: &SelectDropdownStep,
) -> Result<(), ActionFailure> {
    let dom = executor.dom();
    let timeout = dropdown_timeout(step);

    let control = executor
        .locate(&step.control_selector, timeout)
        .await
        .ok_or(ActionFailure::ControlNotFound)?;
    info!(control = %step.control_selector, option = %step.option_text, "opening dropdown");
    press(dom, &control).await;

    let item_selector = step
        .option_item_selector
        .as_deref()
        .map(str::trim)
        .filter(|selector| !selector.is_empty())
        .unwrap_or(DEFAULT_OPTION_SELECTOR);
    let control_ref = &control;
    let items = poll_until(timeout, executor.poll_interval(), move || async move {
        find_items(dom, control_ref, item_selector).await
    })
    .await
    .ok_or(ActionFailure::OptionsNotFound)?;

    let wanted = step.option_text.trim().to_lowercase();
    let target = match_option(dom, &items, &wanted)
        .await
        .ok_or(ActionFailure::OptionNotFound)?;
    debug!(candidates = items.len(), "option matched");

    if let Err(err) = dom.scroll_into_view(&target).await {
        debug!(%err, "option scroll failed");
    }
    press(dom, &target).await;
    Ok(())
}

/// Options anywhere in the document, else near the control.
async fn find_items(dom: &dyn DomPort, control: &NodeRef, selector: &str) -> Option<Vec<NodeRef>> {
    if let Ok(items) = dom.query_all(None, selector).await {
        if !items.is_empty() {
            return Some(items);
        }
    }
    let root = match dom.closest(control, POPUP_ROOT_SELECTOR).await {
        Ok(Some(root)) => Some(root),
        _ => dom.parent(control).await.ok().flatten(),
    };
    dom.query_all(root.as_ref(), selector)
        .await
        .ok()
        .filter(|items| !items.is_empty())
}

/// Case-insensitive substring match on the option text, then on its first label wrapper.
async fn match_option(dom: &dyn DomPort, items: &[NodeRef], wanted: &str) -> Option<NodeRef> {
    for item in items {
        if normalized_text(dom, item).await.contains(wanted) {
            return Some(item.clone());
        }
    }
    for item in items {
        let Ok(Some(inner)) = dom.query(Some(item), OPTION_LABEL_SELECTOR).await else {
            continue;
        };
        if normalized_text(dom, &inner).await.contains(wanted) {
            return Some(item.clone());
        }
    }
    None
}

async fn normalized_text(dom: &dyn DomPort, node: &NodeRef) -> String {
    dom.text_content(node)
        .await
        .map(|text| text.trim().to_lowercase())
        .unwrap_or_default()
}

/// Focus, click twice (native `click()` and a synthetic event) and press Enter.
async fn press(dom: &dyn DomPort, node: &NodeRef) {
    let _ = dom.focus(node).await;
    let _ = dom.activate(node).await;
    let _ = dom.dispatch(node, DomEvent::mouse("click", (0.0, 0.0))).await;
    let _ = dom
        .dispatch(node, DomEvent::key("keydown", "Enter", Some("Enter".into())))
        .await;
}
