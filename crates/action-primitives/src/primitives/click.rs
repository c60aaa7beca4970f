//! Click primitive - native click with synthetic fallback

use flow_model::{ActionSettings, ClickStep};
use tracing::{debug, info, warn};

use crate::errors::{ActionFailure, DomError};
use crate::locator::find_clickable;
use crate::ports::{DomEvent, DomPort, NodeRef};
use crate::primitives::ActionExecutor;

/// Execute click primitive
///
/// Waits for the selector, climbs to the nearest clickable ancestor and
/// clicks its visual center. Failures after the element was found are
/// logged and absorbed: the click is fire-and-forget once targeted.
pub async fn execute_click(
    executor: &ActionExecutor,
    step: &ClickStep,
    settings: &ActionSettings,
) -> Result<(), ActionFailure> {
    let base = executor.locate_or_fail(&step.selector, settings).await?;
    let dom = executor.dom();
    let target = find_clickable(dom, &base).await?;
    let native = settings.use_native_click || step.force_click;

    info!(selector = %step.selector, native, "clicking element");
    let result = if native {
        robust_click(dom, &target).await
    } else {
        match dom.layout(&target).await {
            Ok(layout) => {
                synthetic_click(dom, &target, layout.center()).await;
                Ok(())
            }
            Err(err) => Err(err),
        }
    };
    if let Err(err) = result {
        warn!(selector = %step.selector, %err, "click dispatch failed");
    }
    Ok(())
}

/// Scroll into view, then try a trusted click; fall back to the synthetic sequence.
pub async fn robust_click(dom: &dyn DomPort, node: &NodeRef) -> Result<(), DomError> {
    if let Err(err) = dom.scroll_into_view(node).await {
        debug!(%err, "scroll into view failed");
    }
    let point = dom.layout(node).await?.center();
    match dom.native_click(point.0, point.1).await {
        Ok(()) => Ok(()),
        Err(err) => {
            debug!(%err, "native click unavailable; using synthetic events");
            synthetic_click(dom, node, point).await;
            Ok(())
        }
    }
}

/// Pointer and mouse sequence a real user click produces. If the page
/// rejects any event, `element.click()` is used instead.
pub async fn synthetic_click(dom: &dyn DomPort, node: &NodeRef, point: (f64, f64)) {
    if let Err(err) = dispatch_click_sequence(dom, node, point).await {
        debug!(%err, "synthetic click sequence failed; activating element");
        if let Err(err) = dom.activate(node).await {
            debug!(%err, "element activation failed");
        }
    }
}

async fn dispatch_click_sequence(
    dom: &dyn DomPort,
    node: &NodeRef,
    point: (f64, f64),
) -> Result<(), DomError> {
    dom.dispatch(node, DomEvent::pointer("pointerover", point)).await?;
    dom.dispatch(node, DomEvent::pointer("pointerenter", point)).await?;
    dom.dispatch(node, DomEvent::mouse("mouseover", point)).await?;
    dom.dispatch(node, DomEvent::mouse("mouseenter", point)).await?;
    dom.dispatch(node, DomEvent::pointer("pointerdown", point)).await?;
    dom.dispatch(node, DomEvent::mouse("mousedown", point)).await?;
    let _ = dom.focus(node).await;
    dom.dispatch(node, DomEvent::pointer("pointerup", point)).await?;
    dom.dispatch(node, DomEvent::mouse("mouseup", point)).await?;
    dom.dispatch(node, DomEvent::mouse("click", point)).await
}
