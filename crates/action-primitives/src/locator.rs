//! Element resolution heuristics shared by the primitives
//!
//! Authored selectors often land on a wrapper, an icon inside a button, or a
//! container around a group of OTP boxes. These helpers walk from what the
//! selector matched to the element that should actually receive the action.

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use crate::errors::DomError;
use crate::ports::{DomPort, NodeInfo, NodeRef};

/// Ancestors inspected (the start node included) when looking for a better target.
pub const ANCESTOR_DEPTH: usize = 5;

pub const EDITABLE_SELECTOR: &str = "input,textarea,[contenteditable=\"true\"]";
pub const FILE_INPUT_SELECTOR: &str = "input[type='file']";
pub const LABEL_FOR_SELECTOR: &str = "label[for]";

const CLICKABLE_INPUT_TYPES: [&str; 7] = [
    "button", "submit", "checkbox", "radio", "file", "image", "reset",
];
const CLICKABLE_CLASSES: [&str; 3] = ["btn", "button", "agora-btn"];

const DROP_ZONE_DESCENDANTS: &str = "[dropzone],[data-dropzone],.dropzone,.drop-zone,.file-drop,.uploader,.upload-area,.dz-clickable,[class*=\"drag\"]";

static DROP_ZONE_CLASS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(dropzone|drop-zone|file-drop|uploader|upload[-_ ]area|dz-clickable|drag[- ]?and[- ]?drop|dragdrop)",
    )
    .expect("valid regex")
});

/// Whether an element reacts to clicks on its own.
pub fn is_clickable(info: &NodeInfo) -> bool {
    match info.tag.as_str() {
        "button" | "a" | "summary" => return true,
        "input" => {
            let kind = info.input_type.as_deref().unwrap_or("text");
            return CLICKABLE_INPUT_TYPES.contains(&kind);
        }
        _ => {}
    }
    if info
        .role
        .as_deref()
        .is_some_and(|role| role.eq_ignore_ascii_case("button"))
    {
        return true;
    }
    CLICKABLE_CLASSES.iter().any(|class| info.has_class(class)) || info.has_click_handler
}

pub fn is_drop_zone(info: &NodeInfo) -> bool {
    info.drop_zone_attr || DROP_ZONE_CLASS.is_match(&info.class_name.to_lowercase())
}

/// Nearest clickable element among `node` and its ancestors, else `node` itself.
pub async fn find_clickable(dom: &dyn DomPort, node: &NodeRef) -> Result<NodeRef, DomError> {
    let mut current = Some(node.clone());
    for _ in 0..ANCESTOR_DEPTH {
        let Some(candidate) = current else { break };
        if is_clickable(&dom.describe(&candidate).await?) {
            return Ok(candidate);
        }
        current = dom.parent(&candidate).await?;
    }
    Ok(node.clone())
}

/// Drop zone near `base`: the element itself, an ancestor, or a marked descendant of either.
pub async fn find_drop_target(
    dom: &dyn DomPort,
    base: &NodeRef,
) -> Result<Option<NodeRef>, DomError> {
    let mut current = Some(base.clone());
    for _ in 0..ANCESTOR_DEPTH {
        let Some(candidate) = current else { break };
        if is_drop_zone(&dom.describe(&candidate).await?) {
            return Ok(Some(candidate));
        }
        if let Some(inner) = dom.query(Some(&candidate), DROP_ZONE_DESCENDANTS).await? {
            return Ok(Some(inner));
        }
        current = dom.parent(&candidate).await?;
    }
    Ok(None)
}

/// File input for an upload control: the base itself, a descendant, or a
/// document-level `<selector> input[type=file]` match.
pub async fn find_file_input(
    dom: &dyn DomPort,
    base: &NodeRef,
    selector: &str,
) -> Result<Option<NodeRef>, DomError> {
    if dom.describe(base).await?.is_file_input() {
        return Ok(Some(base.clone()));
    }
    if let Some(inner) = dom.query(Some(base), FILE_INPUT_SELECTOR).await? {
        return Ok(Some(inner));
    }
    let scoped = format!("{selector} {FILE_INPUT_SELECTOR}");
    Ok(dom.query(None, &scoped).await.unwrap_or_default())
}

/// Resolve a wrapper to the editable element it stands for, without
/// clicking. Tries the base, its first editable descendant, then a
/// `label[for]` inside or right before the base.
pub async fn resolve_editable(
    dom: &dyn DomPort,
    base: &NodeRef,
) -> Result<Option<NodeRef>, DomError> {
    if dom.describe(base).await?.is_editable() {
        return Ok(Some(base.clone()));
    }
    if let Some(inner) = editable_descendant(dom, base).await {
        return Ok(Some(inner));
    }

    let mut label = dom.query(Some(base), LABEL_FOR_SELECTOR).await.unwrap_or_default();
    if label.is_none() {
        if let Some(sibling) = dom.previous_sibling(base).await? {
            let info = dom.describe(&sibling).await?;
            if info.tag == "label" && info.html_for.is_some() {
                label = Some(sibling);
            }
        }
    }
    let Some(label) = label else {
        return Ok(None);
    };
    let Some(target_id) = dom.describe(&label).await?.html_for.filter(|id| !id.is_empty()) else {
        return Ok(None);
    };
    let Some(target) = dom.element_by_id(&target_id).await? else {
        return Ok(None);
    };
    if dom.describe(&target).await?.is_editable() {
        debug!(label_for = %target_id, "editable resolved through label");
        return Ok(Some(target));
    }
    Ok(None)
}

pub async fn editable_descendant(dom: &dyn DomPort, base: &NodeRef) -> Option<NodeRef> {
    dom.query(Some(base), EDITABLE_SELECTOR).await.ok().flatten()
}

/// Slots for split-across-inputs filling, single-character boxes first.
///
/// Elements matched by `selector` that are editable themselves win; otherwise
/// the editable descendants of every match are used.
pub async fn collect_inputs(dom: &dyn DomPort, selector: &str) -> Vec<NodeRef> {
    let Ok(matches) = dom.query_all(None, selector).await else {
        return Vec::new();
    };

    let mut scored = Vec::new();
    for node in &matches {
        if let Ok(info) = dom.describe(node).await {
            if info.is_editable() {
                scored.push((node.clone(), info.max_length));
            }
        }
    }
    if scored.is_empty() {
        for container in &matches {
            let Ok(found) = dom.query_all(Some(container), EDITABLE_SELECTOR).await else {
                continue;
            };
            for node in found {
                let max_length = match dom.describe(&node).await {
                    Ok(info) => info.max_length,
                    Err(_) => continue,
                };
                scored.push((node, max_length));
            }
        }
    }

    // Stable: original order is kept within each group.
    scored.sort_by_key(|(_, max_length)| if *max_length == Some(1) { 0 } else { 1 });
    scored.into_iter().map(|(node, _)| node).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn element(tag: &str) -> NodeInfo {
        NodeInfo::element(tag)
    }

    #[test]
    fn clickable_rules() {
        assert!(is_clickable(&element("button")));
        assert!(!is_clickable(&element("input")));
        let checkbox = NodeInfo {
            input_type: Some("checkbox".into()),
            ..element("input")
        };
        assert!(is_clickable(&checkbox));
        let styled = NodeInfo {
            class_name: "card agora-btn".into(),
            ..element("div")
        };
        assert!(is_clickable(&styled));
        let role = NodeInfo {
            role: Some("Button".into()),
            ..element("span")
        };
        assert!(is_clickable(&role));
        assert!(!is_clickable(&element("span")));
    }

    #[test]
    fn drop_zone_classes() {
        let zone = NodeInfo {
            class_name: "Upload_Area big".into(),
            ..element("div")
        };
        assert!(is_drop_zone(&zone));
        let dnd = NodeInfo {
            class_name: "drag and drop".into(),
            ..element("div")
        };
        assert!(is_drop_zone(&dnd));
        assert!(!is_drop_zone(&element("div")));
    }
}
