//! File primitive - attach files to an upload control

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use flow_model::sanitize::{DEFAULT_FILE_MIME, DEFAULT_FILE_NAME};
use flow_model::{ActionSettings, FilePayload, SelectFilesStep};
use tracing::{debug, info, warn};

use crate::errors::ActionFailure;
use crate::locator::{find_drop_target, find_file_input};
use crate::ports::{DecodedFile, DomEvent, DragPhase};
use crate::primitives::ActionExecutor;

const BASE64_MARKER: &str = "base64,";

/// Decode a `data:<mime>;base64,<payload>` URL. `None` for anything else.
pub fn decode_data_url(payload: &FilePayload) -> Option<DecodedFile> {
    let start = payload.data_url.find(BASE64_MARKER)? + BASE64_MARKER.len();
    let bytes = STANDARD.decode(payload.data_url[start..].trim()).ok()?;
    let name = match payload.name.trim() {
        "" => DEFAULT_FILE_NAME.to_string(),
        name => name.to_string(),
    };
    let mime = match payload.mime.trim() {
        "" => DEFAULT_FILE_MIME.to_string(),
        mime => mime.to_string(),
    };
    Some(DecodedFile { name, mime, bytes })
}

/// Try the file input's list first; when the page refuses, replay a
/// drag-and-drop on the nearest drop zone.
pub async fn execute_select_files(
    executor: &ActionExecutor,
    step: &SelectFilesStep,
    settings: &ActionSettings,
) -> Result<(), ActionFailure> {
    let dom = executor.dom();
    let base = executor.locate_or_fail(&step.selector, settings).await?;
    let input = find_file_input(dom, &base, &step.selector).await?;
    let drop_target = find_drop_target(dom, &base).await?.unwrap_or_else(|| base.clone());

    if step.files.is_empty() {
        return Err(ActionFailure::NoFiles);
    }
    let files: Vec<DecodedFile> = step.files.iter().filter_map(decode_data_url).collect();
    if files.is_empty() {
        return Err(ActionFailure::FilesDecodeFailed);
    }
    info!(selector = %step.selector, count = files.len(), "attaching files");

    let mut assigned = false;
    if let Some(input) = &input {
        let _ = dom.focus(input).await;
        assigned = dom.assign_files(input, &files).await.unwrap_or(false);
        let _ = dom.dispatch(input, DomEvent::Input).await;
        let _ = dom.dispatch(input, DomEvent::Change).await;
    }

    if !assigned {
        debug!("file list assignment refused; simulating drop");
        for phase in DragPhase::SEQUENCE {
            if let Err(err) = dom.dispatch_drag(&drop_target, phase, &files).await {
                warn!(phase = phase.as_str(), %err, "drag event failed");
                break;
            }
        }
    }
    Ok(())
}
