//! [`DomPort`] over CDP remote objects.
//!
//! Node handles are `Runtime` object ids. Every element operation is a
//! `Runtime.callFunctionOn` against that id; handles die with the document
//! they came from and then surface as stale nodes.

use std::sync::Arc;

use action_primitives::{
    DecodedFile, DomError, DomEvent, DomPort, DragPhase, Layout, NodeInfo, NodeRef,
};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::trace;

use crate::error::{AdapterError, AdapterErrorKind};
use crate::scripts;
use crate::transport::{CdpTransport, CommandTarget};

/// Object group every handle is created in, released on navigation.
pub const OBJECT_GROUP: &str = "flowpilot";

pub struct ChromiumDom {
    transport: Arc<dyn CdpTransport>,
    session: String,
}

impl ChromiumDom {
    pub fn new(transport: Arc<dyn CdpTransport>, session: impl Into<String>) -> Self {
        Self {
            transport,
            session: session.into(),
        }
    }

    async fn send(&self, method: &str, params: Value) -> Result<Value, AdapterError> {
        let response = self
            .transport
            .send_command(CommandTarget::Session(self.session.clone()), method, params)
            .await?;
        check_exception(&response)?;
        Ok(response)
    }

    async fn call(
        &self,
        object_id: &str,
        function: &str,
        args: Vec<Value>,
        by_value: bool,
    ) -> Result<Value, AdapterError> {
        let arguments: Vec<Value> = args.into_iter().map(|value| json!({ "value": value })).collect();
        let response = self
            .send(
                "Runtime.callFunctionOn",
                json!({
                    "objectId": object_id,
                    "functionDeclaration": function,
                    "arguments": arguments,
                    "returnByValue": by_value,
                    "objectGroup": OBJECT_GROUP,
                }),
            )
            .await?;
        Ok(response.get("result").cloned().unwrap_or(Value::Null))
    }

    async fn call_value<T: DeserializeOwned>(
        &self,
        node: &NodeRef,
        function: &str,
        args: Vec<Value>,
    ) -> Result<T, DomError> {
        let remote = self.call(node.as_str(), function, args, true).await?;
        let value = remote.get("value").cloned().unwrap_or(Value::Null);
        serde_json::from_value(value).map_err(|err| DomError::Script(err.to_string()))
    }

    async fn call_unit(&self, node: &NodeRef, function: &str, args: Vec<Value>) -> Result<(), DomError> {
        self.call(node.as_str(), function, args, true).await?;
        Ok(())
    }

    async fn call_node(
        &self,
        object_id: &str,
        function: &str,
        args: Vec<Value>,
    ) -> Result<Option<NodeRef>, DomError> {
        let remote = self.call(object_id, function, args, false).await?;
        Ok(remote_node(&remote))
    }

    async fn document(&self) -> Result<String, DomError> {
        let response = self
            .send(
                "Runtime.evaluate",
                json!({ "expression": "document", "objectGroup": OBJECT_GROUP }),
            )
            .await?;
        response
            .pointer("/result/objectId")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| DomError::Unavailable("document handle missing".into()))
    }

    async fn scope_object(&self, scope: Option<&NodeRef>) -> Result<String, DomError> {
        match scope {
            Some(node) => Ok(node.as_str().to_string()),
            None => self.document().await,
        }
    }
}

fn check_exception(response: &Value) -> Result<(), AdapterError> {
    let Some(details) = response.get("exceptionDetails") else {
        return Ok(());
    };
    let message = details
        .pointer("/exception/description")
        .or_else(|| details.get("text"))
        .and_then(Value::as_str)
        .unwrap_or("script exception");
    Err(AdapterError::new(AdapterErrorKind::Script).with_hint(message))
}

fn remote_node(remote: &Value) -> Option<NodeRef> {
    if remote.get("subtype").and_then(Value::as_str) == Some("null") {
        return None;
    }
    remote
        .get("objectId")
        .and_then(Value::as_str)
        .map(NodeRef::new)
}

/// Array elements from a `Runtime.getProperties` listing, in index order.
fn indexed_nodes(properties: &Value) -> Vec<NodeRef> {
    let mut entries: Vec<(usize, NodeRef)> = properties
        .get("result")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|prop| {
            let index = prop.get("name")?.as_str()?.parse::<usize>().ok()?;
            let node = remote_node(prop.get("value")?)?;
            Some((index, node))
        })
        .collect();
    entries.sort_by_key(|(index, _)| *index);
    entries.into_iter().map(|(_, node)| node).collect()
}

fn file_args(files: &[DecodedFile]) -> Value {
    Value::Array(
        files
            .iter()
            .map(|file| {
                json!({
                    "name": file.name,
                    "mime": file.mime,
                    "data": STANDARD.encode(&file.bytes),
                })
            })
            .collect(),
    )
}

#[async_trait]
impl DomPort for ChromiumDom {
    async fn query_all(
        &self,
        scope: Option<&NodeRef>,
        selector: &str,
    ) -> Result<Vec<NodeRef>, DomError> {
        let target = self.scope_object(scope).await?;
        let array = self
            .call(&target, scripts::QUERY_ALL, vec![json!(selector)], false)
            .await?;
        let Some(array_id) = array.get("objectId").and_then(Value::as_str) else {
            return Ok(Vec::new());
        };
        let properties = self
            .send(
                "Runtime.getProperties",
                json!({ "objectId": array_id, "ownProperties": true }),
            )
            .await?;
        if let Err(err) = self
            .send("Runtime.releaseObject", json!({ "objectId": array_id }))
            .await
        {
            trace!(target: "cdp-dom", %err, "array release failed");
        }
        Ok(indexed_nodes(&properties))
    }

    async fn closest(&self, node: &NodeRef, selector: &str) -> Result<Option<NodeRef>, DomError> {
        self.call_node(node.as_str(), scripts::CLOSEST, vec![json!(selector)])
            .await
    }

    async fn parent(&self, node: &NodeRef) -> Result<Option<NodeRef>, DomError> {
        self.call_node(node.as_str(), scripts::PARENT, Vec::new()).await
    }

    async fn previous_sibling(&self, node: &NodeRef) -> Result<Option<NodeRef>, DomError> {
        self.call_node(node.as_str(), scripts::PREVIOUS_SIBLING, Vec::new())
            .await
    }

    async fn element_by_id(&self, id: &str) -> Result<Option<NodeRef>, DomError> {
        let document = self.document().await?;
        self.call_node(&document, scripts::ELEMENT_BY_ID, vec![json!(id)])
            .await
    }

    async fn describe(&self, node: &NodeRef) -> Result<NodeInfo, DomError> {
        self.call_value(node, scripts::DESCRIBE, Vec::new()).await
    }

    async fn text_content(&self, node: &NodeRef) -> Result<String, DomError> {
        self.call_value(node, scripts::TEXT_CONTENT, Vec::new()).await
    }

    async fn value(&self, node: &NodeRef) -> Result<String, DomError> {
        self.call_value(node, scripts::VALUE, Vec::new()).await
    }

    async fn layout(&self, node: &NodeRef) -> Result<Layout, DomError> {
        self.call_value(node, scripts::LAYOUT, Vec::new()).await
    }

    async fn scroll_into_view(&self, node: &NodeRef) -> Result<(), DomError> {
        self.call_unit(node, scripts::SCROLL_INTO_VIEW, Vec::new()).await
    }

    async fn focus(&self, node: &NodeRef) -> Result<(), DomError> {
        self.call_unit(node, scripts::FOCUS, Vec::new()).await
    }

    async fn dispatch(&self, node: &NodeRef, event: DomEvent) -> Result<(), DomError> {
        let payload = serde_json::to_value(&event).map_err(|err| DomError::Script(err.to_string()))?;
        self.call_unit(node, scripts::DISPATCH, vec![payload]).await
    }

    async fn set_value(&self, node: &NodeRef, value: &str) -> Result<(), DomError> {
        self.call_unit(node, scripts::SET_VALUE, vec![json!(value)]).await
    }

    async fn set_text(&self, node: &NodeRef, text: &str) -> Result<(), DomError> {
        self.call_unit(node, scripts::SET_TEXT, vec![json!(text)]).await
    }

    async fn selection(&self, node: &NodeRef) -> Result<Option<(usize, usize)>, DomError> {
        self.call_value(node, scripts::SELECTION, Vec::new()).await
    }

    async fn set_selection(
        &self,
        node: &NodeRef,
        start: usize,
        end: usize,
    ) -> Result<(), DomError> {
        self.call_unit(node, scripts::SET_SELECTION, vec![json!(start), json!(end)])
            .await
    }

    async fn activate(&self, node: &NodeRef) -> Result<(), DomError> {
        self.call_unit(node, scripts::ACTIVATE, Vec::new()).await
    }

    async fn assign_files(&self, node: &NodeRef, files: &[DecodedFile]) -> Result<bool, DomError> {
        self.call_value(node, &scripts::assign_files(), vec![file_args(files)])
            .await
    }

    async fn dispatch_drag(
        &self,
        node: &NodeRef,
        phase: DragPhase,
        files: &[DecodedFile],
    ) -> Result<(), DomError> {
        self.call_unit(
            node,
            &scripts::dispatch_drag(),
            vec![json!(phase.as_str()), file_args(files)],
        )
        .await
    }

    async fn native_click(&self, x: f64, y: f64) -> Result<(), DomError> {
        self.send(
            "Input.dispatchMouseEvent",
            json!({ "type": "mouseMoved", "x": x, "y": y }),
        )
        .await?;
        for kind in ["mousePressed", "mouseReleased"] {
            self.send(
                "Input.dispatchMouseEvent",
                json!({ "type": kind, "x": x, "y": y, "button": "left", "clickCount": 1 }),
            )
            .await?;
        }
        Ok(())
    }
}
