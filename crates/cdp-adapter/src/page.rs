//! One browser tab driven over a flattened CDP session.

use std::sync::Arc;
use std::time::Duration;

use action_primitives::DomPort;
use async_trait::async_trait;
use extensions_bridge::{BridgeError, PageBackend};
use serde_json::{json, Value};
use tokio::sync::broadcast::error::RecvError;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::dom::{ChromiumDom, OBJECT_GROUP};
use crate::error::{AdapterError, AdapterErrorKind};
use crate::transport::{CdpTransport, CommandTarget};

pub const DEFAULT_NAVIGATION_TIMEOUT: Duration = Duration::from_secs(30);

pub struct ChromiumPage {
    transport: Arc<dyn CdpTransport>,
    target_id: String,
    session_id: String,
    dom: Arc<ChromiumDom>,
    load_timeout: Duration,
}

impl ChromiumPage {
    /// Create a blank tab and attach a flattened session to it.
    pub async fn open(transport: Arc<dyn CdpTransport>) -> Result<Self, AdapterError> {
        let created = transport
            .send_command(
                CommandTarget::Browser,
                "Target.createTarget",
                json!({ "url": "about:blank" }),
            )
            .await?;
        let target_id = string_field(&created, "targetId")?;

        let attached = transport
            .send_command(
                CommandTarget::Browser,
                "Target.attachToTarget",
                json!({ "targetId": target_id, "flatten": true }),
            )
            .await?;
        let session_id = string_field(&attached, "sessionId")?;
        info!(target: "cdp-page", %target_id, %session_id, "page session attached");

        let page = Self {
            dom: Arc::new(ChromiumDom::new(transport.clone(), session_id.clone())),
            transport,
            target_id,
            session_id,
            load_timeout: DEFAULT_NAVIGATION_TIMEOUT,
        };
        page.enable_domains().await?;
        Ok(page)
    }

    /// Upper bound for the load event after `Page.navigate` returned.
    pub fn with_load_timeout(mut self, timeout: Duration) -> Self {
        self.load_timeout = timeout;
        self
    }

    pub fn target_id(&self) -> &str {
        &self.target_id
    }

    async fn session(&self, method: &str, params: Value) -> Result<Value, AdapterError> {
        self.transport
            .send_command(CommandTarget::Session(self.session_id.clone()), method, params)
            .await
    }

    async fn enable_domains(&self) -> Result<(), AdapterError> {
        self.session("Page.enable", json!({})).await?;
        self.session("Runtime.enable", json!({})).await?;
        Ok(())
    }

    async fn wait_for_load(
        &self,
        events: &mut tokio::sync::broadcast::Receiver<crate::transport::TransportEvent>,
    ) -> Result<(), AdapterError> {
        let deadline = Instant::now() + self.load_timeout;
        loop {
            let received = tokio::time::timeout_at(deadline, events.recv()).await;
            match received {
                Ok(Ok(event)) => {
                    if event.method == "Page.loadEventFired"
                        && event.session_id.as_deref() == Some(self.session_id.as_str())
                    {
                        return Ok(());
                    }
                }
                Ok(Err(RecvError::Lagged(skipped))) => {
                    debug!(target: "cdp-page", skipped, "event receiver lagged during navigation");
                }
                Ok(Err(RecvError::Closed)) => {
                    return Err(AdapterError::new(AdapterErrorKind::CdpIo)
                        .with_hint("event stream closed during navigation"))
                }
                Err(_) => {
                    return Err(AdapterError::new(AdapterErrorKind::NavTimeout)
                        .with_hint("load event not received")
                        .retriable(true))
                }
            }
        }
    }
}

fn string_field(value: &Value, field: &str) -> Result<String, AdapterError> {
    value
        .get(field)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| {
            AdapterError::new(AdapterErrorKind::Internal)
                .with_hint(format!("response missing {field}"))
                .with_data(value.clone())
        })
}

#[async_trait]
impl PageBackend for ChromiumPage {
    async fn ping(&self) -> Result<(), BridgeError> {
        self.session(
            "Runtime.evaluate",
            json!({ "expression": "1", "returnByValue": true }),
        )
        .await?;
        Ok(())
    }

    async fn attach(&self) -> Result<(), BridgeError> {
        self.enable_domains().await?;
        Ok(())
    }

    async fn navigate(&self, url: &str) -> Result<(), BridgeError> {
        let mut events = self.transport.subscribe();
        if let Err(err) = self.release_handles().await {
            debug!(target: "cdp-page", %err, "object group release failed");
        }

        let response = self.session("Page.navigate", json!({ "url": url })).await?;
        if let Some(error_text) = response
            .get("errorText")
            .and_then(Value::as_str)
            .filter(|text| !text.is_empty())
        {
            warn!(target: "cdp-page", %url, error = error_text, "navigation rejected");
            return Err(AdapterError::new(AdapterErrorKind::NavFailed)
                .with_hint(error_text)
                .into());
        }
        // Same-document navigations carry no loader and fire no load event.
        if response.get("loaderId").is_none() {
            return Ok(());
        }
        self.wait_for_load(&mut events).await?;
        debug!(target: "cdp-page", %url, "load event fired");
        Ok(())
    }

    async fn current_url(&self) -> Result<String, BridgeError> {
        let info = self
            .transport
            .send_command(
                CommandTarget::Browser,
                "Target.getTargetInfo",
                json!({ "targetId": self.target_id }),
            )
            .await?;
        info.pointer("/targetInfo/url")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| BridgeError::Backend("target info missing url".into()))
    }

    async fn release_handles(&self) -> Result<(), BridgeError> {
        self.session("Runtime.releaseObjectGroup", json!({ "objectGroup": OBJECT_GROUP }))
            .await?;
        Ok(())
    }

    fn dom(&self) -> Arc<dyn DomPort> {
        self.dom.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::TransportEvent;
    use parking_lot::Mutex;
    use tokio::sync::broadcast;

    type Handler = Box<dyn Fn(&str, &Value) -> Result<Value, AdapterError> + Send + Sync>;

    struct ScriptedTransport {
        calls: Mutex<Vec<(CommandTarget, String, Value)>>,
        events: broadcast::Sender<TransportEvent>,
        handler: Handler,
    }

    impl ScriptedTransport {
        fn new(handler: impl Fn(&str, &Value) -> Result<Value, AdapterError> + Send + Sync + 'static) -> Arc<Self> {
            let (events, _) = broadcast::channel(16);
            Arc::new(Self {
                calls: Mutex::new(Vec::new()),
                events,
                handler: Box::new(handler),
            })
        }

        fn methods(&self) -> Vec<String> {
            self.calls.lock().iter().map(|(_, method, _)| method.clone()).collect()
        }
    }

    #[async_trait]
    impl CdpTransport for ScriptedTransport {
        async fn send_command(
            &self,
            target: CommandTarget,
            method: &str,
            params: Value,
        ) -> Result<Value, AdapterError> {
            self.calls.lock().push((target, method.to_string(), params.clone()));
            let result = (self.handler)(method, &params);
            if method == "Page.navigate" && result.as_ref().map_or(false, |v| v.get("loaderId").is_some()) {
                let _ = self.events.send(TransportEvent {
                    method: "Page.loadEventFired".into(),
                    params: json!({ "timestamp": 1.0 }),
                    session_id: Some("S1".into()),
                });
            }
            result
        }

        fn subscribe(&self) -> broadcast::Receiver<TransportEvent> {
            self.events.subscribe()
        }
    }

    fn browser(method: &str, params: &Value) -> Result<Value, AdapterError> {
        match method {
            "Target.createTarget" => Ok(json!({ "targetId": "T1" })),
            "Target.attachToTarget" => Ok(json!({ "sessionId": "S1" })),
            "Target.getTargetInfo" => Ok(json!({ "targetInfo": { "targetId": "T1", "url": "https://example.com/" } })),
            "Page.navigate" if params["url"] == "https://broken.test" => {
                Ok(json!({ "frameId": "F", "errorText": "net::ERR_NAME_NOT_RESOLVED" }))
            }
            "Page.navigate" => Ok(json!({ "frameId": "F", "loaderId": "L" })),
            _ => Ok(json!({})),
        }
    }

    #[tokio::test]
    async fn open_attaches_flattened_session() {
        let transport = ScriptedTransport::new(browser);
        let page = ChromiumPage::open(transport.clone()).await.unwrap();
        assert_eq!(page.target_id(), "T1");
        assert_eq!(
            transport.methods(),
            vec!["Target.createTarget", "Target.attachToTarget", "Page.enable", "Runtime.enable"]
        );
        let calls = transport.calls.lock();
        assert_eq!(calls[1].2["flatten"], json!(true));
        assert_eq!(calls[2].0, CommandTarget::Session("S1".into()));
    }

    #[tokio::test]
    async fn navigate_waits_for_load_event() {
        let transport = ScriptedTransport::new(browser);
        let page = ChromiumPage::open(transport.clone()).await.unwrap();
        page.navigate("https://example.com").await.unwrap();
        assert_eq!(page.current_url().await.unwrap(), "https://example.com/");
    }

    #[tokio::test]
    async fn release_drops_the_action_object_group() {
        let transport = ScriptedTransport::new(browser);
        let page = ChromiumPage::open(transport.clone()).await.unwrap();
        page.release_handles().await.unwrap();
        let calls = transport.calls.lock();
        let (target, method, params) = calls.last().unwrap();
        assert_eq!(method, "Runtime.releaseObjectGroup");
        assert_eq!(params["objectGroup"], OBJECT_GROUP);
        assert_eq!(*target, CommandTarget::Session("S1".into()));
    }

    #[tokio::test]
    async fn navigation_errors_are_backend_errors() {
        let transport = ScriptedTransport::new(browser);
        let page = ChromiumPage::open(transport).await.unwrap();
        let err = page.navigate("https://broken.test").await.unwrap_err();
        assert!(matches!(err, BridgeError::Backend(message) if message.contains("ERR_NAME_NOT_RESOLVED")));
    }

    #[tokio::test(start_paused = true)]
    async fn missing_load_event_times_out() {
        let transport = ScriptedTransport::new(|method, _| match method {
            "Target.createTarget" => Ok(json!({ "targetId": "T1" })),
            "Target.attachToTarget" => Ok(json!({ "sessionId": "S2" })),
            "Page.navigate" => Ok(json!({ "frameId": "F", "loaderId": "L" })),
            _ => Ok(json!({})),
        });
        // The scripted load event is tagged with another session.
        let page = ChromiumPage::open(transport)
            .await
            .unwrap()
            .with_load_timeout(Duration::from_secs(2));
        assert_eq!(page.navigate("https://slow.test").await, Err(BridgeError::Timeout));
    }

    #[tokio::test]
    async fn dom_queries_resolve_remote_objects() {
        let transport = ScriptedTransport::new(|method, params| match method {
            "Target.createTarget" => Ok(json!({ "targetId": "T1" })),
            "Target.attachToTarget" => Ok(json!({ "sessionId": "S1" })),
            "Runtime.evaluate" => Ok(json!({ "result": { "type": "object", "objectId": "doc" } })),
            "Runtime.callFunctionOn" => {
                assert_eq!(params["objectId"], "doc");
                Ok(json!({ "result": { "type": "object", "subtype": "array", "objectId": "arr" } }))
            }
            "Runtime.getProperties" => Ok(json!({
                "result": [
                    { "name": "0", "value": { "type": "object", "objectId": "btn" } },
                    { "name": "length", "value": { "type": "number", "value": 1 } }
                ]
            })),
            _ => Ok(json!({})),
        });
        let page = ChromiumPage::open(transport.clone()).await.unwrap();
        let found = page.dom().query_all(None, "button").await.unwrap();
        assert_eq!(found, vec![action_primitives::NodeRef::new("btn")]);
        assert!(transport.methods().contains(&"Runtime.releaseObject".to_string()));
    }
}
