//! Target surface bridge.
//!
//! The flow runner never drives the page directly. It sends typed requests
//! to a host task that owns the page backend and answers over oneshot
//! channels with a per-request deadline. Navigation is acknowledged at once
//! and its completion arrives later as a [`SurfaceEvent`].

pub mod config;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use action_primitives::{ActionExecutor, ActionOutcome, DomPort};
use async_trait::async_trait;
use flow_model::{ActionSettings, PageAction};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub use config::BridgeConfig;

/// Request envelope sent to the surface host.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum SurfaceRequest {
    Ping,
    Attach,
    Navigate { url: String },
    CurrentUrl,
    RunAction {
        action: PageAction,
        settings: ActionSettings,
    },
}

impl SurfaceRequest {
    pub fn op(&self) -> &'static str {
        match self {
            SurfaceRequest::Ping => "ping",
            SurfaceRequest::Attach => "attach",
            SurfaceRequest::Navigate { .. } => "navigate",
            SurfaceRequest::CurrentUrl => "currentUrl",
            SurfaceRequest::RunAction { .. } => "runAction",
        }
    }
}

/// Response from the surface host.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "camelCase")]
pub enum SurfaceResponse {
    Alive,
    Attached,
    Ack,
    Url(String),
    Outcome(ActionOutcome),
}

/// Out-of-band notifications from the surface.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SurfaceEvent {
    NavigationComplete {
        url: String,
        ok: bool,
        error: Option<String>,
    },
}

/// Errors surfaced by the bridge.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum BridgeError {
    #[error("timeout")]
    Timeout,
    #[error("channel closed")]
    ChannelClosed,
    #[error("executor not attached")]
    NotAttached,
    #[error("backend error: {0}")]
    Backend(String),
    #[error("unexpected response to {0}")]
    Unexpected(&'static str),
}

/// Page control the host needs besides DOM access.
#[async_trait]
pub trait PageBackend: Send + Sync {
    /// Liveness of the page's execution context.
    async fn ping(&self) -> Result<(), BridgeError>;

    /// Prepare the page for DOM actions (enable domains, install helpers).
    async fn attach(&self) -> Result<(), BridgeError>;

    /// Navigate and return once the load event fired.
    async fn navigate(&self, url: &str) -> Result<(), BridgeError>;

    async fn current_url(&self) -> Result<String, BridgeError>;

    /// Drop page-side handles created while running actions.
    async fn release_handles(&self) -> Result<(), BridgeError> {
        Ok(())
    }

    fn dom(&self) -> Arc<dyn DomPort>;
}

/// What the interpreter needs from a target surface.
#[async_trait]
pub trait TargetSurface: Send + Sync {
    async fn ping(&self) -> Result<(), BridgeError>;
    async fn attach(&self) -> Result<(), BridgeError>;
    /// Start a navigation; completion is reported through [`TargetSurface::subscribe`].
    async fn navigate(&self, url: &str) -> Result<(), BridgeError>;
    async fn current_url(&self) -> Result<String, BridgeError>;
    async fn run_action(
        &self,
        action: PageAction,
        settings: ActionSettings,
    ) -> Result<ActionOutcome, BridgeError>;
    fn subscribe(&self) -> broadcast::Receiver<SurfaceEvent>;
}

struct Envelope {
    req_id: Uuid,
    request: SurfaceRequest,
    reply: oneshot::Sender<Result<SurfaceResponse, BridgeError>>,
}

/// Cloneable handle that talks to a running surface host.
#[derive(Clone)]
pub struct SurfaceClient {
    requests: mpsc::Sender<Envelope>,
    events: broadcast::Sender<SurfaceEvent>,
    config: BridgeConfig,
}

impl SurfaceClient {
    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub async fn call(&self, request: SurfaceRequest) -> Result<SurfaceResponse, BridgeError> {
        let deadline = match &request {
            SurfaceRequest::RunAction { action, settings } => {
                self.config.action_deadline(action, settings)
            }
            _ => self.config.request_timeout(),
        };
        self.call_with_deadline(request, deadline).await
    }

    pub async fn call_with_deadline(
        &self,
        request: SurfaceRequest,
        deadline: Duration,
    ) -> Result<SurfaceResponse, BridgeError> {
        let (reply, response) = oneshot::channel();
        let req_id = Uuid::new_v4();
        let op = request.op();
        debug!(target: "extensions-bridge", %req_id, op, "sending surface request");
        self.requests
            .send(Envelope {
                req_id,
                request,
                reply,
            })
            .await
            .map_err(|_| BridgeError::ChannelClosed)?;

        match tokio::time::timeout(deadline, response).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(BridgeError::ChannelClosed),
            Err(_) => {
                warn!(target: "extensions-bridge", %req_id, op, "surface request timed out");
                Err(BridgeError::Timeout)
            }
        }
    }
}

#[async_trait]
impl TargetSurface for SurfaceClient {
    async fn ping(&self) -> Result<(), BridgeError> {
        match self.call(SurfaceRequest::Ping).await? {
            SurfaceResponse::Alive => Ok(()),
            _ => Err(BridgeError::Unexpected("ping")),
        }
    }

    async fn attach(&self) -> Result<(), BridgeError> {
        match self.call(SurfaceRequest::Attach).await? {
            SurfaceResponse::Attached => Ok(()),
            _ => Err(BridgeError::Unexpected("attach")),
        }
    }

    async fn navigate(&self, url: &str) -> Result<(), BridgeError> {
        match self
            .call(SurfaceRequest::Navigate {
                url: url.to_string(),
            })
            .await?
        {
            SurfaceResponse::Ack => Ok(()),
            _ => Err(BridgeError::Unexpected("navigate")),
        }
    }

    async fn current_url(&self) -> Result<String, BridgeError> {
        match self.call(SurfaceRequest::CurrentUrl).await? {
            SurfaceResponse::Url(url) => Ok(url),
            _ => Err(BridgeError::Unexpected("currentUrl")),
        }
    }

    async fn run_action(
        &self,
        action: PageAction,
        settings: ActionSettings,
    ) -> Result<ActionOutcome, BridgeError> {
        match self
            .call(SurfaceRequest::RunAction { action, settings })
            .await?
        {
            SurfaceResponse::Outcome(outcome) => Ok(outcome),
            _ => Err(BridgeError::Unexpected("runAction")),
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<SurfaceEvent> {
        self.events.subscribe()
    }
}

/// Serves surface requests one at a time against a [`PageBackend`].
pub struct SurfaceHost {
    backend: Arc<dyn PageBackend>,
    executor: ActionExecutor,
    attached: Arc<AtomicBool>,
    events: broadcast::Sender<SurfaceEvent>,
}

impl SurfaceHost {
    /// Spawn the host task and return a client connected to it.
    pub fn spawn(backend: Arc<dyn PageBackend>, config: BridgeConfig) -> (SurfaceClient, JoinHandle<()>) {
        let (requests, inbox) = mpsc::channel(config.queue_capacity.max(1));
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let host = SurfaceHost {
            executor: ActionExecutor::new(backend.dom()),
            backend,
            attached: Arc::new(AtomicBool::new(false)),
            events: events.clone(),
        };
        let handle = tokio::spawn(host.serve(inbox));
        (
            SurfaceClient {
                requests,
                events,
                config,
            },
            handle,
        )
    }

    async fn serve(self, mut inbox: mpsc::Receiver<Envelope>) {
        info!(target: "extensions-bridge", "surface host started");
        while let Some(envelope) = inbox.recv().await {
            let op = envelope.request.op();
            let acted = matches!(envelope.request, SurfaceRequest::RunAction { .. });
            let result = self.handle(envelope.request).await;
            if let Err(err) = &result {
                debug!(target: "extensions-bridge", req_id = %envelope.req_id, op, %err, "surface request failed");
            }
            // The caller may have timed out already.
            let _ = envelope.reply.send(result);
            // Node handles never outlive the action that created them.
            if acted {
                if let Err(err) = self.backend.release_handles().await {
                    debug!(target: "extensions-bridge", req_id = %envelope.req_id, %err, "handle release failed");
                }
            }
        }
        info!(target: "extensions-bridge", "surface host stopped");
    }

    async fn handle(&self, request: SurfaceRequest) -> Result<SurfaceResponse, BridgeError> {
        match request {
            SurfaceRequest::Ping => {
                if !self.attached.load(Ordering::SeqCst) {
                    return Err(BridgeError::NotAttached);
                }
                self.backend.ping().await?;
                Ok(SurfaceResponse::Alive)
            }
            SurfaceRequest::Attach => {
                self.backend.attach().await?;
                self.attached.store(true, Ordering::SeqCst);
                Ok(SurfaceResponse::Attached)
            }
            SurfaceRequest::Navigate { url } => {
                // A new document drops whatever was attached to the old one.
                self.attached.store(false, Ordering::SeqCst);
                let backend = self.backend.clone();
                let events = self.events.clone();
                tokio::spawn(async move {
                    let result = backend.navigate(&url).await;
                    let event = match result {
                        Ok(()) => SurfaceEvent::NavigationComplete {
                            url,
                            ok: true,
                            error: None,
                        },
                        Err(err) => SurfaceEvent::NavigationComplete {
                            url,
                            ok: false,
                            error: Some(err.to_string()),
                        },
                    };
                    let _ = events.send(event);
                });
                Ok(SurfaceResponse::Ack)
            }
            SurfaceRequest::CurrentUrl => Ok(SurfaceResponse::Url(self.backend.current_url().await?)),
            SurfaceRequest::RunAction { action, settings } => {
                if !self.attached.load(Ordering::SeqCst) {
                    return Err(BridgeError::NotAttached);
                }
                Ok(SurfaceResponse::Outcome(
                    self.executor.execute(&action, &settings).await,
                ))
            }
        }
    }
}
