use std::sync::Arc;

use flowpilot_event_bus::{EventBus, InMemoryBus};
use flowpilot_state_center::{ProgressEvent, ProgressMirror};
use tokio::sync::broadcast;
use tracing::{trace, warn};

pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Fans progress out to live observers and folds it into the durable mirror.
#[derive(Clone)]
pub struct ProgressReporter {
    bus: Arc<InMemoryBus<ProgressEvent>>,
    mirror: Arc<ProgressMirror>,
}

impl ProgressReporter {
    pub fn new(bus: Arc<InMemoryBus<ProgressEvent>>, mirror: Arc<ProgressMirror>) -> Self {
        Self { bus, mirror }
    }

    /// In-memory bus and mirror, for tests and one-shot runs.
    pub fn detached() -> Self {
        Self::new(
            InMemoryBus::new(DEFAULT_EVENT_CAPACITY),
            Arc::new(ProgressMirror::in_memory()),
        )
    }

    pub async fn report(&self, event: ProgressEvent) {
        if self.mirror.record(&event) {
            let mirror = self.mirror.clone();
            let write = tokio::task::spawn_blocking(move || mirror.flush());
            // The final snapshot must be on disk before the run is reported done.
            if event.is_terminal() {
                if let Err(err) = write.await {
                    warn!(target: "action-flow", %err, "mirror flush task failed");
                }
            }
        }
        trace!(target: "action-flow", kind = event.kind(), "progress");
        // Delivery to live observers is best effort.
        let _ = self.bus.publish(event).await;
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.bus.subscribe()
    }

    pub fn mirror(&self) -> &Arc<ProgressMirror> {
        &self.mirror
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowpilot_core_types::{ExecutionPath, StepStatus};

    #[tokio::test]
    async fn reports_reach_mirror_without_listeners() {
        let reporter = ProgressReporter::detached();
        reporter
            .report(ProgressEvent::step(&ExecutionPath::top(0), StepStatus::Running))
            .await;
        assert_eq!(
            reporter.mirror().snapshot().status(&ExecutionPath::top(0)),
            StepStatus::Running
        );
    }

    #[tokio::test]
    async fn terminal_events_are_on_disk_when_report_returns() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("progress.json");
        let reporter = ProgressReporter::new(
            InMemoryBus::new(DEFAULT_EVENT_CAPACITY),
            Arc::new(ProgressMirror::with_file(&path)),
        );
        reporter
            .report(ProgressEvent::FlowStarted {
                name: "disk".into(),
                step_count: 1,
            })
            .await;
        reporter
            .report(ProgressEvent::WaitCountdown {
                path: ExecutionPath::top(0),
                seconds_remaining: 9,
            })
            .await;
        reporter.report(ProgressEvent::FlowCompleted { iteration: 1 }).await;

        let stored = flowpilot_state_center::read_snapshot(&path).unwrap();
        assert_eq!(stored.flow_name.as_deref(), Some("disk"));
        assert_eq!(stored.iteration, 1);
        assert!(!stored.running);
    }

    #[tokio::test]
    async fn live_listeners_receive_events() {
        let reporter = ProgressReporter::detached();
        let mut rx = reporter.subscribe();
        reporter.report(ProgressEvent::FlowAborted).await;
        assert_eq!(rx.recv().await.unwrap(), ProgressEvent::FlowAborted);
    }
}
