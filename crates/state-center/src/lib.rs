//! Durable view of run progress.
//!
//! Every [`ProgressEvent`] a run emits is folded into a [`MirrorSnapshot`]
//! keyed by dotted execution paths, so an observer that attaches late (or
//! restarts) can rebuild the same picture a live listener would have.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use flowpilot_core_types::{BranchName, ExecutionPath, StepStatus};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::to_writer_pretty;
use thiserror::Error;
use tracing::warn;

mod variables;

pub use variables::VariableStore;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("state file I/O failed: {0}")]
    Io(#[from] io::Error),
    #[error("state file is not valid JSON: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Path-addressed notifications emitted while a flow runs.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ProgressEvent {
    FlowStarted {
        name: String,
        step_count: usize,
    },
    StepStatus {
        path: ExecutionPath,
        status: StepStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    FlowReset {
        step_count: usize,
        iteration: u64,
    },
    BranchResult {
        path: ExecutionPath,
        taken: BranchName,
    },
    WaitCountdown {
        path: ExecutionPath,
        seconds_remaining: u64,
    },
    FlowCompleted {
        iteration: u64,
    },
    FlowAborted,
    FlowFailed {
        path: ExecutionPath,
        error: String,
    },
}

impl ProgressEvent {
    pub fn step(path: &ExecutionPath, status: StepStatus) -> Self {
        Self::StepStatus {
            path: path.clone(),
            status,
            message: None,
        }
    }

    pub fn step_error(path: &ExecutionPath, message: impl Into<String>) -> Self {
        Self::StepStatus {
            path: path.clone(),
            status: StepStatus::Error,
            message: Some(message.into()),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ProgressEvent::FlowStarted { .. } => "flowStarted",
            ProgressEvent::StepStatus { .. } => "stepStatus",
            ProgressEvent::FlowReset { .. } => "flowReset",
            ProgressEvent::BranchResult { .. } => "branchResult",
            ProgressEvent::WaitCountdown { .. } => "waitCountdown",
            ProgressEvent::FlowCompleted { .. } => "flowCompleted",
            ProgressEvent::FlowAborted => "flowAborted",
            ProgressEvent::FlowFailed { .. } => "flowFailed",
        }
    }

    /// Whether the mirror file should be rewritten after this event.
    /// Countdown ticks arrive every second and only live in memory.
    pub fn is_durable(&self) -> bool {
        !matches!(self, ProgressEvent::WaitCountdown { .. })
    }

    /// Whether the event ends a run.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProgressEvent::FlowCompleted { .. }
                | ProgressEvent::FlowAborted
                | ProgressEvent::FlowFailed { .. }
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunOutcome {
    Completed,
    Aborted,
    Failed,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastError {
    pub path: String,
    pub error: String,
}

/// Everything an observer needs to redraw the progress view.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MirrorSnapshot {
    pub flow_name: Option<String>,
    pub running: bool,
    pub step_count: usize,
    pub iteration: u64,
    pub statuses: BTreeMap<String, StepStatus>,
    pub messages: BTreeMap<String, String>,
    pub countdowns: BTreeMap<String, u64>,
    pub branches: BTreeMap<String, BranchName>,
    pub last_error: Option<LastError>,
    pub outcome: Option<RunOutcome>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl MirrorSnapshot {
    pub fn status(&self, path: &ExecutionPath) -> StepStatus {
        self.statuses.get(&path.key()).copied().unwrap_or_default()
    }

    pub fn countdown(&self, path: &ExecutionPath) -> Option<u64> {
        self.countdowns.get(&path.key()).copied()
    }

    pub fn branch(&self, path: &ExecutionPath) -> Option<BranchName> {
        self.branches.get(&path.key()).copied()
    }

    fn reset_progress(&mut self, step_count: usize) {
        self.step_count = step_count;
        self.statuses = (0..step_count)
            .map(|index| (ExecutionPath::top(index).key(), StepStatus::Pending))
            .collect();
        self.messages.clear();
        self.countdowns.clear();
        self.branches.clear();
    }

    /// Fold one event. Applying the same event twice leaves the same state.
    pub fn apply(&mut self, event: &ProgressEvent) {
        match event {
            ProgressEvent::FlowStarted { name, step_count } => {
                self.flow_name = Some(name.clone());
                self.running = true;
                self.iteration = 0;
                self.last_error = None;
                self.outcome = None;
                self.reset_progress(*step_count);
            }
            ProgressEvent::StepStatus {
                path,
                status,
                message,
            } => {
                let key = path.key();
                self.statuses.insert(key.clone(), *status);
                match message {
                    Some(message) => {
                        self.messages.insert(key.clone(), message.clone());
                    }
                    None => {
                        self.messages.remove(&key);
                    }
                }
                if status.is_terminal() {
                    self.countdowns.remove(&key);
                }
            }
            ProgressEvent::FlowReset {
                step_count,
                iteration,
            } => {
                self.iteration = *iteration;
                self.reset_progress(*step_count);
            }
            ProgressEvent::BranchResult { path, taken } => {
                self.branches.insert(path.key(), *taken);
            }
            ProgressEvent::WaitCountdown {
                path,
                seconds_remaining,
            } => {
                self.countdowns.insert(path.key(), *seconds_remaining);
            }
            ProgressEvent::FlowCompleted { iteration } => {
                self.running = false;
                self.iteration = *iteration;
                self.outcome = Some(RunOutcome::Completed);
                self.countdowns.clear();
            }
            ProgressEvent::FlowAborted => {
                self.running = false;
                self.outcome = Some(RunOutcome::Aborted);
                self.countdowns.clear();
            }
            ProgressEvent::FlowFailed { path, error } => {
                self.running = false;
                self.outcome = Some(RunOutcome::Failed);
                self.last_error = Some(LastError {
                    path: path.key(),
                    error: error.clone(),
                });
                self.countdowns.clear();
            }
        }
    }
}

/// Shared, optionally file-backed [`MirrorSnapshot`].
///
/// Folding and persisting are separate: [`ProgressMirror::record`] only touches
/// memory, [`ProgressMirror::flush`] writes the newest snapshot if the file is
/// behind. Concurrent flushes never put an older snapshot on disk.
#[derive(Debug, Default)]
pub struct ProgressMirror {
    path: Option<PathBuf>,
    snapshot: Mutex<MirrorSnapshot>,
    generation: AtomicU64,
    written: Mutex<u64>,
}

impl ProgressMirror {
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Mirror persisted to `path`, seeded from an earlier snapshot when one exists.
    pub fn with_file(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let snapshot = if path.exists() {
            read_snapshot(&path).unwrap_or_else(|err| {
                warn!(target: "state-center", path = %path.display(), %err, "discarding unreadable mirror snapshot");
                MirrorSnapshot::default()
            })
        } else {
            MirrorSnapshot::default()
        };
        Self {
            path: Some(path),
            snapshot: Mutex::new(snapshot),
            ..Self::default()
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Fold an event in memory. Returns true when the file should follow.
    pub fn record(&self, event: &ProgressEvent) -> bool {
        let mut guard = self.snapshot.lock();
        guard.apply(event);
        guard.updated_at = Some(Utc::now());
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.path.is_some() && event.is_durable()
    }

    /// Write the current snapshot unless the file already holds it.
    /// Blocking; async callers run it on the blocking pool.
    pub fn flush(&self) {
        let Some(path) = &self.path else {
            return;
        };
        let mut written = self.written.lock();
        let (snapshot, generation) = {
            let guard = self.snapshot.lock();
            (guard.clone(), self.generation.load(Ordering::SeqCst))
        };
        if generation <= *written {
            return;
        }
        match write_snapshot(path, &snapshot) {
            Ok(()) => *written = generation,
            Err(err) => {
                warn!(target: "state-center", path = %path.display(), %err, "mirror write failed")
            }
        }
    }

    /// Fold an event and persist the result. Write failures are logged, never raised.
    pub fn apply(&self, event: &ProgressEvent) {
        if self.record(event) {
            self.flush();
        }
    }

    pub fn snapshot(&self) -> MirrorSnapshot {
        self.snapshot.lock().clone()
    }

    /// Flag a run as no longer active after a crash left `running: true` behind.
    pub fn mark_idle(&self) {
        self.snapshot.lock().running = false;
    }
}

pub fn write_snapshot<P: AsRef<Path>>(path: P, snapshot: &MirrorSnapshot) -> Result<(), StateError> {
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    to_writer_pretty(&mut writer, snapshot)?;
    writer.flush()?;
    Ok(())
}

pub fn read_snapshot<P: AsRef<Path>>(path: P) -> Result<MirrorSnapshot, StateError> {
    let raw = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn nested() -> ExecutionPath {
        ExecutionPath::top(2)
            .child(BranchName::Then, 0)
            .child(BranchName::Then, 0)
    }

    #[test]
    fn nested_statuses_do_not_collide() {
        let mut snapshot = MirrorSnapshot::default();
        let outer = ExecutionPath::top(2).child(BranchName::Then, 0);
        snapshot.apply(&ProgressEvent::FlowStarted {
            name: "nested".into(),
            step_count: 3,
        });
        snapshot.apply(&ProgressEvent::step(&outer, StepStatus::Running));
        snapshot.apply(&ProgressEvent::step(&nested(), StepStatus::Success));

        assert_eq!(snapshot.status(&outer), StepStatus::Running);
        assert_eq!(snapshot.status(&nested()), StepStatus::Success);
        assert_eq!(snapshot.status(&ExecutionPath::top(2)), StepStatus::Pending);
        assert_eq!(snapshot.statuses.len(), 5);
    }

    #[test]
    fn folding_is_idempotent() {
        let events = vec![
            ProgressEvent::FlowStarted {
                name: "f".into(),
                step_count: 2,
            },
            ProgressEvent::WaitCountdown {
                path: ExecutionPath::top(0),
                seconds_remaining: 3,
            },
            ProgressEvent::BranchResult {
                path: ExecutionPath::top(1),
                taken: BranchName::Else,
            },
            ProgressEvent::step_error(&ExecutionPath::top(1), "selector_not_found"),
            ProgressEvent::FlowFailed {
                path: ExecutionPath::top(1),
                error: "selector_not_found".into(),
            },
        ];
        let mut once = MirrorSnapshot::default();
        let mut twice = MirrorSnapshot::default();
        for event in &events {
            once.apply(event);
            twice.apply(event);
            twice.apply(event);
        }
        assert_eq!(once, twice);
        assert!(!once.running);
        assert_eq!(once.outcome, Some(RunOutcome::Failed));
        assert_eq!(once.messages.get("1").map(String::as_str), Some("selector_not_found"));
        assert!(once.countdowns.is_empty());
    }

    #[test]
    fn reset_returns_steps_to_pending() {
        let mut snapshot = MirrorSnapshot::default();
        snapshot.apply(&ProgressEvent::FlowStarted {
            name: "loop".into(),
            step_count: 2,
        });
        snapshot.apply(&ProgressEvent::step(&ExecutionPath::top(0), StepStatus::Success));
        snapshot.apply(&ProgressEvent::step(&nested(), StepStatus::Success));
        snapshot.apply(&ProgressEvent::FlowReset {
            step_count: 2,
            iteration: 1,
        });
        assert_eq!(snapshot.status(&ExecutionPath::top(0)), StepStatus::Pending);
        assert_eq!(snapshot.status(&nested()), StepStatus::Idle);
        assert_eq!(snapshot.iteration, 1);
        assert!(snapshot.running);
    }

    #[test]
    fn events_serialize_with_paths_as_arrays() {
        let event = ProgressEvent::WaitCountdown {
            path: ExecutionPath::top(3).child(BranchName::Then, 0),
            seconds_remaining: 4,
        };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({ "type": "waitCountdown", "path": [3, "then", 0], "secondsRemaining": 4 })
        );
    }

    #[test]
    fn mirror_persists_and_reloads() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state").join("mirror.json");
        let mirror = ProgressMirror::with_file(&path);
        mirror.apply(&ProgressEvent::FlowStarted {
            name: "persisted".into(),
            step_count: 1,
        });
        mirror.apply(&ProgressEvent::FlowCompleted { iteration: 1 });

        let reloaded = ProgressMirror::with_file(&path).snapshot();
        assert_eq!(reloaded.flow_name.as_deref(), Some("persisted"));
        assert_eq!(reloaded.outcome, Some(RunOutcome::Completed));
        assert_eq!(reloaded.iteration, 1);
        assert!(reloaded.updated_at.is_some());
    }

    #[test]
    fn countdown_ticks_stay_in_memory() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("mirror.json");
        let mirror = ProgressMirror::with_file(&path);
        mirror.apply(&ProgressEvent::FlowStarted {
            name: "waiting".into(),
            step_count: 1,
        });
        for seconds_remaining in (1..=5).rev() {
            mirror.apply(&ProgressEvent::WaitCountdown {
                path: ExecutionPath::top(0),
                seconds_remaining,
            });
        }
        assert_eq!(mirror.snapshot().countdown(&ExecutionPath::top(0)), Some(1));
        assert!(read_snapshot(&path).unwrap().countdowns.is_empty());

        // the next durable event carries the folded countdowns along
        mirror.apply(&ProgressEvent::step(&ExecutionPath::top(0), StepStatus::Running));
        assert_eq!(
            read_snapshot(&path).unwrap().countdown(&ExecutionPath::top(0)),
            Some(1)
        );
    }

    #[test]
    fn flush_skips_when_file_is_current() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("mirror.json");
        let mirror = ProgressMirror::with_file(&path);
        mirror.apply(&ProgressEvent::FlowAborted);
        fs::remove_file(&path).unwrap();
        mirror.flush();
        assert!(!path.exists());

        assert!(mirror.record(&ProgressEvent::FlowCompleted { iteration: 2 }));
        mirror.flush();
        assert_eq!(read_snapshot(&path).unwrap().iteration, 2);
    }
}
