//! Services the interpreter calls that live outside the page.

use async_trait::async_trait;
use thiserror::Error;
use tracing::info;

/// Default readiness wait for `EnsureAudio` without its own timeout.
pub const DEFAULT_AUDIO_TIMEOUT_MS: u64 = 60_000;

/// Completion sound output. `false` means the sound could not be prepared or played.
#[async_trait]
pub trait AudioPort: Send + Sync {
    async fn ensure_ready(&self, timeout_ms: u64) -> bool;
    async fn play_chime(&self) -> bool;
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodeError {
    /// Nothing matching arrived before the deadline
    #[error("code_not_found")]
    NotFound,

    /// The mailbox is not configured or rejected the credentials
    #[error("mailbox_unavailable: {0}")]
    Unavailable(String),

    #[error("mailbox_request_failed: {0}")]
    Request(String),
}

/// One-time code lookup, typically by polling a mailbox.
#[async_trait]
pub trait CodeSource: Send + Sync {
    async fn poll_for_code(
        &self,
        subject: &str,
        timeout_ms: u64,
        poll_ms: u64,
    ) -> Result<String, CodeError>;
}

/// Audio sink for hosts without sound.
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentAudio;

#[async_trait]
impl AudioPort for SilentAudio {
    async fn ensure_ready(&self, _timeout_ms: u64) -> bool {
        true
    }

    async fn play_chime(&self) -> bool {
        info!(target: "action-flow", "flow chime (silent)");
        true
    }
}

/// Code source used when no mailbox is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoMailbox;

#[async_trait]
impl CodeSource for NoMailbox {
    async fn poll_for_code(
        &self,
        _subject: &str,
        _timeout_ms: u64,
        _poll_ms: u64,
    ) -> Result<String, CodeError> {
        Err(CodeError::Unavailable("no mailbox configured".into()))
    }
}
