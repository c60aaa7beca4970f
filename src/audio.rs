use std::io::{self, Write};

use action_flow::AudioPort;
use async_trait::async_trait;
use tracing::{info, warn};

/// Completion chime for terminal hosts: the BEL character on stderr.
#[derive(Debug, Default, Clone, Copy)]
pub struct TerminalChime;

#[async_trait]
impl AudioPort for TerminalChime {
    async fn ensure_ready(&self, _timeout_ms: u64) -> bool {
        true
    }

    async fn play_chime(&self) -> bool {
        let mut stderr = io::stderr().lock();
        match stderr.write_all(b"\x07").and_then(|_| stderr.flush()) {
            Ok(()) => {
                info!("flow chime");
                true
            }
            Err(err) => {
                warn!(%err, "terminal chime failed");
                false
            }
        }
    }
}
