//! Chromium backend for the target surface.
//!
//! [`ChromiumTransport`] owns the DevTools websocket, [`ChromiumPage`] drives
//! one tab over a flattened session and implements the surface host's
//! [`PageBackend`](extensions_bridge::PageBackend), and [`ChromiumDom`]
//! implements the executor's [`DomPort`](action_primitives::DomPort) with
//! remote object handles.

pub mod config;
pub mod dom;
pub mod error;
pub mod page;
mod scripts;
pub mod transport;
mod util;

use std::sync::Arc;
use std::time::Duration;

pub use config::CdpConfig;
pub use dom::ChromiumDom;
pub use error::{AdapterError, AdapterErrorKind};
pub use page::ChromiumPage;
pub use transport::{CdpTransport, ChromiumTransport, CommandTarget, TransportEvent};
pub use util::parse_ws_line;

/// Launch or connect to Chromium and open a fresh tab.
pub async fn launch_page(
    cfg: &CdpConfig,
    load_timeout: Duration,
) -> Result<ChromiumPage, AdapterError> {
    let transport: Arc<dyn CdpTransport> = Arc::new(ChromiumTransport::start(cfg).await?);
    Ok(ChromiumPage::open(transport)
        .await?
        .with_load_timeout(load_timeout))
}
