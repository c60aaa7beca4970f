//! Process-wide wiring: the supervisor with its file-backed stores and
//! collaborators, and the browser surface it drives.

use std::sync::Arc;
use std::time::Duration;

use action_flow::{CodeSource, NoMailbox, ProgressReporter, RunSupervisor};
use anyhow::{Context, Result};
use cdp_adapter::launch_page;
use extensions_bridge::{SurfaceClient, SurfaceHost, TargetSurface};
use flowpilot_event_bus::InMemoryBus;
use flowpilot_state_center::{ProgressMirror, VariableStore};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::audio::TerminalChime;
use crate::config::AppConfig;
use crate::integrations::GmailCodeSource;

const PROGRESS_BUS_CAPACITY: usize = 512;

pub struct AppContext {
    config: Arc<AppConfig>,
    supervisor: Arc<RunSupervisor>,
}

impl AppContext {
    pub fn new(config: AppConfig) -> Self {
        let supervisor = Arc::new(build_supervisor(&config));
        Self {
            config: Arc::new(config),
            supervisor,
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn supervisor(&self) -> Arc<RunSupervisor> {
        Arc::clone(&self.supervisor)
    }
}

pub fn build_supervisor(config: &AppConfig) -> RunSupervisor {
    let mirror = Arc::new(ProgressMirror::with_file(config.storage.mirror_path()));
    // A snapshot saying "running" can only be left over from a crashed process.
    mirror.mark_idle();
    let reporter = ProgressReporter::new(InMemoryBus::new(PROGRESS_BUS_CAPACITY), mirror);
    let variables = Arc::new(VariableStore::open(config.storage.variables_path()));

    let codes: Arc<dyn CodeSource> = match GmailCodeSource::from_config(&config.mail) {
        Some(gmail) => Arc::new(gmail),
        None => {
            info!(env = %config.mail.token_env, "no Gmail token; email code steps will fail");
            Arc::new(NoMailbox)
        }
    };

    RunSupervisor::new(reporter, variables)
        .with_settings(config.run.clone())
        .with_flow_path(config.flow.path.clone())
        .with_audio(Arc::new(TerminalChime))
        .with_code_source(codes)
}

/// A live Chromium tab behind a surface host task.
pub struct BrowserSurface {
    client: Arc<SurfaceClient>,
    host: JoinHandle<()>,
}

impl BrowserSurface {
    pub async fn launch(config: &AppConfig) -> Result<Self> {
        let load_timeout = Duration::from_millis(config.run.navigation_timeout_ms);
        let page = launch_page(&config.browser, load_timeout)
            .await
            .context("failed to start Chromium")?;
        info!(target_id = %page.target_id(), "browser tab ready");
        let (client, host) = SurfaceHost::spawn(Arc::new(page), config.bridge.clone());
        Ok(Self {
            client: Arc::new(client),
            host,
        })
    }

    pub fn surface(&self) -> Arc<dyn TargetSurface> {
        self.client.clone()
    }
}

impl Drop for BrowserSurface {
    fn drop(&mut self) {
        if !self.host.is_finished() {
            debug!("stopping surface host");
            self.host.abort();
        }
    }
}
