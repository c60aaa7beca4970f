use std::net::SocketAddr;

use anyhow::{Context, Result};
use clap::Args;
use tokio::net::TcpListener;
use tracing::info;

use super::context::CliContext;
use super::run::BrowserArgs;
use crate::app_context::{AppContext, BrowserSurface};
use crate::server::{build_router, ServeState};

#[derive(Args, Clone, Debug)]
pub struct ServeArgs {
    /// Address to listen on (defaults to `server.bind` from the config)
    #[arg(long, value_name = "ADDR")]
    pub bind: Option<String>,

    #[command(flatten)]
    pub browser: BrowserArgs,
}

pub async fn cmd_serve(args: ServeArgs, ctx: &CliContext) -> Result<()> {
    let mut config = ctx.config().clone();
    args.browser.apply(&mut config);
    let bind = args.bind.unwrap_or_else(|| config.server.bind.clone());
    let addr: SocketAddr = bind
        .parse()
        .with_context(|| format!("invalid bind address {bind}"))?;

    let app = AppContext::new(config);
    let browser = BrowserSurface::launch(app.config()).await?;
    let supervisor = app.supervisor();
    let router = build_router(ServeState::new(supervisor.clone(), browser.surface()));

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "control server listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown requested");
            supervisor.request_stop();
        })
        .await
        .context("control server failed")?;
    Ok(())
}
