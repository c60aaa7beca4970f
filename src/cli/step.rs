use std::path::PathBuf;

use action_flow::SupervisorError;
use anyhow::Result;
use clap::Args;
use flow_model::load_active_flow;
use tracing::info;

use super::context::CliContext;
use super::run::{finish, BrowserArgs};
use crate::app_context::{AppContext, BrowserSurface};

#[derive(Args, Clone, Debug)]
pub struct StepArgs {
    /// Top-level index of the step to execute
    pub index: usize,

    /// Flow file to take the step from instead of the configured one
    #[arg(short, long, value_name = "FILE")]
    pub flow: Option<PathBuf>,

    #[command(flatten)]
    pub browser: BrowserArgs,
}

pub async fn cmd_step(args: StepArgs, ctx: &CliContext) -> Result<()> {
    let mut config = ctx.config().clone();
    args.browser.apply(&mut config);
    let path = args.flow.clone().or_else(|| config.flow.path.clone());
    let flow = load_active_flow(path.as_deref()).flow;
    let step = flow
        .steps
        .get(args.index)
        .cloned()
        .ok_or(SupervisorError::StepOutOfRange(args.index))?;
    info!(index = args.index, kind = step.kind(), flow = %flow.name, "running single step");

    let app = AppContext::new(config);
    let browser = BrowserSurface::launch(app.config()).await?;
    let report = app
        .supervisor()
        .run_single_step(step, args.index, browser.surface())
        .await?;
    finish(&report, ctx.output())
}
