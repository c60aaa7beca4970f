use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use action_flow::{ProgressEvent, RunOutcome, RunReport, RunSupervisor};
use anyhow::{bail, Result};
use clap::Args;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::warn;

use super::context::CliContext;
use super::output::OutputFormat;
use crate::app_context::{AppContext, BrowserSurface};
use crate::config::AppConfig;

/// Browser overrides shared by commands that drive a page.
#[derive(Args, Clone, Debug, Default)]
pub struct BrowserArgs {
    /// Show the browser window
    #[arg(long)]
    pub headed: bool,

    /// Attach to an existing Chrome DevTools websocket
    #[arg(long, value_name = "URL")]
    pub ws_url: Option<String>,
}

impl BrowserArgs {
    pub fn apply(&self, config: &mut AppConfig) {
        if self.headed {
            config.browser.headless = false;
        }
        if let Some(url) = &self.ws_url {
            config.browser.websocket_url = Some(url.clone());
        }
    }
}

#[derive(Args, Clone, Debug)]
pub struct RunArgs {
    /// Flow file to run instead of the configured one
    #[arg(short, long, value_name = "FILE")]
    pub flow: Option<PathBuf>,

    /// Delay between steps in milliseconds
    #[arg(long, value_name = "MS")]
    pub step_delay_ms: Option<u64>,

    #[command(flatten)]
    pub browser: BrowserArgs,
}

pub async fn cmd_run(args: RunArgs, ctx: &CliContext) -> Result<()> {
    let mut config = ctx.config().clone();
    args.browser.apply(&mut config);
    if let Some(flow) = args.flow {
        config.flow.path = Some(flow);
    }
    if let Some(delay) = args.step_delay_ms {
        config.run.step_delay_ms = delay;
    }

    let app = AppContext::new(config);
    let browser = BrowserSurface::launch(app.config()).await?;
    let supervisor = app.supervisor();

    let printer = spawn_printer(&supervisor, ctx.output());
    let handle = supervisor.start_active(browser.surface())?;
    let interrupt = spawn_interrupt(Arc::clone(&supervisor));

    let report = handle.wait().await;
    interrupt.abort();
    if tokio::time::timeout(Duration::from_secs(1), printer)
        .await
        .is_err()
    {
        warn!("progress printer did not drain");
    }

    finish(&report, ctx.output())
}

/// Print the report and turn a failed run into an error exit.
pub(crate) fn finish(report: &RunReport, output: OutputFormat) -> Result<()> {
    output.print(report, || {
        format!(
            "Outcome: {:?} (iteration {})",
            report.outcome, report.iteration
        )
    })?;
    match (&report.outcome, &report.last_error) {
        (RunOutcome::Failed, Some(failure)) => {
            bail!("step {} failed: {}", failure.path, failure.error)
        }
        (RunOutcome::Failed, None) => bail!("run failed"),
        _ => Ok(()),
    }
}

pub(crate) fn spawn_interrupt(supervisor: Arc<RunSupervisor>) -> JoinHandle<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; stopping run");
            supervisor.request_stop();
        }
    })
}

fn spawn_printer(supervisor: &RunSupervisor, output: OutputFormat) -> JoinHandle<()> {
    let mut events = supervisor.reporter().subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    print_event(&event, output);
                    if event.is_terminal() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "progress output lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    })
}

fn print_event(event: &ProgressEvent, output: OutputFormat) {
    match output {
        OutputFormat::Human => {
            if let Some(line) = describe(event) {
                println!("{line}");
            }
        }
        OutputFormat::Json | OutputFormat::Yaml => match serde_json::to_string(event) {
            Ok(line) => println!("{line}"),
            Err(err) => warn!(%err, "failed to encode progress event"),
        },
    }
}

/// One-line rendering of a progress event, `None` for events not worth a line.
pub fn describe(event: &ProgressEvent) -> Option<String> {
    let line = match event {
        ProgressEvent::FlowStarted { name, step_count } => {
            format!("▶ {name} ({step_count} steps)")
        }
        ProgressEvent::StepStatus {
            path,
            status,
            message,
        } => match message {
            Some(message) => format!("  [{path}] {} {message}", status.as_str()),
            None => format!("  [{path}] {}", status.as_str()),
        },
        ProgressEvent::FlowReset { iteration, .. } => format!("↻ restart (iteration {iteration})"),
        ProgressEvent::BranchResult { path, taken } => {
            format!("  [{path}] branch {}", taken.as_str())
        }
        ProgressEvent::WaitCountdown {
            path,
            seconds_remaining,
        } if *seconds_remaining > 0 => format!("  [{path}] {seconds_remaining}s"),
        ProgressEvent::WaitCountdown { .. } => return None,
        ProgressEvent::FlowCompleted { iteration } => {
            format!("✔ completed (iteration {iteration})")
        }
        ProgressEvent::FlowAborted => "■ stopped".to_string(),
        ProgressEvent::FlowFailed { path, error } => format!("✘ failed at [{path}]: {error}"),
    };
    Some(line)
}
