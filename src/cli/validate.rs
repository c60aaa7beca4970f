use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use flow_model::{load_flow_file, save_flow_file};
use serde_json::json;

use super::context::CliContext;

#[derive(Args, Clone, Debug)]
pub struct ValidateArgs {
    /// Flow file (JSON or YAML)
    pub file: PathBuf,

    /// Write the normalized flow as JSON to this path
    #[arg(long, value_name = "FILE")]
    pub write: Option<PathBuf>,
}

pub fn cmd_validate(args: ValidateArgs, ctx: &CliContext) -> Result<()> {
    let report = load_flow_file(&args.file)
        .with_context(|| format!("failed to load {}", args.file.display()))?;

    if let Some(target) = &args.write {
        save_flow_file(target, &report.flow)
            .with_context(|| format!("failed to write {}", target.display()))?;
    }

    let summary = json!({
        "name": report.flow.name,
        "steps": report.flow.len(),
        "totalSteps": report.flow.total_steps(),
        "dropped": report.dropped,
        "fellBack": report.fell_back,
        "flow": report.flow,
    });
    ctx.output().print(&summary, || {
        let mut lines = vec![format!(
            "Flow: {} ({} top-level, {} total steps)",
            report.flow.name,
            report.flow.len(),
            report.flow.total_steps()
        )];
        for (index, step) in report.flow.steps.iter().enumerate() {
            lines.push(format!("  {index}. {}", step.kind()));
        }
        lines.push(format!("Dropped steps: {}", report.dropped));
        if report.fell_back {
            lines.push("No usable steps; the built-in flow would run instead".to_string());
        }
        lines.join("\n")
    })
}
