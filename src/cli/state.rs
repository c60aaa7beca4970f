use anyhow::{Context, Result};
use flowpilot_state_center::read_snapshot;

use super::context::CliContext;

pub fn cmd_state(ctx: &CliContext) -> Result<()> {
    let path = ctx.config().storage.mirror_path();
    if !path.exists() {
        println!("No runs recorded yet ({})", path.display());
        return Ok(());
    }
    let snapshot = read_snapshot(&path)
        .with_context(|| format!("failed to read progress snapshot {}", path.display()))?;

    ctx.output().print(&snapshot, || {
        let mut lines = vec![format!(
            "Flow: {}",
            snapshot.flow_name.as_deref().unwrap_or("(none)")
        )];
        lines.push(format!("Running: {}", snapshot.running));
        lines.push(format!("Iteration: {}", snapshot.iteration));
        if let Some(outcome) = snapshot.outcome {
            lines.push(format!("Outcome: {outcome:?}"));
        }
        for (path, status) in &snapshot.statuses {
            match snapshot.messages.get(path) {
                Some(message) => lines.push(format!("  [{path}] {status} {message}")),
                None => lines.push(format!("  [{path}] {status}")),
            }
        }
        if let Some(error) = &snapshot.last_error {
            lines.push(format!("Last error at [{}]: {}", error.path, error.error));
        }
        lines.join("\n")
    })
}
