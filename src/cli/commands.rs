use clap::Subcommand;

use super::run::RunArgs;
use super::serve::ServeArgs;
use super::step::StepArgs;
use super::validate::ValidateArgs;

#[derive(Subcommand, Clone)]
pub enum Commands {
    /// Run the configured (or given) flow in Chromium
    Run(RunArgs),

    /// Execute a single top-level step of a flow
    Step(StepArgs),

    /// Sanitize a flow file and show what would run
    Validate(ValidateArgs),

    /// Show the last recorded run progress
    State,

    /// Start the HTTP control server
    Serve(ServeArgs),

    /// Show version, build and environment information
    Info,
}
