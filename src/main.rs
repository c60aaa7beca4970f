use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    flowpilot_cli::cli::run().await
}
