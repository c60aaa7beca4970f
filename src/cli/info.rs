use anyhow::Result;
use cdp_adapter::config::detect_chrome_executable;
use serde_json::json;

use super::context::CliContext;

pub fn cmd_info(ctx: &CliContext) -> Result<()> {
    let config = ctx.config();
    let chrome = detect_chrome_executable();
    let gmail = config.mail.token().is_some();
    let info = json!({
        "version": env!("CARGO_PKG_VERSION"),
        "buildDate": env!("BUILD_DATE"),
        "gitHash": env!("GIT_HASH"),
        "configPath": ctx.config_path(),
        "configFound": ctx.config_found(),
        "chrome": chrome,
        "headless": config.browser.headless,
        "stateDir": config.storage.state_dir,
        "flow": config.flow.path,
        "gmailConfigured": gmail,
        "bind": config.server.bind,
    });

    ctx.output().print(&info, || {
        let mut lines = vec![
            "FlowPilot System Information".to_string(),
            "============================".to_string(),
            format!("Version: {}", env!("CARGO_PKG_VERSION")),
            format!("Build Date: {}", env!("BUILD_DATE")),
            format!("Git Commit: {}", env!("GIT_HASH")),
            String::new(),
            "Configuration:".to_string(),
        ];
        let found = if ctx.config_found() { "" } else { " (not found, defaults)" };
        lines.push(format!("- Config File: {}{found}", ctx.config_path().display()));
        lines.push(format!(
            "- Chrome: {}",
            chrome
                .as_ref()
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "not found".to_string())
        ));
        lines.push(format!("- Headless: {}", config.browser.headless));
        lines.push(format!("- State Directory: {}", config.storage.state_dir.display()));
        lines.push(format!(
            "- Flow: {}",
            config
                .flow
                .path
                .as_ref()
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "built-in".to_string())
        ));
        lines.push(format!("- Gmail Token: {}", if gmail { "set" } else { "missing" }));
        lines.push(format!("- Server Bind: {}", config.server.bind));
        lines.join("\n")
    })
}
