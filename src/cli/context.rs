use std::path::{Path, PathBuf};

use crate::config::{AppConfig, LoadedConfig};

use super::output::OutputFormat;

pub struct CliContext {
    config: AppConfig,
    config_path: PathBuf,
    config_found: bool,
    output: OutputFormat,
}

impl CliContext {
    pub fn new(loaded: LoadedConfig, output: OutputFormat) -> Self {
        Self {
            config: loaded.config,
            config_path: loaded.path,
            config_found: loaded.found,
            output,
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn config_found(&self) -> bool {
        self.config_found
    }

    pub fn output(&self) -> OutputFormat {
        self.output
    }
}
