//! FlowPilot command line and control server
//!
//! Wires the flow supervisor to a Chromium tab and exposes it through the
//! `flowpilot` CLI and an HTTP API.

pub mod app_context;
pub mod audio;
pub mod cli;
pub mod config;
pub mod integrations;
pub mod server;

pub use app_context::{build_supervisor, AppContext, BrowserSurface};
pub use config::AppConfig;
