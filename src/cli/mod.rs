pub mod app;
pub mod commands;
pub mod context;
pub mod dispatch;
pub mod env;
pub mod info;
pub mod output;
pub mod run;
pub mod runtime;
pub mod serve;
pub mod state;
pub mod step;
pub mod validate;

pub use app::run;
