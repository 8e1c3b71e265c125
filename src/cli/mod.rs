pub mod app;
pub mod commands;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod env;
pub mod info;
pub mod learn;
pub mod output;
pub mod runtime;
pub mod templates;
pub mod trace;

pub use app::run;
