// src/commands/mod.rs
//! Command handlers for the crank CLI

mod config;
mod inspect;
mod run;
mod sort;

pub use config::cmd_config;
pub use inspect::cmd_inspect;
pub use run::cmd_run;
pub use sort::cmd_sort;
