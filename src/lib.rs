pub mod auth;
pub mod browser;
pub mod callback;
pub mod cli;
pub mod config;
pub mod errors;
pub mod graph;
pub mod input;
pub mod progress;
pub mod workflow;

pub use config::{CliArgs, FixConfig};
pub use errors::FixError;
pub use workflow::{RepairOutcome, repair, run};
