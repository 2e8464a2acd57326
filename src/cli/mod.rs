pub mod errors;
pub mod output;

use crate::config::{CliArgs, FixConfig};
use crate::workflow::{self, RepairOutcome};
use anyhow::Result;
use tracing_subscriber::EnvFilter;

/// Logs go to stderr so they never interleave with the progress bar.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

pub async fn run_command(args: CliArgs) -> Result<RepairOutcome> {
    let file = args.file.clone();
    let config = FixConfig::from_args(args)?;
    if !config.quiet {
        output::print_banner();
    }
    let outcome = workflow::run(&config, file).await?;
    if !config.quiet {
        output::print_outcome(&outcome);
    }
    Ok(outcome)
}
