use clap::Parser;
use xlsm_fix::{CliArgs, cli};

#[tokio::main(flavor = "current_thread")]
async fn main() {
    cli::init_tracing();
    let args = CliArgs::parse();
    if let Err(error) = cli::run_command(args).await {
        cli::errors::emit_error_and_exit(error);
    }
}
