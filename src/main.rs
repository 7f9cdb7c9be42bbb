use clap::Parser;
use pomotask::Cli;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

const LOG_ENV: &str = "POMOTASK_LOG";

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "pomotask=debug"
    } else {
        "pomotask=warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let result = runtime.block_on(pomotask::run(cli));
    // The stdin reader of `focus` may still be parked on a blocking read.
    runtime.shutdown_timeout(Duration::from_millis(200));
    result
}
