use anyhow::{bail, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use memalloc_bench_runner::config::{Cli, Config};

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = Config::from_cli(Cli::parse())?;

    info!("Executable: {}", config.executable.display());
    info!(
        "Grid: {} allocators x {} types x {} sizes x {} repeats",
        config.matrix.allocators.len(),
        config.matrix.types.len(),
        config.matrix.sizes.len(),
        config.matrix.repeats
    );

    let summary = memalloc_bench_runner::run(&config)?;
    println!("{}", summary.output.display());

    if config.strict && summary.failed > 0 {
        bail!("{} of {} trials failed", summary.failed, summary.scheduled);
    }
    Ok(())
}
