mod app;
mod catalog;
mod checker;
mod cli;
mod config;
mod error;
mod files;
mod library;
mod nexus;
mod reconcile;
mod schedule;
#[cfg(test)]
mod testing;

use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    // stdout carries command output; logs go to stderr.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("modwatch=info")),
        )
        .init();

    cli::run()
}
