use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

mod cli;
mod commands;

use cli::{Command, RootArgs};
use commands::Paths;

fn main() -> Result<()> {
    let args = RootArgs::parse();
    init_logging(args.verbose);
    let paths = Paths::resolve(&args)?;

    match args.command {
        Command::Init(cmd) => commands::run_init(&paths, cmd),
        Command::Schemas(cmd) => commands::run_schemas(&paths, cmd),
        Command::Activate(cmd) => commands::run_activate(&paths, cmd),
        Command::Check => commands::run_check(&paths),
        Command::Prompt(cmd) => commands::run_prompt(&paths, cmd),
        Command::Run(cmd) => commands::run_job(&paths, cmd),
        Command::Probe(cmd) => commands::run_probe(&paths, cmd),
    }
}

/// `RUST_LOG` wins; otherwise warn, or debug for the engine with `--verbose`.
fn init_logging(verbose: bool) {
    let fallback = if verbose { "warn,llm_enrich=debug,lmenrich=debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
