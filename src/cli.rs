//! CLI argument parsing for `lmenrich`.
//!
//! The CLI is thin: every command loads config and the schema store, then
//! calls into the library.
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use llm_enrich::dispatch::DispatchMode;

/// Root CLI entrypoint.
#[derive(Parser, Debug)]
#[command(
    name = "lmenrich",
    version,
    about = "Fill output columns of tabular records with an LM, driven by user schemas",
    after_help = "Commands:\n  init                         Write a default config and example schema store\n  schemas                      List schemas and the active one\n  activate <name>              Select the active schema\n  check                        Validate every stored schema\n  prompt --input <rows>        Preview a rendered prompt\n  run --input <rows> --out <f> Run an enrichment job\n  probe                        Check provider connectivity\n\nExamples:\n  lmenrich init\n  lmenrich prompt --input companies.json --mode batch --limit 3\n  lmenrich run --input companies.json --out enriched.json --mode turbo --concurrency 4\n  lmenrich run --input rows.jsonl --out out.json --lm-command 'llm -m gpt-4o-mini'",
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct RootArgs {
    /// Engine config file (default: <config dir>/lmenrich/config.json)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Schema store file (default: <config dir>/lmenrich/schemas.json)
    #[arg(long, global = true, value_name = "PATH")]
    pub schemas: Option<PathBuf>,

    /// Log engine activity at debug level to stderr
    #[arg(long, short, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    Init(InitArgs),
    Schemas(SchemasArgs),
    Activate(ActivateArgs),
    /// Validate every stored schema
    Check,
    Prompt(PromptArgs),
    Run(RunArgs),
    Probe(ProbeArgs),
}

#[derive(Args, Debug)]
#[command(about = "Write a default config and an example schema store")]
pub struct InitArgs {
    /// Overwrite existing files
    #[arg(long)]
    pub force: bool,
}

#[derive(Args, Debug)]
#[command(about = "List stored schemas; the active one is marked with *")]
pub struct SchemasArgs {
    /// Emit machine-readable JSON output
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
#[command(about = "Set the active schema")]
pub struct ActivateArgs {
    pub name: String,
}

/// `--mode` values.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeArg {
    Single,
    Batch,
    Turbo,
}

impl From<ModeArg> for DispatchMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Single => DispatchMode::Single,
            ModeArg::Batch => DispatchMode::Batch,
            ModeArg::Turbo => DispatchMode::Turbo,
        }
    }
}

#[derive(Args, Debug)]
#[command(about = "Render the prompt for the first rows without calling the provider")]
pub struct PromptArgs {
    /// Records as a JSON array of objects or JSON Lines
    #[arg(long, value_name = "PATH")]
    pub input: PathBuf,

    /// Schema name (default: the active schema)
    #[arg(long)]
    pub schema: Option<String>,

    /// Prompt shape; turbo renders batch prompts
    #[arg(long, value_enum, default_value = "batch")]
    pub mode: ModeArg,

    /// Rows to include in a batch prompt
    #[arg(long, value_name = "N", default_value_t = 3)]
    pub limit: usize,

    /// Free text prefixed to the prompt
    #[arg(long, value_name = "TEXT")]
    pub context: Option<String>,
}

#[derive(Args, Debug)]
#[command(about = "Run an enrichment job and write results")]
pub struct RunArgs {
    /// Records as a JSON array of objects or JSON Lines
    #[arg(long, value_name = "PATH")]
    pub input: PathBuf,

    /// Results file (summary, per-row outcomes, merged records)
    #[arg(long, value_name = "PATH")]
    pub out: PathBuf,

    /// Schema name (default: the active schema)
    #[arg(long)]
    pub schema: Option<String>,

    /// Dispatch strategy (default: from config)
    #[arg(long, value_enum)]
    pub mode: Option<ModeArg>,

    /// Rows per call in batch mode, rows per chunk in turbo mode
    #[arg(long, value_name = "N")]
    pub batch_size: Option<usize>,

    /// Concurrent calls in turbo mode
    #[arg(long, value_name = "K")]
    pub concurrency: Option<usize>,

    /// Retries per call after the first attempt
    #[arg(long, value_name = "N")]
    pub max_retries: Option<u32>,

    /// Cache snapshot loaded before and saved after the job
    #[arg(long, value_name = "PATH")]
    pub cache: Option<PathBuf>,

    /// Append one JSONL entry per LM call attempt
    #[arg(long, value_name = "PATH")]
    pub lm_log: Option<PathBuf>,

    /// Free text prefixed to every prompt
    #[arg(long, value_name = "TEXT")]
    pub context: Option<String>,

    /// Keep rows whose output columns are already filled
    #[arg(long)]
    pub skip_filled: bool,

    /// LM command reading the prompt on stdin (overrides the configured provider)
    #[arg(long, value_name = "CMD")]
    pub lm_command: Option<String>,
}

#[derive(Args, Debug)]
#[command(about = "Send a tiny prompt to check provider connectivity")]
pub struct ProbeArgs {
    /// LM command reading the prompt on stdin (overrides the configured provider)
    #[arg(long, value_name = "CMD")]
    pub lm_command: Option<String>,
}
