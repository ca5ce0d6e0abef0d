//! Command implementations behind the CLI.
use anyhow::{anyhow, Context, Result};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::cli::{ActivateArgs, InitArgs, ProbeArgs, PromptArgs, RootArgs, RunArgs, SchemasArgs};
use llm_enrich::cache::ResultCache;
use llm_enrich::client::probe;
use llm_enrich::config::{
    default_config_path, default_schema_store_path, load_config_or_default, resolve_provider,
    write_config_stub, EngineConfig,
};
use llm_enrich::dispatch::{DispatchMode, StrategyConfig};
use llm_enrich::job::{JobOptions, JobRunner};
use llm_enrich::lm_log::LmLog;
use llm_enrich::prompt;
use llm_enrich::record::Record;
use llm_enrich::rows::{load_records, write_results};
use llm_enrich::schema::{
    example_schema, load_registry, save_registry, JsonSchemaStore, Schema, SchemaRegistry,
    SchemaStore,
};

const PROGRESS_INTERVAL: Duration = Duration::from_millis(250);

/// Config and schema store locations for one invocation.
pub struct Paths {
    pub config: PathBuf,
    pub schemas: PathBuf,
}

impl Paths {
    pub fn resolve(root: &RootArgs) -> Result<Self> {
        let config = match &root.config {
            Some(path) => path.clone(),
            None => default_config_path()?,
        };
        let schemas = match &root.schemas {
            Some(path) => path.clone(),
            None => default_schema_store_path()?,
        };
        Ok(Self { config, schemas })
    }

    fn store(&self) -> JsonSchemaStore {
        JsonSchemaStore::new(self.schemas.clone())
    }

    fn load_config(&self) -> Result<EngineConfig> {
        load_config_or_default(&self.config)
    }

    fn load_registry(&self) -> Result<SchemaRegistry> {
        if !self.schemas.is_file() {
            return Err(anyhow!(
                "schema store missing at {} (run `lmenrich init` first)",
                self.schemas.display()
            ));
        }
        load_registry(&self.store())
    }
}

pub fn run_init(paths: &Paths, args: InitArgs) -> Result<()> {
    for path in [&paths.config, &paths.schemas] {
        if path.is_file() && !args.force {
            return Err(anyhow!(
                "{} already exists (use --force to overwrite)",
                path.display()
            ));
        }
    }
    write_config_stub(&paths.config)?;
    println!("wrote {}", paths.config.display());

    let mut registry = SchemaRegistry::new();
    let schema = example_schema();
    let name = schema.id.clone();
    registry
        .put(&name, schema)
        .context("register example schema")?;
    registry.set_active(&name);
    save_registry(&paths.store(), &registry)?;
    println!("wrote {}", paths.schemas.display());
    Ok(())
}

#[derive(Serialize)]
struct SchemaListing<'a> {
    active: Option<&'a str>,
    schemas: Vec<SchemaSummary<'a>>,
}

#[derive(Serialize)]
struct SchemaSummary<'a> {
    name: &'a str,
    display_name: &'a str,
    inputs: Vec<&'a str>,
    outputs: Vec<&'a str>,
}

pub fn run_schemas(paths: &Paths, args: SchemasArgs) -> Result<()> {
    let registry = paths.load_registry()?;
    let listing = SchemaListing {
        active: registry.active_name(),
        schemas: registry
            .schemas()
            .iter()
            .map(|(name, schema)| SchemaSummary {
                name,
                display_name: schema.display_name(),
                inputs: schema.input_columns.iter().map(|c| c.name.as_str()).collect(),
                outputs: schema.output_names().collect(),
            })
            .collect(),
    };
    if args.json {
        let text = serde_json::to_string_pretty(&listing).context("serialize schema listing")?;
        println!("{text}");
        return Ok(());
    }
    if listing.schemas.is_empty() {
        println!("no schemas in {}", paths.schemas.display());
        return Ok(());
    }
    for schema in &listing.schemas {
        let marker = if listing.active == Some(schema.name) { "*" } else { " " };
        println!(
            "{marker} {} ({}) inputs: {} -> outputs: {}",
            schema.name,
            schema.display_name,
            schema.inputs.join(", "),
            schema.outputs.join(", ")
        );
    }
    Ok(())
}

pub fn run_activate(paths: &Paths, args: ActivateArgs) -> Result<()> {
    let mut registry = paths.load_registry()?;
    if !registry.set_active(&args.name) {
        return Err(anyhow!("unknown schema `{}`", args.name));
    }
    save_registry(&paths.store(), &registry)?;
    println!("active schema: {}", args.name);
    Ok(())
}

/// Validate each stored schema independently so one bad entry does not hide
/// the others.
pub fn run_check(paths: &Paths) -> Result<()> {
    let (schemas, active) = paths.store().load()?;
    let mut invalid = 0usize;
    for (name, schema) in schemas.iter() {
        let mut schema = schema.clone();
        schema.id = name.clone();
        match schema.validate() {
            Ok(()) => println!("ok      {name}"),
            Err(err) => {
                invalid += 1;
                println!("invalid {name}: {err}");
            }
        }
    }
    if let Some(active) = active.as_deref() {
        if !schemas.contains_key(active) {
            println!("active schema `{active}` is not in the store");
        }
    }
    if invalid > 0 {
        return Err(anyhow!("{invalid} invalid schema(s)"));
    }
    Ok(())
}

pub fn run_prompt(paths: &Paths, args: PromptArgs) -> Result<()> {
    let config = paths.load_config()?;
    let registry = paths.load_registry()?;
    let schema = select_schema(&registry, args.schema.as_deref())?;
    let records = load_records(&args.input)?;
    let limit = match DispatchMode::from(args.mode) {
        DispatchMode::Single => 1,
        DispatchMode::Batch | DispatchMode::Turbo => args.limit.max(1),
    };
    let chosen: Vec<&Record> = records
        .iter()
        .filter(|record| record.missing_required(schema).is_none())
        .take(limit)
        .collect();
    if chosen.is_empty() {
        return Err(anyhow!(
            "no row in {} has every required input of `{}`",
            args.input.display(),
            schema.id
        ));
    }
    let context = args.context.as_deref().or(config.context.as_deref());
    let text = match DispatchMode::from(args.mode) {
        DispatchMode::Single => prompt::render_single(schema, chosen[0], context),
        DispatchMode::Batch | DispatchMode::Turbo => prompt::render_batch(schema, &chosen, context),
    }
    .with_context(|| format!("render prompt for `{}`", schema.id))?;
    println!("{text}");
    Ok(())
}

pub fn run_job(paths: &Paths, args: RunArgs) -> Result<()> {
    let config = paths.load_config()?;
    let registry = paths.load_registry()?;
    let schema = select_schema(&registry, args.schema.as_deref())?.clone();
    let records = load_records(&args.input)?;

    let provider = resolve_provider(args.lm_command.as_deref(), &config)?;
    let client = provider.build()?;
    tracing::debug!(client = %client.describe(), "provider ready");

    let cache_path = args.cache.clone().or_else(|| config.cache.path.clone());
    let cache = Arc::new(match &cache_path {
        Some(path) => ResultCache::load(path, config.cache.max_entries)?,
        None => ResultCache::new(config.cache.max_entries),
    });

    let mut retry = config.retry.clone();
    if let Some(max_retries) = args.max_retries {
        retry.max_retries = max_retries;
    }
    let options = JobOptions {
        retry,
        context: args.context.clone().or_else(|| config.context.clone()),
        skip_filled: args.skip_filled,
    };
    let strategy = resolve_strategy(
        &config.strategy,
        args.mode.map(DispatchMode::from),
        args.batch_size,
        args.concurrency,
    );

    let mut runner = JobRunner::new(registry, client)
        .with_cache(Arc::clone(&cache))
        .with_options(options);
    if let Some(path) = &args.lm_log {
        runner = runner.with_lm_log(Arc::new(LmLog::open(path)?));
    }

    let handle = runner.start_job(Some(&schema.id), records.clone(), &strategy)?;
    while !handle.is_finished() {
        let (completed, total) = handle.progress();
        eprint!("\r{completed}/{total} rows");
        thread::sleep(PROGRESS_INTERVAL);
    }
    let (completed, total) = handle.progress();
    eprintln!("\r{completed}/{total} rows");
    let report = handle.wait();

    write_results(&args.out, &records, &report, &schema)?;
    if let Some(path) = &cache_path {
        cache.save(path)?;
    }
    let stats = cache.stats();
    tracing::info!(
        hits = stats.hits,
        misses = stats.misses,
        entries = stats.entries,
        "cache stats"
    );
    println!("{} ({} mode, {} ms)", report.summary, report.mode, report.elapsed_ms);
    println!("wrote {}", args.out.display());
    Ok(())
}

pub fn run_probe(paths: &Paths, args: ProbeArgs) -> Result<()> {
    let config = paths.load_config()?;
    let provider = resolve_provider(args.lm_command.as_deref(), &config)?;
    let client = provider.build()?;
    let reply = probe(client.as_ref()).with_context(|| format!("probe {}", client.describe()))?;
    println!("{}: {}", client.describe(), reply);
    Ok(())
}

fn select_schema<'a>(registry: &'a SchemaRegistry, name: Option<&str>) -> Result<&'a Schema> {
    let schema = match name {
        Some(name) => registry.get(name)?,
        None => registry
            .active_schema()
            .context("no --schema given and no active schema")?,
    };
    Ok(schema)
}

/// Config strategy with CLI overrides applied.
///
/// A `--mode` different from the configured one starts from that mode's
/// defaults; `--batch-size` sets the batch size or the turbo chunk size.
fn resolve_strategy(
    base: &StrategyConfig,
    mode: Option<DispatchMode>,
    size: Option<usize>,
    workers: Option<usize>,
) -> StrategyConfig {
    let mut strategy = match mode {
        Some(mode) if mode != base.mode() => StrategyConfig::for_mode(mode),
        _ => base.clone(),
    };
    match &mut strategy {
        StrategyConfig::Single => {}
        StrategyConfig::Batch { batch_size } => {
            if let Some(size) = size {
                *batch_size = size;
            }
        }
        StrategyConfig::Turbo {
            chunk_size,
            concurrency,
        } => {
            if let Some(size) = size {
                *chunk_size = size;
            }
            if let Some(workers) = workers {
                *concurrency = workers;
            }
        }
    }
    strategy
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_override_starts_from_mode_defaults() {
        let base = StrategyConfig::Batch { batch_size: 20 };
        assert_eq!(resolve_strategy(&base, None, None, None), base);
        assert_eq!(
            resolve_strategy(&base, Some(DispatchMode::Batch), Some(5), Some(9)),
            StrategyConfig::Batch { batch_size: 5 }
        );
        assert_eq!(
            resolve_strategy(&base, Some(DispatchMode::Turbo), None, Some(2)),
            StrategyConfig::Turbo {
                chunk_size: 80,
                concurrency: 2
            }
        );
        assert_eq!(
            resolve_strategy(&base, Some(DispatchMode::Single), Some(5), None),
            StrategyConfig::Single
        );
    }
}
