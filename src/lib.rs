pub mod config;
pub mod documents;
pub mod error;
pub mod explorer;
pub mod export;
pub mod model;
pub mod search;
pub mod storage;

use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, LazyLock};

use anyhow::{Context, Result, bail};
use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};

use config::ExplorerConfig;
use error::ExplorerError;
use explorer::Explorer;
use export::{CellValue, TabularResult};
use model::types::{DatasetOverview, SearchResult};
use search::catalog::FactKind;
use search::query::{FireFilter, SearchFilters};

/// Widest cell the terminal table renders before clipping.
const TABLE_CELL_WIDTH: usize = 48;

static LONG_VERSION: LazyLock<String> = LazyLock::new(|| {
    format!(
        "{} (built {}, {} target {})",
        env!("CARGO_PKG_VERSION"),
        option_env!("VERGEN_BUILD_TIMESTAMP").unwrap_or("unknown"),
        option_env!("VERGEN_CARGO_DEBUG")
            .map(|d| if d == "true" { "debug" } else { "release" })
            .unwrap_or("unknown profile"),
        option_env!("VERGEN_CARGO_TARGET_TRIPLE").unwrap_or("unknown"),
    )
});

/// Command-line interface.
#[derive(Parser, Debug)]
#[command(
    name = "bpsx",
    version,
    long_version = LONG_VERSION.as_str(),
    about = "Search and query the BPS ecological model database"
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Commands,
}

/// Options accepted by every subcommand.
#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    /// Path to the SQLite database (defaults to platform data dir)
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    /// Config file (defaults to bpsx.toml in the platform data dir)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Directory holding the model documents
    #[arg(long, global = true)]
    pub docs_dir: Option<PathBuf>,

    /// Output format
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Table)]
    pub format: OutputFormat,

    /// Disable the result cache
    #[arg(long, global = true, default_value_t = false)]
    pub no_cache: bool,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Table,
    Csv,
    Tsv,
    Json,
}

/// Narrowing shared by `search` and `list`.
#[derive(Args, Debug, Default, Clone)]
pub struct FilterArgs {
    /// Vegetation type prefix (case-insensitive)
    #[arg(long)]
    pub vegetation: Option<String>,

    /// Map zones; a model matches when it lists any of them
    #[arg(long, value_delimiter = ',')]
    pub zones: Vec<u32>,

    /// Substring of the BPS display name
    #[arg(long)]
    pub name: Option<String>,

    /// Fire return interval per severity, e.g. `Replacement=100..500` or `Replacement=rare`
    #[arg(long = "fire", value_name = "SEVERITY=RANGE")]
    pub fire: Vec<FireFilter>,

    /// Maximum number of models returned
    #[arg(long)]
    pub limit: Option<usize>,
}

impl FilterArgs {
    fn into_filters(self, default_limit: Option<usize>) -> SearchFilters {
        let mut filters = SearchFilters {
            vegetation_type: self.vegetation,
            map_zones: self.zones,
            bps_name: self.name,
            limit: self.limit.or(default_limit),
            ..SearchFilters::default()
        };
        for fire in self.fire {
            filters = filters.with_fire(fire);
        }
        filters
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Find models whose searchable fields contain TERM
    Search {
        term: String,
        #[command(flatten)]
        filters: FilterArgs,
    },
    /// List models matching the filters only
    List {
        #[command(flatten)]
        filters: FilterArgs,
    },
    /// Run a read-only SQL query against the allowed tables
    Query { sql: String },
    /// Check a SQL query against the read-only policy without running it
    Validate { sql: String },
    /// Show one kind of per-model data
    Facts {
        #[arg(value_enum)]
        kind: FactKind,
        model_id: String,
    },
    /// Summarize the dataset
    Overview,
    /// Print the path of a model's document
    Doc { model_id: String },
    /// List the tables and columns the explorer knows about
    Schema,
    /// Generate shell completions to stdout
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
    /// Generate man page to stdout
    Man,
}

pub fn run() -> Result<()> {
    run_with(Cli::parse())
}

pub fn run_with(cli: Cli) -> Result<()> {
    let output = execute(cli.command, &cli.global)?;
    let mut out = std::io::stdout().lock();
    out.write_all(&output).context("writing output")?;
    out.flush()?;
    Ok(())
}

fn open(global: &GlobalArgs) -> Result<Explorer> {
    let mut config =
        ExplorerConfig::load(global.config.as_deref()).context("loading configuration")?;
    if let Some(db) = &global.db {
        config.db_path = db.clone();
    }
    if let Some(dir) = &global.docs_dir {
        config.docs_dir = dir.clone();
    }
    if global.no_cache {
        config.cache_capacity = 0;
    }
    Ok(Explorer::new(config))
}

fn execute(command: Commands, global: &GlobalArgs) -> Result<Vec<u8>> {
    let format = global.format;
    let text = match command {
        Commands::Search { term, filters } => {
            let explorer = open(global)?;
            let filters = filters.into_filters(explorer.config().default_limit);
            render_results(&explorer.search_filtered(&term, &filters)?, format)?
        }
        Commands::List { filters } => {
            let explorer = open(global)?;
            let filters = filters.into_filters(explorer.config().default_limit);
            render_results(&explorer.list_models(&filters)?, format)?
        }
        Commands::Query { sql } => {
            let table = open(global)?.run_ad_hoc_query(&sql)?;
            if table.truncated {
                tracing::warn!(rows = table.len(), "result truncated at the row cap");
            }
            render_table(&table, format)?
        }
        Commands::Validate { sql } => {
            let accepted = open(global)?.validate(&sql)?;
            match format {
                OutputFormat::Json => {
                    serde_json::to_string_pretty(&serde_json::json!({
                        "accepted": true,
                        "normalized": accepted.normalized,
                        "tables": accepted.tables,
                    }))? + "\n"
                }
                _ => format!(
                    "accepted: {}\ntables: {}\n",
                    accepted.normalized,
                    accepted.tables.join(", ")
                ),
            }
        }
        Commands::Facts { kind, model_id } => {
            let facts: Arc<TabularResult> = open(global)?.model_facts(kind, &model_id)?;
            render_table(&facts, format)?
        }
        Commands::Overview => {
            let overview: Arc<DatasetOverview> = open(global)?.overview()?;
            render_overview(&overview, format)?
        }
        Commands::Doc { model_id } => {
            let explorer = open(global)?;
            let resolver = explorer.document_resolver();
            let Some(document_id) = explorer.document_id(&model_id)? else {
                bail!("model {model_id} has no document");
            };
            let handle = explorer
                .resolve_document(&model_id, &resolver)?
                .with_context(|| {
                    format!(
                        "document {document_id} for model {model_id} is not available in {}",
                        resolver.docs_dir().display()
                    )
                })?;
            match format {
                OutputFormat::Json => serde_json::to_string_pretty(&handle)? + "\n",
                _ => format!("{}\n", handle.path.display()),
            }
        }
        Commands::Schema => render_table(&schema_table(&open(global)?), format)?,
        Commands::Completions { shell } => {
            let mut buf = Vec::new();
            clap_complete::generate(shell, &mut Cli::command(), "bpsx", &mut buf);
            return Ok(buf);
        }
        Commands::Man => {
            let mut buf = Vec::new();
            clap_mangen::Man::new(Cli::command()).render(&mut buf)?;
            return Ok(buf);
        }
    };
    Ok(text.into_bytes())
}

fn render_table(table: &TabularResult, format: OutputFormat) -> Result<String> {
    Ok(match format {
        OutputFormat::Table => table.to_text_table(TABLE_CELL_WIDTH),
        OutputFormat::Csv => table.to_csv(),
        OutputFormat::Tsv => table.to_tsv(),
        OutputFormat::Json => serde_json::to_string_pretty(table)? + "\n",
    })
}

fn render_results(results: &[SearchResult], format: OutputFormat) -> Result<String> {
    if format == OutputFormat::Json {
        return Ok(serde_json::to_string_pretty(results)? + "\n");
    }
    render_table(&TabularResult::from(results), format)
}

fn render_overview(overview: &DatasetOverview, format: OutputFormat) -> Result<String> {
    if format == OutputFormat::Json {
        return Ok(serde_json::to_string_pretty(overview)? + "\n");
    }
    let mut table = TabularResult::new(vec!["field".into(), "value".into()]);
    let mut push = |field: &str, value: String| {
        table.rows.push(vec![CellValue::Text(field.into()), CellValue::Text(value)]);
    };
    push("total_models", overview.total_models.to_string());
    push("vegetation_types", overview.vegetation_types.join("; "));
    push("map_zones", itertools::join(&overview.map_zones, ", "));
    for range in &overview.fire_ranges {
        push(
            &format!("fire_interval[{}]", range.severity),
            format!("{}..{} years", range.min_years, range.max_years),
        );
    }
    render_table(&table, format)
}

fn schema_table(explorer: &Explorer) -> TabularResult {
    let catalog = explorer.catalog();
    let mut table = TabularResult::new(
        ["table", "column", "kind", "model_key", "searchable"]
            .into_iter()
            .map(String::from)
            .collect(),
    );
    for descriptor in catalog.tables() {
        let searchable = catalog.searchable_columns(descriptor.name);
        for column in &descriptor.columns {
            let is_searchable = searchable
                .iter()
                .any(|c| c.table == column.table && c.name == column.name);
            table.rows.push(vec![
                CellValue::Text(descriptor.name.into()),
                CellValue::Text(column.name.into()),
                CellValue::Text(format!("{:?}", column.kind).to_lowercase()),
                CellValue::from(descriptor.model_key.map(String::from)),
                CellValue::Text(is_searchable.to_string()),
            ]);
        }
    }
    table
}

/// Process exit status for an error returned by [`run`].
pub fn exit_code(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<ExplorerError>() {
        Some(ExplorerError::ValidationRejected(_) | ExplorerError::EmptySearchTerm) => 2,
        Some(ExplorerError::ModelNotFound(_)) => 3,
        Some(ExplorerError::QueryTimeout(_)) => 4,
        Some(ExplorerError::DataUnavailable { .. }) => 5,
        Some(ExplorerError::QueryFailed { .. }) => 6,
        None => 1,
    }
}

pub fn default_db_path() -> PathBuf {
    config::default_data_dir().join(config::DB_FILE_NAME)
}
