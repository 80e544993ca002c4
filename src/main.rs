mod commands;
#[cfg(feature = "mcp")]
mod mcp;

use std::path::PathBuf;

use anyhow::bail;
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use commands::search_table::SearchArgs;
use commands::Context;

#[derive(Parser)]
#[command(name = "tablesearch")]
#[command(about = "Semantic search over configured SQL tables and an indexed code base", long_about = None)]
#[command(version)]
struct Cli {
    #[command(flatten)]
    globals: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug, Default)]
struct GlobalArgs {
    #[arg(long, global = true, help = "Table configuration file (default: ./tables.yaml)")]
    config: Option<PathBuf>,
    #[arg(long, global = true, help = "Index database path (overrides store.path)")]
    db: Option<PathBuf>,
    #[arg(short, long, global = true, help = "Debug logging to stderr")]
    verbose: bool,
}

impl GlobalArgs {
    /// Flags given after `find-<table>` win over those before it.
    fn merge(self, later: GlobalArgs) -> Self {
        Self {
            config: later.config.or(self.config),
            db: later.db.or(self.db),
            verbose: self.verbose || later.verbose,
        }
    }

    fn into_context(self) -> Context {
        Context {
            config: self.config,
            db: self.db,
        }
    }
}

/// Flags shared by `search` and `find-<table>`.
#[derive(Args, Debug)]
struct TableSearchArgs {
    query: String,
    #[arg(short, long, default_value_t = 10, help = "Number of results")]
    limit: i64,
    #[arg(long, help = "Search the last N hours (tables with a time filter)")]
    hours: Option<i64>,
    #[arg(long, help = "Minimum confidence (tables with a confidence filter)")]
    confidence: Option<f64>,
    #[arg(long, help = "JSON output")]
    json: bool,
}

#[derive(Parser, Debug)]
#[command(no_binary_name = true)]
struct ExternalTableSearch {
    #[command(flatten)]
    globals: GlobalArgs,
    #[command(flatten)]
    args: TableSearchArgs,
}

/// Split `find-<table> ...` into the table name and its parsed flags.
fn parse_external(argv: &[String]) -> anyhow::Result<(String, ExternalTableSearch)> {
    let (name, rest) = match argv.split_first() {
        Some(split) => split,
        None => bail!("missing command"),
    };
    let table = match name.strip_prefix("find-") {
        Some(t) if !t.is_empty() => t,
        _ => bail!(
            "unrecognized command '{}'; run `tablesearch list-tables` for find-<table> commands",
            name
        ),
    };
    let parsed = ExternalTableSearch::try_parse_from(rest).unwrap_or_else(|e| e.exit());
    Ok((table.to_string(), parsed))
}

#[derive(Subcommand)]
enum Commands {
    /// Index Python definitions under a directory
    Index {
        directory: PathBuf,
        #[arg(long, help = "Clear the existing index first")]
        clear: bool,
        #[arg(long, help = "JSON output")]
        json: bool,
    },
    /// Semantic search over the code index
    Find {
        query: String,
        #[arg(short, long, default_value_t = 5, help = "Number of results")]
        limit: i64,
        #[arg(long, help = "JSON output")]
        json: bool,
    },
    /// Code index statistics
    Stats {
        #[arg(long, help = "JSON output")]
        json: bool,
    },
    /// List configured searchable tables
    #[command(name = "list-tables")]
    ListTables {
        #[arg(long, help = "JSON output")]
        json: bool,
    },
    /// Search a configured table
    Search {
        table: String,
        #[command(flatten)]
        args: TableSearchArgs,
    },

    // ===== MCP Server =====
    /// Start MCP server on stdio
    #[cfg(feature = "mcp")]
    Mcp {
        #[arg(long, help = "Show MCP client configuration instructions")]
        install: bool,
    },

    /// `find-<table> <query>` for every configured table
    #[command(external_subcommand)]
    External(Vec<String>),
}

fn init_logging(verbose: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("tablesearch=debug,warn")
        } else {
            EnvFilter::new("tablesearch=warn")
        }
    });

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn search_table(ctx: &Context, table: &str, args: &TableSearchArgs) -> anyhow::Result<()> {
    commands::search_table::run(
        ctx,
        &SearchArgs {
            table,
            query: &args.query,
            limit: args.limit,
            hours: args.hours,
            confidence: args.confidence,
            json: args.json,
        },
    )
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut globals = cli.globals;

    // parsed before logging starts so a trailing `-v` still applies
    let mut external = None;
    if let Commands::External(argv) = &cli.command {
        let (table, parsed) = parse_external(argv)?;
        globals = globals.merge(parsed.globals);
        external = Some((table, parsed.args));
    }

    init_logging(globals.verbose);
    let ctx = globals.into_context();

    match cli.command {
        Commands::Index {
            directory,
            clear,
            json,
        } => commands::index::run(&ctx, &directory, clear, json),
        Commands::Find { query, limit, json } => commands::find::run(&ctx, &query, limit, json),
        Commands::Stats { json } => commands::stats::run(&ctx, json),
        Commands::ListTables { json } => commands::list_tables::run(&ctx, json),
        Commands::Search { table, args } => search_table(&ctx, &table, &args),

        #[cfg(feature = "mcp")]
        Commands::Mcp { install } => {
            if install {
                print_mcp_install_instructions();
                Ok(())
            } else {
                run_mcp_server(ctx)
            }
        }

        Commands::External(_) => match external {
            Some((table, args)) => search_table(&ctx, &table, &args),
            None => bail!("missing command"),
        },
    }
}

#[cfg(feature = "mcp")]
fn run_mcp_server(ctx: Context) -> anyhow::Result<()> {
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(mcp::run_mcp_server(ctx))
}

#[cfg(feature = "mcp")]
fn print_mcp_install_instructions() {
    use colored::Colorize;

    let work_dir = std::env::current_dir()
        .map(|p| p.to_string_lossy().to_string())
        .unwrap_or_else(|_| "/path/to/project".to_string());

    let binary_path = std::env::current_exe()
        .map(|p| p.to_string_lossy().to_string())
        .unwrap_or_else(|_| "tablesearch".to_string());

    println!("{}", "MCP Server Installation Guide".bold().cyan());
    println!();
    println!("Add the following to your MCP client configuration:");
    println!();
    println!(r#"{{
  "mcpServers": {{
    "tablesearch": {{
      "command": "{}",
      "args": ["mcp"],
      "cwd": "{}"
    }}
  }}
}}"#, binary_path, work_dir);
    println!();
    println!("{}", "Available tools:".bold());
    println!("  • {} - Semantic search over a configured table", "search_table".green());
    println!("  • {} - Semantic search over the code index", "find_code".green());
    println!("  • {} - List configured tables and their filters", "list_tables".green());
    println!("  • {} - Code index statistics", "index_stats".green());
}
