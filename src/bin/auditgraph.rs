//! Auditgraph CLI: inspect an audit database.
//!
//! Usage:
//!   auditgraph list [--kind K] [--subtype S] [--db path]
//!   auditgraph show <IDENTITY> [--db path]
//!   auditgraph count [--kind K] [--subtype S] [--db path]
//!   auditgraph scope --config FILE <TARGET>...

use auditgraph::{
    AuditConfig, AuditContext, Identity, OpenStore, RecordFilter, RecordKind, RecordStore,
    SqliteStore,
};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(
    name = "auditgraph",
    version,
    about = "Inspect vulnerability audit result graphs"
)]
struct Cli {
    /// Path to SQLite database file
    #[arg(long, global = true)]
    db: Option<PathBuf>,
    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List stored record identities
    List {
        /// Only records of this kind (information, resource, vulnerability)
        #[arg(long)]
        kind: Option<RecordKind>,
        /// Only records of this subtype; requires --kind
        #[arg(long)]
        subtype: Option<String>,
    },
    /// Print one record as JSON
    Show {
        /// Identity hash of the record
        identity: String,
    },
    /// Count stored records
    Count {
        #[arg(long)]
        kind: Option<RecordKind>,
        #[arg(long)]
        subtype: Option<String>,
    },
    /// Check targets against the scope of an audit configuration
    Scope {
        /// Audit configuration (YAML)
        #[arg(long)]
        config: PathBuf,
        /// Hosts, addresses or URLs to check
        #[arg(required = true)]
        targets: Vec<String>,
    },
}

fn default_db_path() -> PathBuf {
    let data_dir = dirs::data_dir()
        .unwrap_or_else(|| dirs::home_dir().unwrap_or_default().join(".local/share"));
    data_dir.join("auditgraph").join("audit.db")
}

fn open_store(db: Option<PathBuf>) -> Result<SqliteStore, String> {
    let db_path = db.unwrap_or_else(default_db_path);
    SqliteStore::open(&db_path)
        .map_err(|e| format!("Failed to open database {}: {}", db_path.display(), e))
}

fn filter(kind: Option<RecordKind>, subtype: Option<String>) -> RecordFilter {
    RecordFilter {
        kind,
        subtype,
        limit: None,
    }
}

fn cmd_list(store: &SqliteStore, filter: &RecordFilter) -> i32 {
    match store.keys(filter) {
        Ok(keys) if keys.is_empty() => {
            println!("No records.");
            0
        }
        Ok(keys) => {
            for key in keys {
                println!("{}", key);
            }
            0
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

fn cmd_show(store: &SqliteStore, identity: &str) -> i32 {
    match store.get(&Identity::from(identity)) {
        Ok(Some(snapshot)) => match serde_json::to_string_pretty(&snapshot) {
            Ok(json) => {
                println!("{}", json);
                0
            }
            Err(e) => {
                eprintln!("Error: {}", e);
                1
            }
        },
        Ok(None) => {
            eprintln!("Error: record '{}' not found", identity);
            1
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

fn cmd_count(store: &SqliteStore, filter: &RecordFilter) -> i32 {
    match store.count(filter) {
        Ok(count) => {
            println!("{}", count);
            0
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

fn cmd_scope(config: &AuditConfig, targets: &[String]) -> i32 {
    let context = AuditContext::from_config(config);
    for target in targets {
        let verdict = if context.scope().contains(target) { "in scope" } else { "out of scope" };
        println!("{:<48}  {}", target, verdict);
    }
    0
}

fn main() {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        _ => Level::DEBUG,
    };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();

    if let Commands::Scope { config, targets } = &cli.command {
        let code = match AuditConfig::load(config) {
            Ok(audit) => cmd_scope(&audit, targets),
            Err(e) => {
                eprintln!("Error: {}: {}", config.display(), e);
                1
            }
        };
        std::process::exit(code);
    }

    let store = match open_store(cli.db) {
        Ok(store) => store,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };
    let code = match cli.command {
        Commands::List { kind, subtype } => cmd_list(&store, &filter(kind, subtype)),
        Commands::Show { identity } => cmd_show(&store, &identity),
        Commands::Count { kind, subtype } => cmd_count(&store, &filter(kind, subtype)),
        Commands::Scope { .. } => 0,
    };
    std::process::exit(code);
}
