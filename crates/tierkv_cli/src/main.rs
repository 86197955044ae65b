//! TierKV CLI
//!
//! Command-line tools for TierKV databases.
//!
//! # Commands
//!
//! - `create` / `drop` - Create or destroy a database
//! - `kvs-create` / `kvs-drop` / `kvs-list` - Manage collections
//! - `put` / `get` / `del` / `scan` - Read and write keys
//! - `compact` / `compact-status` - Drive and observe compaction
//! - `mclass-info` - Report media class usage

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tierkv_core::{Runtime, RuntimeConfig};
use tracing_subscriber::EnvFilter;

/// TierKV command-line database tools.
#[derive(Parser)]
#[command(name = "tierkv")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the database home directory
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Runtime configuration file (JSON)
    #[arg(global = true, long)]
    config: Option<PathBuf>,

    /// Runtime parameter `key=value`, repeatable
    #[arg(global = true, long = "rparam")]
    runtime_params: Vec<String>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a database
    Create {
        /// Create-time parameters, e.g. `storage.staging.path=/fast`
        params: Vec<String>,
    },

    /// Destroy a database and every media class directory
    Drop,

    /// Create a collection
    KvsCreate {
        /// Collection name
        name: String,
        /// Parameters, e.g. `prefix.length=4` or `mclass.policy=capacity_only`
        params: Vec<String>,
    },

    /// Drop a collection and its data
    KvsDrop {
        /// Collection name
        name: String,
    },

    /// List collections
    KvsList,

    /// Insert or overwrite a key
    Put {
        /// Collection name
        kvs: String,
        /// Key
        key: String,
        /// Value
        value: String,
        /// Compress the value with zstd
        #[arg(short, long)]
        compress: bool,
    },

    /// Print the value of a key
    Get {
        /// Collection name
        kvs: String,
        /// Key
        key: String,
    },

    /// Delete a key
    Del {
        /// Collection name
        kvs: String,
        /// Key
        key: String,
    },

    /// Print keys and values in order
    Scan {
        /// Collection name
        kvs: String,
        /// Only keys starting with this prefix
        #[arg(long)]
        prefix: Option<String>,
        /// Descending order
        #[arg(short, long)]
        reverse: bool,
        /// Maximum number of entries
        #[arg(short, long)]
        limit: Option<usize>,
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Request a compaction pass
    Compact {
        /// Cancel the pass in flight instead
        #[arg(long)]
        cancel: bool,
        /// Stop at the low watermark
        #[arg(long)]
        samp_lwm: bool,
        /// Wait until the pass finishes
        #[arg(short, long)]
        wait: bool,
    },

    /// Show compaction status
    CompactStatus {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show media class usage
    MclassInfo {
        /// Only this class (capacity, staging, pmem)
        class: Option<String>,
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let params: Vec<&str> = cli.runtime_params.iter().map(String::as_str).collect();
    let config = RuntimeConfig::load(cli.config.as_deref(), &params)?;
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(config.tracing_directive()))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let rt = Runtime::init(cli.config.as_deref(), &params)?;
    let path = cli.path.ok_or("Database path required (--path)")?;

    match cli.command {
        Commands::Create { params } => commands::database::create(&rt, &path, &params)?,
        Commands::Drop => commands::database::destroy(&rt, &path)?,
        Commands::KvsCreate { name, params } => {
            commands::kvs::create(&rt, &path, &name, &params)?;
        }
        Commands::KvsDrop { name } => commands::kvs::remove(&rt, &path, &name)?,
        Commands::KvsList => commands::kvs::list(&rt, &path)?,
        Commands::Put {
            kvs,
            key,
            value,
            compress,
        } => commands::data::put(&rt, &path, &kvs, &key, &value, compress)?,
        Commands::Get { kvs, key } => commands::data::get(&rt, &path, &kvs, &key)?,
        Commands::Del { kvs, key } => commands::data::del(&rt, &path, &kvs, &key)?,
        Commands::Scan {
            kvs,
            prefix,
            reverse,
            limit,
            format,
        } => commands::data::scan(
            &rt,
            &path,
            &kvs,
            &commands::data::ScanOptions {
                prefix,
                reverse,
                limit,
            },
            &format,
        )?,
        Commands::Compact {
            cancel,
            samp_lwm,
            wait,
        } => commands::maintenance::compact(&rt, &path, cancel, samp_lwm, wait)?,
        Commands::CompactStatus { format } => {
            commands::maintenance::compact_status(&rt, &path, &format)?;
        }
        Commands::MclassInfo { class, format } => {
            commands::maintenance::mclass_info(&rt, &path, class.as_deref(), &format)?;
        }
    }

    Ok(())
}
