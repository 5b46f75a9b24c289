//! shelfdb CLI
//!
//! Command-line interface for inspecting and feeding shelfdb storage trees.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use shelfdb::index::ValueIndex;
use shelfdb::loader::TableLoader;
use shelfdb::{
    sparse_pull, Config, Context, FileEnvelope, FileStorage, Meta, Row, ShelfError, Storage,
    StorageConfig, StorageManager, Value,
};
use tracing_subscriber::{fmt, EnvFilter};

/// shelfdb CLI
#[derive(Parser, Debug)]
#[command(name = "shelfdb-cli")]
#[command(about = "CLI for shelfdb envelope storage")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Build a storage tree from a JSON storage configuration
    Build {
        /// Configuration file
        config: PathBuf,
    },

    /// Print the shelves and loaders of a storage directory
    Ls {
        /// Storage directory
        dir: PathBuf,
    },

    /// Append a row to a table loader
    Push {
        /// Storage directory
        dir: PathBuf,

        /// Dotted loader path
        loader: String,

        /// One value per column
        values: Vec<String>,
    },

    /// Query a table loader through a column index
    Query {
        /// Storage directory
        dir: PathBuf,

        /// Dotted loader path
        loader: String,

        /// Indexed column
        column: String,

        /// Lower bound (or exact key without `to`)
        from: String,

        /// Upper bound
        to: Option<String>,

        /// Down-sample to at most this many rows
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Extend an envelope's recorded data length to its file size
    Repair {
        /// Envelope file
        file: PathBuf,
    },
}

fn main() {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,shelfdb=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    tracing::debug!("shelfdb CLI v{}", shelfdb::VERSION);

    if let Err(e) = run(args.command) {
        tracing::error!("{}", e);
        std::process::exit(1);
    }
}

fn run(command: Commands) -> shelfdb::Result<()> {
    match command {
        Commands::Build { config } => {
            let text = std::fs::read_to_string(&config)?;
            let meta = Meta::from_json_str(&text)?;
            let base = config.parent().unwrap_or_else(|| Path::new("."));
            let context = Context::new(Config::builder().working_dir(base).build())?;

            let manager = StorageManager::with_default_backends(context);
            let storage = manager.build_storage(&meta)?;
            print_tree(storage.as_ref(), 0)?;
            manager.close_all();
        }

        Commands::Ls { dir } => {
            let storage = open_storage(&dir, true)?;
            print_tree(&*storage, 0)?;
            storage.close();
        }

        Commands::Push {
            dir,
            loader,
            values,
        } => {
            let storage = open_storage(&dir, false)?;
            let loader = storage
                .get_loader(&loader)
                .ok_or_else(|| ShelfError::NotFound(format!("Loader '{}'", loader)))?;
            let table = as_table(loader.as_table(), loader.name())?;

            let columns = table.format().columns();
            if values.len() != columns.len() {
                return Err(ShelfError::Schema(format!(
                    "Expected {} values, got {}",
                    columns.len(),
                    values.len()
                )));
            }
            let row = columns
                .iter()
                .zip(&values)
                .map(|(column, text)| Value::parse_as(text, column.value_type))
                .collect::<shelfdb::Result<Vec<_>>>()?;
            table.push(Row::new(row))?;
            storage.close();
        }

        Commands::Query {
            dir,
            loader,
            column,
            from,
            to,
            limit,
        } => {
            let storage = open_storage(&dir, true)?;
            let loader = storage
                .get_loader(&loader)
                .ok_or_else(|| ShelfError::NotFound(format!("Loader '{}'", loader)))?;
            let table = as_table(loader.as_table(), loader.name())?;

            let position = table
                .format()
                .position(&column)
                .ok_or_else(|| ShelfError::Schema(format!("No column '{}'", column)))?;
            let value_type = table.format().columns()[position].value_type;
            let from = Value::parse_as(&from, value_type)?;
            let to = match to {
                Some(to) => Value::parse_as(&to, value_type)?,
                None => from.clone(),
            };

            let index = table.get_index(&column)?;
            let rows = match limit {
                Some(limit) => sparse_pull(&*index, &from, &to, limit)?,
                None => index.pull_range(&from, &to)?,
            };
            for row in rows {
                let cells: Vec<String> = row.values().iter().map(|v| v.to_string()).collect();
                println!("{}", cells.join("\t"));
            }
            storage.close();
        }

        Commands::Repair { file } => {
            let envelope = FileEnvelope::open(&file, false)?;
            match envelope.reconcile_length()? {
                Some(length) => println!("{}: data length repaired to {}", file.display(), length),
                None => println!("{}: tag is consistent", file.display()),
            }
        }
    }
    Ok(())
}

fn open_storage(dir: &Path, read_only: bool) -> shelfdb::Result<Arc<FileStorage>> {
    let context = Context::new(Config::default())?;
    let meta = StorageConfig::file_meta(dir).with("readOnly", read_only);
    let config = StorageConfig::from_meta(&meta, context.config())?;
    FileStorage::open(&config, context)
}

fn as_table<'a>(table: Option<&'a TableLoader>, name: &str) -> shelfdb::Result<&'a TableLoader> {
    table.ok_or_else(|| ShelfError::Config(format!("Loader '{}' is not a table", name)))
}

fn print_tree(storage: &dyn Storage, depth: usize) -> shelfdb::Result<()> {
    let indent = "  ".repeat(depth);
    println!("{}{}/", indent, storage.name());

    for name in storage.loader_names() {
        if let Some(loader) = storage.get_loader(&name) {
            println!(
                "{}  {} [{}] {} bytes",
                indent,
                name,
                loader.kind().as_str(),
                loader.base().envelope().data_length()?
            );
        }
    }
    for name in storage.shelf_names() {
        if let Some(shelf) = storage.get_shelf(&name) {
            print_tree(shelf.as_ref(), depth + 1)?;
        }
    }
    Ok(())
}
