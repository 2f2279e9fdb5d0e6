use clap::{Parser, Subcommand};
use lodestore::sdk::Store;
use lodestore::Options;
use serde_json::{json, Value};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Storage directory for embedded mode.
    #[arg(short, long, default_value = "storage")]
    data_dir: String,

    /// Connect to a remote server instead of the embedded engine.
    #[arg(long)]
    url: Option<String>,

    /// Bearer token for remote mode.
    #[arg(long)]
    token: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Clone)]
enum Commands {
    /// Insert one document (JSON object) or a JSON list of documents.
    Insert { collection: String, documents: String },
    /// Query a collection with a JSON filter and optional JSON options.
    Find {
        collection: String,
        #[arg(default_value = "{}")]
        filters: String,
        #[arg(long, default_value = "{}")]
        options: String,
    },
    /// Fetch a single document by id.
    Get { collection: String, id: String },
    /// Apply a JSON update to every document matching the filter.
    Update {
        collection: String,
        filters: String,
        update: String,
    },
    /// Delete documents matching a non-empty JSON filter.
    Delete { collection: String, filters: String },
    /// Delete a single document by id.
    Remove { collection: String, id: String },
    /// Count documents matching a JSON filter.
    Count {
        collection: String,
        #[arg(default_value = "{}")]
        filters: String,
    },
    /// Drop a collection: memory state and file.
    Drop { collection: String },
}

fn parse_json(label: &str, raw: &str) -> anyhow::Result<Value> {
    serde_json::from_str(raw).map_err(|e| anyhow::anyhow!("{label} is not valid JSON: {e}"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let mut options = Options::default().storage_path(&cli.data_dir);
    if let Some(url) = cli.url {
        options = options.database_url(url);
    }
    if let Some(token) = cli.token {
        options = options.token(token);
    }
    let store = Store::open(options).await?;
    store.register_shutdown_hooks();

    match cli.command {
        Commands::Insert { collection, documents } => {
            let parsed = parse_json("documents", &documents)?;
            let handle = store.collection(&collection)?;
            let report = match parsed {
                Value::Array(items) => handle.insert_many(items).await?,
                doc => handle.insert(doc).await?,
            };
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Find { collection, filters, options } => {
            let report = store
                .collection(&collection)?
                .find(parse_json("filters", &filters)?, parse_json("options", &options)?)
                .await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Get { collection, id } => {
            match store.collection(&collection)?.find_by_id(&id).await? {
                Some(doc) => println!("{}", serde_json::to_string_pretty(&doc)?),
                None => println!("null"),
            }
        }
        Commands::Update { collection, filters, update } => {
            let report = store
                .collection(&collection)?
                .update(
                    parse_json("filters", &filters)?,
                    parse_json("update", &update)?,
                    json!({}),
                )
                .await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Delete { collection, filters } => {
            let report = store
                .collection(&collection)?
                .delete(parse_json("filters", &filters)?)
                .await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Remove { collection, id } => {
            let report = store.collection(&collection)?.delete_by_id(&id).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Count { collection, filters } => {
            let count = store
                .collection(&collection)?
                .count(parse_json("filters", &filters)?)
                .await?;
            println!("{count}");
        }
        Commands::Drop { collection } => {
            let report = store.collection(&collection)?.drop().await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    store.shutdown().await;
    Ok(())
}
