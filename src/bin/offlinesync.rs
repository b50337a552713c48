use std::sync::Arc;

use clap::{Parser, Subcommand};

use offlinesync::{CacheMode, CacheStore, GetOptions, Method, QueuedRequest};

const TOKEN_ENV: &str = "OFFLINESYNC_API_TOKEN";

#[derive(Parser)]
#[command(name = "offlinesync", about = "Offline cache and sync client for REST backends")]
struct Cli {
    /// Database path (default: ~/.offlinesync/offlinesync.db)
    #[arg(long)]
    db: Option<String>,

    /// Increase logging verbosity
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show cache, queue and sync status
    Status,
    /// Probe the backend and report connectivity
    Check,
    /// Upload queued changes and download deltas
    Sync {
        /// Confirm a large download
        #[arg(long)]
        manual: bool,
        /// Only sync if uploads are pending or the last sync has expired
        #[arg(long, conflicts_with = "manual")]
        if_needed: bool,
    },
    /// Clear the local cache and sync everything from scratch
    Resync,
    /// Read a resource through the cache
    Get {
        resource: String,
        /// Entity id (omit to read the list)
        #[arg(long)]
        id: Option<String>,
        /// Query parameter as key=value (repeatable)
        #[arg(long = "param", value_name = "KEY=VALUE")]
        params: Vec<String>,
        /// no-cache, network-first, cache-first or cache-only
        #[arg(long, default_value = "network-first")]
        mode: String,
    },
    /// Send a change, queueing it if the backend is unreachable
    Send {
        /// post, put or patch
        method: String,
        resource: String,
        #[arg(long)]
        id: Option<String>,
        /// JSON request body
        #[arg(long)]
        body: String,
    },
    /// Inspect the upload queue
    Queue {
        #[command(subcommand)]
        action: QueueAction,
    },
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum QueueAction {
    /// List queued requests
    List,
    /// Drop a queued request by its position in `queue list`
    Delete { index: usize },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Get a config value
    Get { key: String },
    /// Set a config value
    Set { key: String, value: String },
    /// Remove a config value
    Unset { key: String },
    /// List all config values
    List,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let db = match &cli.db {
        Some(path) => offlinesync::Database::open_at(path).await?,
        None => offlinesync::Database::open().await?,
    };

    match cli.command {
        Commands::Status => {
            print_status(&db).await?;
        }
        Commands::Config { action } => {
            handle_config(&db, action).await?;
        }
        Commands::Queue { action } => {
            handle_queue(&db, action).await?;
        }
        Commands::Check => {
            let client = connect(&db).await?;
            if client.check_network().await {
                println!("Online: {}", client.config().probe_url);
            } else {
                println!("Offline: {} is unreachable", client.config().probe_url);
            }
        }
        Commands::Sync { manual, if_needed } => {
            let client = connect(&db).await?;
            if !client.check_network().await {
                anyhow::bail!("Backend is unreachable; try again when online.");
            }
            if if_needed {
                match client.synchronize_if_needed().await {
                    Some(report) => print_sync_report(&report),
                    None => println!("Cache is up to date."),
                }
            } else {
                print_sync_report(&client.synchronize(manual).await);
            }
        }
        Commands::Resync => {
            let client = connect(&db).await?;
            if !client.check_network().await {
                anyhow::bail!("Backend is unreachable; refusing to clear the cache while offline.");
            }
            print_sync_report(&client.force_full_sync().await?);
        }
        Commands::Get {
            resource,
            id,
            params,
            mode,
        } => {
            let mut options = GetOptions::new().cache_mode(mode.parse::<CacheMode>()?);
            if let Some(id) = id {
                options = options.id(id);
            }
            for param in &params {
                let (key, value) = offlinesync::url::parse_param(param)?;
                options = options.param(key, value);
            }

            let client = connect(&db).await?;
            client.check_network().await;
            let value = client.get_resource(&resource, &options).await?;
            client.settle().await;
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
        Commands::Send {
            method,
            resource,
            id,
            body,
        } => {
            let method: Method = method.parse()?;
            if !method.is_queueable() {
                anyhow::bail!("Only post, put and patch can be sent.");
            }
            if method != Method::Post && id.is_none() {
                anyhow::bail!("{method} requires --id");
            }
            let body: serde_json::Value = serde_json::from_str(&body)?;

            let client = connect(&db).await?;
            client.check_network().await;
            match client.send(QueuedRequest::new(method, resource, id, body)).await? {
                Some(response) => println!("{}", serde_json::to_string_pretty(&response)?),
                None => println!(
                    "Queued ({} pending). Run 'offlinesync sync' when online.",
                    client.state().pending_uploads
                ),
            }
        }
    }

    Ok(())
}

async fn connect(db: &offlinesync::Database) -> anyhow::Result<offlinesync::OfflineClient> {
    let config = offlinesync::Config::load(db).await?;
    let mut transport = offlinesync::HttpTransport::new(&config.probe_url, config.request_timeout)?;
    if let Ok(token) = std::env::var(TOKEN_ENV) {
        transport = transport.with_bearer_token(token);
    }
    let store: Arc<dyn CacheStore> = Arc::new(db.clone());
    Ok(offlinesync::OfflineClient::new(store, Arc::new(transport), config).await?)
}

async fn load_queue(db: &offlinesync::Database) -> anyhow::Result<offlinesync::UploadQueue> {
    let store: Arc<dyn CacheStore> = Arc::new(db.clone());
    Ok(offlinesync::UploadQueue::load(store, true).await?)
}

async fn print_status(db: &offlinesync::Database) -> anyhow::Result<()> {
    let entries = db.entry_count().await?;
    let last_sync = offlinesync::sync::last_sync_at(db).await?;
    let pending = load_queue(db).await?.len().await;
    let api_base: Option<String> = db
        .reader()
        .call(|conn| offlinesync::storage::repository::get_config(conn, offlinesync::config::API_BASE))
        .await?;

    println!("Offline Cache Status");
    println!(
        "  Backend:   {}",
        api_base.unwrap_or_else(|| "not configured".to_string())
    );
    println!("  Entries:   {entries}");
    println!("  Pending:   {pending} queued requests");
    println!(
        "  Last sync: {}",
        last_sync
            .map(offlinesync::date_util::format_millis)
            .unwrap_or_else(|| "never".to_string())
    );
    Ok(())
}

async fn handle_queue(db: &offlinesync::Database, action: QueueAction) -> anyhow::Result<()> {
    let queue = load_queue(db).await?;
    match action {
        QueueAction::List => {
            let requests = queue.requests().await;
            if requests.is_empty() {
                println!("Upload queue is empty.");
            }
            for (index, request) in requests.iter().enumerate() {
                let target = match &request.resource_id {
                    Some(id) => format!("{}/{id}", request.resource),
                    None => request.resource.clone(),
                };
                println!("[{index}] {} {target}", request.method);
                println!("    {}", request.body);
                if let Some(ref err) = request.error {
                    println!("    Last error: {err}");
                }
            }
        }
        QueueAction::Delete { index } => {
            let requests = queue.requests().await;
            let request = requests
                .get(index)
                .ok_or_else(|| anyhow::anyhow!("No queued request at index {index}"))?;
            queue.delete_request(request).await?;
            println!("Removed {} {}.", request.method, request.resource);
        }
    }
    Ok(())
}

async fn handle_config(db: &offlinesync::Database, action: ConfigAction) -> anyhow::Result<()> {
    match action {
        ConfigAction::Get { key } => {
            let val: Option<String> = db
                .reader()
                .call({
                    let key = key.clone();
                    move |conn| offlinesync::storage::repository::get_config(conn, &key)
                })
                .await?;
            match val {
                Some(v) => println!("{key} = {v}"),
                None => println!("{key} is not set"),
            }
        }
        ConfigAction::Set { key, value } => {
            if !offlinesync::config::KEYS.contains(&key.as_str()) {
                eprintln!(
                    "Warning: '{key}' is not a known key ({})",
                    offlinesync::config::KEYS.join(", ")
                );
            }
            db.writer()
                .call(move |conn| {
                    offlinesync::storage::repository::set_config(conn, &key, &value)?;
                    Ok::<(), rusqlite::Error>(())
                })
                .await?;
            println!("Config updated.");
        }
        ConfigAction::Unset { key } => {
            let removed = db
                .writer()
                .call({
                    let key = key.clone();
                    move |conn| offlinesync::storage::repository::unset_config(conn, &key)
                })
                .await?;
            if removed {
                println!("Removed {key}.");
            } else {
                println!("{key} is not set");
            }
        }
        ConfigAction::List => {
            let items: Vec<(String, String)> = db
                .reader()
                .call(|conn| offlinesync::storage::repository::list_config(conn))
                .await?;
            if items.is_empty() {
                println!("No configuration set.");
            } else {
                for (k, v) in items {
                    println!("{k} = {v}");
                }
            }
        }
    }
    Ok(())
}

fn print_sync_report(report: &offlinesync::SyncReport) {
    println!("Sync");
    println!("  Status:   {:?}", report.status);
    println!(
        "  Uploaded: {} sent, {} pending",
        report.uploads_sent, report.uploads_failed
    );
    println!(
        "  Applied:  {} records in {} pages",
        report.records_applied, report.pages
    );
    if !report.failed_resources.is_empty() {
        println!("  Failed:   {}", report.failed_resources.join(", "));
    }
    if let Some(ref err) = report.error {
        println!("  Error:    {err}");
    }
    if report.status == offlinesync::SyncStatus::AwaitingConfirmation {
        println!("  Many changes are waiting. Run 'offlinesync sync --manual' to download them.");
    }
}
