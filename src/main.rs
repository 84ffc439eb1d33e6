use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

use atomimport::config::Config;
use atomimport::feed::{FeedClient, IngestError, Walker};
use atomimport::ingest::DatasetPersister;
use atomimport::storage::{Database, DatabaseError, FileStore};
use atomimport::util::validate_feed_url;

#[derive(Parser, Debug)]
#[command(
    name = "atomimport",
    about = "Ingest datasets published as Atom feeds, each entry exactly once"
)]
struct Args {
    /// Config file (TOML)
    #[arg(long, global = true, value_name = "FILE", default_value = "atomimport.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Walk a feed and ingest every entry not seen before
    Ingest {
        /// URL of the newest feed page
        feed_url: String,

        /// HTTP Basic username (overrides the config file)
        #[arg(long)]
        username: Option<String>,
    },
    /// Register a user that feed authors can be matched against
    AddUser {
        username: String,

        #[arg(long)]
        email: Option<String>,
    },
    /// List ingested datasets in creation order
    List,
    /// List registered users
    Users,
}

async fn open_database(path: &Path) -> Result<Database> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory '{}'", parent.display()))?;
    }
    let path_str = path
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("Invalid UTF-8 in database path"))?;
    match Database::open(path_str).await {
        Ok(db) => Ok(db),
        Err(DatabaseError::Locked) => {
            anyhow::bail!("Database '{}' is locked by another process", path.display())
        }
        Err(e) => Err(anyhow::anyhow!("Failed to open database: {}", e)),
    }
}

async fn ingest(config: Config, feed_url: &str, username: Option<String>) -> Result<()> {
    let mut config = config;
    if username.is_some() {
        config.username = username;
    }

    let url = validate_feed_url(feed_url).context("Invalid feed URL")?;

    let mut transport = config.transport();
    transport.realm_host = url.host_str().map(str::to_string);
    let client = FeedClient::new(transport).context("Failed to build HTTP client")?;

    let db = open_database(&config.database_path).await?;
    let files = FileStore::new(&config.file_store_dir).with_context(|| {
        format!(
            "Failed to open file store '{}'",
            config.file_store_dir.display()
        )
    })?;

    let persister = DatasetPersister::new(db, files, client.clone())
        .await
        .context("Failed to initialise persister")?
        .owner_policy(config.owner_policy());

    let walker = Walker::with_client(url.as_str(), persister, client)?
        .page_failure(config.page_failure)
        .max_pages(config.max_pages);

    match walker.ingest().await {
        Ok(report) => {
            println!(
                "Ingested {} new of {} entries across {} page(s)",
                report.processed, report.discovered, report.pages
            );
            Ok(())
        }
        Err(IngestError::Credential(e)) => {
            anyhow::bail!("{e}. Set `username` in the config and ATOMIMPORT_PASSWORD")
        }
        Err(e) => Err(e).context("Ingestion stopped"),
    }
}

async fn add_user(config: &Config, username: &str, email: Option<&str>) -> Result<()> {
    let db = open_database(&config.database_path).await?;
    let user = db
        .create_user(username, email)
        .await
        .with_context(|| format!("Failed to add user '{username}'"))?;
    tracing::info!(user_id = user.id, username = %user.username, "User created");
    println!("Added user {} (id {})", user.username, user.id);
    Ok(())
}

async fn list(config: &Config) -> Result<()> {
    let db = open_database(&config.database_path).await?;
    let datasets = db
        .list_datasets()
        .await
        .context("Failed to list datasets")?;

    if datasets.is_empty() {
        println!("No datasets ingested yet");
        return Ok(());
    }

    for dataset in datasets {
        println!(
            "{}\t{}\t{}\t{} file(s)",
            dataset.id,
            dataset.entry_id,
            dataset.description,
            dataset.files.len()
        );
        for file in &dataset.files {
            println!("\t{}\t{}\t{}", file.filename, file.mimetype, file.location);
        }
    }
    Ok(())
}

async fn users(config: &Config) -> Result<()> {
    let db = open_database(&config.database_path).await?;
    let users = db.list_users().await.context("Failed to list users")?;

    if users.is_empty() {
        println!("No users registered yet");
        return Ok(());
    }

    for user in users {
        println!(
            "{}\t{}\t{}",
            user.id,
            user.username,
            user.email.as_deref().unwrap_or("-")
        );
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let config = Config::load(&args.config)
        .with_context(|| format!("Failed to load config '{}'", args.config.display()))?;
    tracing::debug!(config = ?config, "Configuration resolved");

    match args.command {
        Command::Ingest { feed_url, username } => ingest(config, &feed_url, username).await,
        Command::AddUser { username, email } => add_user(&config, &username, email.as_deref()).await,
        Command::List => list(&config).await,
        Command::Users => users(&config).await,
    }
}
