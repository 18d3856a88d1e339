use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::bail;
use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use airlift::config::{ServerConfig, ServerConfigOverrides};
use airlift::keys::{generate_access_key, generate_id, generate_key};
use airlift::server::{AppState, create_router};
use airlift::storage::{BlobService, FsObjectStore};
use airlift::store::{SqliteStore, Store};
use airlift::types::{AccessKey, Account};

#[cfg(unix)]
fn set_restrictive_permissions(path: &std::path::Path) {
    use std::os::unix::fs::PermissionsExt;
    if let Err(e) = fs::set_permissions(path, fs::Permissions::from_mode(0o600)) {
        tracing::warn!("Failed to set permissions on {}: {e}", path.display());
    }
}

#[derive(Parser)]
#[command(name = "airlift")]
#[command(about = "An over-the-air code-push update server", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Administrative commands
    Admin {
        #[command(subcommand)]
        command: AdminCommands,
    },

    /// Start the server
    Serve {
        /// Host to bind to
        #[arg(long)]
        host: Option<String>,

        /// Port to bind to
        #[arg(long, short)]
        port: Option<u16>,

        /// Data directory for the database and bundle storage
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// Public base URL for download links (e.g. "https://ota.example.com").
        /// If not set, links point at the bind address.
        #[arg(long)]
        public_base_url: Option<String>,

        /// Path to a TOML config file
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum AdminCommands {
    /// Initialize the server (create database, signing secret, and the
    /// first account)
    Init {
        /// Data directory for the database and bundle storage
        #[arg(long, default_value = "./data")]
        data_dir: PathBuf,

        /// Email for the first account
        #[arg(long)]
        email: Option<String>,

        /// Display name for the first account
        #[arg(long)]
        name: Option<String>,

        /// Skip interactive prompts
        #[arg(long)]
        non_interactive: bool,
    },
}

fn create_bootstrap_account(
    store: &SqliteStore,
    data_dir: &std::path::Path,
    email: String,
    name: String,
) -> anyhow::Result<()> {
    let account = Account {
        id: generate_id(),
        email,
        name,
        linked_providers: Vec::new(),
        created_time: Utc::now(),
    };
    store.create_account(&account)?;

    let key = AccessKey {
        id: generate_id(),
        account_id: account.id.clone(),
        name: generate_access_key(),
        friendly_name: "bootstrap".to_string(),
        created_by: "airlift admin init".to_string(),
        created_time: Utc::now(),
        expires: None,
        is_session: false,
    };
    store.create_access_key(&key)?;

    let key_file = data_dir.join(".bootstrap_key");
    fs::write(&key_file, &key.name)?;
    #[cfg(unix)]
    set_restrictive_permissions(&key_file);

    println!();
    println!("========================================");
    println!("Created account '{}' with access key:", account.email);
    println!();
    println!("  {}", key.name);
    println!();
    println!("Key also written to: {}", key_file.display());
    println!("========================================");
    println!();

    Ok(())
}

fn prompt_bootstrap_account(store: &SqliteStore, data_dir: &std::path::Path) -> anyhow::Result<()> {
    let create = inquire::Confirm::new("Would you like to create the first account?")
        .with_default(true)
        .prompt()?;

    if !create {
        return Ok(());
    }

    let email = inquire::Text::new("Email:")
        .with_validator(|input: &str| {
            if input.contains('@') {
                Ok(inquire::validator::Validation::Valid)
            } else {
                Err("Please enter a valid email address".into())
            }
        })
        .prompt()?;

    let name = inquire::Text::new("Name:")
        .with_validator(|input: &str| {
            if input.trim().is_empty() {
                Err("Name cannot be empty".into())
            } else {
                Ok(inquire::validator::Validation::Valid)
            }
        })
        .prompt()?;

    create_bootstrap_account(store, data_dir, email, name)
}

fn run_init(
    data_dir: PathBuf,
    email: Option<String>,
    name: Option<String>,
    non_interactive: bool,
) -> anyhow::Result<()> {
    fs::create_dir_all(&data_dir)?;

    let secret_file = data_dir.join(".signing_secret");
    if secret_file.exists() {
        bail!(
            "Server already initialized. Signing secret exists at: {}",
            secret_file.display()
        );
    }

    let store = SqliteStore::new(data_dir.join("airlift.db"))?;
    store.initialize()?;

    fs::write(&secret_file, generate_key(""))?;
    #[cfg(unix)]
    set_restrictive_permissions(&secret_file);

    println!("Initialized database and signing secret in {}", data_dir.display());

    match email {
        Some(email) => {
            let name = name.unwrap_or_else(|| email.clone());
            create_bootstrap_account(&store, &data_dir, email, name)?;
        }
        None if !non_interactive => {
            prompt_bootstrap_account(&store, &data_dir)?;
        }
        None => {}
    }

    Ok(())
}

async fn run_serve(config: ServerConfig) -> anyhow::Result<()> {
    let secret_file = config.signing_secret_path();
    let signing_secret = match &config.url_signing_secret {
        Some(secret) => secret.clone(),
        None => {
            if !secret_file.exists() {
                bail!(
                    "Server not initialized. Run 'airlift admin init' first to create the database and signing secret."
                );
            }
            fs::read_to_string(&secret_file)?.trim().to_string()
        }
    };

    let store = SqliteStore::new(config.db_path())?;
    store.initialize()?;

    let blobs = Arc::new(BlobService::new(
        Arc::new(FsObjectStore::new(&config.data_dir)),
        config.base_url(),
        signing_secret,
    ));

    let state = Arc::new(AppState::new(Arc::new(store), blobs));
    let app = create_router(state, &config.cors_origins);
    let addr = config.socket_addr()?;

    if !config.enable_account_registration {
        info!("Account registration is disabled; unknown emails will be rejected upstream");
    }
    info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("airlift=info".parse()?))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Admin { command } => match command {
            AdminCommands::Init {
                data_dir,
                email,
                name,
                non_interactive,
            } => {
                run_init(data_dir, email, name, non_interactive)?;
            }
        },
        Commands::Serve {
            host,
            port,
            data_dir,
            public_base_url,
            config,
        } => {
            let config = ServerConfig::load_with_overrides(
                config.as_deref(),
                ServerConfigOverrides {
                    host,
                    port,
                    data_dir,
                    public_base_url,
                },
            )?;
            run_serve(config).await?;
        }
    }

    Ok(())
}
