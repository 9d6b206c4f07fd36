//! Haulcache - command line client for the logistics backend.
//!
//! Thin composition root over `haulcache-core`: wires the keyring token
//! store, the session profile store and one `ApiClient`, then runs a single
//! command against them.

use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use haulcache_core::auth::{KeyringTokenStore, ProfileStore, SessionManager};
use haulcache_core::{ApiClient, Config, FetchOptions, PreloadReport, ResourceState, Status};
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "haulcache")]
#[command(about = "Cached access to the logistics backend")]
#[command(version)]
struct Cli {
    /// Backend base URL, e.g. https://haul.example/api
    #[arg(long, global = true, env = "HAULCACHE_API_URL")]
    base_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Sign in, store the token in the OS keychain and report the role warm-up
    Login {
        #[arg(long)]
        email: Option<String>,
    },
    /// Forget the token, the stored profile and cached responses
    Logout,
    /// Show the signed-in user
    Whoami {
        /// Ask the backend instead of using the stored profile
        #[arg(long)]
        refresh: bool,
    },
    /// Fetch a resource and print it as JSON
    Get {
        path: String,
        #[arg(long)]
        no_cache: bool,
        /// Request timeout in seconds
        #[arg(long)]
        timeout: Option<u64>,
    },
    /// Subscribe to a resource and print every new revision
    Watch {
        path: String,
        /// Refetch interval in seconds
        #[arg(long, default_value_t = 30)]
        every: u64,
    },
    /// Wake a sleeping backend and report whether it answers
    Wake,
    /// Warm the cache for the signed-in user's role
    Preload,
}

/// Initialize the tracing subscriber for logging
fn init_tracing() {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    init_tracing();
    let cli = Cli::parse();

    let mut config = Config::load()?;
    if let Some(url) = cli.base_url {
        config.api.base_url = url;
    }
    debug!(base_url = %config.api.base_url, "Using backend");

    let tokens = Arc::new(KeyringTokenStore::new());
    let client = ApiClient::new(config.api.clone(), tokens.clone())?;
    let profiles = ProfileStore::new(config.cache_dir()?);
    let session = SessionManager::new(client.clone(), tokens, profiles);

    match cli.command {
        Command::Login { email } => login(&session, &mut config, email).await,
        Command::Logout => {
            session.logout()?;
            println!("Signed out");
            Ok(())
        }
        Command::Whoami { refresh } => whoami(&session, refresh).await,
        Command::Get {
            path,
            no_cache,
            timeout,
        } => get(&client, &path, no_cache, timeout).await,
        Command::Watch { path, every } => watch(&client, &path, every).await,
        Command::Wake => {
            client
                .wake_up()
                .await
                .context("Backend did not wake up")?;
            println!("Backend is awake");
            Ok(())
        }
        Command::Preload => {
            print_report(&client.preload_critical_data().await);
            Ok(())
        }
    }
}

async fn login(session: &SessionManager, config: &mut Config, email: Option<String>) -> Result<()> {
    let email = match email {
        Some(email) => email,
        None => prompt_email(config.last_email.as_deref())?,
    };
    let password = rpassword::prompt_password("Password: ")?;

    eprintln!("Signing in...");
    let user = session.login(&email, &password).await?;

    config.last_email = Some(email);
    if let Err(e) = config.save() {
        warn!(error = %e, "Failed to save config");
    }

    println!("Signed in as {} ({})", user.display_name(), user.role);

    // The runtime stops when this command returns, so wait for the warm-up
    if let Some(report) = session.finish_preload().await {
        print_report(&report);
    }
    Ok(())
}

fn prompt_email(last_email: Option<&str>) -> Result<String> {
    match last_email {
        Some(last) => print!("Email [{}]: ", last),
        None => print!("Email: "),
    }
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    let input = input.trim();

    match (input.is_empty(), last_email) {
        (false, _) => Ok(input.to_string()),
        (true, Some(last)) => Ok(last.to_string()),
        (true, None) => anyhow::bail!("Email required"),
    }
}

async fn whoami(session: &SessionManager, refresh: bool) -> Result<()> {
    let user = if refresh {
        session.refresh_profile().await?
    } else {
        session
            .cached_user()
            .ok_or_else(|| anyhow::anyhow!("Not signed in. Run `haulcache login` first."))?
    };
    println!("{} <{}> - {}", user.display_name(), user.email, user.role);
    Ok(())
}

async fn get(client: &ApiClient, path: &str, no_cache: bool, timeout: Option<u64>) -> Result<()> {
    let mut options = FetchOptions::default();
    if no_cache {
        options = options.no_cache();
    }
    if let Some(secs) = timeout {
        options = options.with_timeout(Duration::from_secs(secs));
    }

    let payload = client
        .fetch(path, &options)
        .await
        .with_context(|| format!("GET {} failed", path))?;
    println!("{}", serde_json::to_string_pretty(&payload)?);
    Ok(())
}

async fn watch(client: &ApiClient, path: &str, every: u64) -> Result<()> {
    client.start_keep_alive();
    let subscription = client.subscribe(path, FetchOptions::default());
    let mut changes = subscription.watch();
    let mut ticks = tokio::time::interval(Duration::from_secs(every.max(1)));
    // First tick completes immediately; the subscription already loads on its own
    ticks.tick().await;
    info!(path, every, "Watching resource");

    loop {
        tokio::select! {
            changed = changes.changed() => {
                if changed.is_err() {
                    return Ok(());
                }
                let state = changes.borrow_and_update().clone();
                print_state(&state)?;
            }
            _ = ticks.tick() => {
                if let Err(e) = subscription.refetch().await {
                    debug!(path, error = %e, "Refetch failed");
                }
            }
        }
    }
}

fn print_state(state: &ResourceState) -> Result<()> {
    match state.status {
        Status::Idle => {}
        Status::Loading => eprintln!("Loading..."),
        Status::Success => {
            let data = state.data.clone().unwrap_or_default();
            println!("[revision {}]", state.revision);
            println!("{}", serde_json::to_string_pretty(&data)?);
        }
        Status::Error => {
            if let Some(ref e) = state.error {
                eprintln!("[revision {}] {}", state.revision, e.user_message());
            }
        }
    }
    Ok(())
}

fn print_report(report: &PreloadReport) {
    match report {
        PreloadReport::NoCredential => println!("Not signed in, nothing to preload"),
        PreloadReport::RoleUnavailable(e) => println!("Could not determine role: {}", e.user_message()),
        PreloadReport::Completed {
            role,
            succeeded,
            failed,
        } => println!("Preloaded {} resource(s) for {} ({} failed)", succeeded, role, failed),
    }
}
