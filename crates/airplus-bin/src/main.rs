//! Air+ bridge binary.
//!
//! `login` walks the OAuth2 authorization-code flow and stores the resulting
//! credential set; `devices` lists the account's purifiers; `run` bridges one
//! device until interrupted.

use airplus_auth::{resolve_expiry, AuthManager, CredentialUpdate, OAuthClient, VendorClient};
use airplus_coordinator::DeviceCoordinator;
use airplus_core::{init_logging, BridgeConfig, DEFAULT_CLIENT_ID};
use anyhow::{anyhow, Context, Result};
use chrono::{TimeZone, Utc};
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// Air+ bridge command-line interface.
#[derive(Parser)]
#[command(name = "airplus-bridge")]
#[command(about = "Cloud bridge for Philips Air+ purifiers")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    /// Path to a bridge configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Path to the stored credential set
    #[arg(long, default_value = "airplus-credentials.json", global = true)]
    credentials: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Log in through the OAuth2 authorization-code flow
    Login,
    /// List devices on the account
    Devices,
    /// Run the bridge for one device
    Run {
        /// Device UUID (defaults to the first device on the account)
        #[arg(long)]
        device: Option<String>,
    },
}

/// Credential set persisted between runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredCredentials {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    /// Absolute expiry in epoch seconds.
    #[serde(default)]
    expires_at: Option<i64>,
    #[serde(default)]
    client_id: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    let config = match &cli.config {
        Some(path) => BridgeConfig::load_from_file(path)?,
        None => BridgeConfig::new(),
    };

    match cli.command {
        Commands::Login => login(config, &cli.credentials).await,
        Commands::Devices => devices(config, &cli.credentials).await,
        Commands::Run { device } => run(config, cli.credentials.clone(), device).await,
    }
}

async fn login(config: BridgeConfig, credentials_path: &Path) -> Result<()> {
    let oauth = OAuthClient::new(config.oidc.clone(), DEFAULT_CLIENT_ID);
    let flow_id = uuid::Uuid::new_v4().to_string();
    let url = oauth.generate_authorize_url(&flow_id);

    println!("Open this URL in a browser and log in:\n\n{url}\n");
    print!("Paste the redirect URL or authorization code: ");
    std::io::stdout().flush()?;
    let mut code = String::new();
    std::io::stdin().read_line(&mut code)?;

    let response = oauth.request_token(&code, &flow_id).await?;
    let stored = StoredCredentials {
        access_token: response
            .access_token
            .clone()
            .ok_or_else(|| anyhow!("token response carried no access token"))?,
        refresh_token: response.refresh_token.clone(),
        expires_at: resolve_expiry(&response, Utc::now()).map(|at| at.timestamp()),
        client_id: Some(DEFAULT_CLIENT_ID.to_string()),
    };
    save_credentials(credentials_path, &stored)?;

    println!("Logged in; credentials saved to {}", credentials_path.display());
    Ok(())
}

async fn devices(config: BridgeConfig, credentials_path: &Path) -> Result<()> {
    let stored = load_credentials(credentials_path)?;
    let api = VendorClient::new(config.api_base_url());
    let devices = api.list_devices(&stored.access_token).await?;

    if devices.is_empty() {
        println!("No devices on this account.");
        return Ok(());
    }
    for device in devices {
        println!("{}  {}  {}", device.uuid(), device.device_type(), device.name());
    }
    Ok(())
}

async fn run(config: BridgeConfig, credentials_path: PathBuf, device: Option<String>) -> Result<()> {
    let stored = load_credentials(&credentials_path)?;
    let client_id = stored
        .client_id
        .clone()
        .unwrap_or_else(|| DEFAULT_CLIENT_ID.to_string());
    let expires_at = stored
        .expires_at
        .and_then(|secs| Utc.timestamp_opt(secs, 0).single());

    let mut auth = AuthManager::new(config.oidc.clone(), config.api_base_url(), Some(client_id))
        .with_tokens(
            Some(stored.access_token.clone()),
            stored.refresh_token.clone(),
            expires_at,
        )
        .with_refresh_lookahead(chrono::Duration::seconds(config.refresh_lookahead_secs as i64));

    // Persist rotated tokens so a restart picks up the newest refresh token.
    let persist_path = credentials_path.clone();
    auth.set_refresh_callback(Arc::new(move |update: CredentialUpdate| {
        let path = persist_path.clone();
        Box::pin(async move {
            let stored = StoredCredentials {
                access_token: update.access_token.unwrap_or_default(),
                refresh_token: update.refresh_token,
                expires_at: update.expires_at,
                client_id: update.client_id,
            };
            save_credentials(&path, &stored).map_err(Into::into)
        })
    }));

    let api = VendorClient::new(config.api_base_url());
    let devices = api.list_devices(&stored.access_token).await?;
    let selected = match &device {
        Some(wanted) => devices
            .into_iter()
            .find(|d| &d.uuid() == wanted)
            .ok_or_else(|| anyhow!("device {wanted} not found on this account"))?,
        None => devices
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("no devices on this account"))?,
    };
    info!(device = %selected.uuid(), name = %selected.name(), "Bridging device");

    let coordinator =
        DeviceCoordinator::setup(config, auth, &selected.uuid(), &selected.name()).await?;
    let runner = tokio::spawn(Arc::clone(&coordinator).run());

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    info!("Shutdown requested");
    coordinator.shutdown();
    let _ = runner.await;
    Ok(())
}

fn load_credentials(path: &Path) -> Result<StoredCredentials> {
    let content = std::fs::read_to_string(path).with_context(|| {
        format!(
            "reading credentials from {} (run `airplus-bridge login` first)",
            path.display()
        )
    })?;
    serde_json::from_str(&content).context("parsing stored credentials")
}

fn save_credentials(path: &Path, credentials: &StoredCredentials) -> Result<()> {
    let content = serde_json::to_string_pretty(credentials)?;
    std::fs::write(path, content)
        .with_context(|| format!("writing credentials to {}", path.display()))?;
    Ok(())
}
