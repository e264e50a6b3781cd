//! Certward - Main entry point
//!
//! Issues and renews Let's Encrypt certificates over HTTP-01.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use certward::server::{self, ChallengeEndpoint};
use certward::{challenge_store, CertManager, IssueOutcome};
use certward_config::Config;

/// Certward - ACME certificate issuance and renewal
#[derive(Parser, Debug)]
#[command(name = "certward")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file path
    #[arg(short = 'c', long = "config", env = "CERTWARD_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging (debug level)
    #[arg(long = "verbose", global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long = "log-json", global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Validate configuration and exit
    Check,
    /// Obtain a certificate for a set of domains
    Issue {
        /// Domain names covered by the certificate
        #[arg(short = 'd', long = "domain", required = true, num_args = 1..)]
        domains: Vec<String>,
    },
    /// Renew owned certificates close to expiry, once
    Renew,
    /// Serve the challenge endpoint only
    Serve,
    /// Serve the challenge endpoint and renew periodically
    Daemon,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_json);

    let config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;

    match cli.command {
        Commands::Check => check_config(&config),
        Commands::Issue { domains } => issue(&config, &domains).await,
        Commands::Renew => renew(&config).await,
        Commands::Serve => serve(&config).await,
        Commands::Daemon => daemon(&config).await,
    }
}

fn init_tracing(verbose: bool, json: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("certward={0},certward_config={0}", default_level)));

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    }
}

fn check_config(config: &Config) -> Result<()> {
    listen_addr(config)?;

    info!("Configuration test successful:");
    info!("  - ACME account: {}", config.acme.email);
    info!(
        "  - directory: {}",
        if config.acme.staging { "staging" } else { "production" }
    );
    info!("  - owner tag: {}", config.owner_tag());
    info!("  - certificates: {}", config.storage.certificates.display());
    match &config.storage.challenges {
        Some(path) => info!("  - challenges: {}", path.display()),
        None => info!(
            "  - challenges: in-process, `issue` and `renew` serve them on {}",
            config.server.listen
        ),
    }
    info!("  - challenge endpoint: {}", config.server.listen);

    Ok(())
}

fn listen_addr(config: &Config) -> Result<SocketAddr> {
    config
        .server
        .listen
        .parse()
        .with_context(|| format!("Invalid listen address: {}", config.server.listen))
}

async fn issue(config: &Config, domains: &[String]) -> Result<()> {
    let challenges = challenge_store(&config.storage)?;
    let endpoint =
        server::in_process_endpoint(&config.storage, listen_addr(config)?, challenges.clone())
            .await?;
    let manager = CertManager::connect(config, challenges).await?;

    let result = manager.add_certificate(domains).await;
    stop_endpoint(endpoint).await;

    match result? {
        IssueOutcome::Existing(handle) => {
            info!(handle = %handle, "Certificate already present, nothing to do");
        }
        IssueOutcome::Issued { handle, expires_at } => {
            info!(handle = %handle, expires_at = %expires_at, "Certificate issued");
        }
    }
    Ok(())
}

async fn renew(config: &Config) -> Result<()> {
    let challenges = challenge_store(&config.storage)?;
    let endpoint =
        server::in_process_endpoint(&config.storage, listen_addr(config)?, challenges.clone())
            .await?;
    let manager = CertManager::connect(config, challenges).await?;

    let result = manager.renew_certificates(Utc::now()).await;
    stop_endpoint(endpoint).await;

    let report = result?;
    info!(
        renewed = report.renewed.len(),
        not_due = report.not_due.len(),
        anomalies = report.anomalies.len(),
        failed = report.failed.len(),
        "Renewal pass finished"
    );

    if !report.failed.is_empty() {
        anyhow::bail!("{} certificate(s) failed to renew", report.failed.len());
    }
    Ok(())
}

async fn stop_endpoint(endpoint: Option<ChallengeEndpoint>) {
    if let Some(endpoint) = endpoint {
        if let Err(e) = endpoint.stop().await {
            warn!(error = %e, "Challenge endpoint did not stop cleanly");
        }
    }
}

async fn serve(config: &Config) -> Result<()> {
    let listen = listen_addr(config)?;
    let challenges = challenge_store(&config.storage)?;

    server::serve(listen, challenges, shutdown_signal()).await
}

async fn daemon(config: &Config) -> Result<()> {
    let listen = listen_addr(config)?;
    let challenges = challenge_store(&config.storage)?;
    let manager = CertManager::connect(config, challenges.clone()).await?;

    let scheduler = manager.scheduler(Duration::from_secs(config.renewal.check_interval_secs));
    info!(
        interval_secs = scheduler.check_interval().as_secs(),
        "Starting renewal scheduler"
    );
    let renewals = tokio::spawn(scheduler.run());

    let result = server::serve(listen, Arc::clone(&challenges), shutdown_signal()).await;

    renewals.abort();
    if let Err(e) = &result {
        error!(error = %e, "Challenge endpoint stopped");
    }
    info!("Certward stopped");
    result
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received shutdown signal, initiating graceful shutdown"),
        Err(e) => error!(error = %e, "Failed to listen for shutdown signal"),
    }
}
