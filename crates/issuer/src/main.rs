//! certkeeper command line
//!
//! Validates configuration files and runs single certificate requests
//! against an in-memory store seeded with the configured DNS profiles.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use certkeeper::{AcmeAuthority, Caller, CertificateRequest, CertificateService, MemoryStore};
use certkeeper_common::{init_tracing, Capability, CapabilitySet, LogFormat, UserId};
use certkeeper_config::{Config, EXAMPLE_CONFIG_TOML};

/// certkeeper - DNS-01 certificate issuance
#[derive(Parser, Debug)]
#[command(name = "certkeeper")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Validate a configuration file and exit
    CheckConfig {
        /// Configuration file (TOML or JSON)
        #[arg(short = 'c', long = "config", env = "CERTKEEPER_CONFIG")]
        config: PathBuf,
    },
    /// Print an annotated example configuration
    PrintConfig,
    /// Issue one certificate from a JSON create request
    Issue {
        /// Configuration file (TOML or JSON)
        #[arg(short = 'c', long = "config", env = "CERTKEEPER_CONFIG")]
        config: PathBuf,

        /// JSON file holding the create request
        #[arg(short = 'r', long = "request")]
        request: PathBuf,

        /// User recorded as the certificate's creator
        #[arg(short = 'u', long = "user", default_value = "cli")]
        user: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::CheckConfig { config } => check_config(&config),
        Commands::PrintConfig => {
            print!("{}", EXAMPLE_CONFIG_TOML);
            Ok(())
        }
        Commands::Issue {
            config,
            request,
            user,
        } => {
            let runtime = tokio::runtime::Runtime::new().context("Failed to start runtime")?;
            runtime.block_on(issue(&config, &request, user))
        }
    }
}

fn check_config(path: &Path) -> Result<()> {
    init_tracing("info", LogFormat::Pretty)?;

    info!(path = %path.display(), "Checking configuration file");
    let config = Config::from_file(path).context("Failed to load configuration file")?;

    info!(
        profiles = config.profiles.len(),
        default_profile = ?config.dns.default_profile,
        ssl_directory = %config.storage.ssl_directory.display(),
        "Configuration loaded"
    );
    if config.profiles.is_empty() {
        warn!("No DNS profiles configured; every request will fail profile resolution");
    }

    println!(
        "certkeeper: configuration file {} test is successful",
        path.display()
    );
    Ok(())
}

async fn issue(config_path: &Path, request_path: &Path, user: String) -> Result<()> {
    let config = Config::from_file(config_path).context("Failed to load configuration file")?;
    init_tracing(&config.logging.level, config.logging.format)?;

    let raw = tokio::fs::read_to_string(request_path)
        .await
        .with_context(|| format!("Failed to read request file {}", request_path.display()))?;
    let request: CertificateRequest =
        serde_json::from_str(&raw).context("Failed to parse certificate request")?;

    let store = Arc::new(MemoryStore::with_profiles(config.profiles.iter().cloned()));
    let service = CertificateService::from_config(
        &config,
        store.clone(),
        store.clone(),
        Arc::new(AcmeAuthority::new()),
    )
    .context("Failed to build certificate service")?;

    let caller = Caller::new(
        UserId::new(user),
        CapabilitySet::from_capabilities(Capability::ALL),
    );

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received; cancelling issuance");
            on_signal.cancel();
        }
    });

    match service.create(&caller, &request, &cancel).await {
        Ok(issued) => {
            info!(
                certificate_id = %issued.certificate.id,
                directory = %issued.directory.display(),
                "Certificate written"
            );
            let output = serde_json::to_string_pretty(&issued.certificate)
                .context("Failed to serialize certificate")?;
            println!("{}", output);
            Ok(())
        }
        Err(e) => {
            error!(kind = %e.kind(), retryable = e.is_retryable(), error = %e, "Request failed");
            if let certkeeper::CertkeeperError::Validation(errors) = &e {
                for field in errors.iter() {
                    eprintln!("{}: {}", field.field, field.message);
                }
            }
            Err(e).context("Certificate request failed")
        }
    }
}
