use anyhow::{Context, Result};
use chatlink_core::config::{Config, LoggingConfig};
use chatlink_core::core_creds::{ArchiveTier, CredentialStore, HttpArchive};
use chatlink_core::logging::{init_logging_with_config, LogConfig, LogLevel};
use chatlink_core::tenant::TenantId;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "chatlink")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Set the log level (trace, debug, info, warn, error); overrides the
    /// configured level
    #[arg(short, long)]
    log_level: Option<String>,

    /// Enable JSON formatted logging
    #[arg(long)]
    json_logs: bool,

    /// Path to a TOML configuration file; environment variables are used
    /// when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Subcommand to execute
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Parser, Debug)]
enum Command {
    /// List known tenants from the durable store
    Tenants,

    /// Show a tenant's QR attempt counter and lockout state
    QrState {
        /// Tenant identifier
        tenant: String,
    },

    /// Clear a tenant's QR attempt counter and lockout
    ResetQr {
        /// Tenant identifier
        tenant: String,
    },

    /// Wipe a tenant's credentials from every storage tier
    Wipe {
        /// Tenant identifier
        tenant: String,
    },

    /// Validate the effective configuration and print it
    CheckConfig,

    /// Write a default configuration file
    InitConfig {
        /// Where to write the file
        #[arg(default_value = "chatlink.toml")]
        path: PathBuf,
    },
}

fn load_config(args: &Args) -> Result<Config> {
    match &args.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("failed to load config from {}", path.display())),
        None => Config::from_env().context("failed to load config from environment"),
    }
}

fn open_store(config: &Config) -> Result<CredentialStore> {
    let archive = HttpArchive::from_config(&config.archive)?
        .map(|a| Arc::new(a) as Arc<dyn ArchiveTier>);
    Ok(CredentialStore::new(&config.store, archive)?)
}

fn parse_tenant(raw: &str) -> Result<TenantId> {
    let tenant = TenantId::new(raw);
    if tenant.is_empty() {
        anyhow::bail!("tenant id must not be empty");
    }
    Ok(tenant)
}

/// Logging settings from the config file form the base; CLI flags
/// override them.
fn effective_log_config(args: &Args, logging: &LoggingConfig) -> LogConfig {
    let level = match &args.log_level {
        Some(raw) => LogLevel::parse(raw).unwrap_or_else(|| {
            eprintln!("Invalid log level '{}', using 'info'", raw);
            LogLevel::Info
        }),
        None => LogLevel::parse(&logging.level).unwrap_or(LogLevel::Info),
    };
    LogConfig::new(level)
        .with_target(logging.with_target)
        .json_format(args.json_logs || logging.json_format)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = load_config(&args)?;
    init_logging_with_config(effective_log_config(&args, &config.logging))?;

    match args.command {
        Some(Command::Tenants) => {
            let store = open_store(&config)?;
            let tenants = store.list_tenants()?;
            if tenants.is_empty() {
                println!("No tenants in the durable store");
            }
            for row in tenants {
                println!(
                    "{}\tregistered={}\tactive={}\tlast_active_at_ms={}",
                    row.tenant, row.registered, row.is_active, row.last_active_at_ms
                );
            }
        }
        Some(Command::QrState { tenant }) => {
            let tenant = parse_tenant(&tenant)?;
            let store = open_store(&config)?;
            let state = store.qr_state(&tenant)?;
            println!("attempts: {}", state.attempt_count);
            match state.locked_until_ms {
                Some(until) => println!("locked_until_ms: {until}"),
                None => println!("locked_until_ms: none"),
            }
        }
        Some(Command::ResetQr { tenant }) => {
            let tenant = parse_tenant(&tenant)?;
            let store = open_store(&config)?;
            store.reset_qr(&tenant)?;
            info!(tenant = %tenant, "QR counter and lockout cleared");
        }
        Some(Command::Wipe { tenant }) => {
            let tenant = parse_tenant(&tenant)?;
            let store = open_store(&config)?;
            store.delete(&tenant).await?;
            warn!(tenant = %tenant, "Credentials wiped from all tiers; fresh pairing required");
        }
        Some(Command::CheckConfig) => {
            config.validate()?;
            println!("{}", toml_preview(&config)?);
            info!("Configuration is valid");
        }
        Some(Command::InitConfig { path }) => {
            let config = Config::default();
            config
                .save_to_file(&path)
                .with_context(|| format!("failed to write {}", path.display()))?;
            info!(path = %path.display(), "Default configuration written");
        }
        None => {
            info!("No command specified. Use --help for usage information.");
        }
    }

    Ok(())
}

/// Render the effective config for display, with the seal passphrase and
/// archive token blanked.
fn toml_preview(config: &Config) -> Result<String> {
    let mut shown = config.clone();
    if shown.store.seal_passphrase.is_some() {
        shown.store.seal_passphrase = Some("<redacted>".to_string());
    }
    if shown.archive.api_token.is_some() {
        shown.archive.api_token = Some("<redacted>".to_string());
    }
    Ok(toml::to_string_pretty(&shown)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tenant_rejects_empty() {
        assert!(parse_tenant("").is_err());
        assert!(parse_tenant("school-1").is_ok());
    }

    #[test]
    fn test_log_config_comes_from_file_when_no_flags() {
        let args = Args::parse_from(["chatlink"]);
        let logging = LoggingConfig {
            level: "debug".to_string(),
            json_format: true,
            with_target: false,
        };
        let log_config = effective_log_config(&args, &logging);
        assert_eq!(log_config.level, LogLevel::Debug);
        assert!(log_config.json_format);
        assert!(!log_config.with_target);
    }

    #[test]
    fn test_log_level_flag_overrides_file() {
        let args = Args::parse_from(["chatlink", "--log-level", "warn"]);
        let logging = LoggingConfig {
            level: "debug".to_string(),
            json_format: false,
            with_target: true,
        };
        let log_config = effective_log_config(&args, &logging);
        assert_eq!(log_config.level, LogLevel::Warn);
        assert!(!log_config.json_format);
    }

    #[test]
    fn test_toml_preview_redacts_secrets() {
        let mut config = Config::default();
        config.store.seal_passphrase = Some("hunter2".to_string());
        config.archive.api_token = Some("token-abc".to_string());
        let rendered = toml_preview(&config).unwrap();
        assert!(!rendered.contains("hunter2"));
        assert!(!rendered.contains("token-abc"));
        assert!(rendered.contains("<redacted>"));
    }
}
