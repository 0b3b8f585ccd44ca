//! tenancyd — tenant connection pool daemon.
//!
//! Loads `tenancy.toml`, opens a [`TenantPool`] over Postgres, and either
//! checks that a set of tenants can be reached or keeps their connections
//! warm until interrupted.
//!
//! # Usage
//!
//! ```text
//! tenancyd check --config tenancy.toml --tenant acme --tenant globex
//! tenancyd serve --config tenancy.toml --tenant acme --stats-interval 30
//! tenancyd print-config --config tenancy.toml
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use tenancy_core::{TenancyConfig, TenantId};
use tenancy_pool::{
    ConnectionError, DatabaseConfig, PgTenantConnection, PgTenantFactory, PoolConfig,
    TenantConnection, TenantConnectionFactory, TenantPool,
};
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "tenancyd", about = "Tenant connection pool daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Open a connection for each tenant, report its schema, then exit.
    Check {
        /// Path to tenancy.toml (defaults apply when omitted).
        #[arg(long)]
        config: Option<PathBuf>,

        /// Tenant to check. Repeatable.
        #[arg(long = "tenant", required = true)]
        tenants: Vec<String>,
    },

    /// Warm tenant connections and log pool statistics until Ctrl-C.
    Serve {
        /// Path to tenancy.toml (defaults apply when omitted).
        #[arg(long)]
        config: Option<PathBuf>,

        /// Tenant to warm on startup. Repeatable.
        #[arg(long = "tenant")]
        tenants: Vec<String>,

        /// Statistics log interval in seconds.
        #[arg(long, default_value = "60")]
        stats_interval: u64,
    },

    /// Print the effective configuration as TOML.
    PrintConfig {
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tenancyd=debug,tenancy_pool=debug".into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Check { config, tenants } => run_check(config.as_deref(), tenants).await,
        Command::Serve {
            config,
            tenants,
            stats_interval,
        } => run_serve(config.as_deref(), tenants, stats_interval).await,
        Command::PrintConfig { config } => print_config(config.as_deref()),
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<TenancyConfig> {
    match path {
        Some(path) => {
            let config = TenancyConfig::from_file(path)
                .with_context(|| format!("loading {}", path.display()))?;
            info!(path = %path.display(), "configuration loaded");
            Ok(config)
        }
        None => {
            info!("no config file given, using defaults");
            Ok(TenancyConfig::default())
        }
    }
}

fn build_pool(config: &TenancyConfig) -> anyhow::Result<TenantPool<PgTenantFactory>> {
    let pool_config = PoolConfig::try_from(&config.pool)?;
    let db_config = DatabaseConfig::try_from(&config.database)?;
    info!(
        host = %db_config.host,
        port = db_config.port,
        database = %db_config.database,
        max_connections = pool_config.max_connections,
        idle_timeout = ?pool_config.idle_timeout,
        "tenant pool configured"
    );
    Ok(TenantPool::new(pool_config, PgTenantFactory::new(db_config))?)
}

async fn run_check(config: Option<&Path>, tenants: Vec<String>) -> anyhow::Result<()> {
    let config = load_config(config)?;
    let pool = build_pool(&config)?;

    let failures = check_tenants(&pool, tenants).await;
    if failures > 0 {
        anyhow::bail!("{failures} tenant(s) failed the check");
    }
    Ok(())
}

/// Connections that can report the schema they are bound to.
#[async_trait]
trait CurrentSchema: TenantConnection {
    async fn current_schema(&mut self) -> Result<Option<String>, ConnectionError>;
}

#[async_trait]
impl CurrentSchema for PgTenantConnection {
    async fn current_schema(&mut self) -> Result<Option<String>, ConnectionError> {
        PgTenantConnection::current_schema(self).await
    }
}

/// Check every tenant, then release the pool. Returns the failure count.
async fn check_tenants<F>(pool: &TenantPool<F>, tenants: Vec<String>) -> usize
where
    F: TenantConnectionFactory,
    F::Connection: CurrentSchema,
{
    let mut failures = 0;
    for name in tenants {
        let tenant = TenantId::new(name);
        match check_tenant(pool, &tenant).await {
            Ok(schema) => println!(
                "{tenant}: ok (schema {})",
                schema.as_deref().unwrap_or("<none>")
            ),
            Err(e) => {
                failures += 1;
                println!("{tenant}: FAILED ({e:#})");
            }
        }
    }

    pool.release_all().await;
    failures
}

async fn check_tenant<F>(pool: &TenantPool<F>, tenant: &TenantId) -> anyhow::Result<Option<String>>
where
    F: TenantConnectionFactory,
    F::Connection: CurrentSchema,
{
    let handle = pool.acquire(tenant).await?;
    let schema = handle
        .connection()
        .await?
        .current_schema()
        .await
        .context("reading current schema")?;
    Ok(schema)
}

async fn run_serve(
    config: Option<&Path>,
    tenants: Vec<String>,
    stats_interval: u64,
) -> anyhow::Result<()> {
    info!("tenancyd starting");
    let config = load_config(config)?;
    let pool = build_pool(&config)?;

    // ── Warm tenants ───────────────────────────────────────────

    let warmups: Vec<_> = tenants
        .into_iter()
        .map(|name| {
            let pool = pool.clone();
            tokio::spawn(async move {
                let tenant = TenantId::new(name);
                match pool.acquire(&tenant).await {
                    Ok(handle) => info!(tenant = %tenant, handle = handle.id(), "tenant warmed"),
                    Err(e) => warn!(tenant = %tenant, error = %e, "failed to warm tenant"),
                }
            })
        })
        .collect();
    for warmup in warmups {
        if let Err(e) = warmup.await {
            error!(error = %e, "warmup task panicked");
        }
    }
    pool.log_stats();

    // ── Stats loop until Ctrl-C ────────────────────────────────

    let mut ticker = tokio::time::interval(Duration::from_secs(stats_interval.max(1)));
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = ticker.tick() => pool.log_stats(),
            signal = tokio::signal::ctrl_c() => {
                signal.context("failed to listen for Ctrl-C")?;
                info!("shutdown signal received");
                break;
            }
        }
    }

    let closed = pool.release_all().await;
    info!(closed = closed, "tenancyd stopped");
    Ok(())
}

fn print_config(path: Option<&Path>) -> anyhow::Result<()> {
    let mut config = load_config(path)?;
    if config.database.password.is_some() {
        config.database.password = Some("<redacted>".to_string());
    }
    print!("{}", config.to_toml_string()?);
    Ok(())
}
