use billing_core::application::BillingCore;
use billing_core::config::BillingConfig;
use billing_core::domain::money::Amount;
use billing_core::domain::ports::Stores;
use billing_core::infrastructure::clock::SystemClock;
use billing_core::infrastructure::gateway::LocalGatewayClient;
use billing_core::infrastructure::in_memory;
use billing_core::infrastructure::processor::LoggingProcessor;
use billing_core::interfaces::csv::feed_reader::FeedReader;
use billing_core::interfaces::csv::wallet_writer::WalletWriter;
use billing_core::interfaces::replay::FeedReplayer;
use clap::Parser;
use miette::{IntoDiagnostic, Result};
use rust_decimal::Decimal;
use std::fs::File;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Input billing feed CSV file
    input: PathBuf,

    /// Path to persistent database (optional). If provided, uses RocksDB.
    #[arg(long, env = "BILLING_DB_PATH")]
    db_path: Option<PathBuf>,

    /// Fee charged per metered event once the free quota is used up
    #[arg(long, env = "BILLING_FEE", default_value = "2")]
    fee: Decimal,

    /// Free events granted to newly registered tenants
    #[arg(long, env = "BILLING_FREE_QUOTA", default_value_t = 100)]
    free_quota: u32,

    /// Seconds during which a redelivered event is treated as a duplicate
    #[arg(long, env = "BILLING_DEDUPE_WINDOW_SECS", default_value_t = 86_400)]
    dedupe_window_secs: i64,

    /// Shared secret used to sign and verify gateway callbacks
    #[arg(long, env = "BILLING_GATEWAY_SECRET", default_value = "local-gateway-secret")]
    gateway_secret: String,
}

impl Cli {
    fn config(&self) -> Result<BillingConfig> {
        let defaults = BillingConfig::default();
        let dedupe_window = chrono::Duration::seconds(self.dedupe_window_secs);
        Ok(BillingConfig {
            metering_fee: Amount::new(self.fee).into_diagnostic()?,
            default_free_quota: self.free_quota,
            dedupe_window,
            audit_retention: defaults.audit_retention.max(dedupe_window),
            gateway_secret: self.gateway_secret.clone(),
            ..defaults
        })
    }
}

#[cfg(feature = "storage-rocksdb")]
fn open_stores(db_path: Option<PathBuf>) -> Result<Stores> {
    use billing_core::infrastructure::rocksdb::RocksDBStore;

    match db_path {
        Some(path) => Ok(RocksDBStore::open(path).into_diagnostic()?.stores()),
        None => Ok(in_memory::stores()),
    }
}

#[cfg(not(feature = "storage-rocksdb"))]
fn open_stores(db_path: Option<PathBuf>) -> Result<Stores> {
    if db_path.is_some() {
        tracing::warn!(
            "persistent storage requested via --db-path, but the 'storage-rocksdb' feature is not enabled; falling back to in-memory storage"
        );
    }
    Ok(in_memory::stores())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .with_ansi(false)
        .init();

    let cli = Cli::parse();
    let config = cli.config()?;
    let stores = open_stores(cli.db_path.clone())?;

    let core = BillingCore::new(
        stores,
        config,
        Arc::new(LoggingProcessor),
        Arc::new(LocalGatewayClient::new()),
        Arc::new(SystemClock),
    )
    .into_diagnostic()?;
    let replayer = FeedReplayer::new(core);

    let file = File::open(&cli.input).into_diagnostic()?;
    let summary = replayer.replay(FeedReader::new(file).records()).await;
    tracing::info!(applied = summary.applied, skipped = summary.skipped, "feed replayed");

    let wallets = replayer.core().ledger.wallets().await.into_diagnostic()?;
    let stdout = io::stdout();
    let mut writer = WalletWriter::new(stdout.lock());
    writer.write_wallets(&wallets).into_diagnostic()?;

    Ok(())
}
