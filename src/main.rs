use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use gatehouse::federation::HttpProviderClient;
use gatehouse::keyring::Keyring;
use gatehouse::policy::InMemoryUsageAggregator;
use gatehouse::web::AppState;
use gatehouse::{admin, jobs, secrets, settings, store, web};
use miette::Result;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(
    name = "gatehouse",
    version,
    about = "Multi-tenant OAuth2/OIDC authorization engine"
)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    // logging
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(env_filter).init();

    let cli = Cli::parse();

    // load settings
    let settings = settings::Settings::load(&cli.config)?;
    tracing::info!(host = %settings.server.host, port = settings.server.port, "Loaded configuration");

    // init storage (database, migrations applied)
    let db = store::init(&settings.database).await?;

    let keyring = if settings.keys.master_key.is_empty() {
        tracing::warn!(
            "keys.master_key is not configured; using an ephemeral key - wrapped signing keys will not survive a restart"
        );
        Keyring::ephemeral(settings.keys.key_ttl_days * 24 * 60 * 60 * 1000)
    } else {
        Keyring::new(&settings.keys)?
    };

    let provider_client = Arc::new(HttpProviderClient::new(Duration::from_secs(
        settings.federation.exchange_timeout_secs,
    ))?);

    // start background sweeps; each instance gets its own lock identity
    let instance_id = secrets::random_id();
    let _scheduler = jobs::init_scheduler(db.clone(), instance_id).await?;

    let state = AppState {
        settings: Arc::new(settings),
        db,
        keyring,
        provider_client,
        usage: Arc::new(InMemoryUsageAggregator::default()),
    };

    let admin_router = admin::router(state.clone());
    web::serve(state, admin_router).await?;
    Ok(())
}
