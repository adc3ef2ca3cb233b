// Query Hub: interactive query execution across MySQL, PostgreSQL,
// SQL Server and Oracle.
//
// This is the main entry point for the Query Hub application.

use anyhow::{Context, Result};
use query_hub::cli::Repl;
use query_hub::config::{create_shared_state, AppState, Config};
use tracing_subscriber::EnvFilter;

/// Primary log filter variable; `RUST_LOG` is the fallback
const LOG_ENV: &str = "QUERY_HUB_LOG";

fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("query_hub=info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let config = Config::load().context("failed to load configuration")?;
    let state = AppState::bootstrap(config)
        .await
        .context("failed to initialise Query Hub")?;

    let mut repl = Repl::new(create_shared_state(state))?;
    repl.run().await?;

    Ok(())
}
