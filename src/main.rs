mod db;
mod error;
mod excel_export;
mod report;
mod server;
mod timesheet_data;

use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use db::{DbConfig, TimesheetDb};
use server::ServerConfig;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // .envがあれば読み込む
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let db_config = DbConfig::from_env();
    let db = TimesheetDb::connect(&db_config)?;
    tracing::info!(
        "Connected to {}:{}/{} (pool size {})",
        db_config.host,
        db_config.port,
        db_config.database,
        db_config.pool_size
    );

    server::run(ServerConfig::from_env(), Arc::new(db)).await?;
    Ok(())
}
