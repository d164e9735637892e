use clap::Parser;
use rem1nd_core::config::Rem1ndConfig;

mod cli;
mod commands;

use crate::cli::CliArgs;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rem1nd=info,rem1nd_scheduler=info,rem1nd_mail=info".into()),
        )
        .init();

    let args = CliArgs::parse();

    // config: --config / REM1ND_CONFIG > ./rem1nd.toml, then REM1ND_* env vars
    let mut config = Rem1ndConfig::load(args.config.as_deref()).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        Rem1ndConfig::default()
    });
    if let Some(db) = args.db {
        config.database.path = db;
    }

    commands::dispatch(args.command, config).await
}
