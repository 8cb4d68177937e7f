mod auth;
mod logging;
mod mail;
mod notify;
mod settings;
mod store;
mod web;


use anyhow::Context;
use clap::Parser;
use log::info;
use std::path::PathBuf;
use std::sync::Arc;

use crate::mail::outbound::ResendClient;
use crate::notify::client::FeishuClient;
use crate::store::Database;
use crate::web::AppState;

/// Mailbox backend: ingestion hook, JSON API, outbound mail and chat alerts.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Path of the YAML configuration file.
    #[arg(short, long, default_value = "config/settings.yaml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = settings::load_settings(&args.config)?;
    logging::init_logging(&config.log)?;

    info!("Opening database at {}", config.database.path);
    let db = Database::open(&config.database.path).context("Cannot open database")?;

    let sender = Arc::new(ResendClient::new(config.mail.resend_key.clone()));
    let chat = Arc::new(FeishuClient::new());
    let state = AppState::new(config, db, sender, chat).context("Cannot build token service")?;

    web::entrypoint(state).await
}
