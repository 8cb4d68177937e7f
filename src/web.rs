use axum::middleware::from_fn;
use axum::routing::{delete, get, post};
use axum::Router;
use log::info;
use std::sync::Arc;

use crate::auth::token::{TokenError, TokenService};
use crate::mail::outbound::MailSender;
use crate::notify::client::ChatClient;
use crate::notify::Notifier;
use crate::settings::Config;
use crate::store::mail::MailStore;
use crate::store::setting::SettingsStore;
use crate::store::users::UserDirectory;
use crate::store::Database;

pub mod error;
pub mod extract;
pub mod handlers;
pub mod middleware;

use handlers::{auth, emails, feishu, setting, users};

/// Shared by every handler; cloning is cheap.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub tokens: TokenService,
    pub mails: MailStore,
    pub users: UserDirectory,
    pub settings: SettingsStore,
    pub sender: Arc<dyn MailSender>,
    pub notifier: Notifier,
}

impl AppState {
    pub fn new(
        config: Config,
        db: Database,
        sender: Arc<dyn MailSender>,
        chat: Arc<dyn ChatClient>,
    ) -> Result<Self, TokenError> {
        let tokens = TokenService::new(&config.auth.jwt_secret, config.auth.token_ttl_hours)?;
        let settings = SettingsStore::new(db.clone());
        Ok(AppState {
            config: Arc::new(config),
            tokens,
            mails: MailStore::new(db.clone()),
            users: UserDirectory::new(db),
            notifier: Notifier::new(settings.clone(), chat),
            settings,
            sender,
        })
    }
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/login", post(auth::login))
        .route("/api/received", post(emails::ingest))
        .route("/api/emails", get(emails::list).post(emails::ingest))
        .route("/api/emails/latest", get(emails::latest))
        .route("/api/emails/batch", delete(emails::batch_delete))
        .route("/api/email", post(emails::send))
        .route("/api/email/:id", get(emails::detail).delete(emails::remove))
        .route("/api/email/:id/star", post(emails::toggle_star))
        .route("/api/users", get(users::list))
        .route("/api/users/:email", delete(users::remove))
        .route("/api/setting", get(setting::get).post(setting::replace))
        .route("/api/feishu/event", post(feishu::event))
        .route("/api/feishu/notify", post(feishu::notify))
        .fallback(handlers::not_found)
        .layer(from_fn(middleware::cors))
        .layer(from_fn(middleware::log_requests))
        .with_state(state)
}

async fn start_server(router: Router, host: &str, port: u16) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind((host, port)).await?;
    info!("Server running on http://{}:{}", host, port);
    axum::serve(listener, router).await?;
    Ok(())
}

pub async fn entrypoint(state: AppState) -> anyhow::Result<()> {
    let host = state.config.server.host.clone();
    let port = state.config.server.port;
    start_server(create_router(state), &host, port).await
}
