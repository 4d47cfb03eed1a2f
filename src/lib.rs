pub mod api;
pub mod config;
pub mod crypto;
pub mod db;
pub mod notifications;

pub use db::DbPool;

use config::Config;
use notifications::Mailer;

/// Shared application state handed to every handler
pub struct AppState {
    pub config: Config,
    pub db: DbPool,
    pub mailer: Mailer,
}

impl AppState {
    pub fn new(config: Config, db: DbPool) -> Self {
        let mailer = Mailer::new(config.email.clone());
        Self { config, db, mailer }
    }
}
