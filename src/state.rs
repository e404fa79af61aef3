use std::sync::Arc;

use anyhow::Context;
use axum::extract::FromRef;

use crate::auth::jwt::JwtKeys;
use crate::config::AppConfig;
use crate::db::{MemoryStore, PgStore, Store};
use crate::notify::{LogMailer, Mailer};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub mailer: Arc<dyn Mailer>,
    /// Built once from the JWT config; rotating the secret needs a restart.
    pub jwt: JwtKeys,
}

impl FromRef<AppState> for JwtKeys {
    fn from_ref(state: &AppState) -> Self {
        state.jwt.clone()
    }
}

impl AppState {
    pub async fn init() -> anyhow::Result<Self> {
        let config = AppConfig::from_env()?;

        let store = match &config.database_url {
            Some(url) => {
                let pg = PgStore::connect(url, config.db_max_connections)
                    .await
                    .context("connect to database")?;
                if let Err(e) = sqlx::migrate!("./migrations").run(pg.pool()).await {
                    tracing::warn!(error = %e, "migration failed; continuing");
                }
                Arc::new(pg) as Arc<dyn Store>
            }
            None => {
                tracing::warn!("DATABASE_URL not set; using in-memory store");
                Arc::new(MemoryStore::new()) as Arc<dyn Store>
            }
        };

        let mailer = Arc::new(LogMailer::new(config.app_url.clone())) as Arc<dyn Mailer>;

        Ok(Self::from_parts(store, mailer, &config))
    }

    pub fn from_parts(
        store: Arc<dyn Store>,
        mailer: Arc<dyn Mailer>,
        config: &AppConfig,
    ) -> Self {
        let jwt = JwtKeys::new(&config.jwt);
        Self { store, mailer, jwt }
    }

    #[cfg(test)]
    pub fn fake() -> Self {
        Self::with_mailer(Arc::new(LogMailer::new("http://localhost:3000")))
    }

    #[cfg(test)]
    pub fn with_mailer(mailer: Arc<dyn Mailer>) -> Self {
        Self::from_parts(
            Arc::new(MemoryStore::new()),
            mailer,
            &AppConfig::for_tests(),
        )
    }
}
