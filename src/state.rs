use std::{sync::Arc, time::Duration};

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;
use tracing::{info, warn};

use crate::auth::{
    jwt::TokenService,
    memory::MemoryUserDirectory,
    password::CredentialHasher,
    repo::{PgUserDirectory, UserDirectory},
    services::AuthService,
};
use crate::config::AppConfig;

#[derive(Clone)]
pub struct AppState {
    pub auth: Arc<AuthService>,
    pub config: Arc<AppConfig>,
}

impl AppState {
    pub async fn init() -> anyhow::Result<Self> {
        let config = AppConfig::from_env()?;

        let directory: Arc<dyn UserDirectory> = match &config.database_url {
            Some(url) => {
                let db = PgPoolOptions::new()
                    .max_connections(10)
                    .acquire_timeout(Duration::from_secs(5))
                    .connect(url)
                    .await
                    .context("connect to database")?;
                sqlx::migrate!("./migrations")
                    .run(&db)
                    .await
                    .context("run migrations")?;
                info!("using postgres user directory");
                Arc::new(PgUserDirectory::new(db))
            }
            None => {
                warn!("DATABASE_URL not set; users are kept in memory and lost on restart");
                Arc::new(MemoryUserDirectory::new())
            }
        };

        Self::from_parts(config, directory)
    }

    pub fn from_parts(config: AppConfig, directory: Arc<dyn UserDirectory>) -> anyhow::Result<Self> {
        let hasher = CredentialHasher::new(&config.password)?;
        let tokens = TokenService::new(&config.jwt)?;
        let auth = AuthService::new(directory, hasher, tokens, &config.password)?;
        Ok(Self {
            auth: Arc::new(auth),
            config: Arc::new(config),
        })
    }

    #[cfg(test)]
    pub fn fake() -> Self {
        let config = AppConfig {
            database_url: None,
            host: "127.0.0.1".into(),
            port: 0,
            jwt: crate::config::test_jwt_config(),
            password: crate::auth::password::cheap_config(),
        };
        Self::from_parts(config, Arc::new(MemoryUserDirectory::new())).expect("fake state")
    }
}
