use anyhow::{Context, Result};
use sqlx::migrate::Migrator;
use sqlx::{postgres::PgPoolOptions, Pool, Postgres};
use std::time::Duration;

use crate::config;

static MIGRATOR: Migrator = sqlx::migrate!("../../migrations");

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolSettings {
    pub max_connections: u32,
    pub acquire_timeout: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_connections: 10,
            acquire_timeout: Duration::from_secs(5),
        }
    }
}

impl PoolSettings {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            max_connections: config::parse_env("CRM_DB_MAX_CONNECTIONS", defaults.max_connections)?
                .max(1),
            acquire_timeout: Duration::from_secs(config::parse_env(
                "CRM_DB_ACQUIRE_TIMEOUT_SECONDS",
                defaults.acquire_timeout.as_secs(),
            )?),
        })
    }
}

pub async fn connect(database_url: &str, settings: &PoolSettings) -> Result<Pool<Postgres>> {
    let pool = PgPoolOptions::new()
        .max_connections(settings.max_connections)
        .acquire_timeout(settings.acquire_timeout)
        .connect(database_url)
        .await
        .context("failed to connect to database")?;
    tracing::info!(
        max_connections = settings.max_connections,
        "database pool ready"
    );
    Ok(pool)
}

/// Applies the embedded `crm` schema migrations.
pub async fn migrate(pool: &Pool<Postgres>) -> Result<()> {
    MIGRATOR
        .run(pool)
        .await
        .context("failed to apply migrations")?;
    let latest = MIGRATOR.iter().map(|migration| migration.version).max();
    tracing::info!(latest = ?latest, "migrations applied");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedded_migrations_include_record_tables() {
        let descriptions: Vec<String> = MIGRATOR
            .iter()
            .map(|migration| migration.description.to_string())
            .collect();
        assert!(descriptions.iter().any(|d| d.contains("crm records")));
    }

    #[test]
    fn pool_settings_default_when_env_unset() {
        std::env::remove_var("CRM_DB_MAX_CONNECTIONS");
        std::env::remove_var("CRM_DB_ACQUIRE_TIMEOUT_SECONDS");
        assert_eq!(PoolSettings::from_env().unwrap(), PoolSettings::default());
    }
}
