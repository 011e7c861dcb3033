use std::sync::Arc;

use thiserror::Error;
use tourdesk_core::config::{AppConfig, ConfigError, LoadOptions};
use tourdesk_core::identity::CredentialService;
use tourdesk_core::Backoffice;
use tourdesk_db::{connect_with_config, migrations, DbPool, SqlStore};
use tracing::info;

use crate::api::AppState;
use crate::rendering::TemplateRenderer;
use crate::storage::DiskBlobStore;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub backoffice: Backoffice,
    pub renderer: Arc<TemplateRenderer>,
    pub blobs: Arc<DiskBlobStore>,
}

impl Application {
    pub fn api_state(&self) -> AppState {
        AppState {
            backoffice: self.backoffice.clone(),
            renderer: self.renderer.clone(),
            blobs: self.blobs.clone(),
            max_upload_bytes: usize::try_from(self.config.storage.max_upload_bytes)
                .unwrap_or(usize::MAX),
        }
    }
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

/// Connects, migrates and wires the services for an already loaded config.
pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let db_pool =
        connect_with_config(&config.database).await.map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        max_connections = config.database.max_connections,
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let credentials =
        CredentialService::new(config.auth.token_secret.clone(), config.auth.token_ttl_minutes);
    let backoffice = Backoffice::new(
        Arc::new(SqlStore::new(db_pool.clone())),
        credentials,
        config.workflow.clone(),
    );
    let renderer = Arc::new(TemplateRenderer::new(
        &config.rendering.template_dir,
        config.rendering.wkhtmltopdf_path.clone(),
    ));
    let blobs = Arc::new(DiskBlobStore::new(
        config.storage.upload_dir.clone(),
        config.storage.max_upload_bytes,
    ));
    info!(
        event_name = "system.bootstrap.services_ready",
        correlation_id = "bootstrap",
        upload_dir = %blobs.root().display(),
        "back-office services wired"
    );

    Ok(Application { config, db_pool, backoffice, renderer, blobs })
}

#[cfg(test)]
mod tests {
    use tourdesk_core::config::{ConfigOverrides, LoadOptions};
    use tourdesk_core::domain::user::Role;

    use crate::bootstrap::bootstrap;

    #[tokio::test]
    async fn bootstrap_fails_fast_without_token_secret() {
        let result = bootstrap(LoadOptions {
            config_path: Some("does-not-exist.toml".into()),
            overrides: ConfigOverrides {
                database_url: Some("sqlite::memory:".to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        })
        .await;

        assert!(result.is_err());
        let message = result.err().expect("error").to_string();
        assert!(message.contains("auth.token_secret"));
    }

    #[tokio::test]
    async fn bootstrap_migrates_and_serves_back_office() {
        let app = bootstrap(valid_overrides("sqlite::memory:"))
            .await
            .expect("bootstrap should succeed with valid overrides");

        let (table_count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master \
             WHERE type = 'table' AND name IN ('users', 'travel_requests', 'quotations', 'invoices', 'payments')",
        )
        .fetch_one(&app.db_pool)
        .await
        .expect("expected core tables to be available after bootstrap");
        assert_eq!(table_count, 5, "bootstrap should expose the back-office tables");

        let seeded = tourdesk_db::seed_demo(&app.backoffice).await.expect("seed");
        assert_eq!(seeded.users_created, tourdesk_db::DEMO_ACCOUNTS.len());

        let login = app
            .backoffice
            .login("ops1@tourdesk.test", tourdesk_db::DEMO_PASSWORD)
            .await
            .expect("demo login");
        assert_eq!(login.user.role, Role::Operations);

        let state = app.api_state();
        assert_eq!(state.max_upload_bytes as u64, app.config.storage.max_upload_bytes);

        app.db_pool.close().await;
    }

    fn valid_overrides(database_url: &str) -> LoadOptions {
        LoadOptions {
            config_path: Some("does-not-exist.toml".into()),
            overrides: ConfigOverrides {
                database_url: Some(database_url.to_string()),
                token_secret: Some("bootstrap-test-secret-value".to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        }
    }
}
