pub mod config;
pub mod doctor;
pub mod migrate;
pub mod seed;
pub mod sweep;
pub mod token;

use std::future::Future;
use std::sync::Arc;

use serde::Serialize;
use tourdesk_core::config::{AppConfig, LoadOptions};
use tourdesk_core::identity::CredentialService;
use tourdesk_core::Backoffice;
use tourdesk_db::{connect_with_config, migrations, DbPool, SqlStore};

#[derive(Debug, Clone)]
pub struct CommandResult {
    pub exit_code: u8,
    pub output: String,
}

#[derive(Debug, Serialize)]
struct CommandOutcome<T: Serialize> {
    command: String,
    status: String,
    error_class: Option<String>,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
}

impl CommandResult {
    pub fn success(command: &str, message: impl Into<String>) -> Self {
        Self::success_with(command, message, None::<()>)
    }

    /// Success with a structured `data` payload alongside the message.
    pub fn success_with<T: Serialize>(
        command: &str,
        message: impl Into<String>,
        data: Option<T>,
    ) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "ok".to_string(),
            error_class: None,
            message: message.into(),
            data,
        };
        Self { exit_code: 0, output: serialize_payload(payload) }
    }

    pub fn failure(
        command: &str,
        error_class: &str,
        message: impl Into<String>,
        exit_code: u8,
    ) -> Self {
        let payload = CommandOutcome::<()> {
            command: command.to_string(),
            status: "error".to_string(),
            error_class: Some(error_class.to_string()),
            message: message.into(),
            data: None,
        };
        Self { exit_code, output: serialize_payload(payload) }
    }
}

fn serialize_payload<T: Serialize>(payload: CommandOutcome<T>) -> String {
    serde_json::to_string(&payload).unwrap_or_else(|error| {
        format!(
            "{{\"command\":\"unknown\",\"status\":\"error\",\"error_class\":\"serialization\",\"message\":\"{}\"}}",
            error.to_string().replace('\\', "\\\\").replace('"', "\\\"")
        )
    })
}

/// Failure tuple threaded out of `block_on`: error class, message, exit code.
pub(crate) type StepFailure = (&'static str, String, u8);

/// Loads config, starts a current-thread runtime, connects and migrates, then runs `work`
/// against the back office. The pool is closed whether `work` succeeds or not.
pub(crate) fn with_backoffice<T, F, Fut>(command: &str, work: F) -> Result<T, CommandResult>
where
    F: FnOnce(Backoffice, DbPool) -> Fut,
    Fut: Future<Output = Result<T, StepFailure>>,
{
    let config = load_config(command)?;
    init_logging(&config);

    let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().map_err(|error| {
        CommandResult::failure(
            command,
            "runtime_init",
            format!("failed to initialize async runtime: {error}"),
            3,
        )
    })?;

    runtime
        .block_on(async {
            let pool = connect_with_config(&config.database)
                .await
                .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;
            migrations::run_pending(&pool)
                .await
                .map_err(|error| ("migration", error.to_string(), 5u8))?;

            let backoffice = Backoffice::new(
                Arc::new(SqlStore::new(pool.clone())),
                CredentialService::new(
                    config.auth.token_secret.clone(),
                    config.auth.token_ttl_minutes,
                ),
                config.workflow.clone(),
            );
            let outcome = work(backoffice, pool.clone()).await;
            pool.close().await;
            match &outcome {
                Ok(_) => tracing::info!(event_name = "cli.command.completed", command, "command finished"),
                Err((error_class, message, _)) => tracing::warn!(
                    event_name = "cli.command.failed",
                    command,
                    error_class,
                    %message,
                    "command failed"
                ),
            }
            outcome
        })
        .map_err(|(error_class, message, exit_code)| {
            CommandResult::failure(command, error_class, message, exit_code)
        })
}

pub(crate) fn load_config(command: &str) -> Result<AppConfig, CommandResult> {
    AppConfig::load(LoadOptions::default()).map_err(|error| {
        CommandResult::failure(command, "config_validation", format!("configuration issue: {error}"), 2)
    })
}

/// Diagnostics go to stderr so stdout stays a single JSON document. Repeat calls are no-ops.
fn init_logging(config: &AppConfig) {
    let level = config.logging.level.parse::<tracing::Level>().unwrap_or(tracing::Level::WARN);
    let _ = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_max_level(level)
        .compact()
        .try_init();
}
