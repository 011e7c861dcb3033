use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::ExposeSecret;
use serde::Serialize;
use tourdesk_core::config::{AppConfig, LoadOptions};
use toml::Value;

#[derive(Debug, Serialize)]
pub struct ConfigEntry {
    pub key: &'static str,
    pub value: String,
    pub source: String,
}

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    lines.extend(
        effective_entries(&config)
            .into_iter()
            .map(|entry| format!("- {} = {} (source: {})", entry.key, entry.value, entry.source)),
    );
    lines.join("\n")
}

/// Every reportable setting with its value and where it came from. Secrets are redacted.
pub fn effective_entries(config: &AppConfig) -> Vec<ConfigEntry> {
    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());
    let workflow = &config.workflow;

    let settings: Vec<(&'static str, &'static str, String)> = vec![
        ("database.url", "TOURDESK_DATABASE_URL", config.database.url.clone()),
        (
            "database.max_connections",
            "TOURDESK_DATABASE_MAX_CONNECTIONS",
            config.database.max_connections.to_string(),
        ),
        ("database.timeout_secs", "TOURDESK_DATABASE_TIMEOUT_SECS", config.database.timeout_secs.to_string()),
        ("server.bind_address", "TOURDESK_SERVER_BIND_ADDRESS", config.server.bind_address.clone()),
        ("server.port", "TOURDESK_SERVER_PORT", config.server.port.to_string()),
        (
            "server.graceful_shutdown_secs",
            "TOURDESK_SERVER_GRACEFUL_SHUTDOWN_SECS",
            config.server.graceful_shutdown_secs.to_string(),
        ),
        (
            "auth.token_secret",
            "TOURDESK_AUTH_TOKEN_SECRET",
            redact_secret(config.auth.token_secret.expose_secret()),
        ),
        ("auth.token_ttl_minutes", "TOURDESK_AUTH_TOKEN_TTL_MINUTES", config.auth.token_ttl_minutes.to_string()),
        ("workflow.assignment_limit", "TOURDESK_WORKFLOW_ASSIGNMENT_LIMIT", workflow.assignment_limit.to_string()),
        ("workflow.max_installments", "TOURDESK_WORKFLOW_MAX_INSTALLMENTS", workflow.max_installments.to_string()),
        ("workflow.invoice_due_days", "TOURDESK_WORKFLOW_INVOICE_DUE_DAYS", workflow.invoice_due_days.to_string()),
        (
            "workflow.default_tcs_percent",
            "TOURDESK_WORKFLOW_DEFAULT_TCS_PERCENT",
            workflow.default_tcs_percent.to_string(),
        ),
        ("workflow.amount_tolerance", "TOURDESK_WORKFLOW_AMOUNT_TOLERANCE", workflow.amount_tolerance.to_string()),
        (
            "workflow.republish_policy",
            "TOURDESK_WORKFLOW_REPUBLISH_POLICY",
            format!("{:?}", workflow.republish_policy).to_lowercase(),
        ),
        (
            "workflow.invoice_on_accept",
            "TOURDESK_WORKFLOW_INVOICE_ON_ACCEPT",
            workflow.invoice_on_accept.to_string(),
        ),
        ("storage.upload_dir", "TOURDESK_STORAGE_UPLOAD_DIR", config.storage.upload_dir.display().to_string()),
        (
            "storage.max_upload_bytes",
            "TOURDESK_STORAGE_MAX_UPLOAD_BYTES",
            config.storage.max_upload_bytes.to_string(),
        ),
        (
            "rendering.template_dir",
            "TOURDESK_RENDERING_TEMPLATE_DIR",
            config.rendering.template_dir.display().to_string(),
        ),
        (
            "rendering.wkhtmltopdf_path",
            "TOURDESK_RENDERING_WKHTMLTOPDF_PATH",
            config
                .rendering
                .wkhtmltopdf_path
                .as_ref()
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "<auto-detect>".to_string()),
        ),
        ("logging.level", "TOURDESK_LOGGING_LEVEL", config.logging.level.clone()),
        (
            "logging.format",
            "TOURDESK_LOGGING_FORMAT",
            format!("{:?}", config.logging.format).to_lowercase(),
        ),
    ];

    settings
        .into_iter()
        .map(|(key, env_key, value)| ConfigEntry {
            key,
            value,
            source: field_source(key, env_key, config_file_doc.as_ref(), config_file_path.as_deref()),
        })
        .collect()
}

fn detect_config_path() -> Option<PathBuf> {
    [PathBuf::from("tourdesk.toml"), PathBuf::from("config/tourdesk.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let raw = fs::read_to_string(path?).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_key: &str,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if env::var_os(env_key).is_some() {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(doc: &Value, key_path: &str) -> bool {
    let mut current = doc;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn redact_secret(secret: &str) -> String {
    let trimmed = secret.trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }
    format!("<redacted, {} chars>", trimmed.chars().count())
}
