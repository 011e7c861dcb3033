use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub workflow: WorkflowSettings,
    pub storage: StorageConfig,
    pub rendering: RenderingConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct AuthConfig {
    pub token_secret: SecretString,
    pub token_ttl_minutes: u32,
}

/// Business knobs consumed by the back-office services.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkflowSettings {
    pub assignment_limit: u32,
    pub max_installments: u32,
    pub invoice_due_days: u32,
    pub default_tcs_percent: Decimal,
    pub amount_tolerance: Decimal,
    pub republish_policy: RepublishPolicy,
    pub invoice_on_accept: bool,
}

#[derive(Clone, Debug)]
pub struct StorageConfig {
    pub upload_dir: PathBuf,
    pub max_upload_bytes: u64,
}

#[derive(Clone, Debug)]
pub struct RenderingConfig {
    pub template_dir: PathBuf,
    pub wkhtmltopdf_path: Option<PathBuf>,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

/// What publishing an already-SENT quotation does to its version marker.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepublishPolicy {
    Overwrite,
    BumpVersion,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub token_secret: Option<String>,
    pub server_port: Option<u16>,
    pub upload_dir: Option<PathBuf>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            assignment_limit: 10,
            max_installments: 10,
            invoice_due_days: 7,
            default_tcs_percent: Decimal::ZERO,
            amount_tolerance: Decimal::new(1, 2),
            republish_policy: RepublishPolicy::Overwrite,
            invoice_on_accept: true,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://tourdesk.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8080,
                graceful_shutdown_secs: 15,
            },
            auth: AuthConfig { token_secret: String::new().into(), token_ttl_minutes: 720 },
            workflow: WorkflowSettings::default(),
            storage: StorageConfig {
                upload_dir: PathBuf::from("uploads"),
                max_upload_bytes: 10 * 1024 * 1024,
            },
            rendering: RenderingConfig {
                template_dir: PathBuf::from("templates/documents"),
                wkhtmltopdf_path: None,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl FromStr for RepublishPolicy {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "overwrite" => Ok(Self::Overwrite),
            "bump_version" => Ok(Self::BumpVersion),
            other => Err(ConfigError::Validation(format!(
                "unsupported republish policy `{other}` (expected overwrite|bump_version)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("tourdesk.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(auth) = patch.auth {
            if let Some(token_secret_value) = auth.token_secret {
                self.auth.token_secret = secret_value(token_secret_value);
            }
            if let Some(token_ttl_minutes) = auth.token_ttl_minutes {
                self.auth.token_ttl_minutes = token_ttl_minutes;
            }
        }

        if let Some(workflow) = patch.workflow {
            if let Some(assignment_limit) = workflow.assignment_limit {
                self.workflow.assignment_limit = assignment_limit;
            }
            if let Some(max_installments) = workflow.max_installments {
                self.workflow.max_installments = max_installments;
            }
            if let Some(invoice_due_days) = workflow.invoice_due_days {
                self.workflow.invoice_due_days = invoice_due_days;
            }
            if let Some(default_tcs_percent) = workflow.default_tcs_percent {
                self.workflow.default_tcs_percent = default_tcs_percent;
            }
            if let Some(amount_tolerance) = workflow.amount_tolerance {
                self.workflow.amount_tolerance = amount_tolerance;
            }
            if let Some(republish_policy) = workflow.republish_policy {
                self.workflow.republish_policy = republish_policy;
            }
            if let Some(invoice_on_accept) = workflow.invoice_on_accept {
                self.workflow.invoice_on_accept = invoice_on_accept;
            }
        }

        if let Some(storage) = patch.storage {
            if let Some(upload_dir) = storage.upload_dir {
                self.storage.upload_dir = upload_dir;
            }
            if let Some(max_upload_bytes) = storage.max_upload_bytes {
                self.storage.max_upload_bytes = max_upload_bytes;
            }
        }

        if let Some(rendering) = patch.rendering {
            if let Some(template_dir) = rendering.template_dir {
                self.rendering.template_dir = template_dir;
            }
            if let Some(wkhtmltopdf_path) = rendering.wkhtmltopdf_path {
                self.rendering.wkhtmltopdf_path = Some(wkhtmltopdf_path);
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("TOURDESK_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("TOURDESK_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections =
                parse_number("TOURDESK_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("TOURDESK_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_number("TOURDESK_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("TOURDESK_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("TOURDESK_SERVER_PORT") {
            self.server.port = parse_number("TOURDESK_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("TOURDESK_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_number("TOURDESK_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        if let Some(value) = read_env("TOURDESK_AUTH_TOKEN_SECRET") {
            self.auth.token_secret = secret_value(value);
        }
        if let Some(value) = read_env("TOURDESK_AUTH_TOKEN_TTL_MINUTES") {
            self.auth.token_ttl_minutes = parse_number("TOURDESK_AUTH_TOKEN_TTL_MINUTES", &value)?;
        }

        if let Some(value) = read_env("TOURDESK_WORKFLOW_ASSIGNMENT_LIMIT") {
            self.workflow.assignment_limit =
                parse_number("TOURDESK_WORKFLOW_ASSIGNMENT_LIMIT", &value)?;
        }
        if let Some(value) = read_env("TOURDESK_WORKFLOW_MAX_INSTALLMENTS") {
            self.workflow.max_installments =
                parse_number("TOURDESK_WORKFLOW_MAX_INSTALLMENTS", &value)?;
        }
        if let Some(value) = read_env("TOURDESK_WORKFLOW_INVOICE_DUE_DAYS") {
            self.workflow.invoice_due_days =
                parse_number("TOURDESK_WORKFLOW_INVOICE_DUE_DAYS", &value)?;
        }
        if let Some(value) = read_env("TOURDESK_WORKFLOW_DEFAULT_TCS_PERCENT") {
            self.workflow.default_tcs_percent =
                parse_number("TOURDESK_WORKFLOW_DEFAULT_TCS_PERCENT", &value)?;
        }
        if let Some(value) = read_env("TOURDESK_WORKFLOW_AMOUNT_TOLERANCE") {
            self.workflow.amount_tolerance =
                parse_number("TOURDESK_WORKFLOW_AMOUNT_TOLERANCE", &value)?;
        }
        if let Some(value) = read_env("TOURDESK_WORKFLOW_REPUBLISH_POLICY") {
            self.workflow.republish_policy = value.parse()?;
        }
        if let Some(value) = read_env("TOURDESK_WORKFLOW_INVOICE_ON_ACCEPT") {
            self.workflow.invoice_on_accept =
                parse_number("TOURDESK_WORKFLOW_INVOICE_ON_ACCEPT", &value)?;
        }

        if let Some(value) = read_env("TOURDESK_STORAGE_UPLOAD_DIR") {
            self.storage.upload_dir = PathBuf::from(value);
        }
        if let Some(value) = read_env("TOURDESK_STORAGE_MAX_UPLOAD_BYTES") {
            self.storage.max_upload_bytes =
                parse_number("TOURDESK_STORAGE_MAX_UPLOAD_BYTES", &value)?;
        }

        if let Some(value) = read_env("TOURDESK_RENDERING_TEMPLATE_DIR") {
            self.rendering.template_dir = PathBuf::from(value);
        }
        if let Some(value) = read_env("TOURDESK_RENDERING_WKHTMLTOPDF_PATH") {
            self.rendering.wkhtmltopdf_path = Some(PathBuf::from(value));
        }

        let log_level =
            read_env("TOURDESK_LOGGING_LEVEL").or_else(|| read_env("TOURDESK_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("TOURDESK_LOGGING_FORMAT").or_else(|| read_env("TOURDESK_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(token_secret) = overrides.token_secret {
            self.auth.token_secret = secret_value(token_secret);
        }
        if let Some(port) = overrides.server_port {
            self.server.port = port;
        }
        if let Some(upload_dir) = overrides.upload_dir {
            self.storage.upload_dir = upload_dir;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_server(&self.server)?;
        validate_auth(&self.auth)?;
        validate_workflow(&self.workflow)?;
        validate_storage(&self.storage)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("tourdesk.toml"), PathBuf::from("config/tourdesk.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_auth(auth: &AuthConfig) -> Result<(), ConfigError> {
    let secret = auth.token_secret.expose_secret();
    if secret.trim().is_empty() {
        return Err(ConfigError::Validation(
            "auth.token_secret is required (set TOURDESK_AUTH_TOKEN_SECRET)".to_string(),
        ));
    }
    if secret.len() < 16 {
        return Err(ConfigError::Validation(
            "auth.token_secret must be at least 16 characters".to_string(),
        ));
    }
    if auth.token_ttl_minutes == 0 {
        return Err(ConfigError::Validation(
            "auth.token_ttl_minutes must be greater than zero".to_string(),
        ));
    }
    Ok(())
}

fn validate_workflow(workflow: &WorkflowSettings) -> Result<(), ConfigError> {
    if workflow.assignment_limit == 0 {
        return Err(ConfigError::Validation(
            "workflow.assignment_limit must be greater than zero".to_string(),
        ));
    }
    if workflow.max_installments == 0 || workflow.max_installments > 10 {
        return Err(ConfigError::Validation(
            "workflow.max_installments must be in range 1..=10".to_string(),
        ));
    }
    if workflow.default_tcs_percent.is_sign_negative()
        || workflow.default_tcs_percent > Decimal::from(100)
    {
        return Err(ConfigError::Validation(
            "workflow.default_tcs_percent must be in range 0..=100".to_string(),
        ));
    }
    if workflow.amount_tolerance.is_sign_negative() || workflow.amount_tolerance > Decimal::ONE {
        return Err(ConfigError::Validation(
            "workflow.amount_tolerance must be in range 0..=1".to_string(),
        ));
    }
    Ok(())
}

fn validate_storage(storage: &StorageConfig) -> Result<(), ConfigError> {
    if storage.upload_dir.as_os_str().is_empty() {
        return Err(ConfigError::Validation("storage.upload_dir must not be empty".to_string()));
    }
    if storage.max_upload_bytes == 0 {
        return Err(ConfigError::Validation(
            "storage.max_upload_bytes must be greater than zero".to_string(),
        ));
    }
    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_number<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse::<T>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    server: Option<ServerPatch>,
    auth: Option<AuthPatch>,
    workflow: Option<WorkflowPatch>,
    storage: Option<StoragePatch>,
    rendering: Option<RenderingPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct AuthPatch {
    token_secret: Option<String>,
    token_ttl_minutes: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct WorkflowPatch {
    assignment_limit: Option<u32>,
    max_installments: Option<u32>,
    invoice_due_days: Option<u32>,
    default_tcs_percent: Option<Decimal>,
    amount_tolerance: Option<Decimal>,
    republish_policy: Option<RepublishPolicy>,
    invoice_on_accept: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct StoragePatch {
    upload_dir: Option<PathBuf>,
    max_upload_bytes: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct RenderingPatch {
    template_dir: Option<PathBuf>,
    wkhtmltopdf_path: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
