use std::env;
use std::sync::{Mutex, OnceLock};

use serde_json::Value;
use tourdesk_cli::commands::{config, doctor, migrate, seed, sweep, token};

const SECRET: &str = "cli-test-signing-secret";

#[test]
fn migrate_returns_success_with_valid_env() {
    with_env(&[("TOURDESK_DATABASE_URL", "sqlite::memory:"), ("TOURDESK_AUTH_TOKEN_SECRET", SECRET)], || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 0, "expected successful migrate run: {}", result.output);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "migrate");
        assert_eq!(payload["status"], "ok");
        assert!(payload["message"].as_str().unwrap_or_default().contains("migrations applied"));
    });
}

#[test]
fn commands_fail_with_config_class_without_signing_secret() {
    with_env(&[("TOURDESK_DATABASE_URL", "sqlite::memory:")], || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 2, "expected config validation failure code");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error_class"], "config_validation");
        assert!(payload["message"].as_str().unwrap_or_default().contains("auth.token_secret"));
    });
}

#[test]
fn seed_is_idempotent_against_a_file_database() {
    let dir = tempfile::tempdir().expect("tempdir");
    let url = format!("sqlite://{}", dir.path().join("seed.db").display());

    with_env(&[("TOURDESK_DATABASE_URL", &url), ("TOURDESK_AUTH_TOKEN_SECRET", SECRET)], || {
        let first = seed::run();
        assert_eq!(first.exit_code, 0, "first seed should succeed: {}", first.output);
        let first = parse_payload(&first.output);
        assert_eq!(first["command"], "seed");
        let created = first["data"]["users_created"].as_u64().expect("users_created");
        assert!(created > 0);

        let second = parse_payload(&seed::run().output);
        assert_eq!(second["status"], "ok");
        assert_eq!(second["data"]["users_created"], 0);
        assert_eq!(second["data"]["users_existing"].as_u64(), Some(created));
    });
}

#[test]
fn token_is_issued_for_seeded_account_and_refused_for_unknown_email() {
    let dir = tempfile::tempdir().expect("tempdir");
    let url = format!("sqlite://{}", dir.path().join("token.db").display());

    with_env(&[("TOURDESK_DATABASE_URL", &url), ("TOURDESK_AUTH_TOKEN_SECRET", SECRET)], || {
        assert_eq!(seed::run().exit_code, 0);

        let issued = token::run("ops1@tourdesk.test");
        assert_eq!(issued.exit_code, 0, "token should issue: {}", issued.output);
        let payload = parse_payload(&issued.output);
        assert!(!payload["data"]["token"].as_str().unwrap_or_default().is_empty());
        assert!(payload["data"]["expires_at"].is_string());

        let refused = token::run("nobody@tourdesk.test");
        assert_eq!(refused.exit_code, 7);
        let payload = parse_payload(&refused.output);
        assert_eq!(payload["error_class"], "unknown_user");
    });
}

#[test]
fn sweep_reports_zero_counts_on_a_fresh_database() {
    with_env(&[("TOURDESK_DATABASE_URL", "sqlite::memory:"), ("TOURDESK_AUTH_TOKEN_SECRET", SECRET)], || {
        let result = sweep::run();
        assert_eq!(result.exit_code, 0, "sweep should succeed: {}", result.output);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "sweep");
        assert_eq!(payload["data"]["expired_quotations"], 0);
        assert_eq!(payload["data"]["overdue_invoices"], 0);
    });
}

#[test]
fn config_output_attributes_sources_and_redacts_secret() {
    with_env(
        &[
            ("TOURDESK_DATABASE_URL", "sqlite::memory:"),
            ("TOURDESK_AUTH_TOKEN_SECRET", SECRET),
            ("TOURDESK_WORKFLOW_ASSIGNMENT_LIMIT", "7"),
        ],
        || {
            let output = config::run();
            assert!(output.starts_with("effective config"));
            assert!(output.contains("- workflow.assignment_limit = 7 (source: env (TOURDESK_WORKFLOW_ASSIGNMENT_LIMIT))"));
            assert!(output.contains("- workflow.max_installments = 10 (source: default)"));
            assert!(output.contains("<redacted, 23 chars>"));
            assert!(!output.contains(SECRET));
        },
    );
}

#[test]
fn doctor_passes_on_migrated_database() {
    let dir = tempfile::tempdir().expect("tempdir");
    let url = format!("sqlite://{}", dir.path().join("doctor.db").display());

    with_env(&[("TOURDESK_DATABASE_URL", &url), ("TOURDESK_AUTH_TOKEN_SECRET", SECRET)], || {
        let before = parse_payload(&doctor::run(true));
        let database = find_check(&before, "database_connectivity");
        assert_eq!(database["status"], "warn", "fresh database has pending migrations");

        assert_eq!(migrate::run().exit_code, 0);

        let output = doctor::run(true);
        let report = parse_payload(&output);
        assert_eq!(report["overall_status"], "pass");
        assert_eq!(find_check(&report, "database_connectivity")["status"], "pass");
        assert_eq!(doctor::exit_code(&output), 0);
    });
}

#[test]
fn doctor_skips_dependent_checks_when_config_fails() {
    with_env(&[], || {
        let output = doctor::run(false);
        assert!(output.starts_with("doctor: one or more readiness checks failed"));
        assert!(output.contains("- [fail] config_validation"));
        assert!(output.contains("- [skip] database_connectivity"));
        assert_eq!(doctor::exit_code(&output), 1);
    });
}

fn find_check<'a>(report: &'a Value, name: &str) -> &'a Value {
    report["checks"]
        .as_array()
        .and_then(|checks| checks.iter().find(|check| check["name"] == name))
        .unwrap_or_else(|| panic!("missing check {name}"))
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).expect("command output should be valid json")
}

fn with_env(vars: &[(&str, &str)], test_fn: impl FnOnce()) {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard = ENV_LOCK
        .get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());

    let keys = [
        "TOURDESK_DATABASE_URL",
        "TOURDESK_DATABASE_MAX_CONNECTIONS",
        "TOURDESK_DATABASE_TIMEOUT_SECS",
        "TOURDESK_SERVER_BIND_ADDRESS",
        "TOURDESK_SERVER_PORT",
        "TOURDESK_SERVER_GRACEFUL_SHUTDOWN_SECS",
        "TOURDESK_AUTH_TOKEN_SECRET",
        "TOURDESK_AUTH_TOKEN_TTL_MINUTES",
        "TOURDESK_WORKFLOW_ASSIGNMENT_LIMIT",
        "TOURDESK_WORKFLOW_MAX_INSTALLMENTS",
        "TOURDESK_WORKFLOW_INVOICE_DUE_DAYS",
        "TOURDESK_WORKFLOW_DEFAULT_TCS_PERCENT",
        "TOURDESK_WORKFLOW_AMOUNT_TOLERANCE",
        "TOURDESK_WORKFLOW_REPUBLISH_POLICY",
        "TOURDESK_WORKFLOW_INVOICE_ON_ACCEPT",
        "TOURDESK_STORAGE_UPLOAD_DIR",
        "TOURDESK_STORAGE_MAX_UPLOAD_BYTES",
        "TOURDESK_RENDERING_TEMPLATE_DIR",
        "TOURDESK_RENDERING_WKHTMLTOPDF_PATH",
        "TOURDESK_LOGGING_LEVEL",
        "TOURDESK_LOGGING_FORMAT",
        "TOURDESK_LOG_LEVEL",
        "TOURDESK_LOG_FORMAT",
    ];

    let previous_values: Vec<(&str, Option<String>)> =
        keys.iter().map(|key| (*key, env::var(key).ok())).collect();

    for key in &keys {
        env::remove_var(key);
    }
    for (key, value) in vars {
        env::set_var(key, value);
    }

    test_fn();

    for (key, value) in previous_values {
        if let Some(value) = value {
            env::set_var(key, value);
        } else {
            env::remove_var(key);
        }
    }
}
