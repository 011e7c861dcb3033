use std::path::Path;

use serde::Serialize;
use tourdesk_core::config::{AppConfig, LoadOptions};
use tourdesk_db::{connect_with_config, migrations::MIGRATOR};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Warn,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

pub fn run(json_output: bool) -> String {
    let report = build_report();

    if json_output {
        return serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        });
    }

    render_human(&report)
}

/// Exit code for a rendered report: non-zero when any check failed outright.
pub fn exit_code(output: &str) -> u8 {
    if output.contains("\"overall_status\": \"fail\"") || output.starts_with("doctor: one or more") {
        1
    } else {
        0
    }
}

fn build_report() -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Pass,
                details: "configuration loaded and validated".to_string(),
            });
            checks.push(check_database(&config));
            checks.push(check_directory("template_dir", &config.rendering.template_dir, false));
            checks.push(check_directory("upload_dir", &config.storage.upload_dir, true));
            checks.push(check_converter(&config));
        }
        Err(error) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Fail,
                details: error.to_string(),
            });
            for name in ["database_connectivity", "template_dir", "upload_dir", "pdf_converter"] {
                checks.push(DoctorCheck {
                    name,
                    status: CheckStatus::Skipped,
                    details: "skipped because configuration did not load".to_string(),
                });
            }
        }
    }

    let failed = checks.iter().any(|check| matches!(check.status, CheckStatus::Fail | CheckStatus::Skipped));
    let overall_status = if failed { CheckStatus::Fail } else { CheckStatus::Pass };
    let summary = if failed {
        "doctor: one or more readiness checks failed".to_string()
    } else {
        "doctor: all readiness checks passed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

/// Connectivity plus a count of migrations that have not been applied yet.
fn check_database(config: &AppConfig) -> DoctorCheck {
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return DoctorCheck {
                name: "database_connectivity",
                status: CheckStatus::Fail,
                details: format!("failed to initialize async runtime: {error}"),
            };
        }
    };

    let result = runtime.block_on(async {
        let pool = connect_with_config(&config.database)
            .await
            .map_err(|error| format!("failed to connect to database: {error}"))?;

        let applied: Vec<i64> = sqlx::query_scalar("SELECT version FROM _sqlx_migrations WHERE success = 1")
            .fetch_all(&pool)
            .await
            .unwrap_or_default();
        pool.close().await;

        let pending = MIGRATOR
            .iter()
            .filter(|migration| migration.migration_type.is_up_migration())
            .filter(|migration| !applied.contains(&migration.version))
            .count();
        Ok::<usize, String>(pending)
    });

    match result {
        Ok(0) => DoctorCheck {
            name: "database_connectivity",
            status: CheckStatus::Pass,
            details: format!("connected using `{}`; schema current", config.database.url),
        },
        Ok(pending) => DoctorCheck {
            name: "database_connectivity",
            status: CheckStatus::Warn,
            details: format!("connected; {pending} migrations pending (run `tourdesk migrate`)"),
        },
        Err(error) => {
            DoctorCheck { name: "database_connectivity", status: CheckStatus::Fail, details: error }
        }
    }
}

fn check_directory(name: &'static str, path: &Path, created_on_demand: bool) -> DoctorCheck {
    if path.is_dir() {
        return DoctorCheck { name, status: CheckStatus::Pass, details: format!("`{}` exists", path.display()) };
    }
    if created_on_demand {
        DoctorCheck {
            name,
            status: CheckStatus::Warn,
            details: format!("`{}` is missing; it will be created on first upload", path.display()),
        }
    } else {
        DoctorCheck {
            name,
            status: CheckStatus::Warn,
            details: format!("`{}` is missing; embedded templates will be used", path.display()),
        }
    }
}

fn check_converter(config: &AppConfig) -> DoctorCheck {
    match &config.rendering.wkhtmltopdf_path {
        Some(path) if path.is_file() => DoctorCheck {
            name: "pdf_converter",
            status: CheckStatus::Pass,
            details: format!("wkhtmltopdf at `{}`", path.display()),
        },
        Some(path) => DoctorCheck {
            name: "pdf_converter",
            status: CheckStatus::Fail,
            details: format!("configured wkhtmltopdf `{}` does not exist", path.display()),
        },
        None => DoctorCheck {
            name: "pdf_converter",
            status: CheckStatus::Warn,
            details: "not configured; the server searches PATH and falls back to HTML".to_string(),
        },
    }
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Warn => "warn",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}

fn escape_json(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
