use std::collections::BTreeMap;
use std::path::PathBuf;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;
use tourdesk_db::{migrations::MIGRATOR, DbPool};

#[derive(Clone)]
pub struct HealthState {
    db_pool: DbPool,
    upload_dir: PathBuf,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeStatus {
    Ready,
    /// Reported but does not degrade the overall status.
    Attention,
    Degraded,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Probe {
    pub status: ProbeStatus,
    pub detail: String,
}

impl Probe {
    fn ready(detail: impl Into<String>) -> Self {
        Self { status: ProbeStatus::Ready, detail: detail.into() }
    }

    fn degraded(detail: impl Into<String>) -> Self {
        Self { status: ProbeStatus::Degraded, detail: detail.into() }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub status: ProbeStatus,
    pub version: &'static str,
    pub probes: BTreeMap<&'static str, Probe>,
    pub checked_at: String,
}

pub fn router(db_pool: DbPool, upload_dir: PathBuf) -> Router {
    Router::new().route("/health", get(health)).with_state(HealthState { db_pool, upload_dir })
}

pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthReport>) {
    let mut probes = BTreeMap::new();
    probes.insert("database", database_probe(&state.db_pool).await);
    probes.insert("schema", schema_probe(&state.db_pool).await);
    probes.insert("storage", storage_probe(&state.upload_dir));

    let degraded = probes.values().any(|probe| probe.status == ProbeStatus::Degraded);
    if degraded {
        tracing::warn!(event_name = "system.health.degraded", "health probe reported degraded state");
    }

    let report = HealthReport {
        status: if degraded { ProbeStatus::Degraded } else { ProbeStatus::Ready },
        version: env!("CARGO_PKG_VERSION"),
        probes,
        checked_at: Utc::now().to_rfc3339(),
    };
    let code = if degraded { StatusCode::SERVICE_UNAVAILABLE } else { StatusCode::OK };
    (code, Json(report))
}

async fn database_probe(pool: &DbPool) -> Probe {
    match sqlx::query_scalar::<_, i64>("SELECT 1").fetch_one(pool).await {
        Ok(_) => Probe::ready("connection acquired"),
        Err(error) => Probe::degraded(format!("database unreachable: {error}")),
    }
}

/// Ready only when every embedded migration has been applied.
async fn schema_probe(pool: &DbPool) -> Probe {
    let applied = match sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM _sqlx_migrations WHERE success = 1",
    )
    .fetch_one(pool)
    .await
    {
        Ok(applied) => applied,
        Err(error) => return Probe::degraded(format!("migration ledger unreadable: {error}")),
    };

    let expected = MIGRATOR.iter().filter(|m| m.migration_type.is_up_migration()).count() as i64;
    if applied < expected {
        Probe::degraded(format!("{applied} of {expected} migrations applied"))
    } else {
        Probe::ready(format!("{applied} migrations applied"))
    }
}

fn storage_probe(upload_dir: &std::path::Path) -> Probe {
    if upload_dir.is_dir() {
        Probe::ready(format!("upload dir `{}` present", upload_dir.display()))
    } else {
        Probe {
            status: ProbeStatus::Attention,
            detail: format!("upload dir `{}` will be created on first proof upload", upload_dir.display()),
        }
    }
}

#[cfg(test)]
mod tests {
    use axum::{extract::State, http::StatusCode, Json};
    use tourdesk_db::{connect_with_settings, run_pending};

    use super::{health, HealthState, ProbeStatus};

    async fn state(migrate: bool) -> (HealthState, tempfile::TempDir) {
        let pool = connect_with_settings("sqlite::memory:", 1, 5).await.expect("pool should connect");
        if migrate {
            run_pending(&pool).await.expect("migrate");
        }
        let dir = tempfile::tempdir().expect("tempdir");
        (HealthState { db_pool: pool, upload_dir: dir.path().to_path_buf() }, dir)
    }

    #[tokio::test]
    async fn migrated_database_reports_ready() {
        let (state, _dir) = state(true).await;

        let (status, Json(report)) = health(State(state.clone())).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(report.status, ProbeStatus::Ready);
        assert_eq!(report.probes["schema"].status, ProbeStatus::Ready);
        assert_eq!(report.probes["storage"].status, ProbeStatus::Ready);
        state.db_pool.close().await;
    }

    #[tokio::test]
    async fn unmigrated_schema_degrades_but_database_stays_ready() {
        let (state, _dir) = state(false).await;

        let (status, Json(report)) = health(State(state.clone())).await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(report.probes["database"].status, ProbeStatus::Ready);
        assert_eq!(report.probes["schema"].status, ProbeStatus::Degraded);
        state.db_pool.close().await;
    }

    #[tokio::test]
    async fn missing_upload_dir_needs_attention_without_degrading() {
        let (mut state, dir) = state(true).await;
        state.upload_dir = dir.path().join("not-yet-created");

        let (status, Json(report)) = health(State(state)).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(report.probes["storage"].status, ProbeStatus::Attention);
    }

    #[tokio::test]
    async fn closed_pool_degrades_every_database_probe() {
        let (state, _dir) = state(true).await;
        state.db_pool.close().await;

        let (status, Json(report)) = health(State(state)).await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(report.probes["database"].status, ProbeStatus::Degraded);
        assert_eq!(report.probes["schema"].status, ProbeStatus::Degraded);
    }
}
