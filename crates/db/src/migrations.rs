use sqlx::migrate::{MigrateError, Migrator};

use crate::DbPool;

pub static MIGRATOR: Migrator = sqlx::migrate!("../../migrations");

pub async fn run_pending(pool: &DbPool) -> Result<(), MigrateError> {
    MIGRATOR.run(pool).await
}

#[cfg(test)]
mod tests {
    use sqlx::Row;

    use super::run_pending;
    use crate::{connect_with_settings, migrations::MIGRATOR};

    const MANAGED_TABLES: &[&str] = &[
        "users",
        "travel_requests",
        "quotations",
        "invoices",
        "payment_breakups",
        "payments",
        "payment_allocations",
        "leaves",
        "activities",
        "notifications",
    ];

    async fn table_names(pool: &sqlx::SqlitePool) -> Vec<String> {
        let mut names: Vec<String> =
            sqlx::query("SELECT name FROM sqlite_master WHERE type = 'table'")
                .fetch_all(pool)
                .await
                .expect("load tables")
                .into_iter()
                .map(|row| row.get::<String, _>("name"))
                .filter(|name| MANAGED_TABLES.contains(&name.as_str()))
                .collect();
        names.sort();
        names
    }

    #[tokio::test]
    async fn migrations_create_every_table() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("run migrations");

        let mut expected: Vec<String> = MANAGED_TABLES.iter().map(|name| name.to_string()).collect();
        expected.sort();
        assert_eq!(table_names(&pool).await, expected);
    }

    #[tokio::test]
    async fn migrations_up_down_up_restores_the_schema() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("run migrations");
        let initial = table_names(&pool).await;

        MIGRATOR.undo(&pool, 0).await.expect("undo migrations");
        assert!(table_names(&pool).await.is_empty(), "tables should be dropped after undo");

        run_pending(&pool).await.expect("re-run migrations");
        assert_eq!(table_names(&pool).await, initial);
    }

    #[tokio::test]
    async fn one_invoice_per_quotation_is_enforced_by_the_schema() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("run migrations");

        let ts = "2026-03-01T09:00:00Z";
        sqlx::query(
            "INSERT INTO travel_requests (id, title, client_json, trip_json, status, created_by, created_at, updated_at)
             VALUES ('req-1', 'Goa', '{}', '{}', 'ACCEPTED', 'u-1', ?, ?)",
        )
        .bind(ts)
        .bind(ts)
        .execute(&pool)
        .await
        .expect("insert request");
        sqlx::query(
            "INSERT INTO quotations (id, request_id, version, status, data_json, created_by, created_at, updated_at)
             VALUES ('quo-1', 'req-1', 1, 'ACCEPTED', '{}', 'u-1', ?, ?)",
        )
        .bind(ts)
        .bind(ts)
        .execute(&pool)
        .await
        .expect("insert quotation");

        let insert_invoice = |id: &'static str, number: &'static str| {
            sqlx::query(
                "INSERT INTO invoices (id, invoice_number, quotation_id, request_id, client_json,
                    base_amount, tcs_percent, tcs_amount, total_amount, advance_amount, currency,
                    status, due_date, created_at, updated_at)
                 VALUES (?, ?, 'quo-1', 'req-1', '{}', '100', '0', '0', '100', '0', 'INR',
                    'Verification Pending', '2026-03-08', ?, ?)",
            )
            .bind(id)
            .bind(number)
            .bind(ts)
            .bind(ts)
        };

        insert_invoice("inv-1", "INV-1").execute(&pool).await.expect("first invoice");
        let duplicate = insert_invoice("inv-2", "INV-2").execute(&pool).await;
        assert!(duplicate.is_err(), "second invoice for the same quotation must be rejected");
    }
}
