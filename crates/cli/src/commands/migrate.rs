use sqlx::Row;

use crate::commands::{with_backoffice, CommandResult};

pub fn run() -> CommandResult {
    let result = with_backoffice("migrate", |_, pool| async move {
        let applied = sqlx::query("SELECT COUNT(*) AS applied FROM _sqlx_migrations WHERE success = 1")
            .fetch_one(&pool)
            .await
            .and_then(|row| row.try_get::<i64, _>("applied"))
            .map_err(|error| ("migration", error.to_string(), 5u8))?;
        Ok(applied)
    });

    match result {
        Ok(applied) => {
            CommandResult::success("migrate", format!("schema up to date ({applied} migrations applied)"))
        }
        Err(failure) => failure,
    }
}
