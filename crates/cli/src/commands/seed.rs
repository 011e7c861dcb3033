use tourdesk_db::{seed_demo, DEMO_PASSWORD};

use crate::commands::{with_backoffice, CommandResult};

pub fn run() -> CommandResult {
    let result = with_backoffice("seed", |backoffice, _| async move {
        seed_demo(&backoffice).await.map_err(|error| ("seed_execution", error.to_string(), 6u8))
    });

    match result {
        Ok(seeded) => {
            let message = format!(
                "demo data ready: {} accounts created, {} already present; demo password `{DEMO_PASSWORD}`",
                seeded.users_created, seeded.users_existing
            );
            CommandResult::success_with("seed", message, Some(seeded))
        }
        Err(failure) => failure,
    }
}
