use crate::commands::{with_backoffice, CommandResult};

/// Issues a bearer credential for an existing active account.
pub fn run(email: &str) -> CommandResult {
    let email = email.trim().to_owned();
    let result = with_backoffice("token", |backoffice, _| async move {
        backoffice.issue_credential_for(&email).await.map_err(|error| {
            let class = match error.kind() {
                tourdesk_core::ErrorKind::NotFound => "unknown_user",
                tourdesk_core::ErrorKind::Unauthenticated => "inactive_user",
                _ => "token_issue",
            };
            (class, error.to_string(), 7u8)
        })
    });

    match result {
        Ok(credential) => {
            let message = format!("credential valid until {}", credential.expires_at.to_rfc3339());
            CommandResult::success_with("token", message, Some(credential))
        }
        Err(failure) => failure,
    }
}
