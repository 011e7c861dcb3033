use tourdesk_core::identity::Actor;

use crate::commands::{with_backoffice, CommandResult};

/// Quotation expiry plus the overdue-invoice pass, run as the system operator.
pub fn run() -> CommandResult {
    let result = with_backoffice("sweep", |backoffice, _| async move {
        backoffice
            .run_sweeps(&Actor::system())
            .await
            .map_err(|error| ("sweep_execution", error.to_string(), 6u8))
    });

    match result {
        Ok(report) => {
            let message = format!(
                "expired {} quotations and {} requests; {} invoices overdue",
                report.expired_quotations, report.expired_requests, report.overdue_invoices
            );
            CommandResult::success_with("sweep", message, Some(report))
        }
        Err(failure) => failure,
    }
}
