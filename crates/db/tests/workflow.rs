mod support;

use chrono::Duration;

use tourdesk_core::domain::invoice::InvoiceStatus;
use tourdesk_core::domain::leave::LeaveStatus;
use tourdesk_core::domain::payment::PaymentMethod;
use tourdesk_core::domain::quotation::QuotationStatus;
use tourdesk_core::domain::request::{AssignmentSlot, RequestStatus};
use tourdesk_core::errors::{ApplicationError, DomainError, ValidationFailure};
use tourdesk_core::audit::ActivityAction;
use tourdesk_core::services::{ClientInput, NewLeave, RequestUpdate};
use tourdesk_db::{seed_demo, DEMO_ACCOUNTS};

use support::{draft, memory_harness, sqlite_harness, today, trip, Harness};

async fn eleventh_claim_hits_the_assignment_limit(h: Harness) {
    let mut requests = Vec::new();
    for index in 0..11 {
        requests.push(h.customer_request(&format!("City {index}")).await);
    }

    for request_id in &requests[..10] {
        let claimed = h.backoffice.assign_to_me(&h.sales, request_id).await.expect("claim");
        assert_eq!(claimed.assigned_sales_id.as_ref(), Some(&h.sales.user_id));
    }

    let refused = h.backoffice.assign_to_me(&h.sales, &requests[10]).await;
    assert!(matches!(
        refused,
        Err(ApplicationError::Domain(DomainError::AssignmentLimitExceeded { limit: 10, .. }))
    ));

    let taken = h.backoffice.assign_to_me(&h.sales_backup, &requests[0]).await;
    assert!(matches!(
        taken,
        Err(ApplicationError::Domain(DomainError::AlreadyAssigned { slot: AssignmentSlot::Sales, .. }))
    ));

    h.backoffice.cancel_request(&h.sales, &requests[0], None).await.expect("cancel frees a slot");
    h.backoffice.assign_to_me(&h.sales, &requests[10]).await.expect("claim after cancel");
}

#[tokio::test]
async fn eleventh_claim_hits_the_assignment_limit_in_memory() {
    eleventh_claim_hits_the_assignment_limit(memory_harness().await).await;
}

#[tokio::test]
async fn eleventh_claim_hits_the_assignment_limit_on_sqlite() {
    eleventh_claim_hits_the_assignment_limit(sqlite_harness().await).await;
}

#[tokio::test]
async fn operations_cannot_claim_before_sales_validates() {
    let h = memory_harness().await;
    let request_id = h.customer_request("Leh").await;
    h.backoffice.assign_to_me(&h.sales, &request_id).await.expect("sales claim");

    let early = h.backoffice.assign_to_me(&h.ops, &request_id).await;
    assert!(matches!(early, Err(ApplicationError::Domain(DomainError::Conflict(_)))));

    h.backoffice.validate_request(&h.sales, &request_id).await.expect("validate");
    let claimed = h.backoffice.assign_to_me(&h.ops, &request_id).await.expect("ops claim");
    assert_eq!(claimed.assigned_ops_id.as_ref(), Some(&h.ops.user_id));
}

async fn edits_close_as_the_request_advances(h: Harness) {
    let backoffice = &h.backoffice;
    let request_id = h.customer_request("Coorg").await;
    let renamed = backoffice
        .update_request(
            &h.customer,
            &request_id,
            RequestUpdate { title: Some("  Coorg coffee trail ".to_owned()), ..RequestUpdate::default() },
        )
        .await
        .expect("customer edits a pending request");
    assert_eq!(renamed.title, "Coorg coffee trail");

    let nothing = backoffice.update_request(&h.customer, &request_id, RequestUpdate::default()).await;
    assert!(matches!(nothing, Err(ApplicationError::Domain(DomainError::Validation(_)))));
    let reassign_client = RequestUpdate {
        client: Some(ClientInput {
            name: "Someone Else".to_owned(),
            email: "else@example.test".to_owned(),
            phone: None,
            country_code: None,
            customer_id: None,
        }),
        ..RequestUpdate::default()
    };
    let refused = backoffice.update_request(&h.customer, &request_id, reassign_client).await;
    assert!(matches!(refused, Err(ApplicationError::Forbidden { .. })));

    let (quoted_id, quotation_id) = h.quoted_request(40_000, 0).await;
    let late = backoffice
        .update_request(
            &h.customer,
            &quoted_id,
            RequestUpdate { title: Some("Too late".to_owned()), ..RequestUpdate::default() },
        )
        .await;
    assert!(matches!(late, Err(ApplicationError::Domain(DomainError::Conflict(_)))));

    let stretched = backoffice
        .update_request(
            &h.sales,
            &quoted_id,
            RequestUpdate { trip: Some(trip("Goa and Gokarna")), ..RequestUpdate::default() },
        )
        .await
        .expect("assigned rep edits a quoted request");
    assert_eq!(stretched.trip.destination, "Goa and Gokarna");
    assert_eq!(stretched.status, RequestStatus::Quoted);

    backoffice.accept_quotation(&h.customer, &quotation_id).await.expect("accept");
    let frozen = backoffice
        .update_request(
            &h.sales,
            &quoted_id,
            RequestUpdate { title: Some("After acceptance".to_owned()), ..RequestUpdate::default() },
        )
        .await;
    assert!(matches!(frozen, Err(ApplicationError::Domain(DomainError::Conflict(_)))));

    let timeline = backoffice.request_timeline(&h.admin, &quoted_id).await.expect("timeline");
    let edits: Vec<_> =
        timeline.iter().filter(|activity| activity.action == ActivityAction::RequestUpdated).collect();
    assert_eq!(edits.len(), 1);
    assert_eq!(edits[0].notes.as_deref(), Some("updated trip"));
}

#[tokio::test]
async fn edits_close_as_the_request_advances_in_memory() {
    edits_close_as_the_request_advances(memory_harness().await).await;
}

#[tokio::test]
async fn edits_close_as_the_request_advances_on_sqlite() {
    edits_close_as_the_request_advances(sqlite_harness().await).await;
}

async fn acceptance_happens_once(h: Harness) {
    let (request_id, first) = h.quoted_request(25_000, 0).await;
    let second = h
        .backoffice
        .create_quotation(&h.sales, &request_id, draft(27_000, 0))
        .await
        .expect("second quotation");
    h.backoffice
        .publish_quotation(&h.ops, &second.id, h.clock_now() + Duration::days(5))
        .await
        .expect("publish second");

    let outcome = h.backoffice.accept_quotation(&h.customer, &first).await.expect("accept");
    assert_eq!(outcome.quotation.status, QuotationStatus::Accepted);
    assert!(outcome.invoice.is_some());

    let repeat = h.backoffice.accept_quotation(&h.customer, &first).await;
    assert!(matches!(repeat, Err(ApplicationError::Domain(DomainError::AlreadyAccepted(_)))));
    let sibling = h.backoffice.accept_quotation(&h.customer, &second.id).await;
    assert!(matches!(sibling, Err(ApplicationError::Domain(DomainError::AlreadyAccepted(_)))));

    let quotations = h.backoffice.list_quotations(&h.sales, &request_id).await.expect("list");
    let rejected = quotations
        .iter()
        .find(|quotation| quotation.id == second.id)
        .expect("second quotation listed");
    assert_eq!(rejected.status, QuotationStatus::Rejected);

    let invoices = h.backoffice.list_invoices(&h.accountant).await.expect("invoices");
    assert_eq!(invoices.len(), 1);
    let request = h.backoffice.get_request(&h.admin, &request_id).await.expect("request");
    assert_eq!(request.status, RequestStatus::Accepted);
}

#[tokio::test]
async fn acceptance_happens_once_in_memory() {
    acceptance_happens_once(memory_harness().await).await;
}

#[tokio::test]
async fn acceptance_happens_once_on_sqlite() {
    acceptance_happens_once(sqlite_harness().await).await;
}

#[tokio::test]
async fn customers_never_see_drafts_or_cost_breakups() {
    let h = memory_harness().await;
    let request_id = h.customer_request("Hampi").await;
    h.backoffice.assign_to_me(&h.sales, &request_id).await.expect("claim");
    let quotation = h
        .backoffice
        .create_quotation(&h.sales, &request_id, draft(9_000, 0))
        .await
        .expect("draft");

    let hidden = h.backoffice.get_quotation(&h.customer, &quotation.id).await;
    assert!(matches!(hidden, Err(ApplicationError::NotFound { entity: "quotation", .. })));
    assert!(h.backoffice.list_quotations(&h.customer, &request_id).await.expect("list").is_empty());

    let costs = h.backoffice.cost_breakup(&h.customer, &quotation.id).await;
    assert!(matches!(costs, Err(ApplicationError::Forbidden { .. })));
}

#[tokio::test]
async fn lapsed_quotations_expire_their_request() {
    let h = memory_harness().await;
    let (request_id, quotation_id) = h.quoted_request(15_000, 0).await;
    h.clock.advance(Duration::days(8));

    let late = h.backoffice.accept_quotation(&h.customer, &quotation_id).await;
    assert!(matches!(late, Err(ApplicationError::Domain(DomainError::QuotationLapsed { .. }))));

    let report = h.backoffice.run_sweeps(&h.admin).await.expect("sweep");
    assert_eq!(report.expired_quotations, 1);
    assert_eq!(report.expired_requests, 1);

    let request = h.backoffice.get_request(&h.admin, &request_id).await.expect("request");
    assert_eq!(request.status, RequestStatus::Expired);
    let again = h.backoffice.run_sweeps(&h.admin).await.expect("sweep");
    assert_eq!(again.expired_quotations, 0);
}

#[tokio::test]
async fn withdrawal_rejects_live_quotations() {
    let h = memory_harness().await;
    let (request_id, quotation_id) = h.quoted_request(11_000, 0).await;

    let withdrawn = h
        .backoffice
        .withdraw_request(&h.customer, &request_id, Some("plans changed".to_owned()))
        .await
        .expect("withdraw");
    assert_eq!(withdrawn.status, RequestStatus::CustomerCancelled);
    let quotation = h.backoffice.get_quotation(&h.sales, &quotation_id).await.expect("quotation");
    assert_eq!(quotation.status, QuotationStatus::Rejected);

    let staff = h.backoffice.withdraw_request(&h.sales, &request_id, None).await;
    assert!(matches!(staff, Err(ApplicationError::Forbidden { .. })));
}

#[tokio::test]
async fn cancelling_an_accepted_request_closes_its_invoice() {
    let h = memory_harness().await;
    let (request_id, invoice) = h.invoiced_request(20_000).await;

    let cancelled = h
        .backoffice
        .cancel_request(&h.sales, &request_id, Some("supplier failure".to_owned()))
        .await
        .expect("cancel");
    assert_eq!(cancelled.status, RequestStatus::Rejected);

    let closed = h.backoffice.get_invoice(&h.accountant, &invoice.id).await.expect("invoice");
    assert_eq!(closed.status, InvoiceStatus::Cancelled);
}

async fn backups_cover_one_leave_at_a_time(h: Harness) {
    let request_id = h.customer_request("Jaipur").await;
    h.backoffice.assign_to_me(&h.sales, &request_id).await.expect("claim");

    let leave = h
        .backoffice
        .create_leave(
            &h.sales,
            NewLeave {
                start_date: today(),
                end_date: today() + Duration::days(4),
                backup_user_id: h.sales_backup.user_id.clone(),
                reason: "family wedding".to_owned(),
                user_id: None,
            },
        )
        .await
        .expect("file leave");

    let covered = h.backoffice.delegated_requests(&h.sales_backup).await.expect("delegated");
    assert_eq!(covered.len(), 1);
    assert!(covered[0].delegated);
    let visible = h.backoffice.get_request(&h.sales_backup, &request_id).await.expect("visible");
    assert!(visible.delegated);

    let overlapping = NewLeave {
        start_date: today() + Duration::days(3),
        end_date: today() + Duration::days(6),
        backup_user_id: h.sales_backup.user_id.clone(),
        reason: String::new(),
        user_id: None,
    };
    let clash = h.backoffice.create_leave(&h.sales_third, overlapping.clone()).await;
    assert!(matches!(
        clash,
        Err(ApplicationError::Domain(DomainError::Validation(ValidationFailure::OverlappingLeave { .. })))
    ));

    let cancelled = h.backoffice.cancel_leave(&h.sales, &leave.id).await.expect("cancel leave");
    assert_eq!(cancelled.status, LeaveStatus::Cancelled);
    h.backoffice.create_leave(&h.sales_third, overlapping).await.expect("leave after cancel");
    assert!(h.backoffice.delegated_requests(&h.sales_backup).await.expect("delegated").is_empty());
}

#[tokio::test]
async fn backups_cover_one_leave_at_a_time_in_memory() {
    backups_cover_one_leave_at_a_time(memory_harness().await).await;
}

#[tokio::test]
async fn backups_cover_one_leave_at_a_time_on_sqlite() {
    backups_cover_one_leave_at_a_time(sqlite_harness().await).await;
}

#[tokio::test]
async fn leave_backups_must_share_the_role() {
    let h = memory_harness().await;
    let wrong_role = h
        .backoffice
        .create_leave(
            &h.sales,
            NewLeave {
                start_date: today(),
                end_date: today(),
                backup_user_id: h.ops.user_id.clone(),
                reason: String::new(),
                user_id: None,
            },
        )
        .await;
    assert!(matches!(
        wrong_role,
        Err(ApplicationError::Domain(DomainError::Validation(ValidationFailure::InvalidField {
            field: "backup_user_id",
            ..
        })))
    ));

    let backups = h
        .backoffice
        .available_backups(&h.sales, today(), today() + Duration::days(2))
        .await
        .expect("backups");
    let ids: Vec<_> = backups.iter().map(|user| user.id.clone()).collect();
    assert!(ids.contains(&h.sales_backup.user_id));
    assert!(!ids.contains(&h.sales.user_id));
    assert!(!ids.contains(&h.ops.user_id));
}

#[tokio::test]
async fn notifications_follow_the_workflow() {
    let h = memory_harness().await;
    h.quoted_request(14_000, 0).await;

    let inbox = h.backoffice.notifications(&h.customer).await.expect("inbox");
    assert!(inbox.iter().any(|notification| notification.title == "Your quotation is ready"));
    let unread = h.backoffice.unread_notifications(&h.customer).await.expect("unread");
    assert_eq!(unread, inbox.len());

    h.backoffice
        .mark_notification_read(&h.customer, &inbox[0].id)
        .await
        .expect("mark read");
    assert_eq!(h.backoffice.unread_notifications(&h.customer).await.expect("unread"), unread - 1);

    let foreign = h.backoffice.mark_notification_read(&h.sales, &inbox[0].id).await;
    assert!(matches!(foreign, Err(ApplicationError::NotFound { .. })));

    let cleared = h.backoffice.mark_all_notifications_read(&h.customer).await.expect("mark all");
    assert_eq!(cleared, unread - 1);
    assert_eq!(h.backoffice.unread_notifications(&h.customer).await.expect("unread"), 0);
}

#[tokio::test]
async fn dashboard_counts_match_the_role() {
    let h = memory_harness().await;
    let (_, quotation_id) = h.quoted_request(16_000, 0).await;
    h.customer_request("Ooty").await;

    let sales = h.backoffice.dashboard(&h.sales).await.expect("sales dashboard");
    assert_eq!(sales.my_active_requests, 1);
    assert_eq!(sales.open_requests, Some(1));
    assert_eq!(sales.delegated_requests, Some(0));
    assert_eq!(sales.pending_verifications, None);

    h.clock.advance(Duration::days(5));
    let ops = h.backoffice.dashboard(&h.ops).await.expect("ops dashboard");
    assert_eq!(ops.expiring_quotations, Some(1));

    let outcome = h.backoffice.accept_quotation(&h.customer, &quotation_id).await.expect("accept");
    let invoice = outcome.invoice.expect("invoice");
    h.backoffice
        .pay_remaining(&h.customer, &invoice.id, PaymentMethod::Cash, None)
        .await
        .expect("pay");

    let accountant = h.backoffice.dashboard(&h.accountant).await.expect("accountant dashboard");
    assert_eq!(accountant.pending_verifications, Some(1));
    assert_eq!(accountant.refund_reviews, Some(0));
    assert_eq!(accountant.open_requests, None);

    let customer = h.backoffice.dashboard(&h.customer).await.expect("customer dashboard");
    assert_eq!(customer.my_active_requests, 2);
    assert!(customer.unread_notifications > 0);
}

#[tokio::test]
async fn demo_seed_is_idempotent() {
    let h = memory_harness().await;

    let first = seed_demo(&h.backoffice).await.expect("seed");
    assert_eq!(first.users_created, DEMO_ACCOUNTS.len());
    assert!(first.demo_request.is_some());

    let second = seed_demo(&h.backoffice).await.expect("reseed");
    assert_eq!(second.users_created, 0);
    assert_eq!(second.users_existing, DEMO_ACCOUNTS.len());
    assert_eq!(second.demo_request, None);
}
