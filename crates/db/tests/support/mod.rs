#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use rust_decimal::Decimal;
use secrecy::SecretString;

use tourdesk_core::config::WorkflowSettings;
use tourdesk_core::domain::invoice::Invoice;
use tourdesk_core::domain::quotation::{Pricing, QuotationData};
use tourdesk_core::domain::request::{ServiceFlags, TripParameters};
use tourdesk_core::domain::user::Role;
use tourdesk_core::domain::{QuotationId, RequestId};
use tourdesk_core::identity::{Actor, CredentialService};
use tourdesk_core::services::{NewRequest, NewUser, QuotationDraft, RegisterCustomer};
use tourdesk_core::store::Store;
use tourdesk_core::{Backoffice, ManualClock};
use tourdesk_db::{connect_with_settings, run_pending, InMemoryStore, SqlStore};

pub const PASSWORD: &str = "correct-horse-battery";

pub fn start_of_day() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).single().expect("valid instant")
}

pub fn today() -> NaiveDate {
    start_of_day().date_naive()
}

pub fn inr(amount: i64) -> Decimal {
    Decimal::from(amount)
}

pub struct Harness {
    pub backoffice: Backoffice,
    pub clock: ManualClock,
    pub admin: Actor,
    pub sales: Actor,
    pub sales_backup: Actor,
    pub sales_third: Actor,
    pub ops: Actor,
    pub accountant: Actor,
    pub customer: Actor,
}

pub async fn memory_harness() -> Harness {
    harness(Arc::new(InMemoryStore::new()), WorkflowSettings::default()).await
}

pub async fn sqlite_harness() -> Harness {
    let pool = connect_with_settings("sqlite::memory:", 1, 5).await.expect("connect");
    run_pending(&pool).await.expect("migrate");
    harness(Arc::new(SqlStore::new(pool)), WorkflowSettings::default()).await
}

/// File-backed pool with several connections, so concurrent passes really contend.
pub async fn sqlite_file_harness(dir: &Path) -> Harness {
    let url = format!("sqlite://{}", dir.join("contention.db").display());
    let pool = connect_with_settings(&url, 5, 30).await.expect("connect");
    run_pending(&pool).await.expect("migrate");
    harness(Arc::new(SqlStore::new(pool)), WorkflowSettings::default()).await
}

pub async fn harness(store: Arc<dyn Store>, settings: WorkflowSettings) -> Harness {
    let clock = ManualClock::new(start_of_day());
    let credentials = CredentialService::new(SecretString::from("integration-secret".to_owned()), 60);
    let backoffice =
        Backoffice::new(store, credentials, settings).with_clock(Arc::new(clock.clone()));

    let admin = staff(&backoffice, "admin@agency.test", "Ada Admin", Role::Admin).await;
    let sales = staff(&backoffice, "sales@agency.test", "Sam Sales", Role::Sales).await;
    let sales_backup = staff(&backoffice, "cover@agency.test", "Cora Cover", Role::Sales).await;
    let sales_third = staff(&backoffice, "third@agency.test", "Tariq Third", Role::Sales).await;
    let ops = staff(&backoffice, "ops@agency.test", "Otto Ops", Role::Operations).await;
    let accountant = staff(&backoffice, "books@agency.test", "Bea Books", Role::Accountant).await;

    let profile = backoffice
        .register_customer(RegisterCustomer {
            email: "traveller@example.test".to_owned(),
            name: "Tia Traveller".to_owned(),
            phone: None,
            password: PASSWORD.to_owned(),
        })
        .await
        .expect("register customer");
    let customer = Actor {
        user_id: profile.id,
        role: profile.role,
        name: profile.name,
        can_see_cost_breakup: false,
    };

    Harness { backoffice, clock, admin, sales, sales_backup, sales_third, ops, accountant, customer }
}

async fn staff(backoffice: &Backoffice, email: &str, name: &str, role: Role) -> Actor {
    let profile = backoffice
        .create_user(
            &Actor::system(),
            NewUser {
                email: email.to_owned(),
                name: name.to_owned(),
                phone: None,
                role,
                password: PASSWORD.to_owned(),
                can_see_cost_breakup: role == Role::Sales,
            },
        )
        .await
        .expect("create staff");
    Actor {
        user_id: profile.id,
        role: profile.role,
        name: profile.name,
        can_see_cost_breakup: profile.can_see_cost_breakup,
    }
}

pub fn trip(destination: &str) -> TripParameters {
    let start = today() + Duration::days(30);
    TripParameters {
        destination: destination.to_owned(),
        start_date: Some(start),
        end_date: Some(start + Duration::days(5)),
        preferred_dates: None,
        people_count: 2,
        budget_min: None,
        budget_max: Some(inr(50_000)),
        travel_vibe: Vec::new(),
        services: ServiceFlags { holiday_package: true, ..ServiceFlags::default() },
        special_requirements: None,
    }
}

pub fn draft(total: i64, deposit: i64) -> QuotationDraft {
    QuotationDraft {
        data: QuotationData {
            trip_title: "Goa long weekend".to_owned(),
            services: ServiceFlags { holiday_package: true, ..ServiceFlags::default() },
            itinerary: Vec::new(),
            pricing: Pricing {
                subtotal: inr(total),
                taxes: Decimal::ZERO,
                discount: Decimal::ZERO,
                total: inr(total),
                per_person: inr(total) / Decimal::from(2),
                deposit_due: inr(deposit),
                currency: "INR".to_owned(),
            },
            inclusions: vec!["Breakfast".to_owned()],
            exclusions: Vec::new(),
            terms: None,
        },
        cost_breakup: Vec::new(),
    }
}

impl Harness {
    pub async fn customer_request(&self, destination: &str) -> RequestId {
        self.backoffice
            .create_request(
                &self.customer,
                NewRequest {
                    title: format!("Trip to {destination}"),
                    client: None,
                    trip: trip(destination),
                    submit: true,
                },
            )
            .await
            .expect("create request")
            .id
    }

    /// Claimed by sales and operations, validated, with one published quotation.
    pub async fn quoted_request(&self, total: i64, deposit: i64) -> (RequestId, QuotationId) {
        let request_id = self.customer_request("Goa").await;
        let backoffice = &self.backoffice;
        backoffice.assign_to_me(&self.sales, &request_id).await.expect("sales claim");
        backoffice.validate_request(&self.sales, &request_id).await.expect("validate");
        backoffice.assign_to_me(&self.ops, &request_id).await.expect("ops claim");

        let quotation = backoffice
            .create_quotation(&self.sales, &request_id, draft(total, deposit))
            .await
            .expect("create quotation");
        backoffice
            .publish_quotation(&self.ops, &quotation.id, self.clock_now() + Duration::days(7))
            .await
            .expect("publish quotation");
        (request_id, quotation.id)
    }

    /// Quoted, accepted by the customer and invoiced on acceptance.
    pub async fn invoiced_request(&self, total: i64) -> (RequestId, Invoice) {
        let (request_id, quotation_id) = self.quoted_request(total, 0).await;
        let outcome =
            self.backoffice.accept_quotation(&self.customer, &quotation_id).await.expect("accept");
        (request_id, outcome.invoice.expect("invoice raised on acceptance"))
    }

    pub fn clock_now(&self) -> DateTime<Utc> {
        self.backoffice.now()
    }
}
