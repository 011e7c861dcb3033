//! Demo dataset for local runs: one account per role plus a submitted request from the demo
//! customer. Seeding goes through the back-office services so every row obeys the same rules
//! as live traffic, and running it twice changes nothing.

use chrono::Duration;
use rust_decimal::Decimal;
use serde::Serialize;

use tourdesk_core::domain::request::{ServiceFlags, TripParameters};
use tourdesk_core::domain::user::Role;
use tourdesk_core::domain::RequestId;
use tourdesk_core::errors::ApplicationError;
use tourdesk_core::identity::Actor;
use tourdesk_core::services::{NewRequest, NewUser, RegisterCustomer, RequestQuery};
use tourdesk_core::Backoffice;

pub const DEMO_PASSWORD: &str = "tourdesk-demo";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DemoAccount {
    pub email: &'static str,
    pub name: &'static str,
    pub role: Role,
    pub can_see_cost_breakup: bool,
}

pub const DEMO_ACCOUNTS: &[DemoAccount] = &[
    DemoAccount { email: "admin@tourdesk.test", name: "Asha Admin", role: Role::Admin, can_see_cost_breakup: true },
    DemoAccount { email: "sales1@tourdesk.test", name: "Sameer Sales", role: Role::Sales, can_see_cost_breakup: true },
    DemoAccount { email: "sales2@tourdesk.test", name: "Sana Sales", role: Role::Sales, can_see_cost_breakup: false },
    DemoAccount { email: "ops1@tourdesk.test", name: "Omar Operations", role: Role::Operations, can_see_cost_breakup: true },
    DemoAccount { email: "ops2@tourdesk.test", name: "Olga Operations", role: Role::Operations, can_see_cost_breakup: true },
    DemoAccount { email: "accounts@tourdesk.test", name: "Anil Accounts", role: Role::Accountant, can_see_cost_breakup: true },
    DemoAccount { email: "customer@tourdesk.test", name: "Chitra Customer", role: Role::Customer, can_see_cost_breakup: false },
];

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SeedResult {
    pub users_created: usize,
    pub users_existing: usize,
    pub demo_request: Option<RequestId>,
}

pub async fn seed_demo(backoffice: &Backoffice) -> Result<SeedResult, ApplicationError> {
    let operator = Actor::system();
    let existing = backoffice.list_users(&operator, None).await?;
    let mut result = SeedResult::default();

    for account in DEMO_ACCOUNTS {
        if existing.iter().any(|user| user.email == account.email) {
            result.users_existing += 1;
            continue;
        }
        if account.role == Role::Customer {
            backoffice
                .register_customer(RegisterCustomer {
                    email: account.email.to_owned(),
                    name: account.name.to_owned(),
                    phone: Some("+91 98200 00000".to_owned()),
                    password: DEMO_PASSWORD.to_owned(),
                })
                .await?;
        } else {
            backoffice
                .create_user(
                    &operator,
                    NewUser {
                        email: account.email.to_owned(),
                        name: account.name.to_owned(),
                        phone: None,
                        role: account.role,
                        password: DEMO_PASSWORD.to_owned(),
                        can_see_cost_breakup: account.can_see_cost_breakup,
                    },
                )
                .await?;
        }
        result.users_created += 1;
    }

    let customer = backoffice
        .list_users(&operator, Some(Role::Customer))
        .await?
        .into_iter()
        .find(|user| user.email == "customer@tourdesk.test")
        .ok_or_else(|| ApplicationError::not_found("user", "customer@tourdesk.test"))?;
    let customer_actor = Actor {
        user_id: customer.id.clone(),
        role: customer.role,
        name: customer.name.clone(),
        can_see_cost_breakup: false,
    };

    let already_requested =
        !backoffice.list_requests(&customer_actor, RequestQuery::default()).await?.is_empty();
    if !already_requested {
        let start = backoffice.today() + Duration::days(45);
        let request = backoffice
            .create_request(
                &customer_actor,
                NewRequest {
                    title: "Kerala backwaters family trip".to_owned(),
                    client: None,
                    trip: TripParameters {
                        destination: "Kochi, Alleppey, Munnar".to_owned(),
                        start_date: Some(start),
                        end_date: Some(start + Duration::days(6)),
                        preferred_dates: None,
                        people_count: 4,
                        budget_min: Some(Decimal::from(120_000)),
                        budget_max: Some(Decimal::from(180_000)),
                        travel_vibe: vec!["relaxed".to_owned(), "nature".to_owned()],
                        services: ServiceFlags {
                            holiday_package: true,
                            sightseeing: true,
                            transport: true,
                            ..ServiceFlags::default()
                        },
                        special_requirements: Some("Houseboat with two bedrooms".to_owned()),
                    },
                    submit: true,
                },
            )
            .await?;
        result.demo_request = Some(request.id);
    }

    tracing::info!(
        event_name = "db.seed.completed",
        users_created = result.users_created,
        users_existing = result.users_existing,
        demo_request = result.demo_request.as_ref().map(|id| id.as_str()),
        "demo data seeded"
    );
    Ok(result)
}
