#[macro_use]
pub mod domain;

pub mod audit;
pub mod clock;
pub mod config;
pub mod delegation;
pub mod documents;
pub mod errors;
pub mod flows;
pub mod identity;
pub mod invoicing;
pub mod services;
pub mod settlement;
pub mod store;

pub use audit::{Activity, ActivityAction, Notification, NotificationSink};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{AppConfig, ConfigError, ConfigOverrides, LoadOptions, WorkflowSettings};
pub use documents::{BlobStore, DocumentError, DocumentPayload, DocumentRenderer, RenderedDocument};
pub use errors::{ApplicationError, DomainError, ErrorKind, InterfaceError, ValidationFailure};
pub use flows::{FlowEngine, FlowEvent, RequestLifecycle};
pub use identity::{Actor, Capability, CredentialService};
pub use services::{Backoffice, SweepReport};
pub use store::{Store, StoreError, StoreTx};
