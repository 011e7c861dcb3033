use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Declares string-backed identifier newtypes.
macro_rules! entity_id {
    ($($name:ident),+ $(,)?) => {
        $(
            #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
            #[serde(transparent)]
            pub struct $name(pub String);

            impl $name {
                pub fn generate() -> Self {
                    Self(Uuid::new_v4().to_string())
                }

                pub fn as_str(&self) -> &str {
                    &self.0
                }
            }

            impl fmt::Display for $name {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    f.write_str(&self.0)
                }
            }

            impl From<&str> for $name {
                fn from(value: &str) -> Self {
                    Self(value.to_owned())
                }
            }
        )+
    };
}

/// Declares an enum whose serialized form is an exact wire string shared with clients.
macro_rules! wire_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $wire:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
        pub enum $name {
            $(
                #[serde(rename = $wire)]
                $variant,
            )+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $wire,)+
                }
            }
        }

        impl std::str::FromStr for $name {
            type Err = $crate::domain::ParseEnumError;

            fn from_str(value: &str) -> Result<Self, Self::Err> {
                match value {
                    $($wire => Ok($name::$variant),)+
                    other => Err($crate::domain::ParseEnumError {
                        kind: stringify!($name),
                        value: other.to_owned(),
                    }),
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

pub mod invoice;
pub mod leave;
pub mod payment;
pub mod quotation;
pub mod request;
pub mod user;

entity_id!(
    UserId,
    RequestId,
    QuotationId,
    InvoiceId,
    BreakupId,
    PaymentId,
    AllocationId,
    LeaveId,
    ActivityId,
    NotificationId,
);

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("unknown {kind} value `{value}`")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

#[cfg(test)]
mod tests {
    use super::{request::RequestStatus, PaymentId};

    #[test]
    fn wire_enums_round_trip_through_their_exact_strings() {
        for status in RequestStatus::ALL {
            let parsed: RequestStatus = status.as_str().parse().expect("known status");
            assert_eq!(parsed, *status);
        }
        assert_eq!(
            serde_json::to_string(&RequestStatus::CustomerCancelled).expect("serialize"),
            "\"CUSTOMER_CANCELLED\""
        );
    }

    #[test]
    fn unknown_wire_value_names_the_enum() {
        let error = "SHIPPED".parse::<RequestStatus>().expect_err("unknown status");
        assert_eq!(error.to_string(), "unknown RequestStatus value `SHIPPED`");
    }

    #[test]
    fn generated_ids_are_unique() {
        assert_ne!(PaymentId::generate(), PaymentId::generate());
    }
}
