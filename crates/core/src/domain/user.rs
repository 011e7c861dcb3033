use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::UserId;

wire_enum!(Role {
    Sales => "sales",
    Operations => "operations",
    Accountant => "accountant",
    Customer => "customer",
    Admin => "admin",
});

impl Role {
    pub fn is_staff(self) -> bool {
        !matches!(self, Role::Customer)
    }

    /// Roles that hold request assignments and are therefore subject to the workload cap.
    pub fn takes_assignments(self) -> bool {
        matches!(self, Role::Sales | Role::Operations)
    }
}

/// A platform account. The credential hash never leaves the core; callers see [`UserProfile`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct User {
    pub id: UserId,
    pub email: String,
    pub name: String,
    pub phone: Option<String>,
    pub role: Role,
    pub active: bool,
    pub can_see_cost_breakup: bool,
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: UserId,
    pub email: String,
    pub name: String,
    pub phone: Option<String>,
    pub role: Role,
    pub active: bool,
    pub can_see_cost_breakup: bool,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn profile(&self) -> UserProfile {
        UserProfile {
            id: self.id.clone(),
            email: self.email.clone(),
            name: self.name.clone(),
            phone: self.phone.clone(),
            role: self.role,
            active: self.active,
            can_see_cost_breakup: self.can_see_cost_breakup,
            created_at: self.created_at,
        }
    }
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::{normalize_email, Role};

    #[test]
    fn only_sales_and_operations_take_assignments() {
        let takers: Vec<Role> =
            Role::ALL.iter().copied().filter(|role| role.takes_assignments()).collect();
        assert_eq!(takers, vec![Role::Sales, Role::Operations]);
        assert!(!Role::Customer.is_staff());
    }

    #[test]
    fn emails_compare_case_insensitively() {
        assert_eq!(normalize_email("  Priya@Agency.Example "), "priya@agency.example");
    }
}
