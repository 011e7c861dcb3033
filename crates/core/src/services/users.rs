use serde::{Deserialize, Serialize};

use crate::audit::{Notification, Outbox};
use crate::domain::user::{normalize_email, Role, User, UserProfile};
use crate::domain::UserId;
use crate::errors::{ApplicationError, AuthFailure, ValidationFailure};
use crate::identity::{hash_password, verify_password, Actor, Capability, IssuedCredential};
use crate::services::Backoffice;

const MIN_PASSWORD_LEN: usize = 8;

#[derive(Clone, Debug, Deserialize)]
pub struct RegisterCustomer {
    pub email: String,
    pub name: String,
    pub phone: Option<String>,
    pub password: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct NewUser {
    pub email: String,
    pub name: String,
    pub phone: Option<String>,
    pub role: Role,
    pub password: String,
    #[serde(default)]
    pub can_see_cost_breakup: bool,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct UserUpdate {
    pub name: Option<String>,
    pub phone: Option<String>,
    pub role: Option<Role>,
    pub active: Option<bool>,
}

#[derive(Clone, Debug, Serialize)]
pub struct LoginResponse {
    pub credential: IssuedCredential,
    pub user: UserProfile,
}

fn check_password(password: &str) -> Result<(), ValidationFailure> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ValidationFailure::field(
            "password",
            format!("must be at least {MIN_PASSWORD_LEN} characters"),
        ));
    }
    Ok(())
}

fn check_identity(email: &str, name: &str) -> Result<String, ValidationFailure> {
    let email = normalize_email(email);
    if !email.contains('@') || email.starts_with('@') || email.ends_with('@') {
        return Err(ValidationFailure::field("email", "must be a valid address"));
    }
    if name.trim().is_empty() {
        return Err(ValidationFailure::field("name", "must not be empty"));
    }
    Ok(email)
}

impl Backoffice {
    pub async fn register_customer(
        &self,
        input: RegisterCustomer,
    ) -> Result<UserProfile, ApplicationError> {
        let email = check_identity(&input.email, &input.name)?;
        check_password(&input.password)?;

        let mut tx = self.begin().await?;
        if tx.user_by_email(&email).await?.is_some() {
            return Err(crate::errors::DomainError::Conflict(format!(
                "an account already exists for {email}"
            ))
            .into());
        }

        let now = self.now();
        let user = User {
            id: UserId::generate(),
            email,
            name: input.name.trim().to_owned(),
            phone: input.phone,
            role: Role::Customer,
            active: true,
            can_see_cost_breakup: false,
            password_hash: hash_password(&input.password)?,
            created_at: now,
            updated_at: now,
        };
        tx.put_user(&user).await?;
        tx.commit().await?;

        tracing::info!(event_name = "account.registered", user_id = %user.id, "customer registered");
        Ok(user.profile())
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<LoginResponse, ApplicationError> {
        let mut tx = self.begin().await?;
        let user = tx.user_by_email(&normalize_email(email)).await?;

        let Some(user) = user.filter(|user| verify_password(password, &user.password_hash)) else {
            tracing::info!(event_name = "account.login_failed", "login rejected");
            return Err(ApplicationError::Unauthenticated(AuthFailure::BadCredentials));
        };
        if !user.active {
            return Err(ApplicationError::Unauthenticated(AuthFailure::Inactive));
        }

        let credential = self.credentials.issue(&user, self.now())?;
        Ok(LoginResponse { credential, user: user.profile() })
    }

    /// Resolves a bearer credential to a live account.
    pub async fn authenticate(&self, token: Option<&str>) -> Result<Actor, ApplicationError> {
        let claims =
            self.credentials.verify(token, self.now()).map_err(ApplicationError::Unauthenticated)?;
        let mut tx = self.begin().await?;
        let user = tx
            .user(&UserId(claims.sub.clone()))
            .await?
            .ok_or(ApplicationError::Unauthenticated(AuthFailure::Malformed))?;
        if !user.active {
            return Err(ApplicationError::Unauthenticated(AuthFailure::Inactive));
        }
        Ok(Actor::for_user(&user))
    }

    /// Operator tooling: mint a credential for an existing account without its password.
    pub async fn issue_credential_for(
        &self,
        email: &str,
    ) -> Result<IssuedCredential, ApplicationError> {
        let mut tx = self.begin().await?;
        let user = tx
            .user_by_email(&normalize_email(email))
            .await?
            .ok_or_else(|| ApplicationError::not_found("user", email))?;
        if !user.active {
            return Err(ApplicationError::Unauthenticated(AuthFailure::Inactive));
        }
        self.credentials.issue(&user, self.now())
    }

    pub async fn me(&self, actor: &Actor) -> Result<UserProfile, ApplicationError> {
        let mut tx = self.begin().await?;
        let user = tx
            .user(&actor.user_id)
            .await?
            .ok_or_else(|| ApplicationError::not_found("user", &actor.user_id))?;
        Ok(user.profile())
    }

    pub async fn change_password(
        &self,
        actor: &Actor,
        current: &str,
        new_password: &str,
    ) -> Result<(), ApplicationError> {
        check_password(new_password)?;
        let mut tx = self.begin().await?;
        let mut user = tx
            .user(&actor.user_id)
            .await?
            .ok_or_else(|| ApplicationError::not_found("user", &actor.user_id))?;
        if !verify_password(current, &user.password_hash) {
            return Err(ApplicationError::Unauthenticated(AuthFailure::BadCredentials));
        }
        user.password_hash = hash_password(new_password)?;
        user.updated_at = self.now();
        tx.put_user(&user).await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn create_user(
        &self,
        actor: &Actor,
        input: NewUser,
    ) -> Result<UserProfile, ApplicationError> {
        actor.require(Capability::ManageUsers)?;
        let email = check_identity(&input.email, &input.name)?;
        check_password(&input.password)?;

        let mut tx = self.begin().await?;
        if tx.user_by_email(&email).await?.is_some() {
            return Err(crate::errors::DomainError::Conflict(format!(
                "an account already exists for {email}"
            ))
            .into());
        }
        let now = self.now();
        let user = User {
            id: UserId::generate(),
            email,
            name: input.name.trim().to_owned(),
            phone: input.phone,
            role: input.role,
            active: true,
            can_see_cost_breakup: input.role == Role::Sales && input.can_see_cost_breakup,
            password_hash: hash_password(&input.password)?,
            created_at: now,
            updated_at: now,
        };
        tx.put_user(&user).await?;
        tx.commit().await?;

        tracing::info!(
            event_name = "account.created",
            user_id = %user.id,
            role = %user.role,
            actor_id = %actor.user_id,
            "account created"
        );
        Ok(user.profile())
    }

    pub async fn update_user(
        &self,
        actor: &Actor,
        user_id: &UserId,
        update: UserUpdate,
    ) -> Result<UserProfile, ApplicationError> {
        actor.require(Capability::ManageUsers)?;
        if &actor.user_id == user_id && update.active == Some(false) {
            return Err(ValidationFailure::field("active", "admins cannot deactivate themselves").into());
        }

        let mut tx = self.begin().await?;
        let mut user =
            tx.user(user_id).await?.ok_or_else(|| ApplicationError::not_found("user", user_id))?;
        if let Some(name) = update.name.filter(|name| !name.trim().is_empty()) {
            user.name = name.trim().to_owned();
        }
        if update.phone.is_some() {
            user.phone = update.phone;
        }
        if let Some(role) = update.role {
            user.role = role;
            if role != Role::Sales {
                user.can_see_cost_breakup = false;
            }
        }
        if let Some(active) = update.active {
            user.active = active;
        }
        user.updated_at = self.now();
        tx.put_user(&user).await?;
        tx.commit().await?;
        Ok(user.profile())
    }

    pub async fn reset_password(
        &self,
        actor: &Actor,
        user_id: &UserId,
        new_password: &str,
    ) -> Result<(), ApplicationError> {
        actor.require(Capability::ManageUsers)?;
        check_password(new_password)?;
        let mut tx = self.begin().await?;
        let mut user =
            tx.user(user_id).await?.ok_or_else(|| ApplicationError::not_found("user", user_id))?;
        user.password_hash = hash_password(new_password)?;
        user.updated_at = self.now();
        tx.put_user(&user).await?;
        tx.commit().await?;
        tracing::info!(
            event_name = "account.password_reset",
            user_id = %user_id,
            actor_id = %actor.user_id,
            "password reset by administrator"
        );
        Ok(())
    }

    pub async fn list_users(
        &self,
        actor: &Actor,
        role: Option<Role>,
    ) -> Result<Vec<UserProfile>, ApplicationError> {
        actor.require(Capability::ManageUsers)?;
        let mut tx = self.begin().await?;
        Ok(tx.users(role).await?.iter().map(User::profile).collect())
    }

    pub async fn salespeople(&self, actor: &Actor) -> Result<Vec<UserProfile>, ApplicationError> {
        self.list_users(actor, Some(Role::Sales)).await
    }

    /// Grants or revokes a salesperson's view of supplier costs. Takes effect on next login.
    pub async fn set_cost_breakup_access(
        &self,
        actor: &Actor,
        user_id: &UserId,
        enabled: bool,
    ) -> Result<UserProfile, ApplicationError> {
        actor.require(Capability::ManageUsers)?;
        let mut tx = self.begin().await?;
        let mut user =
            tx.user(user_id).await?.ok_or_else(|| ApplicationError::not_found("user", user_id))?;
        if user.role != Role::Sales {
            return Err(ValidationFailure::field(
                "can_see_cost_breakup",
                format!("only applies to salespeople, {} is {}", user.id, user.role),
            )
            .into());
        }

        user.can_see_cost_breakup = enabled;
        user.updated_at = self.now();
        tx.put_user(&user).await?;

        let mut outbox = Outbox::default();
        let verb = if enabled { "granted" } else { "revoked" };
        outbox.push(Notification::new(
            user.id.clone(),
            "Cost breakup access updated",
            format!("Your access to quotation cost breakups was {verb} by {}.", actor.name),
            self.now(),
        ));
        self.finish(tx, outbox).await?;

        tracing::info!(
            event_name = "account.cost_breakup_access",
            user_id = %user.id,
            enabled,
            actor_id = %actor.user_id,
            "cost breakup access changed"
        );
        Ok(user.profile())
    }
}
