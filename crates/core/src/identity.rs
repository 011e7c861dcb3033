//! Caller identity: signed credentials, the role capability table and password hashing.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::errors::{Error as JwtError, ErrorKind as JwtErrorKind};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::domain::user::{Role, User};
use crate::domain::UserId;
use crate::errors::{ApplicationError, AuthFailure};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Capability {
    CreateRequest,
    AssignAsSales,
    AssignAsOperations,
    ValidateRequest,
    CancelRequest,
    AuthorQuotation,
    PublishQuotation,
    RespondToQuotation,
    ManageInvoices,
    SubmitPayment,
    VerifyAsAccountant,
    VerifyAsOperations,
    ViewFinance,
    ManageLeave,
    ManageUsers,
    ViewAllRequests,
    RunSweeps,
}

impl Capability {
    /// The static role table. `can_see_cost_breakup` is per user and handled by [`Actor`].
    pub fn allowed_roles(self) -> &'static [Role] {
        use Role::{Accountant, Admin, Customer, Operations, Sales};

        match self {
            Self::CreateRequest => &[Sales, Operations, Customer, Admin],
            Self::AssignAsSales | Self::ValidateRequest => &[Sales],
            Self::AssignAsOperations => &[Operations],
            Self::CancelRequest | Self::AuthorQuotation => &[Sales, Operations, Admin],
            Self::PublishQuotation | Self::RunSweeps => &[Operations, Admin],
            Self::RespondToQuotation | Self::SubmitPayment => &[Customer],
            Self::ManageInvoices | Self::ViewFinance => &[Operations, Accountant, Admin],
            Self::VerifyAsAccountant => &[Accountant, Admin],
            Self::VerifyAsOperations => &[Operations, Admin],
            Self::ManageLeave => &[Sales, Operations, Accountant, Admin],
            Self::ManageUsers => &[Admin],
            Self::ViewAllRequests => &[Accountant, Admin],
        }
    }

    pub fn describe(self) -> &'static str {
        match self {
            Self::CreateRequest => "create travel requests",
            Self::AssignAsSales => "claim requests as salesperson",
            Self::AssignAsOperations => "claim requests for operations",
            Self::ValidateRequest => "validate requests",
            Self::CancelRequest => "cancel requests",
            Self::AuthorQuotation => "author quotations",
            Self::PublishQuotation => "publish quotations",
            Self::RespondToQuotation => "accept or decline quotations",
            Self::ManageInvoices => "manage invoices and payment schedules",
            Self::SubmitPayment => "submit payments",
            Self::VerifyAsAccountant => "verify payments as accountant",
            Self::VerifyAsOperations => "verify payments as operations",
            Self::ViewFinance => "view invoices and payments",
            Self::ManageLeave => "manage leave",
            Self::ManageUsers => "manage users",
            Self::ViewAllRequests => "view all requests",
            Self::RunSweeps => "run maintenance sweeps",
        }
    }
}

pub fn role_has(role: Role, capability: Capability) -> bool {
    capability.allowed_roles().contains(&role)
}

/// The authenticated caller of a core operation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub user_id: UserId,
    pub role: Role,
    pub name: String,
    pub can_see_cost_breakup: bool,
}

impl Actor {
    pub fn for_user(user: &User) -> Self {
        Self {
            user_id: user.id.clone(),
            role: user.role,
            name: user.name.clone(),
            can_see_cost_breakup: user.can_see_cost_breakup,
        }
    }

    /// Operator identity for maintenance jobs run outside a user session.
    pub fn system() -> Self {
        Self {
            user_id: UserId::from("system"),
            role: Role::Admin,
            name: "System".to_owned(),
            can_see_cost_breakup: true,
        }
    }

    pub fn can(&self, capability: Capability) -> bool {
        role_has(self.role, capability)
    }

    pub fn require(&self, capability: Capability) -> Result<(), ApplicationError> {
        if self.can(capability) {
            return Ok(());
        }
        Err(self.forbidden(capability.describe()))
    }

    pub fn forbidden(&self, action: impl Into<String>) -> ApplicationError {
        ApplicationError::Forbidden { role: self.role, action: action.into() }
    }

    pub fn can_view_cost_breakup(&self) -> bool {
        match self.role {
            Role::Operations | Role::Accountant | Role::Admin => true,
            Role::Sales => self.can_see_cost_breakup,
            Role::Customer => false,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub role: Role,
    pub name: String,
    pub cbk: bool,
    pub iat: i64,
    pub exp: i64,
}

impl Claims {
    pub fn actor(&self) -> Actor {
        Actor {
            user_id: UserId(self.sub.clone()),
            role: self.role,
            name: self.name.clone(),
            can_see_cost_breakup: self.cbk,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct IssuedCredential {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// Issues and verifies HS256 JWT bearer credentials.
#[derive(Clone, Debug)]
pub struct CredentialService {
    secret: SecretString,
    ttl: Duration,
}

impl CredentialService {
    pub fn new(secret: SecretString, ttl_minutes: u32) -> Self {
        Self { secret, ttl: Duration::minutes(i64::from(ttl_minutes)) }
    }

    pub fn issue(&self, user: &User, now: DateTime<Utc>) -> Result<IssuedCredential, ApplicationError> {
        let expires_at = now + self.ttl;
        let claims = Claims {
            sub: user.id.0.clone(),
            role: user.role,
            name: user.name.clone(),
            cbk: user.can_see_cost_breakup,
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
        };
        let key = EncodingKey::from_secret(self.secret.expose_secret().as_bytes());
        let token = encode(&Header::default(), &claims, &key)
            .map_err(|error| ApplicationError::Configuration(format!("encode credential: {error}")))?;

        Ok(IssuedCredential { token, expires_at })
    }

    /// Expiry is judged against `now` rather than the wall clock, and only reported for
    /// credentials whose signature checks out.
    pub fn verify(&self, token: Option<&str>, now: DateTime<Utc>) -> Result<Claims, AuthFailure> {
        let token = token.map(str::trim).filter(|token| !token.is_empty()).ok_or(AuthFailure::Missing)?;

        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);
        let key = DecodingKey::from_secret(self.secret.expose_secret().as_bytes());
        let claims = decode::<Claims>(token, &key, &validation).map_err(auth_failure)?.claims;

        if claims.exp <= now.timestamp() {
            return Err(AuthFailure::Expired);
        }
        Ok(claims)
    }
}

fn auth_failure(error: JwtError) -> AuthFailure {
    match error.kind() {
        JwtErrorKind::ExpiredSignature => AuthFailure::Expired,
        _ => AuthFailure::Malformed,
    }
}

pub fn hash_password(password: &str) -> Result<String, ApplicationError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|error| ApplicationError::Configuration(format!("password hashing failed: {error}")))
}

pub fn verify_password(password: &str, hash: &str) -> bool {
    PasswordHash::new(hash)
        .map(|parsed| Argon2::default().verify_password(password.as_bytes(), &parsed).is_ok())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use secrecy::SecretString;

    use super::{
        auth_failure, hash_password, role_has, verify_password, Actor, Capability, CredentialService,
    };
    use crate::domain::user::{Role, User};
    use crate::domain::UserId;
    use crate::errors::{ApplicationError, AuthFailure};

    fn user(role: Role, can_see_cost_breakup: bool) -> User {
        let now = Utc::now();
        User {
            id: UserId::from("user-1"),
            email: "ravi@agency.example".to_owned(),
            name: "Ravi".to_owned(),
            phone: None,
            role,
            active: true,
            can_see_cost_breakup,
            password_hash: String::new(),
            created_at: now,
            updated_at: now,
        }
    }

    fn service() -> CredentialService {
        CredentialService::new(SecretString::from("test-signing-secret".to_owned()), 60)
    }

    #[test]
    fn issued_credential_round_trips_role_claims() {
        let now = Utc::now();
        let issued = service().issue(&user(Role::Sales, true), now).expect("issue");
        let claims = service().verify(Some(&issued.token), now).expect("verify");

        let actor = claims.actor();
        assert_eq!(actor.role, Role::Sales);
        assert!(actor.can_see_cost_breakup);
        assert_eq!(issued.expires_at, now + Duration::minutes(60));
    }

    #[test]
    fn expiry_is_distinct_from_tampering() {
        let now = Utc::now();
        let issued = service().issue(&user(Role::Customer, false), now).expect("issue");

        let later = now + Duration::minutes(61);
        assert_eq!(service().verify(Some(&issued.token), later), Err(AuthFailure::Expired));

        let mut tampered = issued.token.clone();
        tampered.replace_range(0..2, "00");
        assert_eq!(service().verify(Some(&tampered), now), Err(AuthFailure::Malformed));

        let other = CredentialService::new(SecretString::from("another-secret".to_owned()), 60);
        assert_eq!(other.verify(Some(&issued.token), now), Err(AuthFailure::Malformed));
        assert_eq!(service().verify(None, now), Err(AuthFailure::Missing));
        assert_eq!(service().verify(Some("no-dot"), now), Err(AuthFailure::Malformed));
    }

    #[test]
    fn credentials_are_standard_hs256_jwts() {
        let now = Utc::now();
        let issued = service().issue(&user(Role::Accountant, false), now).expect("issue");

        let header = jsonwebtoken::decode_header(&issued.token).expect("jwt header");
        assert_eq!(header.alg, jsonwebtoken::Algorithm::HS256);
        assert_eq!(issued.token.split('.').count(), 3);

        let mut validation = jsonwebtoken::Validation::new(jsonwebtoken::Algorithm::HS256);
        validation.validate_exp = false;
        let decoded = jsonwebtoken::decode::<serde_json::Value>(
            &issued.token,
            &jsonwebtoken::DecodingKey::from_secret(b"test-signing-secret"),
            &validation,
        )
        .expect("standard decoder accepts the credential");
        assert_eq!(decoded.claims["sub"], "user-1");
        assert_eq!(decoded.claims["role"], "accountant");
        assert_eq!(decoded.claims["exp"], (now + Duration::minutes(60)).timestamp());
    }

    #[test]
    fn library_expiry_maps_to_expired_and_other_errors_to_malformed() {
        use jsonwebtoken::errors::{Error, ErrorKind};

        assert_eq!(auth_failure(Error::from(ErrorKind::ExpiredSignature)), AuthFailure::Expired);
        assert_eq!(auth_failure(Error::from(ErrorKind::InvalidSignature)), AuthFailure::Malformed);
        assert_eq!(auth_failure(Error::from(ErrorKind::InvalidToken)), AuthFailure::Malformed);
    }

    #[test]
    fn capability_table_is_role_scoped() {
        assert!(role_has(Role::Customer, Capability::RespondToQuotation));
        assert!(!role_has(Role::Sales, Capability::PublishQuotation));
        assert!(role_has(Role::Accountant, Capability::VerifyAsAccountant));
        assert!(!role_has(Role::Accountant, Capability::VerifyAsOperations));

        let customer = Actor::for_user(&user(Role::Customer, true));
        let error = customer.require(Capability::ManageUsers).expect_err("customers cannot");
        assert!(matches!(error, ApplicationError::Forbidden { role: Role::Customer, .. }));
    }

    #[test]
    fn cost_breakup_visibility_follows_role_then_flag() {
        assert!(!Actor::for_user(&user(Role::Sales, false)).can_view_cost_breakup());
        assert!(Actor::for_user(&user(Role::Sales, true)).can_view_cost_breakup());
        assert!(Actor::for_user(&user(Role::Operations, false)).can_view_cost_breakup());
        assert!(!Actor::for_user(&user(Role::Customer, true)).can_view_cost_breakup());
    }

    #[test]
    fn password_hashes_verify_only_the_original() {
        let hash = hash_password("monsoon-2026").expect("hash");
        assert!(verify_password("monsoon-2026", &hash));
        assert!(!verify_password("monsoon-2027", &hash));
        assert!(!verify_password("monsoon-2026", "not-a-phc-string"));
    }
}
