use actix_web::{dev::Payload, Error, FromRequest, HttpRequest};
use actix_web_httpauth::extractors::bearer::BearerAuth;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::env;
use std::future::{ready, Ready};
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Moderator,
    Admin,
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "moderator" => Ok(Role::Moderator),
            "admin" => Ok(Role::Admin),
            other => Err(format!("unknown role '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: usize,
    pub roles: Vec<Role>,
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("JWT_SECRET not set")]
    MissingSecret,
    #[error(transparent)]
    Jwt(#[from] jsonwebtoken::errors::Error),
}

fn secret() -> Result<String, AuthError> {
    env::var("JWT_SECRET").map_err(|_| AuthError::MissingSecret)
}

/// Validate a JWT and return its claims.
fn decode_jwt(token: &str) -> Result<Claims, AuthError> {
    let secret = secret()?;
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = true;
    let data = decode::<Claims>(token, &DecodingKey::from_secret(secret.as_bytes()), &validation)?;
    Ok(data.claims)
}

/// Extractor yielding validated `Claims`.
pub struct Auth(pub Claims);

impl Auth {
    pub fn has_any(&self, roles: &[Role]) -> bool {
        self.0.roles.iter().any(|r| roles.contains(r))
    }

    pub fn is_admin(&self) -> bool {
        self.has_any(&[Role::Admin])
    }

    /// Admins can do everything moderators can.
    pub fn can_moderate(&self) -> bool {
        self.has_any(&[Role::Admin, Role::Moderator])
    }
}

impl FromRequest for Auth {
    type Error = Error;
    type Future = Ready<Result<Self, Error>>;

    fn from_request(req: &HttpRequest, pl: &mut Payload) -> Self::Future {
        if let Ok(bearer) = BearerAuth::from_request(req, pl).into_inner() {
            return match decode_jwt(bearer.token()) {
                Ok(claims) => ready(Ok(Auth(claims))),
                Err(e) => {
                    tracing::debug!("rejected bearer token: {e}");
                    ready(Err(actix_web::error::ErrorUnauthorized("Invalid JWT")))
                }
            };
        }
        ready(Err(actix_web::error::ErrorUnauthorized("Authorization required")))
    }
}

/// Helper macro for role-guarding handlers that return `ApiError`.
#[macro_export]
macro_rules! require_role {
    ($auth:expr, $role:pat) => {
        if !$auth.0.roles.iter().any(|r| matches!(r, $role)) {
            return Err($crate::error::ApiError::Forbidden);
        }
    };
}

pub fn create_jwt(subject: &str, roles: Vec<Role>) -> Result<String, AuthError> {
    let secret = secret()?;
    let expiration = (chrono::Utc::now() + chrono::Duration::hours(24)).timestamp() as usize;
    let claims = Claims { sub: subject.to_string(), exp: expiration, roles };
    Ok(encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_bytes()))?)
}

/// Dashboard account: login name, Django-style password hash, role.
#[derive(Clone, Debug)]
pub struct Account {
    pub name: String,
    pub password_hash: String,
    pub role: Role,
}

#[derive(Clone, Debug, Default)]
pub struct Accounts(Vec<Account>);

impl Accounts {
    /// Parses `name:hash:role` entries separated by commas, where `hash` is
    /// a `pbkdf2_sha256$iterations$salt$digest` string as produced by
    /// `make_password`. Malformed entries are skipped with a warning.
    pub fn parse(spec: &str) -> Self {
        let mut out = Vec::new();
        for entry in spec.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let parts: Vec<&str> = entry.split(':').collect();
            let parsed = match parts.as_slice() {
                [name, hash, role] if !name.is_empty() && is_pbkdf2_hash(hash) => {
                    role.parse::<Role>().ok().map(|role| Account {
                        name: name.to_string(),
                        password_hash: hash.to_string(),
                        role,
                    })
                }
                _ => None,
            };
            match parsed {
                Some(a) => out.push(a),
                None => tracing::warn!("ignoring malformed ADMIN_ACCOUNTS entry for '{}'", parts[0]),
            }
        }
        Self(out)
    }

    pub fn from_env() -> Self {
        Self::parse(&env::var("ADMIN_ACCOUNTS").unwrap_or_default())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Checks the password against the stored hash. Runs the full key
    /// derivation, so call it off the async executor.
    pub fn verify(&self, name: &str, password: &str) -> Option<&Account> {
        self.0
            .iter()
            .find(|a| a.name == name)
            .filter(|a| djangohashers::check_password_tolerant(password, &a.password_hash))
    }
}

fn is_pbkdf2_hash(hash: &str) -> bool {
    hash.starts_with("pbkdf2_") && hash.split('$').count() == 4
}

/// Hash for a new `ADMIN_ACCOUNTS` entry.
pub fn hash_password(password: &str) -> String {
    djangohashers::make_password(password)
}
