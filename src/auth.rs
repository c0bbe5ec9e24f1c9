use actix_web::{dev::Payload, Error, FromRequest, HttpRequest};
use actix_web_httpauth::extractors::bearer::BearerAuth;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::env;
use std::future::{ready, Ready};
use std::str::FromStr;
use utoipa::ToSchema;

use crate::error::ApiError;
use crate::models::Id;

/// Tokens stay valid for 30 days.
const TOKEN_TTL_DAYS: i64 = 30;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Admin => "admin",
        }
    }
}

impl FromStr for Role {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "user" => Ok(Role::User),
            "admin" => Ok(Role::Admin),
            other => Err(AuthError::UnknownRole(other.to_string())),
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum AuthError {
    #[error("JWT_SECRET not set")]
    MissingSecret,
    #[error("invalid token")]
    InvalidToken,
    #[error("unknown role '{0}'")]
    UnknownRole(String),
    #[error("token encoding failed: {0}")]
    Encode(#[from] jsonwebtoken::errors::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User id as a decimal string.
    pub sub: String,
    pub exp: usize,
    /// Role at issue time. Informational only: handlers re-read the user record.
    pub role: Role,
}

impl Claims {
    pub fn user_id(&self) -> Result<Id, AuthError> {
        self.sub.parse().map_err(|_| AuthError::InvalidToken)
    }
}

fn secret() -> Result<String, AuthError> {
    env::var("JWT_SECRET").map_err(|_| AuthError::MissingSecret)
}

/// Validate a JWT and return its claims.
fn decode_jwt(token: &str) -> Result<Claims, AuthError> {
    let secret = secret()?;
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = true;
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map_err(|_| AuthError::InvalidToken)?;
    Ok(data.claims)
}

/// Extractor yielding validated `Claims`. Use `Option<Auth>` on routes where
/// anonymous access is allowed.
pub struct Auth(pub Claims);

impl Auth {
    pub fn user_id(&self) -> Result<Id, AuthError> {
        self.0.user_id()
    }
}

impl FromRequest for Auth {
    type Error = Error;
    type Future = Ready<Result<Self, Error>>;

    fn from_request(req: &HttpRequest, pl: &mut Payload) -> Self::Future {
        // Delegate to BearerAuth to parse the header.
        let Ok(bearer) = BearerAuth::from_request(req, pl).into_inner() else {
            return ready(Err(ApiError::Unauthorized.into()));
        };
        ready(match decode_jwt(bearer.token()) {
            Ok(claims) => Ok(Auth(claims)),
            Err(e) => {
                tracing::debug!("rejected bearer token: {e}");
                Err(ApiError::from(e).into())
            }
        })
    }
}

/// Create a JWT for a user.
pub fn create_jwt(user_id: Id, role: Role) -> Result<String, AuthError> {
    let secret = secret()?;
    let expiration = (chrono::Utc::now() + chrono::Duration::days(TOKEN_TTL_DAYS)).timestamp();
    let claims = Claims {
        sub: user_id.to_string(),
        exp: usize::try_from(expiration).map_err(|_| AuthError::InvalidToken)?,
        role,
    };

    Ok(encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_parses_case_insensitively() {
        assert_eq!("ADMIN".parse::<Role>().unwrap(), Role::Admin);
        assert_eq!("user".parse::<Role>().unwrap(), Role::User);
        assert!("moderator".parse::<Role>().is_err());
    }

    #[test]
    fn non_numeric_subject_is_invalid() {
        let claims = Claims { sub: "not-a-number".into(), exp: usize::MAX, role: Role::User };
        assert!(matches!(claims.user_id(), Err(AuthError::InvalidToken)));
    }
}
