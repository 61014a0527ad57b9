//! Bearer-token authentication.
//!
//! Access tokens are HS256 JWTs carrying the user id and role names, so the
//! `CurrentUser` extractor can authorize most requests without a database
//! round trip. An `admin` claim is the exception: it is confirmed against
//! `user_roles` on every request, so revoking it takes effect before the
//! token expires.

use std::sync::Arc;

use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::{header::AUTHORIZATION, request::Parts},
};
use chrono::{Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use shared::{ROLE_ADMIN, ROLE_SELLER};
use tracing::warn;
use uuid::Uuid;

use crate::accounts::holds_role;
use crate::error::AppError;
use crate::DbPool;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub roles: Vec<String>,
    pub jti: String,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Debug, Clone)]
pub struct JwtService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    ttl: Duration,
}

impl JwtService {
    pub fn new(secret: &str, ttl_minutes: i64) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            ttl: Duration::minutes(ttl_minutes),
        }
    }

    pub fn issue(&self, user_id: i32, roles: &[String]) -> Result<String, AppError> {
        let now = Utc::now();
        let claims = Claims {
            sub: user_id.to_string(),
            roles: roles.to_vec(),
            jti: Uuid::new_v4().to_string(),
            iat: now.timestamp(),
            exp: (now + self.ttl).timestamp(),
        };

        encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("failed to sign token: {}", e)))
    }

    pub fn verify(&self, token: &str) -> Result<CurrentUser, AppError> {
        let data = decode::<Claims>(token, &self.decoding_key, &Validation::default()).map_err(
            |e| {
                match e.kind() {
                    ErrorKind::ExpiredSignature => warn!("rejected expired token"),
                    _ => warn!(error = %e, "rejected invalid token"),
                }
                AppError::Unauthorized
            },
        )?;

        let id = data
            .claims
            .sub
            .parse::<i32>()
            .map_err(|_| AppError::Unauthorized)?;

        Ok(CurrentUser {
            id,
            roles: data.claims.roles,
        })
    }
}

/// The authenticated caller, as attached by the bearer token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrentUser {
    pub id: i32,
    pub roles: Vec<String>,
}

impl CurrentUser {
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    pub fn is_admin(&self) -> bool {
        self.has_role(ROLE_ADMIN)
    }

    pub fn is_seller(&self) -> bool {
        self.has_role(ROLE_SELLER)
    }

    pub fn require_admin(&self) -> Result<(), AppError> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(AppError::forbidden("admin role required"))
        }
    }
}

fn bearer_token(header: &str) -> Option<&str> {
    let (scheme, token) = header.split_once(' ')?;
    if scheme.eq_ignore_ascii_case("bearer") && !token.trim().is_empty() {
        Some(token.trim())
    } else {
        None
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
    Arc<JwtService>: FromRef<S>,
    DbPool: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        if let Some(user) = parts.extensions.get::<CurrentUser>() {
            return Ok(user.clone());
        }

        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .and_then(bearer_token)
            .ok_or(AppError::Unauthorized)?;

        let jwt = Arc::<JwtService>::from_ref(state);
        let mut user = jwt.verify(token)?;

        if user.is_admin() {
            let pool = DbPool::from_ref(state);
            let mut conn = pool.get().await?;
            if !holds_role(&mut conn, user.id, ROLE_ADMIN).await? {
                warn!(user_id = user.id, "token carries a revoked admin role");
                user.roles.retain(|r| r != ROLE_ADMIN);
            }
        }

        parts.extensions.insert(user.clone());

        Ok(user)
    }
}

pub fn hash_password(password: &str) -> Result<String, AppError> {
    use argon2::password_hash::rand_core::OsRng;
    use argon2::password_hash::SaltString;
    use argon2::{Argon2, PasswordHasher};

    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| AppError::Internal(anyhow::anyhow!("failed to hash password: {}", e)))?;
    Ok(hash.to_string())
}

pub fn verify_password(password: &str, hash: &str) -> bool {
    use argon2::{Argon2, PasswordHash, PasswordVerifier};

    let Ok(parsed) = PasswordHash::new(hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}
