//! Request authentication.
//!
//! Tokens are HS256 JWTs carried in the `auth-token` cookie or an
//! `Authorization: Bearer` header.

use axum::extract::{FromRef, FromRequestParts};
use axum::http::header::{AUTHORIZATION, COOKIE};
use axum::http::request::Parts;
use axum::http::HeaderMap;
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::StoreError;

pub const AUTH_COOKIE: &str = "auth-token";
const TOKEN_TTL_DAYS: i64 = 7;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role { Customer, Admin, SuperAdmin }

impl Role {
    /// Unknown role names are treated as customers.
    pub fn parse(s: &str) -> Self {
        match s { "ADMIN" => Self::Admin, "SUPER_ADMIN" => Self::SuperAdmin, _ => Self::Customer }
    }

    pub fn as_str(&self) -> &'static str {
        match self { Self::Customer => "CUSTOMER", Self::Admin => "ADMIN", Self::SuperAdmin => "SUPER_ADMIN" }
    }

    pub fn is_admin(&self) -> bool { matches!(self, Self::Admin | Self::SuperAdmin) }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthUser { pub user_id: String, pub email: String, pub role: Role }

impl AuthUser {
    pub fn is_admin(&self) -> bool { self.role.is_admin() }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Claims { user_id: String, email: String, role: String, exp: i64 }

pub struct Authenticator { secret: Option<String> }

impl Authenticator {
    pub fn new(secret: Option<String>) -> Self { Self { secret } }

    /// The user behind the request, or `None` when no valid token is present.
    pub fn verify_request(&self, headers: &HeaderMap) -> Option<AuthUser> {
        let secret = self.secret.as_ref()?;
        let token = token_from_headers(headers)?;
        let data = decode::<Claims>(&token, &DecodingKey::from_secret(secret.as_bytes()), &Validation::new(Algorithm::HS256))
            .map_err(|e| tracing::debug!(error = %e, "rejected auth token"))
            .ok()?;
        Some(AuthUser { user_id: data.claims.user_id, email: data.claims.email, role: Role::parse(&data.claims.role) })
    }

    pub fn issue(&self, user_id: &str, email: &str, role: Role) -> crate::Result<String> {
        let secret = self.secret.as_ref().ok_or_else(|| StoreError::Config("JWT_SECRET is not set".into()))?;
        let claims = Claims {
            user_id: user_id.into(), email: email.into(), role: role.as_str().into(),
            exp: (Utc::now() + Duration::days(TOKEN_TTL_DAYS)).timestamp(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &EncodingKey::from_secret(secret.as_bytes()))
            .map_err(|e| StoreError::Config(e.to_string()))
    }
}

fn token_from_headers(headers: &HeaderMap) -> Option<String> {
    let from_cookie = headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .find_map(|pair| pair.trim().strip_prefix(AUTH_COOKIE)?.strip_prefix('=').map(str::to_string));
    from_cookie.or_else(|| {
        let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
        value.strip_prefix("Bearer ").map(|t| t.trim().to_string())
    })
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    Arc<Authenticator>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = StoreError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        Arc::<Authenticator>::from_ref(state).verify_request(&parts.headers).ok_or(StoreError::Unauthorized)
    }
}
