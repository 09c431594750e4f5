//! Session authentication for the realtime channel and the HTTP layer.
//!
//! Verifies HS256 bearer tokens presented at connection establishment,
//! extracting the authenticated identity before any room join occurs.

use std::str::FromStr;

use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, errors::ErrorKind};
use serde::{Deserialize, Serialize};

use crate::errors::AuthError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Admin => "admin",
        }
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "admin" => Ok(Self::Admin),
            _ => Err(format!("Invalid role: {}", s)),
        }
    }
}

/// The authenticated identity attached to a connection or request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: i64,
    pub email: String,
    pub role: Role,
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    #[serde(rename = "userId")]
    user_id: i64,
    email: String,
    role: Role,
    iat: i64,
    exp: i64,
}

/// Mint a signed token for the given identity.
pub fn issue_token(
    user_id: i64,
    email: &str,
    role: Role,
    secret: &str,
    expires_hours: i64,
) -> Result<String> {
    let now = Utc::now();
    let claims = Claims {
        user_id,
        email: email.to_string(),
        role,
        iat: now.timestamp(),
        exp: (now + Duration::hours(expires_hours)).timestamp(),
    };
    jsonwebtoken::encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .context("Failed to sign token")
}

/// Verify a presented token's signature and expiry.
///
/// Runs synchronously in the connection-establishment path; no room
/// membership exists until it succeeds.
pub fn verify_token(token: &str, secret: &str) -> Result<Identity, AuthError> {
    let validation = Validation::new(Algorithm::HS256);
    let data = jsonwebtoken::decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map_err(|e| match e.kind() {
        ErrorKind::ExpiredSignature => AuthError::ExpiredToken,
        kind => AuthError::InvalidToken(format!("{:?}", kind)),
    })?;

    Ok(Identity {
        user_id: data.claims.user_id,
        email: data.claims.email,
        role: data.claims.role,
    })
}
