//! Bearer-token authentication for the donor-facing API.
//!
//! Tokens are issued by the platform's identity service and verified here with a shared HMAC
//! secret. The webhook endpoints are deliberately outside this: gateways do not log in, their
//! deliveries are authenticated by validation against the gateway itself.

use std::{fmt::Display, future::ready, str::FromStr};

use actix_web::{dev::Payload, web, FromRequest, HttpRequest};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use log::*;
use serde::{Deserialize, Serialize};

use crate::{
    config::AuthConfig,
    errors::{AuthError, ServerError},
};

pub const TOKEN_VALIDITY: Duration = Duration::hours(24);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Donor,
    Admin,
}

impl Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Donor => write!(f, "donor"),
            Role::Admin => write!(f, "admin"),
        }
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "donor" => Ok(Role::Donor),
            "admin" => Ok(Role::Admin),
            s => Err(format!("Unknown role: {s}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtClaims {
    /// The authenticated user id.
    pub sub: String,
    pub role: Role,
    pub exp: i64,
}

impl JwtClaims {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// Admins see everything; donors only what belongs to them. `owner` is `None` for anonymous
    /// resources, which only admins may address directly.
    pub fn may_access(&self, owner: Option<&str>) -> bool {
        self.is_admin() || owner == Some(self.sub.as_str())
    }

    pub fn require_admin(&self) -> Result<(), ServerError> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(AuthError::InsufficientPermissions("This endpoint requires the admin role".to_string()).into())
        }
    }
}

impl FromRequest for JwtClaims {
    type Error = ServerError;
    type Future = std::future::Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        ready(extract_claims(req))
    }
}

fn extract_claims(req: &HttpRequest) -> Result<JwtClaims, ServerError> {
    let issuer = req
        .app_data::<web::Data<TokenIssuer>>()
        .ok_or_else(|| ServerError::InitializeError("Token issuer is not configured".to_string()))?;
    let header = req.headers().get("Authorization").ok_or(AuthError::MissingToken)?;
    let token = header
        .to_str()
        .ok()
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or_else(|| AuthError::ValidationError("Authorization header is not a bearer token".to_string()))?;
    issuer.verify(token)
}

/// Verifies inbound tokens and, for tooling and tests, issues them.
#[derive(Clone)]
pub struct TokenIssuer {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl TokenIssuer {
    pub fn new(config: &AuthConfig) -> Self {
        let secret = config.jwt_secret.reveal().as_bytes();
        Self { encoding_key: EncodingKey::from_secret(secret), decoding_key: DecodingKey::from_secret(secret) }
    }

    pub fn issue(&self, user_id: &str, role: Role) -> Result<String, ServerError> {
        let claims =
            JwtClaims { sub: user_id.to_string(), role, exp: (Utc::now() + TOKEN_VALIDITY).timestamp() };
        encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|e| ServerError::Unspecified(format!("Could not sign access token: {e}")))
    }

    pub fn verify(&self, token: &str) -> Result<JwtClaims, ServerError> {
        let data = decode::<JwtClaims>(token, &self.decoding_key, &Validation::default()).map_err(|e| {
            debug!("🔑️ Token rejected: {e}");
            AuthError::ValidationError(e.to_string())
        })?;
        Ok(data.claims)
    }
}
