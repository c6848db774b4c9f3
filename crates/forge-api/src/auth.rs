//! Credential verification.
//!
//! The authentication *provider* is an external collaborator; this module
//! holds the verification seam and a JWT implementation of it. A session
//! is authorized for a job iff the authenticated subject owns it or holds
//! the admin role.

use async_trait::async_trait;
use axum::http::HeaderMap;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;

use forge_models::JobSnapshot;

use crate::error::ApiError;

/// Role carried by a verified credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Admin,
}

/// A verified credential subject.
#[derive(Debug, Clone)]
pub struct AuthSubject {
    pub subject_id: i64,
    pub role: Role,
}

impl AuthSubject {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// Owner-or-admin authorization rule.
    pub fn can_access(&self, job: &JobSnapshot) -> bool {
        self.is_admin() || job.owner_id == self.subject_id
    }
}

/// Verifies a bearer credential into a subject. Called once per session.
#[async_trait]
pub trait CredentialVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<AuthSubject, ApiError>;
}

#[derive(Debug, Deserialize)]
struct Claims {
    sub: String,
    #[serde(default)]
    role: Option<String>,
    #[allow(dead_code)]
    exp: usize,
}

/// HS256 JWT verifier.
pub struct JwtVerifier {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    pub fn new(secret: &[u8]) -> Self {
        Self {
            decoding_key: DecodingKey::from_secret(secret),
            validation: Validation::new(Algorithm::HS256),
        }
    }

    /// Read the signing secret from `AUTH_JWT_SECRET`.
    pub fn from_env() -> Result<Self, ApiError> {
        let secret = std::env::var("AUTH_JWT_SECRET")
            .map_err(|_| ApiError::internal("AUTH_JWT_SECRET is not set"))?;
        Ok(Self::new(secret.as_bytes()))
    }
}

#[async_trait]
impl CredentialVerifier for JwtVerifier {
    async fn verify(&self, token: &str) -> Result<AuthSubject, ApiError> {
        let data = decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map_err(|e| ApiError::unauthorized(format!("Invalid token: {e}")))?;

        let subject_id: i64 = data
            .claims
            .sub
            .parse()
            .map_err(|_| ApiError::unauthorized("Invalid subject claim"))?;

        let role = match data.claims.role.as_deref() {
            Some("admin") => Role::Admin,
            _ => Role::User,
        };

        Ok(AuthSubject { subject_id, role })
    }
}

/// Extract a bearer token from the `Authorization` header.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}
