use crate::evidence::sha256;
use crate::lead::AuthTokenRef;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use thiserror::Error;

/// Opaque authorization token issued outside the node.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct AuthToken(String);

impl AuthToken {
    pub fn new(token: &str) -> Self { Self(token.to_string()) }

    /// Non-secret reference that may be logged and bound into solutions.
    pub fn reference(&self) -> AuthTokenRef { AuthTokenRef(format!("tok-{}", sha256(self.0.as_bytes()).short())) }
}

impl std::fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { write!(f, "AuthToken({})", self.reference().0) }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RoeViolation {
    #[error("token {0} is not recognised")]
    UnknownToken(String),
    #[error("token {token} expired at {expired_at}")]
    TokenExpired { token: String, expired_at: DateTime<Utc> },
    #[error("token does not cover effector {0}")]
    EffectorNotCovered(String),
}

/// Rules-of-engagement reference consulted when arming.
pub trait RoeReference: Send + Sync {
    /// # Errors
    /// - [`RoeViolation`] if `token` does not authorize `effector_id` at `now`.
    fn authorize(&self, token: &AuthToken, effector_id: &str, now: DateTime<Utc>) -> Result<AuthTokenRef, RoeViolation>;
}

#[derive(Debug, Clone)]
struct Grant {
    effector_ids: Vec<String>,
    expires_at: DateTime<Utc>,
}

/// Fixed allow-list of tokens, each scoped to effectors and an expiry.
#[derive(Debug, Default)]
pub struct StaticRoe {
    grants: HashMap<AuthToken, Grant>,
}

impl StaticRoe {
    pub fn new() -> Self { Self::default() }

    pub fn grant(mut self, token: &AuthToken, effector_id: &str, expires_at: DateTime<Utc>) -> Self {
        self.grants
            .entry(token.clone())
            .and_modify(|g| {
                g.effector_ids.push(effector_id.to_string());
                g.expires_at = expires_at;
            })
            .or_insert_with(|| Grant { effector_ids: vec![effector_id.to_string()], expires_at });
        self
    }
}

impl RoeReference for StaticRoe {
    fn authorize(&self, token: &AuthToken, effector_id: &str, now: DateTime<Utc>) -> Result<AuthTokenRef, RoeViolation> {
        let token_ref = token.reference();
        let grant = self.grants.get(token).ok_or_else(|| RoeViolation::UnknownToken(token_ref.0.clone()))?;
        if now >= grant.expires_at {
            return Err(RoeViolation::TokenExpired { token: token_ref.0, expired_at: grant.expires_at });
        }
        if !grant.effector_ids.iter().any(|id| id == effector_id) {
            return Err(RoeViolation::EffectorNotCovered(effector_id.to_string()));
        }
        Ok(token_ref)
    }
}
