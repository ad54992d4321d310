//! Authentication facade shared by the HTTP API and the job handlers.
//!
//! Provides:
//! - JWT bearer token verification (HS256)
//! - The principal a background job executes as
//! - Authenticated encryption for secrets stored at rest

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

mod cipher;

pub use cipher::{decrypt_blocking, encrypt_blocking, AesGcmCipher, CipherError, SecretCipher};

// ============================================================================
// Authentication Context
// ============================================================================

/// Captures the outcome of an authentication attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthContext {
    pub user_id: Option<Uuid>,
    pub scopes: Vec<String>,
    pub metadata: Value,
}

impl AuthContext {
    /// Build a new context describing the currently authenticated subject.
    #[inline]
    pub fn new(user_id: Option<Uuid>, scopes: Vec<String>, metadata: Value) -> Self {
        Self {
            user_id,
            scopes,
            metadata,
        }
    }

    /// Helper for anonymous requests.
    #[inline]
    pub fn anonymous() -> Self {
        Self::new(None, vec!["anonymous".into()], Value::Null)
    }

    /// Indicates if the request represents an authenticated user.
    #[inline]
    pub fn is_authenticated(&self) -> bool {
        self.user_id.is_some()
    }

    /// Check if the context has a specific scope.
    #[inline]
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.iter().any(|s| s == scope)
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Authentication errors that can surface during request processing.
#[derive(Debug, Error, Clone)]
pub enum AuthError {
    #[error("authentication failed")]
    AuthenticationFailed,
    #[error("token expired")]
    TokenExpired,
    #[error("invalid token format")]
    InvalidTokenFormat,
}

// ============================================================================
// Authenticator Trait
// ============================================================================

/// Trait for authentication backends. Implement this for production and test authenticators.
#[async_trait::async_trait]
pub trait AuthenticatorTrait: Send + Sync + 'static {
    async fn authenticate(&self, token: Option<&str>) -> Result<AuthContext, AuthError>;
}

// ============================================================================
// Test Authenticator
// ============================================================================

/// Authenticator that accepts any request as a fixed subject.
#[derive(Debug, Default)]
pub struct TestAuthenticator {
    pub scopes: Vec<String>,
    pub user_id: Option<Uuid>,
}

impl TestAuthenticator {
    pub fn new_with(scopes: Vec<String>, user_id: Option<Uuid>) -> Self {
        Self { scopes, user_id }
    }

    pub fn user(user_id: Uuid) -> Self {
        Self::new_with(vec!["user".into()], Some(user_id))
    }

    /// Rejects every request as unauthenticated.
    pub fn anonymous() -> Self {
        Self::new_with(vec!["anonymous".into()], None)
    }
}

#[async_trait::async_trait]
impl AuthenticatorTrait for TestAuthenticator {
    async fn authenticate(&self, _token: Option<&str>) -> Result<AuthContext, AuthError> {
        Ok(AuthContext::new(
            self.user_id,
            self.scopes.clone(),
            Value::Null,
        ))
    }
}

// ============================================================================
// JWT Authenticator
// ============================================================================

/// Clock skew tolerated when checking `exp`.
const EXP_LEEWAY_SECS: u64 = 60;

/// HS256 JWT authenticator keyed by a shared secret.
#[derive(Clone)]
pub struct JwtAuthenticator {
    key: jsonwebtoken::DecodingKey,
}

impl std::fmt::Debug for JwtAuthenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtAuthenticator").finish_non_exhaustive()
    }
}

impl JwtAuthenticator {
    pub fn new_hs256(secret: impl AsRef<[u8]>) -> Self {
        Self {
            key: jsonwebtoken::DecodingKey::from_secret(secret.as_ref()),
        }
    }

    fn context_from_claims(claims: Claims) -> Result<AuthContext, AuthError> {
        let expired = claims.exp.is_some_and(|exp| {
            let now = u64::try_from(chrono::Utc::now().timestamp()).unwrap_or(0);
            exp + EXP_LEEWAY_SECS < now
        });
        if expired {
            return Err(AuthError::TokenExpired);
        }

        let sub = match claims.sub {
            Some(s) => Some(Uuid::parse_str(&s).map_err(|_| AuthError::InvalidTokenFormat)?),
            None => None,
        };
        let scopes = match (claims.scope, claims.scopes) {
            (Some(s), _) => s.split_whitespace().map(String::from).collect(),
            (_, Some(arr)) => arr,
            _ => vec!["user".into()],
        };

        let metadata = match claims.email {
            Some(email) => serde_json::json!({ "email": email }),
            None => Value::Null,
        };
        Ok(AuthContext::new(sub, scopes, metadata))
    }

    /// Strip the "Bearer " prefix from a token if present.
    #[inline]
    fn strip_bearer(token: &str) -> &str {
        let token = token.trim();
        if token.len() > 7 && token[..7].eq_ignore_ascii_case("bearer ") {
            &token[7..]
        } else {
            token
        }
    }
}

#[derive(Debug, Deserialize)]
struct Claims {
    sub: Option<String>,
    exp: Option<u64>,
    email: Option<String>,
    /// Space-separated scope string (OAuth2 style)
    scope: Option<String>,
    /// Array of scopes
    scopes: Option<Vec<String>>,
}

#[async_trait::async_trait]
impl AuthenticatorTrait for JwtAuthenticator {
    async fn authenticate(&self, token: Option<&str>) -> Result<AuthContext, AuthError> {
        let token = match token {
            Some(t) if !t.trim().is_empty() => Self::strip_bearer(t),
            _ => return Ok(AuthContext::anonymous()),
        };

        let mut validation = jsonwebtoken::Validation::new(jsonwebtoken::Algorithm::HS256);
        // expiry is checked with leeway in context_from_claims
        validation.validate_exp = false;
        validation.required_spec_claims.clear();

        let data = jsonwebtoken::decode::<Claims>(token, &self.key, &validation)
            .map_err(|_| AuthError::AuthenticationFailed)?;
        Self::context_from_claims(data.claims)
    }
}

// ============================================================================
// Job Principal
// ============================================================================

/// Resolves the principal a background job executes as.
///
/// Jobs run outside any request, so the identity comes from process
/// configuration rather than a session.
#[async_trait::async_trait]
pub trait PrincipalSource: Send + Sync {
    async fn current_principal(&self) -> Option<Uuid>;
}

/// A fixed principal, or none at all.
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticPrincipal(Option<Uuid>);

impl StaticPrincipal {
    pub fn new(user_id: Option<Uuid>) -> Self {
        Self(user_id)
    }
}

#[async_trait::async_trait]
impl PrincipalSource for StaticPrincipal {
    async fn current_principal(&self) -> Option<Uuid> {
        self.0
    }
}

// ============================================================================
// Tests
// ============================================================================
