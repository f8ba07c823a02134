use axum::extract::{FromRef, FromRequestParts};
use axum::http::{header::AUTHORIZATION, request::Parts, HeaderMap, StatusCode};
use chrono::Utc;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Authenticated caller for one request. Built from the Bearer token by the
/// extractor below; handlers take it as an argument instead of reading any
/// ambient auth state.
#[derive(Debug, Clone)]
pub struct Session {
    pub user_id: Uuid,
    pub role: String,
}

#[derive(Serialize, Deserialize, Debug)]
struct Claims {
    sub: Uuid,
    role: String,
    exp: i64,
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("missing bearer token")]
    Missing,
    #[error("session expired")]
    Expired,
    #[error("invalid session token")]
    Invalid,
}

impl From<SessionError> for (StatusCode, String) {
    fn from(e: SessionError) -> Self {
        (StatusCode::UNAUTHORIZED, e.to_string())
    }
}

/// Issues and verifies session tokens. One instance lives in the app state;
/// the signing secret comes from `SESSION_SECRET`.
#[derive(Clone)]
pub struct SessionSigner {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl_secs: i64,
}

impl SessionSigner {
    pub fn new(secret: &[u8], ttl_secs: i64) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            ttl_secs,
        }
    }

    pub fn from_env() -> anyhow::Result<Self> {
        let secret = std::env::var("SESSION_SECRET")
            .map_err(|_| anyhow::anyhow!("SESSION_SECRET not set"))?;
        let ttl: i64 = std::env::var("SESSION_TTL_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(3600);
        Ok(Self::new(secret.as_bytes(), ttl))
    }

    pub fn issue(&self, user_id: Uuid, role: &str) -> Result<String, SessionError> {
        let claims = Claims {
            sub: user_id,
            role: role.to_string(),
            exp: Utc::now().timestamp() + self.ttl_secs,
        };
        encode(&Header::default(), &claims, &self.encoding).map_err(|_| SessionError::Invalid)
    }

    pub fn verify(&self, token: &str) -> Result<Session, SessionError> {
        let data = decode::<Claims>(token, &self.decoding, &Validation::default()).map_err(
            |e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => SessionError::Expired,
                _ => SessionError::Invalid,
            },
        )?;
        Ok(Session {
            user_id: data.claims.sub,
            role: data.claims.role,
        })
    }

    /// Re-issues a token for a still-valid session.
    pub fn refresh(&self, token: &str) -> Result<String, SessionError> {
        let session = self.verify(token)?;
        self.issue(session.user_id, &session.role)
    }
}

pub fn bearer_token(headers: &HeaderMap) -> Result<&str, SessionError> {
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or(SessionError::Missing)
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for Session
where
    SessionSigner: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = (StatusCode, String);

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let signer = SessionSigner::from_ref(state);
        let token = bearer_token(&parts.headers)?;
        Ok(signer.verify(token)?)
    }
}
