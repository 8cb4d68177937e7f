use base64::{engine::general_purpose::URL_SAFE_NO_PAD as BASE64URL, Engine};
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

const HEADER: &str = r#"{"alg":"HS256","typ":"JWT"}"#;

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("invalid signing key")]
    InvalidKey,
    #[error("cannot encode claims: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
}

/// Issues and checks HS256 JWTs signed with the configured secret.
#[derive(Clone)]
pub struct TokenService {
    mac: HmacSha256,
    ttl: Duration,
}

impl TokenService {
    pub fn new(secret: &str, ttl_hours: i64) -> Result<Self, TokenError> {
        let mac = HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| TokenError::InvalidKey)?;
        Ok(TokenService { mac, ttl: Duration::hours(ttl_hours) })
    }

    fn sign(&self, signing_input: &str) -> String {
        let tag = self.mac.clone().chain_update(signing_input.as_bytes()).finalize();
        BASE64URL.encode(tag.into_bytes())
    }

    pub fn issue(&self, subject: &str) -> Result<String, TokenError> {
        self.issue_at(subject, Utc::now())
    }

    pub fn issue_at(&self, subject: &str, now: DateTime<Utc>) -> Result<String, TokenError> {
        let claims = Claims {
            sub: subject.to_string(),
            iat: now.timestamp(),
            exp: (now + self.ttl).timestamp(),
        };
        let signing_input = format!(
            "{}.{}",
            BASE64URL.encode(HEADER),
            BASE64URL.encode(serde_json::to_vec(&claims)?)
        );
        let signature = self.sign(&signing_input);
        Ok(format!("{}.{}", signing_input, signature))
    }

    pub fn verify(&self, token: &str) -> bool {
        self.verify_at(token, Utc::now())
    }

    pub fn verify_at(&self, token: &str, now: DateTime<Utc>) -> bool {
        self.claims_at(token, now).is_some()
    }

    /// Compares two secrets in constant time by checking one's MAC against
    /// the other's.
    pub fn secure_eq(&self, expected: &str, presented: &str) -> bool {
        let tag = self.mac.clone().chain_update(expected.as_bytes()).finalize().into_bytes();
        self.mac
            .clone()
            .chain_update(presented.as_bytes())
            .verify_slice(&tag)
            .is_ok()
    }

    /// Claims of a correctly signed, unexpired token.
    pub fn claims_at(&self, token: &str, now: DateTime<Utc>) -> Option<Claims> {
        let mut parts = token.split('.');
        let (header, payload, signature) = (parts.next()?, parts.next()?, parts.next()?);
        if parts.next().is_some() {
            return None;
        }

        let signature = BASE64URL.decode(signature).ok()?;
        self.mac
            .clone()
            .chain_update(format!("{}.{}", header, payload).as_bytes())
            .verify_slice(&signature)
            .ok()?;

        let claims: Claims = serde_json::from_slice(&BASE64URL.decode(payload).ok()?).ok()?;
        (claims.exp > now.timestamp()).then_some(claims)
    }
}
