//! Bearer token verification.

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;

use crate::backend::{BackendError, BackendResult};
use crate::config::SupabaseConfig;
use crate::types::{Identity, UserId};

/// Turns a client-supplied credential into a verified identity
#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> BackendResult<Identity>;

    /// Name of this verifier for logging
    fn name(&self) -> &str;
}

/// Validates user JWTs against the Supabase auth API
pub struct SupabaseVerifier {
    base_url: String,
    anon_key: String,
    client: reqwest::Client,
}

impl SupabaseVerifier {
    pub fn new(config: &SupabaseConfig) -> BackendResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| BackendError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            base_url: config.url.clone(),
            anon_key: config.anon_key.clone(),
            client,
        })
    }
}

#[async_trait]
impl IdentityVerifier for SupabaseVerifier {
    async fn verify(&self, token: &str) -> BackendResult<Identity> {
        let response = self
            .client
            .get(format!("{}/auth/v1/user", self.base_url))
            .bearer_auth(token)
            .header("apikey", &self.anon_key)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Status { status, body });
        }

        Ok(response.json().await?)
    }

    fn name(&self) -> &str {
        "supabase"
    }
}

/// Fixed token table for development and tests
#[derive(Debug, Clone, Default)]
pub struct StaticTokens {
    tokens: HashMap<String, UserId>,
}

impl StaticTokens {
    pub fn new(tokens: HashMap<String, UserId>) -> Self {
        Self { tokens }
    }

    pub fn with_token(mut self, token: impl Into<String>, user_id: impl Into<UserId>) -> Self {
        self.tokens.insert(token.into(), user_id.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

#[async_trait]
impl IdentityVerifier for StaticTokens {
    async fn verify(&self, token: &str) -> BackendResult<Identity> {
        // Compare against every entry so lookup time doesn't depend on which token matched
        let mut found = None;
        for (known, user_id) in &self.tokens {
            if constant_time_eq(known.as_bytes(), token.as_bytes()) {
                found = Some(user_id);
            }
        }

        found
            .map(|user_id| Identity {
                user_id: user_id.clone(),
                email: None,
            })
            .ok_or_else(|| BackendError::Rejected("unknown token".to_string()))
    }

    fn name(&self) -> &str {
        "static"
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_tokens() {
        let verifier = StaticTokens::default()
            .with_token("tok-a", "alice")
            .with_token("tok-b", "bob");

        let identity = verifier.verify("tok-b").await.unwrap();
        assert_eq!(identity.user_id, "bob");
        assert!(identity.email.is_none());

        assert!(matches!(
            verifier.verify("tok-c").await,
            Err(BackendError::Rejected(_))
        ));
        assert!(verifier.verify("").await.is_err());
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"hello", b"hello"));
        assert!(!constant_time_eq(b"hello", b"world"));
        assert!(!constant_time_eq(b"hello", b"hell"));
        assert!(constant_time_eq(b"", b""));
    }

    #[test]
    fn test_supabase_user_payload() {
        let identity: Identity =
            serde_json::from_str(r#"{"id":"u-1","email":"a@example.com","role":"authenticated"}"#)
                .unwrap();
        assert_eq!(identity.user_id, "u-1");
        assert_eq!(identity.email.as_deref(), Some("a@example.com"));
    }
}
