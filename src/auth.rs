//! Identity verification and access decisions.
//!
//! Tokens are verified by a hosted identity provider; the verified email is
//! cached per token so a page load does not cost one provider round trip per
//! API call.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::Duration;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cache::{Clock, TtlCache};
use crate::models::Tenant;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("no session token")]
    MissingToken,

    #[error("session token rejected")]
    InvalidToken,

    #[error("identity provider error: {0}")]
    Provider(String),

    #[error("identity provider unreachable: {0}")]
    Transport(#[from] reqwest::Error),
}

/// What the identity provider vouches for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub email: String,
}

/// An authenticated caller, as seen by request handlers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthUser {
    pub email: String,
    pub is_staff: bool,
}

impl AuthUser {
    /// Owners reach their own tenant; staff reach every tenant.
    pub fn can_access(&self, tenant: &Tenant) -> bool {
        self.is_staff || tenant.is_owned_by(&self.email)
    }
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn verify(&self, token: &str) -> Result<Identity, AuthError>;
}

/// Verifies bearer tokens against an OpenID-style userinfo endpoint.
pub struct HttpIdentityProvider {
    client: reqwest::Client,
    userinfo_url: String,
}

#[derive(Deserialize)]
struct UserInfo {
    #[serde(default)]
    email: String,
    email_verified: Option<bool>,
}

impl HttpIdentityProvider {
    pub fn new(userinfo_url: impl Into<String>) -> Result<Self, AuthError> {
        let client = reqwest::Client::builder()
            .timeout(StdDuration::from_secs(10))
            .build()?;
        Ok(HttpIdentityProvider {
            client,
            userinfo_url: userinfo_url.into(),
        })
    }
}

#[async_trait]
impl IdentityProvider for HttpIdentityProvider {
    async fn verify(&self, token: &str) -> Result<Identity, AuthError> {
        let response = self
            .client
            .get(&self.userinfo_url)
            .bearer_auth(token)
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(AuthError::InvalidToken);
        }
        if !status.is_success() {
            return Err(AuthError::Provider(format!("userinfo returned {}", status)));
        }

        let info: UserInfo = response.json().await?;
        if info.email.trim().is_empty() || info.email_verified == Some(false) {
            return Err(AuthError::InvalidToken);
        }
        Ok(Identity {
            email: info.email.trim().to_string(),
        })
    }
}

/// Fixed token-to-email table for local runs and tests.
#[derive(Default)]
pub struct StaticIdentityProvider {
    tokens: HashMap<String, String>,
}

impl StaticIdentityProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(mut self, token: &str, email: &str) -> Self {
        self.tokens.insert(token.to_string(), email.to_string());
        self
    }
}

#[async_trait]
impl IdentityProvider for StaticIdentityProvider {
    async fn verify(&self, token: &str) -> Result<Identity, AuthError> {
        self.tokens
            .get(token)
            .map(|email| Identity {
                email: email.clone(),
            })
            .ok_or(AuthError::InvalidToken)
    }
}

pub struct Authenticator {
    provider: Arc<dyn IdentityProvider>,
    identities: TtlCache<Identity>,
    staff: HashSet<String>,
    cookie_name: String,
}

impl Authenticator {
    pub fn new(
        provider: Arc<dyn IdentityProvider>,
        staff_emails: &[String],
        cookie_name: impl Into<String>,
        ttl: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Authenticator {
            provider,
            identities: TtlCache::new(ttl, clock),
            staff: staff_emails
                .iter()
                .map(|e| e.trim().to_ascii_lowercase())
                .filter(|e| !e.is_empty())
                .collect(),
            cookie_name: cookie_name.into(),
        }
    }

    pub fn cookie_name(&self) -> &str {
        &self.cookie_name
    }

    pub fn is_staff(&self, email: &str) -> bool {
        self.staff.contains(&email.trim().to_ascii_lowercase())
    }

    /// Pick the session token: the cookie wins over an `Authorization:
    /// Bearer` header.
    pub fn token_from(cookie: Option<&str>, authorization: Option<&str>) -> Option<String> {
        if let Some(value) = cookie.map(str::trim).filter(|v| !v.is_empty()) {
            return Some(value.to_string());
        }
        let header = authorization?.trim();
        let (scheme, token) = header.split_once(' ')?;
        let token = token.trim();
        if scheme.eq_ignore_ascii_case("bearer") && !token.is_empty() {
            Some(token.to_string())
        } else {
            None
        }
    }

    pub async fn authenticate(&self, token: &str) -> Result<AuthUser, AuthError> {
        if token.is_empty() {
            return Err(AuthError::MissingToken);
        }

        let identity = match self.identities.get(token) {
            Some(identity) => identity,
            None => {
                let identity = self.provider.verify(token).await?;
                log::debug!("verified session for {}", identity.email);
                self.identities.insert(token, identity.clone());
                identity
            }
        };

        Ok(AuthUser {
            is_staff: self.is_staff(&identity.email),
            email: identity.email,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ManualClock;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingProvider {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl IdentityProvider for CountingProvider {
        async fn verify(&self, token: &str) -> Result<Identity, AuthError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match token {
                "good" => Ok(Identity {
                    email: "Owner@Acme.com".into(),
                }),
                _ => Err(AuthError::InvalidToken),
            }
        }
    }

    fn tenant(owner: &str) -> Tenant {
        let row: Vec<String> = ["Acme", "M1", owner, "", "", "", "", "", "", "acme", ""]
            .iter()
            .map(|s| s.to_string())
            .collect();
        Tenant::from_row(&row).unwrap()
    }

    #[test]
    fn token_sources() {
        assert_eq!(
            Authenticator::token_from(Some("abc"), Some("Bearer xyz")),
            Some("abc".to_string())
        );
        assert_eq!(
            Authenticator::token_from(None, Some("bearer xyz")),
            Some("xyz".to_string())
        );
        assert_eq!(Authenticator::token_from(Some(" "), Some("Basic xyz")), None);
        assert_eq!(Authenticator::token_from(None, Some("Bearer ")), None);
        assert_eq!(Authenticator::token_from(None, None), None);
    }

    #[tokio::test]
    async fn identities_are_cached_until_ttl() {
        let provider = Arc::new(CountingProvider {
            calls: AtomicUsize::new(0),
        });
        let clock = Arc::new(ManualClock::new(chrono::Utc::now()));
        let auth = Authenticator::new(
            provider.clone(),
            &[],
            "__session",
            Duration::seconds(60),
            clock.clone(),
        );

        auth.authenticate("good").await.unwrap();
        auth.authenticate("good").await.unwrap();
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);

        clock.advance(Duration::seconds(60));
        auth.authenticate("good").await.unwrap();
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);

        assert!(matches!(
            auth.authenticate("bad").await,
            Err(AuthError::InvalidToken)
        ));
        assert!(matches!(
            auth.authenticate("").await,
            Err(AuthError::MissingToken)
        ));
    }

    #[tokio::test]
    async fn staff_and_owner_access() {
        let provider = Arc::new(
            StaticIdentityProvider::new()
                .with_token("owner", "owner@acme.com")
                .with_token("staff", "Ops@Agency.com")
                .with_token("other", "someone@else.com"),
        );
        let auth = Authenticator::new(
            provider,
            &[" ops@agency.com ".to_string()],
            "__session",
            Duration::minutes(5),
            Arc::new(ManualClock::new(chrono::Utc::now())),
        );
        let acme = tenant("OWNER@acme.com");

        let owner = auth.authenticate("owner").await.unwrap();
        assert!(!owner.is_staff);
        assert!(owner.can_access(&acme));

        let staff = auth.authenticate("staff").await.unwrap();
        assert!(staff.is_staff);
        assert!(staff.can_access(&acme));

        let other = auth.authenticate("other").await.unwrap();
        assert!(!other.can_access(&acme));
    }
}
