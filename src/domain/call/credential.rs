//! Session credential port

use crate::domain::shared::result::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::fmt;

/// Short-lived bearer token authorizing one media negotiation
#[derive(Clone)]
pub struct SessionCredential {
    pub value: String,
    pub expires_at: Option<DateTime<Utc>>,
    /// Tool declarations supplied by the token endpoint, if any
    pub tool_declarations: Option<Vec<Value>>,
}

impl SessionCredential {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            expires_at: None,
            tool_declarations: None,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|at| at <= now).unwrap_or(false)
    }
}

impl fmt::Debug for SessionCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionCredential")
            .field("value", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .field("tool_declarations", &self.tool_declarations.as_ref().map(Vec::len))
            .finish()
    }
}

/// Source of session credentials (the token endpoint)
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Fetch a fresh one-time credential
    async fn fetch(&self) -> Result<SessionCredential>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_debug_redacts_secret() {
        let credential = SessionCredential::new("ek_secret_value");
        let printed = format!("{:?}", credential);
        assert!(!printed.contains("ek_secret_value"));
        assert!(printed.contains("<redacted>"));
    }

    #[test]
    fn test_expiry() {
        let now = Utc::now();
        let mut credential = SessionCredential::new("ek");
        assert!(!credential.is_expired(now));

        credential.expires_at = Some(now - Duration::seconds(1));
        assert!(credential.is_expired(now));
    }
}
