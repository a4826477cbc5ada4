//! Token endpoint client

use crate::domain::call::credential::{CredentialProvider, SessionCredential};
use crate::domain::shared::error::CallError;
use crate::domain::shared::result::Result;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

/// Expiry as either unix seconds or an RFC 3339 timestamp
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Expiry {
    UnixSeconds(i64),
    Timestamp(DateTime<Utc>),
}

impl Expiry {
    fn into_datetime(self) -> Option<DateTime<Utc>> {
        match self {
            Expiry::UnixSeconds(secs) => Utc.timestamp_opt(secs, 0).single(),
            Expiry::Timestamp(at) => Some(at),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ClientSecret {
    value: String,
    #[serde(default)]
    expires_at: Option<Expiry>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TokenResponse {
    #[serde(rename_all = "camelCase")]
    Flat {
        credential: String,
        #[serde(default)]
        expires_at: Option<Expiry>,
        #[serde(default)]
        tool_declarations: Option<Vec<Value>>,
    },
    Provider {
        client_secret: ClientSecret,
        #[serde(default)]
        tools: Option<Vec<Value>>,
    },
}

/// Parse either token response shape into a credential
pub fn parse_token_response(body: &str) -> Result<SessionCredential> {
    let response: TokenResponse = serde_json::from_str(body)
        .map_err(|e| CallError::CredentialFetch(format!("Unexpected token response: {}", e)))?;

    let (value, expires_at, tools) = match response {
        TokenResponse::Flat {
            credential,
            expires_at,
            tool_declarations,
        } => (credential, expires_at, tool_declarations),
        TokenResponse::Provider {
            client_secret,
            tools,
        } => (client_secret.value, client_secret.expires_at, tools),
    };

    if value.trim().is_empty() {
        return Err(CallError::CredentialFetch("Empty credential".to_string()));
    }

    Ok(SessionCredential {
        value,
        expires_at: expires_at.and_then(Expiry::into_datetime),
        // An empty list means "use the defaults", not "no tools"
        tool_declarations: tools.filter(|t| !t.is_empty()),
    })
}

/// `GET`s a fresh credential from the token endpoint
pub struct HttpTokenClient {
    http: reqwest::Client,
    url: String,
}

impl HttpTokenClient {
    pub fn new(http: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            http,
            url: url.into(),
        }
    }
}

#[async_trait]
impl CredentialProvider for HttpTokenClient {
    async fn fetch(&self) -> Result<SessionCredential> {
        let response = self
            .http
            .get(&self.url)
            .send()
            .await
            .map_err(|e| CallError::CredentialFetch(format!("Token request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(%status, "Token endpoint refused");
            return Err(CallError::CredentialFetch(format!(
                "Token endpoint returned {}: {}",
                status, body
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| CallError::CredentialFetch(format!("Failed to read token: {}", e)))?;
        let credential = parse_token_response(&body)?;
        debug!(expires_at = ?credential.expires_at, "Fetched session credential");
        Ok(credential)
    }
}
