//! Secret-broker handoff for the remote-task backend.
//!
//! The broker supports scoped tokens with a fixed use count and TTL, and
//! write-once secret paths. The backend mints a two-use token, spends one
//! use writing the job context, and hands the token — one use remaining —
//! to the remote task, which performs its single read. A capability-token
//! pattern independent of any specific secret store.

use std::time::Duration;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use serde_json::json;

use super::api::{ApiResult, RemoteApiError};

/// Scoped-token secret broker consumed by the remote-task backend.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SecretBroker: Send + Sync {
    /// Mint a non-renewable token restricted to `uses` uses and `ttl`.
    async fn mint_scoped_token(
        &self,
        display_name: &str,
        uses: u32,
        ttl: Duration,
    ) -> ApiResult<String>;

    /// Write `payload` at `path` using `token`, consuming one of its uses.
    async fn write_secret(
        &self,
        token: &str,
        path: &str,
        payload: serde_json::Value,
    ) -> ApiResult<()>;

    /// Address the remote side uses to reach the broker.
    fn address(&self) -> &str;
}

/// HTTP secret broker speaking the Vault-style token/cubbyhole wire shape.
pub struct HttpSecretBroker {
    client: reqwest::Client,
    address: String,
    /// The service's own broker token, used to mint scoped tokens.
    auth_token: String,
}

impl HttpSecretBroker {
    #[must_use]
    pub fn new(address: impl Into<String>, auth_token: impl Into<String>) -> Self {
        HttpSecretBroker {
            client: reqwest::Client::new(),
            address: address.into().trim_end_matches('/').to_string(),
            auth_token: auth_token.into(),
        }
    }

    async fn post(
        &self,
        token: &str,
        path: &str,
        body: serde_json::Value,
    ) -> ApiResult<reqwest::Response> {
        let response = self
            .client
            .post(format!("{}/v1/{path}", self.address))
            .header("X-Vault-Token", token)
            .json(&body)
            .send()
            .await
            .map_err(|e| RemoteApiError::other(e.to_string()))?;
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(RemoteApiError::not_found(format!("secret path {path} not found")));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RemoteApiError::other(format!(
                "secret broker responded with status {status}: {body}"
            )));
        }
        Ok(response)
    }
}

#[async_trait]
impl SecretBroker for HttpSecretBroker {
    async fn mint_scoped_token(
        &self,
        display_name: &str,
        uses: u32,
        ttl: Duration,
    ) -> ApiResult<String> {
        let body = json!({
            "display_name": display_name,
            "num_uses": uses,
            "explicit_max_ttl": format!("{}s", ttl.as_secs()),
            "renewable": false,
            "no_default_policy": true,
        });
        let response = self.post(&self.auth_token, "auth/token/create", body).await?;
        let created: serde_json::Value = response
            .json()
            .await
            .map_err(|e| RemoteApiError::other(e.to_string()))?;
        created["auth"]["client_token"]
            .as_str()
            .map(ToString::to_string)
            .ok_or_else(|| RemoteApiError::other("token response carried no client token"))
    }

    async fn write_secret(
        &self,
        token: &str,
        path: &str,
        payload: serde_json::Value,
    ) -> ApiResult<()> {
        self.post(token, path, payload).await?;
        Ok(())
    }

    fn address(&self) -> &str {
        &self.address
    }
}
