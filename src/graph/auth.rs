use crate::sync::config::SourceConfig;
use crate::sync::util::now_epoch_secs;
use anyhow::{Context, Result};
use reqwest::blocking::Client;
use serde::Deserialize;
use std::sync::Mutex;

/// Refresh this many seconds before the token actually expires.
const EXPIRY_SKEW_SECS: u64 = 60;

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    expires_at_epoch_secs: u64,
}

/// OAuth2 client-credentials token source. Tokens are cached until close
/// to expiry; `invalidate` drops the cache so a 401 can force a refresh.
pub struct TokenProvider {
    login_url: String,
    tenant_id: String,
    client_id: String,
    client_secret: String,
    scope: String,
    cached: Mutex<Option<CachedToken>>,
}

impl TokenProvider {
    pub fn from_config(cfg: &SourceConfig) -> Self {
        Self {
            login_url: cfg.login_url.trim_end_matches('/').to_string(),
            tenant_id: cfg.tenant_id.clone(),
            client_id: cfg.client_id.clone(),
            client_secret: cfg.client_secret.clone(),
            scope: format!("{}/.default", cfg.base_url.trim_end_matches('/')),
            cached: Mutex::new(None),
        }
    }

    pub fn token(&self, http: &Client) -> Result<String> {
        let now = now_epoch_secs()?;
        {
            let cached = self.cached.lock().expect("token cache lock poisoned");
            if let Some(token) = cached.as_ref()
                && token.expires_at_epoch_secs > now + EXPIRY_SKEW_SECS
            {
                return Ok(token.access_token.clone());
            }
        }

        let url = format!("{}/{}/oauth2/v2.0/token", self.login_url, self.tenant_id);
        let params = [
            ("grant_type", "client_credentials"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("scope", self.scope.as_str()),
        ];

        let response = http
            .post(&url)
            .form(&params)
            .send()
            .with_context(|| format!("failed to POST {url}"))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            anyhow::bail!("token request failed with status {status}: {body}");
        }

        let parsed: TokenResponse = response.json().context("invalid JSON from token endpoint")?;
        let token = CachedToken {
            access_token: parsed.access_token.clone(),
            expires_at_epoch_secs: now.saturating_add(parsed.expires_in),
        };
        *self.cached.lock().expect("token cache lock poisoned") = Some(token);

        Ok(parsed.access_token)
    }

    pub fn invalidate(&self) {
        *self.cached.lock().expect("token cache lock poisoned") = None;
    }
}
