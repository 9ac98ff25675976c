use std::time::Duration;

use parking_lot::Mutex;
use reqwest::StatusCode;
use reqwest::header::ACCEPT;
use tracing::{debug, error, warn};

use crate::protocol::{TOKEN_PATH, parse_token_response, token_form};
use crate::retry::RetryBudget;
use crate::{Error, Result};

const INVALID_GRANT_HINT: &str =
    "https://github.com/Danielhiversen/home_assistant_adax/issues/18#issuecomment-707238234";

/// Caches the bearer credential obtained through the password grant.
///
/// The server never tells us when a token expires, so the cache is only
/// dropped when a request using it is rejected.
pub struct TokenManager {
    http: reqwest::Client,
    token_url: String,
    account_id: String,
    password: String,
    timeout: Duration,
    max_attempts: u32,
    token: Mutex<Option<String>>,
    login: tokio::sync::Mutex<()>,
}

impl TokenManager {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
    pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

    pub fn new(
        http: reqwest::Client,
        base_url: &str,
        account_id: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            http,
            token_url: format!("{}{}", base_url.trim_end_matches('/'), TOKEN_PATH),
            account_id: account_id.into(),
            password: password.into(),
            timeout: Self::DEFAULT_TIMEOUT,
            max_attempts: Self::DEFAULT_MAX_ATTEMPTS,
            token: Mutex::new(None),
            login: tokio::sync::Mutex::new(()),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn has_token(&self) -> bool {
        self.token.lock().is_some()
    }

    /// Return the cached token, logging in first if there is none.
    pub async fn token(&self) -> Result<String> {
        if let Some(token) = self.token.lock().clone() {
            return Ok(token);
        }

        // Concurrent callers share a single login.
        let _gate = self.login.lock().await;
        if let Some(token) = self.token.lock().clone() {
            return Ok(token);
        }

        let token = self.exchange().await?;
        *self.token.lock() = Some(token.clone());
        Ok(token)
    }

    pub fn invalidate(&self) {
        if self.token.lock().take().is_some() {
            debug!(account = %self.account_id, "bearer token invalidated");
        }
    }

    /// Check the credentials with a fresh exchange; the cache is left alone.
    pub async fn validate(&self) -> Result<()> {
        self.exchange().await.map(|_| ())
    }

    async fn exchange(&self) -> Result<String> {
        let mut budget = RetryBudget::new(self.max_attempts);
        loop {
            debug!(url = %self.token_url, attempt = budget.attempt(), "requesting access token");

            let req = self
                .http
                .post(&self.token_url)
                .header(ACCEPT, "application/json")
                .form(&token_form(&self.account_id, &self.password));

            // The deadline covers the body as well as the headers.
            let exchange = async {
                let resp = req.send().await?;
                let status = resp.status();
                let body = resp.text().await?;
                Ok::<_, reqwest::Error>((status, body))
            };

            let err = match tokio::time::timeout(self.timeout, exchange).await {
                Ok(Ok((status, body))) => return read_token(status, &body),
                Ok(Err(e)) => Error::Http(e),
                Err(_) => Error::Timeout(self.timeout),
            };

            if !budget.spend() {
                error!(error = %err, "giving up on login");
                return Err(err);
            }
            warn!(error = %err, attempts_left = budget.attempts_left(), "login attempt failed, retrying");
        }
    }
}

fn read_token(status: StatusCode, body: &str) -> Result<String> {
    if status != StatusCode::OK {
        let reason = status.canonical_reason().unwrap_or("unknown").to_string();
        if body.contains("invalid_grant") || reason.contains("invalid_grant") {
            error!(status = status.as_u16(), %reason, hint = INVALID_GRANT_HINT, "failed to retrieve access token");
        } else {
            error!(status = status.as_u16(), %reason, "failed to retrieve access token");
        }
        return Err(Error::Auth {
            status: status.as_u16(),
            reason,
        });
    }
    parse_token_response(body)
}

impl std::fmt::Debug for TokenManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenManager")
            .field("token_url", &self.token_url)
            .field("account_id", &self.account_id)
            .field("has_token", &self.has_token())
            .finish_non_exhaustive()
    }
}
