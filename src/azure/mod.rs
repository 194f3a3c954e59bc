// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Azure Resource Manager (ARM) client.
//!
//! This module talks to the ARM REST API over `reqwest`. It is split into:
//!
//! - [`ArmClient`] - authentication, request execution with retry, and error mapping
//! - [`operation`] - the long-running-operation protocol (begin/poll)
//! - [`sql`] - MySQL and PostgreSQL server management
//! - [`redis`] - Azure Cache for Redis management
//! - [`virtual_network`] - virtual network management
//! - [`virtual_network_rule`] - MySQL server virtual network rules
//!
//! Credentials come from the `Provider` Secret and use the JSON layout produced by
//! `az ad sp create-for-rbac --sdk-auth`.

pub mod operation;
pub mod redis;
pub mod sql;
pub mod virtual_network;
pub mod virtual_network_rule;

use crate::constants::{
    DEFAULT_AAD_ENDPOINT, DEFAULT_ARM_ENDPOINT, DEFAULT_TOKEN_LIFETIME_SECS,
    TOKEN_REFRESH_SKEW_SECS,
};
use crate::reconcilers::retry::{http_backoff, is_retryable_http_status};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use reqwest::header::{HeaderMap, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, error, warn};
use url::Url;

/// HTTP timeout for a single ARM request
const REQUEST_TIMEOUT_SECS: u64 = 60;

/// Errors returned by the Azure clients.
#[derive(Error, Debug)]
pub enum AzureError {
    /// The credentials JSON could not be parsed.
    #[error("invalid Azure credentials: {0}")]
    InvalidCredentials(String),

    /// The token endpoint rejected the service principal.
    #[error("failed to acquire Azure access token: {0}")]
    Authentication(String),

    /// ARM answered with a non-success status.
    #[error("Azure API returned HTTP {status} ({code}): {message}")]
    Api {
        status: u16,
        code: String,
        message: String,
    },

    /// The request never reached ARM or the connection dropped.
    #[error("failed to send request to {url}: {reason}")]
    Transport { url: String, reason: String },

    /// ARM answered with a body we could not understand.
    #[error("invalid Azure response: {0}")]
    InvalidResponse(String),

    /// A long-running operation token could not be decoded.
    #[error("invalid long-running operation token: {0}")]
    InvalidToken(String),

    /// The desired resource parameters cannot be expressed to Azure.
    #[error("{0}")]
    InvalidParameters(String),
}

impl AzureError {
    /// True if Azure reported that the resource does not exist.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Api { status: 404, .. })
    }

    fn is_retryable(&self) -> bool {
        match self {
            Self::Api { status, .. } => StatusCode::from_u16(*status)
                .map(is_retryable_http_status)
                .unwrap_or(false),
            Self::Transport { .. } => true,
            _ => false,
        }
    }
}

/// Service principal credentials.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
    pub client_id: String,
    pub client_secret: String,
    pub tenant_id: String,
    pub subscription_id: String,
    #[serde(default = "default_aad_endpoint")]
    pub active_directory_endpoint_url: String,
    #[serde(default = "default_arm_endpoint")]
    pub resource_manager_endpoint_url: String,
}

fn default_aad_endpoint() -> String {
    DEFAULT_AAD_ENDPOINT.to_string()
}

fn default_arm_endpoint() -> String {
    DEFAULT_ARM_ENDPOINT.to_string()
}

impl Credentials {
    /// Parse the credentials JSON stored in a `Provider` Secret.
    ///
    /// # Errors
    ///
    /// Returns [`AzureError::InvalidCredentials`] if the data is not valid JSON
    /// or a required field is missing.
    pub fn from_json(data: &[u8]) -> Result<Self, AzureError> {
        serde_json::from_slice(data).map_err(|e| AzureError::InvalidCredentials(e.to_string()))
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<serde_json::Value>,
}

struct AccessToken {
    value: String,
    expires_at: DateTime<Utc>,
}

#[derive(Deserialize)]
struct ArmErrorBody {
    error: Option<ArmErrorDetail>,
}

#[derive(Deserialize)]
struct ArmErrorDetail {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

/// A successful ARM response.
#[derive(Debug)]
pub struct ArmResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: String,
}

impl ArmResponse {
    /// Decode the response body.
    ///
    /// # Errors
    ///
    /// Returns [`AzureError::InvalidResponse`] if the body does not match `T`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, AzureError> {
        serde_json::from_str(&self.body).map_err(|e| AzureError::InvalidResponse(e.to_string()))
    }

    /// Value of a response header, if present and valid UTF-8.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// Authenticated client for one subscription.
pub struct ArmClient {
    http: reqwest::Client,
    credentials: Credentials,
    token: Mutex<Option<AccessToken>>,
}

impl ArmClient {
    /// Build a client from parsed credentials.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(credentials: Credentials) -> Result<Self, AzureError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| AzureError::InvalidCredentials(e.to_string()))?;
        Ok(Self {
            http,
            credentials,
            token: Mutex::new(None),
        })
    }

    /// Build a client from the raw credentials JSON of a `Provider` Secret.
    ///
    /// # Errors
    ///
    /// Returns an error if the credentials cannot be parsed.
    pub fn from_credentials_json(data: &[u8]) -> Result<Self, AzureError> {
        Self::new(Credentials::from_json(data)?)
    }

    #[must_use]
    pub fn subscription_id(&self) -> &str {
        &self.credentials.subscription_id
    }

    /// URL of an ARM resource path below the subscription, with the api-version set.
    ///
    /// `path` starts after `/subscriptions/{id}`, e.g. `/resourceGroups/rg/providers/...`.
    ///
    /// # Errors
    ///
    /// Returns an error if the configured ARM endpoint is not a valid URL.
    pub fn resource_url(&self, path: &str, api_version: &str) -> Result<Url, AzureError> {
        let base = Url::parse(&self.credentials.resource_manager_endpoint_url)
            .map_err(|e| AzureError::InvalidCredentials(format!("resourceManagerEndpointUrl: {e}")))?;
        let mut url = base
            .join(&format!(
                "subscriptions/{}{}",
                self.credentials.subscription_id, path
            ))
            .map_err(|e| AzureError::InvalidParameters(format!("invalid resource path {path}: {e}")))?;
        url.query_pairs_mut().append_pair("api-version", api_version);
        Ok(url)
    }

    /// Return a cached access token, fetching a new one when it is close to expiry.
    async fn access_token(&self) -> Result<String, AzureError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if token.expires_at - ChronoDuration::seconds(TOKEN_REFRESH_SKEW_SECS) > Utc::now() {
                return Ok(token.value.clone());
            }
        }

        let token = self.fetch_token().await?;
        let value = token.value.clone();
        *cached = Some(token);
        Ok(value)
    }

    async fn fetch_token(&self) -> Result<AccessToken, AzureError> {
        let creds = &self.credentials;
        let url = Url::parse(&creds.active_directory_endpoint_url)
            .and_then(|base| base.join(&format!("{}/oauth2/token", creds.tenant_id)))
            .map_err(|e| AzureError::InvalidCredentials(format!("activeDirectoryEndpointUrl: {e}")))?;

        let form = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("grant_type", "client_credentials")
            .append_pair("client_id", &creds.client_id)
            .append_pair("client_secret", &creds.client_secret)
            .append_pair("resource", &creds.resource_manager_endpoint_url)
            .finish();

        debug!(url = %url, client_id = %creds.client_id, "Requesting Azure access token");

        let response = self
            .http
            .post(url.clone())
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(form)
            .send()
            .await
            .map_err(|e| AzureError::Transport {
                url: url.to_string(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| AzureError::Authentication(e.to_string()))?;
        if !status.is_success() {
            error!(status = %status, "Azure token request failed");
            return Err(AzureError::Authentication(format!("HTTP {status}: {text}")));
        }

        let parsed: TokenResponse =
            serde_json::from_str(&text).map_err(|e| AzureError::Authentication(e.to_string()))?;
        let lifetime = parsed
            .expires_in
            .as_ref()
            .and_then(|v| v.as_i64().or_else(|| v.as_str().and_then(|s| s.parse().ok())))
            .unwrap_or(DEFAULT_TOKEN_LIFETIME_SECS);

        Ok(AccessToken {
            value: parsed.access_token,
            expires_at: Utc::now() + ChronoDuration::seconds(lifetime),
        })
    }

    /// Execute an ARM request, retrying rate limiting and server errors.
    ///
    /// # Retry Behavior
    /// - Retries on HTTP 429, 500, 502, 503, 504 and transport failures
    /// - Fails immediately on other 4xx errors
    /// - Max 2 minutes total retry time
    ///
    /// # Errors
    ///
    /// Returns the last error once it is not retryable or the backoff is exhausted.
    pub async fn send(
        &self,
        method: Method,
        url: &Url,
        body: Option<&serde_json::Value>,
    ) -> Result<ArmResponse, AzureError> {
        let mut backoff = http_backoff();
        let start_time = Instant::now();
        let mut attempt = 0;

        loop {
            attempt += 1;

            match self.send_once(method.clone(), url, body).await {
                Ok(response) => {
                    if attempt > 1 {
                        debug!(
                            method = %method,
                            url = %url,
                            attempt = attempt,
                            elapsed = ?start_time.elapsed(),
                            "Azure API call succeeded after retries"
                        );
                    }
                    return Ok(response);
                }
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => match backoff.next_backoff() {
                    Some(duration) => {
                        warn!(
                            method = %method,
                            url = %url,
                            attempt = attempt,
                            retry_after = ?duration,
                            error = %e,
                            "Retryable Azure API error, will retry"
                        );
                        tokio::time::sleep(duration).await;
                    }
                    None => {
                        error!(
                            method = %method,
                            url = %url,
                            attempt = attempt,
                            elapsed = ?start_time.elapsed(),
                            error = %e,
                            "Backoff exhausted, giving up"
                        );
                        return Err(e);
                    }
                },
            }
        }
    }

    async fn send_once(
        &self,
        method: Method,
        url: &Url,
        body: Option<&serde_json::Value>,
    ) -> Result<ArmResponse, AzureError> {
        let token = self.access_token().await?;

        debug!(method = %method, url = %url, "Azure API request");

        let mut request = self
            .http
            .request(method.clone(), url.clone())
            .header(AUTHORIZATION, format!("Bearer {token}"));
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(|e| AzureError::Transport {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

        let status = response.status();
        let headers = response.headers().clone();
        let text = response.text().await.map_err(|e| AzureError::Transport {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

        if !status.is_success() {
            let detail = serde_json::from_str::<ArmErrorBody>(&text)
                .ok()
                .and_then(|b| b.error);
            let (code, message) = match detail {
                Some(d) => (d.code, d.message),
                None => (status.canonical_reason().unwrap_or("Unknown").to_string(), text),
            };
            debug!(
                method = %method,
                url = %url,
                status = %status,
                code = %code,
                "Azure API request failed"
            );
            return Err(AzureError::Api {
                status: status.as_u16(),
                code,
                message,
            });
        }

        Ok(ArmResponse {
            status,
            headers,
            body: text,
        })
    }
}
