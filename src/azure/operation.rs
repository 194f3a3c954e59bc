// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Long-running ARM operations.
//!
//! A `PUT` that ARM cannot finish synchronously answers with a polling hint,
//! either an `Azure-AsyncOperation` header, a `Location` header, or just a
//! `provisioningState` on the resource itself. [`begin_token`] captures that
//! hint as an opaque byte token which the caller persists; [`poll`] later
//! resolves it into an [`OperationState`].

use super::{ArmClient, ArmResponse, AzureError};
use reqwest::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

const HEADER_ASYNC_OPERATION: &str = "azure-asyncoperation";
const HEADER_LOCATION: &str = "location";

/// Result of polling a long-running operation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OperationState {
    /// Azure is still working on it.
    InProgress,
    /// The operation completed successfully.
    Succeeded,
    /// The operation completed with an error.
    Failed(String),
}

impl OperationState {
    #[must_use]
    pub fn is_done(&self) -> bool {
        !matches!(self, Self::InProgress)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
enum PollStrategy {
    AsyncOperation,
    Location,
    ProvisioningState,
    Done,
}

/// What is persisted inside an operation token.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PollingState {
    strategy: PollStrategy,
    url: String,
}

#[derive(Deserialize)]
struct AsyncOperationBody {
    #[serde(default)]
    status: String,
    #[serde(default)]
    error: Option<OperationError>,
}

#[derive(Deserialize)]
struct OperationError {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProvisionedResource {
    #[serde(default)]
    properties: Option<ProvisionedProperties>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProvisionedProperties {
    #[serde(default)]
    provisioning_state: Option<String>,
}

fn state_from_status(status: &str, error: Option<OperationError>) -> OperationState {
    match status {
        "Succeeded" => OperationState::Succeeded,
        "Failed" | "Canceled" => OperationState::Failed(match error {
            Some(e) if !e.message.is_empty() => format!("{}: {}", e.code, e.message),
            _ => format!("operation {}", status.to_lowercase()),
        }),
        _ => OperationState::InProgress,
    }
}

fn provisioning_state(body: &str) -> Option<String> {
    serde_json::from_str::<ProvisionedResource>(body)
        .ok()
        .and_then(|r| r.properties)
        .and_then(|p| p.provisioning_state)
}

/// Capture the polling hint of a begun operation as an opaque token.
///
/// # Errors
///
/// Returns an error if the polling state cannot be encoded.
pub fn begin_token(response: &ArmResponse, resource_url: &Url) -> Result<Vec<u8>, AzureError> {
    let state = if let Some(url) = response.header(HEADER_ASYNC_OPERATION) {
        PollingState {
            strategy: PollStrategy::AsyncOperation,
            url: url.to_string(),
        }
    } else if let Some(url) = response.header(HEADER_LOCATION) {
        PollingState {
            strategy: PollStrategy::Location,
            url: url.to_string(),
        }
    } else if provisioning_state(&response.body).as_deref() == Some("Succeeded")
        || (response.status == StatusCode::OK && provisioning_state(&response.body).is_none())
    {
        PollingState {
            strategy: PollStrategy::Done,
            url: resource_url.to_string(),
        }
    } else {
        PollingState {
            strategy: PollStrategy::ProvisioningState,
            url: resource_url.to_string(),
        }
    };

    debug!(strategy = ?state.strategy, url = %state.url, "Captured long-running operation");
    serde_json::to_vec(&state).map_err(|e| AzureError::InvalidToken(e.to_string()))
}

/// Resolve an operation token.
///
/// An `Err` means the poll itself failed and says nothing about the operation;
/// the caller keeps the token and polls again later.
///
/// # Errors
///
/// Returns an error if the token is malformed or Azure cannot be reached.
pub async fn poll(client: &ArmClient, token: &[u8]) -> Result<OperationState, AzureError> {
    let state: PollingState =
        serde_json::from_slice(token).map_err(|e| AzureError::InvalidToken(e.to_string()))?;
    let url = Url::parse(&state.url).map_err(|e| AzureError::InvalidToken(e.to_string()))?;

    match state.strategy {
        PollStrategy::Done => Ok(OperationState::Succeeded),
        PollStrategy::AsyncOperation => {
            let response = client.send(Method::GET, &url, None).await?;
            let body: AsyncOperationBody = response.json()?;
            Ok(state_from_status(&body.status, body.error))
        }
        PollStrategy::Location => match client.send(Method::GET, &url, None).await {
            Ok(response) if response.status == StatusCode::ACCEPTED => {
                Ok(OperationState::InProgress)
            }
            Ok(_) => Ok(OperationState::Succeeded),
            // A final 4xx from the location URL is the operation's own result.
            Err(AzureError::Api {
                status,
                code,
                message,
            }) if (400..500).contains(&status) && status != 429 => {
                Ok(OperationState::Failed(format!("{code}: {message}")))
            }
            Err(e) => Err(e),
        },
        PollStrategy::ProvisioningState => {
            let response = client.send(Method::GET, &url, None).await?;
            let status = provisioning_state(&response.body).unwrap_or_default();
            Ok(state_from_status(&status, None))
        }
    }
}

#[cfg(test)]
#[path = "operation_tests.rs"]
mod operation_tests;
