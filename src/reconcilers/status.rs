// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Status condition helpers for managed Azure resources.
//!
//! Each resource carries one `Ready` condition describing the external
//! resource and one `Synced` condition describing the last reconcile pass.
//! Setting a condition replaces the existing condition of the same type.
//!
//! # Example
//!
//! ```rust
//! use stack_azure::reconcilers::status::{creating, reconcile_success, set_condition};
//!
//! let mut conditions = Vec::new();
//! set_condition(&mut conditions, creating());
//! set_condition(&mut conditions, reconcile_success());
//! assert_eq!(conditions.len(), 2);
//! ```

use crate::crd::Condition;
use crate::status_reasons::{
    CONDITION_TYPE_READY, CONDITION_TYPE_SYNCED, MESSAGE_AVAILABLE, MESSAGE_CREATING,
    MESSAGE_DELETING, MESSAGE_RECONCILE_SUCCESS, MESSAGE_UNAVAILABLE, REASON_AVAILABLE,
    REASON_CREATING, REASON_DELETING, REASON_RECONCILE_ERROR, REASON_RECONCILE_SUCCESS,
    REASON_UNAVAILABLE, STATUS_FALSE, STATUS_TRUE,
};
use chrono::Utc;
use std::fmt::Display;

/// Create a new Kubernetes condition with the current timestamp.
///
/// # Arguments
///
/// * `condition_type` - The type of condition (`Ready` or `Synced`)
/// * `status` - The status: "True", "False", or "Unknown"
/// * `reason` - A programmatic identifier in `CamelCase`
/// * `message` - A human-readable explanation
#[must_use]
pub fn create_condition(
    condition_type: &str,
    status: &str,
    reason: &str,
    message: &str,
) -> Condition {
    Condition {
        r#type: condition_type.to_string(),
        status: status.to_string(),
        reason: Some(reason.to_string()),
        message: Some(message.to_string()),
        last_transition_time: Some(Utc::now().to_rfc3339()),
    }
}

/// The external resource is being created.
#[must_use]
pub fn creating() -> Condition {
    create_condition(CONDITION_TYPE_READY, STATUS_FALSE, REASON_CREATING, MESSAGE_CREATING)
}

/// The external resource is ready for use.
#[must_use]
pub fn available() -> Condition {
    create_condition(CONDITION_TYPE_READY, STATUS_TRUE, REASON_AVAILABLE, MESSAGE_AVAILABLE)
}

/// The external resource is being deleted.
#[must_use]
pub fn deleting() -> Condition {
    create_condition(CONDITION_TYPE_READY, STATUS_FALSE, REASON_DELETING, MESSAGE_DELETING)
}

/// The external resource exists but is not usable.
#[must_use]
pub fn unavailable() -> Condition {
    create_condition(
        CONDITION_TYPE_READY,
        STATUS_FALSE,
        REASON_UNAVAILABLE,
        MESSAGE_UNAVAILABLE,
    )
}

/// The reconcile pass succeeded.
#[must_use]
pub fn reconcile_success() -> Condition {
    create_condition(
        CONDITION_TYPE_SYNCED,
        STATUS_TRUE,
        REASON_RECONCILE_SUCCESS,
        MESSAGE_RECONCILE_SUCCESS,
    )
}

/// The reconcile pass failed with `err`.
#[must_use]
pub fn reconcile_error(err: &dyn Display) -> Condition {
    create_condition(
        CONDITION_TYPE_SYNCED,
        STATUS_FALSE,
        REASON_RECONCILE_ERROR,
        &err.to_string(),
    )
}

/// Find a condition by type in a list of conditions.
#[must_use]
pub fn find_condition<'a>(
    conditions: &'a [Condition],
    condition_type: &str,
) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.r#type == condition_type)
}

/// Set a condition in a conditions list (in-memory, no API call).
///
/// Replaces the condition of the same type, or appends it. The existing
/// `lastTransitionTime` is kept when the status value does not change.
pub fn set_condition(conditions: &mut Vec<Condition>, condition: Condition) {
    if let Some(existing) = conditions
        .iter_mut()
        .find(|c| c.r#type == condition.r#type)
    {
        let last_transition_time = if existing.status == condition.status {
            existing
                .last_transition_time
                .clone()
                .or(condition.last_transition_time)
        } else {
            condition.last_transition_time
        };

        existing.status = condition.status;
        existing.reason = condition.reason;
        existing.message = condition.message;
        existing.last_transition_time = last_transition_time;
    } else {
        conditions.push(condition);
    }
}

#[cfg(test)]
#[path = "status_tests.rs"]
mod status_tests;
