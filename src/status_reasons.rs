// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Standard status condition types and reasons for stack-azure resources.
//!
//! Every managed resource reports two conditions:
//!
//! - **`Ready`** tracks the lifecycle of the external Azure resource
//!   (`Creating`, `Available`, `Deleting`, `Unavailable`).
//! - **`Synced`** tracks the outcome of the most recent reconcile pass
//!   (`ReconcileSuccess`, `ReconcileError`).
//!
//! # Example Status
//!
//! ```yaml
//! status:
//!   conditions:
//!     - type: Ready
//!       status: "True"
//!       reason: Available
//!       message: "Resource is available for use"
//!     - type: Synced
//!       status: "True"
//!       reason: ReconcileSuccess
//!       message: "Successfully reconciled resource"
//! ```

// ============================================================================
// Condition Types
// ============================================================================

/// Condition type reporting whether the external resource is usable.
pub const CONDITION_TYPE_READY: &str = "Ready";

/// Condition type reporting whether the last reconcile pass succeeded.
pub const CONDITION_TYPE_SYNCED: &str = "Synced";

// ============================================================================
// Condition Status Values
// ============================================================================

pub const STATUS_TRUE: &str = "True";
pub const STATUS_FALSE: &str = "False";

// ============================================================================
// Ready Reasons
// ============================================================================

/// The external resource is being created.
pub const REASON_CREATING: &str = "Creating";

/// The external resource exists and is ready for use.
pub const REASON_AVAILABLE: &str = "Available";

/// The external resource is being deleted.
pub const REASON_DELETING: &str = "Deleting";

/// The external resource exists but cannot be used.
pub const REASON_UNAVAILABLE: &str = "Unavailable";

// ============================================================================
// Synced Reasons
// ============================================================================

/// The last reconcile pass completed without error.
pub const REASON_RECONCILE_SUCCESS: &str = "ReconcileSuccess";

/// The last reconcile pass hit an error. The message carries the error text.
pub const REASON_RECONCILE_ERROR: &str = "ReconcileError";

// ============================================================================
// Messages
// ============================================================================

pub const MESSAGE_CREATING: &str = "Resource is being created";
pub const MESSAGE_AVAILABLE: &str = "Resource is available for use";
pub const MESSAGE_DELETING: &str = "Resource is being deleted";
pub const MESSAGE_UNAVAILABLE: &str = "Resource is not available for use";
pub const MESSAGE_RECONCILE_SUCCESS: &str = "Successfully reconciled resource";
