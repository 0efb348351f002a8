// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for operator-core.

use operator_work::StepError;
use thiserror::Error;

/// Operator core errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Configuration loading failed.
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// The discovered topology is inconsistent.
    #[error("Topology error: {0}")]
    Topology(#[from] crate::topology::TopologyError),

    /// A reconciliation fiber failed.
    #[error("Step error: {0}")]
    Step(#[from] StepError),

    /// A newer cycle for the same domain cancelled this one.
    #[error("Reconciliation of domain '{0}' was superseded")]
    Superseded(String),
}

impl Error {
    /// Whether the control loop should re-queue the domain for a later cycle.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Step(err) if !err.is_cancelled())
    }
}

/// Result type using operator core Error.
pub type Result<T> = std::result::Result<T, Error>;
