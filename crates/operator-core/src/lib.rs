// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Operator Core - Domain Reconciliation
//!
//! Decides which managed servers of a clustered domain to start and fans the
//! decision out into one server workflow per server, on the
//! [`operator_work`] fiber engine.
//!
//! # Data Flow
//!
//! ```text
//! ┌──────────────────┐   ┌──────────────────┐
//! │ TopologySnapshot │   │ DesiredStateSpec │
//! │  (discovered)    │   │   (declared)     │
//! └────────┬─────────┘   └────────┬─────────┘
//!          └──────────┬───────────┘
//!                     ▼
//!            ┌─────────────────┐
//!            │  PresenceState  │  one per domain
//!            └────────┬────────┘
//!                     ▼
//!        ┌─────────────────────────┐
//!        │  ManagedServersUpStep   │  policy: startup set + metadata
//!        └────────────┬────────────┘
//!                     │ NextStepFactory
//!                     ▼
//!     ┌───────────────────────────────┐
//!     │ ManagedServerUpIteratorStep   │  sequential chain or child fibers
//!     └───────────────┬───────────────┘
//!                     ▼
//!          ServerLifecycle step per server, then the caller's next step
//! ```
//!
//! # Startup Control Modes
//!
//! | Mode | Managed servers started |
//! |------|-------------------------|
//! | `NONE`, `ADMIN` | none |
//! | `SPECIFIED` | explicitly listed servers and clusters |
//! | `AUTO` | listed ones, plus the first `replicas` members of other clusters |
//! | `ALL` | every managed server |
//!
//! Modes are case-insensitive. A missing or unrecognized mode behaves like
//! `ADMIN`.
//!
//! # Configuration
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `OPERATOR_FAN_OUT_STRATEGY` | `sequential` | `sequential` or `concurrent` |
//! | `OPERATOR_MAX_CONCURRENT_SERVER_STARTS` | `0` | In-flight limit for `concurrent` (0 = unlimited) |

pub mod config;
pub mod cycle;
pub mod desired;
pub mod error;
pub mod presence;
pub mod steps;
pub mod topology;

pub use config::{Config, ConfigError};
pub use cycle::Reconciler;
pub use desired::{
    ADMIN_STARTUP_MODE_FLAG, ADMIN_STATE, ClusterStartup, DesiredStateSpec, EnvVar, JAVA_OPTIONS,
    RUNNING_STATE, ServerStartup, StartupControl,
};
pub use error::{Error, Result};
pub use presence::{PresenceState, ServerObjects, ServerObjectsRegistry, ServerStartupInfo};
pub use steps::{
    DomainContext, DomainPacket, DomainStep, FanOutStrategy, ManagedServerUpIteratorStep,
    ManagedServersUpStep, NextStepFactory, SERVERS_UP_MSG, ServerLifecycle, ServerUpStepFactory,
    plan_server_startup,
};
pub use topology::{
    ClusterTopology, MachineTopology, ServerTopology, TopologyBuilder, TopologyError,
    TopologySnapshot,
};
