// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Reconciliation steps run against a domain's presence state.

use std::sync::Arc;

use operator_work::{Packet, StepRef};

use crate::presence::PresenceState;

pub mod managed_servers_up;
pub mod server_up_iterator;

pub use managed_servers_up::{ManagedServersUpStep, SERVERS_UP_MSG, plan_server_startup};
pub use server_up_iterator::{
    FanOutStrategy, ManagedServerUpIteratorStep, NextStepFactory, ServerLifecycle,
    ServerUpStepFactory,
};

/// Context threaded through a domain's fibers.
pub type DomainContext = Arc<PresenceState>;

/// Packet of a domain fiber.
pub type DomainPacket = Packet<DomainContext>;

/// Step of a domain fiber.
pub type DomainStep = StepRef<DomainContext>;
