// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! One reconciliation cycle per domain.
//!
//! The [`Reconciler`] starts the startup policy step for a domain on a
//! [`FiberGate`] keyed by domain UID, so a new cycle for a domain always
//! supersedes the one still running for it.

use std::sync::Arc;

use operator_work::{Engine, FiberGate, FiberHandle, FiberOutcome, Packet};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::presence::PresenceState;
use crate::steps::{DomainContext, DomainStep, ManagedServersUpStep, NextStepFactory};

/// Drives reconciliation cycles.
#[derive(Clone)]
pub struct Reconciler {
    gate: FiberGate<DomainContext>,
    factory: Arc<dyn NextStepFactory>,
}

impl Reconciler {
    pub fn new(engine: Engine, factory: Arc<dyn NextStepFactory>) -> Self {
        Self {
            gate: FiberGate::new(engine),
            factory,
        }
    }

    /// Start a cycle for the domain, cancelling any cycle still running for it.
    ///
    /// `on_done` receives the cycle's outcome exactly once.
    pub fn make_right<F>(
        &self,
        presence: Arc<PresenceState>,
        next: Option<DomainStep>,
        on_done: F,
    ) -> FiberHandle<DomainContext>
    where
        F: FnOnce(FiberOutcome<DomainContext>) + Send + 'static,
    {
        let domain_uid = presence.domain_uid().to_string();
        let step: DomainStep = Arc::new(ManagedServersUpStep::new(self.factory.clone(), next));
        let handle = self
            .gate
            .start_fiber(&domain_uid, step, Packet::new(presence), on_done);
        debug!(domain_uid = %domain_uid, fiber_id = %handle.id(), "Started reconciliation cycle");
        handle
    }

    /// Run one cycle for the domain to completion.
    pub async fn reconcile(
        &self,
        presence: Arc<PresenceState>,
        next: Option<DomainStep>,
    ) -> Result<()> {
        let domain_uid = presence.domain_uid().to_string();
        let (tx, rx) = oneshot::channel();
        self.make_right(presence, next, move |outcome| {
            let _ = tx.send(outcome);
        });

        match rx.await {
            Ok(FiberOutcome::Completed(_)) => {
                info!(domain_uid = %domain_uid, "Reconciliation cycle completed");
                Ok(())
            }
            Ok(FiberOutcome::Failed(err)) => {
                warn!(domain_uid = %domain_uid, error = %err, "Reconciliation cycle failed");
                Err(Error::Step(err))
            }
            Ok(FiberOutcome::Cancelled) => {
                debug!(domain_uid = %domain_uid, "Reconciliation cycle superseded");
                Err(Error::Superseded(domain_uid))
            }
            Err(_) => Err(Error::Step(operator_work::StepError::Abandoned)),
        }
    }

    /// The cycle currently running for a domain, if any.
    pub fn current_cycle(&self, domain_uid: &str) -> Option<FiberHandle<DomainContext>> {
        self.gate.current_fiber(domain_uid)
    }
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("gate", &self.gate)
            .finish_non_exhaustive()
    }
}
