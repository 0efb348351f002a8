// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Keyed gate allowing at most one active fiber per key.
//!
//! The operator keys fibers by domain UID: a new reconciliation cycle for a
//! domain either supersedes the cycle already running for it
//! ([`FiberGate::start_fiber`]) or is skipped while one is active
//! ([`FiberGate::start_fiber_if_no_current_fiber`]).

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info};

use crate::engine::Engine;
use crate::fiber::{FiberHandle, FiberOutcome};
use crate::packet::Packet;
use crate::step::StepRef;

/// Registry of the current fiber for each key.
pub struct FiberGate<C> {
    engine: Engine,
    fibers: Arc<Mutex<HashMap<String, FiberHandle<C>>>>,
}

impl<C> Clone for FiberGate<C> {
    fn clone(&self) -> Self {
        Self {
            engine: self.engine.clone(),
            fibers: self.fibers.clone(),
        }
    }
}

impl<C: Send + 'static> FiberGate<C> {
    /// Create an empty gate whose fibers run on `engine`.
    pub fn new(engine: Engine) -> Self {
        Self {
            engine,
            fibers: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, FiberHandle<C>>> {
        self.fibers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start a fiber for `key`, cancelling the fiber currently registered for it.
    pub fn start_fiber<F>(
        &self,
        key: &str,
        step: StepRef<C>,
        packet: Packet<C>,
        on_done: F,
    ) -> FiberHandle<C>
    where
        F: FnOnce(FiberOutcome<C>) + Send + 'static,
    {
        let fiber = self.engine.create_fiber();
        let handle = fiber.handle();
        let previous = self.lock().insert(key.to_string(), handle.clone());

        // Cancel outside the lock: the superseded fiber's callback takes it.
        if let Some(previous) = previous {
            if previous.cancel() {
                info!(key, superseded = %previous.id(), by = %handle.id(), "Superseded running fiber");
            }
        }

        fiber.start(step, packet, self.deregister_on_done(key, &handle, on_done))
    }

    /// Start a fiber for `key` unless one is already active.
    ///
    /// Returns `None` when the current fiber for `key` has not finished.
    pub fn start_fiber_if_no_current_fiber<F>(
        &self,
        key: &str,
        step: StepRef<C>,
        packet: Packet<C>,
        on_done: F,
    ) -> Option<FiberHandle<C>>
    where
        F: FnOnce(FiberOutcome<C>) + Send + 'static,
    {
        let fiber = self.engine.create_fiber();
        let handle = fiber.handle();
        {
            let mut fibers = self.lock();
            if let Some(current) = fibers.get(key) {
                if !current.is_done() {
                    debug!(key, current = %current.id(), "Fiber already active; not starting");
                    return None;
                }
            }
            fibers.insert(key.to_string(), handle.clone());
        }

        Some(fiber.start(step, packet, self.deregister_on_done(key, &handle, on_done)))
    }

    /// The fiber currently registered for `key`, if any.
    pub fn current_fiber(&self, key: &str) -> Option<FiberHandle<C>> {
        self.lock().get(key).cloned()
    }

    /// Number of keys with a registered fiber.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether no fiber is registered.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn deregister_on_done<F>(
        &self,
        key: &str,
        handle: &FiberHandle<C>,
        on_done: F,
    ) -> impl FnOnce(FiberOutcome<C>) + Send + 'static
    where
        F: FnOnce(FiberOutcome<C>) + Send + 'static,
    {
        let fibers = self.fibers.clone();
        let key = key.to_string();
        let id = handle.id();
        move |outcome| {
            {
                let mut fibers = fibers.lock().unwrap_or_else(PoisonError::into_inner);
                if fibers.get(&key).is_some_and(|current| current.id() == id) {
                    fibers.remove(&key);
                }
            }
            on_done(outcome);
        }
    }
}

impl<C> fmt::Debug for FiberGate<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FiberGate").finish_non_exhaustive()
    }
}
