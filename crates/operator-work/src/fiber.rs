// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Fibers: one execution of a step chain.
//!
//! A fiber runs steps synchronously for as long as they return
//! [`Disposition::Continue`]. When a step suspends, the fiber parks its packet
//! and hands a [`Resumer`] to the asynchronous operation; the first call on
//! that resumer schedules the rest of the chain on the engine's executor.
//!
//! ```text
//!   Created ──start──► Running ──Suspend──► Suspended
//!                        │  ▲                  │
//!                        │  └──── resume ──────┘
//!                        │
//!          ┌─────────────┼──────────────┐
//!          ▼             ▼              ▼
//!      Completed       Failed       Cancelled
//! ```

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};
use uuid::Uuid;

use crate::engine::Engine;
use crate::error::StepError;
use crate::packet::Packet;
use crate::step::{Disposition, StepRef, Suspension};

/// Lifecycle state of a fiber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FiberStatus {
    /// Created but not started.
    Created,
    /// Executing steps, or scheduled to.
    Running,
    /// Parked waiting for a resume.
    Suspended,
    /// The chain finished.
    Completed,
    /// A step failed.
    Failed,
    /// Cancelled by its owner.
    Cancelled,
}

impl FiberStatus {
    /// Whether the fiber has finished.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            FiberStatus::Completed | FiberStatus::Failed | FiberStatus::Cancelled
        )
    }
}

/// Final result delivered to a fiber's completion callback.
pub enum FiberOutcome<C> {
    /// The chain ran to its end; the final packet is returned.
    Completed(Packet<C>),
    /// A step failed.
    Failed(StepError),
    /// The fiber was cancelled before it finished.
    Cancelled,
}

impl<C> fmt::Debug for FiberOutcome<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FiberOutcome::Completed(_) => f.write_str("Completed"),
            FiberOutcome::Failed(err) => f.debug_tuple("Failed").field(err).finish(),
            FiberOutcome::Cancelled => f.write_str("Cancelled"),
        }
    }
}

type Callback<C> = Box<dyn FnOnce(FiberOutcome<C>) + Send>;

struct Parked<C> {
    step: String,
    next: Option<StepRef<C>>,
    packet: Packet<C>,
    claim: Arc<AtomicBool>,
}

struct State<C> {
    status: FiberStatus,
    parked: Option<Parked<C>>,
    callback: Option<Callback<C>>,
}

pub(crate) struct FiberInner<C> {
    id: Uuid,
    engine: Engine,
    token: CancellationToken,
    created_at: DateTime<Utc>,
    state: Mutex<State<C>>,
}

impl<C: Send + 'static> FiberInner<C> {
    pub(crate) fn new(engine: Engine, token: CancellationToken) -> Self {
        Self {
            id: Uuid::new_v4(),
            engine,
            token,
            created_at: Utc::now(),
            state: Mutex::new(State {
                status: FiberStatus::Created,
                parked: None,
                callback: None,
            }),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, State<C>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The execution loop.
    fn drive(self: &Arc<Self>, mut next: Option<StepRef<C>>, mut packet: Packet<C>) {
        let span = tracing::debug_span!("fiber", fiber_id = %self.id);
        let _enter = span.enter();

        loop {
            if self.token.is_cancelled() {
                self.finish(FiberOutcome::Cancelled);
                return;
            }

            let Some(step) = next.take() else {
                self.finish(FiberOutcome::Completed(packet));
                return;
            };

            trace!(step = step.name(), "Running step");
            let disposition = match panic::catch_unwind(AssertUnwindSafe(|| step.run(&mut packet)))
            {
                Ok(disposition) => disposition,
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    error!(step = step.name(), panic = %message, "Step panicked");
                    Disposition::Failed(StepError::Panicked {
                        step: step.name().to_string(),
                        message,
                    })
                }
            };

            match disposition {
                Disposition::Continue(following) => next = Some(following),
                Disposition::Done => {
                    self.finish(FiberOutcome::Completed(packet));
                    return;
                }
                Disposition::Failed(err) => {
                    warn!(step = step.name(), error = %err, "Step failed");
                    self.finish(FiberOutcome::Failed(err));
                    return;
                }
                Disposition::Suspend(suspension) => {
                    trace!(step = step.name(), "Suspending");
                    self.park(step.name(), suspension, packet);
                    return;
                }
            }
        }
    }

    fn park(self: &Arc<Self>, step: &str, suspension: Suspension<C>, packet: Packet<C>) {
        let Suspension { next, start } = suspension;
        let claim = Arc::new(AtomicBool::new(false));
        {
            let mut state = self.lock_state();
            state.status = FiberStatus::Suspended;
            state.parked = Some(Parked {
                step: step.to_string(),
                next,
                packet,
                claim: claim.clone(),
            });
        }

        // A cancel that landed before the packet was parked found nothing to
        // release; release it here.
        if self.token.is_cancelled() && self.release_parked().is_some() {
            self.finish(FiberOutcome::Cancelled);
            return;
        }

        let resumer = Resumer {
            fiber: self.clone(),
            claim: claim.clone(),
        };
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| start(resumer))) {
            let message = panic_message(payload.as_ref());
            error!(step, panic = %message, "Suspended operation panicked while starting");
            // Already resumed or cancelled: whoever claimed the packet finishes the fiber.
            if self.release_claimed(&claim) {
                self.finish(FiberOutcome::Failed(StepError::Panicked {
                    step: step.to_string(),
                    message,
                }));
            }
        }
    }

    /// Release the packet parked under `claim`, if it is still parked.
    fn release_claimed(&self, claim: &Arc<AtomicBool>) -> bool {
        if claim
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        let mut state = self.lock_state();
        match &state.parked {
            Some(parked) if Arc::ptr_eq(&parked.claim, claim) => {
                state.parked = None;
                state.status = FiberStatus::Running;
                true
            }
            _ => false,
        }
    }

    fn release_parked(&self) -> Option<Parked<C>> {
        let mut state = self.lock_state();
        let parked = state.parked.take();
        if parked.is_some() {
            state.status = FiberStatus::Running;
        }
        parked
    }

    fn finish(&self, outcome: FiberOutcome<C>) {
        let callback = {
            let mut state = self.lock_state();
            if state.status.is_terminal() {
                return;
            }
            state.status = match &outcome {
                FiberOutcome::Completed(_) => FiberStatus::Completed,
                FiberOutcome::Failed(_) => FiberStatus::Failed,
                FiberOutcome::Cancelled => FiberStatus::Cancelled,
            };
            state.parked = None;
            state.callback.take()
        };

        let elapsed_ms = (Utc::now() - self.created_at).num_milliseconds();
        debug!(fiber_id = %self.id, outcome = ?outcome, elapsed_ms, "Fiber finished");

        if let Some(callback) = callback {
            callback(outcome);
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// A fiber that has been created but not started.
///
/// Take a [`handle`](Fiber::handle) before starting when the owner needs to
/// track the fiber before its first step runs.
pub struct Fiber<C> {
    inner: Arc<FiberInner<C>>,
}

impl<C: Send + 'static> Fiber<C> {
    pub(crate) fn new(engine: Engine, token: CancellationToken) -> Self {
        Self {
            inner: Arc::new(FiberInner::new(engine, token)),
        }
    }

    /// A handle to this fiber.
    pub fn handle(&self) -> FiberHandle<C> {
        FiberHandle {
            inner: self.inner.clone(),
        }
    }

    /// Start executing `step` on the engine's executor.
    ///
    /// `on_done` is called exactly once with the fiber's outcome.
    pub fn start<F>(self, step: StepRef<C>, packet: Packet<C>, on_done: F) -> FiberHandle<C>
    where
        F: FnOnce(FiberOutcome<C>) + Send + 'static,
    {
        {
            let mut state = self.inner.lock_state();
            state.status = FiberStatus::Running;
            state.callback = Some(Box::new(on_done));
        }
        debug!(fiber_id = %self.inner.id, step = step.name(), "Starting fiber");

        let handle = self.handle();
        let inner = self.inner;
        let engine = inner.engine.clone();
        engine.execute(move || inner.drive(Some(step), packet));
        handle
    }
}

/// Shared handle to a started (or about to be started) fiber.
pub struct FiberHandle<C> {
    inner: Arc<FiberInner<C>>,
}

impl<C> Clone for FiberHandle<C> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<C: Send + 'static> FiberHandle<C> {
    /// Unique fiber identifier.
    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    /// When the fiber was created.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.inner.created_at
    }

    /// Current status.
    pub fn status(&self) -> FiberStatus {
        self.inner.lock_state().status
    }

    /// Whether the fiber has finished.
    pub fn is_done(&self) -> bool {
        self.status().is_terminal()
    }

    /// The fiber's cancellation token.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.inner.token.clone()
    }

    /// Cancel the fiber.
    ///
    /// A suspended fiber finishes as cancelled immediately; a running fiber
    /// stops before its next step. Any pending resume becomes a no-op, and
    /// child fibers created from this fiber's token are cancelled too.
    /// Returns `false` if the fiber had already finished.
    pub fn cancel(&self) -> bool {
        if self.is_done() {
            return false;
        }
        self.inner.token.cancel();
        debug!(fiber_id = %self.inner.id, "Fiber cancellation requested");

        if self.inner.release_parked().is_some() {
            self.inner.finish(FiberOutcome::Cancelled);
        }
        true
    }
}

impl<C> fmt::Debug for FiberHandle<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FiberHandle")
            .field("id", &self.inner.id)
            .finish()
    }
}

/// Callback handed to a suspended step's asynchronous operation.
///
/// Clones share the same guard: whichever call arrives first for a given
/// suspension wins, every later call returns `false` and does nothing.
pub struct Resumer<C> {
    fiber: Arc<FiberInner<C>>,
    claim: Arc<AtomicBool>,
}

impl<C> Clone for Resumer<C> {
    fn clone(&self) -> Self {
        Self {
            fiber: self.fiber.clone(),
            claim: self.claim.clone(),
        }
    }
}

impl<C: Send + 'static> Resumer<C> {
    /// Id of the suspended fiber.
    pub fn fiber_id(&self) -> Uuid {
        self.fiber.id
    }

    /// The engine the fiber runs on, for spawning child fibers.
    pub fn engine(&self) -> &Engine {
        &self.fiber.engine
    }

    /// The suspended fiber's cancellation token.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.fiber.token.clone()
    }

    /// Resume the fiber with its packet unchanged.
    pub fn resume(&self) -> bool {
        self.resume_with(|_| {})
    }

    /// Resume the fiber after applying `update` to its packet.
    ///
    /// `update` runs on the executor, just before the next step.
    pub fn resume_with<F>(&self, update: F) -> bool
    where
        F: FnOnce(&mut Packet<C>) + Send + 'static,
    {
        let Some(Parked {
            step,
            next,
            mut packet,
            ..
        }) = self.claim_parked()
        else {
            return false;
        };

        let fiber = self.fiber.clone();
        self.fiber.engine.execute(move || {
            match panic::catch_unwind(AssertUnwindSafe(|| update(&mut packet))) {
                Ok(()) => fiber.drive(next, packet),
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    error!(fiber_id = %fiber.id, step = %step, panic = %message, "Resume update panicked");
                    fiber.finish(FiberOutcome::Failed(StepError::Panicked { step, message }));
                }
            }
        });
        true
    }

    /// Resume the fiber into failure.
    pub fn fail(&self, error: StepError) -> bool {
        if self.claim_parked().is_none() {
            return false;
        }

        warn!(fiber_id = %self.fiber.id, error = %error, "Suspended operation failed");
        let fiber = self.fiber.clone();
        self.fiber
            .engine
            .execute(move || fiber.finish(FiberOutcome::Failed(error)));
        true
    }

    fn claim_parked(&self) -> Option<Parked<C>> {
        if self
            .claim
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            trace!(fiber_id = %self.fiber.id, "Ignoring duplicate resume");
            return None;
        }

        let parked = {
            let mut state = self.fiber.lock_state();
            match &state.parked {
                Some(parked) if Arc::ptr_eq(&parked.claim, &self.claim) => {}
                _ => return None,
            }
            state.status = FiberStatus::Running;
            state.parked.take()
        };

        // The owner cancelled (possibly through a parent) while the operation
        // was in flight: the packet is released but no further step runs.
        if self.fiber.token.is_cancelled() {
            trace!(fiber_id = %self.fiber.id, "Ignoring resume of cancelled fiber");
            self.fiber.finish(FiberOutcome::Cancelled);
            return None;
        }
        parked
    }
}

impl<C> fmt::Debug for Resumer<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resumer")
            .field("fiber_id", &self.fiber.id)
            .field("claimed", &self.claim.load(Ordering::Acquire))
            .finish()
    }
}
