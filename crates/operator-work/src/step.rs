// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Steps and the dispositions they return to the fiber loop.

use std::fmt;
use std::sync::Arc;

use crate::error::StepError;
use crate::fiber::Resumer;
use crate::packet::Packet;

/// Shared reference to a step. Step identity is pointer identity.
pub type StepRef<C> = Arc<dyn Step<C>>;

/// A unit of work in a fiber's chain.
///
/// Steps hold their own continuation (usually an `Option<StepRef<C>>`
/// captured at construction) and tell the fiber where to go next through the
/// returned [`Disposition`]. A step is free to continue with a different
/// step than the one it was built with, which replaces the rest of the chain.
pub trait Step<C>: Send + Sync {
    /// Name used in logs and error reports.
    fn name(&self) -> &str;

    /// Do this step's work against the packet.
    fn run(&self, packet: &mut Packet<C>) -> Disposition<C>;
}

/// What a step asks the fiber to do next.
pub enum Disposition<C> {
    /// Run the given step immediately, without suspending.
    Continue(StepRef<C>),
    /// Park the fiber until an asynchronous operation resumes it.
    Suspend(Suspension<C>),
    /// The chain is finished.
    Done,
    /// Abort the fiber; no further steps run.
    Failed(StepError),
}

impl<C> Disposition<C> {
    /// Continue with `next`, or finish when the chain has ended.
    pub fn proceed(next: Option<StepRef<C>>) -> Self {
        match next {
            Some(step) => Disposition::Continue(step),
            None => Disposition::Done,
        }
    }

    /// Suspend, continuing with `next` once resumed.
    pub fn suspend<F>(next: Option<StepRef<C>>, start: F) -> Self
    where
        F: FnOnce(Resumer<C>) + Send + 'static,
    {
        Disposition::Suspend(Suspension::new(next, start))
    }
}

impl<C> fmt::Debug for Disposition<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Disposition::Continue(step) => f.debug_tuple("Continue").field(&step.name()).finish(),
            Disposition::Suspend(_) => f.write_str("Suspend"),
            Disposition::Done => f.write_str("Done"),
            Disposition::Failed(err) => f.debug_tuple("Failed").field(err).finish(),
        }
    }
}

/// A request to park the fiber.
///
/// The fiber parks its packet first and only then calls `start` with a
/// [`Resumer`], so the operation may resume the fiber before `start` returns.
pub struct Suspension<C> {
    pub(crate) next: Option<StepRef<C>>,
    pub(crate) start: Box<dyn FnOnce(Resumer<C>) + Send>,
}

impl<C> Suspension<C> {
    /// Create a suspension that continues with `next` once resumed.
    pub fn new<F>(next: Option<StepRef<C>>, start: F) -> Self
    where
        F: FnOnce(Resumer<C>) + Send + 'static,
    {
        Self {
            next,
            start: Box::new(start),
        }
    }
}

/// Step that ends the chain.
#[derive(Debug, Default, Clone, Copy)]
pub struct TerminalStep;

impl<C> Step<C> for TerminalStep {
    fn name(&self) -> &str {
        "Terminal"
    }

    fn run(&self, _packet: &mut Packet<C>) -> Disposition<C> {
        Disposition::Done
    }
}

/// Adapter turning a closure into a step.
pub struct FnStep<F> {
    name: String,
    f: F,
}

impl<F> FnStep<F> {
    /// Wrap `f` as a step called `name`.
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

impl<C, F> Step<C> for FnStep<F>
where
    F: Fn(&mut Packet<C>) -> Disposition<C> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self, packet: &mut Packet<C>) -> Disposition<C> {
        (self.f)(packet)
    }
}

/// Whether two optional step references point at the same step.
pub fn same_step<C>(a: Option<&StepRef<C>>, b: Option<&StepRef<C>>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => Arc::ptr_eq(a, b),
        (None, None) => true,
        _ => false,
    }
}
