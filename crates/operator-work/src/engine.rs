// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The engine: creates fibers and owns the executor they run on.

use std::fmt;
use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::error::{Result, StepError};
use crate::executor::{Executor, InlineExecutor, TokioExecutor};
use crate::fiber::{Fiber, FiberHandle, FiberOutcome};
use crate::packet::Packet;
use crate::step::StepRef;

/// Cheaply cloneable entry point for running step chains.
///
/// The engine holds no per-fiber state and can drive any number of
/// independent fibers concurrently.
#[derive(Clone)]
pub struct Engine {
    executor: Arc<dyn Executor>,
}

impl Engine {
    /// Engine running fibers on the given executor.
    pub fn new(executor: Arc<dyn Executor>) -> Self {
        Self { executor }
    }

    /// Engine spawning fiber work onto a tokio runtime.
    pub fn with_handle(handle: Handle) -> Self {
        Self::new(Arc::new(TokioExecutor::new(handle)))
    }

    /// Engine spawning onto the runtime of the calling task.
    ///
    /// # Panics
    ///
    /// Panics when called outside of a tokio runtime.
    pub fn current() -> Self {
        Self::new(Arc::new(TokioExecutor::current()))
    }

    /// Engine running fiber work on the calling thread.
    pub fn inline() -> Self {
        Self::new(Arc::new(InlineExecutor))
    }

    /// Submit a task to the executor.
    pub fn execute<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.executor.execute(Box::new(task));
    }

    /// Create an unstarted fiber with its own cancellation token.
    pub fn create_fiber<C: Send + 'static>(&self) -> Fiber<C> {
        Fiber::new(self.clone(), CancellationToken::new())
    }

    /// Create an unstarted fiber cancelled together with `parent`.
    pub fn create_child_fiber<C: Send + 'static>(&self, parent: &CancellationToken) -> Fiber<C> {
        Fiber::new(self.clone(), parent.child_token())
    }

    /// Create and start a fiber.
    pub fn start<C, F>(&self, step: StepRef<C>, packet: Packet<C>, on_done: F) -> FiberHandle<C>
    where
        C: Send + 'static,
        F: FnOnce(FiberOutcome<C>) + Send + 'static,
    {
        self.create_fiber().start(step, packet, on_done)
    }

    /// Run a chain to completion and return its final packet.
    pub async fn run<C: Send + 'static>(
        &self,
        step: StepRef<C>,
        packet: Packet<C>,
    ) -> Result<Packet<C>> {
        let (tx, rx) = oneshot::channel();
        self.start(step, packet, move |outcome| {
            let _ = tx.send(outcome);
        });

        match rx.await {
            Ok(FiberOutcome::Completed(packet)) => Ok(packet),
            Ok(FiberOutcome::Failed(err)) => Err(err),
            Ok(FiberOutcome::Cancelled) => Err(StepError::Cancelled),
            // The callback was dropped with the fiber: nobody kept a resumer.
            Err(_) => Err(StepError::Abandoned),
        }
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("executor", &"...")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::{Disposition, FnStep};
    use std::sync::Mutex;

    #[tokio::test]
    async fn test_run_returns_final_packet() {
        let engine = Engine::current();
        let step: StepRef<u32> = Arc::new(FnStep::new("double", |packet: &mut Packet<u32>| -> Disposition<u32> {
            *packet.context_mut() *= 2;
            Disposition::Done
        }));

        let packet = engine.run(step, Packet::new(21)).await.unwrap();
        assert_eq!(packet.into_context(), 42);
    }

    #[tokio::test]
    async fn test_run_reports_abandoned_suspension() {
        let engine = Engine::current();
        let step: StepRef<()> = Arc::new(FnStep::new("drop-resumer", |_: &mut Packet<()>| -> Disposition<()> {
            Disposition::suspend(None, |resumer| drop(resumer))
        }));

        let err = engine.run(step, Packet::new(())).await.unwrap_err();
        assert!(matches!(err, StepError::Abandoned), "{:?}", err);
    }

    #[test]
    fn test_child_fiber_cancelled_with_parent() {
        let engine = Engine::inline();
        let parent = CancellationToken::new();
        let child: Fiber<()> = engine.create_child_fiber(&parent);
        let handle = child.handle();

        parent.cancel();
        assert!(handle.cancellation_token().is_cancelled());

        let outcome = Arc::new(Mutex::new(None));
        let sink = outcome.clone();
        let step: StepRef<()> = Arc::new(crate::step::TerminalStep);
        child.start(step, Packet::new(()), move |o| {
            *sink.lock().unwrap() = Some(format!("{:?}", o));
        });
        assert_eq!(outcome.lock().unwrap().as_deref(), Some("Cancelled"));
    }
}
