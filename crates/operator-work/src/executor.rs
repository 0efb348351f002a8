// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Execution contexts that fibers start and resume on.

use tokio::runtime::Handle;

/// A unit of work submitted to an executor.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Runs fiber tasks.
///
/// Fibers never block inside a task, so an executor only has to guarantee
/// that every submitted task eventually runs.
pub trait Executor: Send + Sync {
    /// Submit a task.
    fn execute(&self, task: Task);
}

/// Runs each task on the submitting thread, before `execute` returns.
///
/// Useful for tests and for chains made only of synchronous steps, where it
/// makes fiber execution fully deterministic.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineExecutor;

impl Executor for InlineExecutor {
    fn execute(&self, task: Task) {
        task();
    }
}

/// Spawns each task onto a tokio runtime.
#[derive(Debug, Clone)]
pub struct TokioExecutor {
    handle: Handle,
}

impl TokioExecutor {
    /// Executor spawning onto the given runtime.
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Executor spawning onto the runtime of the calling task.
    ///
    /// # Panics
    ///
    /// Panics when called outside of a tokio runtime.
    pub fn current() -> Self {
        Self::new(Handle::current())
    }
}

impl Executor for TokioExecutor {
    fn execute(&self, task: Task) {
        // Detached: completion is reported through the fiber's callback.
        drop(self.handle.spawn(async move { task() }));
    }
}
