// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Operator Work - Fiber/Step Execution Engine
//!
//! Reconciliation logic is written as chains of [`Step`]s. A fiber runs a
//! chain step by step; any step may suspend the fiber while an asynchronous
//! operation (an API call, a set of child fibers) is in flight, and the
//! operation resumes it through a [`Resumer`]. No thread is blocked while a
//! fiber waits.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  create/start   ┌──────────────┐  execute   ┌──────────────┐
//! │    Engine    │────────────────►│    Fiber     │───────────►│   Executor   │
//! │ (cloneable)  │                 │ (state, tok) │            │ tokio/inline │
//! └──────────────┘                 └──────────────┘            └──────────────┘
//!        ▲                             │      ▲
//!        │ create_child_fiber          │ run  │ resume / fail
//!        │                             ▼      │
//!  ┌──────────────┐               ┌──────────────┐
//!  │  FiberGate   │               │ Step chain   │──Suspend──► async operation
//!  │ one per key  │               │ (Disposition)│
//!  └──────────────┘               └──────────────┘
//! ```
//!
//! # Step Dispositions
//!
//! | Disposition | Effect |
//! |-------------|--------|
//! | `Continue(step)` | Run `step` next, synchronously |
//! | `Suspend(suspension)` | Park the packet, hand a `Resumer` to the operation |
//! | `Done` | Complete the fiber with its packet |
//! | `Failed(error)` | Fail the fiber; nothing else runs |
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use operator_work::{Disposition, Engine, FiberOutcome, FnStep, Packet, StepRef};
//!
//! let engine = Engine::inline();
//! let step: StepRef<u32> = Arc::new(FnStep::new("increment", |packet: &mut Packet<u32>| -> Disposition<u32> {
//!     *packet.context_mut() += 1;
//!     Disposition::Done
//! }));
//!
//! engine.start(step, Packet::new(41), |outcome| {
//!     if let FiberOutcome::Completed(packet) = outcome {
//!         assert_eq!(*packet.context(), 42);
//!     }
//! });
//! ```

pub mod engine;
pub mod error;
pub mod executor;
pub mod fiber;
pub mod gate;
pub mod packet;
pub mod step;

pub use engine::Engine;
pub use error::{Result, StepError};
pub use executor::{Executor, InlineExecutor, Task, TokioExecutor};
pub use fiber::{Fiber, FiberHandle, FiberOutcome, FiberStatus, Resumer};
pub use gate::FiberGate;
pub use packet::Packet;
pub use step::{Disposition, FnStep, Step, StepRef, Suspension, TerminalStep, same_step};
