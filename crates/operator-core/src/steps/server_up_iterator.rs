// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Fan out one server-up workflow per managed server.
//!
//! The policy step hands its server list to whatever step the injected
//! [`NextStepFactory`] builds. The production factory,
//! [`ServerUpStepFactory`], builds a [`ManagedServerUpIteratorStep`] that
//! asks the [`ServerLifecycle`] collaborator for each server's workflow and
//! runs them either as one chain or as concurrent child fibers.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use operator_work::{Disposition, FiberOutcome, Packet, Resumer, Step, StepError};
use tracing::{debug, info, warn};

use super::{DomainContext, DomainPacket, DomainStep};
use crate::config::Config;
use crate::presence::{PresenceState, ServerStartupInfo};

/// Builds the step that brings up a set of servers.
pub trait NextStepFactory: Send + Sync {
    /// Build a step starting `servers` and continuing with `next` once they
    /// are all up.
    fn create_server_step(
        &self,
        presence: &Arc<PresenceState>,
        servers: Vec<String>,
        next: Option<DomainStep>,
    ) -> DomainStep;
}

/// Per-server workflow provider (pod and service creation, readiness).
pub trait ServerLifecycle: Send + Sync {
    /// Build the chain bringing up one server, continuing with `next`.
    fn server_up_step(&self, info: &ServerStartupInfo, next: Option<DomainStep>) -> DomainStep;
}

/// How server workflows are driven.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FanOutStrategy {
    /// One chain in server order. A failure stops the chain.
    #[default]
    Sequential,
    /// One child fiber per server, at most `max_in_flight` at once
    /// (0 = unlimited). A failure stops queued servers from starting;
    /// servers already in flight run to completion.
    Concurrent { max_in_flight: usize },
}

impl fmt::Display for FanOutStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FanOutStrategy::Sequential => f.write_str("sequential"),
            FanOutStrategy::Concurrent { max_in_flight: 0 } => f.write_str("concurrent"),
            FanOutStrategy::Concurrent { max_in_flight } => {
                write!(f, "concurrent(max {})", max_in_flight)
            }
        }
    }
}

/// Factory producing [`ManagedServerUpIteratorStep`]s.
pub struct ServerUpStepFactory {
    lifecycle: Arc<dyn ServerLifecycle>,
    strategy: FanOutStrategy,
}

impl ServerUpStepFactory {
    pub fn new(lifecycle: Arc<dyn ServerLifecycle>, strategy: FanOutStrategy) -> Self {
        Self {
            lifecycle,
            strategy,
        }
    }

    /// Factory using the strategy selected by `config`.
    pub fn from_config(lifecycle: Arc<dyn ServerLifecycle>, config: &Config) -> Self {
        Self::new(lifecycle, config.fan_out_strategy())
    }

    pub fn strategy(&self) -> FanOutStrategy {
        self.strategy
    }
}

impl NextStepFactory for ServerUpStepFactory {
    fn create_server_step(
        &self,
        _presence: &Arc<PresenceState>,
        servers: Vec<String>,
        next: Option<DomainStep>,
    ) -> DomainStep {
        Arc::new(ManagedServerUpIteratorStep::new(
            self.lifecycle.clone(),
            self.strategy,
            servers,
            next,
        ))
    }
}

/// Runs the server-up workflow of each listed server, then `next`.
pub struct ManagedServerUpIteratorStep {
    lifecycle: Arc<dyn ServerLifecycle>,
    strategy: FanOutStrategy,
    servers: Vec<String>,
    next: Option<DomainStep>,
}

impl ManagedServerUpIteratorStep {
    pub fn new(
        lifecycle: Arc<dyn ServerLifecycle>,
        strategy: FanOutStrategy,
        servers: Vec<String>,
        next: Option<DomainStep>,
    ) -> Self {
        Self {
            lifecycle,
            strategy,
            servers,
            next,
        }
    }

    pub fn servers(&self) -> &[String] {
        &self.servers
    }

    pub fn next(&self) -> Option<&DomainStep> {
        self.next.as_ref()
    }

    pub fn strategy(&self) -> FanOutStrategy {
        self.strategy
    }

    fn startup_infos(&self, presence: &PresenceState) -> Vec<ServerStartupInfo> {
        self.servers
            .iter()
            .filter_map(|name| {
                let info = presence.server_startup_info_for(name);
                if info.is_none() {
                    warn!(
                        domain_uid = %presence.domain_uid(),
                        server = %name,
                        "No startup info for server; skipping"
                    );
                }
                info
            })
            .collect()
    }
}

impl Step<DomainContext> for ManagedServerUpIteratorStep {
    fn name(&self) -> &str {
        "ManagedServerUpIterator"
    }

    fn run(&self, packet: &mut DomainPacket) -> Disposition<DomainContext> {
        let presence = packet.context().clone();
        let infos = self.startup_infos(&presence);
        debug!(
            domain_uid = %presence.domain_uid(),
            servers = infos.len(),
            strategy = %self.strategy,
            "Starting managed servers"
        );

        match self.strategy {
            FanOutStrategy::Sequential => {
                let mut chain = self.next.clone();
                for info in infos.iter().rev() {
                    presence.server_objects().get_or_create(info.server_name());
                    chain = Some(self.lifecycle.server_up_step(info, chain));
                }
                Disposition::proceed(chain)
            }
            FanOutStrategy::Concurrent { max_in_flight } => {
                let children: VecDeque<(String, DomainStep)> = infos
                    .iter()
                    .map(|info| {
                        (
                            info.server_name().to_string(),
                            self.lifecycle.server_up_step(info, None),
                        )
                    })
                    .collect();
                Disposition::suspend(self.next.clone(), move |resumer| {
                    FanOut::start(resumer, presence, children, max_in_flight);
                })
            }
        }
    }
}

struct FanOutState {
    queue: VecDeque<(String, DomainStep)>,
    in_flight: usize,
    first_error: Option<StepError>,
    finished: bool,
}

/// Drives the child fibers of one concurrent fan-out and resumes the parent
/// once they are all accounted for.
struct FanOut {
    resumer: Resumer<DomainContext>,
    presence: Arc<PresenceState>,
    max_in_flight: usize,
    state: Mutex<FanOutState>,
}

impl FanOut {
    fn start(
        resumer: Resumer<DomainContext>,
        presence: Arc<PresenceState>,
        children: VecDeque<(String, DomainStep)>,
        max_in_flight: usize,
    ) {
        let fan_out = Arc::new(FanOut {
            resumer,
            presence,
            max_in_flight,
            state: Mutex::new(FanOutState {
                queue: children,
                in_flight: 0,
                first_error: None,
                finished: false,
            }),
        });
        fan_out.launch_ready();
        fan_out.finish_if_settled();
    }

    fn lock(&self) -> MutexGuard<'_, FanOutState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn launch_ready(self: &Arc<Self>) {
        let token = self.resumer.cancellation_token();
        loop {
            let (server, step) = {
                let mut state = self.lock();
                if state.first_error.is_some() || token.is_cancelled() {
                    return;
                }
                if self.max_in_flight > 0 && state.in_flight >= self.max_in_flight {
                    return;
                }
                let Some(child) = state.queue.pop_front() else {
                    return;
                };
                state.in_flight += 1;
                child
            };

            self.presence.server_objects().get_or_create(&server);
            let fiber = self.resumer.engine().create_child_fiber(&token);
            debug!(
                domain_uid = %self.presence.domain_uid(),
                server = %server,
                child_fiber_id = %fiber.handle().id(),
                "Starting server fiber"
            );

            let this = self.clone();
            fiber.start(step, Packet::new(self.presence.clone()), move |outcome| {
                this.child_finished(&server, outcome);
            });
        }
    }

    fn child_finished(self: &Arc<Self>, server: &str, outcome: FiberOutcome<DomainContext>) {
        {
            let mut state = self.lock();
            state.in_flight -= 1;
            let error = match outcome {
                FiberOutcome::Completed(_) => None,
                FiberOutcome::Failed(err) => Some(err),
                FiberOutcome::Cancelled => Some(StepError::Cancelled),
            };
            if let Some(err) = error {
                warn!(
                    domain_uid = %self.presence.domain_uid(),
                    server,
                    error = %err,
                    "Server fiber did not complete"
                );
                if state.first_error.is_none() {
                    state.first_error = Some(err);
                }
            }
        }

        self.launch_ready();
        self.finish_if_settled();
    }

    fn finish_if_settled(&self) {
        let error = {
            let mut state = self.lock();
            if state.finished || state.in_flight > 0 {
                return;
            }
            let stopped =
                state.first_error.is_some() || self.resumer.cancellation_token().is_cancelled();
            if !state.queue.is_empty() && !stopped {
                return;
            }
            state.finished = true;
            state.first_error.take()
        };

        match error {
            Some(err) => {
                self.resumer.fail(err);
            }
            None => {
                info!(domain_uid = %self.presence.domain_uid(), "Managed servers up");
                self.resumer.resume();
            }
        }
    }
}
