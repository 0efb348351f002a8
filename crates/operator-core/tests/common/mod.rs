// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for operator-core integration tests.
//!
//! Provides recording doubles for the step factory and server lifecycle, a
//! harness running the policy step once, and a tracing layer capturing events.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex};

use operator_core::{
    DesiredStateSpec, DomainContext, DomainPacket, DomainStep, ManagedServersUpStep,
    NextStepFactory, PresenceState, ServerLifecycle, ServerStartupInfo, ServerTopology,
    TopologySnapshot,
};
use operator_work::{Disposition, Packet, Resumer, Step, StepError, TerminalStep};
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

/// Servers with the given names.
pub fn servers(names: &[&str]) -> Vec<ServerTopology> {
    names.iter().map(|name| ServerTopology::new(*name)).collect()
}

/// Desired state with the given startup control.
pub fn desired(startup_control: Option<&str>) -> DesiredStateSpec {
    let mut desired = DesiredStateSpec::new("domain1");
    desired.startup_control = startup_control.map(str::to_string);
    desired
}

/// Presence state holding `desired` and scanned `topology`.
pub fn presence(desired: DesiredStateSpec, topology: TopologySnapshot) -> Arc<PresenceState> {
    let presence = Arc::new(PresenceState::new(desired));
    presence.set_scan(topology);
    presence
}

/// What a [`RecordingFactory`] was asked to build.
#[derive(Clone)]
pub struct FactoryCall {
    pub servers: Vec<String>,
    pub next: Option<DomainStep>,
    pub built: DomainStep,
}

/// Factory that records its arguments and builds a terminal step.
#[derive(Default)]
pub struct RecordingFactory {
    calls: Mutex<Vec<FactoryCall>>,
}

impl RecordingFactory {
    pub fn calls(&self) -> Vec<FactoryCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn last_call(&self) -> Option<FactoryCall> {
        self.calls.lock().unwrap().last().cloned()
    }
}

impl NextStepFactory for RecordingFactory {
    fn create_server_step(
        &self,
        _presence: &Arc<PresenceState>,
        servers: Vec<String>,
        next: Option<DomainStep>,
    ) -> DomainStep {
        let built: DomainStep = Arc::new(TerminalStep);
        self.calls.lock().unwrap().push(FactoryCall {
            servers,
            next,
            built: built.clone(),
        });
        built
    }
}

/// Result of running the policy step once against a presence state.
pub struct PolicyRun {
    pub presence: Arc<PresenceState>,
    pub factory: Arc<RecordingFactory>,
    pub next: DomainStep,
    pub disposition: Disposition<DomainContext>,
}

impl PolicyRun {
    /// Run `ManagedServersUpStep` directly, without a fiber.
    pub fn run(presence: Arc<PresenceState>) -> Self {
        let factory = Arc::new(RecordingFactory::default());
        let next: DomainStep = Arc::new(TerminalStep);
        let step = ManagedServersUpStep::new(factory.clone(), Some(next.clone()));
        let mut packet: DomainPacket = Packet::new(presence.clone());
        let disposition = step.run(&mut packet);
        Self {
            presence,
            factory,
            next,
            disposition,
        }
    }

    /// Names handed to the factory, empty when it was not called.
    pub fn servers(&self) -> Vec<String> {
        self.factory
            .last_call()
            .map(|call| call.servers)
            .unwrap_or_default()
    }

    pub fn server_set(&self) -> HashSet<String> {
        self.servers().into_iter().collect()
    }

    pub fn info(&self, server_name: &str) -> Option<ServerStartupInfo> {
        self.presence.server_startup_info_for(server_name)
    }

    /// Whether the step went straight to the original next step.
    pub fn continued_to_next(&self) -> bool {
        match &self.disposition {
            Disposition::Continue(step) => Arc::ptr_eq(step, &self.next),
            _ => false,
        }
    }

    /// Whether the step continued into the factory-built fan-out step, which
    /// in turn continues with the original next step.
    pub fn started_managed_servers(&self) -> bool {
        let Some(call) = self.factory.last_call() else {
            return false;
        };
        let continues_with_next = call
            .next
            .as_ref()
            .is_some_and(|next| Arc::ptr_eq(next, &self.next));
        match &self.disposition {
            Disposition::Continue(step) => Arc::ptr_eq(step, &call.built) && continues_with_next,
            _ => false,
        }
    }
}

/// Lifecycle whose server steps record the server name into a shared log.
///
/// Servers listed in `failing` fail; servers listed in `parked` suspend and
/// leave their resumer in `resumers` for the test to drive.
#[derive(Default)]
pub struct RecordingLifecycle {
    pub started: Arc<Mutex<Vec<String>>>,
    pub failing: HashSet<String>,
    pub parked: HashSet<String>,
    pub resumers: Arc<Mutex<HashMap<String, Resumer<DomainContext>>>>,
    pub seen_env: Arc<Mutex<HashMap<String, Vec<(String, String)>>>>,
}

impl RecordingLifecycle {
    pub fn failing(names: &[&str]) -> Self {
        Self {
            failing: names.iter().map(|name| name.to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn parked(names: &[&str]) -> Self {
        Self {
            parked: names.iter().map(|name| name.to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn started(&self) -> Vec<String> {
        self.started.lock().unwrap().clone()
    }

    /// Take the resumer of a parked server, if it has started.
    pub fn take_resumer(&self, server: &str) -> Option<Resumer<DomainContext>> {
        self.resumers.lock().unwrap().remove(server)
    }

    pub fn parked_count(&self) -> usize {
        self.resumers.lock().unwrap().len()
    }
}

impl ServerLifecycle for RecordingLifecycle {
    fn server_up_step(&self, info: &ServerStartupInfo, next: Option<DomainStep>) -> DomainStep {
        let server = info.server_name().to_string();
        self.seen_env.lock().unwrap().insert(
            server.clone(),
            info.env_vars
                .iter()
                .map(|var| (var.name.clone(), var.value.clone()))
                .collect(),
        );
        Arc::new(ServerUp {
            name: format!("ServerUp({})", server),
            fail: self.failing.contains(&server),
            park: self.parked.contains(&server),
            server,
            started: self.started.clone(),
            resumers: self.resumers.clone(),
            next,
        })
    }
}

struct ServerUp {
    name: String,
    server: String,
    fail: bool,
    park: bool,
    started: Arc<Mutex<Vec<String>>>,
    resumers: Arc<Mutex<HashMap<String, Resumer<DomainContext>>>>,
    next: Option<DomainStep>,
}

impl Step<DomainContext> for ServerUp {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self, _packet: &mut DomainPacket) -> Disposition<DomainContext> {
        self.started.lock().unwrap().push(self.server.clone());
        if self.fail {
            return Disposition::Failed(StepError::failed(&self.name, "pod creation rejected"));
        }
        if self.park {
            let resumers = self.resumers.clone();
            let server = self.server.clone();
            return Disposition::suspend(self.next.clone(), move |resumer| {
                resumers.lock().unwrap().insert(server, resumer);
            });
        }
        Disposition::proceed(self.next.clone())
    }
}

/// A step that records that it ran, for use as a chain's final step.
pub fn marker_step(log: Arc<Mutex<Vec<String>>>, label: &'static str) -> DomainStep {
    Arc::new(operator_work::FnStep::new(
        label,
        move |_: &mut DomainPacket| -> Disposition<DomainContext> {
            log.lock().unwrap().push(label.to_string());
            Disposition::Done
        },
    ))
}

/// One captured tracing event.
#[derive(Debug, Clone)]
pub struct CapturedEvent {
    pub level: Level,
    pub message: String,
    pub fields: HashMap<String, String>,
}

/// Layer collecting every event it sees.
#[derive(Clone, Default)]
pub struct CapturedEvents {
    events: Arc<Mutex<Vec<CapturedEvent>>>,
}

impl CapturedEvents {
    pub fn events(&self) -> Vec<CapturedEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn with_message(&self, message: &str) -> Vec<CapturedEvent> {
        self.events()
            .into_iter()
            .filter(|event| event.message == message)
            .collect()
    }
}

#[derive(Default)]
struct EventVisitor {
    message: String,
    fields: HashMap<String, String>,
}

impl Visit for EventVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.fields.insert(field.name().to_string(), value.to_string());
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{:?}", value);
        } else {
            self.fields
                .insert(field.name().to_string(), format!("{:?}", value));
        }
    }
}

impl<S: Subscriber> Layer<S> for CapturedEvents {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = EventVisitor::default();
        event.record(&mut visitor);
        self.events.lock().unwrap().push(CapturedEvent {
            level: *event.metadata().level(),
            message: visitor.message,
            fields: visitor.fields,
        });
    }
}

/// Run `f` with a subscriber capturing every event, and return the events.
pub fn capture_events<R>(f: impl FnOnce() -> R) -> (R, CapturedEvents) {
    use tracing_subscriber::layer::SubscriberExt;

    let captured = CapturedEvents::default();
    let subscriber = tracing_subscriber::registry().with(captured.clone());
    let result = tracing::subscriber::with_default(subscriber, f);
    (result, captured)
}
