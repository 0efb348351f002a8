// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Decide which managed servers to start.
//!
//! [`ManagedServersUpStep`] reconciles the desired startup policy against the
//! discovered topology, records a [`ServerStartupInfo`] per server to start,
//! and hands the server names to the fan-out step built by its
//! [`NextStepFactory`].
//!
//! | Mode | Explicit servers | Explicit clusters | Other clusters | Standalone servers |
//! |------|------------------|-------------------|----------------|--------------------|
//! | `NONE`, `ADMIN`, unspecified, unrecognized | - | - | - | - |
//! | `SPECIFIED` | yes | all members | - | - |
//! | `AUTO` | yes | all members | first `replicas` members | - |
//! | `ALL` | yes | all members | all members | yes |
//!
//! The admin server is never started here.

use std::collections::HashSet;
use std::sync::Arc;

use operator_work::{Disposition, Step, StepError};
use tracing::{debug, warn};

use super::server_up_iterator::NextStepFactory;
use super::{DomainContext, DomainPacket, DomainStep};
use crate::desired::{
    ADMIN_STARTUP_MODE_FLAG, ADMIN_STATE, DesiredStateSpec, EnvVar, JAVA_OPTIONS, StartupControl,
};
use crate::presence::{PresenceState, ServerStartupInfo};
use crate::topology::{ClusterTopology, ServerTopology, TopologySnapshot};

/// Diagnostic event listing the servers already known to be running.
pub const SERVERS_UP_MSG: &str = "Running servers for domain";

/// Policy step computing the managed-server startup set.
pub struct ManagedServersUpStep {
    factory: Arc<dyn NextStepFactory>,
    next: Option<DomainStep>,
}

impl ManagedServersUpStep {
    pub fn new(factory: Arc<dyn NextStepFactory>, next: Option<DomainStep>) -> Self {
        Self { factory, next }
    }
}

impl Step<DomainContext> for ManagedServersUpStep {
    fn name(&self) -> &str {
        "ManagedServersUp"
    }

    fn run(&self, packet: &mut DomainPacket) -> Disposition<DomainContext> {
        let presence = packet.context().clone();
        log_running_servers(&presence);

        let scan = presence.scan();
        if let Some(scan) = &scan {
            let restarted = presence.expand_restart_clusters(scan);
            if restarted > 0 {
                debug!(domain_uid = %presence.domain_uid(), restarted, "Expanded cluster restarts");
            }
        }

        let mode = presence.desired().startup_control();
        if let StartupControl::Unrecognized(raw) = &mode {
            warn!(
                domain_uid = %presence.domain_uid(),
                startup_control = %raw,
                "Unrecognized startup control; not starting managed servers"
            );
        }
        if !mode.starts_managed_servers() {
            presence.set_server_startup_info(Vec::new());
            debug!(
                domain_uid = %presence.domain_uid(),
                startup_control = %mode,
                "Managed servers not started"
            );
            return Disposition::proceed(self.next.clone());
        }

        let Some(scan) = scan else {
            return Disposition::Failed(StepError::MissingInput(format!(
                "topology scan for domain '{}'",
                presence.domain_uid()
            )));
        };

        let startup_info = plan_server_startup(presence.desired(), &scan);
        let servers: Vec<String> = startup_info
            .iter()
            .map(|info| info.server_name().to_string())
            .collect();
        presence.set_server_startup_info(startup_info);

        debug!(
            domain_uid = %presence.domain_uid(),
            startup_control = %mode,
            count = servers.len(),
            "Managed servers to start"
        );

        if servers.is_empty() {
            return Disposition::proceed(self.next.clone());
        }
        Disposition::Continue(
            self.factory
                .create_server_step(&presence, servers, self.next.clone()),
        )
    }
}

fn log_running_servers(presence: &PresenceState) {
    if tracing::enabled!(tracing::Level::DEBUG) {
        let running = presence.server_objects().servers_with_pods();
        debug!(
            domain_uid = %presence.domain_uid(),
            running_servers = ?running,
            count = running.len(),
            "{}",
            SERVERS_UP_MSG
        );
    }
}

/// Compute the startup metadata for every managed server `desired` starts
/// under `topology`, in candidate order.
///
/// Modes that do not start managed servers yield an empty list.
pub fn plan_server_startup(
    desired: &DesiredStateSpec,
    topology: &TopologySnapshot,
) -> Vec<ServerStartupInfo> {
    let mode = desired.startup_control();
    if !mode.starts_managed_servers() {
        return Vec::new();
    }

    let mut candidates = Candidates::new(desired);

    for startup in &desired.server_startup {
        if let Some(server) = topology.server(&startup.server_name) {
            candidates.add(server);
        }
    }

    for startup in &desired.cluster_startup {
        if let Some(cluster) = topology.cluster(&startup.cluster_name) {
            for member in &cluster.members {
                candidates.add(member);
            }
        }
    }

    if mode.starts_unlisted_clusters() {
        for cluster in topology.clusters() {
            if desired.cluster_startup_for(&cluster.name).is_some() {
                continue;
            }
            let limit = match mode {
                StartupControl::All => cluster.members.len(),
                _ => desired.replicas as usize,
            };
            for member in cluster.members.iter().take(limit) {
                candidates.add(member);
            }
        }
    }

    if mode == StartupControl::All {
        for server in topology.servers() {
            candidates.add(server);
        }
    }

    candidates
        .servers
        .into_iter()
        .map(|server| startup_info(desired, topology, server))
        .collect()
}

struct Candidates<'a> {
    desired: &'a DesiredStateSpec,
    seen: HashSet<String>,
    servers: Vec<Arc<ServerTopology>>,
}

impl<'a> Candidates<'a> {
    fn new(desired: &'a DesiredStateSpec) -> Self {
        Self {
            desired,
            seen: HashSet::new(),
            servers: Vec::new(),
        }
    }

    fn add(&mut self, server: &Arc<ServerTopology>) {
        if self.desired.is_admin_server(&server.name) {
            return;
        }
        if self.seen.insert(server.name.clone()) {
            self.servers.push(server.clone());
        }
    }
}

fn startup_info(
    desired: &DesiredStateSpec,
    topology: &TopologySnapshot,
    server: Arc<ServerTopology>,
) -> ServerStartupInfo {
    let cluster_config: Option<Arc<ClusterTopology>> =
        topology.owning_cluster(&server.name).cloned();
    let server_startup = desired.server_startup_for(&server.name).cloned();
    let cluster_startup = cluster_config
        .as_ref()
        .and_then(|cluster| desired.cluster_startup_for(&cluster.name));

    let mut env_vars = Vec::new();
    if let Some(cluster_startup) = cluster_startup {
        merge_env(&mut env_vars, &cluster_startup.env);
    }
    if let Some(server_startup) = &server_startup {
        merge_env(&mut env_vars, &server_startup.env);
    }

    let desired_state = server_startup
        .as_ref()
        .and_then(|startup| startup.desired_state.as_deref())
        .or_else(|| cluster_startup.and_then(|startup| startup.desired_state.as_deref()));
    if desired_state == Some(ADMIN_STATE) {
        add_admin_startup_flag(&mut env_vars);
    }

    ServerStartupInfo {
        server_config: server,
        cluster_config,
        server_startup,
        env_vars,
    }
}

/// Overlay `layer` on `env`: a variable already present takes the layer's
/// value in place, new variables are appended.
fn merge_env(env: &mut Vec<EnvVar>, layer: &[EnvVar]) {
    for var in layer {
        match env.iter_mut().find(|existing| existing.name == var.name) {
            Some(existing) => existing.value = var.value.clone(),
            None => env.push(var.clone()),
        }
    }
}

/// Put the admin startup flag in front of `JAVA_OPTIONS`, adding the variable
/// when absent. An empty value is replaced by the flag alone.
fn add_admin_startup_flag(env: &mut Vec<EnvVar>) {
    match env.iter_mut().find(|var| var.name == JAVA_OPTIONS) {
        Some(var) if var.value.is_empty() => var.value = ADMIN_STARTUP_MODE_FLAG.to_string(),
        Some(var) => var.value = format!("{} {}", ADMIN_STARTUP_MODE_FLAG, var.value),
        None => env.push(EnvVar::new(JAVA_OPTIONS, ADMIN_STARTUP_MODE_FLAG)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_env_server_value_wins_per_name() {
        let mut env = Vec::new();
        merge_env(
            &mut env,
            &[EnvVar::new("item1", "cluster"), EnvVar::new("shared", "cluster")],
        );
        merge_env(
            &mut env,
            &[EnvVar::new("shared", "server"), EnvVar::new("item2", "server")],
        );

        assert_eq!(
            env,
            vec![
                EnvVar::new("item1", "cluster"),
                EnvVar::new("shared", "server"),
                EnvVar::new("item2", "server"),
            ]
        );
    }

    #[test]
    fn test_admin_flag_prepended_to_existing_java_options() {
        let mut env = vec![EnvVar::new(JAVA_OPTIONS, "-Xmx512m")];
        add_admin_startup_flag(&mut env);
        assert_eq!(
            env,
            vec![EnvVar::new(
                JAVA_OPTIONS,
                "-Dweblogic.management.startupMode=ADMIN -Xmx512m"
            )]
        );

        let mut env = vec![EnvVar::new(JAVA_OPTIONS, "")];
        add_admin_startup_flag(&mut env);
        assert_eq!(env, vec![EnvVar::new(JAVA_OPTIONS, ADMIN_STARTUP_MODE_FLAG)]);

        let mut env = Vec::new();
        add_admin_startup_flag(&mut env);
        assert_eq!(env, vec![EnvVar::new(JAVA_OPTIONS, ADMIN_STARTUP_MODE_FLAG)]);
    }

    #[test]
    fn test_admin_flag_keeps_whitespace_java_options() {
        let mut env = vec![EnvVar::new(JAVA_OPTIONS, "  ")];
        add_admin_startup_flag(&mut env);
        assert_eq!(
            env,
            vec![EnvVar::new(
                JAVA_OPTIONS,
                format!("{}   ", ADMIN_STARTUP_MODE_FLAG)
            )]
        );
    }

    #[test]
    fn test_plan_is_empty_for_non_starting_modes() {
        let topology = TopologySnapshot::builder("d")
            .cluster("cluster1", [ServerTopology::new("ms1")])
            .unwrap()
            .build();
        for mode in [Some("NONE"), Some("admin"), Some("xyzzy"), None] {
            let mut desired = DesiredStateSpec::new("domain1");
            desired.startup_control = mode.map(str::to_string);
            desired.replicas = 5;
            desired
                .server_startup
                .push(crate::desired::ServerStartup::new("ms1"));
            assert!(plan_server_startup(&desired, &topology).is_empty(), "{:?}", mode);
        }
    }
}
