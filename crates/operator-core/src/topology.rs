// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Discovered domain topology.
//!
//! A [`TopologySnapshot`] is built once per reconciliation cycle from whatever
//! the discovery client reports and is never mutated afterwards. Servers and
//! clusters are shared as `Arc`s so startup metadata can point at the exact
//! configuration object it was derived from.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while building a snapshot.
#[derive(Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum TopologyError {
    /// A server name was declared twice (standalone or as a cluster member).
    #[error("server '{0}' is declared more than once in the topology")]
    DuplicateServer(String),

    /// A cluster name was declared twice.
    #[error("cluster '{0}' is declared more than once in the topology")]
    DuplicateCluster(String),

    /// A machine name was declared twice.
    #[error("machine '{0}' is declared more than once in the topology")]
    DuplicateMachine(String),
}

/// A discovered server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerTopology {
    pub name: String,
    #[serde(default)]
    pub listen_address: Option<String>,
    #[serde(default)]
    pub listen_port: Option<u16>,
    /// Name of the machine the server is assigned to.
    #[serde(default)]
    pub machine: Option<String>,
}

impl ServerTopology {
    /// A server with only a name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            listen_address: None,
            listen_port: None,
            machine: None,
        }
    }

    pub fn with_listen_address(mut self, address: impl Into<String>, port: u16) -> Self {
        self.listen_address = Some(address.into());
        self.listen_port = Some(port);
        self
    }

    pub fn with_machine(mut self, machine: impl Into<String>) -> Self {
        self.machine = Some(machine.into());
        self
    }
}

/// A discovered cluster and its members, in discovery order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterTopology {
    pub name: String,
    pub members: Vec<Arc<ServerTopology>>,
    /// Maximum number of dynamic members, for dynamically sized clusters.
    pub dynamic_size_hint: Option<u32>,
}

impl ClusterTopology {
    pub fn is_dynamic(&self) -> bool {
        self.dynamic_size_hint.is_some()
    }

    /// Names of the cluster's members, in order.
    pub fn member_names(&self) -> impl Iterator<Item = &str> {
        self.members.iter().map(|server| server.name.as_str())
    }

    /// Find a member by name.
    pub fn member(&self, name: &str) -> Option<&Arc<ServerTopology>> {
        self.members.iter().find(|server| server.name == name)
    }
}

/// A discovered machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineTopology {
    pub name: String,
    #[serde(default)]
    pub node_manager_address: Option<String>,
}

/// Immutable view of a domain's servers, clusters and machines.
#[derive(Debug, Clone, Default)]
pub struct TopologySnapshot {
    domain_name: String,
    clusters: Vec<Arc<ClusterTopology>>,
    servers: Vec<Arc<ServerTopology>>,
    machines: Vec<MachineTopology>,
    // Every server name, standalone or clustered, mapped to its owning
    // cluster's index (None for standalone servers).
    owners: HashMap<String, Option<usize>>,
}

impl TopologySnapshot {
    /// Start building a snapshot for `domain_name`.
    pub fn builder(domain_name: impl Into<String>) -> TopologyBuilder {
        TopologyBuilder::new(domain_name)
    }

    pub fn domain_name(&self) -> &str {
        &self.domain_name
    }

    /// Clusters in discovery order.
    pub fn clusters(&self) -> &[Arc<ClusterTopology>] {
        &self.clusters
    }

    /// Standalone servers in discovery order.
    pub fn servers(&self) -> &[Arc<ServerTopology>] {
        &self.servers
    }

    pub fn machines(&self) -> &[MachineTopology] {
        &self.machines
    }

    pub fn cluster(&self, name: &str) -> Option<&Arc<ClusterTopology>> {
        self.clusters.iter().find(|cluster| cluster.name == name)
    }

    pub fn machine(&self, name: &str) -> Option<&MachineTopology> {
        self.machines.iter().find(|machine| machine.name == name)
    }

    /// Find a server by name, whether standalone or a cluster member.
    pub fn server(&self, name: &str) -> Option<&Arc<ServerTopology>> {
        match self.owners.get(name)? {
            Some(index) => self.clusters.get(*index)?.member(name),
            None => self.servers.iter().find(|server| server.name == name),
        }
    }

    /// The cluster `server_name` belongs to, if it is clustered.
    pub fn owning_cluster(&self, server_name: &str) -> Option<&Arc<ClusterTopology>> {
        let index = (*self.owners.get(server_name)?)?;
        self.clusters.get(index)
    }

    /// Whether the snapshot knows no servers at all.
    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }
}

/// Builder enforcing the snapshot's uniqueness rules.
#[derive(Debug)]
pub struct TopologyBuilder {
    snapshot: TopologySnapshot,
}

impl TopologyBuilder {
    fn new(domain_name: impl Into<String>) -> Self {
        Self {
            snapshot: TopologySnapshot {
                domain_name: domain_name.into(),
                ..TopologySnapshot::default()
            },
        }
    }

    /// Add a standalone server.
    pub fn server(mut self, server: ServerTopology) -> Result<Self, TopologyError> {
        self.claim(&server.name, None)?;
        self.snapshot.servers.push(Arc::new(server));
        Ok(self)
    }

    /// Add a statically sized cluster.
    pub fn cluster(
        self,
        name: impl Into<String>,
        members: impl IntoIterator<Item = ServerTopology>,
    ) -> Result<Self, TopologyError> {
        self.add_cluster(name.into(), members, None)
    }

    /// Add a dynamically sized cluster with at most `max_size` members.
    pub fn dynamic_cluster(
        self,
        name: impl Into<String>,
        members: impl IntoIterator<Item = ServerTopology>,
        max_size: u32,
    ) -> Result<Self, TopologyError> {
        self.add_cluster(name.into(), members, Some(max_size))
    }

    pub fn machine(mut self, machine: MachineTopology) -> Result<Self, TopologyError> {
        if self.snapshot.machine(&machine.name).is_some() {
            return Err(TopologyError::DuplicateMachine(machine.name));
        }
        self.snapshot.machines.push(machine);
        Ok(self)
    }

    pub fn build(self) -> TopologySnapshot {
        self.snapshot
    }

    fn add_cluster(
        mut self,
        name: String,
        members: impl IntoIterator<Item = ServerTopology>,
        dynamic_size_hint: Option<u32>,
    ) -> Result<Self, TopologyError> {
        if self.snapshot.cluster(&name).is_some() {
            return Err(TopologyError::DuplicateCluster(name));
        }

        let index = self.snapshot.clusters.len();
        let mut servers = Vec::new();
        for member in members {
            self.claim(&member.name, Some(index))?;
            servers.push(Arc::new(member));
        }

        self.snapshot.clusters.push(Arc::new(ClusterTopology {
            name,
            members: servers,
            dynamic_size_hint,
        }));
        Ok(self)
    }

    fn claim(&mut self, server_name: &str, owner: Option<usize>) -> Result<(), TopologyError> {
        if self.snapshot.owners.contains_key(server_name) {
            return Err(TopologyError::DuplicateServer(server_name.to_string()));
        }
        self.snapshot.owners.insert(server_name.to_string(), owner);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn servers(names: &[&str]) -> Vec<ServerTopology> {
        names.iter().map(|name| ServerTopology::new(*name)).collect()
    }

    #[test]
    fn test_lookups_cover_standalone_and_clustered_servers() {
        let snapshot = TopologySnapshot::builder("base_domain")
            .server(ServerTopology::new("admin").with_listen_address("admin-host", 7001))
            .unwrap()
            .cluster("cluster1", servers(&["ms1", "ms2"]))
            .unwrap()
            .dynamic_cluster("dyn1", servers(&["dyn-1"]), 4)
            .unwrap()
            .build();

        assert_eq!(snapshot.domain_name(), "base_domain");
        assert_eq!(snapshot.server("admin").unwrap().listen_port, Some(7001));
        assert!(snapshot.owning_cluster("admin").is_none());

        let cluster = snapshot.owning_cluster("ms2").unwrap();
        assert_eq!(cluster.name, "cluster1");
        assert!(Arc::ptr_eq(snapshot.server("ms2").unwrap(), &cluster.members[1]));
        assert!(!cluster.is_dynamic());
        assert_eq!(snapshot.cluster("dyn1").unwrap().dynamic_size_hint, Some(4));
        assert!(snapshot.server("ms9").is_none());
    }

    #[test]
    fn test_cluster_order_is_discovery_order() {
        let snapshot = TopologySnapshot::builder("d")
            .cluster("zeta", servers(&["z1"]))
            .unwrap()
            .cluster("alpha", servers(&["a2", "a1"]))
            .unwrap()
            .build();

        let names: Vec<_> = snapshot.clusters().iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["zeta", "alpha"]);
        let members: Vec<_> = snapshot.cluster("alpha").unwrap().member_names().collect();
        assert_eq!(members, vec!["a2", "a1"]);
    }

    #[test]
    fn test_duplicates_are_rejected() {
        let err = TopologySnapshot::builder("d")
            .server(ServerTopology::new("ms1"))
            .unwrap()
            .cluster("cluster1", servers(&["ms1"]))
            .unwrap_err();
        assert_eq!(err, TopologyError::DuplicateServer("ms1".to_string()));

        let err = TopologySnapshot::builder("d")
            .cluster("cluster1", servers(&["ms1"]))
            .unwrap()
            .cluster("cluster1", servers(&["ms2"]))
            .unwrap_err();
        assert_eq!(err, TopologyError::DuplicateCluster("cluster1".to_string()));
    }

    #[test]
    fn test_machines() {
        let snapshot = TopologySnapshot::builder("d")
            .machine(MachineTopology {
                name: "machine1".to_string(),
                node_manager_address: Some("nm-host:5556".to_string()),
            })
            .unwrap()
            .server(ServerTopology::new("ms1").with_machine("machine1"))
            .unwrap()
            .build();

        let machine_name = snapshot.server("ms1").unwrap().machine.as_deref().unwrap();
        assert_eq!(
            snapshot.machine(machine_name).unwrap().node_manager_address.as_deref(),
            Some("nm-host:5556")
        );
        assert!(!snapshot.is_empty());
        assert!(TopologySnapshot::builder("empty").build().is_empty());
    }
}
