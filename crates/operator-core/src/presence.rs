// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Per-domain presence state.
//!
//! One [`PresenceState`] exists per domain and is shared (as an `Arc`) by the
//! fibers of that domain's reconciliation cycle. The desired state is
//! read-only; everything else sits behind its own lock so child fibers can
//! touch disjoint parts concurrently.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;

use crate::desired::{DesiredStateSpec, EnvVar, ServerStartup};
use crate::topology::{ClusterTopology, ServerTopology, TopologySnapshot};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Startup metadata computed for one server.
#[derive(Debug, Clone)]
pub struct ServerStartupInfo {
    pub server_config: Arc<ServerTopology>,
    /// The owning cluster, for clustered servers.
    pub cluster_config: Option<Arc<ClusterTopology>>,
    /// The explicit startup entry for this server, if any.
    pub server_startup: Option<ServerStartup>,
    /// Merged environment. Names are unique.
    pub env_vars: Vec<EnvVar>,
}

impl ServerStartupInfo {
    pub fn server_name(&self) -> &str {
        &self.server_config.name
    }

    pub fn cluster_name(&self) -> Option<&str> {
        self.cluster_config.as_ref().map(|cluster| cluster.name.as_str())
    }

    /// Value of the named environment variable.
    pub fn env(&self, name: &str) -> Option<&str> {
        self.env_vars
            .iter()
            .find(|var| var.name == name)
            .map(|var| var.value.as_str())
    }
}

/// Last-known runtime objects of one server.
#[derive(Debug, Default)]
pub struct ServerObjects {
    pod: Mutex<Option<Value>>,
    service: Mutex<Option<Value>>,
}

impl ServerObjects {
    pub fn pod(&self) -> Option<Value> {
        lock(&self.pod).clone()
    }

    /// Replace the known pod, returning the previous one.
    pub fn set_pod(&self, pod: Option<Value>) -> Option<Value> {
        std::mem::replace(&mut *lock(&self.pod), pod)
    }

    pub fn has_pod(&self) -> bool {
        lock(&self.pod).is_some()
    }

    pub fn service(&self) -> Option<Value> {
        lock(&self.service).clone()
    }

    /// Replace the known service, returning the previous one.
    pub fn set_service(&self, service: Option<Value>) -> Option<Value> {
        std::mem::replace(&mut *lock(&self.service), service)
    }
}

/// Arena of [`ServerObjects`] keyed by server name.
///
/// Entries are created on first reference and never removed, so every caller
/// asking for the same name gets the same entry.
#[derive(Debug, Default)]
pub struct ServerObjectsRegistry {
    entries: Mutex<BTreeMap<String, Arc<ServerObjects>>>,
}

impl ServerObjectsRegistry {
    /// The entry for `server_name`, created if missing.
    pub fn get_or_create(&self, server_name: &str) -> Arc<ServerObjects> {
        lock(&self.entries)
            .entry(server_name.to_string())
            .or_default()
            .clone()
    }

    pub fn get(&self, server_name: &str) -> Option<Arc<ServerObjects>> {
        lock(&self.entries).get(server_name).cloned()
    }

    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.entries).is_empty()
    }

    /// Names of servers whose last-known objects include a pod, sorted.
    pub fn servers_with_pods(&self) -> Vec<String> {
        lock(&self.entries)
            .iter()
            .filter(|(_, objects)| objects.has_pod())
            .map(|(name, _)| name.clone())
            .collect()
    }
}

#[derive(Debug, Default)]
struct ExplicitRestarts {
    clusters: BTreeSet<String>,
    servers: BTreeSet<String>,
}

/// Mutable state of one domain during reconciliation.
pub struct PresenceState {
    desired: DesiredStateSpec,
    scan: Mutex<Option<Arc<TopologySnapshot>>>,
    restarts: Mutex<ExplicitRestarts>,
    server_objects: ServerObjectsRegistry,
    server_startup_info: Mutex<Vec<ServerStartupInfo>>,
}

impl PresenceState {
    pub fn new(desired: DesiredStateSpec) -> Self {
        Self {
            desired,
            scan: Mutex::new(None),
            restarts: Mutex::new(ExplicitRestarts::default()),
            server_objects: ServerObjectsRegistry::default(),
            server_startup_info: Mutex::new(Vec::new()),
        }
    }

    pub fn desired(&self) -> &DesiredStateSpec {
        &self.desired
    }

    pub fn domain_uid(&self) -> &str {
        &self.desired.domain_uid
    }

    /// The latest topology snapshot.
    pub fn scan(&self) -> Option<Arc<TopologySnapshot>> {
        lock(&self.scan).clone()
    }

    /// Replace the topology snapshot.
    pub fn set_scan(&self, snapshot: TopologySnapshot) {
        *lock(&self.scan) = Some(Arc::new(snapshot));
    }

    pub fn add_explicit_restart_clusters<I, S>(&self, clusters: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        lock(&self.restarts)
            .clusters
            .extend(clusters.into_iter().map(Into::into));
    }

    pub fn add_explicit_restart_servers<I, S>(&self, servers: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        lock(&self.restarts)
            .servers
            .extend(servers.into_iter().map(Into::into));
    }

    pub fn explicit_restart_clusters(&self) -> BTreeSet<String> {
        lock(&self.restarts).clusters.clone()
    }

    pub fn explicit_restart_servers(&self) -> BTreeSet<String> {
        lock(&self.restarts).servers.clone()
    }

    /// Move every member of each explicitly restarted cluster into the
    /// explicit restart servers, then clear the cluster set.
    ///
    /// Clusters unknown to `topology` are dropped. Returns the number of
    /// servers newly marked.
    pub fn expand_restart_clusters(&self, topology: &TopologySnapshot) -> usize {
        let mut restarts = lock(&self.restarts);
        let clusters = std::mem::take(&mut restarts.clusters);
        let before = restarts.servers.len();
        for cluster in clusters.iter().filter_map(|name| topology.cluster(name)) {
            restarts
                .servers
                .extend(cluster.member_names().map(str::to_string));
        }
        restarts.servers.len() - before
    }

    pub fn server_objects(&self) -> &ServerObjectsRegistry {
        &self.server_objects
    }

    /// Startup metadata computed by the latest cycle.
    pub fn server_startup_info(&self) -> Vec<ServerStartupInfo> {
        lock(&self.server_startup_info).clone()
    }

    /// Startup metadata for one server.
    pub fn server_startup_info_for(&self, server_name: &str) -> Option<ServerStartupInfo> {
        lock(&self.server_startup_info)
            .iter()
            .find(|info| info.server_name() == server_name)
            .cloned()
    }

    pub fn set_server_startup_info(&self, info: Vec<ServerStartupInfo>) {
        *lock(&self.server_startup_info) = info;
    }
}

impl fmt::Debug for PresenceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PresenceState")
            .field("domain_uid", &self.desired.domain_uid)
            .field("server_objects", &self.server_objects.len())
            .finish_non_exhaustive()
    }
}
