// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Desired state of a domain, as declared by its owner.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Desired lifecycle state marking a server that should start in admin mode.
pub const ADMIN_STATE: &str = "ADMIN";

/// Desired lifecycle state of a normally running server.
pub const RUNNING_STATE: &str = "RUNNING";

/// Environment variable carrying JVM options for a server.
pub const JAVA_OPTIONS: &str = "JAVA_OPTIONS";

/// JVM flag starting a server in administration mode.
pub const ADMIN_STARTUP_MODE_FLAG: &str = "-Dweblogic.management.startupMode=ADMIN";

/// Which managed servers the operator starts on its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartupControl {
    /// No mode given. Behaves like [`StartupControl::Admin`].
    Unspecified,
    /// Start nothing.
    None,
    /// Start only the admin server.
    Admin,
    /// Start every managed server.
    All,
    /// Start explicitly named servers plus default replicas of other clusters.
    Auto,
    /// Start only explicitly named servers and clusters.
    Specified,
    /// A value that matched no known mode. Behaves like [`StartupControl::Admin`].
    Unrecognized(String),
}

impl StartupControl {
    /// Normalize a raw, case-insensitive mode string.
    pub fn parse(raw: Option<&str>) -> Self {
        let Some(raw) = raw else {
            return StartupControl::Unspecified;
        };
        match raw.trim().to_ascii_uppercase().as_str() {
            "NONE" => StartupControl::None,
            "ADMIN" => StartupControl::Admin,
            "ALL" => StartupControl::All,
            "AUTO" => StartupControl::Auto,
            "SPECIFIED" => StartupControl::Specified,
            _ => StartupControl::Unrecognized(raw.to_string()),
        }
    }

    /// Whether this mode starts managed servers at all.
    pub fn starts_managed_servers(&self) -> bool {
        matches!(
            self,
            StartupControl::All | StartupControl::Auto | StartupControl::Specified
        )
    }

    /// Whether clusters without an explicit entry are started by default.
    pub fn starts_unlisted_clusters(&self) -> bool {
        matches!(self, StartupControl::All | StartupControl::Auto)
    }
}

impl fmt::Display for StartupControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StartupControl::Unspecified => f.write_str("UNSPECIFIED"),
            StartupControl::None => f.write_str("NONE"),
            StartupControl::Admin => f.write_str("ADMIN"),
            StartupControl::All => f.write_str("ALL"),
            StartupControl::Auto => f.write_str("AUTO"),
            StartupControl::Specified => f.write_str("SPECIFIED"),
            StartupControl::Unrecognized(raw) => write!(f, "{}", raw),
        }
    }
}

/// A single environment variable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvVar {
    pub name: String,
    pub value: String,
}

impl EnvVar {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Explicit startup entry for one server.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerStartup {
    pub server_name: String,
    #[serde(default)]
    pub desired_state: Option<String>,
    #[serde(default)]
    pub env: Vec<EnvVar>,
}

impl ServerStartup {
    pub fn new(server_name: impl Into<String>) -> Self {
        Self {
            server_name: server_name.into(),
            ..Self::default()
        }
    }

    pub fn with_desired_state(mut self, state: impl Into<String>) -> Self {
        self.desired_state = Some(state.into());
        self
    }

    pub fn with_env(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push(EnvVar::new(name, value));
        self
    }
}

/// Explicit startup entry for one cluster.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterStartup {
    pub cluster_name: String,
    #[serde(default)]
    pub desired_state: Option<String>,
    /// Replica target. Recorded only; explicit clusters start all members.
    #[serde(default)]
    pub replicas: Option<u32>,
    #[serde(default)]
    pub env: Vec<EnvVar>,
}

impl ClusterStartup {
    pub fn new(cluster_name: impl Into<String>) -> Self {
        Self {
            cluster_name: cluster_name.into(),
            ..Self::default()
        }
    }

    pub fn with_desired_state(mut self, state: impl Into<String>) -> Self {
        self.desired_state = Some(state.into());
        self
    }

    pub fn with_replicas(mut self, replicas: u32) -> Self {
        self.replicas = Some(replicas);
        self
    }

    pub fn with_env(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push(EnvVar::new(name, value));
        self
    }
}

/// The domain owner's declared intent.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DesiredStateSpec {
    /// Unique identifier of the domain resource.
    pub domain_uid: String,
    /// Raw startup-control mode, case-insensitive.
    #[serde(default)]
    pub startup_control: Option<String>,
    /// Default replica count for clusters without an explicit entry.
    #[serde(default)]
    pub replicas: u32,
    /// Name of the admin server, never started as a managed server.
    #[serde(default, rename = "asName", alias = "adminServerName")]
    pub admin_server_name: Option<String>,
    #[serde(default)]
    pub server_startup: Vec<ServerStartup>,
    #[serde(default)]
    pub cluster_startup: Vec<ClusterStartup>,
}

impl DesiredStateSpec {
    pub fn new(domain_uid: impl Into<String>) -> Self {
        Self {
            domain_uid: domain_uid.into(),
            ..Self::default()
        }
    }

    /// The normalized startup-control mode.
    pub fn startup_control(&self) -> StartupControl {
        StartupControl::parse(self.startup_control.as_deref())
    }

    /// The first explicit entry for `server_name`.
    pub fn server_startup_for(&self, server_name: &str) -> Option<&ServerStartup> {
        self.server_startup
            .iter()
            .find(|startup| startup.server_name == server_name)
    }

    /// The first explicit entry for `cluster_name`.
    pub fn cluster_startup_for(&self, cluster_name: &str) -> Option<&ClusterStartup> {
        self.cluster_startup
            .iter()
            .find(|startup| startup.cluster_name == cluster_name)
    }

    pub fn is_admin_server(&self, server_name: &str) -> bool {
        self.admin_server_name.as_deref() == Some(server_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_startup_control_is_case_insensitive() {
        assert_eq!(StartupControl::parse(Some("auto")), StartupControl::Auto);
        assert_eq!(StartupControl::parse(Some("Specified")), StartupControl::Specified);
        assert_eq!(StartupControl::parse(Some("ALL")), StartupControl::All);
        assert_eq!(StartupControl::parse(Some("none")), StartupControl::None);
        assert_eq!(StartupControl::parse(Some("aDmIn")), StartupControl::Admin);
        assert_eq!(StartupControl::parse(None), StartupControl::Unspecified);
        assert_eq!(
            StartupControl::parse(Some("xyzzy")),
            StartupControl::Unrecognized("xyzzy".to_string())
        );
    }

    #[test]
    fn test_only_all_auto_specified_start_servers() {
        for mode in ["ALL", "AUTO", "SPECIFIED"] {
            assert!(StartupControl::parse(Some(mode)).starts_managed_servers(), "{}", mode);
        }
        for mode in [Some("NONE"), Some("ADMIN"), Some("xyzzy"), None] {
            assert!(!StartupControl::parse(mode).starts_managed_servers(), "{:?}", mode);
        }
        assert!(!StartupControl::Specified.starts_unlisted_clusters());
        assert!(StartupControl::Auto.starts_unlisted_clusters());
    }

    #[test]
    fn test_deserialize_desired_state() {
        let spec: DesiredStateSpec = serde_json::from_value(serde_json::json!({
            "domainUid": "domain1",
            "startupControl": "auto",
            "replicas": 2,
            "asName": "admin-server",
            "serverStartup": [
                {"serverName": "ms1", "desiredState": "ADMIN",
                 "env": [{"name": "JAVA_OPTIONS", "value": "-Xmx1g"}]}
            ],
            "clusterStartup": [{"clusterName": "cluster1", "replicas": 1}]
        }))
        .unwrap();

        assert_eq!(spec.startup_control(), StartupControl::Auto);
        assert_eq!(spec.replicas, 2);
        assert!(spec.is_admin_server("admin-server"));
        assert_eq!(
            spec.server_startup_for("ms1").unwrap().env,
            vec![EnvVar::new(JAVA_OPTIONS, "-Xmx1g")]
        );
        assert_eq!(spec.cluster_startup_for("cluster1").unwrap().replicas, Some(1));
        assert!(spec.cluster_startup_for("cluster2").is_none());
    }
}
