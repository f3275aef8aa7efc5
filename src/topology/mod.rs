// clustervault/src/topology/mod.rs
//
// The topology manager is an external collaborator: it knows which node is
// the writable primary, which replicas are safe to read from, and which
// workers exist behind a sharded coordinator. The static implementation is
// config-backed; health is probed through the engine at selection time.

use crate::config::{TopologyConfig, TopologyMode};
use crate::errors::{AppError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeRole {
    Single,
    Primary,
    Replica,
    Coordinator,
    Worker,
}

impl NodeRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Single => "single",
            Self::Primary => "primary",
            Self::Replica => "replica",
            Self::Coordinator => "coordinator",
            Self::Worker => "worker",
        }
    }
}

#[derive(Debug, Clone)]
pub struct NodeRef {
    pub name: String,
    pub url: String,
    pub role: NodeRole,
}

impl NodeRef {
    fn from_url(url: &str, role: NodeRole) -> Self {
        let name = match url::Url::parse(url) {
            Ok(parsed) => {
                let host = parsed.host_str().unwrap_or("unknown-host").to_string();
                match parsed.port() {
                    Some(port) => format!("{}:{}", host, port),
                    None => host,
                }
            }
            Err(_) => url.to_string(),
        };
        Self {
            name,
            url: url.to_string(),
            role,
        }
    }
}

pub trait ClusterTopology: Send + Sync {
    fn mode(&self) -> TopologyMode;

    /// The node that accepts writes. Always present.
    fn writable_primary(&self) -> Result<NodeRef>;

    /// Replicas that are candidates for a production-safe read, in
    /// preference order.
    fn replicas(&self) -> Vec<NodeRef>;

    /// Sharded only: the query-routing coordinator.
    fn coordinator(&self) -> Result<NodeRef>;

    /// Sharded only: the shard-holding workers.
    fn workers(&self) -> Vec<NodeRef>;
}

/// Config-backed topology. Deployments with a dynamic topology manager
/// would implement `ClusterTopology` against its API instead.
pub struct StaticTopology {
    config: TopologyConfig,
}

impl StaticTopology {
    pub fn new(config: TopologyConfig) -> Self {
        Self { config }
    }
}

impl ClusterTopology for StaticTopology {
    fn mode(&self) -> TopologyMode {
        self.config.mode
    }

    fn writable_primary(&self) -> Result<NodeRef> {
        match self.config.mode {
            TopologyMode::SingleNode => {
                let url = self.config.source_database_url.as_ref().ok_or_else(|| {
                    AppError::Config("single-node topology has no source_database_url".to_string())
                })?;
                Ok(NodeRef::from_url(url, NodeRole::Single))
            }
            TopologyMode::Sharded => self.coordinator(),
            TopologyMode::HaReplicated => {
                let url = self.config.primary_url.as_ref().ok_or_else(|| {
                    AppError::Config("ha-replicated topology has no primary_url".to_string())
                })?;
                Ok(NodeRef::from_url(url, NodeRole::Primary))
            }
        }
    }

    fn replicas(&self) -> Vec<NodeRef> {
        self.config
            .replica_urls
            .iter()
            .map(|url| NodeRef::from_url(url, NodeRole::Replica))
            .collect()
    }

    fn coordinator(&self) -> Result<NodeRef> {
        let url = self.config.coordinator_url.as_ref().ok_or_else(|| {
            AppError::Config("topology has no coordinator_url".to_string())
        })?;
        Ok(NodeRef::from_url(url, NodeRole::Coordinator))
    }

    fn workers(&self) -> Vec<NodeRef> {
        self.config
            .worker_urls
            .iter()
            .map(|url| NodeRef::from_url(url, NodeRole::Worker))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ha_config() -> TopologyConfig {
        TopologyConfig {
            mode: TopologyMode::HaReplicated,
            source_database_url: None,
            coordinator_url: None,
            worker_urls: vec![],
            primary_url: Some("postgres://vault@primary:5432/app".to_string()),
            replica_urls: vec![
                "postgres://vault@replica1:5432/app".to_string(),
                "postgres://vault@replica2:5433/app".to_string(),
            ],
        }
    }

    #[test]
    fn test_ha_topology_nodes() -> Result<()> {
        let topology = StaticTopology::new(ha_config());
        let primary = topology.writable_primary()?;
        assert_eq!(primary.role, NodeRole::Primary);
        assert_eq!(primary.name, "primary:5432");

        let replicas = topology.replicas();
        assert_eq!(replicas.len(), 2);
        assert_eq!(replicas[1].name, "replica2:5433");
        Ok(())
    }

    #[test]
    fn test_sharded_topology_requires_coordinator() {
        let topology = StaticTopology::new(TopologyConfig {
            mode: TopologyMode::Sharded,
            source_database_url: None,
            coordinator_url: None,
            worker_urls: vec!["postgres://vault@worker1:5432/app".to_string()],
            primary_url: None,
            replica_urls: vec![],
        });
        assert!(topology.coordinator().is_err());
        assert_eq!(topology.workers().len(), 1);
    }
}
