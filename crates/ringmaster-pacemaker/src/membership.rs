//! Cluster membership as reported by `crm_node -l`
//!
//! Nodes are read fresh on every call; nothing is cached between actions.

use tracing::{info, warn};

use ringmaster_common::{CommandRunner, MemberStatus, Result};

use crate::cib::CibAdmin;

/// One row of the node registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterNode {
    pub id: String,
    pub name: String,
    pub status: MemberStatus,
}

impl ClusterNode {
    /// Parse `<id> <name> <status>`; `None` for anything else
    pub fn parse(line: &str) -> Option<Self> {
        let mut fields = line.split_whitespace();
        let (id, name, status) = (fields.next()?, fields.next()?, fields.next()?);
        if fields.next().is_some() {
            return None;
        }
        Some(Self {
            id: id.to_string(),
            name: name.to_string(),
            status: MemberStatus::from(status),
        })
    }
}

/// Parse registry output, skipping blank and malformed lines
pub fn parse_node_list(output: &str) -> Vec<ClusterNode> {
    output
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| {
            let node = ClusterNode::parse(line);
            if node.is_none() {
                warn!("Skipping malformed node registry line: {:?}", line);
            }
            node
        })
        .collect()
}

/// Nodes that count toward cluster size: members plus lost members
pub fn count_nodes(nodes: &[ClusterNode]) -> usize {
    nodes
        .iter()
        .filter(|node| node.status.counts_toward_size())
        .count()
}

/// True if the resource manager answers `crm status`
pub fn cluster_reachable(runner: &dyn CommandRunner) -> Result<bool> {
    Ok(runner.run("crm", &["status"])?.is_success())
}

pub struct NodeRegistry<'a> {
    runner: &'a dyn CommandRunner,
}

impl<'a> NodeRegistry<'a> {
    pub fn new(runner: &'a dyn CommandRunner) -> Self {
        Self { runner }
    }

    pub fn list_nodes(&self) -> Result<Vec<ClusterNode>> {
        let output = self.runner.try_run("crm_node", &["-l"])?;
        Ok(parse_node_list(&output))
    }

    pub fn node_count(&self) -> Result<usize> {
        Ok(count_nodes(&self.list_nodes()?))
    }

    /// Evict `name` from the registry and drop its CIB entries.
    ///
    /// A name missing from the registry skips the eviction but still clears
    /// the CIB, so repeating a partially failed removal converges.
    pub fn remove_node(&self, cib: &CibAdmin<'_>, name: &str) -> Result<()> {
        match self.list_nodes()?.into_iter().find(|node| node.name == name) {
            Some(node) => {
                self.runner.try_run("crm_node", &["--force", "-R", &node.id])?;
                info!("Removed node {} (id {}) from the registry", name, node.id);
            }
            None => info!("Node {} is not in the registry", name),
        }
        cib.delete_node_entries(name)
    }
}
