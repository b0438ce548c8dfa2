//! Fencing agent attributes and the cluster fencing primitive
//!
//! Each node carries the fence agents that can power it off as node
//! attributes named `fence_<idx>_<attribute>`. The cluster-wide fencing
//! primitive dispatches to them.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;
use tracing::{debug, info};

use ringmaster_common::{CommandRunner, HaError, Result};

use crate::cib::CibAdmin;
use crate::membership::{NodeRegistry, cluster_reachable};

pub const FENCE_PRIMITIVE: &str = "st-fencing";
pub const DEFAULT_FENCE_AGENT: &str = "stonith:fence_chroma";

const FENCE_ATTRIBUTE_PREFIX: &str = "fence_";

static NODE_ENTRY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<node\b([^>]*?)(?:/>|>(.*?)</node>)").expect("Invalid regex pattern")
});

static UNAME_ATTR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"\buname="([^"]*)""#).expect("Invalid regex pattern"));

static FENCE_NVPAIR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<nvpair\b[^>]*\bname="(fence_[^"]*)""#).expect("Invalid regex pattern")
});

/// One fence agent's settings at position `index`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FencingAgentSpec {
    pub index: usize,
    pub attributes: Vec<(String, String)>,
}

impl FencingAgentSpec {
    /// CIB attribute key for `attribute`
    pub fn key(&self, attribute: &str) -> String {
        fence_attribute_key(self.index, attribute)
    }
}

pub fn fence_attribute_key(index: usize, attribute: &str) -> String {
    format!("{}{}_{}", FENCE_ATTRIBUTE_PREFIX, index, attribute)
}

/// Parse a JSON array of agent objects, e.g.
/// `[{"agent": "fence_apc", "login": "admin", "port": 3}]`
pub fn parse_fencing_agents(json: &str) -> Result<Vec<FencingAgentSpec>> {
    let value: Value = serde_json::from_str(json)
        .map_err(|e| HaError::configuration(format!("invalid fencing agents: {}", e)))?;
    let Value::Array(agents) = value else {
        return Err(HaError::configuration("fencing agents must be a JSON array"));
    };

    agents
        .into_iter()
        .enumerate()
        .map(|(index, agent)| {
            let Value::Object(map) = agent else {
                return Err(HaError::configuration(format!(
                    "fencing agent {} is not an object",
                    index
                )));
            };
            let attributes = map
                .into_iter()
                .map(|(name, value)| Ok((name, attribute_value(index, value)?)))
                .collect::<Result<Vec<_>>>()?;
            Ok(FencingAgentSpec { index, attributes })
        })
        .collect()
}

fn attribute_value(index: usize, value: Value) -> Result<String> {
    match value {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        other => Err(HaError::configuration(format!(
            "fencing agent {}: unsupported attribute value {}",
            index, other
        ))),
    }
}

/// Per-node fence attribute storage
pub trait FenceAttributeStore {
    fn clear_fence_attributes(&self, node: &str) -> Result<()>;
    fn set_fence_attribute(&self, node: &str, key: &str, value: &str) -> Result<()>;
}

/// Replace every fence attribute on `node` with those of `agents`
pub fn configure_fencing(
    store: &dyn FenceAttributeStore,
    node: &str,
    agents: &[FencingAgentSpec],
) -> Result<()> {
    store.clear_fence_attributes(node)?;
    for agent in agents {
        for (attribute, value) in &agent.attributes {
            store.set_fence_attribute(node, &agent.key(attribute), value)?;
        }
    }
    info!("Configured {} fence agent(s) on {}", agents.len(), node);
    Ok(())
}

/// Fence attribute names currently set on `node` in a `nodes` section dump
pub fn fence_attribute_names(nodes_xml: &str, node: &str) -> Vec<String> {
    NODE_ENTRY
        .captures_iter(nodes_xml)
        .filter(|caps| {
            UNAME_ATTR
                .captures(&caps[1])
                .is_some_and(|uname| &uname[1] == node)
        })
        .filter_map(|caps| caps.get(2))
        .flat_map(|body| FENCE_NVPAIR.captures_iter(body.as_str()))
        .map(|caps| caps[1].to_string())
        .collect()
}

/// `FenceAttributeStore` backed by `crm_attribute` and the CIB
pub struct CibFenceAttributes<'a> {
    runner: &'a dyn CommandRunner,
    cib: &'a CibAdmin<'a>,
}

impl<'a> CibFenceAttributes<'a> {
    pub fn new(runner: &'a dyn CommandRunner, cib: &'a CibAdmin<'a>) -> Self {
        Self { runner, cib }
    }
}

impl FenceAttributeStore for CibFenceAttributes<'_> {
    fn clear_fence_attributes(&self, node: &str) -> Result<()> {
        let nodes = self.cib.query_nodes()?;
        for name in fence_attribute_names(&nodes, node) {
            debug!("Deleting {} from {}", name, node);
            self.runner.try_run(
                "crm_attribute",
                &["--type", "nodes", "--node", node, "--name", &name, "--delete"],
            )?;
        }
        Ok(())
    }

    fn set_fence_attribute(&self, node: &str, key: &str, value: &str) -> Result<()> {
        self.runner.try_run(
            "crm_attribute",
            &["--type", "nodes", "--node", node, "--name", key, "--update", value],
        )?;
        Ok(())
    }
}

/// Stop and delete the fencing primitive, ignoring failures
pub fn reset_fencing_primitive(runner: &dyn CommandRunner, primitive: &str) -> Result<()> {
    runner.run("crm", &["resource", "stop", primitive])?;
    runner.run("crm", &["configure", "delete", primitive])?;
    Ok(())
}

/// Drop the fencing primitive, but only when this is the last node.
///
/// Does nothing if the resource manager is not answering.
pub fn unconfigure_fencing(runner: &dyn CommandRunner, primitive: &str) -> Result<()> {
    if !cluster_reachable(runner)? {
        debug!("Resource manager not running; leaving fencing alone");
        return Ok(());
    }
    if NodeRegistry::new(runner).node_count()? > 1 {
        debug!("Other nodes remain; leaving fencing alone");
        return Ok(());
    }
    reset_fencing_primitive(runner, primitive)?;
    info!("Removed fencing primitive {}", primitive);
    Ok(())
}
