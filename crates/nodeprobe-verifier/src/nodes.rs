use k8s_openapi::api::core::v1::Node;
use nodeprobe_core::{NodeOs, NODE_OS_LABEL};
use tracing::debug;

/// A node picked for probing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeTarget {
    pub name: String,
    pub address: String,
}

/// Address types in order of preference
const ADDRESS_PREFERENCE: &[&str] = &["ExternalIP", "InternalIP"];

/// Pick a representative node address.
///
/// Prefers any node's `ExternalIP`, then falls back to `InternalIP`. Nodes
/// reporting `Ready=False` are skipped, as are nodes of another OS when
/// `os` is set.
pub fn pick_node_address(nodes: &[Node], os: Option<NodeOs>) -> Option<NodeTarget> {
    let candidates: Vec<&Node> = nodes
        .iter()
        .filter(|node| matches_os(node, os) && !is_not_ready(node))
        .collect();

    debug!(
        "Picking node address from {} candidate(s) of {} node(s)",
        candidates.len(),
        nodes.len()
    );

    for address_type in ADDRESS_PREFERENCE {
        for node in &candidates {
            let name = match node.metadata.name.as_deref() {
                Some(n) => n,
                None => continue,
            };

            let address = node
                .status
                .as_ref()
                .and_then(|s| s.addresses.as_ref())
                .and_then(|addrs| {
                    addrs
                        .iter()
                        .find(|a| a.type_ == *address_type && !a.address.is_empty())
                });

            if let Some(address) = address {
                return Some(NodeTarget {
                    name: name.to_string(),
                    address: address.address.clone(),
                });
            }
        }
    }

    None
}

fn matches_os(node: &Node, os: Option<NodeOs>) -> bool {
    let os = match os {
        Some(os) => os,
        None => return true,
    };

    node.metadata
        .labels
        .as_ref()
        .and_then(|labels| labels.get(NODE_OS_LABEL))
        .is_some_and(|value| value == os.label_value())
}

/// Only an explicit `Ready=False` disqualifies; nodes without conditions are kept
fn is_not_ready(node: &Node) -> bool {
    node.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .and_then(|conditions| conditions.iter().find(|c| c.type_ == "Ready"))
        .is_some_and(|c| c.status == "False")
}
