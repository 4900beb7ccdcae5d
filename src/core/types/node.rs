// src/core/types/node.rs

//! Client node records: the per-node credential and scheduling metadata.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use strum_macros::{Display, EnumString};

/// The fingerprinted lifecycle status a client node reports.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, Default,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum NodeStatus {
    #[default]
    Initializing,
    Ready,
    Down,
    Disconnected,
}

/// Fingerprinted compute resources of a node.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct NodeResources {
    pub cpu_shares: u64,
    pub memory_mb: u64,
    pub disk_mb: u64,
}

/// A registered client node. `secret_id` is the node's credential: clients
/// present it on every RPC, and the resolver maps it to a client identity.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Node {
    pub id: String,
    pub secret_id: String,
    pub name: String,
    pub datacenter: String,
    pub node_pool: String,
    pub status: NodeStatus,
    #[serde(default)]
    pub attributes: HashMap<String, String>,
    #[serde(default)]
    pub resources: Option<NodeResources>,
    #[serde(default)]
    pub create_index: u64,
    #[serde(default)]
    pub modify_index: u64,
}

impl Node {
    /// The operating system the node fingerprinted, if known.
    pub fn os_name(&self) -> Option<&str> {
        self.attributes.get("os.name").map(String::as_str)
    }
}

/// A trimmed node returned by list endpoints. Attribute and resource payloads
/// are large, so they are only populated when the caller asks for them.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct NodeListStub {
    pub id: String,
    pub name: String,
    pub datacenter: String,
    pub node_pool: String,
    pub status: NodeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub os: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resources: Option<NodeResources>,
    pub create_index: u64,
    pub modify_index: u64,
}

/// Projection flags for [`NodeListStub`].
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct NodeStubFields {
    #[serde(default)]
    pub os: bool,
    #[serde(default)]
    pub resources: bool,
}

impl Node {
    pub fn stub(&self, fields: NodeStubFields) -> NodeListStub {
        NodeListStub {
            id: self.id.clone(),
            name: self.name.clone(),
            datacenter: self.datacenter.clone(),
            node_pool: self.node_pool.clone(),
            status: self.status,
            os: if fields.os {
                self.os_name().map(str::to_string)
            } else {
                None
            },
            resources: if fields.resources {
                self.resources.clone()
            } else {
                None
            },
            create_index: self.create_index,
            modify_index: self.modify_index,
        }
    }
}
