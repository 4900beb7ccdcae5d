// src/core/types/node_pool.rs

//! Node pools: named subsets of client nodes that jobs schedule into.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The assignable built-in pool every node lands in unless configured otherwise.
pub const NODE_POOL_DEFAULT: &str = "default";

/// The pseudo-pool that matches every node. Not assignable and never deletable.
pub const NODE_POOL_ALL: &str = "all";

/// A named subset of nodes. Jobs declare which pool they target; the
/// scheduler only places their allocations on nodes in that pool.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct NodePool {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub meta: HashMap<String, String>,
    #[serde(default)]
    pub create_index: u64,
    #[serde(default)]
    pub modify_index: u64,
}

impl NodePool {
    pub fn new(name: impl Into<String>) -> Self {
        NodePool {
            name: name.into(),
            ..Default::default()
        }
    }

    /// True for the reserved pools that exist at all times and reject writes.
    pub fn is_built_in(&self) -> bool {
        matches!(self.name.as_str(), NODE_POOL_DEFAULT | NODE_POOL_ALL)
    }
}

static VALID_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z0-9_-]{1,128}$").expect("valid node pool name pattern"));

/// Validates a user-supplied pool name: 1-128 characters drawn from
/// `[a-zA-Z0-9-_]`.
pub fn validate_node_pool_name(name: &str) -> bool {
    VALID_NAME.is_match(name)
}
