// src/core/auth/policy.rs

//! Policy rule documents and their compiled form. A policy is a JSON
//! document of namespace blocks, node-pool blocks, and coarse subsystem
//! levels; compilation merges any number of policies into one `Acl`, the
//! capability set every permission check consults. Deny always wins a merge.

use crate::core::errors::DroverError;
use crate::core::types::AclPolicy;
use bitflags::bitflags;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;

bitflags! {
    /// Per-namespace capabilities.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct NsCaps: u32 {
        const LIST_JOBS        = 1 << 0;
        const READ_JOB         = 1 << 1;
        const SUBMIT_JOB       = 1 << 2;
        const DISPATCH_JOB     = 1 << 3;
        const READ_LOGS        = 1 << 4;
        const READ_FS          = 1 << 5;
        const ALLOC_LIFECYCLE  = 1 << 6;
        const READ_SERVICE     = 1 << 7;
        const WRITE_SERVICE    = 1 << 8;
        const CSI_READ_VOLUME  = 1 << 9;
        const CSI_WRITE_VOLUME = 1 << 10;
        const CSI_MOUNT_VOLUME = 1 << 11;
    }
}

bitflags! {
    /// Per-node-pool capabilities.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct PoolCaps: u32 {
        const READ   = 1 << 0;
        const WRITE  = 1 << 1;
        const DELETE = 1 << 2;
    }
}

/// Coarse levels for the subsystems that have no per-object scoping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum PolicyLevel {
    #[default]
    Unset,
    Deny,
    Read,
    Write,
}

impl PolicyLevel {
    fn parse(s: &str) -> Result<Self, DroverError> {
        match s {
            "deny" => Ok(PolicyLevel::Deny),
            "read" => Ok(PolicyLevel::Read),
            "write" => Ok(PolicyLevel::Write),
            other => Err(DroverError::InvalidRequest(format!(
                "invalid policy level \"{other}\""
            ))),
        }
    }

    /// Merge of two levels across policies: an explicit deny beats anything,
    /// otherwise the broader grant wins.
    fn merge(self, other: PolicyLevel) -> PolicyLevel {
        if self == PolicyLevel::Deny || other == PolicyLevel::Deny {
            PolicyLevel::Deny
        } else {
            self.max(other)
        }
    }

    pub fn allows_read(self) -> bool {
        matches!(self, PolicyLevel::Read | PolicyLevel::Write)
    }

    pub fn allows_write(self) -> bool {
        self == PolicyLevel::Write
    }
}

// --- The raw rule document ---

#[derive(Debug, Deserialize, Default)]
struct PolicyDoc {
    #[serde(default)]
    namespaces: indexmap::IndexMap<String, NamespaceRules>,
    #[serde(default)]
    node_pools: indexmap::IndexMap<String, NodePoolRules>,
    #[serde(default)]
    node: Option<CoarseRules>,
    #[serde(default)]
    agent: Option<CoarseRules>,
    #[serde(default)]
    operator: Option<CoarseRules>,
}

#[derive(Debug, Deserialize, Default)]
struct NamespaceRules {
    #[serde(default)]
    policy: Option<String>,
    #[serde(default)]
    capabilities: Vec<String>,
}

#[derive(Debug, Deserialize, Default)]
struct NodePoolRules {
    #[serde(default)]
    policy: Option<String>,
    #[serde(default)]
    capabilities: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct CoarseRules {
    policy: String,
}

fn ns_cap(name: &str) -> Result<NsCaps, DroverError> {
    Ok(match name {
        "list-jobs" => NsCaps::LIST_JOBS,
        "read-job" => NsCaps::READ_JOB,
        "submit-job" => NsCaps::SUBMIT_JOB,
        "dispatch-job" => NsCaps::DISPATCH_JOB,
        "read-logs" => NsCaps::READ_LOGS,
        "read-fs" => NsCaps::READ_FS,
        "alloc-lifecycle" => NsCaps::ALLOC_LIFECYCLE,
        "read-service" => NsCaps::READ_SERVICE,
        "write-service" => NsCaps::WRITE_SERVICE,
        "csi-read-volume" => NsCaps::CSI_READ_VOLUME,
        "csi-write-volume" => NsCaps::CSI_WRITE_VOLUME,
        "csi-mount-volume" => NsCaps::CSI_MOUNT_VOLUME,
        other => {
            return Err(DroverError::InvalidRequest(format!(
                "invalid namespace capability \"{other}\""
            )));
        }
    })
}

fn ns_policy_caps(level: PolicyLevel) -> NsCaps {
    match level {
        PolicyLevel::Unset | PolicyLevel::Deny => NsCaps::empty(),
        PolicyLevel::Read => {
            NsCaps::LIST_JOBS | NsCaps::READ_JOB | NsCaps::READ_SERVICE | NsCaps::CSI_READ_VOLUME
        }
        PolicyLevel::Write => ns_policy_caps(PolicyLevel::Read)
            | NsCaps::SUBMIT_JOB
            | NsCaps::DISPATCH_JOB
            | NsCaps::READ_LOGS
            | NsCaps::READ_FS
            | NsCaps::ALLOC_LIFECYCLE
            | NsCaps::WRITE_SERVICE
            | NsCaps::CSI_WRITE_VOLUME
            | NsCaps::CSI_MOUNT_VOLUME,
    }
}

fn pool_cap(name: &str) -> Result<PoolCaps, DroverError> {
    Ok(match name {
        "read" => PoolCaps::READ,
        "write" => PoolCaps::WRITE,
        "delete" => PoolCaps::DELETE,
        other => {
            return Err(DroverError::InvalidRequest(format!(
                "invalid node pool capability \"{other}\""
            )));
        }
    })
}

fn pool_policy_caps(level: PolicyLevel) -> PoolCaps {
    match level {
        PolicyLevel::Unset | PolicyLevel::Deny => PoolCaps::empty(),
        PolicyLevel::Read => PoolCaps::READ,
        PolicyLevel::Write => PoolCaps::READ | PoolCaps::WRITE | PoolCaps::DELETE,
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct CapPair<F> {
    allow: F,
    deny: F,
}

/// The compiled capability set of one or more merged policies.
#[derive(Debug, Default)]
pub struct Acl {
    management: bool,
    namespaces: HashMap<String, CapPair<NsCaps>>,
    wildcard_namespaces: Vec<(String, CapPair<NsCaps>)>,
    node_pools: HashMap<String, CapPair<PoolCaps>>,
    wildcard_node_pools: Vec<(String, CapPair<PoolCaps>)>,
    node: PolicyLevel,
    agent: PolicyLevel,
    operator: PolicyLevel,
}

impl Acl {
    /// The universal ACL: every check passes. Used for management tokens,
    /// the leader's loopback identity, and server-to-server calls.
    pub fn management() -> Arc<Acl> {
        Arc::new(Acl {
            management: true,
            ..Default::default()
        })
    }

    /// The capability set a client node gets from its node secret: read
    /// access to node and pool state, nothing namespaced.
    pub fn client() -> Arc<Acl> {
        let mut acl = Acl {
            node: PolicyLevel::Write,
            ..Default::default()
        };
        acl.wildcard_node_pools.push((
            "*".to_string(),
            CapPair {
                allow: PoolCaps::READ,
                deny: PoolCaps::empty(),
            },
        ));
        Arc::new(acl)
    }

    /// The implicit capability set a workload identity holds in its own
    /// namespace, before any `job_acl`-scoped policies are merged in.
    pub fn implicit_workload(namespace: &str) -> Acl {
        let mut acl = Acl::default();
        acl.namespaces.insert(
            namespace.to_string(),
            CapPair {
                allow: NsCaps::LIST_JOBS | NsCaps::READ_JOB | NsCaps::READ_SERVICE,
                deny: NsCaps::empty(),
            },
        );
        acl
    }

    pub fn is_management(&self) -> bool {
        self.management
    }

    /// Compiles and merges any number of policy documents.
    pub fn compile(policies: &[Arc<AclPolicy>]) -> Result<Acl, DroverError> {
        let mut acl = Acl::default();
        for policy in policies {
            let doc: PolicyDoc = serde_json::from_str(&policy.rules).map_err(|e| {
                DroverError::InvalidRequest(format!(
                    "failed to parse rules of policy \"{}\": {e}",
                    policy.name
                ))
            })?;
            acl.merge_doc(&doc)?;
        }
        Ok(acl)
    }

    fn merge_doc(&mut self, doc: &PolicyDoc) -> Result<(), DroverError> {
        for (label, rules) in &doc.namespaces {
            let mut pair = CapPair::<NsCaps>::default();
            if let Some(policy) = &rules.policy {
                let level = PolicyLevel::parse(policy)?;
                if level == PolicyLevel::Deny {
                    pair.deny |= NsCaps::all();
                } else {
                    pair.allow |= ns_policy_caps(level);
                }
            }
            for cap in &rules.capabilities {
                if let Some(denied) = cap.strip_prefix("deny-") {
                    pair.deny |= ns_cap(denied)?;
                } else {
                    pair.allow |= ns_cap(cap)?;
                }
            }
            merge_label(
                &mut self.namespaces,
                &mut self.wildcard_namespaces,
                label,
                pair,
            );
        }

        for (label, rules) in &doc.node_pools {
            let mut pair = CapPair::<PoolCaps>::default();
            if let Some(policy) = &rules.policy {
                let level = PolicyLevel::parse(policy)?;
                if level == PolicyLevel::Deny {
                    pair.deny |= PoolCaps::all();
                } else {
                    pair.allow |= pool_policy_caps(level);
                }
            }
            for cap in &rules.capabilities {
                if let Some(denied) = cap.strip_prefix("deny-") {
                    pair.deny |= pool_cap(denied)?;
                } else {
                    pair.allow |= pool_cap(cap)?;
                }
            }
            merge_label(
                &mut self.node_pools,
                &mut self.wildcard_node_pools,
                label,
                pair,
            );
        }

        if let Some(rules) = &doc.node {
            self.node = self.node.merge(PolicyLevel::parse(&rules.policy)?);
        }
        if let Some(rules) = &doc.agent {
            self.agent = self.agent.merge(PolicyLevel::parse(&rules.policy)?);
        }
        if let Some(rules) = &doc.operator {
            self.operator = self.operator.merge(PolicyLevel::parse(&rules.policy)?);
        }
        Ok(())
    }

    /// Folds another compiled ACL into this one.
    pub fn merge(&mut self, other: &Acl) {
        self.management |= other.management;
        for (label, pair) in &other.namespaces {
            merge_label(
                &mut self.namespaces,
                &mut self.wildcard_namespaces,
                label,
                *pair,
            );
        }
        for (label, pair) in &other.wildcard_namespaces {
            merge_label(
                &mut self.namespaces,
                &mut self.wildcard_namespaces,
                label,
                *pair,
            );
        }
        for (label, pair) in &other.node_pools {
            merge_label(
                &mut self.node_pools,
                &mut self.wildcard_node_pools,
                label,
                *pair,
            );
        }
        for (label, pair) in &other.wildcard_node_pools {
            merge_label(
                &mut self.node_pools,
                &mut self.wildcard_node_pools,
                label,
                *pair,
            );
        }
        self.node = self.node.merge(other.node);
        self.agent = self.agent.merge(other.agent);
        self.operator = self.operator.merge(other.operator);
    }

    /// Checks a namespace capability. The wildcard namespace `*` asks
    /// whether *any* namespace rule grants the capability, which list
    /// endpoints use as a fast pre-check before per-record filtering.
    pub fn allow_namespace_op(&self, namespace: &str, cap: NsCaps) -> bool {
        if self.management {
            return true;
        }
        if namespace == "*" {
            return self
                .namespaces
                .values()
                .chain(self.wildcard_namespaces.iter().map(|(_, p)| p))
                .any(|p| p.allow.contains(cap) && !p.deny.contains(cap));
        }
        match resolve_label(&self.namespaces, &self.wildcard_namespaces, namespace) {
            Some(pair) => pair.allow.contains(cap) && !pair.deny.contains(cap),
            None => false,
        }
    }

    pub fn allow_node_pool_op(&self, pool: &str, cap: PoolCaps) -> bool {
        if self.management {
            return true;
        }
        match resolve_label(&self.node_pools, &self.wildcard_node_pools, pool) {
            Some(pair) => pair.allow.contains(cap) && !pair.deny.contains(cap),
            None => false,
        }
    }

    pub fn allow_node_read(&self) -> bool {
        self.management || self.node.allows_read()
    }

    pub fn allow_node_write(&self) -> bool {
        self.management || self.node.allows_write()
    }

    pub fn allow_agent_read(&self) -> bool {
        self.management || self.agent.allows_read()
    }

    pub fn allow_operator_read(&self) -> bool {
        self.management || self.operator.allows_read()
    }
}

fn merge_label<F>(
    exact: &mut HashMap<String, CapPair<F>>,
    wildcard: &mut Vec<(String, CapPair<F>)>,
    label: &str,
    pair: CapPair<F>,
) where
    F: bitflags::Flags + Copy + Default,
{
    let fold = |slot: &mut CapPair<F>| {
        slot.allow = slot.allow.union(pair.allow);
        slot.deny = slot.deny.union(pair.deny);
    };
    if label.contains('*') {
        if let Some((_, slot)) = wildcard.iter_mut().find(|(l, _)| l == label) {
            fold(slot);
        } else {
            wildcard.push((label.to_string(), pair));
        }
    } else {
        fold(exact.entry(label.to_string()).or_default());
    }
}

/// Exact label match first; otherwise the matching glob with the most
/// literal characters wins (greatest specificity).
fn resolve_label<'a, F>(
    exact: &'a HashMap<String, CapPair<F>>,
    wildcard: &'a [(String, CapPair<F>)],
    name: &str,
) -> Option<&'a CapPair<F>> {
    if let Some(pair) = exact.get(name) {
        return Some(pair);
    }
    wildcard
        .iter()
        .filter(|(pattern, _)| glob_match(pattern, name))
        .max_by_key(|(pattern, _)| pattern.chars().filter(|c| *c != '*').count())
        .map(|(_, pair)| pair)
}

/// Glob matching with `*` as the only metacharacter.
pub fn glob_match(pattern: &str, name: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return pattern == name;
    }
    let mut rest = name;
    for (i, part) in parts.iter().enumerate() {
        if part.is_empty() {
            continue;
        }
        if i == 0 {
            match rest.strip_prefix(part) {
                Some(r) => rest = r,
                None => return false,
            }
        } else if i == parts.len() - 1 {
            return rest.ends_with(part);
        } else {
            match rest.find(part) {
                Some(pos) => rest = &rest[pos + part.len()..],
                None => return false,
            }
        }
    }
    // The pattern ends with `*`, so any remainder matches.
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(name: &str, rules: &str) -> Arc<AclPolicy> {
        Arc::new(AclPolicy {
            name: name.to_string(),
            rules: rules.to_string(),
            ..Default::default()
        })
    }

    #[test]
    fn presets_expand() {
        let acl = Acl::compile(&[policy(
            "reader",
            r#"{"namespaces": {"default": {"policy": "read"}}}"#,
        )])
        .unwrap();
        assert!(acl.allow_namespace_op("default", NsCaps::READ_JOB));
        assert!(!acl.allow_namespace_op("default", NsCaps::SUBMIT_JOB));
        assert!(!acl.allow_namespace_op("other", NsCaps::READ_JOB));
    }

    #[test]
    fn deny_wins_merge() {
        let acl = Acl::compile(&[
            policy("writer", r#"{"namespaces": {"default": {"policy": "write"}}}"#),
            policy(
                "no-submit",
                r#"{"namespaces": {"default": {"capabilities": ["deny-submit-job"]}}}"#,
            ),
        ])
        .unwrap();
        assert!(acl.allow_namespace_op("default", NsCaps::READ_JOB));
        assert!(!acl.allow_namespace_op("default", NsCaps::SUBMIT_JOB));
    }

    #[test]
    fn wildcard_specificity() {
        let acl = Acl::compile(&[policy(
            "pools",
            r#"{"node_pools": {"*": {"policy": "read"}, "prod-*": {"policy": "write"}}}"#,
        )])
        .unwrap();
        assert!(acl.allow_node_pool_op("dev-1", PoolCaps::READ));
        assert!(!acl.allow_node_pool_op("dev-1", PoolCaps::DELETE));
        assert!(acl.allow_node_pool_op("prod-3", PoolCaps::DELETE));
    }

    #[test]
    fn management_passes_everything() {
        let acl = Acl::management();
        assert!(acl.allow_namespace_op("anything", NsCaps::SUBMIT_JOB));
        assert!(acl.allow_node_pool_op("anything", PoolCaps::DELETE));
        assert!(acl.allow_node_write());
    }

    #[test]
    fn glob_matching() {
        assert!(glob_match("*", "anything"));
        assert!(glob_match("prod-*", "prod-3"));
        assert!(!glob_match("prod-*", "dev-3"));
        assert!(glob_match("*-web-*", "prod-web-1"));
        assert!(glob_match("exact", "exact"));
        assert!(!glob_match("exact", "exactly"));
    }
}
