// src/core/store/tables.rs

//! Typed accessors over the generic transaction primitives: one reader and
//! one mutator family per table. Mutators stamp `create_index`/`modify_index`
//! and record the table's last write in the meta table; this is the only
//! layer the FSM and the endpoints go through.

use crate::core::errors::DroverError;
use crate::core::store::schema::{
    TABLE_ACL_POLICIES, TABLE_ACL_ROLES, TABLE_ACL_TOKENS, TABLE_ALLOCS, TABLE_CSI_VOLUMES,
    TABLE_JOBS, TABLE_NODE_POOLS, TABLE_NODES,
};
use crate::core::store::txn::{ReadTxn, RecordIter, WriteTxn};
use crate::core::store::watch::WatchSet;
use crate::core::types::volume::{CsiClaimMode, CsiClaimState, CsiVolumeView};
use crate::core::types::{
    AclPolicy, AclRole, AclToken, Allocation, CsiVolume, CsiVolumeClaim, Job, Node, NodePool,
    Record,
};
use std::collections::HashMap;
use std::sync::Arc;

macro_rules! unwrap_record {
    ($record:expr, $variant:ident) => {
        match $record {
            Record::$variant(inner) => inner,
            other => panic!("schema violation: unexpected record {:?}", other),
        }
    };
}

/// Adapts a [`RecordIter`] to a typed record iterator.
fn typed<T, F>(iter: RecordIter, f: F) -> impl Iterator<Item = Arc<T>>
where
    F: Fn(Record) -> Arc<T>,
{
    iter.map(move |(_, r)| f(r))
}

fn as_node_pool(r: Record) -> Arc<NodePool> {
    unwrap_record!(r, NodePool)
}

fn as_node(r: Record) -> Arc<Node> {
    unwrap_record!(r, Node)
}

fn as_job(r: Record) -> Arc<Job> {
    unwrap_record!(r, Job)
}

fn as_alloc(r: Record) -> Arc<Allocation> {
    unwrap_record!(r, Alloc)
}

fn as_policy(r: Record) -> Arc<AclPolicy> {
    unwrap_record!(r, AclPolicy)
}

fn as_role(r: Record) -> Arc<AclRole> {
    unwrap_record!(r, AclRole)
}

fn as_token(r: Record) -> Arc<AclToken> {
    unwrap_record!(r, AclToken)
}

fn as_volume(r: Record) -> Arc<CsiVolume> {
    unwrap_record!(r, Volume)
}

impl ReadTxn {
    // --- Node pools ---

    pub fn node_pool_by_name(&self, name: &str) -> Result<Option<Arc<NodePool>>, DroverError> {
        Ok(self.first(TABLE_NODE_POOLS, "id", &[name])?.map(as_node_pool))
    }

    pub fn node_pool_by_name_watch(
        &self,
        name: &str,
        ws: &mut WatchSet,
    ) -> Result<Option<Arc<NodePool>>, DroverError> {
        Ok(self
            .first_watch(TABLE_NODE_POOLS, "id", &[name], ws)?
            .map(as_node_pool))
    }

    /// Node pools whose name starts with `prefix`, ascending by name.
    pub fn node_pools_by_prefix(
        &self,
        prefix: &str,
        ws: &mut WatchSet,
    ) -> Result<Box<dyn Iterator<Item = Arc<NodePool>>>, DroverError> {
        Ok(Box::new(typed(
            self.get_prefix_watch(TABLE_NODE_POOLS, "id", &[prefix], ws)?,
            as_node_pool,
        )))
    }

    /// Descending variant of [`ReadTxn::node_pools_by_prefix`].
    pub fn node_pools_by_prefix_reverse(
        &self,
        prefix: &str,
        ws: &mut WatchSet,
    ) -> Result<Box<dyn Iterator<Item = Arc<NodePool>>>, DroverError> {
        self.watch_table(TABLE_NODE_POOLS, ws);
        Ok(Box::new(typed(
            self.get_prefix_reverse(TABLE_NODE_POOLS, "id", &[prefix])?,
            as_node_pool,
        )))
    }

    // --- Nodes ---

    pub fn node_by_id(&self, id: &str) -> Result<Option<Arc<Node>>, DroverError> {
        Ok(self.first(TABLE_NODES, "id", &[id])?.map(as_node))
    }

    pub fn node_by_secret(&self, secret: &str) -> Result<Option<Arc<Node>>, DroverError> {
        Ok(self.first(TABLE_NODES, "secret_id", &[secret])?.map(as_node))
    }

    /// All nodes in a pool, in node-id order. The built-in `all` pseudo-pool
    /// matches every node.
    pub fn nodes_in_pool(
        &self,
        pool: &str,
        ws: &mut WatchSet,
    ) -> Result<Box<dyn Iterator<Item = Arc<Node>>>, DroverError> {
        if pool == crate::core::types::node_pool::NODE_POOL_ALL {
            self.watch_table(TABLE_NODES, ws);
            return Ok(Box::new(typed(
                self.get_prefix(TABLE_NODES, "id", &[""])?,
                as_node,
            )));
        }
        Ok(Box::new(typed(
            self.get_watch(TABLE_NODES, "node_pool", &[pool], ws)?,
            as_node,
        )))
    }

    /// True when at least one node is a member of the pool.
    pub fn pool_has_nodes(&self, pool: &str) -> Result<bool, DroverError> {
        Ok(self.first(TABLE_NODES, "node_pool", &[pool])?.is_some())
    }

    // --- Jobs ---

    pub fn job_by_id(&self, namespace: &str, id: &str) -> Result<Option<Arc<Job>>, DroverError> {
        Ok(self.first(TABLE_JOBS, "id", &[namespace, id])?.map(as_job))
    }

    /// Jobs scheduled into a pool, ordered by (namespace, job id).
    pub fn jobs_in_pool(
        &self,
        pool: &str,
        ws: &mut WatchSet,
    ) -> Result<Box<dyn Iterator<Item = Arc<Job>>>, DroverError> {
        Ok(Box::new(typed(
            self.get_watch(TABLE_JOBS, "node_pool", &[pool], ws)?,
            as_job,
        )))
    }

    /// True when the pool is occupied by at least one non-terminal job.
    pub fn pool_has_live_jobs(&self, pool: &str) -> Result<bool, DroverError> {
        for (_, record) in self.get(TABLE_JOBS, "node_pool", &[pool])? {
            if !as_job(record).is_terminal() {
                return Ok(true);
            }
        }
        Ok(false)
    }

    // --- Allocations ---

    pub fn alloc_by_id(&self, id: &str) -> Result<Option<Arc<Allocation>>, DroverError> {
        Ok(self.first(TABLE_ALLOCS, "id", &[id])?.map(as_alloc))
    }

    pub fn allocs_by_job(
        &self,
        namespace: &str,
        job_id: &str,
    ) -> Result<Box<dyn Iterator<Item = Arc<Allocation>>>, DroverError> {
        Ok(Box::new(typed(
            self.get(TABLE_ALLOCS, "job", &[namespace, job_id])?,
            as_alloc,
        )))
    }

    // --- ACL ---

    pub fn acl_token_by_secret(&self, secret: &str) -> Result<Option<Arc<AclToken>>, DroverError> {
        Ok(self.first(TABLE_ACL_TOKENS, "id", &[secret])?.map(as_token))
    }

    pub fn acl_token_by_accessor(
        &self,
        accessor: &str,
    ) -> Result<Option<Arc<AclToken>>, DroverError> {
        Ok(self
            .first(TABLE_ACL_TOKENS, "accessor", &[accessor])?
            .map(as_token))
    }

    pub fn acl_policy_by_name(&self, name: &str) -> Result<Option<Arc<AclPolicy>>, DroverError> {
        Ok(self.first(TABLE_ACL_POLICIES, "id", &[name])?.map(as_policy))
    }

    /// Every policy, in name order. The claims resolver scans these for
    /// matching workload scopes.
    pub fn acl_policies(&self) -> Result<Box<dyn Iterator<Item = Arc<AclPolicy>>>, DroverError> {
        Ok(Box::new(typed(
            self.get_prefix(TABLE_ACL_POLICIES, "id", &[""])?,
            as_policy,
        )))
    }

    pub fn acl_role_by_id(&self, id: &str) -> Result<Option<Arc<AclRole>>, DroverError> {
        Ok(self.first(TABLE_ACL_ROLES, "id", &[id])?.map(as_role))
    }

    pub fn acl_role_by_name(&self, name: &str) -> Result<Option<Arc<AclRole>>, DroverError> {
        Ok(self.first(TABLE_ACL_ROLES, "name", &[name])?.map(as_role))
    }

    // --- CSI volumes ---

    pub fn csi_volume(
        &self,
        namespace: &str,
        id: &str,
    ) -> Result<Option<Arc<CsiVolume>>, DroverError> {
        Ok(self
            .first(TABLE_CSI_VOLUMES, "id", &[namespace, id])?
            .map(as_volume))
    }

    /// Every volume, watching the whole table; the volume watcher's top loop
    /// re-runs on any volume write.
    pub fn csi_volumes(
        &self,
        ws: &mut WatchSet,
    ) -> Result<Box<dyn Iterator<Item = Arc<CsiVolume>>>, DroverError> {
        Ok(Box::new(typed(
            self.get_prefix_watch(TABLE_CSI_VOLUMES, "id", &[""], ws)?,
            as_volume,
        )))
    }

    /// Joins a volume with the allocation records its claims reference.
    /// Garbage-collected allocations resolve to `None`.
    pub fn csi_volume_denormalize(
        &self,
        volume: Arc<CsiVolume>,
    ) -> Result<CsiVolumeView, DroverError> {
        let mut allocs = HashMap::new();
        for (alloc_id, _) in volume.live_claims() {
            allocs.insert(alloc_id.clone(), self.alloc_by_id(alloc_id)?);
        }
        for alloc_id in volume.past_claims.keys() {
            if !allocs.contains_key(alloc_id) {
                allocs.insert(alloc_id.clone(), self.alloc_by_id(alloc_id)?);
            }
        }
        Ok(CsiVolumeView { volume, allocs })
    }
}

impl WriteTxn {
    // --- Node pools ---

    pub fn upsert_node_pool(&mut self, mut pool: NodePool) -> Result<(), DroverError> {
        let existing = self.view().node_pool_by_name(&pool.name)?;
        pool.create_index = existing.map_or(self.index(), |e| e.create_index);
        pool.modify_index = self.index();
        self.insert(TABLE_NODE_POOLS, Record::NodePool(Arc::new(pool)))?;
        self.bump_index(TABLE_NODE_POOLS)
    }

    pub fn delete_node_pool(&mut self, name: &str) -> Result<(), DroverError> {
        if !self.delete(TABLE_NODE_POOLS, &[name])? {
            return Err(DroverError::NotFound);
        }
        self.bump_index(TABLE_NODE_POOLS)
    }

    // --- Nodes ---

    pub fn upsert_node(&mut self, mut node: Node) -> Result<(), DroverError> {
        let existing = self.view().node_by_id(&node.id)?;
        node.create_index = existing.map_or(self.index(), |e| e.create_index);
        node.modify_index = self.index();
        if node.node_pool.is_empty() {
            node.node_pool = crate::core::types::node_pool::NODE_POOL_DEFAULT.to_string();
        }
        self.insert(TABLE_NODES, Record::Node(Arc::new(node)))?;
        self.bump_index(TABLE_NODES)
    }

    pub fn delete_node(&mut self, id: &str) -> Result<(), DroverError> {
        if !self.delete(TABLE_NODES, &[id])? {
            return Err(DroverError::UnknownNode(id.to_string()));
        }
        self.bump_index(TABLE_NODES)
    }

    // --- Jobs ---

    pub fn upsert_job(&mut self, mut job: Job) -> Result<(), DroverError> {
        let existing = self.view().job_by_id(&job.namespace, &job.id)?;
        job.create_index = existing.map_or(self.index(), |e| e.create_index);
        job.modify_index = self.index();
        if job.node_pool.is_empty() {
            job.node_pool = crate::core::types::node_pool::NODE_POOL_DEFAULT.to_string();
        }
        self.insert(TABLE_JOBS, Record::Job(Arc::new(job)))?;
        self.bump_index(TABLE_JOBS)
    }

    pub fn delete_job(&mut self, namespace: &str, id: &str) -> Result<(), DroverError> {
        if !self.delete(TABLE_JOBS, &[namespace, id])? {
            return Err(DroverError::NotFound);
        }
        self.bump_index(TABLE_JOBS)
    }

    // --- Allocations ---

    pub fn upsert_alloc(&mut self, mut alloc: Allocation) -> Result<(), DroverError> {
        let existing = self.view().alloc_by_id(&alloc.id)?;
        alloc.create_index = existing.map_or(self.index(), |e| e.create_index);
        alloc.modify_index = self.index();
        self.insert(TABLE_ALLOCS, Record::Alloc(Arc::new(alloc)))?;
        self.bump_index(TABLE_ALLOCS)
    }

    pub fn delete_alloc(&mut self, id: &str) -> Result<(), DroverError> {
        if !self.delete(TABLE_ALLOCS, &[id])? {
            return Err(DroverError::NotFound);
        }
        self.bump_index(TABLE_ALLOCS)
    }

    // --- ACL ---

    pub fn upsert_acl_token(&mut self, mut token: AclToken) -> Result<(), DroverError> {
        let existing = self.view().acl_token_by_secret(&token.secret_id)?;
        token.create_index = existing.map_or(self.index(), |e| e.create_index);
        token.modify_index = self.index();
        self.insert(TABLE_ACL_TOKENS, Record::AclToken(Arc::new(token)))?;
        self.bump_index(TABLE_ACL_TOKENS)
    }

    pub fn delete_acl_token_by_accessor(&mut self, accessor: &str) -> Result<(), DroverError> {
        let Some(token) = self.view().acl_token_by_accessor(accessor)? else {
            return Err(DroverError::NotFound);
        };
        self.delete(TABLE_ACL_TOKENS, &[&token.secret_id])?;
        self.bump_index(TABLE_ACL_TOKENS)
    }

    pub fn upsert_acl_policy(&mut self, mut policy: AclPolicy) -> Result<(), DroverError> {
        let existing = self.view().acl_policy_by_name(&policy.name)?;
        policy.create_index = existing.map_or(self.index(), |e| e.create_index);
        policy.modify_index = self.index();
        self.insert(TABLE_ACL_POLICIES, Record::AclPolicy(Arc::new(policy)))?;
        self.bump_index(TABLE_ACL_POLICIES)
    }

    pub fn delete_acl_policy(&mut self, name: &str) -> Result<(), DroverError> {
        if !self.delete(TABLE_ACL_POLICIES, &[name])? {
            return Err(DroverError::NotFound);
        }
        self.bump_index(TABLE_ACL_POLICIES)
    }

    pub fn upsert_acl_role(&mut self, mut role: AclRole) -> Result<(), DroverError> {
        let existing = self.view().acl_role_by_id(&role.id)?;
        role.create_index = existing.map_or(self.index(), |e| e.create_index);
        role.modify_index = self.index();
        self.insert(TABLE_ACL_ROLES, Record::AclRole(Arc::new(role)))?;
        self.bump_index(TABLE_ACL_ROLES)
    }

    pub fn delete_acl_role(&mut self, id: &str) -> Result<(), DroverError> {
        if !self.delete(TABLE_ACL_ROLES, &[id])? {
            return Err(DroverError::NotFound);
        }
        self.bump_index(TABLE_ACL_ROLES)
    }

    // --- CSI volumes ---

    pub fn csi_volume_register(&mut self, mut volume: CsiVolume) -> Result<(), DroverError> {
        let existing = self.view().csi_volume(&volume.namespace, &volume.id)?;
        volume.create_index = existing.map_or(self.index(), |e| e.create_index);
        volume.modify_index = self.index();
        self.insert(TABLE_CSI_VOLUMES, Record::Volume(Arc::new(volume)))?;
        self.bump_index(TABLE_CSI_VOLUMES)
    }

    pub fn csi_volume_deregister(&mut self, namespace: &str, id: &str) -> Result<(), DroverError> {
        if !self.delete(TABLE_CSI_VOLUMES, &[namespace, id])? {
            return Err(DroverError::NotFound);
        }
        self.bump_index(TABLE_CSI_VOLUMES)
    }

    /// Applies one claim transition to a volume. This is the deterministic
    /// half of the release protocol: the watcher decides which transition to
    /// request, and every replica applies it here identically.
    pub fn csi_volume_claim(
        &mut self,
        namespace: &str,
        volume_id: &str,
        claim: CsiVolumeClaim,
    ) -> Result<(), DroverError> {
        let Some(current) = self.view().csi_volume(namespace, volume_id)? else {
            return Err(DroverError::NotFound);
        };
        let mut volume = (*current).clone();

        match claim.state {
            CsiClaimState::Taken => match claim.mode {
                CsiClaimMode::Read => {
                    volume.read_claims.insert(claim.alloc_id.clone(), claim);
                }
                CsiClaimMode::Write => {
                    volume.write_claims.insert(claim.alloc_id.clone(), claim);
                }
                // Entry into the release protocol for an allocation that is
                // already gone: synthesize the past claim without touching
                // live claims.
                CsiClaimMode::Gc => {
                    volume
                        .past_claims
                        .entry(claim.alloc_id.clone())
                        .or_insert(claim);
                }
            },
            CsiClaimState::Unpublishing | CsiClaimState::NodeDetached => {
                let entry = volume
                    .past_claims
                    .entry(claim.alloc_id.clone())
                    .or_insert_with(|| claim.clone());
                assert!(
                    claim.state.order() >= entry.state.order(),
                    "claim state regression for alloc {} on volume {}/{}: {} -> {}",
                    claim.alloc_id,
                    namespace,
                    volume_id,
                    entry.state,
                    claim.state
                );
                entry.state = claim.state;
                entry.node_id = claim.node_id;
            }
            CsiClaimState::ReadyToFree | CsiClaimState::Freed => {
                // Freeing is the removal of the claim everywhere; `Freed` is
                // observable as absence.
                volume.read_claims.remove(&claim.alloc_id);
                volume.write_claims.remove(&claim.alloc_id);
                volume.past_claims.remove(&claim.alloc_id);
            }
        }

        volume.modify_index = self.index();
        self.insert(TABLE_CSI_VOLUMES, Record::Volume(Arc::new(volume)))?;
        self.bump_index(TABLE_CSI_VOLUMES)
    }
}
