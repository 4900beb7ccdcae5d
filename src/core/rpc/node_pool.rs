// src/core/rpc/node_pool.rs

//! The node pool endpoint family. Every read composes the same way: resolve
//! the capability set, run the read under a watch set, project records the
//! ACL denies out of the result, filter, paginate, and block per the query
//! options. The writes validate, then submit through the log.

use crate::core::auth::{NsCaps, PoolCaps};
use crate::core::errors::DroverError;
use crate::core::query::{FilterExpr, Page, QueryMeta, QueryOptions, blocking_query, paginate};
use crate::core::raft::Command;
use crate::core::rpc::RpcContext;
use crate::core::state::ServerState;
use crate::core::store::schema::{TABLE_JOBS, TABLE_NODE_POOLS, TABLE_NODES};
use crate::core::types::node::{NodeListStub, NodeStubFields};
use crate::core::types::node_pool::{NODE_POOL_ALL, NODE_POOL_DEFAULT, validate_node_pool_name};
use crate::core::types::{Job, NodePool};
use std::sync::Arc;
use tracing::debug;

pub struct NodePoolEndpoint {
    srv: Arc<ServerState>,
}

impl NodePoolEndpoint {
    pub fn new(srv: Arc<ServerState>) -> Self {
        NodePoolEndpoint { srv }
    }

    fn meta(&self, index: u64, next_token: Option<String>) -> QueryMeta {
        QueryMeta {
            index,
            last_contact_ms: 0,
            known_leader: self.srv.raft.is_leader(),
            next_token: next_token.unwrap_or_default(),
        }
    }

    /// Lists node pools: pagination, prefix, filter, reverse, blocking. The
    /// ACL silently projects unreadable pools out of the result.
    pub async fn list(
        &self,
        ctx: &RpcContext,
        opts: &QueryOptions,
    ) -> Result<(Vec<Arc<NodePool>>, QueryMeta), DroverError> {
        let acl = self.srv.resolve_acl(ctx)?;
        let filter = parse_filter(&opts.filter)?;

        let (page, index) = blocking_query(&self.srv.store, opts, &ctx.cancel, |snap, ws| {
            let mut keyed: Vec<(String, Arc<NodePool>)> = Vec::new();
            let pools = if opts.reverse {
                snap.node_pools_by_prefix_reverse(&opts.prefix, ws)?
            } else {
                snap.node_pools_by_prefix(&opts.prefix, ws)?
            };
            for pool in pools {
                if !acl.allow_node_pool_op(&pool.name, PoolCaps::READ) {
                    continue;
                }
                if let Some(filter) = &filter {
                    if !filter.eval(pool.as_ref())? {
                        continue;
                    }
                }
                keyed.push((pool.name.clone(), pool));
            }
            let page = paginate(keyed.into_iter(), opts.per_page, &opts.next_token, opts.reverse);
            let index = snap.last_index(TABLE_NODE_POOLS).max(1);
            Ok((page, index))
        })
        .await?;

        let Page { items, next_token } = page;
        Ok((items, self.meta(index, next_token)))
    }

    /// Fetches one pool. Not-found is a nil record at the current index, not
    /// an error; an ACL denial on a single-record read is an error.
    pub async fn get_node_pool(
        &self,
        ctx: &RpcContext,
        name: &str,
        opts: &QueryOptions,
    ) -> Result<(Option<Arc<NodePool>>, QueryMeta), DroverError> {
        let acl = self.srv.resolve_acl(ctx)?;
        if !acl.allow_node_pool_op(name, PoolCaps::READ) {
            return Err(DroverError::PermissionDenied);
        }

        let name = name.to_string();
        let (pool, index) = blocking_query(&self.srv.store, opts, &ctx.cancel, |snap, ws| {
            let pool = snap.node_pool_by_name_watch(&name, ws)?;
            let index = match &pool {
                Some(p) => p.modify_index,
                None => snap.last_index(TABLE_NODE_POOLS).max(1),
            };
            Ok((pool, index))
        })
        .await?;

        Ok((pool, self.meta(index, None)))
    }

    /// Creates or updates a batch of pools. The built-in pools are immutable
    /// and reserved.
    pub async fn upsert_node_pools(
        &self,
        ctx: &RpcContext,
        pools: Vec<NodePool>,
    ) -> Result<u64, DroverError> {
        let acl = self.srv.resolve_acl(ctx)?;
        if pools.is_empty() {
            return Err(DroverError::InvalidRequest(
                "must specify at least one node pool".to_string(),
            ));
        }
        for pool in &pools {
            if !acl.allow_node_pool_op(&pool.name, PoolCaps::WRITE) {
                return Err(DroverError::PermissionDenied);
            }
            if pool.is_built_in() {
                return Err(DroverError::NotAllowed(format!(
                    "modifying node pool \"{}\" is not allowed",
                    pool.name
                )));
            }
            if !validate_node_pool_name(&pool.name) {
                return Err(DroverError::InvalidRequest(format!(
                    "invalid node pool name \"{}\"",
                    pool.name
                )));
            }
        }

        debug!(count = pools.len(), "upserting node pools");
        self.srv.raft.apply(Command::UpsertNodePools(pools)).await
    }

    /// Deletes pools. The built-ins are rejected outright; a pool with any
    /// node or any non-terminal job in any region is a conflict.
    pub async fn delete_node_pools(
        &self,
        ctx: &RpcContext,
        names: Vec<String>,
    ) -> Result<u64, DroverError> {
        let acl = self.srv.resolve_acl(ctx)?;
        if names.is_empty() {
            return Err(DroverError::InvalidRequest(
                "must specify at least one node pool to delete".to_string(),
            ));
        }
        for name in &names {
            if !acl.allow_node_pool_op(name, PoolCaps::DELETE) {
                return Err(DroverError::PermissionDenied);
            }
            if name == NODE_POOL_ALL || name == NODE_POOL_DEFAULT {
                return Err(DroverError::NotAllowed(format!(
                    "deleting node pool \"{name}\" is not allowed"
                )));
            }
        }

        let snap = self.srv.store.snapshot();
        for name in &names {
            if snap.node_pool_by_name(name)?.is_none() {
                return Err(DroverError::NotFound);
            }

            let mut regions_with_nodes: Vec<String> = Vec::new();
            let mut regions_with_jobs: Vec<String> = Vec::new();
            for region in self.srv.region_checker.regions() {
                let usage = self.srv.region_checker.pool_in_use(&region, name).await?;
                if usage.has_nodes {
                    regions_with_nodes.push(region.clone());
                }
                if usage.has_live_jobs {
                    regions_with_jobs.push(region);
                }
            }
            if !regions_with_nodes.is_empty() {
                return Err(DroverError::Conflict(format!(
                    "node pool \"{name}\" has nodes in regions: [{}]",
                    regions_with_nodes.join(", ")
                )));
            }
            if !regions_with_jobs.is_empty() {
                return Err(DroverError::Conflict(format!(
                    "node pool \"{name}\" has non-terminal jobs in regions: [{}]",
                    regions_with_jobs.join(", ")
                )));
            }
        }

        debug!(?names, "deleting node pools");
        self.srv.raft.apply(Command::DeleteNodePools(names)).await
    }

    /// Lists the jobs scheduled into a pool, across namespaces when the
    /// request namespace is the wildcard. Requires both pool read and
    /// per-namespace job read; the pagination token is
    /// `"<namespace>.<job-id>"`.
    pub async fn list_jobs(
        &self,
        ctx: &RpcContext,
        pool: &str,
        opts: &QueryOptions,
    ) -> Result<(Vec<Arc<Job>>, QueryMeta), DroverError> {
        let acl = self.srv.resolve_acl(ctx)?;
        if !acl.allow_node_pool_op(pool, PoolCaps::READ) {
            return Err(DroverError::PermissionDenied);
        }
        let namespace = if opts.namespace.is_empty() {
            "default".to_string()
        } else {
            opts.namespace.clone()
        };
        // With a concrete namespace the capability check is static; under
        // the wildcard it degrades to "any namespace readable", and the
        // per-record projection below does the rest.
        if !acl.allow_namespace_op(&namespace, NsCaps::READ_JOB) {
            return Err(DroverError::PermissionDenied);
        }
        let filter = parse_filter(&opts.filter)?;

        let pool = pool.to_string();
        let (page, index) = blocking_query(&self.srv.store, opts, &ctx.cancel, |snap, ws| {
            if snap.node_pool_by_name_watch(&pool, ws)?.is_none() {
                return Err(DroverError::NotFound);
            }
            let mut keyed: Vec<(String, Arc<Job>)> = Vec::new();
            for job in snap.jobs_in_pool(&pool, ws)? {
                if namespace != "*" && job.namespace != namespace {
                    continue;
                }
                if !acl.allow_namespace_op(&job.namespace, NsCaps::READ_JOB) {
                    continue;
                }
                if let Some(filter) = &filter {
                    if !filter.eval(job.as_ref())? {
                        continue;
                    }
                }
                keyed.push((format!("{}.{}", job.namespace, job.id), job));
            }
            if opts.reverse {
                keyed.reverse();
            }
            let page = paginate(keyed.into_iter(), opts.per_page, &opts.next_token, opts.reverse);
            let index = snap.max_index(&[TABLE_JOBS, TABLE_NODE_POOLS]).max(1);
            Ok((page, index))
        })
        .await?;

        let Page { items, next_token } = page;
        Ok((items, self.meta(index, next_token)))
    }

    /// Lists the nodes in a pool. Requires pool read and node read; the
    /// optional projection flags expand the stubs with OS and resource data.
    pub async fn list_nodes(
        &self,
        ctx: &RpcContext,
        pool: &str,
        fields: NodeStubFields,
        opts: &QueryOptions,
    ) -> Result<(Vec<NodeListStub>, QueryMeta), DroverError> {
        let acl = self.srv.resolve_acl(ctx)?;
        if !acl.allow_node_pool_op(pool, PoolCaps::READ) || !acl.allow_node_read() {
            return Err(DroverError::PermissionDenied);
        }
        let filter = parse_filter(&opts.filter)?;

        let pool = pool.to_string();
        let (page, index) = blocking_query(&self.srv.store, opts, &ctx.cancel, |snap, ws| {
            if snap.node_pool_by_name_watch(&pool, ws)?.is_none() {
                return Err(DroverError::NotFound);
            }
            let mut keyed: Vec<(String, NodeListStub)> = Vec::new();
            for node in snap.nodes_in_pool(&pool, ws)? {
                if let Some(filter) = &filter {
                    if !filter.eval(node.as_ref())? {
                        continue;
                    }
                }
                keyed.push((node.id.clone(), node.stub(fields)));
            }
            if opts.reverse {
                keyed.reverse();
            }
            let page = paginate(keyed.into_iter(), opts.per_page, &opts.next_token, opts.reverse);
            let index = snap.max_index(&[TABLE_NODES, TABLE_NODE_POOLS]).max(1);
            Ok((page, index))
        })
        .await?;

        let Page { items, next_token } = page;
        Ok((items, self.meta(index, next_token)))
    }
}

fn parse_filter(expr: &str) -> Result<Option<FilterExpr>, DroverError> {
    if expr.is_empty() {
        Ok(None)
    } else {
        Ok(Some(FilterExpr::parse(expr)?))
    }
}
