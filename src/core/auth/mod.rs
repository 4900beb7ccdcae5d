// src/core/auth/mod.rs

//! Credential resolution: every RPC's bearer token, TLS peer name, and
//! remote address are translated into a typed [`Identity`], and identities
//! resolve on demand to a compiled capability set.

pub mod cache;
pub mod claims;
pub mod identity;
pub mod policy;

pub use claims::{ClaimSigner, IdentityClaims};
pub use identity::Identity;
pub use policy::{Acl, NsCaps, PoolCaps};

use crate::core::errors::DroverError;
use crate::core::store::StateStore;
use crate::core::types::{AclPolicy, AclToken, Node};
use cache::PolicyCache;
use chrono::Utc;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// The TLS common name servers present to each other in a region.
fn server_tls_name(region: &str) -> String {
    format!("server.{region}.nomad")
}

/// The TLS common name client nodes present in a region.
fn client_tls_name(region: &str) -> String {
    format!("client.{region}.nomad")
}

pub struct Authenticator {
    store: Arc<StateStore>,
    region: String,
    acls_enabled: bool,
    verify_tls: bool,
    /// The current leader's loopback secret; installed on leadership gain
    /// and cleared on loss.
    leader_acl: parking_lot::RwLock<Option<String>>,
    signer: ClaimSigner,
    cache: PolicyCache,
}

impl Authenticator {
    pub fn new(
        store: Arc<StateStore>,
        region: String,
        acls_enabled: bool,
        verify_tls: bool,
        signer: ClaimSigner,
        cache_size: usize,
    ) -> Self {
        Authenticator {
            store,
            region,
            acls_enabled,
            verify_tls,
            leader_acl: parking_lot::RwLock::new(None),
            signer,
            cache: PolicyCache::new(cache_size),
        }
    }

    pub fn signer(&self) -> &ClaimSigner {
        &self.signer
    }

    /// Installs (or clears) the process-local leader loopback secret.
    pub fn set_leader_acl(&self, secret: Option<String>) {
        *self.leader_acl.write() = secret;
    }

    /// Resolves the external credential set into an identity, in strict
    /// order: stored ACL token, signed workload claims, leader loopback
    /// secret, node secret. An unmatched non-empty credential fails; the
    /// diagnostic variant is preserved for logs and tests, and callers
    /// outside this module surface it as `PermissionDenied`.
    pub fn authenticate(
        &self,
        token: &str,
        tls_name: Option<&str>,
        remote_addr: Option<SocketAddr>,
    ) -> Result<Identity, DroverError> {
        if token.is_empty() {
            if !self.acls_enabled {
                return Ok(Identity::AclsDisabled);
            }
            if let Some(name) = tls_name {
                return Ok(Identity::TlsName(name.to_string()));
            }
            return Ok(Identity::Anonymous);
        }

        let snap = self.store.snapshot();
        let is_uuid = Uuid::parse_str(token).is_ok();

        if is_uuid {
            if let Some(stored) = snap.acl_token_by_secret(token)? {
                if stored.is_expired(Utc::now()) {
                    debug!(accessor = %stored.accessor_id, "rejected expired ACL token");
                    return Err(DroverError::TokenExpired);
                }
                return Ok(Identity::AclToken(stored));
            }
        } else if let Ok(claims) = self.signer.verify(token) {
            let Some(alloc) = snap.alloc_by_id(&claims.alloc_id)? else {
                return Err(DroverError::AllocNotFound);
            };
            if alloc.is_terminal() {
                return Err(DroverError::AllocTerminal);
            }
            return Ok(Identity::Claims(claims));
        }

        if let Some(leader_secret) = self.leader_acl.read().as_deref() {
            if token == leader_secret {
                return Ok(Identity::Leader);
            }
        }

        if is_uuid {
            if let Some(node) = snap.node_by_secret(token)? {
                return Ok(Identity::ClientId(node.id.clone()));
            }
        }

        // Nothing matched. Keep the peer attribution in the log line so
        // operators can trace the source of bad credentials.
        warn!(
            remote = ?remote_addr,
            tls = tls_name.unwrap_or(""),
            "request with unresolvable credentials"
        );
        if is_uuid {
            Err(DroverError::TokenNotFound)
        } else {
            Err(DroverError::TokenInvalid("credential format not recognized".to_string()))
        }
    }

    /// Accepts only fellow servers: with TLS verification on, the peer must
    /// present the region's server certificate name. Without TLS, transport
    /// identity is presumed, a documented limitation of the security model.
    pub fn authenticate_server_only(
        &self,
        tls_name: Option<&str>,
    ) -> Result<Arc<Acl>, DroverError> {
        if self.verify_tls {
            let expected = server_tls_name(&self.region);
            if tls_name != Some(expected.as_str()) {
                return Err(DroverError::PermissionDenied);
            }
        }
        Ok(Acl::management())
    }

    /// Accepts only client nodes: the node secret must be present in the
    /// store, and with TLS verification on the peer must present the
    /// region's client (or server, for forwarded calls) certificate name.
    pub fn authenticate_client_only(
        &self,
        secret: &str,
        tls_name: Option<&str>,
    ) -> Result<(Arc<Node>, Arc<Acl>), DroverError> {
        if self.verify_tls {
            let client = client_tls_name(&self.region);
            let server = server_tls_name(&self.region);
            if tls_name != Some(client.as_str()) && tls_name != Some(server.as_str()) {
                return Err(DroverError::PermissionDenied);
            }
        }
        let snap = self.store.snapshot();
        let Some(node) = snap.node_by_secret(secret)? else {
            return Err(DroverError::PermissionDenied);
        };
        Ok((node, Acl::client()))
    }

    /// Compiles the capability set for an identity. This is the single
    /// pattern-match site over the identity sum type.
    pub fn resolve_acl(&self, identity: &Identity) -> Result<Arc<Acl>, DroverError> {
        match identity {
            Identity::AclsDisabled | Identity::Leader => Ok(Acl::management()),
            Identity::AclToken(token) => self.acl_for_token(token),
            Identity::Claims(claims) => self.acl_for_claims(claims),
            Identity::ClientId(_) => Ok(Acl::client()),
            // TLS-only peers carry attribution, not authority.
            Identity::TlsName(_) | Identity::Anonymous => Ok(Arc::new(Acl::default())),
        }
    }

    /// Convenience for handlers: authenticate, then compile, collapsing
    /// diagnostics into the external error.
    pub fn resolve_token(&self, token: &str) -> Result<Arc<Acl>, DroverError> {
        let identity = self.authenticate(token, None, None).map_err(DroverError::external)?;
        self.resolve_acl(&identity).map_err(DroverError::external)
    }

    fn acl_for_token(&self, token: &AclToken) -> Result<Arc<Acl>, DroverError> {
        if token.is_management() {
            return Ok(Acl::management());
        }
        if token.is_expired(Utc::now()) {
            return Err(DroverError::TokenExpired);
        }

        let snap = self.store.snapshot();
        // Direct policies plus every policy reachable through roles, deduped
        // by name so the cache key is stable.
        let mut by_name: BTreeMap<String, Arc<AclPolicy>> = BTreeMap::new();
        let mut missing: Vec<String> = Vec::new();
        for name in &token.policies {
            match snap.acl_policy_by_name(name)? {
                Some(policy) => {
                    by_name.insert(policy.name.clone(), policy);
                }
                None => missing.push(name.clone()),
            }
        }
        for link in &token.roles {
            let Some(role) = snap.acl_role_by_id(&link.id)? else {
                warn!(role = %link.id, accessor = %token.accessor_id, "token references unknown role");
                continue;
            };
            for name in &role.policies {
                if by_name.contains_key(name) {
                    continue;
                }
                match snap.acl_policy_by_name(name)? {
                    Some(policy) => {
                        by_name.insert(policy.name.clone(), policy);
                    }
                    None => missing.push(name.clone()),
                }
            }
        }
        if !missing.is_empty() {
            warn!(accessor = %token.accessor_id, ?missing, "token references unknown policies");
        }

        let policies: Vec<Arc<AclPolicy>> = by_name.into_values().collect();
        self.cache.get_or_compile(&policies)
    }

    fn acl_for_claims(&self, claims: &IdentityClaims) -> Result<Arc<Acl>, DroverError> {
        let snap = self.store.snapshot();

        // Policies scoped to this workload: namespace and job must match,
        // and group/task must match when the scope pins them. A non-matching
        // scope silently omits the policy.
        let mut matched: Vec<Arc<AclPolicy>> = Vec::new();
        for policy in snap.acl_policies()? {
            let Some(scope) = &policy.job_acl else {
                continue;
            };
            if scope.namespace != claims.namespace || scope.job_id != claims.job_id {
                continue;
            }
            if let Some(group) = &scope.group {
                if *group != claims.task_group {
                    continue;
                }
            }
            if let Some(task) = &scope.task {
                // A task scope without a group scope is meaningless; skip it
                // the same way a group mismatch is skipped.
                if scope.group.is_none() || *task != claims.task {
                    continue;
                }
            }
            matched.push(policy);
        }

        let compiled = self.cache.get_or_compile(&matched)?;
        let mut acl = Acl::implicit_workload(&claims.namespace);
        acl.merge(&compiled);
        Ok(Arc::new(acl))
    }
}
