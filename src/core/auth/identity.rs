// src/core/auth/identity.rs

//! The authenticated identity attached to every request. Exactly one variant
//! applies; capability compilation pattern-matches on it in one place.

use crate::core::auth::claims::IdentityClaims;
use crate::core::types::AclToken;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub enum Identity {
    /// An external operator credential resolved from the token store.
    AclToken(Arc<AclToken>),
    /// A workload identity presented by a running allocation.
    Claims(IdentityClaims),
    /// A client node authenticated by its node secret.
    ClientId(String),
    /// An mTLS peer without a token, kept for metrics attribution.
    TlsName(String),
    /// The process's own loopback credential.
    Leader,
    /// No credential presented.
    Anonymous,
    /// ACL enforcement is switched off; every check passes.
    AclsDisabled,
}

impl Identity {
    /// A stable label for logs and rate metrics.
    pub fn label(&self) -> String {
        match self {
            Identity::AclToken(t) => format!("token:{}", t.accessor_id),
            Identity::Claims(c) => format!("alloc:{}", c.alloc_id),
            Identity::ClientId(id) => format!("client:{id}"),
            Identity::TlsName(name) => format!("tls:{name}"),
            Identity::Leader => "leader".to_string(),
            Identity::Anonymous => "anonymous".to_string(),
            Identity::AclsDisabled => "acls-disabled".to_string(),
        }
    }

    pub fn is_anonymous(&self) -> bool {
        matches!(self, Identity::Anonymous)
    }
}
