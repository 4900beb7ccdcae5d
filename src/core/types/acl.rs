// src/core/types/acl.rs

//! ACL token, policy, and role records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, Default,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum AclTokenType {
    #[default]
    Client,
    Management,
}

/// A link from a token to a role. The name is denormalized for display; the
/// id is authoritative.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RoleLink {
    pub id: String,
    #[serde(default)]
    pub name: String,
}

/// An operator credential. `secret_id` is the bearer secret presented on
/// RPCs; `accessor_id` is the public handle used to manage the token.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AclToken {
    pub accessor_id: String,
    pub secret_id: String,
    pub name: String,
    pub token_type: AclTokenType,
    #[serde(default)]
    pub policies: Vec<String>,
    #[serde(default)]
    pub roles: Vec<RoleLink>,
    #[serde(default)]
    pub global: bool,
    #[serde(default)]
    pub expiration_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub create_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub create_index: u64,
    #[serde(default)]
    pub modify_index: u64,
}

impl AclToken {
    pub fn is_management(&self) -> bool {
        self.token_type == AclTokenType::Management
    }

    /// A token is usable iff its expiration is unset or still in the future.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.expiration_time {
            Some(exp) => now >= exp,
            None => false,
        }
    }
}

/// Scopes a policy to an allocation's workload identity. A workload claim
/// only picks up the policy when namespace and job match, and when group and
/// task match if they are set.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct JobAcl {
    pub namespace: String,
    pub job_id: String,
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub task: Option<String>,
}

/// A named policy. `rules` is the raw rule document; the auth layer compiles
/// it into a capability set on demand and memoizes the result.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AclPolicy {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub rules: String,
    #[serde(default)]
    pub job_acl: Option<JobAcl>,
    #[serde(default)]
    pub create_index: u64,
    #[serde(default)]
    pub modify_index: u64,
}

/// A named bundle of policies. A token's effective policy set is the union
/// of its direct policies and every policy reachable through its roles.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AclRole {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub policies: Vec<String>,
    #[serde(default)]
    pub create_index: u64,
    #[serde(default)]
    pub modify_index: u64,
}
