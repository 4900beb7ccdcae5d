// src/core/store/schema.rs

//! The table registry: every table, its indexes, and the field extractors
//! backing them. Registry order is leaves-first and drives the snapshot
//! layout, so restores perform only monotone inserts.

use crate::core::store::index::Indexer;
use crate::core::types::Record;
use indexmap::IndexMap;
use std::borrow::Cow;

pub const TABLE_NODE_POOLS: &str = "node_pools";
pub const TABLE_NODES: &str = "nodes";
pub const TABLE_ACL_POLICIES: &str = "acl_policies";
pub const TABLE_ACL_ROLES: &str = "acl_roles";
pub const TABLE_ACL_TOKENS: &str = "acl_tokens";
pub const TABLE_JOBS: &str = "jobs";
pub const TABLE_ALLOCS: &str = "allocs";
pub const TABLE_CSI_VOLUMES: &str = "csi_volumes";
/// The meta table tracking the last write index of every other table.
pub const TABLE_INDEX: &str = "index";

/// The primary index every table must declare first.
pub const INDEX_ID: &str = "id";

#[derive(Debug, Clone)]
pub struct IndexSchema {
    pub name: &'static str,
    pub unique: bool,
    /// Records whose extractor yields no value are omitted from the index
    /// instead of failing the insert.
    pub allows_missing: bool,
    pub indexer: Indexer,
}

#[derive(Debug, Clone)]
pub struct TableSchema {
    pub name: &'static str,
    pub indexes: Vec<IndexSchema>,
}

impl TableSchema {
    pub fn index(&self, name: &str) -> Option<&IndexSchema> {
        self.indexes.iter().find(|ix| ix.name == name)
    }

    pub fn primary(&self) -> &IndexSchema {
        &self.indexes[0]
    }
}

#[derive(Debug, Clone)]
pub struct Schema {
    tables: IndexMap<&'static str, TableSchema>,
}

impl Schema {
    pub fn table(&self, name: &str) -> Option<&TableSchema> {
        self.tables.get(name)
    }

    /// Tables in registry (snapshot) order.
    pub fn tables(&self) -> impl Iterator<Item = &TableSchema> {
        self.tables.values()
    }
}

// --- Field extractors ---
//
// Every extractor panics on a record of the wrong variant: the schema wiring
// a table to the wrong record type is a programming error, not a runtime
// condition.

macro_rules! wrong_record {
    ($table:expr) => {
        panic!("schema violation: wrong record type in table {}", $table)
    };
}

fn node_pool_name(r: &Record) -> Option<Cow<'_, str>> {
    match r {
        Record::NodePool(p) => Some(Cow::Borrowed(p.name.as_str())),
        _ => wrong_record!(TABLE_NODE_POOLS),
    }
}

fn node_id(r: &Record) -> Option<Cow<'_, str>> {
    match r {
        Record::Node(n) => Some(Cow::Borrowed(n.id.as_str())),
        _ => wrong_record!(TABLE_NODES),
    }
}

fn node_secret_id(r: &Record) -> Option<Cow<'_, str>> {
    match r {
        Record::Node(n) => Some(Cow::Borrowed(n.secret_id.as_str())),
        _ => wrong_record!(TABLE_NODES),
    }
}

fn node_pool_of_node(r: &Record) -> Option<Cow<'_, str>> {
    match r {
        Record::Node(n) => Some(Cow::Borrowed(n.node_pool.as_str())),
        _ => wrong_record!(TABLE_NODES),
    }
}

fn policy_name(r: &Record) -> Option<Cow<'_, str>> {
    match r {
        Record::AclPolicy(p) => Some(Cow::Borrowed(p.name.as_str())),
        _ => wrong_record!(TABLE_ACL_POLICIES),
    }
}

fn role_id(r: &Record) -> Option<Cow<'_, str>> {
    match r {
        Record::AclRole(role) => Some(Cow::Borrowed(role.id.as_str())),
        _ => wrong_record!(TABLE_ACL_ROLES),
    }
}

fn role_name(r: &Record) -> Option<Cow<'_, str>> {
    match r {
        Record::AclRole(role) => Some(Cow::Borrowed(role.name.as_str())),
        _ => wrong_record!(TABLE_ACL_ROLES),
    }
}

fn token_secret_id(r: &Record) -> Option<Cow<'_, str>> {
    match r {
        Record::AclToken(t) => Some(Cow::Borrowed(t.secret_id.as_str())),
        _ => wrong_record!(TABLE_ACL_TOKENS),
    }
}

fn token_accessor_id(r: &Record) -> Option<Cow<'_, str>> {
    match r {
        Record::AclToken(t) => Some(Cow::Borrowed(t.accessor_id.as_str())),
        _ => wrong_record!(TABLE_ACL_TOKENS),
    }
}

fn job_namespace(r: &Record) -> Option<Cow<'_, str>> {
    match r {
        Record::Job(j) => Some(Cow::Borrowed(j.namespace.as_str())),
        _ => wrong_record!(TABLE_JOBS),
    }
}

fn job_id(r: &Record) -> Option<Cow<'_, str>> {
    match r {
        Record::Job(j) => Some(Cow::Borrowed(j.id.as_str())),
        _ => wrong_record!(TABLE_JOBS),
    }
}

fn job_node_pool(r: &Record) -> Option<Cow<'_, str>> {
    match r {
        Record::Job(j) => Some(Cow::Borrowed(j.node_pool.as_str())),
        _ => wrong_record!(TABLE_JOBS),
    }
}

fn alloc_id(r: &Record) -> Option<Cow<'_, str>> {
    match r {
        Record::Alloc(a) => Some(Cow::Borrowed(a.id.as_str())),
        _ => wrong_record!(TABLE_ALLOCS),
    }
}

fn alloc_namespace(r: &Record) -> Option<Cow<'_, str>> {
    match r {
        Record::Alloc(a) => Some(Cow::Borrowed(a.namespace.as_str())),
        _ => wrong_record!(TABLE_ALLOCS),
    }
}

fn alloc_job_id(r: &Record) -> Option<Cow<'_, str>> {
    match r {
        Record::Alloc(a) => Some(Cow::Borrowed(a.job_id.as_str())),
        _ => wrong_record!(TABLE_ALLOCS),
    }
}

fn alloc_node_id(r: &Record) -> Option<Cow<'_, str>> {
    match r {
        // Pending allocations may not be placed yet; an empty node id means
        // the record is simply absent from the node index.
        Record::Alloc(a) => {
            if a.node_id.is_empty() {
                None
            } else {
                Some(Cow::Borrowed(a.node_id.as_str()))
            }
        }
        _ => wrong_record!(TABLE_ALLOCS),
    }
}

fn volume_namespace(r: &Record) -> Option<Cow<'_, str>> {
    match r {
        Record::Volume(v) => Some(Cow::Borrowed(v.namespace.as_str())),
        _ => wrong_record!(TABLE_CSI_VOLUMES),
    }
}

fn volume_id(r: &Record) -> Option<Cow<'_, str>> {
    match r {
        Record::Volume(v) => Some(Cow::Borrowed(v.id.as_str())),
        _ => wrong_record!(TABLE_CSI_VOLUMES),
    }
}

fn volume_plugin_id(r: &Record) -> Option<Cow<'_, str>> {
    match r {
        Record::Volume(v) => Some(Cow::Borrowed(v.plugin_id.as_str())),
        _ => wrong_record!(TABLE_CSI_VOLUMES),
    }
}

fn index_entry_name(r: &Record) -> Option<Cow<'_, str>> {
    match r {
        Record::TableIndex(e) => Some(Cow::Borrowed(e.name.as_str())),
        _ => wrong_record!(TABLE_INDEX),
    }
}

fn string(field: crate::core::store::index::FieldFn) -> Indexer {
    Indexer::StringField {
        field,
        lowercase: false,
    }
}

fn uuid(field: crate::core::store::index::FieldFn) -> Indexer {
    Indexer::UuidField { field }
}

/// The full state-store schema.
pub fn state_store_schema() -> Schema {
    let mut tables = IndexMap::new();

    let mut add = |t: TableSchema| {
        tables.insert(t.name, t);
    };

    add(TableSchema {
        name: TABLE_NODE_POOLS,
        indexes: vec![IndexSchema {
            name: INDEX_ID,
            unique: true,
            allows_missing: false,
            indexer: string(node_pool_name),
        }],
    });

    add(TableSchema {
        name: TABLE_NODES,
        indexes: vec![
            IndexSchema {
                name: INDEX_ID,
                unique: true,
                allows_missing: false,
                indexer: uuid(node_id),
            },
            IndexSchema {
                name: "secret_id",
                unique: true,
                allows_missing: false,
                indexer: uuid(node_secret_id),
            },
            IndexSchema {
                name: "node_pool",
                unique: false,
                allows_missing: false,
                indexer: string(node_pool_of_node),
            },
        ],
    });

    add(TableSchema {
        name: TABLE_ACL_POLICIES,
        indexes: vec![IndexSchema {
            name: INDEX_ID,
            unique: true,
            allows_missing: false,
            indexer: string(policy_name),
        }],
    });

    add(TableSchema {
        name: TABLE_ACL_ROLES,
        indexes: vec![
            IndexSchema {
                name: INDEX_ID,
                unique: true,
                allows_missing: false,
                indexer: uuid(role_id),
            },
            IndexSchema {
                name: "name",
                unique: true,
                allows_missing: false,
                indexer: string(role_name),
            },
        ],
    });

    add(TableSchema {
        name: TABLE_ACL_TOKENS,
        indexes: vec![
            IndexSchema {
                name: INDEX_ID,
                unique: true,
                allows_missing: false,
                indexer: uuid(token_secret_id),
            },
            IndexSchema {
                name: "accessor",
                unique: true,
                allows_missing: false,
                indexer: uuid(token_accessor_id),
            },
        ],
    });

    add(TableSchema {
        name: TABLE_JOBS,
        indexes: vec![
            IndexSchema {
                name: INDEX_ID,
                unique: true,
                allows_missing: false,
                indexer: Indexer::Compound {
                    indexers: vec![string(job_namespace), string(job_id)],
                },
            },
            IndexSchema {
                name: "node_pool",
                unique: false,
                allows_missing: false,
                indexer: string(job_node_pool),
            },
        ],
    });

    add(TableSchema {
        name: TABLE_ALLOCS,
        indexes: vec![
            IndexSchema {
                name: INDEX_ID,
                unique: true,
                allows_missing: false,
                indexer: uuid(alloc_id),
            },
            IndexSchema {
                name: "job",
                unique: false,
                allows_missing: false,
                indexer: Indexer::Compound {
                    indexers: vec![string(alloc_namespace), string(alloc_job_id)],
                },
            },
            IndexSchema {
                name: "node",
                unique: false,
                allows_missing: true,
                indexer: uuid(alloc_node_id),
            },
        ],
    });

    add(TableSchema {
        name: TABLE_CSI_VOLUMES,
        indexes: vec![
            IndexSchema {
                name: INDEX_ID,
                unique: true,
                allows_missing: false,
                indexer: Indexer::Compound {
                    indexers: vec![string(volume_namespace), string(volume_id)],
                },
            },
            IndexSchema {
                name: "plugin_id",
                unique: false,
                allows_missing: false,
                indexer: string(volume_plugin_id),
            },
        ],
    });

    add(TableSchema {
        name: TABLE_INDEX,
        indexes: vec![IndexSchema {
            name: INDEX_ID,
            unique: true,
            allows_missing: false,
            indexer: string(index_entry_name),
        }],
    });

    Schema { tables }
}
