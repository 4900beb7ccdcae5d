// src/core/store/index.rs

//! Index key extraction. Every table index is a key-extractor over records;
//! the extracted bytes, prefixed by table and index name, address the radix
//! tree.
//!
//! String keys carry a NUL terminator so `"ab"` never matches `"abc"` on an
//! exact lookup while prefix scans over `"ab"` still include it. UUID keys
//! are packed to 16 raw bytes. Compound keys concatenate their parts and
//! support prefix queries over a leading subset of parts.

use crate::core::errors::DroverError;
use crate::core::types::Record;
use std::borrow::Cow;
use uuid::Uuid;

/// Extracts a field from a record. Returning `None` means the record has no
/// value for this index; whether that fails the insert depends on the
/// index's `allows_missing` flag.
pub type FieldFn = for<'a> fn(&'a Record) -> Option<Cow<'a, str>>;

#[derive(Clone)]
pub enum Indexer {
    /// A named string field, optionally lowercased, NUL-terminated.
    StringField { field: FieldFn, lowercase: bool },
    /// A canonical 36-character UUID field stored as 16 raw bytes.
    UuidField { field: FieldFn },
    /// Concatenation of sub-index keys, in order.
    Compound { indexers: Vec<Indexer> },
}

impl std::fmt::Debug for Indexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Indexer::StringField { lowercase, .. } => {
                f.debug_struct("StringField").field("lowercase", lowercase).finish()
            }
            Indexer::UuidField { .. } => f.debug_struct("UuidField").finish(),
            Indexer::Compound { indexers } => {
                f.debug_struct("Compound").field("parts", &indexers.len()).finish()
            }
        }
    }
}

impl Indexer {
    /// The number of query arguments this indexer consumes.
    pub fn arity(&self) -> usize {
        match self {
            Indexer::StringField { .. } | Indexer::UuidField { .. } => 1,
            Indexer::Compound { indexers } => indexers.iter().map(Indexer::arity).sum(),
        }
    }

    /// Extracts this index's key from a record. `Ok(None)` means the record
    /// has no value for the index.
    pub fn key(&self, record: &Record) -> Result<Option<Vec<u8>>, DroverError> {
        match self {
            Indexer::StringField { field, lowercase } => {
                let Some(value) = field(record) else {
                    return Ok(None);
                };
                if value.is_empty() {
                    return Ok(None);
                }
                let mut key = if *lowercase {
                    value.to_lowercase().into_bytes()
                } else {
                    value.into_owned().into_bytes()
                };
                key.push(0);
                Ok(Some(key))
            }
            Indexer::UuidField { field } => {
                let Some(value) = field(record) else {
                    return Ok(None);
                };
                if value.is_empty() {
                    return Ok(None);
                }
                let id = Uuid::parse_str(&value).map_err(|e| {
                    DroverError::InvalidRequest(format!("invalid UUID value \"{value}\": {e}"))
                })?;
                Ok(Some(id.as_bytes().to_vec()))
            }
            Indexer::Compound { indexers } => {
                let mut key = Vec::new();
                for sub in indexers {
                    match sub.key(record)? {
                        Some(part) => key.extend_from_slice(&part),
                        // A hole in any part makes the whole compound key
                        // missing.
                        None => return Ok(None),
                    }
                }
                Ok(Some(key))
            }
        }
    }

    /// Builds the exact key for a query, consuming exactly `arity` args.
    pub fn key_from_args(&self, args: &[&str]) -> Result<Vec<u8>, DroverError> {
        if args.len() != self.arity() {
            return Err(DroverError::Internal(format!(
                "index query expected {} argument(s), got {}",
                self.arity(),
                args.len()
            )));
        }
        self.build_key(args, false)
    }

    /// Builds a scan prefix. Fewer args than `arity` are allowed; the final
    /// arg is treated as a partial value (no terminator, partial UUID bytes).
    pub fn prefix_from_args(&self, args: &[&str]) -> Result<Vec<u8>, DroverError> {
        if args.len() > self.arity() {
            return Err(DroverError::Internal(format!(
                "index prefix query expected at most {} argument(s), got {}",
                self.arity(),
                args.len()
            )));
        }
        self.build_key(args, true)
    }

    fn build_key(&self, args: &[&str], prefix: bool) -> Result<Vec<u8>, DroverError> {
        match self {
            Indexer::StringField { lowercase, .. } => {
                let value = args.first().copied().unwrap_or("");
                let mut key = if *lowercase {
                    value.to_lowercase().into_bytes()
                } else {
                    value.as_bytes().to_vec()
                };
                if !prefix {
                    key.push(0);
                }
                Ok(key)
            }
            Indexer::UuidField { .. } => {
                let value = args.first().copied().unwrap_or("");
                if prefix {
                    uuid_prefix_bytes(value)
                } else {
                    let id = Uuid::parse_str(value).map_err(|e| {
                        DroverError::InvalidRequest(format!("invalid UUID \"{value}\": {e}"))
                    })?;
                    Ok(id.as_bytes().to_vec())
                }
            }
            Indexer::Compound { indexers } => {
                let mut key = Vec::new();
                let mut rest = args;
                for sub in indexers {
                    if rest.is_empty() {
                        break;
                    }
                    let take = sub.arity().min(rest.len());
                    let (part_args, remainder) = rest.split_at(take);
                    rest = remainder;
                    // Only the final consumed part may be partial.
                    let part_is_last = rest.is_empty();
                    let part = if prefix && part_is_last {
                        sub.build_key(part_args, true)?
                    } else {
                        sub.key_from_args(part_args)?
                    };
                    key.extend_from_slice(&part);
                }
                Ok(key)
            }
        }
    }
}

/// Decodes a partial UUID into a byte prefix: dashes are dropped and an even
/// number of hex digits is required, matching how full UUIDs pack to bytes.
fn uuid_prefix_bytes(value: &str) -> Result<Vec<u8>, DroverError> {
    let hex_digits: String = value.chars().filter(|c| *c != '-').collect();
    if hex_digits.len() % 2 != 0 {
        return Err(DroverError::InvalidRequest(format!(
            "invalid UUID prefix \"{value}\": odd number of hex digits"
        )));
    }
    hex::decode(&hex_digits).map_err(|e| {
        DroverError::InvalidRequest(format!("invalid UUID prefix \"{value}\": {e}"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{NodePool, Record};
    use std::sync::Arc;

    fn pool_name(r: &Record) -> Option<Cow<'_, str>> {
        match r {
            Record::NodePool(p) => Some(Cow::Borrowed(p.name.as_str())),
            _ => None,
        }
    }

    #[test]
    fn string_keys_are_terminated() {
        let ix = Indexer::StringField {
            field: pool_name,
            lowercase: false,
        };
        let rec = Record::NodePool(Arc::new(NodePool::new("ab")));
        assert_eq!(ix.key(&rec).unwrap(), Some(b"ab\0".to_vec()));
        assert_eq!(ix.key_from_args(&["ab"]).unwrap(), b"ab\0".to_vec());
        assert_eq!(ix.prefix_from_args(&["ab"]).unwrap(), b"ab".to_vec());
    }

    #[test]
    fn lowercase_flag() {
        let ix = Indexer::StringField {
            field: pool_name,
            lowercase: true,
        };
        let rec = Record::NodePool(Arc::new(NodePool::new("Prod-A")));
        assert_eq!(ix.key(&rec).unwrap(), Some(b"prod-a\0".to_vec()));
    }

    #[test]
    fn uuid_packing_and_prefix() {
        let ix = Indexer::UuidField { field: pool_name };
        let id = "6563616c-1ca2-4fd8-b3f0-a373584ea5a1";
        let rec = Record::NodePool(Arc::new(NodePool::new(id)));
        let key = ix.key(&rec).unwrap().unwrap();
        assert_eq!(key.len(), 16);
        assert_eq!(ix.prefix_from_args(&["6563616c"]).unwrap(), key[..4].to_vec());
        assert!(ix.prefix_from_args(&["656"]).is_err());
    }
}
