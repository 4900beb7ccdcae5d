// src/core/auth/cache.rs

//! Memoizes policy compilation. The cache key is a digest over the sorted
//! `(name, modify_index)` set of the policies being merged, so any policy
//! edit naturally invalidates every entry that referenced it.

use crate::core::auth::policy::Acl;
use crate::core::errors::DroverError;
use crate::core::types::AclPolicy;
use lru::LruCache;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::num::NonZeroUsize;
use std::sync::Arc;

pub struct PolicyCache {
    inner: Mutex<LruCache<[u8; 32], Arc<Acl>>>,
}

impl PolicyCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).expect("non-zero cache capacity");
        PolicyCache {
            inner: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Returns the compiled merge of `policies`, compiling on a cache miss.
    pub fn get_or_compile(&self, policies: &[Arc<AclPolicy>]) -> Result<Arc<Acl>, DroverError> {
        let key = cache_key(policies);
        if let Some(acl) = self.inner.lock().get(&key) {
            return Ok(acl.clone());
        }
        let acl = Arc::new(Acl::compile(policies)?);
        self.inner.lock().put(key, acl.clone());
        Ok(acl)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

fn cache_key(policies: &[Arc<AclPolicy>]) -> [u8; 32] {
    let mut ids: Vec<(&str, u64)> = policies
        .iter()
        .map(|p| (p.name.as_str(), p.modify_index))
        .collect();
    ids.sort_unstable();

    let mut hasher = Sha256::new();
    for (name, modify) in ids {
        hasher.update(name.as_bytes());
        hasher.update([0]);
        hasher.update(modify.to_le_bytes());
    }
    hasher.finalize().into()
}
