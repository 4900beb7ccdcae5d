// src/core/auth/claims.rs

//! Workload identity claims: the signed token a running allocation presents
//! when calling back into the servers. The payload is JSON, the signature is
//! HMAC-SHA256 under a server-held key, and the wire form is
//! `hex(payload).hex(signature)`.

use crate::core::errors::DroverError;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// The claims an allocation asserts about itself.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IdentityClaims {
    pub namespace: String,
    pub job_id: String,
    pub alloc_id: String,
    pub task_group: String,
    pub task: String,
}

/// Signs and verifies workload claims with a process-held key.
pub struct ClaimSigner {
    key: Vec<u8>,
}

impl ClaimSigner {
    pub fn new(key: Vec<u8>) -> Self {
        ClaimSigner { key }
    }

    /// A signer with a freshly generated random key, used when the
    /// configuration does not pin one.
    pub fn generate() -> Result<Self, DroverError> {
        let mut key = [0u8; 32];
        getrandom::fill(&mut key).map_err(|e| DroverError::Internal(e.to_string()))?;
        Ok(ClaimSigner { key: key.to_vec() })
    }

    pub fn sign(&self, claims: &IdentityClaims) -> Result<String, DroverError> {
        let payload = serde_json::to_vec(claims)?;
        let mut mac = HmacSha256::new_from_slice(&self.key)
            .map_err(|e| DroverError::Internal(format!("HMAC init failed: {e}")))?;
        mac.update(&payload);
        let signature = mac.finalize().into_bytes();
        Ok(format!("{}.{}", hex::encode(&payload), hex::encode(signature)))
    }

    /// Verifies a wire token and returns its claims. Any structural problem
    /// or signature mismatch yields `TokenInvalid`.
    pub fn verify(&self, token: &str) -> Result<IdentityClaims, DroverError> {
        let (payload_hex, sig_hex) = token
            .split_once('.')
            .ok_or_else(|| DroverError::TokenInvalid("malformed workload token".to_string()))?;
        let payload = hex::decode(payload_hex)
            .map_err(|_| DroverError::TokenInvalid("malformed workload token".to_string()))?;
        let signature = hex::decode(sig_hex)
            .map_err(|_| DroverError::TokenInvalid("malformed workload token".to_string()))?;

        let mut mac = HmacSha256::new_from_slice(&self.key)
            .map_err(|e| DroverError::Internal(format!("HMAC init failed: {e}")))?;
        mac.update(&payload);
        mac.verify_slice(&signature)
            .map_err(|_| DroverError::TokenInvalid("bad workload signature".to_string()))?;

        serde_json::from_slice(&payload)
            .map_err(|_| DroverError::TokenInvalid("malformed workload claims".to_string()))
    }
}
