// src/core/types/volume.rs

//! CSI volume records and the claim state machine the volume watcher drives.

use crate::core::types::Allocation;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use strum_macros::{Display, EnumString};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, Default,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum CsiAccessMode {
    #[default]
    SingleNodeReader,
    SingleNodeWriter,
    MultiNodeReader,
    MultiNodeSingleWriter,
    MultiNodeMultiWriter,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, Default,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum CsiAttachmentMode {
    #[default]
    FileSystem,
    BlockDevice,
}

/// How an allocation is using a volume. `Gc` is the synthetic mode the
/// garbage collector uses to enter the release protocol for an allocation
/// that is already gone.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, Default,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum CsiClaimMode {
    #[default]
    Read,
    Write,
    Gc,
}

/// The release protocol for a claim advances monotonically:
/// `Taken -> (Unpublishing | NodeDetached) -> ReadyToFree -> Freed`.
/// A regression is a programming error, not a runtime condition.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, Default,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum CsiClaimState {
    #[default]
    Taken,
    Unpublishing,
    NodeDetached,
    ReadyToFree,
    Freed,
}

impl CsiClaimState {
    /// Position in the monotone protocol order, used to reject regressions.
    pub fn order(self) -> u8 {
        match self {
            CsiClaimState::Taken => 0,
            CsiClaimState::Unpublishing | CsiClaimState::NodeDetached => 1,
            CsiClaimState::ReadyToFree => 2,
            CsiClaimState::Freed => 3,
        }
    }
}

/// A record attesting that an allocation is using (or was using) a volume.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CsiVolumeClaim {
    pub alloc_id: String,
    pub node_id: String,
    pub mode: CsiClaimMode,
    pub state: CsiClaimState,
}

/// A registered CSI volume with its live and past claims. `past_claims`
/// carries the claims of allocations that have stopped; the volume watcher
/// drives each of them through the release protocol until they free.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CsiVolume {
    pub namespace: String,
    pub id: String,
    pub name: String,
    pub plugin_id: String,
    pub controller_required: bool,
    pub access_mode: CsiAccessMode,
    pub attachment_mode: CsiAttachmentMode,
    #[serde(default)]
    pub read_claims: HashMap<String, CsiVolumeClaim>,
    #[serde(default)]
    pub write_claims: HashMap<String, CsiVolumeClaim>,
    #[serde(default)]
    pub past_claims: HashMap<String, CsiVolumeClaim>,
    #[serde(default)]
    pub create_index: u64,
    #[serde(default)]
    pub modify_index: u64,
}

impl CsiVolume {
    /// All live claims, read and write, keyed by allocation id.
    pub fn live_claims(&self) -> impl Iterator<Item = (&String, &CsiVolumeClaim)> {
        self.read_claims.iter().chain(self.write_claims.iter())
    }

    /// True when some claim still needs the release protocol driven.
    pub fn has_unfreed_claims(&self) -> bool {
        !self.read_claims.is_empty()
            || !self.write_claims.is_empty()
            || self
                .past_claims
                .values()
                .any(|c| c.state != CsiClaimState::Freed)
    }
}

/// A volume joined with the allocation records its claims reference,
/// materialized from a single snapshot. Allocations that have been garbage
/// collected resolve to `None`.
#[derive(Debug, Clone)]
pub struct CsiVolumeView {
    pub volume: Arc<CsiVolume>,
    pub allocs: HashMap<String, Option<Arc<Allocation>>>,
}
