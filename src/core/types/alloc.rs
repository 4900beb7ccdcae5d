// src/core/types/alloc.rs

//! Allocation records: one scheduled unit of a job assigned to a node.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use strum_macros::{Display, EnumString};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, Default,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum AllocClientStatus {
    #[default]
    Pending,
    Running,
    Complete,
    Failed,
    Lost,
    Unknown,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, Default,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum AllocDesiredStatus {
    #[default]
    Run,
    Stop,
    Evict,
}

/// The client-reported state of a single task within an allocation.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TaskState {
    pub state: String,
    #[serde(default)]
    pub failed: bool,
}

/// One scheduled instance of a task group on a node.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Allocation {
    pub id: String,
    pub namespace: String,
    pub job_id: String,
    pub task_group: String,
    pub node_id: String,
    pub client_status: AllocClientStatus,
    pub desired_status: AllocDesiredStatus,
    #[serde(default)]
    pub task_states: HashMap<String, TaskState>,
    #[serde(default)]
    pub create_index: u64,
    #[serde(default)]
    pub modify_index: u64,
}

impl Allocation {
    /// Terminal iff the client reported a final status or the server asked
    /// the client to stop it.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.client_status,
            AllocClientStatus::Complete | AllocClientStatus::Failed | AllocClientStatus::Lost
        ) || self.desired_status == AllocDesiredStatus::Stop
    }

    pub fn has_task(&self, task: &str) -> bool {
        self.task_states.contains_key(task)
    }
}
