// src/core/types/job.rs

//! Job records: the operator-submitted unit of work the scheduler places.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use strum_macros::{Display, EnumString};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, Default,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum JobType {
    #[default]
    Service,
    Batch,
    System,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, Default,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum JobStatus {
    #[default]
    Pending,
    Running,
    Dead,
}

/// One task inside a task group.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Task {
    pub name: String,
    pub driver: String,
}

/// A co-scheduled set of tasks; the unit an allocation materializes.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TaskGroup {
    pub name: String,
    pub count: u32,
    #[serde(default)]
    pub tasks: Vec<Task>,
}

/// A registered job. Namespaced; `parent_id` is set on dispatched instances
/// of a parameterized or periodic job.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Job {
    pub namespace: String,
    pub id: String,
    pub name: String,
    pub job_type: JobType,
    pub node_pool: String,
    pub status: JobStatus,
    pub priority: u32,
    #[serde(default)]
    pub stop: bool,
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub task_groups: Vec<TaskGroup>,
    #[serde(default)]
    pub meta: HashMap<String, String>,
    #[serde(default)]
    pub create_index: u64,
    #[serde(default)]
    pub modify_index: u64,
}

impl Job {
    /// A job no longer holds its node pool occupied once it is dead or has
    /// been marked for stopping.
    pub fn is_terminal(&self) -> bool {
        self.stop || self.status == JobStatus::Dead
    }

    pub fn task_group(&self, name: &str) -> Option<&TaskGroup> {
        self.task_groups.iter().find(|tg| tg.name == name)
    }
}
