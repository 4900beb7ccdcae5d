// src/core/raft/mod.rs

//! The replicated-log boundary. The core treats raft as a command log with a
//! leader signal: `apply` returns only after a command is committed, and
//! commit triggers deterministic application into the state store on every
//! replica.

pub mod fsm;
pub mod log;
pub mod msg;

pub use fsm::Fsm;
pub use log::ReplicatedLog;
pub use msg::{Command, CsiVolumeClaimRequest};
