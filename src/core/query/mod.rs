// src/core/query/mod.rs

//! The read-path pattern every endpoint composes: open a snapshot, run the
//! read under a fresh watch set, and either return or block until the
//! result's index advances past the caller's floor.

pub mod filter;
pub mod paginate;

pub use filter::{FieldValue, Fields, FilterExpr};
pub use paginate::{Page, paginate};

use crate::core::errors::DroverError;
use crate::core::store::{ReadTxn, StateStore, WatchOutcome, WatchSet};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// The default soft deadline of a blocking query when the caller sets none.
pub const DEFAULT_QUERY_WAIT: Duration = Duration::from_secs(300);

/// The cap on caller-supplied `max_query_time`.
pub const MAX_QUERY_WAIT: Duration = Duration::from_secs(600);

/// The options every read request carries.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct QueryOptions {
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub auth_token: String,
    /// Block until the result index exceeds this floor. Zero never blocks.
    #[serde(default)]
    pub min_query_index: u64,
    #[serde(default, with = "humantime_serde::option")]
    pub max_query_time: Option<Duration>,
    #[serde(default)]
    pub allow_stale: bool,
    #[serde(default)]
    pub prefix: String,
    #[serde(default)]
    pub filter: String,
    #[serde(default)]
    pub per_page: u32,
    #[serde(default)]
    pub next_token: String,
    #[serde(default)]
    pub reverse: bool,
}

/// The metadata every read reply carries.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct QueryMeta {
    /// The index the result is valid at; the caller feeds it back as
    /// `min_query_index` to long-poll.
    pub index: u64,
    #[serde(default)]
    pub last_contact_ms: u64,
    #[serde(default)]
    pub known_leader: bool,
    #[serde(default)]
    pub next_token: String,
}

/// Runs `run` over a snapshot, long-polling per the options.
///
/// `run` performs the read, registering every touched index position in the
/// watch set, and returns the result with its index. If the index does not
/// exceed the caller's floor, the query parks on the watch set and re-runs
/// on wake-up. Timeouts and cancellation return the current result at the
/// current index; neither is an error.
pub async fn blocking_query<T, F>(
    store: &Arc<StateStore>,
    opts: &QueryOptions,
    cancel: &CancellationToken,
    mut run: F,
) -> Result<(T, u64), DroverError>
where
    F: FnMut(&ReadTxn, &mut WatchSet) -> Result<(T, u64), DroverError>,
{
    let wait = opts
        .max_query_time
        .unwrap_or(DEFAULT_QUERY_WAIT)
        .min(MAX_QUERY_WAIT);
    let deadline = Instant::now() + wait;

    loop {
        let snap = store.snapshot();
        let mut ws = WatchSet::new();
        let (result, index) = run(&snap, &mut ws)?;

        if opts.min_query_index == 0 || index > opts.min_query_index {
            return Ok((result, index));
        }

        trace!(index, floor = opts.min_query_index, watched = ws.len(), "parking blocking query");
        match ws.wait(cancel, deadline).await {
            WatchOutcome::Fired => continue,
            WatchOutcome::Cancelled | WatchOutcome::TimedOut => return Ok((result, index)),
        }
    }
}
