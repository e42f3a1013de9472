//! Stale task recovery.
//!
//! A crash mid-batch leaves claimed tasks in `IN_PROGRESS` with nothing
//! left to finish them. `recover_stale` moves those older than a threshold
//! to `RE_PROCESS`, where a later drain over `RE_PROCESS` picks them up.
//! Nothing calls this implicitly; a task that is merely slow looks the same
//! as a stranded one.

use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info};

use crate::error::TaskError;
use crate::store::TaskStore;

/// Reset `IN_PROGRESS` tasks of `tag` not updated for `max_age`. Returns their IDs.
pub async fn recover_stale(
    store: &dyn TaskStore,
    tag: &str,
    max_age: Duration,
) -> Result<Vec<i64>, TaskError> {
    let max_age = chrono::Duration::from_std(max_age).unwrap_or(chrono::Duration::MAX);
    let cutoff = Utc::now()
        .checked_sub_signed(max_age)
        .unwrap_or(chrono::DateTime::<Utc>::MIN_UTC);

    let reset = store.reset_in_progress(tag, cutoff).await?;
    if reset.is_empty() {
        debug!(tag = %tag, "No stale in-progress tasks");
    } else {
        info!(tag = %tag, count = reset.len(), ids = ?reset, "Reset stale in-progress tasks to RE_PROCESS");
    }
    Ok(reset)
}
