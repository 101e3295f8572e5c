//! Control directive handlers.
//!
//! Each handler builds the partial update for one directive and merges it
//! into the run's control document. Success means the store write landed,
//! not that the in-job agent has observed or acted on anything. Directives
//! may target run names the orchestrator has never seen; the document
//! simply springs into being on first write.

use crate::model::ControlDocument;
use crate::store::{merge_directive, SignalStore, StoreError};

/// Request a power cap, in watts, on every GPU allocated to `run_name`.
///
/// No range check is applied here; clamping to what the hardware supports
/// is the consuming agent's call.
pub async fn request_power_cap<S>(store: &S, run_name: &str, watts: u64) -> Result<(), StoreError>
where
    S: SignalStore + ?Sized,
{
    tracing::info!(run = run_name, watts, "requesting power cap");
    merge_directive(store, run_name, ControlDocument::power_cap_update(watts)).await?;
    Ok(())
}

/// Request a checkpoint on `run_name`, optionally stopping the run after.
///
/// Sets `checkpoint_now: true` unconditionally. Merge semantics mean no
/// later directive clears it implicitly: the consuming agent must reset the
/// flag once it has checkpointed, or every subsequent read will see the
/// request as still pending. With `stop: false` the run is expected to keep
/// training after the checkpoint completes.
pub async fn request_checkpoint<S>(store: &S, run_name: &str, stop: bool) -> Result<(), StoreError>
where
    S: SignalStore + ?Sized,
{
    tracing::info!(run = run_name, stop, "requesting checkpoint");
    merge_directive(store, run_name, ControlDocument::checkpoint_update(stop)).await?;
    Ok(())
}
