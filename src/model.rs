use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Field names recognized by the in-job agent. The document itself is an
/// open map; these are only the fields this tool knows how to write.
pub const FIELD_POWER_CAP: &str = "power_cap";
pub const FIELD_SHUTDOWN: &str = "shutdown";
pub const FIELD_CHECKPOINT_NOW: &str = "checkpoint_now";

/// The merged set of control directives currently recorded for a run.
///
/// Stored in the signal store under the run name as key, encoded as a JSON
/// object. Consumers must tolerate unknown and missing fields, so the
/// document is an open `Map` rather than a closed struct: directives added
/// in the future flow through the merge path without code changes here.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ControlDocument(pub Map<String, Value>);

impl ControlDocument {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Merge the fields of `partial` into this document, overwriting on
    /// conflict and preserving every field `partial` does not name.
    pub fn merge_from(&mut self, partial: ControlDocument) {
        for (field, value) in partial.0 {
            self.0.insert(field, value);
        }
    }

    /// Build the partial update for a power-cap directive.
    pub fn power_cap_update(watts: u64) -> Self {
        let mut m = Map::new();
        m.insert(FIELD_POWER_CAP.into(), Value::from(watts));
        Self(m)
    }

    /// Build the partial update for a checkpoint directive. `checkpoint_now`
    /// is always set true; there is no cancel operation.
    pub fn checkpoint_update(stop: bool) -> Self {
        let mut m = Map::new();
        m.insert(FIELD_CHECKPOINT_NOW.into(), Value::Bool(true));
        m.insert(FIELD_SHUTDOWN.into(), Value::Bool(stop));
        Self(m)
    }

    pub fn power_cap(&self) -> Option<u64> {
        self.0.get(FIELD_POWER_CAP).and_then(Value::as_u64)
    }

    pub fn shutdown(&self) -> Option<bool> {
        self.0.get(FIELD_SHUTDOWN).and_then(Value::as_bool)
    }

    pub fn checkpoint_now(&self) -> Option<bool> {
        self.0.get(FIELD_CHECKPOINT_NOW).and_then(Value::as_bool)
    }
}

/// Compute resources requested for a new run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComputeSpec {
    pub cluster: String,
    pub gpus: u32,
}

/// Everything the orchestrator needs to launch a run. Ephemeral: handed to
/// the orchestrator on `start` and never persisted here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSpec {
    pub name: String,
    pub image: String,
    pub command: String,
    pub compute: ComputeSpec,
}

/// Opaque handle returned by the orchestrator for a submitted run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunHandle {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub status: Option<String>,
}
