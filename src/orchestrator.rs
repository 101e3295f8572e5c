//! Run lifecycle facade.
//!
//! Thin pass-through to the cluster orchestrator's HTTP API: submit a
//! [`RunSpec`] to start a run, request termination by name to stop one.
//! No retries, no local state; every rejection propagates untouched so the
//! operator sees the orchestrator's own reason.

use crate::model::{RunHandle, RunSpec};
use std::time::Duration;
use thiserror::Error;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("orchestrator request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("orchestrator rejected {action} for run {run:?}: {status}: {message}")]
    Rejected {
        action: &'static str,
        run: String,
        status: reqwest::StatusCode,
        message: String,
    },
}

pub struct Orchestrator {
    base_url: String,
    http: reqwest::Client,
}

impl Orchestrator {
    pub fn new(base_url: &str) -> Result<Self, OrchestratorError> {
        let http = reqwest::Client::builder()
            .user_agent(format!("runctl/{}", env!("CARGO_PKG_VERSION")))
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
        })
    }

    /// Submit `spec` for scheduling and return the orchestrator's handle
    /// for the new run.
    pub async fn start(&self, spec: &RunSpec) -> Result<RunHandle, OrchestratorError> {
        tracing::info!(
            run = %spec.name,
            cluster = %spec.compute.cluster,
            gpus = spec.compute.gpus,
            "submitting run"
        );
        let url = format!("{}/v1/runs", self.base_url);
        let resp = self.http.post(&url).json(spec).send().await?;
        if !resp.status().is_success() {
            return Err(rejected("start", &spec.name, resp).await);
        }
        Ok(resp.json().await?)
    }

    /// Request termination of an existing run by handle id or name.
    pub async fn stop(&self, run: &str) -> Result<(), OrchestratorError> {
        tracing::info!(run, "stopping run");
        let url = format!("{}/v1/runs/{run}/stop", self.base_url);
        let resp = self.http.post(&url).send().await?;
        if !resp.status().is_success() {
            return Err(rejected("stop", run, resp).await);
        }
        Ok(())
    }
}

async fn rejected(action: &'static str, run: &str, resp: reqwest::Response) -> OrchestratorError {
    let status = resp.status();
    let message = resp.text().await.unwrap_or_default();
    OrchestratorError::Rejected {
        action,
        run: run.to_string(),
        status,
        message,
    }
}
