use crate::error::Mismatch;
use crate::registry::ImageRegistry;
use crate::workload::WorkloadRef;
use crate::workload_store::WorkloadStore;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

/// What a reconciliation cycle tracks: the channel tag of one repository and the workload running it.
#[derive(Debug, Clone)]
pub struct Target {
    pub region: String,
    pub repository: String,
    pub channel_tag: String,
    pub workload: WorkloadRef,
}

pub struct ControllerContext {
    pub(crate) registry: Arc<dyn ImageRegistry>,
    pub(crate) workload_store: Arc<dyn WorkloadStore>,
    pub(crate) target: Target,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum CycleOutcome {
    Updated {
        container: String,
        image: String,
    },
    NoOpAlreadyCurrent {
        container: String,
        tag: String,
    },
    SkippedConfigMismatch {
        #[serde(flatten)]
        mismatch: Mismatch,
    },
    ErrorTransient {
        message: String,
    },
}

/// Last finished cycle, published for the status endpoint.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleReport {
    pub cycle: u64,
    pub finished_at: DateTime<Utc>,
    #[serde(flatten)]
    pub outcome: CycleOutcome,
}
