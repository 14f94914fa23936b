use thiserror::Error;

use crate::common::ids::{InstanceId, ResourceUnitId};
use crate::report::RunReport;

/// Errors found while resolving configuration layers into a run specification.
/// They are always fatal for the run and are reported before anything executes.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for `{field}`: {reason}")]
    InvalidValue { field: String, reason: String },
    #[error("Unknown workload `{name}` referenced in `{field}`")]
    UnknownWorkload { name: String, field: String },
}

impl ConfigError {
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        ConfigError::InvalidValue {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn unknown_workload(name: impl Into<String>, field: impl Into<String>) -> Self {
        ConfigError::UnknownWorkload {
            name: name.into(),
            field: field.into(),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AllocationError {
    #[error(
        "Allocation is infeasible: instance {instance} of `{workload}` requires {required}x `{kind}`, but only {available} available"
    )]
    Infeasible {
        workload: String,
        instance: InstanceId,
        kind: String,
        required: u32,
        available: u32,
    },
    #[error("Node `{0}` is not part of the topology")]
    UnknownNode(String),
    #[error("Workload `{0}` is not registered")]
    UnknownWorkload(String),
    #[error(transparent)]
    Fatal(#[from] FatalOrchestrationError),
}

/// Internal invariant violations. They abort the whole run.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FatalOrchestrationError {
    #[error(
        "Resource unit {unit} is already bound to instance {holder}, cannot bind it to instance {claimant}"
    )]
    DoubleBinding {
        unit: ResourceUnitId,
        holder: InstanceId,
        claimant: InstanceId,
    },
    #[error("Instance {0} already holds its resources")]
    DoubleAcquire(InstanceId),
    #[error("Instance {0} released resources it does not hold")]
    DoubleRelease(InstanceId),
    #[error("Worker driving instance {instance} crashed: {detail}")]
    WorkerCrashed { instance: InstanceId, detail: String },
    #[error("Orchestration invariant violated: {0}")]
    Invariant(String),
}

/// A fatal error raised during execution, together with the results of the
/// instances that completed before the run was aborted.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct FatalRunError {
    pub error: FatalOrchestrationError,
    pub partial_report: Box<RunReport>,
}

#[derive(Debug, Error)]
pub enum XaError {
    #[error(transparent)]
    ConfigError(#[from] ConfigError),
    #[error(transparent)]
    AllocationError(#[from] AllocationError),
    #[error(transparent)]
    FatalError(#[from] FatalRunError),
    #[error("Registry error: {0}")]
    RegistryError(String),
    #[error("Topology error: {0}")]
    TopologyError(String),
    #[error("Error: {0}")]
    GenericError(String),
}

impl From<String> for XaError {
    fn from(e: String) -> Self {
        Self::GenericError(e)
    }
}

impl From<&str> for XaError {
    fn from(e: &str) -> Self {
        Self::GenericError(e.to_string())
    }
}
