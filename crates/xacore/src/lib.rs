#[macro_use]
pub mod common;

pub mod allocator;
pub mod config;
pub mod context;
pub mod orchestrator;
pub mod report;
pub mod scheduler;
pub mod topology;
pub mod workload;

#[cfg(test)]
pub(crate) mod tests;

pub use crate::common::ids::{InstanceId, NodeId, ResourceUnitId};
pub use crate::common::{Map, Set};
pub use crate::context::RunContext;
pub use crate::orchestrator::{Orchestration, Orchestrator};

pub type Error = common::error::XaError;
pub type Result<T> = std::result::Result<T, Error>;

pub mod error {
    pub use crate::common::error::{
        AllocationError, ConfigError, FatalOrchestrationError, FatalRunError, XaError,
    };
}
