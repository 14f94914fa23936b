use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::common::Map;
use crate::common::ids::{InstanceId, ResourceUnitId};
use crate::{Error, Result};

/// Result of a single invocation of a workload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvocationOutcome {
    Success,
    Failure(String),
    /// The invocation went fine, but the workload wants to be started again
    /// if its minimum duration was not reached yet.
    NeedsMoreTime,
}

/// Resource unit handed over to a workload invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundResource {
    pub unit: ResourceUnitId,
    pub kind: String,
    pub node: String,
    pub label: String,
}

pub struct InvocationContext {
    pub workload: String,
    pub instance: InstanceId,
    /// 1-based index of the back-to-back iteration
    pub iteration: u32,
    pub resources: Vec<BoundResource>,
    /// Effective minimum duration of the instance
    pub duration: Duration,
    /// Part of the minimum duration that was not covered by previous iterations
    pub remaining: Duration,
    /// Cancelled when the invocation should stop (timeout or run cancellation).
    /// The invocation is dropped if it does not finish within the grace period.
    pub cancel: CancellationToken,
}

impl InvocationContext {
    pub fn labels_of_kind(&self, kind: &str) -> Vec<&str> {
        self.resources
            .iter()
            .filter(|r| r.kind == kind)
            .map(|r| r.label.as_str())
            .collect()
    }
}

pub type InvocationFuture = Pin<Box<dyn Future<Output = InvocationOutcome> + Send>>;

/// Uniform invocation contract of a workload.
pub trait Workload: Send + Sync {
    fn start(&self, ctx: InvocationContext) -> InvocationFuture;
}

/// Closure-based workload adapter.
pub struct FnWorkload<F> {
    function: F,
}

impl<F, Fut> Workload for FnWorkload<F>
where
    F: Fn(InvocationContext) -> Fut + Send + Sync,
    Fut: Future<Output = InvocationOutcome> + Send + 'static,
{
    fn start(&self, ctx: InvocationContext) -> InvocationFuture {
        Box::pin((self.function)(ctx))
    }
}

pub fn workload_fn<F, Fut>(function: F) -> Arc<dyn Workload>
where
    F: Fn(InvocationContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = InvocationOutcome> + Send + 'static,
{
    Arc::new(FnWorkload { function })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequirementEntry {
    pub kind: String,
    pub amount: u32,
}

/// Ordered set of (resource kind, quantity) pairs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRequirement {
    entries: SmallVec<[RequirementEntry; 2]>,
}

impl ResourceRequirement {
    pub fn new<S: Into<String>>(entries: impl IntoIterator<Item = (S, u32)>) -> Result<Self> {
        let mut result = ResourceRequirement::default();
        for (kind, amount) in entries {
            let kind = kind.into();
            if amount == 0 {
                return Err(Error::RegistryError(format!(
                    "Requirement of `{kind}` has to be positive"
                )));
            }
            if result.entries.iter().any(|e| e.kind == kind) {
                return Err(Error::RegistryError(format!(
                    "Resource kind `{kind}` is requested multiple times"
                )));
            }
            result.entries.push(RequirementEntry { kind, amount });
        }
        Ok(result)
    }

    #[inline]
    pub fn entries(&self) -> &[RequirementEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Display for ResourceRequirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.entries.is_empty() {
            return write!(f, "none");
        }
        for (i, entry) in self.entries.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}x {}", entry.amount, entry.kind)?;
        }
        Ok(())
    }
}

pub struct WorkloadDefinition {
    name: String,
    description: String,
    requirement: ResourceRequirement,
    default_duration: Duration,
    workload: Arc<dyn Workload>,
}

impl WorkloadDefinition {
    pub fn new(
        name: impl Into<String>,
        requirement: ResourceRequirement,
        workload: Arc<dyn Workload>,
    ) -> Self {
        WorkloadDefinition {
            name: name.into(),
            description: String::new(),
            requirement,
            default_duration: Duration::ZERO,
            workload,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_default_duration(mut self, duration: Duration) -> Self {
        self.default_duration = duration;
        self
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    #[inline]
    pub fn requirement(&self) -> &ResourceRequirement {
        &self.requirement
    }

    pub fn default_duration(&self) -> Duration {
        self.default_duration
    }

    pub fn workload(&self) -> &Arc<dyn Workload> {
        &self.workload
    }
}

impl fmt::Debug for WorkloadDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkloadDefinition")
            .field("name", &self.name)
            .field("requirement", &self.requirement)
            .field("default_duration", &self.default_duration)
            .finish_non_exhaustive()
    }
}

/// Catalog of workloads, populated at startup by explicit registration.
#[derive(Default)]
pub struct WorkloadRegistry {
    definitions: Vec<WorkloadDefinition>,
    index: Map<String, usize>,
}

impl WorkloadRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, definition: WorkloadDefinition) -> Result<()> {
        if definition.name.is_empty() || definition.name == "all" {
            return Err(Error::RegistryError(format!(
                "Invalid workload name `{}`",
                definition.name
            )));
        }
        if self.index.contains_key(&definition.name) {
            return Err(Error::RegistryError(format!(
                "Workload `{}` is already registered",
                definition.name
            )));
        }
        log::debug!(
            "Registering workload `{}` ({})",
            definition.name,
            definition.requirement
        );
        self.index
            .insert(definition.name.clone(), self.definitions.len());
        self.definitions.push(definition);
        Ok(())
    }

    pub fn by_name(&self, name: &str) -> Option<&WorkloadDefinition> {
        self.index.get(name).map(|&idx| &self.definitions[idx])
    }

    #[inline]
    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Definitions in registration order.
    pub fn list_all(&self) -> &[WorkloadDefinition] {
        &self.definitions
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.definitions.iter().map(|d| d.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}
