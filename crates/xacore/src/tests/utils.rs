use derive_builder::Builder;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::config::{
    Concurrency, RunSpec, SharePolicyKind, SharingGroup, WorkloadOverride, defaults,
};
use crate::topology::{NodeDescriptor, Topology};
use crate::workload::{
    InvocationOutcome, ResourceRequirement, Workload, WorkloadDefinition, WorkloadRegistry,
    workload_fn,
};

#[derive(Builder, Clone)]
#[builder(pattern = "owned", build_fn(name = "build_config"))]
pub struct SpecConfig {
    #[builder(setter(custom), default)]
    workloads: Vec<String>,
    #[builder(default, setter(strip_option))]
    duration: Option<Duration>,
    #[builder(default = "defaults::TIMEOUT")]
    timeout: Duration,
    #[builder(default, setter(strip_option))]
    run_timeout: Option<Duration>,
    #[builder(default = "Duration::from_secs(1)")]
    grace_period: Duration,
    #[builder(default)]
    delay: Duration,
    #[builder(default = "defaults::MAX_ITERATIONS")]
    max_iterations: u32,
    #[builder(default = "1")]
    repeat: u32,
    #[builder(default = "defaults::SEED")]
    seed: u64,
    #[builder(default = "Concurrency::Unbounded")]
    concurrency: Concurrency,
    #[builder(default)]
    strict: bool,
    #[builder(default)]
    maximize: bool,
    #[builder(default)]
    share_policy: SharePolicyKind,
    #[builder(setter(custom), default)]
    sharing_groups: Vec<SharingGroup>,
    #[builder(setter(custom), default)]
    nodes: Vec<String>,
    #[builder(setter(custom), default)]
    overrides: BTreeMap<String, WorkloadOverride>,
}

impl SpecConfigBuilder {
    pub fn workloads(mut self, names: &[&str]) -> Self {
        self.workloads = Some(names.iter().map(|n| n.to_string()).collect());
        self
    }

    pub fn sharing_group(mut self, name: &str, members: &[&str]) -> Self {
        self.sharing_groups
            .get_or_insert_with(Vec::new)
            .push(SharingGroup {
                name: name.to_string(),
                workloads: members.iter().map(|m| m.to_string()).collect(),
            });
        self
    }

    pub fn nodes(mut self, names: &[&str]) -> Self {
        self.nodes = Some(names.iter().map(|n| n.to_string()).collect());
        self
    }

    pub fn workload_timeout(mut self, name: &str, timeout: Duration) -> Self {
        self.overrides
            .get_or_insert_with(BTreeMap::new)
            .entry(name.to_string())
            .or_default()
            .timeout = Some(timeout);
        self
    }

    pub fn build(self) -> RunSpec {
        let config = self.build_config().unwrap();
        RunSpec {
            name: Some("test".to_string()),
            description: None,
            workloads: config.workloads,
            exclude: Default::default(),
            overrides: config.overrides,
            duration: config.duration,
            timeout: config.timeout,
            run_timeout: config.run_timeout,
            grace_period: config.grace_period,
            delay: config.delay,
            max_iterations: config.max_iterations,
            repeat: config.repeat,
            seed: config.seed,
            concurrency: config.concurrency,
            strict: config.strict,
            maximize: config.maximize,
            share_policy: config.share_policy,
            sharing_groups: config.sharing_groups,
            nodes: config.nodes,
            check: false,
        }
    }
}

pub fn spec_builder() -> SpecConfigBuilder {
    SpecConfigBuilder::default()
}

pub fn succeed() -> Arc<dyn Workload> {
    workload_fn(|_| async { InvocationOutcome::Success })
}

/// Registry of workloads that succeed immediately and need the given number of
/// accelerators.
pub fn registry_with(workloads: &[(&str, u32)]) -> WorkloadRegistry {
    let mut registry = WorkloadRegistry::new();
    for (name, accelerators) in workloads {
        let requirement = if *accelerators > 0 {
            ResourceRequirement::new([("accelerator", *accelerators)]).unwrap()
        } else {
            ResourceRequirement::default()
        };
        registry
            .register(WorkloadDefinition::new(*name, requirement, succeed()))
            .unwrap();
    }
    registry
}

pub fn registry_from(workloads: &[(&str, &[(&str, u32)])]) -> WorkloadRegistry {
    let mut registry = WorkloadRegistry::new();
    for (name, requirement) in workloads {
        let requirement = ResourceRequirement::new(requirement.iter().copied()).unwrap();
        registry
            .register(WorkloadDefinition::new(*name, requirement, succeed()))
            .unwrap();
    }
    registry
}

pub fn single_node(accelerators: u32) -> Topology {
    Topology::new(vec![
        NodeDescriptor::new("node0")
            .with_accelerators(accelerators)
            .with_cpu_groups(&[vec![0, 1, 2, 3], vec![4, 5, 6, 7]]),
    ])
    .unwrap()
}

/// Builder of registries with workloads that have scripted behavior.
#[derive(Default)]
pub struct RegistryBuilder {
    registry: WorkloadRegistry,
}

impl RegistryBuilder {
    pub fn workload(mut self, name: &str, accelerators: u32, workload: Arc<dyn Workload>) -> Self {
        let requirement = if accelerators > 0 {
            ResourceRequirement::new([("accelerator", accelerators)]).unwrap()
        } else {
            ResourceRequirement::default()
        };
        self.registry
            .register(WorkloadDefinition::new(name, requirement, workload))
            .unwrap();
        self
    }

    pub fn build(self) -> WorkloadRegistry {
        self.registry
    }
}

/// Sleeps for `duration` (or until cancelled) and then returns `outcome`.
pub fn sleep_then(duration: Duration, outcome: InvocationOutcome) -> Arc<dyn Workload> {
    workload_fn(move |ctx| {
        let outcome = outcome.clone();
        async move {
            tokio::select! {
                _ = tokio::time::sleep(duration) => outcome,
                _ = ctx.cancel.cancelled() => InvocationOutcome::Failure("cancelled".to_string()),
            }
        }
    })
}

/// Never finishes and ignores cancellation.
pub fn hang() -> Arc<dyn Workload> {
    workload_fn(|_| std::future::pending::<InvocationOutcome>())
}

async fn crash(duration: Duration) -> InvocationOutcome {
    tokio::time::sleep(duration).await;
    panic!("workload crashed")
}

pub fn panic_after(duration: Duration) -> Arc<dyn Workload> {
    workload_fn(move |_| crash(duration))
}

/// Tracks how many invocations run at the same time.
#[derive(Default)]
pub struct ActivityTracker {
    active: AtomicUsize,
    peak: AtomicUsize,
    invocations: AtomicUsize,
}

impl ActivityTracker {
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn invocations(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }

    /// Workload that sleeps for `duration` while being counted as active.
    pub fn sleeper(self: &Arc<Self>, duration: Duration) -> Arc<dyn Workload> {
        let tracker = self.clone();
        workload_fn(move |_| {
            let tracker = tracker.clone();
            async move {
                let now = tracker.active.fetch_add(1, Ordering::SeqCst) + 1;
                tracker.peak.fetch_max(now, Ordering::SeqCst);
                tracker.invocations.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(duration).await;
                tracker.active.fetch_sub(1, Ordering::SeqCst);
                InvocationOutcome::Success
            }
        })
    }
}
