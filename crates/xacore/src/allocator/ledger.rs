use smallvec::SmallVec;

use crate::common::Map;
use crate::common::error::FatalOrchestrationError;
use crate::common::ids::{InstanceId, ResourceUnitId};

type Units = SmallVec<[ResourceUnitId; 4]>;

#[derive(Debug, Clone)]
enum Holder {
    Exclusive(InstanceId),
    Shared {
        group: String,
        instances: SmallVec<[InstanceId; 4]>,
    },
}

impl Holder {
    fn first(&self) -> InstanceId {
        match self {
            Holder::Exclusive(instance) => *instance,
            Holder::Shared { instances, .. } => instances[0],
        }
    }
}

/// Bookkeeping of which instance holds which resource unit.
///
/// A unit is held either by a single instance or by several instances of the
/// same sharing group. The allocator uses the ledger to build the plan, the
/// scheduler uses a fresh one to track bindings while the plan executes.
#[derive(Debug, Default)]
pub struct ResourceLedger {
    holders: Map<ResourceUnitId, Holder>,
    held: Map<InstanceId, (Option<String>, Units)>,
}

impl ResourceLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn can_bind(&self, unit: ResourceUnitId, group: Option<&str>) -> bool {
        match (self.holders.get(&unit), group) {
            (None, _) => true,
            (Some(Holder::Shared { group: holder, .. }), Some(group)) => holder == group,
            _ => false,
        }
    }

    /// Number of instances currently holding `unit`.
    pub fn holder_count(&self, unit: ResourceUnitId) -> usize {
        match self.holders.get(&unit) {
            None => 0,
            Some(Holder::Exclusive(_)) => 1,
            Some(Holder::Shared { instances, .. }) => instances.len(),
        }
    }

    pub fn holds(&self, instance: InstanceId) -> bool {
        self.held.contains_key(&instance)
    }

    #[inline]
    pub fn is_idle(&self) -> bool {
        self.holders.is_empty() && self.held.is_empty()
    }

    /// Binds all `units` to `instance`, or nothing at all.
    pub fn acquire(
        &mut self,
        instance: InstanceId,
        units: &[ResourceUnitId],
        group: Option<&str>,
    ) -> Result<(), FatalOrchestrationError> {
        if self.holds(instance) {
            return Err(FatalOrchestrationError::DoubleAcquire(instance));
        }
        for (i, unit) in units.iter().enumerate() {
            if units[..i].contains(unit) {
                return Err(FatalOrchestrationError::Invariant(format!(
                    "instance {instance} requested resource unit {unit} twice"
                )));
            }
            if !self.can_bind(*unit, group) {
                let holder = self.holders[unit].first();
                return Err(FatalOrchestrationError::DoubleBinding {
                    unit: *unit,
                    holder,
                    claimant: instance,
                });
            }
        }
        self.held
            .insert(instance, (group.map(|g| g.to_string()), Units::new()));
        for unit in units {
            self.bind(instance, *unit);
        }
        Ok(())
    }

    /// Releases all units held by `instance` and returns them.
    pub fn release(&mut self, instance: InstanceId) -> Result<Units, FatalOrchestrationError> {
        let (_, units) = self
            .held
            .remove(&instance)
            .ok_or(FatalOrchestrationError::DoubleRelease(instance))?;
        for unit in &units {
            self.unbind(instance, *unit);
        }
        Ok(units)
    }

    /// Opens a transaction of provisional claims for `instance`. Claims are
    /// rolled back unless the transaction is committed.
    pub fn transaction<'a>(
        &'a mut self,
        instance: InstanceId,
        group: Option<&'a str>,
    ) -> Result<LedgerTransaction<'a>, FatalOrchestrationError> {
        if self.holds(instance) {
            return Err(FatalOrchestrationError::DoubleAcquire(instance));
        }
        self.held
            .insert(instance, (group.map(|g| g.to_string()), Units::new()));
        Ok(LedgerTransaction {
            ledger: self,
            instance,
            group,
            committed: false,
        })
    }

    fn bind(&mut self, instance: InstanceId, unit: ResourceUnitId) {
        let group = self
            .held
            .get_mut(&instance)
            .map(|(group, units)| {
                units.push(unit);
                group.clone()
            })
            .unwrap_or_default();
        match group {
            Some(group) => {
                if let Some(Holder::Shared { instances, .. }) = self.holders.get_mut(&unit) {
                    instances.push(instance);
                } else {
                    self.holders.insert(
                        unit,
                        Holder::Shared {
                            group,
                            instances: SmallVec::from_elem(instance, 1),
                        },
                    );
                }
            }
            None => {
                self.holders.insert(unit, Holder::Exclusive(instance));
            }
        }
    }

    fn unbind(&mut self, instance: InstanceId, unit: ResourceUnitId) {
        let remove = match self.holders.get_mut(&unit) {
            Some(Holder::Shared { instances, .. }) => {
                instances.retain(|i| *i != instance);
                instances.is_empty()
            }
            Some(Holder::Exclusive(_)) => true,
            None => false,
        };
        if remove {
            self.holders.remove(&unit);
        }
    }
}

pub struct LedgerTransaction<'a> {
    ledger: &'a mut ResourceLedger,
    instance: InstanceId,
    group: Option<&'a str>,
    committed: bool,
}

impl LedgerTransaction<'_> {
    pub fn ledger(&self) -> &ResourceLedger {
        self.ledger
    }

    pub fn claimed(&self) -> &[ResourceUnitId] {
        self.ledger
            .held
            .get(&self.instance)
            .map(|(_, units)| units.as_slice())
            .unwrap_or_default()
    }

    /// Returns false if the unit is not available to this instance.
    pub fn claim(&mut self, unit: ResourceUnitId) -> bool {
        if self.claimed().contains(&unit) || !self.ledger.can_bind(unit, self.group) {
            return false;
        }
        self.ledger.bind(self.instance, unit);
        true
    }

    pub fn commit(mut self) -> Units {
        self.committed = true;
        self.claimed().iter().copied().collect()
    }
}

impl Drop for LedgerTransaction<'_> {
    fn drop(&mut self) {
        if !self.committed {
            log::debug!(
                "Rolling back {} provisional claim(s) of instance {}",
                self.claimed().len(),
                self.instance
            );
            let _ = self.ledger.release(self.instance);
        }
    }
}
