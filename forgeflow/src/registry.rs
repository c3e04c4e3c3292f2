//! Target registry.
//!
//! Targets are loaded once at startup and never mutated afterwards; the
//! registry hands out shared, immutable handles.

use crate::core::Target;
use crate::errors::{ForgeflowError, Result};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Default)]
struct RegistryInner {
    targets: HashMap<String, Arc<Target>>,
    order: Vec<String>,
}

/// Registry of build and deploy targets.
#[derive(Debug, Default)]
pub struct TargetRegistry {
    inner: RwLock<RegistryInner>,
}

impl TargetRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a registry from a list of targets.
    pub fn from_targets(targets: impl IntoIterator<Item = Target>) -> Result<Self> {
        let registry = Self::new();
        for target in targets {
            registry.register(target)?;
        }
        Ok(registry)
    }

    /// Registers a target after validating it.
    pub fn register(&self, target: Target) -> Result<()> {
        target.validate()?;

        let mut inner = self.inner.write();
        if inner.targets.contains_key(&target.id) {
            return Err(ForgeflowError::DuplicateTarget(target.id));
        }

        info!(
            target_id = %target.id,
            kind = %target.kind,
            steps = target.steps.len(),
            enabled = target.enabled,
            "Registered target"
        );
        inner.order.push(target.id.clone());
        inner.targets.insert(target.id.clone(), Arc::new(target));
        Ok(())
    }

    /// Looks up a target by id.
    pub fn get(&self, id: &str) -> Result<Arc<Target>> {
        self.inner.read().targets.get(id).cloned().ok_or_else(|| {
            debug!(target_id = %id, "Target lookup missed");
            ForgeflowError::TargetNotFound(id.to_string())
        })
    }

    /// Looks up a target and checks that it accepts jobs.
    pub fn resolve_enabled(&self, id: &str) -> Result<Arc<Target>> {
        let target = self.get(id)?;
        if !target.enabled {
            return Err(ForgeflowError::TargetDisabled(id.to_string()));
        }
        Ok(target)
    }

    /// All targets in registration order.
    #[must_use]
    pub fn list(&self) -> Vec<Arc<Target>> {
        let inner = self.inner.read();
        inner
            .order
            .iter()
            .filter_map(|id| inner.targets.get(id).cloned())
            .collect()
    }

    /// Number of registered targets.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().order.len()
    }

    /// Returns true if no target is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
