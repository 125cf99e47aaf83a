//! Instance registry capability
//!
//! A registry enumerates the candidate kernel instances for one operation
//! signature. Enumeration order is NOT contractually stable across calls,
//! builds or library versions — which is exactly why dispatch re-validates
//! the cached identity token instead of trusting an index.

use std::sync::Arc;

use crate::instance::{KernelInstance, Operation};

/// Enumerates candidate instances for an operation signature
pub trait InstanceRegistry<Op: Operation> {
    /// All candidate instances, in the provider's current order
    fn enumerate(&self) -> Vec<Arc<dyn KernelInstance<Op>>>;
}

/// Fixed, in-memory instance provider
///
/// Enumerates instances in insertion order. Tests reorder it to simulate a
/// provider whose ordering changed between runs.
pub struct StaticRegistry<Op: Operation> {
    instances: Vec<Arc<dyn KernelInstance<Op>>>,
}

impl<Op: Operation> StaticRegistry<Op> {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self {
            instances: Vec::new(),
        }
    }

    /// Create a registry from a fixed instance list
    #[must_use]
    pub fn from_instances(instances: Vec<Arc<dyn KernelInstance<Op>>>) -> Self {
        Self { instances }
    }

    /// Append an instance
    pub fn push(&mut self, instance: Arc<dyn KernelInstance<Op>>) {
        self.instances.push(instance);
    }

    /// Number of registered instances
    #[must_use]
    pub fn len(&self) -> usize {
        self.instances.len()
    }

    /// Whether the registry is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// Reverse enumeration order
    ///
    /// Simulates an unstable provider; staleness tests rely on this.
    pub fn reverse(&mut self) {
        self.instances.reverse();
    }

    /// Drop all instances past `len`
    pub fn truncate(&mut self, len: usize) {
        self.instances.truncate(len);
    }
}

impl<Op: Operation> Default for StaticRegistry<Op> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Op: Operation> InstanceRegistry<Op> for StaticRegistry<Op> {
    fn enumerate(&self) -> Vec<Arc<dyn KernelInstance<Op>>> {
        self.instances.clone()
    }
}
