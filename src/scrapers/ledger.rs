//! At-most-once visitation tracking for a single run.

use std::collections::HashSet;

use crate::models::ResourceRef;

/// Resources already dispatched during this run.
///
/// Grows monotonically and is never persisted; a new run starts empty.
#[derive(Debug, Default, Clone)]
pub struct VisitationLedger {
    visited: HashSet<ResourceRef>,
}

impl VisitationLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_visited(&self, resource: &ResourceRef) -> bool {
        self.visited.contains(resource)
    }

    /// Idempotent insert.
    pub fn mark_visited(&mut self, resource: &ResourceRef) {
        self.visited.insert(resource.clone());
    }

    /// Check and mark in one step. Returns `true` if `resource` was new.
    pub fn claim(&mut self, resource: &ResourceRef) -> bool {
        self.visited.insert(resource.clone())
    }

    pub fn len(&self) -> usize {
        self.visited.len()
    }

    pub fn is_empty(&self) -> bool {
        self.visited.is_empty()
    }
}
