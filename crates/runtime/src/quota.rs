//! Optional resource quotas shared between runtime objects.

use std::sync::{Arc, RwLock};

/// A counter with a cap.
#[derive(Debug)]
pub struct CurrentAndMax {
    inner: RwLock<CurrentAndMaxInner>,
}

#[derive(Debug)]
struct CurrentAndMaxInner {
    current: u64,
    max: u64,
}

impl CurrentAndMax {
    fn new(max: u64) -> Self {
        Self {
            inner: RwLock::new(CurrentAndMaxInner { current: 0, max }),
        }
    }

    /// Tries to allocate `delta` units, failing without effect when the
    /// cap would be exceeded.
    pub fn allocate(&self, delta: u64) -> bool {
        let mut inner = self.inner.write().unwrap();
        match inner.current.checked_add(delta) {
            Some(next) if next <= inner.max => {
                inner.current = next;
                true
            }
            _ => false,
        }
    }

    /// Returns `delta` units.
    pub fn free(&self, delta: u64) {
        let mut inner = self.inner.write().unwrap();
        debug_assert!(inner.current >= delta);
        inner.current = inner.current.saturating_sub(delta);
    }

    /// The currently allocated amount.
    pub fn current(&self) -> u64 {
        self.inner.read().unwrap().current
    }

    /// The cap.
    pub fn max(&self) -> u64 {
        self.inner.read().unwrap().max
    }

    /// Changes the cap. Existing allocations are unaffected even if they
    /// exceed the new cap.
    pub fn set_max(&self, max: u64) {
        self.inner.write().unwrap().max = max;
    }
}

/// Caps on the resources a group of objects may consume. A quota is shared:
/// the objects created against it (and their clones) draw from the same
/// counters.
#[derive(Debug)]
pub struct ResourceQuota {
    /// Cap on memory pages.
    pub memory_pages: CurrentAndMax,
    /// Cap on table elements.
    pub table_elements: CurrentAndMax,
}

impl ResourceQuota {
    /// A quota with the given caps.
    pub fn new(max_memory_pages: u64, max_table_elements: u64) -> Arc<Self> {
        Arc::new(Self {
            memory_pages: CurrentAndMax::new(max_memory_pages),
            table_elements: CurrentAndMax::new(max_table_elements),
        })
    }
}

/// An optional shared quota reference.
pub type ResourceQuotaRef = Option<Arc<ResourceQuota>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocation_respects_the_cap() {
        let quota = ResourceQuota::new(10, 0);
        assert!(quota.memory_pages.allocate(8));
        assert!(!quota.memory_pages.allocate(3));
        assert!(quota.memory_pages.allocate(2));
        quota.memory_pages.free(5);
        assert_eq!(quota.memory_pages.current(), 5);
        assert!(quota.memory_pages.allocate(5));
    }
}
