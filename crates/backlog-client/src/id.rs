//! Placeholder identifiers for optimistically inserted items.

use std::sync::atomic::{AtomicU64, Ordering};

/// Source of locally-unique ids for items the server has not named yet.
pub trait IdGenerator: Send + Sync {
    /// Return an id never returned before by this generator.
    fn next_id(&self) -> String;
}

/// Generates `new_1`, `new_2`, ...
#[derive(Debug, Default)]
pub struct SequentialIdGenerator {
    count: AtomicU64,
}

impl SequentialIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }
}

impl IdGenerator for SequentialIdGenerator {
    fn next_id(&self) -> String {
        let n = self.count.fetch_add(1, Ordering::Relaxed) + 1;
        format!("new_{}", n)
    }
}

impl<F> IdGenerator for F
where
    F: Fn() -> String + Send + Sync,
{
    fn next_id(&self) -> String {
        self()
    }
}
