//! In-process serialization of exclusive jobs.
//!
//! Two exclusive jobs of the same process instance acquired by different
//! workers must not run concurrently; without this they would fight over the
//! instance's optimistic lock in the store and burn retries on self-inflicted
//! conflicts. The table blocks the later worker until the earlier sibling
//! finished, so the wait is bounded by that job's own execution time.

use std::collections::HashSet;
use std::sync::{Condvar, Mutex};

use flowforge_core::ProcessInstanceId;

/// Serializes execution per process instance.
#[derive(Debug, Default)]
pub struct ExclusiveJobTable {
    busy: Mutex<HashSet<ProcessInstanceId>>,
    released: Condvar,
}

impl ExclusiveJobTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until the instance's slot is free, then hold it.
    ///
    /// The slot releases when the returned guard drops, on every exit path,
    /// including panics unwinding out of a handler.
    pub fn acquire(&self, instance: ProcessInstanceId) -> ExclusiveSlot<'_> {
        let mut busy = self.busy.lock().unwrap();
        while busy.contains(&instance) {
            busy = self.released.wait(busy).unwrap();
        }
        busy.insert(instance);
        ExclusiveSlot {
            table: self,
            instance,
        }
    }

    /// Whether an exclusive job of this instance is currently executing.
    pub fn is_busy(&self, instance: ProcessInstanceId) -> bool {
        self.busy.lock().unwrap().contains(&instance)
    }
}

/// RAII slot handle; dropping it releases the instance.
#[derive(Debug)]
pub struct ExclusiveSlot<'a> {
    table: &'a ExclusiveJobTable,
    instance: ProcessInstanceId,
}

impl Drop for ExclusiveSlot<'_> {
    fn drop(&mut self) {
        // must not panic mid-unwind; recover the set even if a lock holder
        // panicked elsewhere
        let mut busy = match self.table.busy.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        busy.remove(&self.instance);
        self.table.released.notify_all();
    }
}
