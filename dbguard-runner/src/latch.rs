//! Process-wide single-action guard: at most one backup or restore
//! may be in flight at a time, enforced with one atomic CAS rather
//! than a mutex so the rejection path never blocks.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{Result, RunnerError};

#[derive(Default)]
pub struct ActionLatch {
    running: AtomicBool,
}

/// Clears the latch when dropped, including on an early return or
/// panic inside the guarded action.
pub struct ActionGuard<'a> {
    latch: &'a ActionLatch,
}

impl Drop for ActionGuard<'_> {
    fn drop(&mut self) {
        self.latch.running.store(false, Ordering::SeqCst);
    }
}

impl ActionLatch {
    /// Attempts to acquire the latch. Fails with [`RunnerError::Concurrent`]
    /// if another action is already running.
    pub fn acquire(&self) -> Result<ActionGuard<'_>> {
        self.running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| RunnerError::Concurrent)?;
        Ok(ActionGuard { latch: self })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_while_held_is_rejected() {
        let latch = ActionLatch::default();
        let _guard = latch.acquire().unwrap();
        assert!(matches!(latch.acquire(), Err(RunnerError::Concurrent)));
    }

    #[test]
    fn releases_on_guard_drop() {
        let latch = ActionLatch::default();
        {
            let _guard = latch.acquire().unwrap();
        }
        assert!(latch.acquire().is_ok());
    }
}
