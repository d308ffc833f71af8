//! Interrupt handshake emulation
//!
//! There is no interrupt source behind the emulated card. Client software
//! still expects the enable / wait / disable cycle of a real driver, where
//! a wait thread sleeps until an interrupt arrives or interrupts are
//! disabled. The gate reproduces that cycle:
//!
//! - `enable` arms the gate (idempotent)
//! - with a USB device matched, the first `wait` after arming returns at
//!   once and marks the interrupt as pending
//! - every other wait sleeps until `disable`
//! - `disable` disarms the gate, clears the pending count and wakes every
//!   sleeping waiter
//!
//! While disarmed, `wait` returns immediately.

use std::sync::{Condvar, Mutex, MutexGuard};
use tracing::debug;

/// Observable state of the gate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatePhase {
    Disabled,
    /// Enabled, no wait has consumed the pending interrupt yet
    Armed,
    /// Enabled, later waits will sleep until disable
    Signaled,
}

/// How a wait ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// Interrupts were disabled when the wait started
    Disabled,
    /// First wait after enable with a device matched; passed without sleeping
    FirstWait,
    /// Slept until interrupts were disabled
    Released,
}

#[derive(Debug, Default)]
struct GateState {
    enabled: bool,
    pending: u64,
    /// Bumped by every disable so sleeping waiters can tell they were released
    generation: u64,
    waiters: usize,
}

#[derive(Debug, Default)]
pub struct InterruptGate {
    state: Mutex<GateState>,
    released: Condvar,
}

impl InterruptGate {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn enable(&self) {
        let mut state = self.lock();
        if !state.enabled {
            state.enabled = true;
            debug!("Interrupts enabled");
        }
    }

    pub fn disable(&self) {
        let mut state = self.lock();
        state.enabled = false;
        state.pending = 0;
        state.generation = state.generation.wrapping_add(1);
        debug!("Interrupts disabled, waking {} waiters", state.waiters);
        self.released.notify_all();
    }

    /// Block as a driver interrupt wait would
    ///
    /// `has_device` tells whether a USB device is matched; without one no
    /// interrupt is ever reported pending.
    pub fn wait(&self, has_device: bool) -> WaitOutcome {
        let mut state = self.lock();
        if !state.enabled {
            return WaitOutcome::Disabled;
        }
        if has_device && state.pending == 0 {
            state.pending = 1;
            return WaitOutcome::FirstWait;
        }

        let generation = state.generation;
        state.waiters += 1;
        while state.generation == generation {
            state = self
                .released
                .wait(state)
                .unwrap_or_else(|e| e.into_inner());
        }
        state.waiters -= 1;
        WaitOutcome::Released
    }

    pub fn phase(&self) -> GatePhase {
        let state = self.lock();
        match (state.enabled, state.pending) {
            (false, _) => GatePhase::Disabled,
            (true, 0) => GatePhase::Armed,
            (true, _) => GatePhase::Signaled,
        }
    }

    pub fn pending(&self) -> u64 {
        self.lock().pending
    }

    /// Number of threads currently sleeping in [`wait`](Self::wait)
    pub fn waiters(&self) -> usize {
        self.lock().waiters
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_wait_while_disabled_returns() {
        let gate = InterruptGate::new();
        assert_eq!(gate.wait(true), WaitOutcome::Disabled);
        assert_eq!(gate.phase(), GatePhase::Disabled);
    }

    #[test]
    fn test_first_wait_passes_once() {
        let gate = InterruptGate::new();
        gate.enable();
        gate.enable();
        assert_eq!(gate.phase(), GatePhase::Armed);
        assert_eq!(gate.wait(true), WaitOutcome::FirstWait);
        assert_eq!(gate.pending(), 1);
        assert_eq!(gate.phase(), GatePhase::Signaled);
    }

    #[test]
    fn test_disable_releases_sleeping_waiter() {
        let gate = Arc::new(InterruptGate::new());
        gate.enable();
        assert_eq!(gate.wait(true), WaitOutcome::FirstWait);

        let waiter = {
            let gate = Arc::clone(&gate);
            thread::spawn(move || gate.wait(true))
        };
        while gate.waiters() == 0 {
            thread::sleep(Duration::from_millis(1));
        }
        assert!(!waiter.is_finished());

        gate.disable();
        assert_eq!(waiter.join().unwrap(), WaitOutcome::Released);
        assert_eq!(gate.pending(), 0);
        assert_eq!(gate.phase(), GatePhase::Disabled);
    }

    #[test]
    fn test_first_wait_sleeps_without_device() {
        let gate = Arc::new(InterruptGate::new());
        gate.enable();

        let waiter = {
            let gate = Arc::clone(&gate);
            thread::spawn(move || gate.wait(false))
        };
        while gate.waiters() == 0 {
            thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(gate.phase(), GatePhase::Armed);

        gate.disable();
        assert_eq!(waiter.join().unwrap(), WaitOutcome::Released);
    }

    #[test]
    fn test_reenable_rearms() {
        let gate = InterruptGate::new();
        gate.enable();
        gate.wait(true);
        gate.disable();
        gate.enable();
        assert_eq!(gate.wait(true), WaitOutcome::FirstWait);
    }
}
