//! The debugger mutex
use core::sync::atomic::{AtomicUsize, Ordering};

use crate::{
    error::Violation,
    port::{IntrState, Port},
    state::Kernel,
    witness::{LockClass, LockFlags, LockObject, LockType},
    CpuId,
};

const DB_MUTEX_TYPE: &LockType = &LockType::new("db_mutex");

const NO_OWNER: usize = 0;

/// A spin mutex for the kernel debugger.
///
/// Unlike [`Mutex`](crate::Mutex), a `DbMutex` is held with interrupts
/// disabled instead of at a raised IPL, is invisible to the witness, and is
/// *not* bypassed while the debugger is active. It's what serializes the
/// debugger itself between processors.
#[derive(Debug)]
pub struct DbMutex {
    owner: AtomicUsize,
    /// The interrupt state to restore on release. Only accessed by the owner
    intr: AtomicUsize,
    lock_obj: LockObject,
}

impl DbMutex {
    pub const fn new() -> Self {
        Self {
            owner: AtomicUsize::new(NO_OWNER),
            intr: AtomicUsize::new(0),
            lock_obj: LockObject::new(
                "",
                DB_MUTEX_TYPE,
                LockFlags::INITIALIZED,
                LockClass::DbMutex,
            ),
        }
    }

    /// Get the processor holding the mutex.
    pub fn owner(&self) -> Option<CpuId> {
        match self.owner.load(Ordering::Relaxed) {
            NO_OWNER => None,
            x => CpuId::new(x - 1),
        }
    }

    /// Disable interrupts and acquire the mutex, spinning until it's
    /// available.
    pub fn enter<P: Port>(&self, k: &Kernel<P>) {
        let cpu = k.cpu();
        let me = cpu.index() + 1;

        if self.owner.load(Ordering::Relaxed) == me {
            k.violation(Violation::LockingAgainstMyself, &self.lock_obj);
        }

        let intr = k.port().intr_disable();
        while self
            .owner
            .compare_exchange_weak(NO_OWNER, me, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            k.port().busy_cycle();
        }
        self.intr.store(intr.0, Ordering::Relaxed);
        k.cpu_state(cpu).mutex_level.fetch_add(1, Ordering::Relaxed);
    }

    /// Release the mutex and restore the interrupt state saved by
    /// [`Self::enter`].
    pub fn leave<P: Port>(&self, k: &Kernel<P>) {
        let cpu = k.cpu();
        if self.owner.load(Ordering::Relaxed) != cpu.index() + 1 {
            k.violation(Violation::NotOwner, &self.lock_obj);
        }

        let intr = IntrState(self.intr.load(Ordering::Relaxed));
        k.cpu_state(cpu).mutex_level.fetch_sub(1, Ordering::Relaxed);
        self.owner.store(NO_OWNER, Ordering::Release);
        k.port().intr_restore(intr);
    }
}

impl Default for DbMutex {
    fn default() -> Self {
        Self::new()
    }
}
