//! Ticket locks and the recursive multiprocessor lock
use core::sync::atomic::{fence, AtomicU32, Ordering};

use crate::{
    error::Violation,
    percpu::{CpuId, CpuTable},
    port::Port,
    spinout::Spinout,
    state::Kernel,
    witness::{LockClass, LockFlags, LockObject, LockType},
};

/// A FIFO ticket counter pair.
///
/// A CPU takes a ticket by incrementing `users` and owns the lock while its
/// ticket equals `serving`. Tickets are served in the order they were taken.
/// Both counters wrap around.
#[derive(Debug)]
pub struct TicketLock {
    users: AtomicU32,
    serving: AtomicU32,
}

impl TicketLock {
    pub const fn new() -> Self {
        // The first ticket handed out is `1`
        Self {
            users: AtomicU32::new(0),
            serving: AtomicU32::new(1),
        }
    }

    /// Take the next ticket.
    #[inline]
    pub fn take_ticket(&self) -> u32 {
        self.users.fetch_add(1, Ordering::Relaxed).wrapping_add(1)
    }

    /// Get the ticket being served.
    #[inline]
    pub fn serving(&self) -> u32 {
        self.serving.load(Ordering::Relaxed)
    }

    /// Get the last ticket handed out.
    #[inline]
    pub fn users(&self) -> u32 {
        self.users.load(Ordering::Relaxed)
    }

    /// Get the number of tickets taken but not served yet, including the
    /// one being served.
    #[inline]
    pub fn waiting(&self) -> u32 {
        self.users().wrapping_sub(self.serving()).wrapping_add(1)
    }

    /// Serve the next ticket. Must only be called by the holder of the
    /// ticket being served.
    #[inline]
    fn advance(&self) {
        self.serving.fetch_add(1, Ordering::Release);
    }
}

impl Default for TicketLock {
    fn default() -> Self {
        Self::new()
    }
}

/// The per-CPU part of [`MpLock`]. Only written by its own CPU.
#[derive(Debug, Default)]
struct MpLockCpu {
    ticket: AtomicU32,
    depth: AtomicU32,
}

/// A recursive, ticket-ordered spin lock.
///
/// A CPU can acquire an `MpLock` it already holds; each acquisition must be
/// matched by a release. Waiting CPUs are granted the lock in the order they
/// started waiting.
#[derive(Debug)]
pub struct MpLock {
    ticket: TicketLock,
    cpus: CpuTable<MpLockCpu>,
    lock_obj: LockObject,
}

const MPLOCK_FLAGS: LockFlags = LockFlags::from_bits_truncate(
    LockFlags::WITNESS.bits()
        | LockFlags::INITIALIZED.bits()
        | LockFlags::SLEEPABLE.bits()
        | LockFlags::RECURSABLE.bits(),
);

impl MpLock {
    /// Construct an `MpLock` for the processors of `k`.
    pub fn new<P: Port>(k: &Kernel<P>, name: &'static str, ty: &'static LockType) -> Self {
        Self::with_table(k.cpu_table(), name, ty)
    }

    pub(crate) fn with_table<T>(
        table: &CpuTable<T>,
        name: &'static str,
        ty: &'static LockType,
    ) -> Self {
        Self {
            ticket: TicketLock::new(),
            cpus: table.map(|_, _| MpLockCpu::default()),
            lock_obj: LockObject::new(name, ty, MPLOCK_FLAGS, LockClass::KernelLock),
        }
    }

    #[inline]
    fn slot<P: Port>(&self, k: &Kernel<P>, cpu: CpuId) -> &MpLockCpu {
        match self.cpus.get(cpu) {
            Some(slot) => slot,
            None => k.cpu_out_of_range(cpu),
        }
    }

    /// Acquire the lock on the current processor, spinning until it's
    /// granted.
    pub fn lock<P: Port>(&self, k: &Kernel<P>) {
        if k.is_bypassed() {
            return;
        }

        let cpu = k.cpu();
        let slot = self.slot(k, cpu);

        if !self.held_by(cpu) {
            k.witness().check_order(k, &self.lock_obj, cpu);
        }

        // The ticket and the depth must be updated together with respect to
        // interrupt handlers on this CPU
        let intr = k.port().intr_disable();
        if slot.depth.fetch_add(1, Ordering::Relaxed) == 0 {
            slot.ticket
                .store(self.ticket.take_ticket(), Ordering::Relaxed);
        }
        k.port().intr_restore(intr);

        self.spin(k, cpu, slot.ticket.load(Ordering::Relaxed));
        fence(Ordering::Acquire);

        log::trace!("{cpu}: {} acquired (depth {})", self.lock_obj, self.depth(cpu));

        k.witness().lock(k, &self.lock_obj, cpu);
    }

    fn spin<P: Port>(&self, k: &Kernel<P>, cpu: CpuId, ticket: u32) {
        if self.ticket.serving() == ticket {
            return;
        }

        let state = k.cpu_state(cpu);
        state.spinning.fetch_add(1, Ordering::Relaxed);

        let mut spinout = Spinout::new(k);
        while self.ticket.serving() != ticket {
            k.port().busy_cycle();
            spinout.tick("MpLock::lock", &self.lock_obj, cpu);
        }

        state.spinning.fetch_sub(1, Ordering::Relaxed);
    }

    /// Release one level of the lock held by the current processor.
    ///
    /// Releasing a lock the processor doesn't hold is a fatal contract
    /// violation.
    pub fn unlock<P: Port>(&self, k: &Kernel<P>) {
        if k.is_bypassed() {
            return;
        }

        let cpu = k.cpu();
        let slot = self.slot(k, cpu);

        if !self.held_by(cpu) {
            k.violation(Violation::NotHeld, &self.lock_obj);
        }

        k.witness().unlock(k, &self.lock_obj, cpu);

        let intr = k.port().intr_disable();
        if slot.depth.fetch_sub(1, Ordering::Relaxed) == 1 {
            self.ticket.advance();
            log::trace!("{cpu}: {} released", self.lock_obj);
        }
        k.port().intr_restore(intr);
    }

    /// Release every level of the lock held by the current processor and
    /// return the depth it was held at. Returns `0` when bypassed.
    pub fn release_all<P: Port>(&self, k: &Kernel<P>) -> u32 {
        if k.is_bypassed() {
            return 0;
        }

        let cpu = k.cpu();
        let slot = self.slot(k, cpu);

        if !self.held_by(cpu) {
            k.violation(Violation::NotHeld, &self.lock_obj);
        }

        let intr = k.port().intr_disable();
        let depth = slot.depth.load(Ordering::Relaxed);
        for _ in 0..depth {
            k.witness().unlock(k, &self.lock_obj, cpu);
        }
        slot.depth.store(0, Ordering::Relaxed);
        self.ticket.advance();
        k.port().intr_restore(intr);

        log::trace!("{cpu}: {} released from depth {depth}", self.lock_obj);
        depth
    }

    /// Release all but one level of the lock held by the current processor
    /// and return the number of levels released. Returns `0` when bypassed.
    pub fn release_all_but_one<P: Port>(&self, k: &Kernel<P>) -> u32 {
        if k.is_bypassed() {
            return 0;
        }

        let cpu = k.cpu();
        let slot = self.slot(k, cpu);

        if !self.held_by(cpu) {
            k.violation(Violation::NotHeld, &self.lock_obj);
        }

        let released = slot.depth.load(Ordering::Relaxed) - 1;
        for _ in 0..released {
            k.witness().unlock(k, &self.lock_obj, cpu);
        }
        slot.depth.store(1, Ordering::Relaxed);
        released
    }

    /// Acquire the lock `count` times, restoring the depth returned by
    /// [`Self::release_all`].
    pub fn acquire_count<P: Port>(&self, k: &Kernel<P>, count: u32) {
        for _ in 0..count {
            self.lock(k);
        }
    }

    /// Returns `true` if `cpu` holds the lock.
    pub fn held_by(&self, cpu: CpuId) -> bool {
        self.cpus.get(cpu).map_or(false, |slot| {
            slot.depth.load(Ordering::Relaxed) > 0
                && slot.ticket.load(Ordering::Relaxed) == self.ticket.serving()
        })
    }

    /// Returns `true` if the current processor holds the lock.
    ///
    /// Unlike [`Kernel::kernel_lock_held`], this doesn't take the bypass
    /// state into account.
    pub fn held<P: Port>(&self, k: &Kernel<P>) -> bool {
        self.held_by(k.cpu())
    }

    /// Get the depth `cpu` holds the lock at. `0` = not held
    pub fn depth(&self, cpu: CpuId) -> u32 {
        self.cpus
            .get(cpu)
            .map_or(0, |slot| slot.depth.load(Ordering::Relaxed))
    }

    #[inline]
    pub fn ticket(&self) -> &TicketLock {
        &self.ticket
    }

    #[inline]
    pub fn lock_object(&self) -> &LockObject {
        &self.lock_obj
    }
}
