//! Spin mutexes that raise the interrupt priority level while held
use core::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

use crate::{
    error::Violation,
    percpu::CpuId,
    port::{Ipl, Port},
    spinout::Spinout,
    state::Kernel,
    witness::{LockClass, LockFlags, LockObject, LockType},
};

/// The lock type of anonymous mutexes.
const MUTEX_TYPE: &LockType = &LockType::new("mutex");

/// [`Mutex::owner`] value meaning "none".
const NO_OWNER: usize = 0;

#[inline]
fn owner_value(cpu: CpuId) -> usize {
    cpu.index() + 1
}

/// A spin mutex bound to an interrupt priority level.
///
/// Acquiring the mutex raises the calling processor's IPL to the mutex's
/// level (unless it's [`Ipl::NONE`]), so an interrupt handler that takes the
/// same mutex can't preempt the holder on the same processor. Releasing it
/// restores the IPL observed at acquisition.
///
/// The mutex isn't recursive, and contention is resolved in no particular
/// order.
#[derive(Debug)]
pub struct Mutex {
    /// The owning CPU plus one, or [`NO_OWNER`].
    owner: AtomicUsize,
    wantipl: Ipl,
    /// The IPL to restore on release. Only accessed by the owner
    oldipl: AtomicU8,
    lock_obj: LockObject,
}

impl Mutex {
    /// Construct an anonymous mutex.
    ///
    /// Anonymous mutexes share the lock type `mutex` and aren't tracked by
    /// the witness. Use [`Self::with_name`] to give the mutex an identity
    /// the witness can order.
    pub const fn new(ipl: Ipl) -> Self {
        Self::with_name(ipl, "", MUTEX_TYPE, LockFlags::empty())
    }

    /// Construct a mutex with a diagnostic identity. Pass
    /// [`LockFlags::WITNESS`] in `flags` to let the witness track it.
    pub const fn with_name(
        ipl: Ipl,
        name: &'static str,
        ty: &'static LockType,
        flags: LockFlags,
    ) -> Self {
        let flags = LockFlags::from_bits_truncate(flags.bits() | LockFlags::INITIALIZED.bits());
        Self {
            owner: AtomicUsize::new(NO_OWNER),
            wantipl: ipl,
            oldipl: AtomicU8::new(Ipl::NONE.0),
            lock_obj: LockObject::new(name, ty, flags, LockClass::Mutex),
        }
    }

    /// Reinitialize the mutex as free, with a new IPL.
    pub fn init(&mut self, ipl: Ipl) {
        *self.owner.get_mut() = NO_OWNER;
        *self.oldipl.get_mut() = Ipl::NONE.0;
        self.wantipl = ipl;
    }

    /// Get the IPL the mutex raises to.
    #[inline]
    pub fn ipl(&self) -> Ipl {
        self.wantipl
    }

    #[inline]
    pub fn lock_object(&self) -> &LockObject {
        &self.lock_obj
    }

    /// Get the processor holding the mutex.
    pub fn owner(&self) -> Option<CpuId> {
        match self.owner.load(Ordering::Relaxed) {
            NO_OWNER => None,
            x => CpuId::new(x - 1),
        }
    }

    /// Returns `true` if the current processor holds the mutex.
    pub fn owned<P: Port>(&self, k: &Kernel<P>) -> bool {
        self.owner.load(Ordering::Relaxed) == owner_value(k.cpu())
    }

    /// Make one attempt to acquire the mutex. Returns `true` on success.
    ///
    /// Always succeeds while lock operations are bypassed. Attempting to
    /// acquire a mutex already held by the current processor is a fatal
    /// contract violation.
    pub fn try_enter<P: Port>(&self, k: &Kernel<P>) -> bool {
        if k.is_bypassed() {
            return true;
        }

        let cpu = k.cpu();
        if k.config().multiprocessor {
            self.try_enter_mp(k, cpu)
        } else {
            self.enter_up(k, cpu);
            true
        }
    }

    fn try_enter_mp<P: Port>(&self, k: &Kernel<P>, cpu: CpuId) -> bool {
        if k.is_bypassed() {
            return true;
        }

        let old = (self.wantipl != Ipl::NONE).then(|| k.port().spl_raise(self.wantipl));

        match self.owner.compare_exchange(
            NO_OWNER,
            owner_value(cpu),
            Ordering::Acquire,
            Ordering::Relaxed,
        ) {
            Ok(_) => {
                if let Some(old) = old {
                    self.oldipl.store(old.0, Ordering::Relaxed);
                }
                k.cpu_state(cpu)
                    .mutex_level
                    .fetch_add(1, Ordering::Relaxed);
                k.witness().lock(k, &self.lock_obj, cpu);
                true
            }
            Err(current) => {
                if current == owner_value(cpu) {
                    k.violation(Violation::LockingAgainstMyself, &self.lock_obj);
                }
                if let Some(old) = old {
                    k.port().splx(old);
                }
                false
            }
        }
    }

    /// Acquire the mutex, spinning until it's available.
    pub fn enter<P: Port>(&self, k: &Kernel<P>) {
        if k.is_bypassed() {
            return;
        }

        let cpu = k.cpu();
        if !k.config().multiprocessor {
            return self.enter_up(k, cpu);
        }

        k.witness().check_order(k, &self.lock_obj, cpu);

        let state = k.cpu_state(cpu);
        state.spinning.fetch_add(1, Ordering::Relaxed);

        let mut spinout = Spinout::new(k);
        while !self.try_enter_mp(k, cpu) {
            // Wait without writing to the shared cache line
            loop {
                k.port().busy_cycle();
                spinout.tick("Mutex::enter", &self.lock_obj, cpu);
                if self.owner.load(Ordering::Relaxed) == NO_OWNER || k.is_bypassed() {
                    break;
                }
            }
        }

        state.spinning.fetch_sub(1, Ordering::Relaxed);
    }

    /// The uniprocessor acquisition. Nothing else can contend for the mutex,
    /// so it's a plain store.
    fn enter_up<P: Port>(&self, k: &Kernel<P>, cpu: CpuId) {
        k.witness().check_order(k, &self.lock_obj, cpu);

        if self.owner.load(Ordering::Relaxed) == owner_value(cpu) {
            k.violation(Violation::LockingAgainstMyself, &self.lock_obj);
        }

        if self.wantipl != Ipl::NONE {
            let old = k.port().spl_raise(self.wantipl);
            self.oldipl.store(old.0, Ordering::Relaxed);
        }
        self.owner.store(owner_value(cpu), Ordering::Relaxed);
        k.cpu_state(cpu)
            .mutex_level
            .fetch_add(1, Ordering::Relaxed);
        k.witness().lock(k, &self.lock_obj, cpu);
    }

    /// Release the mutex held by the current processor and restore the IPL
    /// saved at acquisition.
    ///
    /// Releasing a mutex the processor doesn't hold is a fatal contract
    /// violation.
    pub fn leave<P: Port>(&self, k: &Kernel<P>) {
        if k.is_bypassed() {
            return;
        }

        let cpu = k.cpu();
        if self.owner.load(Ordering::Relaxed) != owner_value(cpu) {
            k.violation(Violation::NotOwner, &self.lock_obj);
        }

        k.witness().unlock(k, &self.lock_obj, cpu);
        k.cpu_state(cpu)
            .mutex_level
            .fetch_sub(1, Ordering::Relaxed);

        let old = Ipl(self.oldipl.load(Ordering::Relaxed));
        self.owner.store(NO_OWNER, Ordering::Release);
        if self.wantipl != Ipl::NONE {
            k.port().splx(old);
        }
    }

    /// Acquire the mutex and return a guard that releases it when dropped.
    pub fn lock<'a, P: Port>(&'a self, k: &'a Kernel<P>) -> MutexGuard<'a, P> {
        self.enter(k);
        MutexGuard { mutex: self, kernel: k }
    }

    /// Assert that the current processor holds the mutex. Not checked while
    /// lock operations are bypassed.
    pub fn assert_locked<P: Port>(&self, k: &Kernel<P>) {
        if !self.owned(k) && !k.is_bypassed() {
            k.violation(Violation::NotOwner, &self.lock_obj);
        }
    }

    /// Assert that the current processor doesn't hold the mutex. Not checked
    /// while lock operations are bypassed.
    pub fn assert_unlocked<P: Port>(&self, k: &Kernel<P>) {
        if self.owned(k) && !k.is_bypassed() {
            k.violation(Violation::HeldByMe, &self.lock_obj);
        }
    }
}

/// An RAII guard of [`Mutex`], returned by [`Mutex::lock`].
#[must_use = "the mutex is released immediately if the guard is dropped"]
pub struct MutexGuard<'a, P: Port> {
    mutex: &'a Mutex,
    kernel: &'a Kernel<P>,
}

impl<P: Port> MutexGuard<'_, P> {
    #[inline]
    pub fn mutex(&self) -> &Mutex {
        self.mutex
    }
}

impl<P: Port> Drop for MutexGuard<'_, P> {
    #[inline]
    fn drop(&mut self) {
        self.mutex.leave(self.kernel);
    }
}
