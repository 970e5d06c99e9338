//! The kernel lock
//!
//! The kernel lock is the [`MpLock`] owned by [`Kernel`], serializing code
//! that isn't multiprocessor-safe. In the uniprocessor configuration the
//! wrappers in this module don't touch it at all.
use crate::{
    mplock::MpLock,
    percpu::CpuTable,
    port::Port,
    state::Kernel,
    witness::LockType,
};

static KERNEL_LOCK_TYPE: LockType = LockType::new("kernel_lock");

pub(crate) fn new_kernel_lock<T>(cpus: &CpuTable<T>) -> MpLock {
    MpLock::with_table(cpus, "", &KERNEL_LOCK_TYPE)
}

impl<P: Port> Kernel<P> {
    /// Acquire the kernel lock on the current processor.
    #[inline]
    pub fn lock_kernel(&self) {
        if self.config().multiprocessor {
            self.kernel_lock().lock(self);
        }
    }

    /// Release one level of the kernel lock held by the current processor.
    #[inline]
    pub fn unlock_kernel(&self) {
        if self.config().multiprocessor {
            self.kernel_lock().unlock(self);
        }
    }

    /// Returns `true` if the current processor holds the kernel lock.
    ///
    /// Always returns `true` in the uniprocessor configuration and while lock
    /// operations are bypassed.
    pub fn kernel_lock_held(&self) -> bool {
        !self.config().multiprocessor
            || self.is_bypassed()
            || self.kernel_lock().held(self)
    }

    /// Acquire the kernel lock and return a guard that releases it when
    /// dropped.
    pub fn kernel_lock_guard(&self) -> KernelLockGuard<'_, P> {
        self.lock_kernel();
        KernelLockGuard { kernel: self }
    }
}

/// An RAII guard of the kernel lock, returned by
/// [`Kernel::kernel_lock_guard`].
#[must_use = "the kernel lock is released immediately if the guard is dropped"]
pub struct KernelLockGuard<'a, P: Port> {
    kernel: &'a Kernel<P>,
}

impl<P: Port> Drop for KernelLockGuard<'_, P> {
    #[inline]
    fn drop(&mut self) {
        self.kernel.unlock_kernel();
    }
}
