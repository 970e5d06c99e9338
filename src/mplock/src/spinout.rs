//! Stuck-lock diagnostics
//!
//! Every spin-wait loop carries a [`Spinout`] counter seeded from
//! [`Kernel::spinout`]. Each failed iteration decrements it; when it reaches
//! zero a [`Report::SpunOut`] is emitted and the counter starts over. Spinning
//! is never aborted.
use crate::{percpu::CpuId, port::Port, state::Kernel, witness::LockObject};

#[cfg(feature = "lockdebug")]
use crate::diag::Report;

/// The spin budget of one spin-wait loop.
#[cfg(feature = "lockdebug")]
pub(crate) struct Spinout<'k, P: Port> {
    k: &'k Kernel<P>,
    budget: u32,
    left: u32,
}

#[cfg(feature = "lockdebug")]
impl<'k, P: Port> Spinout<'k, P> {
    #[inline]
    pub(crate) fn new(k: &'k Kernel<P>) -> Self {
        let budget = k.spinout();
        Self {
            k,
            budget,
            left: budget,
        }
    }

    /// Account for one failed spin iteration.
    #[inline]
    pub(crate) fn tick(&mut self, func: &'static str, lock: &LockObject, cpu: CpuId) {
        if self.budget == 0 {
            return;
        }

        self.left -= 1;
        if self.left == 0 {
            self.left = self.budget;
            self.k.report(Report::SpunOut {
                func,
                lock: lock.info(),
                cpu,
            });
        }
    }
}

/// The spin budget of one spin-wait loop, compiled out.
#[cfg(not(feature = "lockdebug"))]
pub(crate) struct Spinout<'k, P: Port>(core::marker::PhantomData<&'k Kernel<P>>);

#[cfg(not(feature = "lockdebug"))]
impl<'k, P: Port> Spinout<'k, P> {
    #[inline]
    pub(crate) fn new(_: &'k Kernel<P>) -> Self {
        Self(core::marker::PhantomData)
    }

    #[inline]
    pub(crate) fn tick(&mut self, _: &'static str, _: &LockObject, _: CpuId) {}
}
