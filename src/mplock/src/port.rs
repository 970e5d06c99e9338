//! The platform capability interface
use core::fmt;

use crate::{diag::Report, percpu::CpuId};

/// An interrupt priority level.
///
/// A CPU running at level `n` doesn't take interrupts whose level is `n` or
/// lower. [`Ipl::NONE`] masks nothing.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Ipl(pub u8);

impl Ipl {
    pub const NONE: Self = Self(0);
    pub const SOFTCLOCK: Self = Self(1);
    pub const SOFTNET: Self = Self(2);
    pub const BIO: Self = Self(3);
    pub const NET: Self = Self(4);
    pub const TTY: Self = Self(5);
    pub const VM: Self = Self(6);
    pub const AUDIO: Self = Self(7);
    pub const CLOCK: Self = Self(8);
    pub const SCHED: Self = Self(9);
    pub const HIGH: Self = Self(10);
}

impl fmt::Debug for Ipl {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "IPL({})", self.0)
    }
}

/// The interrupt state saved by [`PortInterrupts::intr_disable`]. The
/// contents are only meaningful to the port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IntrState(pub usize);

/// Processor identification and spin-wait support.
pub trait PortCpu {
    /// Get the number of processors. Only consulted once, by
    /// [`Kernel::new`](crate::Kernel::new).
    fn cpu_count(&self) -> usize;

    /// Get the processor the calling context is running on.
    ///
    /// The result must not change while the calling context holds any lock
    /// or is spinning on one.
    fn current_cpu(&self) -> CpuId;

    /// Called on every iteration of a spin-wait loop.
    #[inline]
    fn busy_cycle(&self) {
        core::hint::spin_loop();
    }
}

/// Interrupt masking and interrupt priority levels of the current processor.
pub trait PortInterrupts {
    /// Disable interrupts on the current processor and return the previous
    /// state.
    fn intr_disable(&self) -> IntrState;

    /// Restore the interrupt state returned by a matching call to
    /// [`Self::intr_disable`].
    fn intr_restore(&self, state: IntrState);

    /// Raise the current processor's IPL to `max(current, level)` and return
    /// the previous IPL.
    fn spl_raise(&self, level: Ipl) -> Ipl;

    /// Set the current processor's IPL to `level`, which was returned by a
    /// matching call to [`Self::spl_raise`].
    fn splx(&self, level: Ipl);

    /// Get the current processor's IPL.
    fn current_ipl(&self) -> Ipl;
}

/// The external reporting facility (console, debugger, crash log).
pub trait PortDiag {
    /// Report a non-fatal diagnostic event. The caller continues afterwards.
    ///
    /// This may be called with interrupts disabled and while spinning, so it
    /// must not acquire any lock managed by the same [`Kernel`](crate::Kernel).
    fn report(&self, report: &Report);

    /// Terminate the kernel context.
    ///
    /// The kernel enters the panicking state before calling this, so lock
    /// operations made by the implementation succeed unconditionally.
    fn fatal(&self, args: fmt::Arguments<'_>) -> !;
}

/// Implemented by a port.
pub trait Port: PortCpu + PortInterrupts + PortDiag {}

impl<T: PortCpu + PortInterrupts + PortDiag + ?Sized> Port for T {}
