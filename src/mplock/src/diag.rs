//! Diagnostic reports
use core::fmt;

use crate::{percpu::CpuId, witness::LockInfo};

/// A non-fatal diagnostic event passed to [`PortDiag::report`].
///
/// [`PortDiag::report`]: crate::PortDiag::report
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Report {
    /// A spin-wait loop exceeded the spin budget. Emitted again every time
    /// the budget is exhausted anew.
    SpunOut {
        /// The spinning function.
        func: &'static str,
        lock: LockInfo,
        cpu: CpuId,
    },
    /// A lock was requested while holding a lock that the witness has seen
    /// acquired *after* it. `first` is the held lock, `second` is the lock
    /// being acquired.
    LockOrderReversal {
        first: LockInfo,
        second: LockInfo,
        cpu: CpuId,
    },
    /// A lock was requested while holding another lock of the same type.
    DuplicateLock {
        held: LockInfo,
        requested: LockInfo,
        cpu: CpuId,
    },
    /// A lock was released that the witness doesn't see held by the CPU.
    NotLocked { lock: LockInfo, cpu: CpuId },
    /// A CPU holds too many locks for the witness to track the new one.
    TooManyHeld { lock: LockInfo, cpu: CpuId },
}

impl Report {
    /// Get the processor on which the event was detected.
    pub fn cpu(&self) -> CpuId {
        match *self {
            Self::SpunOut { cpu, .. }
            | Self::LockOrderReversal { cpu, .. }
            | Self::DuplicateLock { cpu, .. }
            | Self::NotLocked { cpu, .. }
            | Self::TooManyHeld { cpu, .. } => cpu,
        }
    }

    /// Returns `true` if the report originates from the lock-order validator.
    pub fn is_witness(&self) -> bool {
        !matches!(self, Self::SpunOut { .. })
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::SpunOut { func, lock, cpu } => {
                write!(f, "{cpu}: {func}: {lock} lock spun out")
            }
            Self::LockOrderReversal { first, second, cpu } => write!(
                f,
                "{cpu}: lock order reversal: 1st {first}, 2nd {second}"
            ),
            Self::DuplicateLock {
                held,
                requested,
                cpu,
            } => write!(
                f,
                "{cpu}: acquiring duplicate lock of same type \"{}\": 1st {held}, 2nd {requested}",
                held.type_name
            ),
            Self::NotLocked { lock, cpu } => write!(f, "{cpu}: {lock} not locked"),
            Self::TooManyHeld { lock, cpu } => {
                write!(f, "{cpu}: too many locks held, not tracking {lock}")
            }
        }
    }
}
