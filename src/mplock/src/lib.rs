#![doc = include_str!("./lib.md")]
#![cfg_attr(not(test), no_std)] // Link `std` only when building a test (`cfg(test)`)
#![forbid(unsafe_code)]

#[macro_use]
mod error;

pub mod cfg;
pub mod db_mutex;
pub mod diag;
pub mod klock;
pub mod mplock;
pub mod mutex;
pub mod percpu;
pub mod port;
pub mod spinout;
pub mod state;
pub mod utils;
pub mod witness;

#[cfg(test)]
mod test_port;

pub use self::{
    cfg::{Config, WitnessMode},
    db_mutex::DbMutex,
    diag::Report,
    error::{InitError, Violation},
    klock::KernelLockGuard,
    mplock::{MpLock, TicketLock},
    mutex::{Mutex, MutexGuard},
    percpu::{CpuId, CpuTable},
    port::{IntrState, Ipl, Port, PortCpu, PortDiag, PortInterrupts},
    state::Kernel,
    witness::{LockClass, LockFlags, LockInfo, LockObject, LockType},
};

/// The maximum number of processors a [`Kernel`] can manage.
pub const MAXCPUS: usize = 64;
