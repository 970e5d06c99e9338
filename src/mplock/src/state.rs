//! The kernel context
use core::{
    fmt,
    sync::atomic::{AtomicBool, AtomicU32, Ordering},
};

use crate::{
    cfg::Config,
    diag::Report,
    error::{InitError, Violation},
    klock,
    mplock::MpLock,
    percpu::{CpuId, CpuTable},
    port::Port,
    witness::{LockObject, Witness},
};

/// Per-CPU accounting.
#[derive(Debug, Default)]
pub(crate) struct CpuState {
    /// The number of spin-wait loops the CPU is in. Nonzero means the CPU is
    /// busy-waiting on a lock.
    pub(crate) spinning: AtomicU32,
    /// The number of [`Mutex`](crate::Mutex)es held by the CPU.
    pub(crate) mutex_level: AtomicU32,
}

/// The system-wide lock state, created once at startup.
///
/// Lock operations take a `&Kernel` explicitly. The context owns the kernel
/// lock, the per-CPU accounting, the witness, and the bypass state.
pub struct Kernel<P> {
    port: P,
    cfg: Config,
    cpus: CpuTable<CpuState>,
    panicking: AtomicBool,
    db_active: AtomicBool,
    /// The current spin budget. `0` = disabled
    spinout: AtomicU32,
    witness: Witness,
    kernel_lock: MpLock,
}

impl<P: Port> Kernel<P> {
    /// Construct a `Kernel` for the processors reported by
    /// [`PortCpu::cpu_count`](crate::PortCpu::cpu_count).
    pub fn new(port: P, cfg: Config) -> Result<Self, InitError> {
        let cpu_count = port.cpu_count();
        if !cfg.multiprocessor && cpu_count > 1 {
            return Err(InitError::UniprocessorWithManyCpus);
        }
        let cpus = CpuTable::new_with(cpu_count, |_| CpuState::default())?;
        let witness = Witness::new(cfg.witness, cpu_count)?;
        let kernel_lock = klock::new_kernel_lock(&cpus);

        log::debug!("kernel context: {cpu_count} CPU(s), {cfg:?}");

        Ok(Self {
            port,
            cfg,
            cpus,
            panicking: AtomicBool::new(false),
            db_active: AtomicBool::new(false),
            spinout: AtomicU32::new(cfg.spinout),
            witness,
            kernel_lock,
        })
    }

    #[inline]
    pub fn port(&self) -> &P {
        &self.port
    }

    #[inline]
    pub fn config(&self) -> &Config {
        &self.cfg
    }

    #[inline]
    pub fn cpu_count(&self) -> usize {
        self.cpus.len()
    }

    /// Get the current processor, validated against the processor count.
    ///
    /// An identifier outside the range is a fatal contract violation.
    pub fn cpu(&self) -> CpuId {
        let cpu = self.port.current_cpu();
        if cpu.index() >= self.cpu_count() {
            self.cpu_out_of_range(cpu);
        }
        cpu
    }

    #[cold]
    pub(crate) fn cpu_out_of_range(&self, cpu: CpuId) -> ! {
        self.panic(format_args!("{cpu}: {}", Violation::CpuOutOfRange))
    }

    #[inline]
    pub(crate) fn cpu_state(&self, cpu: CpuId) -> &CpuState {
        match self.cpus.get(cpu) {
            Some(state) => state,
            None => self.cpu_out_of_range(cpu),
        }
    }

    /// Get the CPU-indexed table the per-lock tables are shaped after.
    #[inline]
    pub(crate) fn cpu_table(&self) -> &CpuTable<CpuState> {
        &self.cpus
    }

    /// Enter the panicking state and terminate through
    /// [`PortDiag::fatal`](crate::PortDiag::fatal).
    ///
    /// The panicking state is entered first, so every lock operation made
    /// from then on (including the ones made by the port while reporting)
    /// succeeds immediately.
    #[cold]
    pub fn panic(&self, args: fmt::Arguments<'_>) -> ! {
        self.panicking.store(true, Ordering::SeqCst);
        log::error!("panic: {args}");
        self.port.fatal(args)
    }

    /// Escalate a contract violation on `lock`.
    #[cold]
    pub(crate) fn violation(&self, violation: Violation, lock: &LockObject) -> ! {
        self.panic(format_args!("{}: {lock}: {violation}", self.port.current_cpu()))
    }

    #[inline]
    pub fn is_panicking(&self) -> bool {
        self.panicking.load(Ordering::Relaxed)
    }

    /// Mark the kernel debugger as active. Lock operations are bypassed
    /// until [`Self::leave_debugger`] is called.
    pub fn enter_debugger(&self) {
        log::debug!("entering debugger");
        self.db_active.store(true, Ordering::SeqCst);
    }

    pub fn leave_debugger(&self) {
        self.db_active.store(false, Ordering::SeqCst);
        log::debug!("left debugger");
    }

    #[inline]
    pub fn is_debugger_active(&self) -> bool {
        self.db_active.load(Ordering::Relaxed)
    }

    /// Returns `true` if lock operations are bypassed (the kernel is
    /// panicking or the debugger is active).
    #[inline]
    pub fn is_bypassed(&self) -> bool {
        self.is_panicking() || self.is_debugger_active()
    }

    /// Set the spin budget. Takes effect from the next spin-wait loop.
    /// `0` disables stuck-lock reports.
    pub fn set_spinout(&self, budget: u32) {
        self.spinout.store(budget, Ordering::Relaxed);
    }

    #[inline]
    pub fn spinout(&self) -> u32 {
        self.spinout.load(Ordering::Relaxed)
    }

    /// Emit a non-fatal diagnostic report.
    pub(crate) fn report(&self, report: Report) {
        log::warn!("{report}");
        self.port.report(&report);
    }

    #[inline]
    pub(crate) fn witness(&self) -> &Witness {
        &self.witness
    }

    /// Returns `true` if the witness has recorded that `second`'s lock type
    /// is acquired while holding `first`'s.
    pub fn witness_order_recorded(&self, first: &LockObject, second: &LockObject) -> bool {
        self.witness.order_recorded(self, first, second)
    }

    /// Get the number of distinct locks the witness sees held by `cpu`.
    pub fn witness_held(&self, cpu: CpuId) -> usize {
        self.witness.held_count(self, cpu)
    }

    /// Log the witness order graph at `info` level.
    pub fn witness_dump(&self) {
        self.witness.dump(self);
    }

    /// Get the kernel lock.
    #[inline]
    pub fn kernel_lock(&self) -> &MpLock {
        &self.kernel_lock
    }

    /// Get the number of spin-wait loops `cpu` is currently in.
    pub fn cpu_spinning(&self, cpu: CpuId) -> u32 {
        self.cpus
            .get(cpu)
            .map_or(0, |state| state.spinning.load(Ordering::Relaxed))
    }

    /// Get the number of [`Mutex`](crate::Mutex)es held by `cpu`.
    pub fn mutex_level(&self, cpu: CpuId) -> u32 {
        self.cpus
            .get(cpu)
            .map_or(0, |state| state.mutex_level.load(Ordering::Relaxed))
    }
}

impl<P> fmt::Debug for Kernel<P> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Kernel")
            .field("cfg", &self.cfg)
            .field("cpus", &self.cpus)
            .field("panicking", &self.panicking)
            .field("db_active", &self.db_active)
            .field("spinout", &self.spinout)
            .finish_non_exhaustive()
    }
}
