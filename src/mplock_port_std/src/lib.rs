//! Simulation environment for running `mplock` on a hosted environment.
//!
//! [`StdPort`] simulates a fixed number of processors. A host thread becomes
//! "processor `n`" by calling [`bind_current_thread`] (or by being started
//! with [`StdPort::spawn_on`]); from then on every lock operation it makes
//! is attributed to that processor.
//!
//! Interrupt masking and interrupt priority levels are bookkeeping only. No
//! interrupts are ever delivered, but the simulated state is checked by the
//! test suite to verify that the lock implementations raise and restore it
//! correctly.
use mplock::{CpuId, IntrState, Ipl, PortCpu, PortDiag, PortInterrupts, Report};
use spin::Mutex as SpinMutex;
use std::{
    cell::Cell,
    fmt,
    sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering},
    thread,
};

#[doc(hidden)]
pub extern crate env_logger;

thread_local! {
    /// The simulated processor the current thread is running on.
    static CURRENT_CPU: Cell<Option<CpuId>> = Cell::new(None);
}

/// Attribute the current thread's lock operations to `cpu` from now on.
pub fn bind_current_thread(cpu: CpuId) {
    log::trace!("{:?} bound to {cpu}", thread::current().id());
    CURRENT_CPU.with(|c| c.set(Some(cpu)));
}

/// Get the simulated processor the current thread is bound to.
pub fn current_thread_cpu() -> Option<CpuId> {
    CURRENT_CPU.with(|c| c.get())
}

/// The simulated state of one processor.
#[derive(Debug)]
struct CpuSim {
    ipl: AtomicU8,
    intr_enabled: AtomicBool,
    busy_cycles: AtomicU64,
}

/// A port simulating processors with host threads.
pub struct StdPort {
    cpus: Vec<CpuSim>,
    reports: SpinMutex<Vec<Report>>,
    /// Call `yield_now` in `busy_cycle`. Without this, a spinning thread
    /// can starve the holder on an oversubscribed host.
    yield_on_spin: bool,
}

impl StdPort {
    /// Construct a `StdPort` with `cpu_count` processors.
    pub fn new(cpu_count: usize) -> Self {
        let _ = env_logger::try_init();

        Self {
            cpus: (0..cpu_count)
                .map(|_| CpuSim {
                    ipl: AtomicU8::new(Ipl::NONE.0),
                    intr_enabled: AtomicBool::new(true),
                    busy_cycles: AtomicU64::new(0),
                })
                .collect(),
            reports: SpinMutex::new(Vec::new()),
            yield_on_spin: true,
        }
    }

    /// Busy-wait without yielding to the host scheduler.
    pub fn without_yield(self) -> Self {
        Self {
            yield_on_spin: false,
            ..self
        }
    }

    fn sim(&self) -> &CpuSim {
        let cpu = self.current_cpu();
        self.cpus.get(cpu.index()).unwrap_or_else(|| {
            panic!(
                "{cpu} is not simulated (the port has {} processors)",
                self.cpus.len()
            )
        })
    }

    /// Spawn a host thread bound to `cpu`.
    pub fn spawn_on<T: Send + 'static>(
        cpu: CpuId,
        f: impl FnOnce() -> T + Send + 'static,
    ) -> thread::JoinHandle<T> {
        thread::Builder::new()
            .name(format!("{cpu}"))
            .spawn(move || {
                bind_current_thread(cpu);
                f()
            })
            .unwrap_or_else(|e| panic!("failed to spawn a thread for {cpu}: {e}"))
    }

    /// Spawn a scoped host thread bound to `cpu`.
    pub fn spawn_scoped_on<'scope, 'env, T: Send + 'scope>(
        scope: &'scope thread::Scope<'scope, 'env>,
        cpu: CpuId,
        f: impl FnOnce() -> T + Send + 'scope,
    ) -> thread::ScopedJoinHandle<'scope, T> {
        thread::Builder::new()
            .name(format!("{cpu}"))
            .spawn_scoped(scope, move || {
                bind_current_thread(cpu);
                f()
            })
            .unwrap_or_else(|e| panic!("failed to spawn a thread for {cpu}: {e}"))
    }

    /// Get the IPL of `cpu`.
    pub fn ipl_of(&self, cpu: CpuId) -> Ipl {
        self.cpus
            .get(cpu.index())
            .map_or(Ipl::NONE, |sim| Ipl(sim.ipl.load(Ordering::Relaxed)))
    }

    /// Set the IPL of the current processor, as an interrupt handler
    /// would.
    pub fn set_ipl(&self, ipl: Ipl) {
        self.sim().ipl.store(ipl.0, Ordering::Relaxed);
    }

    /// Returns `true` if `cpu` has interrupts enabled.
    pub fn interrupts_enabled(&self, cpu: CpuId) -> bool {
        self.cpus
            .get(cpu.index())
            .map_or(true, |sim| sim.intr_enabled.load(Ordering::Relaxed))
    }

    /// Get the number of `busy_cycle` calls made on `cpu`.
    pub fn busy_cycles(&self, cpu: CpuId) -> u64 {
        self.cpus
            .get(cpu.index())
            .map_or(0, |sim| sim.busy_cycles.load(Ordering::Relaxed))
    }

    /// Get the reports emitted so far.
    pub fn reports(&self) -> Vec<Report> {
        self.reports.lock().clone()
    }

    /// Get and clear the reports emitted so far.
    pub fn take_reports(&self) -> Vec<Report> {
        std::mem::take(&mut *self.reports.lock())
    }
}

impl fmt::Debug for StdPort {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("StdPort")
            .field("cpus", &self.cpus)
            .finish_non_exhaustive()
    }
}

impl PortCpu for StdPort {
    fn cpu_count(&self) -> usize {
        self.cpus.len()
    }

    fn current_cpu(&self) -> CpuId {
        current_thread_cpu().unwrap_or_else(|| {
            panic!(
                "{:?} is not bound to a simulated processor",
                thread::current().id()
            )
        })
    }

    fn busy_cycle(&self) {
        self.sim().busy_cycles.fetch_add(1, Ordering::Relaxed);
        if self.yield_on_spin {
            thread::yield_now();
        } else {
            std::hint::spin_loop();
        }
    }
}

impl PortInterrupts for StdPort {
    fn intr_disable(&self) -> IntrState {
        let was_enabled = self.sim().intr_enabled.swap(false, Ordering::Relaxed);
        IntrState(was_enabled as usize)
    }

    fn intr_restore(&self, state: IntrState) {
        self.sim()
            .intr_enabled
            .store(state.0 != 0, Ordering::Relaxed);
    }

    fn spl_raise(&self, level: Ipl) -> Ipl {
        Ipl(self.sim().ipl.fetch_max(level.0, Ordering::Relaxed))
    }

    fn splx(&self, level: Ipl) {
        self.sim().ipl.store(level.0, Ordering::Relaxed);
    }

    fn current_ipl(&self) -> Ipl {
        Ipl(self.sim().ipl.load(Ordering::Relaxed))
    }
}

impl PortDiag for StdPort {
    fn report(&self, report: &Report) {
        self.reports.lock().push(*report);
    }

    fn fatal(&self, args: fmt::Arguments<'_>) -> ! {
        log::error!("fatal on {:?}: {args}", current_thread_cpu());
        panic!("{args}")
    }
}
