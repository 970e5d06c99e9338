//! A single-threaded fake port for unit tests. The "current CPU" is switched
//! explicitly by the test.
use std::{
    cell::{Cell, RefCell},
    fmt,
};

use crate::{CpuId, IntrState, Ipl, PortCpu, PortDiag, PortInterrupts, Report, MAXCPUS};

pub(crate) struct TestPort {
    cpu_count: usize,
    current: Cell<usize>,
    ipl: Vec<Cell<Ipl>>,
    intr_enabled: Vec<Cell<bool>>,
    intr_disables: Cell<usize>,
    reports: RefCell<Vec<Report>>,
}

impl TestPort {
    pub(crate) fn new() -> Self {
        Self::with_cpus(1)
    }

    pub(crate) fn with_cpus(cpu_count: usize) -> Self {
        Self {
            cpu_count,
            current: Cell::new(0),
            ipl: (0..MAXCPUS).map(|_| Cell::new(Ipl::NONE)).collect(),
            intr_enabled: (0..MAXCPUS).map(|_| Cell::new(true)).collect(),
            intr_disables: Cell::new(0),
            reports: RefCell::new(Vec::new()),
        }
    }

    pub(crate) fn set_cpu(&self, cpu: usize) {
        self.current.set(cpu);
    }

    pub(crate) fn ipl(&self) -> Ipl {
        self.ipl[self.current.get()].get()
    }

    pub(crate) fn set_ipl(&self, ipl: Ipl) {
        self.ipl[self.current.get()].set(ipl);
    }

    pub(crate) fn interrupts_enabled(&self) -> bool {
        self.intr_enabled[self.current.get()].get()
    }

    /// Get the number of `intr_disable` calls so far.
    pub(crate) fn intr_disables(&self) -> usize {
        self.intr_disables.get()
    }

    pub(crate) fn reports(&self) -> Vec<Report> {
        self.reports.borrow().clone()
    }
}

impl PortCpu for TestPort {
    fn cpu_count(&self) -> usize {
        self.cpu_count
    }

    fn current_cpu(&self) -> CpuId {
        CpuId::new(self.current.get()).unwrap()
    }
}

impl PortInterrupts for TestPort {
    fn intr_disable(&self) -> IntrState {
        self.intr_disables.set(self.intr_disables.get() + 1);
        let enabled = self.intr_enabled[self.current.get()].replace(false);
        IntrState(enabled as usize)
    }

    fn intr_restore(&self, state: IntrState) {
        self.intr_enabled[self.current.get()].set(state.0 != 0);
    }

    fn spl_raise(&self, level: Ipl) -> Ipl {
        let old = self.ipl();
        self.set_ipl(old.max(level));
        old
    }

    fn splx(&self, level: Ipl) {
        self.set_ipl(level);
    }

    fn current_ipl(&self) -> Ipl {
        self.ipl()
    }
}

impl PortDiag for TestPort {
    fn report(&self, report: &Report) {
        self.reports.borrow_mut().push(*report);
    }

    fn fatal(&self, args: fmt::Arguments<'_>) -> ! {
        panic!("{args}")
    }
}
