//! Lock identities and the lock-order validator ("witness")
//!
//! The witness records, for every lock type, which other lock types have been
//! observed held when a lock of that type was acquired. The accumulated
//! relation must stay acyclic; an acquisition that would close a cycle is a
//! potential deadlock and gets reported.
//!
//! The witness is purely diagnostic. Nothing it does changes the outcome of
//! an acquire or release operation, and compiling it out (by disabling the
//! `witness` feature) leaves zero-sized no-op hooks in its place.
use core::fmt;

#[cfg(feature = "witness")]
use crate::diag::Report;
use crate::{
    cfg::WitnessMode, error::InitError, percpu::CpuId, port::Port, state::Kernel,
};

/// A lock type. Locks of the same type (compared by [`Self::name`]) share one
/// node in the witness order graph.
#[derive(Debug)]
pub struct LockType {
    pub name: &'static str,
}

impl LockType {
    pub const fn new(name: &'static str) -> Self {
        Self { name }
    }
}

bitflags::bitflags! {
    /// Flags for [`LockObject`].
    pub struct LockFlags: u32 {
        /// Let the witness track this lock.
        const WITNESS = 1 << 0;
        /// The lock object has been initialized.
        const INITIALIZED = 1 << 1;
        /// The holder may sleep while holding the lock.
        const SLEEPABLE = 1 << 2;
        /// Holding two locks of this type at once is not a violation.
        const DUPOK = 1 << 3;
        /// The lock may be recursively acquired by its holder.
        const RECURSABLE = 1 << 4;
    }
}

/// The implementation family of a lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockClass {
    KernelLock,
    Mutex,
    DbMutex,
}

/// The diagnostic identity of a lock, embedded in every lock object.
///
/// A lock object carries no witness state of its own. The witness of each
/// [`Kernel`] keys its classes by type name, so the same lock can be used
/// with any number of kernels.
#[derive(Debug)]
pub struct LockObject {
    /// The instance name. Empty if the lock is named after its type.
    name: &'static str,
    ty: &'static LockType,
    flags: LockFlags,
    class: LockClass,
}

impl LockObject {
    pub const fn new(
        name: &'static str,
        ty: &'static LockType,
        flags: LockFlags,
        class: LockClass,
    ) -> Self {
        Self {
            name,
            ty,
            flags,
            class,
        }
    }

    /// Get the instance name, falling back to the type name.
    pub fn name(&self) -> &'static str {
        if self.name.is_empty() {
            self.ty.name
        } else {
            self.name
        }
    }

    pub fn lock_type(&self) -> &'static LockType {
        self.ty
    }

    pub fn flags(&self) -> LockFlags {
        self.flags
    }

    pub fn class(&self) -> LockClass {
        self.class
    }

    /// Get a copyable summary of this lock for use in reports.
    pub fn info(&self) -> LockInfo {
        LockInfo {
            name: self.name(),
            type_name: self.ty.name,
            addr: self.addr(),
        }
    }

    #[inline]
    pub(crate) fn addr(&self) -> usize {
        self as *const Self as usize
    }
}

impl fmt::Display for LockObject {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.info().fmt(f)
    }
}

/// A summary of a [`LockObject`], detached from its lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockInfo {
    pub name: &'static str,
    pub type_name: &'static str,
    /// The address of the lock object. Only meaningful as an identity.
    pub addr: usize,
}

impl fmt::Display for LockInfo {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.name == self.type_name {
            write!(f, "\"{}\" @ {:#x}", self.name, self.addr)
        } else {
            write!(f, "\"{}\" ({}) @ {:#x}", self.name, self.type_name, self.addr)
        }
    }
}

#[cfg(feature = "witness")]
mod imp {
    use arrayvec::ArrayVec;
    use spin::Mutex as SpinMutex;

    use super::*;
    use crate::{percpu::CpuTable, utils::FixedBitSet};

    /// The capacity of the class table.
    const MAX_CLASSES: usize = 256;

    /// The number of locks a CPU can hold before the witness stops tracking
    /// new ones.
    const MAX_HELD: usize = 32;

    /// The capacity of the held-lock pool shared by all CPUs.
    const MAX_HELD_TOTAL: usize = 128;

    type ClassSet = FixedBitSet<{ MAX_CLASSES / usize::BITS as usize }>;

    /// An entry of the held-lock pool. The type name is recovered from
    /// `class`.
    #[derive(Clone, Copy)]
    struct HeldLock {
        name: &'static str,
        addr: usize,
        /// The number of recursive acquisitions on top of the first one
        recursion: u32,
        cpu: u16,
        class: u16,
    }

    struct State {
        classes: ArrayVec<&'static str, MAX_CLASSES>,
        /// Set once the "too many lock classes" warning has been logged.
        classes_exhausted: bool,
        /// `order[a].contains(b)`: a lock of class `b` was acquired while
        /// holding a lock of class `a`.
        order: [ClassSet; MAX_CLASSES],
        /// `reported[a].contains(b)`: acquiring `b` while holding `a` has
        /// already been reported as a reversal.
        reported: [ClassSet; MAX_CLASSES],
        /// The locks held by all CPUs, in acquisition order.
        held: ArrayVec<HeldLock, MAX_HELD_TOTAL>,
        /// The number of locks held by each CPU that didn't fit in `held`.
        untracked: CpuTable<u32>,
    }

    pub(crate) struct Witness {
        mode: WitnessMode,
        state: SpinMutex<State>,
    }

    impl State {
        /// Find the class of `ty` without registering it.
        fn class_of(&self, ty: &LockType) -> Option<u16> {
            self.classes
                .iter()
                .position(|&n| n == ty.name)
                .map(|i| i as u16)
        }

        /// Find the class of `lo`'s type, registering a new class if it has
        /// none yet.
        fn bind(&mut self, lo: &LockObject) -> Option<u16> {
            if let Some(class) = self.class_of(lo.ty) {
                return Some(class);
            }

            let name = lo.ty.name;
            if self.classes.try_push(name).is_ok() {
                log::trace!("witness: new class {name:?}");
                Some(self.classes.len() as u16 - 1)
            } else {
                if !self.classes_exhausted {
                    self.classes_exhausted = true;
                    log::warn!("witness: too many lock classes, not tracking {lo}");
                }
                None
            }
        }

        fn info(&self, h: &HeldLock) -> LockInfo {
            LockInfo {
                name: h.name,
                type_name: self.classes[h.class as usize],
                addr: h.addr,
            }
        }

        fn held_by(&self, cpu: CpuId) -> impl Iterator<Item = &HeldLock> + '_ {
            let cpu = cpu.index() as u16;
            self.held.iter().filter(move |h| h.cpu == cpu)
        }

        /// Returns `true` if `to` is reachable from `from` in the order graph.
        fn reaches(&self, from: usize, to: usize) -> bool {
            let mut visited = ClassSet::EMPTY;
            // Each class is pushed at most once, so this can't overflow
            let mut stack = ArrayVec::<u16, MAX_CLASSES>::new();
            visited.insert(from);
            stack.push(from as u16);

            while let Some(class) = stack.pop() {
                if class as usize == to {
                    return true;
                }
                for next in self.order[class as usize].iter() {
                    if visited.insert(next) {
                        stack.push(next as u16);
                    }
                }
            }
            false
        }
    }

    impl Witness {
        pub(crate) fn new(mode: WitnessMode, cpu_count: usize) -> Result<Self, InitError> {
            Ok(Self {
                mode,
                state: SpinMutex::new(State {
                    classes: ArrayVec::new(),
                    classes_exhausted: false,
                    order: [ClassSet::EMPTY; MAX_CLASSES],
                    reported: [ClassSet::EMPTY; MAX_CLASSES],
                    held: ArrayVec::new(),
                    untracked: CpuTable::new_with(cpu_count, |_| 0)?,
                }),
            })
        }

        #[inline]
        fn watches<P: Port>(&self, k: &Kernel<P>, lo: &LockObject) -> bool {
            self.mode != WitnessMode::Disabled
                && lo.flags.contains(LockFlags::WITNESS)
                && !k.is_bypassed()
        }

        /// Run `f` on the witness state with interrupts disabled, so an
        /// interrupt handler taking a witnessed lock can't spin on the state
        /// lock held by the code it interrupted.
        fn with_state<P: Port, R>(&self, k: &Kernel<P>, f: impl FnOnce(&mut State) -> R) -> R {
            let intr = k.port().intr_disable();
            let result = f(&mut *self.state.lock());
            k.port().intr_restore(intr);
            result
        }

        /// Check the order of acquiring `lo` against the locks held by `cpu`
        /// and record new orders. Called before the acquisition can block.
        pub(crate) fn check_order<P: Port>(&self, k: &Kernel<P>, lo: &LockObject, cpu: CpuId) {
            if !self.watches(k, lo) {
                return;
            }

            let reports = self.with_state(k, |st| {
                let mut reports = ArrayVec::<Report, MAX_HELD>::new();
                if st.held_by(cpu).next().is_none() {
                    return reports;
                }
                let Some(class) = st.bind(lo) else {
                    return reports;
                };
                let class = class as usize;

                for i in 0..st.held.len() {
                    let h = st.held[i];
                    if h.cpu as usize != cpu.index() {
                        continue;
                    }
                    let held_class = h.class as usize;

                    if held_class == class {
                        // Locking the same object twice is the lock's own
                        // business (it's fatal for non-recursive locks)
                        if h.addr != lo.addr() && !lo.flags.contains(LockFlags::DUPOK) {
                            let _ = reports.try_push(Report::DuplicateLock {
                                held: st.info(&h),
                                requested: lo.info(),
                                cpu,
                            });
                        }
                        continue;
                    }

                    if st.order[held_class].contains(class) {
                        continue;
                    }

                    if st.reaches(class, held_class) {
                        if st.reported[held_class].insert(class) {
                            let _ = reports.try_push(Report::LockOrderReversal {
                                first: st.info(&h),
                                second: lo.info(),
                                cpu,
                            });
                        }
                    } else {
                        st.order[held_class].insert(class);
                        log::trace!(
                            "witness: new order {:?} -> {:?}",
                            st.classes[held_class],
                            st.classes[class]
                        );
                    }
                }
                reports
            });

            for report in reports {
                self.violation(k, report);
            }
        }

        /// Record that `cpu` now holds `lo`.
        pub(crate) fn lock<P: Port>(&self, k: &Kernel<P>, lo: &LockObject, cpu: CpuId) {
            if !self.watches(k, lo) {
                return;
            }

            let overflowed = self.with_state(k, |st| {
                let Some(class) = st.bind(lo) else {
                    return false;
                };
                let addr = lo.addr();
                let me = cpu.index() as u16;

                if lo.flags.contains(LockFlags::RECURSABLE) {
                    if let Some(h) = st
                        .held
                        .iter_mut()
                        .rev()
                        .find(|h| h.cpu == me && h.addr == addr)
                    {
                        h.recursion += 1;
                        return false;
                    }
                }

                let entry = HeldLock {
                    name: lo.name(),
                    addr,
                    recursion: 0,
                    cpu: me,
                    class,
                };
                if st.held_by(cpu).count() >= MAX_HELD || st.held.try_push(entry).is_err() {
                    if let Some(untracked) = st.untracked.get_mut(cpu) {
                        *untracked += 1;
                    }
                    true
                } else {
                    false
                }
            });

            if overflowed {
                k.report(Report::TooManyHeld {
                    lock: lo.info(),
                    cpu,
                });
            }
        }

        /// Record that `cpu` no longer holds `lo`.
        pub(crate) fn unlock<P: Port>(&self, k: &Kernel<P>, lo: &LockObject, cpu: CpuId) {
            if !self.watches(k, lo) {
                return;
            }

            let missing = self.with_state(k, |st| {
                // A type the witness has never seen can't be held
                if st.class_of(lo.ty).is_none() {
                    return false;
                }
                let addr = lo.addr();
                let me = cpu.index() as u16;

                if let Some(i) = st
                    .held
                    .iter()
                    .rposition(|h| h.cpu == me && h.addr == addr)
                {
                    if st.held[i].recursion > 0 {
                        st.held[i].recursion -= 1;
                    } else {
                        st.held.remove(i);
                    }
                    false
                } else {
                    match st.untracked.get_mut(cpu) {
                        Some(untracked) if *untracked > 0 => {
                            *untracked -= 1;
                            false
                        }
                        _ => true,
                    }
                }
            });

            if missing {
                self.violation(
                    k,
                    Report::NotLocked {
                        lock: lo.info(),
                        cpu,
                    },
                );
            }
        }

        fn violation<P: Port>(&self, k: &Kernel<P>, report: Report) {
            k.report(report);
            if self.mode == WitnessMode::Fatal {
                k.panic(format_args!("witness: {report}"));
            }
        }

        /// Returns `true` if `second`'s type has been acquired while holding
        /// `first`'s type.
        pub(crate) fn order_recorded<P: Port>(
            &self,
            k: &Kernel<P>,
            first: &LockObject,
            second: &LockObject,
        ) -> bool {
            self.with_state(k, |st| {
                match (st.class_of(first.ty), st.class_of(second.ty)) {
                    (Some(a), Some(b)) => st.order[a as usize].contains(b as usize),
                    _ => false,
                }
            })
        }

        /// Get the number of distinct locks the witness sees held by `cpu`.
        pub(crate) fn held_count<P: Port>(&self, k: &Kernel<P>, cpu: CpuId) -> usize {
            self.with_state(k, |st| st.held_by(cpu).count())
        }

        /// Log the order graph.
        pub(crate) fn dump<P: Port>(&self, k: &Kernel<P>) {
            self.with_state(k, |st| {
                for (i, name) in st.classes.iter().enumerate() {
                    log::info!("{name:?} {{");
                    for next in st.order[i].iter() {
                        log::info!("    {:?}", st.classes[next]);
                    }
                    log::info!("}}");
                }
            });
        }
    }
}

#[cfg(not(feature = "witness"))]
mod imp {
    use super::*;

    /// The lock-order validator, compiled out.
    pub(crate) struct Witness;

    impl Witness {
        pub(crate) fn new(_mode: WitnessMode, _cpu_count: usize) -> Result<Self, InitError> {
            Ok(Self)
        }

        #[inline]
        pub(crate) fn check_order<P: Port>(&self, _: &Kernel<P>, _: &LockObject, _: CpuId) {}

        #[inline]
        pub(crate) fn lock<P: Port>(&self, _: &Kernel<P>, _: &LockObject, _: CpuId) {}

        #[inline]
        pub(crate) fn unlock<P: Port>(&self, _: &Kernel<P>, _: &LockObject, _: CpuId) {}

        pub(crate) fn order_recorded<P: Port>(
            &self,
            _: &Kernel<P>,
            _: &LockObject,
            _: &LockObject,
        ) -> bool {
            false
        }

        pub(crate) fn held_count<P: Port>(&self, _: &Kernel<P>, _: CpuId) -> usize {
            0
        }

        pub(crate) fn dump<P: Port>(&self, _: &Kernel<P>) {}
    }
}

pub(crate) use self::imp::Witness;
