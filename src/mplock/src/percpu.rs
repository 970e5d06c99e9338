//! Per-CPU storage
use arrayvec::ArrayVec;
use core::{fmt, ops};

use crate::{error::InitError, MAXCPUS};

/// Identifies a processor. Valid values are `0..cpu_count`, where
/// `cpu_count` is the number reported by the port at startup.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CpuId(u16);

impl CpuId {
    /// Construct a `CpuId` from a zero-based processor index.
    ///
    /// Returns `None` if `index` can't be a valid processor index in any
    /// configuration (i.e., it's not less than [`MAXCPUS`]).
    #[inline]
    pub const fn new(index: usize) -> Option<Self> {
        if index < MAXCPUS {
            Some(Self(index as u16))
        } else {
            None
        }
    }

    /// Get the zero-based processor index.
    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for CpuId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "cpu{}", self.0)
    }
}

impl fmt::Display for CpuId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// An arena holding one `T` for each processor, sized at startup from the
/// detected processor count.
///
/// Lookups are bounds-checked against the detected count, not against
/// [`MAXCPUS`].
pub struct CpuTable<T> {
    slots: ArrayVec<T, MAXCPUS>,
}

impl<T> CpuTable<T> {
    /// Construct a `CpuTable` with `cpu_count` elements, each produced by
    /// calling `f` with the element's processor identifier.
    pub fn new_with(cpu_count: usize, mut f: impl FnMut(CpuId) -> T) -> Result<Self, InitError> {
        if cpu_count == 0 {
            return Err(InitError::NoCpus);
        }
        if cpu_count > MAXCPUS {
            return Err(InitError::TooManyCpus);
        }

        let mut slots = ArrayVec::new();
        for i in 0..cpu_count {
            slots.push(f(CpuId(i as u16)));
        }
        Ok(Self { slots })
    }

    /// Get the element for the specified processor. Returns `None` if `cpu`
    /// is out of range.
    #[inline]
    pub fn get(&self, cpu: CpuId) -> Option<&T> {
        self.slots.get(cpu.index())
    }

    #[inline]
    pub fn get_mut(&mut self, cpu: CpuId) -> Option<&mut T> {
        self.slots.get_mut(cpu.index())
    }

    /// Get the number of processors.
    #[inline]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Always returns `false`. A `CpuTable` has at least one element.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Construct a `CpuTable` of the same size, each element produced by
    /// calling `f` with the corresponding element of `self`.
    pub fn map<U>(&self, mut f: impl FnMut(CpuId, &T) -> U) -> CpuTable<U> {
        CpuTable {
            slots: self.iter().map(|(cpu, x)| f(cpu, x)).collect(),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (CpuId, &T)> + '_ {
        self.slots
            .iter()
            .enumerate()
            .map(|(i, x)| (CpuId(i as u16), x))
    }
}

impl<T> ops::Index<CpuId> for CpuTable<T> {
    type Output = T;

    /// Panics if `cpu` is out of range. Lock operations use
    /// [`CpuTable::get`] and escalate through the kernel instead.
    #[inline]
    fn index(&self, cpu: CpuId) -> &T {
        &self.slots[cpu.index()]
    }
}

impl<T: fmt::Debug> fmt::Debug for CpuTable<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}
