//! Startup configuration

/// How the lock-order validator reacts to a violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WitnessMode {
    /// Don't record lock orders at all.
    Disabled,
    /// Report violations through [`PortDiag::report`] and continue.
    ///
    /// [`PortDiag::report`]: crate::PortDiag::report
    Warn,
    /// Report violations, then escalate them to
    /// [`Kernel::panic`](crate::Kernel::panic).
    Fatal,
}

/// The configuration of a [`Kernel`](crate::Kernel), resolved once at
/// startup.
///
/// The debug fields only take effect if the corresponding Cargo feature is
/// enabled (`witness` for [`Self::witness`], `lockdebug` for
/// [`Self::spinout`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// Use the multiprocessor strategy.
    ///
    /// When `false`, [`Mutex`](crate::Mutex) acquisition degenerates to an
    /// unconditional store and the kernel lock wrappers become no-ops.
    /// [`Kernel::new`](crate::Kernel::new) rejects it if the port reports
    /// more than one processor.
    pub multiprocessor: bool,
    pub witness: WitnessMode,
    /// The number of failed spin iterations tolerated before a stuck lock is
    /// reported. `0` disables the report. Can be changed at runtime by
    /// [`Kernel::set_spinout`](crate::Kernel::set_spinout).
    pub spinout: u32,
}

impl Config {
    pub const DEFAULT: Self = Self {
        multiprocessor: true,
        witness: WitnessMode::Warn,
        spinout: 0,
    };

    pub const fn multiprocessor(self, multiprocessor: bool) -> Self {
        Self {
            multiprocessor,
            ..self
        }
    }

    pub const fn witness(self, witness: WitnessMode) -> Self {
        Self { witness, ..self }
    }

    pub const fn spinout(self, spinout: u32) -> Self {
        Self { spinout, ..self }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::DEFAULT
    }
}
