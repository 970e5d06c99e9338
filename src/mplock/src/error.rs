use core::fmt;

/// The macro to define a fieldless error enum with a short name and a
/// human-readable description for each variant.
macro_rules! define_error_code {
    (
        $( #[$meta:meta] )*
        $vis:vis enum $Name:ident {
            $(
                $( #[$vmeta:meta] )*
                $vname:ident => $desc:literal
            ),* $(,)*
        }
    ) => {
        $( #[$meta] )*
        #[derive(Clone, Copy, PartialEq, Eq, Hash)]
        $vis enum $Name {
            $(
                $( #[$vmeta] )*
                $vname
            ),*
        }

        impl $Name {
            /// Get the short name of the error code.
            pub fn as_str(self) -> &'static str {
                match self {
                    $(
                        Self::$vname => stringify!($vname),
                    )*
                }
            }

            /// Get the human-readable description of the error code.
            pub fn description(self) -> &'static str {
                match self {
                    $(
                        Self::$vname => $desc,
                    )*
                }
            }
        }

        impl fmt::Debug for $Name {
            #[inline]
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl fmt::Display for $Name {
            #[inline]
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str(self.description())
            }
        }
    };
}

define_error_code! {
    /// A contract violation detected by a lock operation.
    ///
    /// Contract violations are never returned to the caller. They are
    /// escalated to [`Kernel::panic`](crate::Kernel::panic), which terminates
    /// the kernel context through [`PortDiag::fatal`](crate::PortDiag::fatal).
    pub enum Violation {
        /// The calling CPU tried to acquire a non-recursive lock it already
        /// owns.
        LockingAgainstMyself => "locking against myself",
        /// The calling CPU tried to release a mutex owned by another CPU or by
        /// nobody.
        NotOwner => "not owned by this CPU",
        /// A lock asserted to be free of the calling CPU is held by it.
        HeldByMe => "held by this CPU",
        /// The calling CPU tried to release a recursive lock it doesn't hold.
        NotHeld => "not held lock",
        /// The port reported a CPU identifier outside the configured range.
        CpuOutOfRange => "CPU identifier out of range",
    }
}

define_error_code! {
    /// Error type of [`Kernel::new`](crate::Kernel::new).
    pub enum InitError {
        /// The port reported zero processors.
        NoCpus => "the port reported no processors",
        /// The port reported more than [`MAXCPUS`](crate::MAXCPUS)
        /// processors.
        TooManyCpus => "the port reported more processors than supported",
        /// [`Config::multiprocessor`](crate::Config::multiprocessor) is
        /// `false`, but the port reported more than one processor.
        UniprocessorWithManyCpus => "uniprocessor configuration with more than one processor",
    }
}
