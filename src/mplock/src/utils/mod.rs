//! Utility
//!
//! **This module is exempt from the API stability guarantee.** It's exposed
//! only because the witness tables are built on it.
mod bitset;
pub use self::bitset::*;
