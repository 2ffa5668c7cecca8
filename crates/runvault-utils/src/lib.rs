//! Foundation utilities for runvault
//!
//! Everything that hashes, serializes canonically, or touches the filesystem
//! atomically flows through this crate. The higher layers (doctrine store,
//! snapshot writer, run directory manager, verifier, migration engine) are
//! built on these primitives and must not reimplement them.

pub mod atomic_write;
pub mod canon;
pub mod logging;
pub mod paths;
