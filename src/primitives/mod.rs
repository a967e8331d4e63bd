//! Low-level building blocks shared by the storage engine.

/// Process-wide string interning.
pub mod intern;

/// Adaptive-width integer array used for edge block offsets.
pub mod packed;
