//! Shared foundations for the devflow workspace.
//!
//! This crate carries the pieces every other devflow crate needs: the phase
//! and run identifier types, the error taxonomy with exit-code mapping, the
//! cooperative cancellation flag, and atomic file writes for durable state.

pub mod atomic_write;
pub mod cancel;
pub mod error;
pub mod types;
