//! The wall engine: compute targets, hold them, reconcile them against the
//! exchange, and drive the whole thing on a timer.

pub mod calculator;
pub mod reconciler;
pub mod scheduler;
pub mod store;
