//! Concurrency gate bounding how many jobs run at once.

mod gate;

pub use gate::{ConcurrencyGate, GatePermit};
