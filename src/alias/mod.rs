//! Alias management: the alias ↔ node-id registry and the arbitration state
//! machine that wins an alias on a CAN segment.

mod arbiter;
mod map;

pub use arbiter::{AliasArbiter, AliasPrng, ArbiterEvent, ArbiterState, ArbiterTiming};
pub use map::{AliasMap, AliasWatcher};
