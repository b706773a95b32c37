pub mod config;
pub mod core;
pub mod dram;
pub mod fifo;
pub mod graph;
pub mod interconn;
pub mod mem_fetch;
pub mod model;
pub mod operation;
pub mod scheduler;
pub mod sim;
pub mod stats;
pub mod tensor;
pub mod tile;

#[cfg(test)]
pub mod testing;

pub use config::SimulationConfig;
pub use sim::Simulator;

/// A byte address in simulated DRAM.
#[allow(non_camel_case_types)]
pub type address = u64;

use once_cell::sync::Lazy;
use std::sync::atomic;

static NODE_ID: Lazy<atomic::AtomicU32> = Lazy::new(|| atomic::AtomicU32::new(0));

/// Generate a unique ID for graph nodes.
///
/// IDs are unique across all models in a process, so the scheduler can
/// identify an operation by its layer id alone.
pub fn generate_id() -> u32 {
    NODE_ID.fetch_add(1, atomic::Ordering::SeqCst)
}
