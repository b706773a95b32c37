use crate::address;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Initialized,
    Running,
    Finish,
}

/// A contiguous byte span of a tensor that one tile reads or writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub addr: address,
    pub bytes: u64,
}

/// One dispatchable chunk of an operation's work.
///
/// Produced by the operation at tile-initialization time, transferred into
/// a core on issue and returned to the scheduler on finish.
#[derive(Debug, Clone)]
pub struct Tile {
    pub model_id: u32,
    /// Owning operation.
    pub layer_id: u32,
    /// Insertion order within the operation.
    pub seq: u32,
    pub status: Status,
    /// Accumulation tiles combine into a partial sum held in core-local
    /// storage instead of writing a fresh result back.
    pub accum: bool,
    /// Input spans fetched from DRAM before compute.
    pub loads: Vec<Span>,
    /// Output spans written back after compute; empty for accumulation tiles.
    pub stores: Vec<Span>,
    /// Cycles the systolic array is held busy, before core-kind adjustment.
    pub compute_cycles: u64,
}

impl std::fmt::Display for Tile {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "Tile(layer={}, seq={}, accum={}, status={:?})",
            self.layer_id, self.seq, self.accum, self.status
        )
    }
}

impl Tile {
    pub fn total_load_bytes(&self) -> u64 {
        self.loads.iter().map(|span| span.bytes).sum()
    }

    pub fn total_store_bytes(&self) -> u64 {
        self.stores.iter().map(|span| span.bytes).sum()
    }
}
