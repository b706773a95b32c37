use crate::config::{CoreKind, SimulationConfig};
use crate::fifo::Fifo;
use crate::mem_fetch::{self, MemoryAccess};
use crate::stats::CoreStats;
use crate::tile::{Span, Status, Tile};
use std::collections::VecDeque;

/// Contract a core exposes to the driver.
///
/// `issue` may only be called when `can_issue` returned true in the same
/// cycle; the core stamps `core_id` on outgoing accesses (the driver
/// double-checks).
pub trait Core {
    fn can_issue(&self, accum_tile: bool) -> bool;
    fn issue(&mut self, tile: Tile);
    fn cycle(&mut self);
    /// A finished tile if one is ready; `None` otherwise.
    fn pop_finished_tile(&mut self) -> Option<Tile>;
    fn has_memory_request(&self) -> bool;
    fn top_memory_request(&self) -> Option<&MemoryAccess>;
    fn pop_memory_request(&mut self) -> Option<MemoryAccess>;
    fn push_memory_response(&mut self, access: MemoryAccess);
    fn running(&self) -> bool;
    fn stats(&self) -> &CoreStats;
    fn print_stats(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Load,
    Compute,
    Store,
}

#[derive(Debug)]
struct TileExec {
    tile: Tile,
    stage: Stage,
    /// Cursor over the current stage's spans.
    span_idx: usize,
    span_off: u64,
    compute_remaining: u64,
}

impl TileExec {
    fn new(tile: Tile) -> Self {
        Self {
            tile,
            stage: Stage::Load,
            span_idx: 0,
            span_off: 0,
            compute_remaining: 0,
        }
    }

    fn spans(&self) -> &[Span] {
        match self.stage {
            Stage::Load => &self.tile.loads,
            Stage::Store => &self.tile.stores,
            Stage::Compute => &[],
        }
    }

    /// Next atomic-sized request address of the current stage, advancing
    /// the cursor.
    fn next_request(&mut self, atomic: u64) -> Option<crate::address> {
        while let Some(span) = self.spans().get(self.span_idx).copied() {
            if self.span_off < span.bytes {
                let addr = span.addr + self.span_off;
                self.span_off += atomic;
                return Some(addr);
            }
            self.span_idx += 1;
            self.span_off = 0;
        }
        None
    }

    fn requests_done(&self) -> bool {
        self.span_idx >= self.spans().len()
    }
}

/// A systolic compute core, tagged output- or weight-stationary.
///
/// A tile runs load -> compute -> store: the load stage emits atomic-sized
/// reads over the tile's input spans, compute holds the array busy, the
/// store stage writes the output slice back (skipped for accumulation
/// tiles, whose partial sum stays in local storage). The weight-stationary
/// array additionally drains and reloads weights per tile.
pub struct SystolicArray {
    id: usize,
    kind: CoreKind,
    atomic_bytes: u64,
    /// Extra cycles appended to every tile's compute phase.
    drain_cycles: u64,
    cycles: u64,
    current: Option<TileExec>,
    /// Accumulation tile accepted while the current one computes
    /// (output-stationary only).
    queued: Option<Tile>,
    request_queue: Fifo<MemoryAccess>,
    finished: VecDeque<Tile>,
    outstanding_loads: usize,
    outstanding_stores: usize,
    stats: CoreStats,
}

impl SystolicArray {
    pub const REQUEST_QUEUE_SIZE: usize = 16;

    #[must_use]
    pub fn new(id: usize, config: &SimulationConfig) -> Self {
        let drain_cycles = match config.core_kind {
            CoreKind::SystolicOs => 0,
            // weights stream out and back in between tiles
            CoreKind::SystolicWs => config.array_rows,
        };
        Self {
            id,
            kind: config.core_kind,
            atomic_bytes: config.dram_atomic_bytes,
            drain_cycles,
            cycles: 0,
            current: None,
            queued: None,
            request_queue: Fifo::new(Some(Self::REQUEST_QUEUE_SIZE)),
            finished: VecDeque::new(),
            outstanding_loads: 0,
            outstanding_stores: 0,
            stats: CoreStats::default(),
        }
    }

    fn retire_current(&mut self) {
        let mut exec = self.current.take().unwrap();
        exec.tile.status = Status::Finish;
        self.stats.tiles_finished += 1;
        log::debug!("core {}: finished {}", self.id, exec.tile);
        self.finished.push_back(exec.tile);
        if let Some(tile) = self.queued.take() {
            self.current = Some(TileExec::new(tile));
        }
    }

    fn emit_request(&mut self) {
        if self.request_queue.full() {
            return;
        }
        let atomic = self.atomic_bytes;
        let core_id = self.id;
        let Some(exec) = self.current.as_mut() else {
            return;
        };
        let is_write = exec.stage == Stage::Store;
        let layer_id = exec.tile.layer_id;
        let tile_seq = exec.tile.seq;
        let Some(addr) = exec.next_request(atomic) else {
            return;
        };
        let access = mem_fetch::Builder {
            addr,
            size: atomic,
            is_write,
            core_id,
            layer_id,
            tile_seq,
        }
        .build();
        if is_write {
            self.outstanding_stores += 1;
            self.stats.bytes_written += atomic;
        } else {
            self.outstanding_loads += 1;
            self.stats.bytes_read += atomic;
        }
        self.stats.requests_sent += 1;
        self.request_queue.enqueue(access);
    }
}

impl Core for SystolicArray {
    fn can_issue(&self, accum_tile: bool) -> bool {
        if self.current.is_none() && self.queued.is_none() {
            return true;
        }
        // the output-stationary array pipelines an accumulation tile into
        // the partial sum already held in local storage
        self.kind == CoreKind::SystolicOs
            && accum_tile
            && self.queued.is_none()
            && self
                .current
                .as_ref()
                .is_some_and(|exec| exec.stage != Stage::Load)
    }

    fn issue(&mut self, mut tile: Tile) {
        debug_assert_eq!(tile.status, Status::Initialized);
        tile.status = Status::Running;
        log::debug!(
            "core {}: issue {} ({} B in, {} B out)",
            self.id,
            tile,
            tile.total_load_bytes(),
            tile.total_store_bytes()
        );
        if self.current.is_none() {
            self.current = Some(TileExec::new(tile));
        } else {
            debug_assert!(self.queued.is_none());
            self.queued = Some(tile);
        }
    }

    fn cycle(&mut self) {
        if let Some(exec) = self.current.as_ref() {
            self.stats.active_cycles += 1;
            match exec.stage {
                Stage::Load => {
                    if exec.requests_done() && self.outstanding_loads == 0 {
                        let exec = self.current.as_mut().unwrap();
                        exec.stage = Stage::Compute;
                        exec.compute_remaining = exec.tile.compute_cycles + self.drain_cycles;
                    } else {
                        self.emit_request();
                    }
                }
                Stage::Compute => {
                    let exec = self.current.as_mut().unwrap();
                    exec.compute_remaining = exec.compute_remaining.saturating_sub(1);
                    if exec.compute_remaining == 0 {
                        if exec.tile.accum {
                            self.retire_current();
                        } else {
                            exec.stage = Stage::Store;
                            exec.span_idx = 0;
                            exec.span_off = 0;
                        }
                    }
                }
                Stage::Store => {
                    if exec.requests_done() && self.outstanding_stores == 0 {
                        self.retire_current();
                    } else {
                        self.emit_request();
                    }
                }
            }
        }
        self.cycles += 1;
        self.stats.cycles = self.cycles;
    }

    fn pop_finished_tile(&mut self) -> Option<Tile> {
        self.finished.pop_front()
    }

    fn has_memory_request(&self) -> bool {
        !self.request_queue.is_empty()
    }

    fn top_memory_request(&self) -> Option<&MemoryAccess> {
        self.request_queue.first()
    }

    fn pop_memory_request(&mut self) -> Option<MemoryAccess> {
        self.request_queue.dequeue()
    }

    fn push_memory_response(&mut self, access: MemoryAccess) {
        debug_assert!(access.is_reply());
        debug_assert_eq!(access.core_id, self.id);
        if access.is_write {
            assert!(self.outstanding_stores > 0);
            self.outstanding_stores -= 1;
        } else {
            assert!(self.outstanding_loads > 0);
            self.outstanding_loads -= 1;
        }
        self.stats.responses_received += 1;
        // the access is consumed here; its round trip ends
        drop(access);
    }

    fn running(&self) -> bool {
        self.current.is_some()
            || self.queued.is_some()
            || !self.request_queue.is_empty()
            || !self.finished.is_empty()
            || self.outstanding_loads > 0
            || self.outstanding_stores > 0
    }

    fn stats(&self) -> &CoreStats {
        &self.stats
    }

    fn print_stats(&self) {
        let util = if self.cycles == 0 {
            0.0
        } else {
            self.stats.active_cycles as f64 / self.cycles as f64 * 100.0
        };
        log::info!(
            "Core [{}]: {} tiles, active {:.2}% of {} cycles, {} B read, {} B written",
            self.id,
            self.stats.tiles_finished,
            util,
            self.cycles,
            self.stats.bytes_read,
            self.stats.bytes_written,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::{Core, SystolicArray};
    use crate::config::{CoreKind, SimulationConfig};
    use crate::testing::init_logging;
    use crate::tile::{Span, Status, Tile};

    fn tile(layer_id: u32, seq: u32, accum: bool, loads: Vec<Span>, stores: Vec<Span>) -> Tile {
        Tile {
            model_id: 0,
            layer_id,
            seq,
            status: Status::Initialized,
            accum,
            loads,
            stores,
            compute_cycles: 4,
        }
    }

    /// Feed every outstanding request straight back as a response.
    fn bounce_requests(core: &mut SystolicArray) -> usize {
        let mut bounced = 0;
        while let Some(mut access) = core.pop_memory_request() {
            access.set_reply();
            core.push_memory_response(access);
            bounced += 1;
        }
        bounced
    }

    #[test]
    fn tile_round_trip_through_all_stages() {
        init_logging();
        let config = SimulationConfig::default();
        let mut core = SystolicArray::new(0, &config);
        assert!(!core.running());
        assert!(core.can_issue(false));

        let atomic = config.dram_atomic_bytes;
        core.issue(tile(
            1,
            0,
            false,
            vec![Span {
                addr: 0,
                bytes: 2 * atomic,
            }],
            vec![Span {
                addr: 4096,
                bytes: atomic,
            }],
        ));
        assert!(core.running());
        assert!(!core.can_issue(false));

        let mut total = 0;
        for _ in 0..64 {
            core.cycle();
            total += bounce_requests(&mut core);
            if let Some(done) = core.pop_finished_tile() {
                assert_eq!(done.status, Status::Finish);
                assert_eq!(done.layer_id, 1);
                // 2 loads + 1 store all answered
                assert_eq!(total, 3);
                assert!(!core.running());
                return;
            }
        }
        panic!("tile never finished");
    }

    #[test]
    fn accumulation_tile_skips_store() {
        init_logging();
        let config = SimulationConfig::default();
        let mut core = SystolicArray::new(0, &config);
        core.issue(tile(1, 0, true, vec![], vec![]));
        for _ in 0..16 {
            core.cycle();
        }
        let done = core.pop_finished_tile().expect("accum tile finished");
        assert_eq!(done.status, Status::Finish);
        assert_eq!(core.stats().requests_sent, 0);
    }

    #[test]
    fn output_stationary_pipelines_accumulation() {
        init_logging();
        let config = SimulationConfig {
            core_kind: CoreKind::SystolicOs,
            ..SimulationConfig::default()
        };
        let mut core = SystolicArray::new(0, &config);
        core.issue(tile(1, 0, true, vec![], vec![]));
        // reach the compute stage
        core.cycle();
        core.cycle();
        assert!(core.can_issue(true));
        assert!(!core.can_issue(false));
        core.issue(tile(1, 1, true, vec![], vec![]));
        assert!(!core.can_issue(true));
    }

    #[test]
    fn weight_stationary_rejects_pipelined_accumulation() {
        init_logging();
        let config = SimulationConfig {
            core_kind: CoreKind::SystolicWs,
            ..SimulationConfig::default()
        };
        let mut core = SystolicArray::new(0, &config);
        core.issue(tile(1, 0, true, vec![], vec![]));
        core.cycle();
        core.cycle();
        assert!(!core.can_issue(true));
    }
}
