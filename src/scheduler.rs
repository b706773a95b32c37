use crate::config::SchedulerKind;
use crate::model::Model;
use crate::tile::{Status, Tile};
use console::style;
use std::collections::VecDeque;

struct ScheduledModel {
    model: Model,
    /// Tiles of popped executable operations, in pop order.
    tile_queue: VecDeque<Tile>,
    /// Core half under the spatial-split policy.
    half: usize,
}

/// Dispatches operator tiles to cores.
///
/// Holds the active models in arrival order; the policy tag decides which
/// models a given core may draw tiles from. All variants share the
/// invariant that a tile is dispatched only after every operation it
/// depends on has finished all of its tiles.
pub struct Scheduler {
    kind: SchedulerKind,
    num_cores: usize,
    num_partitions: u32,
    now_ps: u64,
    models: Vec<ScheduledModel>,
}

impl Scheduler {
    #[must_use]
    pub fn new(kind: SchedulerKind, num_cores: usize, num_partitions: u32) -> Self {
        Self {
            kind,
            num_cores,
            num_partitions: num_partitions.max(1),
            now_ps: 0,
            models: Vec::new(),
        }
    }

    /// The driver advances the scheduler's notion of time at every core
    /// phase; used for arrival/latency accounting only.
    pub fn set_time(&mut self, now_ps: u64) {
        self.now_ps = now_ps;
    }

    pub fn schedule_model(&mut self, model: Model, _partition_count: u32) {
        let lower = self
            .models
            .iter()
            .filter(|m| m.half == 0)
            .count();
        let upper = self.models.len() - lower;
        let half = usize::from(lower > upper);
        log::info!(
            "schedule model: {} at {} us",
            style(&model.name).bold(),
            self.now_ps / 1_000_000
        );
        self.models.push(ScheduledModel {
            model,
            tile_queue: VecDeque::new(),
            half,
        });
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// Partition a core is statically bound to (dedicated-partition policy).
    fn core_partition(&self, core_id: usize) -> u32 {
        (core_id * self.num_partitions as usize / self.num_cores) as u32
    }

    /// Core half under the spatial-split policy.
    fn core_half(&self, core_id: usize) -> usize {
        usize::from(core_id >= self.num_cores / 2)
    }

    fn eligible(&self, idx: usize, core_id: usize) -> bool {
        match self.kind {
            SchedulerKind::Simple => true,
            SchedulerKind::PartitionCpu => {
                self.models[idx].model.partition_id == self.core_partition(core_id)
            }
            // one model occupies all cores until it drains
            SchedulerKind::TimeMultiplex => idx == 0,
            SchedulerKind::SpatialSplit => self.models[idx].half == self.core_half(core_id),
        }
    }

    /// Move tiles of the next executable operation into the dispatch queue.
    fn refill(&mut self, idx: usize) {
        let entry = &mut self.models[idx];
        while entry.tile_queue.is_empty() {
            let Some(op_id) = entry.model.pop_executable() else {
                break;
            };
            let op = entry.model.operations.get_mut(&op_id).unwrap();
            log::debug!("scheduler: queueing {} tiles of {}", op.num_tiles(), op);
            entry.tile_queue.extend(op.take_tiles());
        }
    }

    /// Next tile for this core, oldest eligible model first.
    pub fn get_tile(&mut self, core_id: usize) -> Option<Tile> {
        for idx in 0..self.models.len() {
            if !self.eligible(idx, core_id) {
                continue;
            }
            self.refill(idx);
            if let Some(tile) = self.models[idx].tile_queue.pop_front() {
                debug_assert_eq!(tile.status, Status::Initialized);
                let now = self.now_ps;
                self.models[idx].model.update_start_time(now);
                return Some(tile);
            }
        }
        None
    }

    /// Whether the `lookahead`-th tile this core would receive is an
    /// accumulation tile.
    pub fn is_accum_tile(&mut self, core_id: usize, lookahead: usize) -> bool {
        for idx in 0..self.models.len() {
            if !self.eligible(idx, core_id) {
                continue;
            }
            self.refill(idx);
            if let Some(tile) = self.models[idx].tile_queue.get(lookahead) {
                return tile.accum;
            }
        }
        false
    }

    /// Retire one tile of `layer_id`; completes the operation when its last
    /// tile retires, promoting children and possibly finishing the model.
    pub fn finish_tile(&mut self, core_id: usize, layer_id: u32) {
        let Some(idx) = self
            .models
            .iter()
            .position(|m| m.model.operations.contains_key(&layer_id))
        else {
            // the owning model is gone; a correct driver never gets here
            panic!("finish_tile for unknown layer {layer_id}");
        };

        let entry = &mut self.models[idx];
        let op = entry.model.operations.get_mut(&layer_id).unwrap();
        assert!(op.outstanding_tiles > 0);
        op.outstanding_tiles -= 1;
        log::debug!(
            "core {}: finished tile of {} ({} outstanding)",
            core_id,
            op,
            op.outstanding_tiles
        );
        if op.outstanding_tiles == 0 {
            entry.model.set_layer_finish(layer_id);
            log::info!("layer {} finished", layer_id);
        }

        if entry.model.check_finish() && entry.tile_queue.is_empty() {
            let model = &entry.model;
            log::info!(
                "model {} finished, latency {} us",
                style(&model.name).bold(),
                (self.now_ps.saturating_sub(model.request_time_ps)) / 1_000_000
            );
            self.models.remove(idx);
        }
    }
}
