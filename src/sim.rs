use crate::config::{self, DramKind, IcntKind, SimulationConfig, TimedDramConfig};
use crate::core::{Core, SystolicArray};
use crate::dram::{Dram, SimpleDram, TimedDram};
use crate::interconn::{Interconnect, SimpleIcnt};
use crate::mem_fetch::MemoryAccess;
use crate::model::Model;
use crate::scheduler::Scheduler;
use crate::stats::{SimStats, Stats};
use crate::tile::Status;
use color_eyre::eyre;
use console::style;
use std::cmp::Reverse;
use std::collections::BinaryHeap;

pub const CORE_MASK: u8 = 1 << 0;
pub const DRAM_MASK: u8 = 1 << 1;
pub const ICNT_MASK: u8 = 1 << 2;

/// Heap entry for a registered model awaiting its arrival time.
///
/// Ordered by arrival time, ties broken by registration order.
struct PendingModel {
    request_time_ps: u64,
    seq: u64,
    model: Model,
}

impl PartialEq for PendingModel {
    fn eq(&self, other: &Self) -> bool {
        self.request_time_ps == other.request_time_ps && self.seq == other.seq
    }
}

impl Eq for PendingModel {}

impl PartialOrd for PendingModel {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PendingModel {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.request_time_ps, self.seq).cmp(&(other.request_time_ps, other.seq))
    }
}

/// The simulation driver.
///
/// Owns the three clock domains and orchestrates the per-iteration
/// schedule: model ingestion, core ticks, the DRAM tick, and the
/// interconnect round trip.
pub struct Simulator {
    config: SimulationConfig,
    cores: Vec<Box<dyn Core>>,
    dram: Box<dyn Dram>,
    icnt: Box<dyn Interconnect>,
    scheduler: Scheduler,
    models: BinaryHeap<Reverse<PendingModel>>,
    next_seq: u64,

    core_period: u64,
    dram_period: u64,
    icnt_period: u64,
    core_time: u64,
    dram_time: u64,
    icnt_time: u64,
    cycle_mask: u8,

    core_cycles: u64,
    core_ticks: u64,
    dram_ticks: u64,
    icnt_ticks: u64,
}

impl Simulator {
    pub fn new(config: SimulationConfig) -> eyre::Result<Self> {
        config.validate()?;

        let dram: Box<dyn Dram> = match config.dram_kind {
            DramKind::Simple => Box::new(SimpleDram::new(&config)),
            DramKind::Timed => {
                let timing = match &config.dram_config_path {
                    Some(path) => {
                        let resolved = config::resolve_install_path(path);
                        log::info!("DRAM timing config: {}", resolved.display());
                        TimedDramConfig::from_path(&resolved)?
                    }
                    None => TimedDramConfig::default(),
                };
                Box::new(TimedDram::new(&config, timing))
            }
        };

        let icnt: Box<dyn Interconnect> = match config.icnt_kind {
            IcntKind::Simple => Box::new(SimpleIcnt::new(
                config.num_cores,
                config.dram_channels,
                config.icnt_latency,
                config.icnt_buffer_size,
            )),
        };

        let cores = (0..config.num_cores)
            .map(|core_id| Box::new(SystolicArray::new(core_id, &config)) as Box<dyn Core>)
            .collect();

        let scheduler = Scheduler::new(
            config.scheduler_kind,
            config.num_cores,
            config.num_partitions,
        );

        Ok(Self {
            core_period: config.core_period_ps(),
            dram_period: config.dram_period_ps(),
            icnt_period: config.icnt_period_ps(),
            config,
            cores,
            dram,
            icnt,
            scheduler,
            models: BinaryHeap::new(),
            next_seq: 0,
            core_time: 0,
            dram_time: 0,
            icnt_time: 0,
            cycle_mask: 0,
            core_cycles: 0,
            core_ticks: 0,
            dram_ticks: 0,
            icnt_ticks: 0,
        })
    }

    /// Register a model for execution at its arrival time.
    pub fn register_model(&mut self, model: Model) {
        let entry = PendingModel {
            request_time_ps: model.request_time_ps,
            seq: self.next_seq,
            model,
        };
        self.next_seq += 1;
        self.models.push(Reverse(entry));
    }

    pub fn run(&mut self) {
        log::info!("{}", style("====== start simulation ======").bold());
        while self.running() {
            self.step();
        }
        log::info!("{}", style("====== simulation finished ======").bold());
        self.print_stats();
    }

    #[must_use]
    pub fn running(&self) -> bool {
        !self.models.is_empty()
            || !self.scheduler.is_empty()
            || self.cores.iter().any(|core| core.running())
            || self.icnt.running()
            || self.dram.running()
    }

    /// One super-cycle: pick the ticking domains and run their phases in
    /// order (cores, then DRAM, then interconnect).
    pub fn step(&mut self) {
        self.set_cycle_mask();

        if self.cycle_mask & CORE_MASK != 0 {
            self.scheduler.set_time(self.core_time);
            self.handle_models();
            for core_id in 0..self.cores.len() {
                self.core_tick(core_id);
            }
            self.core_cycles += 1;
            self.core_ticks += 1;
        }

        if self.cycle_mask & DRAM_MASK != 0 {
            self.dram.cycle();
            self.dram_ticks += 1;
        }

        if self.cycle_mask & ICNT_MASK != 0 {
            self.icnt_phase();
            self.icnt_ticks += 1;
        }
    }

    /// Pop every pending model whose arrival time has been reached and
    /// hand it to the scheduler; a model can issue a tile the same cycle
    /// it arrives.
    fn handle_models(&mut self) {
        loop {
            let due = self
                .models
                .peek()
                .is_some_and(|Reverse(pending)| pending.request_time_ps <= self.core_time);
            if !due {
                break;
            }
            let Reverse(mut pending) = self.models.pop().unwrap();
            pending.model.initialize(&self.config);
            self.scheduler
                .schedule_model(pending.model, self.config.num_partitions);
        }
    }

    /// Retire, issue, advance one core.
    fn core_tick(&mut self, core_id: usize) {
        if let Some(tile) = self.cores[core_id].pop_finished_tile() {
            debug_assert_eq!(tile.status, Status::Finish);
            self.scheduler.finish_tile(core_id, tile.layer_id);
        }

        if !self.scheduler.is_empty() {
            let accum_tile = self.scheduler.is_accum_tile(core_id, 0);
            if self.cores[core_id].can_issue(accum_tile) {
                if let Some(tile) = self.scheduler.get_tile(core_id) {
                    debug_assert_eq!(tile.status, Status::Initialized);
                    self.cores[core_id].issue(tile);
                }
            }
        }

        self.cores[core_id].cycle();
    }

    /// Move packets along the data-flow direction, then advance the
    /// interconnect clock: responses produced this phase become observable
    /// the next one.
    fn icnt_phase(&mut self) {
        let num_cores = self.cores.len();

        for core_id in 0..num_cores {
            // core -> icnt, one request per cycle
            if self.cores[core_id].has_memory_request() {
                let (dest, can_push) = {
                    let access = self.cores[core_id].top_memory_request().unwrap();
                    debug_assert_eq!(access.core_id, core_id);
                    (
                        self.dest_node(access),
                        !self.icnt.is_full(core_id, access),
                    )
                };
                if can_push {
                    let access = self.cores[core_id].pop_memory_request().unwrap();
                    self.icnt.push(core_id, dest, access);
                }
            }
            // icnt -> core, deliver one pending response
            if !self.icnt.is_empty(core_id) {
                let access = self.icnt.pop(core_id).unwrap();
                self.cores[core_id].push_memory_response(access);
            }
        }

        for mem_id in 0..self.config.dram_channels {
            let port = num_cores + mem_id;
            // icnt -> DRAM
            if !self.icnt.is_empty(port) {
                let can_push = {
                    let access = self.icnt.top(port).unwrap();
                    !self.dram.is_full(mem_id, access)
                };
                if can_push {
                    let access = self.icnt.pop(port).unwrap();
                    self.dram.push(mem_id, access);
                }
            }
            // DRAM -> icnt
            if !self.dram.is_empty(mem_id) {
                let (dest, can_push) = {
                    let access = self.dram.top(mem_id).unwrap();
                    (self.dest_node(access), !self.icnt.is_full(port, access))
                };
                if can_push {
                    let access = self.dram.pop(mem_id).unwrap();
                    self.icnt.push(port, dest, access);
                }
            }
        }

        self.icnt.cycle();
    }

    /// The slowest clock paces the loop: every domain at the current
    /// minimum ticks this iteration and advances by its period.
    fn set_cycle_mask(&mut self) {
        self.cycle_mask = 0;
        let minimum = self.core_time.min(self.dram_time).min(self.icnt_time);
        if self.core_time <= minimum {
            self.cycle_mask |= CORE_MASK;
            self.core_time += self.core_period;
        }
        if self.dram_time <= minimum {
            self.cycle_mask |= DRAM_MASK;
            self.dram_time += self.dram_period;
        }
        if self.icnt_time <= minimum {
            self.cycle_mask |= ICNT_MASK;
            self.icnt_time += self.icnt_period;
        }
    }

    /// Requests go to the DRAM endpoint owning the address; responses go
    /// back to the originating core.
    fn dest_node(&self, access: &MemoryAccess) -> usize {
        if access.is_request() {
            self.config.num_cores + self.dram.channel_id(access.addr)
        } else {
            access.core_id
        }
    }

    pub fn print_stats(&self) {
        for core in &self.cores {
            core.print_stats();
        }
        self.icnt.print_stats();
        self.dram.print_stats();
    }

    #[must_use]
    pub fn stats(&self) -> Stats {
        Stats {
            sim: SimStats {
                core_cycles: self.core_cycles,
                core_ticks: self.core_ticks,
                dram_ticks: self.dram_ticks,
                icnt_ticks: self.icnt_ticks,
                core_time_ps: self.core_time,
                dram_time_ps: self.dram_time,
                icnt_time_ps: self.icnt_time,
            },
            cores: self.cores.iter().map(|core| core.stats().clone()).collect(),
            icnt: self.icnt.stats().clone(),
            dram: self.dram.stats().clone(),
        }
    }

    #[must_use]
    pub fn core_time_ps(&self) -> u64 {
        self.core_time
    }

    #[must_use]
    pub fn core_cycles(&self) -> u64 {
        self.core_cycles
    }

    #[must_use]
    pub fn scheduler_empty(&self) -> bool {
        self.scheduler.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::{PendingModel, Simulator};
    use crate::config::{CoreKind, SchedulerKind, SimulationConfig, WorkloadConfig};
    use crate::graph::{Dim, GraphFile, Initializer, Node, ValueInfo};
    use crate::model::Model;
    use crate::testing::init_logging;
    use std::cmp::Reverse;
    use std::collections::BinaryHeap;

    fn node(name: &str, op_type: &str, inputs: &[&str], outputs: &[&str]) -> Node {
        Node {
            name: name.to_string(),
            op_type: op_type.to_string(),
            inputs: inputs.iter().map(ToString::to_string).collect(),
            outputs: outputs.iter().map(ToString::to_string).collect(),
            attributes: Default::default(),
        }
    }

    /// A model with a single elementwise op over a zero-sized tensor:
    /// compute only, no DRAM traffic.
    fn noop_model(request_time: f64) -> Model {
        let graph = GraphFile {
            name: "noop".into(),
            inputs: vec![ValueInfo {
                name: "input".into(),
                dims: vec![],
            }],
            initializers: vec![],
            nodes: vec![node("nop", "Gelu", &["input"], &["out"])],
        };
        let workload = WorkloadConfig {
            request_time,
            ..WorkloadConfig::default()
        };
        Model::new(graph, &workload)
    }

    /// A two-op chain with real traffic: Gemm feeding a Gelu.
    fn chain_model() -> Model {
        let graph = GraphFile {
            name: "chain".into(),
            inputs: vec![ValueInfo {
                name: "input".into(),
                dims: vec![Dim::Value(8), Dim::Value(8)],
            }],
            initializers: vec![Initializer {
                name: "w0".into(),
                dims: vec![8, 8],
            }],
            nodes: vec![
                node("a", "Gemm", &["input", "w0"], &["t0"]),
                node("b", "Gelu", &["t0"], &["t1"]),
            ],
        };
        Model::new(graph, &WorkloadConfig::default())
    }

    #[test]
    fn single_core_noop_drains_without_dram_traffic() {
        init_logging();
        let config = SimulationConfig {
            num_cores: 1,
            dram_channels: 1,
            scheduler_kind: SchedulerKind::Simple,
            // elementwise compute = rows + cols = 10 cycles
            array_rows: 5,
            array_cols: 5,
            ..SimulationConfig::default()
        };
        let core_period = config.core_period_ps();
        let mut sim = Simulator::new(config).unwrap();
        sim.register_model(noop_model(0.0));
        assert!(sim.running());
        sim.run();

        assert!(!sim.running());
        assert!(sim.scheduler_empty());
        assert!(sim.core_time_ps() >= 10 * core_period);
        let stats = sim.stats();
        assert_eq!(stats.dram.total_processed(), 0);
        assert_eq!(stats.cores[0].requests_sent, 0);
        assert_eq!(stats.cores[0].tiles_finished, 1);
    }

    #[test]
    fn clock_ratios_follow_frequencies() {
        init_logging();
        let config = SimulationConfig {
            core_freq_mhz: 1000,
            dram_freq_mhz: 500,
            icnt_freq_mhz: 2000,
            ..SimulationConfig::default()
        };
        let mut sim = Simulator::new(config).unwrap();
        // 4000 iterations cover whole alignment periods exactly
        for _ in 0..4000 {
            sim.step();
        }
        let stats = sim.stats();
        assert_eq!(stats.sim.icnt_ticks, 2 * stats.sim.core_ticks);
        assert_eq!(stats.sim.core_ticks, 2 * stats.sim.dram_ticks);
    }

    #[test]
    fn time_is_monotone_and_min_advances() {
        init_logging();
        let config = SimulationConfig {
            core_freq_mhz: 1000,
            dram_freq_mhz: 500,
            icnt_freq_mhz: 2000,
            ..SimulationConfig::default()
        };
        let mut sim = Simulator::new(config).unwrap();
        let mut prev = (0, 0, 0);
        let mut prev_min = 0;
        for _ in 0..256 {
            sim.step();
            let now = (sim.core_time, sim.dram_time, sim.icnt_time);
            assert!(now.0 >= prev.0 && now.1 >= prev.1 && now.2 >= prev.2);
            let min = now.0.min(now.1).min(now.2);
            assert!(min > prev_min || min == 0);
            prev = now;
            prev_min = min;
        }
    }

    #[test]
    fn chain_completes_and_conserves_accesses() {
        init_logging();
        let mut sim = Simulator::new(SimulationConfig::default()).unwrap();
        sim.register_model(chain_model());
        sim.run();

        assert!(!sim.running());
        let stats = sim.stats();
        let sent: u64 = stats.cores.iter().map(|c| c.requests_sent).sum();
        let received: u64 = stats.cores.iter().map(|c| c.responses_received).sum();
        // every request made the full round trip
        assert!(sent > 0);
        assert_eq!(sent, received);
        assert_eq!(stats.dram.total_processed(), sent);
    }

    #[test]
    fn arriving_model_waits_for_its_request_time() {
        init_logging();
        let config = SimulationConfig {
            num_cores: 1,
            dram_channels: 1,
            array_rows: 5,
            array_cols: 5,
            ..SimulationConfig::default()
        };
        let mut sim = Simulator::new(config).unwrap();
        // 2 us arrival
        sim.register_model(noop_model(2.0));
        sim.run();
        assert!(sim.core_time_ps() >= 2_000_000);
        assert_eq!(sim.stats().cores[0].tiles_finished, 1);
    }

    #[test]
    fn pending_heap_breaks_ties_by_registration_order() {
        init_logging();
        let mut heap = BinaryHeap::new();
        for seq in 0..4 {
            heap.push(Reverse(PendingModel {
                request_time_ps: 1000,
                seq,
                model: noop_model(0.0),
            }));
        }
        heap.push(Reverse(PendingModel {
            request_time_ps: 500,
            seq: 4,
            model: noop_model(0.0),
        }));

        let Reverse(first) = heap.pop().unwrap();
        assert_eq!(first.request_time_ps, 500);
        let order: Vec<u64> = std::iter::from_fn(|| heap.pop().map(|Reverse(p)| p.seq)).collect();
        assert_eq!(order, vec![0, 1, 2, 3]);
    }

    #[test]
    fn spatial_split_runs_both_models_to_completion() {
        init_logging();
        let config = SimulationConfig {
            num_cores: 2,
            scheduler_kind: SchedulerKind::SpatialSplit,
            ..SimulationConfig::default()
        };
        let mut sim = Simulator::new(config).unwrap();
        sim.register_model(chain_model());
        sim.register_model(chain_model());
        sim.run();

        let stats = sim.stats();
        // each half ran exactly one model's tiles
        assert!(stats.cores[0].tiles_finished > 0);
        assert_eq!(stats.cores[0].tiles_finished, stats.cores[1].tiles_finished);
        assert!(sim.scheduler_empty());
    }

    #[test]
    fn weight_stationary_core_takes_longer() {
        init_logging();
        let run = |kind: CoreKind| {
            let config = SimulationConfig {
                num_cores: 1,
                core_kind: kind,
                ..SimulationConfig::default()
            };
            let mut sim = Simulator::new(config).unwrap();
            sim.register_model(chain_model());
            sim.run();
            sim.core_cycles()
        };
        assert!(run(CoreKind::SystolicWs) > run(CoreKind::SystolicOs));
    }
}
