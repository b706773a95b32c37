use crate::address;
use crate::config::{SimulationConfig, TimedDramConfig};
use crate::fifo::Fifo;
use crate::mem_fetch::MemoryAccess;
use crate::stats::DramStats;
use std::collections::VecDeque;

/// How often per-channel bandwidth is reported while running.
const STAT_INTERVAL: u64 = 10_000;

/// Contract of the DRAM subsystem.
///
/// Every pushed access must be atomic-sized and aligned; both are
/// assertion failures at this boundary.
pub trait Dram {
    fn cycle(&mut self);
    fn push(&mut self, channel: usize, access: MemoryAccess);
    fn is_full(&self, channel: usize, access: &MemoryAccess) -> bool;
    fn is_empty(&self, channel: usize) -> bool;
    fn top(&self, channel: usize) -> Option<&MemoryAccess>;
    fn pop(&mut self, channel: usize) -> Option<MemoryAccess>;
    fn channel_id(&self, addr: address) -> usize;
    fn running(&self) -> bool;
    fn stats(&self) -> &DramStats;
    fn print_stats(&self);
}

fn check_access(access: &MemoryAccess, atomic_bytes: u64) {
    assert_eq!(access.size, atomic_bytes, "access size != atomic bytes");
    assert_eq!(
        access.addr % atomic_bytes,
        0,
        "access address not aligned to atomic bytes"
    );
}

fn log_interval(cycles: u64, stats: &mut DramStats) {
    if cycles % STAT_INTERVAL != 0 {
        return;
    }
    for (ch, count) in stats.interval_processed.iter_mut().enumerate() {
        let util = *count as f64 / STAT_INTERVAL as f64 * 100.0;
        log::debug!("DRAM CH[{ch}]: BW util {util:.2}%");
        *count = 0;
    }
}

/// Fixed-latency DRAM: one request at a time per channel, arrivals
/// serialize behind each other.
pub struct SimpleDram {
    latency: u64,
    channels: usize,
    atomic_bytes: u64,
    queue_size: usize,
    cycles: u64,
    waiting: Vec<VecDeque<(u64, MemoryAccess)>>,
    responses: Vec<Fifo<MemoryAccess>>,
    /// Completion cycle of the last access accepted per channel.
    last_finish: Vec<u64>,
    stats: DramStats,
}

impl SimpleDram {
    #[must_use]
    pub fn new(config: &SimulationConfig) -> Self {
        let channels = config.dram_channels;
        Self {
            latency: config.dram_latency,
            channels,
            atomic_bytes: config.dram_atomic_bytes,
            queue_size: config.dram_request_queue_size,
            cycles: 0,
            waiting: (0..channels).map(|_| VecDeque::new()).collect(),
            responses: (0..channels).map(|_| Fifo::new(None)).collect(),
            last_finish: vec![0; channels],
            stats: DramStats::new(channels),
        }
    }
}

impl Dram for SimpleDram {
    fn cycle(&mut self) {
        for ch in 0..self.channels {
            if let Some((ready, _)) = self.waiting[ch].front() {
                if *ready <= self.cycles {
                    let (_, access) = self.waiting[ch].pop_front().unwrap();
                    self.responses[ch].enqueue(access);
                }
            }
        }
        self.cycles += 1;
        self.stats.cycles = self.cycles;
        log_interval(self.cycles, &mut self.stats);
    }

    fn push(&mut self, channel: usize, mut access: MemoryAccess) {
        check_access(&access, self.atomic_bytes);
        assert!(!self.is_full(channel, &access));
        access.set_reply();
        // back-to-back arrivals each occupy a full service window
        let ready = (self.cycles + self.latency).max(self.last_finish[channel] + self.latency);
        self.last_finish[channel] = ready;
        self.waiting[channel].push_back((ready, access));
    }

    fn is_full(&self, channel: usize, _access: &MemoryAccess) -> bool {
        self.waiting[channel].len() >= self.queue_size
    }

    fn is_empty(&self, channel: usize) -> bool {
        self.responses[channel].is_empty()
    }

    fn top(&self, channel: usize) -> Option<&MemoryAccess> {
        self.responses[channel].first()
    }

    fn pop(&mut self, channel: usize) -> Option<MemoryAccess> {
        let access = self.responses[channel].dequeue();
        if access.is_some() {
            self.stats.processed[channel] += 1;
            self.stats.interval_processed[channel] += 1;
        }
        access
    }

    fn channel_id(&self, addr: address) -> usize {
        (addr / self.atomic_bytes) as usize % self.channels
    }

    fn running(&self) -> bool {
        self.waiting.iter().any(|q| !q.is_empty())
            || self.responses.iter().any(|q| !q.is_empty())
    }

    fn stats(&self) -> &DramStats {
        &self.stats
    }

    fn print_stats(&self) {
        for ch in 0..self.channels {
            log::info!(
                "DRAM CH[{}]: AVG BW util {:.2}%",
                ch,
                self.stats.utilization(ch)
            );
        }
        log::info!("DRAM: AVG BW util {:.2}%", self.stats.aggregate_utilization());
    }
}

struct BankState {
    open_row: Option<u64>,
    ready_at: u64,
}

/// Banked DRAM with a row buffer per bank: a row hit costs `cl`, a miss
/// `trp + trcd + cl`, and the per-channel data bus serializes bursts.
pub struct TimedDram {
    timing: TimedDramConfig,
    channels: usize,
    atomic_bytes: u64,
    queue_size: usize,
    cycles: u64,
    queues: Vec<VecDeque<MemoryAccess>>,
    in_service: Vec<Option<(u64, MemoryAccess)>>,
    responses: Vec<Fifo<MemoryAccess>>,
    banks: Vec<Vec<BankState>>,
    bus_free: Vec<u64>,
    stats: DramStats,
}

impl TimedDram {
    #[must_use]
    pub fn new(config: &SimulationConfig, timing: TimedDramConfig) -> Self {
        let channels = config.dram_channels;
        let banks = (0..channels)
            .map(|_| {
                (0..timing.num_banks)
                    .map(|_| BankState {
                        open_row: None,
                        ready_at: 0,
                    })
                    .collect()
            })
            .collect();
        Self {
            timing,
            channels,
            atomic_bytes: config.dram_atomic_bytes,
            queue_size: config.dram_request_queue_size,
            cycles: 0,
            queues: (0..channels).map(|_| VecDeque::new()).collect(),
            in_service: (0..channels).map(|_| None).collect(),
            responses: (0..channels).map(|_| Fifo::new(None)).collect(),
            banks,
            bus_free: vec![0; channels],
            stats: DramStats::new(channels),
        }
    }

    fn bank_of(&self, addr: address) -> usize {
        (addr / self.atomic_bytes / self.channels as u64) as usize % self.timing.num_banks
    }

    fn row_of(&self, addr: address) -> u64 {
        addr / self.timing.row_bytes
    }

    fn start_service(&mut self, channel: usize) {
        if self.in_service[channel].is_some() {
            return;
        }
        let Some(mut access) = self.queues[channel].pop_front() else {
            return;
        };
        let bank_id = self.bank_of(access.addr);
        let row = self.row_of(access.addr);
        let bank = &mut self.banks[channel][bank_id];
        let row_hit = bank.open_row == Some(row);
        let latency = if row_hit {
            self.timing.cl
        } else {
            self.timing.trp + self.timing.trcd + self.timing.cl
        };
        let start = self
            .cycles
            .max(bank.ready_at)
            .max(self.bus_free[channel]);
        let ready = start + latency + self.timing.burst_cycles;
        bank.open_row = Some(row);
        bank.ready_at = ready;
        self.bus_free[channel] = start + self.timing.burst_cycles;
        access.set_reply();
        log::debug!(
            "DRAM CH[{}] bank {} row {} {} at {} (ready {})",
            channel,
            bank_id,
            row,
            if row_hit { "hit" } else { "miss" },
            self.cycles,
            ready
        );
        self.in_service[channel] = Some((ready, access));
    }
}

impl Dram for TimedDram {
    fn cycle(&mut self) {
        for ch in 0..self.channels {
            let due = self.in_service[ch]
                .as_ref()
                .is_some_and(|(ready, _)| *ready <= self.cycles);
            if due {
                let (_, access) = self.in_service[ch].take().unwrap();
                self.responses[ch].enqueue(access);
            }
            self.start_service(ch);
        }
        self.cycles += 1;
        self.stats.cycles = self.cycles;
        log_interval(self.cycles, &mut self.stats);
    }

    fn push(&mut self, channel: usize, access: MemoryAccess) {
        check_access(&access, self.atomic_bytes);
        assert!(!self.is_full(channel, &access));
        self.queues[channel].push_back(access);
    }

    fn is_full(&self, channel: usize, _access: &MemoryAccess) -> bool {
        self.queues[channel].len() >= self.queue_size
    }

    fn is_empty(&self, channel: usize) -> bool {
        self.responses[channel].is_empty()
    }

    fn top(&self, channel: usize) -> Option<&MemoryAccess> {
        self.responses[channel].first()
    }

    fn pop(&mut self, channel: usize) -> Option<MemoryAccess> {
        let access = self.responses[channel].dequeue();
        if access.is_some() {
            self.stats.processed[channel] += 1;
            self.stats.interval_processed[channel] += 1;
        }
        access
    }

    fn channel_id(&self, addr: address) -> usize {
        (addr / self.atomic_bytes) as usize % self.channels
    }

    fn running(&self) -> bool {
        self.queues.iter().any(|q| !q.is_empty())
            || self.in_service.iter().any(Option::is_some)
            || self.responses.iter().any(|q| !q.is_empty())
    }

    fn stats(&self) -> &DramStats {
        &self.stats
    }

    fn print_stats(&self) {
        for ch in 0..self.channels {
            log::info!(
                "DRAM CH[{}]: AVG BW util {:.2}%",
                ch,
                self.stats.utilization(ch)
            );
        }
        log::info!("DRAM: AVG BW util {:.2}%", self.stats.aggregate_utilization());
    }
}
