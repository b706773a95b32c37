use crate::fifo::Fifo;
use crate::mem_fetch::MemoryAccess;
use crate::stats::IcntStats;
use console::style;

/// Bidirectional switched fabric between cores and DRAM channels.
///
/// Ports `[0, num_cores)` are cores; `[num_cores, num_cores + channels)`
/// are memory endpoints. Backpressure is communicated solely via
/// `is_full` / `is_empty`; the driver must never push into a full port nor
/// pop from an empty one.
pub trait Interconnect {
    fn push(&mut self, src: usize, dest: usize, access: MemoryAccess);
    fn is_full(&self, src: usize, access: &MemoryAccess) -> bool;
    fn is_empty(&self, port: usize) -> bool;
    fn top(&self, port: usize) -> Option<&MemoryAccess>;
    fn pop(&mut self, port: usize) -> Option<MemoryAccess>;
    fn cycle(&mut self);
    fn running(&self) -> bool;
    fn stats(&self) -> &IcntStats;
    fn print_stats(&self);
}

struct InFlight {
    ready_cycle: u64,
    dest: usize,
    access: MemoryAccess,
}

/// Fixed-latency switch: a packet pushed at cycle `c` becomes eligible for
/// delivery to its destination port at `c + latency`; each source port
/// forwards at most one packet per cycle.
pub struct SimpleIcnt {
    num_cores: usize,
    num_nodes: usize,
    latency: u64,
    buffer_size: usize,
    cycles: u64,
    in_flight: usize,
    ingress: Vec<std::collections::VecDeque<InFlight>>,
    egress: Vec<Fifo<MemoryAccess>>,
    stats: IcntStats,
}

impl SimpleIcnt {
    #[must_use]
    pub fn new(num_cores: usize, num_channels: usize, latency: u64, buffer_size: usize) -> Self {
        let num_nodes = num_cores + num_channels;
        Self {
            num_cores,
            num_nodes,
            latency,
            buffer_size,
            cycles: 0,
            in_flight: 0,
            ingress: (0..num_nodes).map(|_| Default::default()).collect(),
            egress: (0..num_nodes).map(|_| Fifo::new(Some(buffer_size))).collect(),
            stats: IcntStats::default(),
        }
    }
}

impl Interconnect for SimpleIcnt {
    fn push(&mut self, src: usize, dest: usize, access: MemoryAccess) {
        assert!(src < self.num_nodes);
        assert!(dest < self.num_nodes);
        assert!(!self.is_full(src, &access));
        log::debug!(
            "{}: {} from node {} to node {}",
            style("ICNT PUSH").bold(),
            access,
            src,
            dest
        );
        self.in_flight += 1;
        self.stats.packets += 1;
        self.ingress[src].push_back(InFlight {
            ready_cycle: self.cycles + self.latency,
            dest,
            access,
        });
    }

    fn is_full(&self, src: usize, _access: &MemoryAccess) -> bool {
        self.ingress[src].len() >= self.buffer_size
    }

    fn is_empty(&self, port: usize) -> bool {
        self.egress[port].is_empty()
    }

    fn top(&self, port: usize) -> Option<&MemoryAccess> {
        self.egress[port].first()
    }

    fn pop(&mut self, port: usize) -> Option<MemoryAccess> {
        let access = self.egress[port].dequeue();
        if access.is_some() {
            self.in_flight -= 1;
        }
        access
    }

    fn cycle(&mut self) {
        for src in 0..self.num_nodes {
            let Some(head) = self.ingress[src].front() else {
                continue;
            };
            if head.ready_cycle > self.cycles || self.egress[head.dest].full() {
                continue;
            }
            let head = self.ingress[src].pop_front().unwrap();
            self.egress[head.dest].enqueue(head.access);
        }
        if self.in_flight > 0 {
            self.stats.busy_cycles += 1;
        }
        self.cycles += 1;
        self.stats.cycles = self.cycles;
    }

    fn running(&self) -> bool {
        self.in_flight > 0
    }

    fn stats(&self) -> &IcntStats {
        &self.stats
    }

    fn print_stats(&self) {
        let util = if self.cycles == 0 {
            0.0
        } else {
            self.stats.busy_cycles as f64 / self.cycles as f64 * 100.0
        };
        log::info!(
            "Icnt: {} packets, busy {:.2}% of {} cycles",
            self.stats.packets,
            util,
            self.cycles
        );
    }
}

#[cfg(test)]
mod tests {
    use super::{Interconnect, SimpleIcnt};
    use crate::mem_fetch::{self, MemoryAccess};
    use crate::testing::init_logging;

    fn access(core_id: usize) -> MemoryAccess {
        mem_fetch::Builder {
            addr: 64,
            size: 32,
            is_write: false,
            core_id,
            layer_id: 0,
            tile_seq: 0,
        }
        .build()
    }

    #[test]
    fn packet_round_trip_preserves_core_id() {
        init_logging();
        let mut icnt = SimpleIcnt::new(2, 1, 1, 8);
        let mem_port = 2;

        // core 0 -> memory
        icnt.push(0, mem_port, access(0));
        assert!(icnt.running());
        assert!(icnt.is_empty(mem_port));
        icnt.cycle();
        icnt.cycle();
        assert!(!icnt.is_empty(mem_port));
        let mut request = icnt.pop(mem_port).unwrap();
        assert_eq!(request.core_id, 0);

        // memory -> core 0
        request.set_reply();
        icnt.push(mem_port, request.core_id, request);
        icnt.cycle();
        icnt.cycle();
        let reply = icnt.pop(0).unwrap();
        assert_eq!(reply.core_id, 0);
        assert!(reply.is_reply());
        assert!(!icnt.running());
    }

    #[test]
    fn latency_delays_delivery() {
        init_logging();
        let mut icnt = SimpleIcnt::new(1, 1, 4, 8);
        icnt.push(0, 1, access(0));
        for _ in 0..4 {
            assert!(icnt.is_empty(1));
            icnt.cycle();
        }
        icnt.cycle();
        assert!(!icnt.is_empty(1));
    }

    #[test]
    fn ingress_backpressure_reports_full() {
        init_logging();
        let mut icnt = SimpleIcnt::new(1, 1, 1, 2);
        icnt.push(0, 1, access(0));
        icnt.push(0, 1, access(0));
        assert!(icnt.is_full(0, &access(0)));
    }
}
