use serde::{Deserialize, Serialize};

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoreStats {
    pub cycles: u64,
    pub active_cycles: u64,
    pub tiles_finished: u64,
    pub requests_sent: u64,
    pub responses_received: u64,
    pub bytes_read: u64,
    pub bytes_written: u64,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IcntStats {
    pub cycles: u64,
    pub busy_cycles: u64,
    pub packets: u64,
}

/// Per-channel DRAM bandwidth accounting.
///
/// Utilization is processed requests per DRAM cycle; the aggregate sums
/// across channels before normalizing.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DramStats {
    pub cycles: u64,
    pub processed: Vec<u64>,
    pub interval_processed: Vec<u64>,
}

impl DramStats {
    #[must_use]
    pub fn new(channels: usize) -> Self {
        Self {
            cycles: 0,
            processed: vec![0; channels],
            interval_processed: vec![0; channels],
        }
    }

    #[must_use]
    pub fn total_processed(&self) -> u64 {
        self.processed.iter().sum()
    }

    #[must_use]
    pub fn utilization(&self, channel: usize) -> f64 {
        if self.cycles == 0 {
            return 0.0;
        }
        self.processed[channel] as f64 / self.cycles as f64 * 100.0
    }

    #[must_use]
    pub fn aggregate_utilization(&self) -> f64 {
        if self.cycles == 0 || self.processed.is_empty() {
            return 0.0;
        }
        let mean = self.total_processed() as f64 / self.processed.len() as f64;
        mean / self.cycles as f64 * 100.0
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimStats {
    pub core_cycles: u64,
    pub core_ticks: u64,
    pub dram_ticks: u64,
    pub icnt_ticks: u64,
    pub core_time_ps: u64,
    pub dram_time_ps: u64,
    pub icnt_time_ps: u64,
}

/// Everything reported at shutdown, serializable for post-processing.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stats {
    pub sim: SimStats,
    pub cores: Vec<CoreStats>,
    pub icnt: IcntStats,
    pub dram: DramStats,
}

#[cfg(test)]
mod tests {
    use super::DramStats;

    #[test]
    fn aggregate_sums_all_channels() {
        let mut stats = DramStats::new(2);
        stats.cycles = 100;
        stats.processed[0] = 10;
        stats.processed[1] = 30;
        assert!((stats.utilization(0) - 10.0).abs() < f64::EPSILON);
        assert!((stats.utilization(1) - 30.0).abs() < f64::EPSILON);
        // (10 + 30) / 2 channels / 100 cycles
        assert!((stats.aggregate_utilization() - 20.0).abs() < f64::EPSILON);
    }
}
