use color_eyre::eyre::{self, WrapErr};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Environment variable naming the install root; relative DRAM-config and
/// model paths resolve against it.
pub const INSTALL_ROOT_ENV: &str = "NPUSIM_HOME";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoreKind {
    SystolicOs,
    SystolicWs,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DramKind {
    Simple,
    Timed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IcntKind {
    Simple,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerKind {
    Simple,
    PartitionCpu,
    TimeMultiplex,
    SpatialSplit,
}

/// One inference workload: a model graph plus its runtime bindings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkloadConfig {
    pub path: PathBuf,
    /// Arrival time in microseconds.
    pub request_time: f64,
    pub partition_id: u32,
    /// Cap on attention blocks; negative disables truncation.
    pub nr_atten: i64,
    /// Dynamic-axis bindings, e.g. `"batch": 4`.
    pub dynamic_dims: HashMap<String, u64>,
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::new(),
            request_time: 0.0,
            partition_id: 0,
            nr_atten: -1,
            dynamic_dims: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub num_cores: usize,
    pub core_kind: CoreKind,
    /// Systolic array geometry.
    pub array_rows: u64,
    pub array_cols: u64,
    /// Bytes per tensor element.
    pub precision: u64,

    pub core_freq_mhz: u64,
    pub dram_freq_mhz: u64,
    pub icnt_freq_mhz: u64,

    pub dram_kind: DramKind,
    pub dram_channels: usize,
    /// Minimum transfer granularity; every access is this size, aligned.
    pub dram_atomic_bytes: u64,
    /// Service latency of the simple DRAM, in DRAM cycles.
    pub dram_latency: u64,
    pub dram_request_queue_size: usize,
    /// Timing parameters for the timed DRAM; relative paths resolve
    /// against the install root.
    pub dram_config_path: Option<PathBuf>,

    pub icnt_kind: IcntKind,
    pub icnt_latency: u64,
    pub icnt_buffer_size: usize,

    pub scheduler_kind: SchedulerKind,
    pub num_partitions: u32,

    pub workloads: Vec<WorkloadConfig>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            num_cores: 2,
            core_kind: CoreKind::SystolicOs,
            array_rows: 8,
            array_cols: 8,
            precision: 2,
            core_freq_mhz: 1000,
            dram_freq_mhz: 1000,
            icnt_freq_mhz: 1000,
            dram_kind: DramKind::Simple,
            dram_channels: 2,
            dram_atomic_bytes: 32,
            dram_latency: 10,
            dram_request_queue_size: 32,
            dram_config_path: None,
            icnt_kind: IcntKind::Simple,
            icnt_latency: 1,
            icnt_buffer_size: 8,
            scheduler_kind: SchedulerKind::Simple,
            num_partitions: 1,
            workloads: Vec::new(),
        }
    }
}

impl SimulationConfig {
    pub fn from_path(path: impl AsRef<Path>) -> eyre::Result<Self> {
        let path = path.as_ref();
        let reader = std::fs::File::open(path)
            .wrap_err_with(|| format!("config at {} does not exist", path.display()))?;
        let config: Self = serde_json::from_reader(std::io::BufReader::new(reader))
            .wrap_err_with(|| format!("malformed config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> eyre::Result<()> {
        if self.num_cores == 0 {
            eyre::bail!("num_cores must be positive");
        }
        if self.dram_channels == 0 {
            eyre::bail!("dram_channels must be positive");
        }
        if self.dram_atomic_bytes == 0 {
            eyre::bail!("dram_atomic_bytes must be positive");
        }
        if self.core_freq_mhz == 0 || self.dram_freq_mhz == 0 || self.icnt_freq_mhz == 0 {
            eyre::bail!("clock frequencies must be positive");
        }
        if self.array_rows == 0 || self.array_cols == 0 {
            eyre::bail!("array geometry must be positive");
        }
        Ok(())
    }

    /// Clock period in picoseconds.
    #[must_use]
    pub fn core_period_ps(&self) -> u64 {
        1_000_000 / self.core_freq_mhz
    }

    #[must_use]
    pub fn dram_period_ps(&self) -> u64 {
        1_000_000 / self.dram_freq_mhz
    }

    #[must_use]
    pub fn icnt_period_ps(&self) -> u64 {
        1_000_000 / self.icnt_freq_mhz
    }
}

/// Resolve a path against the install root named by `NPUSIM_HOME`;
/// absent, the current directory is used.
#[must_use]
pub fn resolve_install_path(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    let root = std::env::var_os(INSTALL_ROOT_ENV)
        .map_or_else(|| PathBuf::from("."), PathBuf::from);
    root.join(path)
}

/// Row-buffer timing of the timed DRAM, in DRAM cycles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimedDramConfig {
    pub cl: u64,
    pub trcd: u64,
    pub trp: u64,
    pub burst_cycles: u64,
    pub num_banks: usize,
    pub row_bytes: u64,
}

impl Default for TimedDramConfig {
    fn default() -> Self {
        Self {
            cl: 14,
            trcd: 14,
            trp: 14,
            burst_cycles: 4,
            num_banks: 8,
            row_bytes: 2048,
        }
    }
}

impl TimedDramConfig {
    pub fn from_path(path: impl AsRef<Path>) -> eyre::Result<Self> {
        let path = path.as_ref();
        let reader = std::fs::File::open(path)
            .wrap_err_with(|| format!("DRAM config at {} does not exist", path.display()))?;
        let config = serde_json::from_reader(std::io::BufReader::new(reader))
            .wrap_err_with(|| format!("malformed DRAM config {}", path.display()))?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::{resolve_install_path, SchedulerKind, SimulationConfig};
    use color_eyre::eyre;
    use std::path::Path;

    #[test]
    fn parse_config_with_defaults() -> eyre::Result<()> {
        let raw = r#"{
            "num_cores": 4,
            "core_kind": "systolic_ws",
            "scheduler_kind": "spatial_split",
            "core_freq_mhz": 1000,
            "dram_freq_mhz": 500,
            "icnt_freq_mhz": 2000
        }"#;
        let config: SimulationConfig = serde_json::from_str(raw)?;
        assert_eq!(config.num_cores, 4);
        assert_eq!(config.scheduler_kind, SchedulerKind::SpatialSplit);
        assert_eq!(config.core_period_ps(), 1000);
        assert_eq!(config.dram_period_ps(), 2000);
        assert_eq!(config.icnt_period_ps(), 500);
        config.validate()?;
        Ok(())
    }

    #[test]
    fn unknown_scheduler_kind_is_a_configuration_error() {
        let raw = r#"{"scheduler_kind": "round_robin"}"#;
        let result: Result<SimulationConfig, _> = serde_json::from_str(raw);
        assert!(result.is_err());
    }

    #[test]
    fn zero_frequency_fails_validation() {
        let config = SimulationConfig {
            dram_freq_mhz: 0,
            ..SimulationConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn absolute_paths_bypass_install_root() {
        let path = Path::new("/etc/dram.json");
        assert_eq!(resolve_install_path(path), path);
    }
}
