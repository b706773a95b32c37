use clap::Parser;
use color_eyre::eyre::{self, WrapErr};
use npusim::config::{self, SimulationConfig};
use npusim::graph::GraphFile;
use npusim::model::Model;
use npusim::Simulator;
use std::path::PathBuf;
use std::time::Instant;

#[derive(Debug, Parser)]
#[command(author, version, about = "cycle-level multi-core NPU simulator")]
struct Options {
    /// Simulation configuration (JSON).
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Write aggregated statistics to this file as JSON.
    #[arg(long, value_name = "FILE")]
    stats: Option<PathBuf>,
}

fn main() -> eyre::Result<()> {
    env_logger::init();
    color_eyre::install()?;

    let options = Options::parse();
    let config = SimulationConfig::from_path(&options.config)?;
    log::debug!("config: {:#?}", &config);

    let mut sim = Simulator::new(config.clone())?;
    for workload in &config.workloads {
        let graph_path = config::resolve_install_path(&workload.path);
        let graph = GraphFile::from_path(&graph_path)?;
        sim.register_model(Model::new(graph, workload));
    }

    let start = Instant::now();
    sim.run();
    log::info!("simulation took {:?}", start.elapsed());

    if let Some(stats_path) = &options.stats {
        let file = std::fs::File::create(stats_path)
            .wrap_err_with(|| format!("cannot write stats to {}", stats_path.display()))?;
        serde_json::to_writer_pretty(std::io::BufWriter::new(file), &sim.stats())?;
        log::info!("wrote stats to {}", stats_path.display());
    }

    Ok(())
}
