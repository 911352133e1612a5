use anyhow::{Context, anyhow};
use clap::Parser;
use env_logger::Builder;
use log::{LevelFilter, error, info};
use std::path::PathBuf;

use wireless_mac_simulator::common::config::{ArchiveKind, RunConfig};
use wireless_mac_simulator::common::scene::{Scene, build_hosts, load_scene};
use wireless_mac_simulator::simulation::{ArchiveSink, FileArchive, LogArchive, MemoryArchive, RunReport, Simulator};

#[derive(Parser, Debug)]
#[command(author, version, about = "Round-based wireless medium access simulator", long_about = None)]
struct Args {
    /// Scene file (world, algorithm, nodes)
    scene: String,

    /// Run configuration; defaults to config.toml next to the scene
    config: Option<PathBuf>,
}

fn run_with<S: ArchiveSink>(scene: &Scene, config: &RunConfig, archive: S) -> RunReport {
    let hosts = build_hosts(scene, config.seed);
    info!("Running {} hosts with {:?}", hosts.len(), scene.algorithm);
    let mut simulator = Simulator::new(hosts, config.timeout, archive);
    simulator.begin_loop();
    simulator.report()
}

fn run(args: Args) -> anyhow::Result<()> {
    let scene_path = &args.scene;

    let scene = load_scene(scene_path)?;
    info!("Loaded scene: {}", scene_path);

    let config = match &args.config {
        Some(path) => RunConfig::load(path),
        None => RunConfig::load_or_default(&RunConfig::config_path_from_scene(scene_path)),
    }
    .map_err(|e| anyhow!(e))?;

    let report = match config.archive {
        ArchiveKind::Memory => run_with(&scene, &config, MemoryArchive::new()),
        ArchiveKind::Log => run_with(&scene, &config, LogArchive),
        ArchiveKind::File => {
            let dir = config.resolve_output_dir(scene_path);
            info!("Archiving evicted messages to {}", dir.display());
            run_with(&scene, &config, FileArchive::create(&dir)?)
        }
    };

    let json = serde_json::to_string_pretty(&report).context("Failed to serialize report")?;
    println!("{}", json);
    Ok(())
}

fn main() {
    // Logging setup
    Builder::new()
        .filter_level(LevelFilter::Info)
        .filter(Some("wireless_mac_simulator"), LevelFilter::Debug)
        .parse_default_env()
        .init();

    info!("Starting up");

    let args = Args::parse();
    if let Err(err) = run(args) {
        error!("{:#}", err);
        std::process::exit(1);
    }
}
