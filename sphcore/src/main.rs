use sphcore::{Scenario, ScenarioConfig};
use sphcore::{bench_dispatch, bench_neighbor_search};

use clap::Parser;
use anyhow::Result;

use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;

#[derive(Parser, Debug)]
struct Args {
    /// Scenario file under `scenarios/`
    #[arg(short, long, default_value = "dam_break.yaml")]
    file_name: String,

    /// Run the neighbor search and dispatch benchmarks instead of a scenario
    #[arg(long)]
    bench: bool,
}

// load here to keep main clean
fn load_scenario_from_yaml(file_name: &str) -> Result<ScenarioConfig> {
    let config_path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("scenarios").join(file_name);
    let file = File::open(&config_path)?;
    let reader = BufReader::new(file);
    let scenario_cfg: ScenarioConfig = serde_yaml::from_reader(reader)?;

    Ok(scenario_cfg)
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    if args.bench {
        bench_neighbor_search()?;
        bench_dispatch()?;
        return Ok(());
    }

    let scenario_cfg = load_scenario_from_yaml(&args.file_name)?;
    let mut scenario = Scenario::build_scenario(scenario_cfg)?;
    let summary = scenario.run()?;

    println!(
        "{}: {} steps, t = {:.6}, smallest dt = {:.3e}, unstable steps = {}",
        args.file_name, summary.steps, summary.t, summary.min_dt, summary.unstable_steps
    );

    Ok(())
}
