//! ab-runner: headless runner for the free-shipping experiment pipeline.
//!
//! Usage:
//!   ab-runner --data-dir ./data
//!   ab-runner --data-dir ./data --seed 7 --config pipeline.json
//!   ab-runner --data-dir ./data --stage analysis

use anyhow::{bail, Result};
use freeship_core::{
    config::PipelineConfig,
    engine::Pipeline,
    rng::StageSlot,
    store::Table,
    summary::{Recommendation, StrategyOutcome},
};
use std::env;

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let data_dir = flag_value(&args, "--data-dir").unwrap_or("./data");
    let config = match flag_value(&args, "--config") {
        Some(path) => PipelineConfig::load(path)?,
        None => PipelineConfig::default(),
    };
    let seed = parse_arg(&args, "--seed", config.seed);
    let config = config.with_seed(seed);
    let stage = flag_value(&args, "--stage");

    println!("Free-shipping A/B pipeline: ab-runner");
    println!("  seed:      {seed}");
    println!("  data_dir:  {data_dir}");
    println!("  stage:     {}", stage.unwrap_or("all"));
    println!();

    let mut pipeline = Pipeline::open(config, data_dir)?;

    match stage {
        Some(name) => {
            let Some(slot) = StageSlot::from_name(name) else {
                bail!(
                    "unknown stage '{name}'; expected one of: {}",
                    pipeline.stage_names().join(", ")
                );
            };
            let events = pipeline.run_stage(slot)?;
            log::debug!("{}", serde_json::to_string(&events)?);
            if slot == StageSlot::Summary {
                print_summary(&pipeline)?;
            }
        }
        None => {
            let events = pipeline.run_all()?;
            log::debug!("{} run-log events", events.len());
            print_summary(&pipeline)?;
        }
    }
    Ok(())
}

fn print_summary(pipeline: &Pipeline) -> Result<()> {
    let strategies: Vec<StrategyOutcome> = pipeline.store.read_table(Table::StrategyComparison)?;

    println!("{}", "=".repeat(60));
    println!("EXECUTIVE SUMMARY");
    println!("{}", "=".repeat(60));
    println!("Should we offer free shipping above the price threshold?");
    for s in &strategies {
        let verdict = match s.recommendation {
            Recommendation::Implement => "YES",
            Recommendation::Reject    => "NO",
        };
        println!("  -> {verdict} for {} free shipping ({})", s.strategy.as_str(), s.scope);
    }
    println!();
    for s in &strategies {
        let roi = s.roi_pct.map_or_else(|| "undefined".to_string(), |r| format!("{r:.1}%"));
        println!(
            "  {:<10} ROI: {roi} | Net={:+.2} | customers affected: {}",
            s.strategy.as_str(),
            s.net_profit,
            s.customers_affected
        );
    }

    let best = strategies
        .iter()
        .filter(|s| s.recommendation == Recommendation::Implement)
        .max_by(|a, b| a.net_profit.total_cmp(&b.net_profit));
    println!();
    match best {
        Some(s) => println!(
            "Recommendation: IMPLEMENT {} free shipping ({}).",
            s.strategy.as_str(),
            s.scope
        ),
        None => println!("Recommendation: do not roll out free shipping."),
    }
    println!("{}", "=".repeat(60));
    Ok(())
}

fn flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.windows(2).find(|w| w[0] == flag).map(|w| w[1].as_str())
}

fn parse_arg<T: std::str::FromStr + Copy>(args: &[String], flag: &str, default: T) -> T {
    args.windows(2)
        .find(|w| w[0] == flag)
        .and_then(|w| w[1].parse().ok())
        .unwrap_or(default)
}
