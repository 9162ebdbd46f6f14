use clap::Parser;
use training::util::{load_config, TrainArgs};

fn main() -> anyhow::Result<()> {
    cli_support::init_tracing();
    let args = TrainArgs::parse();
    let mut cfg = load_config(&args.common)?;
    args.apply(&mut cfg);

    let report = training::run_train(&cfg)?;
    match &report.best_checkpoint {
        Some(path) => println!("Best checkpoint: {}", path.display()),
        None => println!("No checkpoint saved in {}", report.run_dir.display()),
    }
    println!("Dataset snapshot: {}", report.snapshot.display());
    Ok(())
}
