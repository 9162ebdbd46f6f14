use clap::Parser;
use training::util::{load_config, PipelineArgs};

fn main() -> anyhow::Result<()> {
    cli_support::init_tracing();
    let args = PipelineArgs::parse();
    let cfg = load_config(&args.common)?;

    let (training, retrieval) = training::run_pipeline(&cfg)?;
    if let Some(path) = &training.best_checkpoint {
        println!("Best checkpoint: {}", path.display());
    }
    match retrieval.mean_accuracy {
        Some(acc) => println!("Mean Retrieval Accuracy {acc}"),
        None => println!("Mean Retrieval Accuracy n/a (no query retrieved anything)"),
    }
    Ok(())
}
