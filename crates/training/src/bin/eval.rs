use clap::Parser;
use training::util::{load_config, EvalArgs};

fn main() -> anyhow::Result<()> {
    cli_support::init_tracing();
    let args = EvalArgs::parse();
    let mut cfg = load_config(&args.common)?;
    args.apply(&mut cfg)?;

    let Some(checkpoint) = cfg.retrieval.checkpoint.clone() else {
        anyhow::bail!("no checkpoint given; pass --checkpoint or set retrieval.checkpoint");
    };
    let Some(snapshot) = cfg
        .retrieval
        .snapshot
        .clone()
        .or_else(|| cfg.dataset.snapshot.clone())
    else {
        anyhow::bail!("no snapshot given; pass --snapshot or set retrieval.snapshot");
    };

    let report = training::run_eval(&cfg, &checkpoint, &snapshot)?;
    println!(
        "Queries: {} retrieved, {} without retrieval (threshold {})",
        report.retrieved, report.skipped, report.threshold
    );
    match report.mean_accuracy {
        Some(acc) => println!("Mean Retrieval Accuracy {acc}"),
        None => println!("Mean Retrieval Accuracy n/a (no query retrieved anything)"),
    }
    Ok(())
}
