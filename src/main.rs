//! modelflow - Main Entry Point

use clap::Parser;
use modelflow::cli::{cmd_compare, cmd_evaluate, cmd_info, cmd_run, cmd_split, cmd_tune, Cli, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "modelflow=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let json = cli.json;

    match cli.command {
        Commands::Info { data } => {
            cmd_info(&data, json).await?;
        }
        Commands::Split { data } => {
            cmd_split(&data, json).await?;
        }
        Commands::Evaluate { data, model } => {
            cmd_evaluate(&data, &model, json).await?;
        }
        Commands::Tune { data, model, tune, folds, repeats, levels, random, metric, top } => {
            cmd_tune(&data, &model, &tune, folds, repeats, levels, random, metric, top, json).await?;
        }
        Commands::Compare { data, folds, metric } => {
            cmd_compare(&data, folds, metric, json).await?;
        }
        Commands::Run { data } => {
            cmd_run(&data, json).await?;
        }
    }

    Ok(())
}
