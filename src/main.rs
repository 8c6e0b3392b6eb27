use clap::Parser;
use cnn_classifier::config::{CONFIG_FILE_PATH, PARAMS_FILE_PATH};
use cnn_classifier::{ConfigurationManager, ModelAssembler, Network, Result};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const STAGE_NAME: &str = "Prepare base model";

/// Fetch the pretrained backbone and build the classifier to fine-tune.
#[derive(Parser, Debug)]
#[command(name = "prepare_base_model", version, about)]
struct Args {
    /// Artifact locations
    #[arg(long, default_value = CONFIG_FILE_PATH)]
    config: PathBuf,

    /// Model hyper-parameters
    #[arg(long, default_value = PARAMS_FILE_PATH)]
    params: PathBuf,
}

fn run(args: &Args) -> Result<()> {
    let manager = ConfigurationManager::new(&args.config, &args.params)?;
    let assembler = ModelAssembler::new(manager.prepare_base_model_config()?);
    let model = assembler.run()?;
    info!(
        "{} maps {:?} to {:?}",
        model.name(),
        model.input_shape(),
        model.output_shape()
    );
    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    info!(">>>>>> stage {} started <<<<<<", STAGE_NAME);
    match run(&args) {
        Ok(()) => {
            info!(">>>>>> stage {} completed <<<<<<", STAGE_NAME);
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("stage {} failed: {}", STAGE_NAME, e);
            ExitCode::FAILURE
        }
    }
}
