use std::process::ExitCode;

use kt_core::config::Config;
use kt_core::logging::init_tracing;
use kt_core::replay::{self, Dataset};
use kt_core::{CoreConfig, CoreError};

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    let config = Config::from_env();
    let _log_guard = init_tracing(&config);

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %err, retryable = err.is_retryable(), "replay failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: Config) -> Result<(), CoreError> {
    let path = config
        .dataset_path
        .ok_or_else(|| CoreError::Config("usage: kt-replay <dataset.json> (or set KT_DATASET)".into()))?;
    let core = CoreConfig::load()?;
    let dataset = Dataset::load(&path).await?;
    tracing::info!(path = %path.display(), attempts = dataset.attempts.len(), "dataset loaded");

    let output = replay::run(core, dataset).await?;
    let json = serde_json::to_string_pretty(&output)
        .map_err(|e| CoreError::Config(format!("serialize report: {e}")))?;
    println!("{json}");
    Ok(())
}
