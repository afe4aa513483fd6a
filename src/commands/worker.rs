use super::{BatchArgs, GlobalArgs};
use crate::config::Config;
use crate::database::Database;
use crate::error::{AppError, Result};
use crate::worker::digest::DigestSummarizer;
use crate::worker::transcribe::WhisperTranscriber;
use crate::worker::{BatchOptions, BatchReport, StageExecutor, StageRunner};
use std::sync::Arc;

fn batch_options(config: &Config, args: &BatchArgs) -> Result<BatchOptions> {
    let max_retries = args.max_retries.unwrap_or(config.settings.max_retries);
    if max_retries < 1 {
        return Err(AppError::InvalidInput("--max-retries must be at least 1".into()));
    }
    Ok(BatchOptions {
        max_retries,
        skip_errors: args.skip_errors,
        episode_id: args.episode_id,
    })
}

fn print_report(report: &BatchReport) {
    println!("{}", report);
    for failure in &report.failures {
        println!("  #{} {}: {}", failure.episode_id, failure.title, failure.reason);
    }
}

async fn run_stage(
    db: Arc<Database>,
    config: &Config,
    executor: &dyn StageExecutor,
    options: &BatchOptions,
) -> Result<()> {
    let runner = StageRunner::new(db).with_timeout(config.stage_timeout());
    let report = runner.run_batch(executor, options).await?;
    print_report(&report);
    Ok(())
}

pub async fn transcribe(global: &GlobalArgs, model: Option<String>, args: &BatchArgs) -> Result<()> {
    let config = global.load_config()?;
    let options = batch_options(&config, args)?;

    let mut transcribe_config = config.transcribe_config();
    if let Some(model) = model {
        transcribe_config.model = model;
    }
    log::info!("Transcribing with whisper model {}", transcribe_config.model);

    let db = global.open_db()?;
    let executor = WhisperTranscriber::new(transcribe_config);
    run_stage(db, &config, &executor, &options).await
}

pub async fn digest(
    global: &GlobalArgs,
    provider: Option<String>,
    model: Option<String>,
    args: &BatchArgs,
) -> Result<()> {
    let config = global.load_config()?;
    let options = batch_options(&config, args)?;

    let mut llm_config = config.llm_config();
    if let Some(provider) = provider {
        llm_config.provider = provider.parse()?;
    }
    if let Some(model) = model {
        llm_config.model = model;
    }
    log::info!("Summarizing with {} ({})", llm_config.provider, llm_config.model);

    let db = global.open_db()?;
    let executor = DigestSummarizer::new(db.clone(), &llm_config).map_err(AppError::Config)?;
    run_stage(db, &config, &executor, &options).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(max_retries: Option<i64>) -> BatchArgs {
        BatchArgs {
            episode_id: None,
            skip_errors: true,
            max_retries,
        }
    }

    #[test]
    fn test_batch_options_default_to_settings() {
        let mut config = Config::default();
        config.settings.max_retries = 5;

        let options = batch_options(&config, &args(None)).unwrap();
        assert_eq!(options.max_retries, 5);
        assert!(options.skip_errors);

        let options = batch_options(&config, &args(Some(2))).unwrap();
        assert_eq!(options.max_retries, 2);

        assert!(matches!(
            batch_options(&config, &args(Some(0))),
            Err(AppError::InvalidInput(_))
        ));
    }
}
