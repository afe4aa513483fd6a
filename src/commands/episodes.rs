use super::GlobalArgs;
use crate::error::{AppError, Result};
use crate::worker::download::FeedFetcher;
use crate::worker::recovery::{self, RecoveryReport, RecoveryTarget};

/// Download new episodes from every configured feed.
pub async fn fetch(global: &GlobalArgs, max_episodes: Option<usize>) -> Result<()> {
    let config = global.load_config()?;
    if config.feeds.is_empty() {
        println!("No feeds configured in {}", global.config_path.display());
        return Ok(());
    }

    let mut fetch_config = config.fetch_config();
    if let Some(max) = max_episodes {
        fetch_config.max_episodes_per_feed = max;
    }

    let db = global.open_db()?;
    let fetcher = FeedFetcher::new(db, fetch_config)?;
    let results = fetcher.fetch_all(&config.feeds).await?;

    println!("{:<30}  {:>10}  {:>8}  {:>7}", "Feed", "Downloaded", "Existing", "Failed");
    let mut total = 0;
    for result in &results {
        total += result.downloaded;
        let failed = result.download_failed + result.ingestion_failed;
        println!(
            "{:<30}  {:>10}  {:>8}  {:>7}",
            result.feed.chars().take(30).collect::<String>(),
            result.downloaded,
            result.skipped_existing,
            failed
        );
        if let Some(error) = &result.error {
            println!("  feed error: {}", error);
        }
    }
    println!("\nTotal new episodes downloaded: {}", total);
    Ok(())
}

fn print_recovery(action: &str, target: &RecoveryTarget, report: &RecoveryReport) {
    if report.affected.is_empty() {
        match target {
            RecoveryTarget::Podcast(name) => {
                println!("No error episodes found for podcast matching '{}'", name)
            }
            _ => println!("No episodes to {}", action),
        }
        return;
    }
    for episode in &report.affected {
        println!(
            "  #{} {} - {} (was {})",
            episode.id, episode.podcast_title, episode.title, episode.previous_status
        );
    }
}

fn single_target(episode_id: Option<i64>, podcast: Option<String>) -> Result<RecoveryTarget> {
    match (episode_id, podcast) {
        (Some(id), _) => Ok(RecoveryTarget::Episode(id)),
        (None, Some(name)) => Ok(RecoveryTarget::Podcast(name)),
        (None, None) => Err(AppError::InvalidInput(
            "either --episode-id or --podcast is required".into(),
        )),
    }
}

/// Force episodes to `processed`, keeping their error history.
pub fn mark_processed(
    global: &GlobalArgs,
    episode_id: Option<i64>,
    podcast: Option<String>,
    reason: Option<&str>,
) -> Result<()> {
    let target = single_target(episode_id, podcast)?;
    let db = global.open_db()?;
    let report = recovery::mark_processed(&db, &target, reason)?;

    print_recovery("mark as processed", &target, &report);
    if report.count() > 0 {
        println!("Marked {} episode(s) as processed", report.count());
        if let Some(reason) = reason {
            println!("Reason: {}", reason);
        }
    }
    Ok(())
}

/// Rewind episodes to `downloaded`.
pub fn retry(
    global: &GlobalArgs,
    episode_id: Option<i64>,
    all: bool,
    podcast: Option<String>,
    reset_errors: bool,
) -> Result<()> {
    let target = if all {
        RecoveryTarget::All
    } else {
        single_target(episode_id, podcast)?
    };
    let db = global.open_db()?;
    let report = recovery::retry(&db, &target, reset_errors)?;

    print_recovery("retry", &target, &report);
    if report.count() > 0 {
        println!(
            "Reset {} episode(s) to downloaded{}",
            report.count(),
            if reset_errors { " and cleared their errors" } else { "" }
        );
    }
    Ok(())
}
