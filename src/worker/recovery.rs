use crate::database::{Database, Episode, EpisodeStatus};
use crate::error::{AppError, Result};
use serde::Serialize;

/// Which episodes an operator correction applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryTarget {
    Episode(i64),
    /// Case-insensitive substring match on the podcast title, resolved
    /// against episodes that currently show errors.
    Podcast(String),
    /// Every errored episode plus anything sitting in `failed`.
    All,
}

impl std::fmt::Display for RecoveryTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Episode(id) => write!(f, "episode {}", id),
            Self::Podcast(name) => write!(f, "podcast \"{}\"", name),
            Self::All => f.write_str("all errored or failed episodes"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AffectedEpisode {
    pub id: i64,
    pub podcast_title: String,
    pub title: String,
    pub previous_status: EpisodeStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecoveryReport {
    pub affected: Vec<AffectedEpisode>,
}

impl RecoveryReport {
    pub fn count(&self) -> usize {
        self.affected.len()
    }
}

fn resolve(db: &Database, target: &RecoveryTarget, include_failed: bool) -> Result<Vec<Episode>> {
    match target {
        RecoveryTarget::Episode(id) => {
            let episode = db
                .get_episode(*id)?
                .ok_or_else(|| AppError::NotFound(format!("episode {}", id)))?;
            Ok(vec![episode])
        }
        RecoveryTarget::Podcast(name) => {
            let needle = name.trim().to_lowercase();
            if needle.is_empty() {
                return Err(AppError::InvalidInput("podcast name must not be empty".into()));
            }
            let mut episodes: Vec<Episode> = db
                .list_errored()?
                .into_iter()
                .filter(|e| e.podcast_title.to_lowercase().contains(&needle))
                .collect();
            if include_failed {
                for failed in db.list_by_status(EpisodeStatus::Failed)? {
                    if failed.podcast_title.to_lowercase().contains(&needle)
                        && !episodes.iter().any(|e| e.id == failed.id)
                    {
                        episodes.push(failed);
                    }
                }
            }
            Ok(episodes)
        }
        RecoveryTarget::All => {
            let mut episodes = db.list_errored()?;
            if include_failed {
                for failed in db.list_by_status(EpisodeStatus::Failed)? {
                    if !episodes.iter().any(|e| e.id == failed.id) {
                        episodes.push(failed);
                    }
                }
            }
            Ok(episodes)
        }
    }
}

fn affected(episode: &Episode) -> AffectedEpisode {
    AffectedEpisode {
        id: episode.id,
        podcast_title: episode.podcast_title.clone(),
        title: episode.title.clone(),
        previous_status: episode.status,
    }
}

/// Force the targeted episodes to `processed`. Error fields are left as they
/// are; `reason` is kept as a note.
pub fn mark_processed(
    db: &Database,
    target: &RecoveryTarget,
    reason: Option<&str>,
) -> Result<RecoveryReport> {
    let episodes = resolve(db, target, false)?;
    let mut report = RecoveryReport {
        affected: Vec::with_capacity(episodes.len()),
    };

    for episode in &episodes {
        db.mark_processed(episode.id, reason)?;
        log::info!(
            "Marked episode {} ({}) as processed (was {})",
            episode.id,
            episode.title,
            episode.status
        );
        report.affected.push(affected(episode));
    }

    if report.affected.is_empty() {
        log::info!("mark-processed: nothing matched {}", target);
    }
    Ok(report)
}

/// Rewind the targeted episodes to `downloaded`, optionally clearing their
/// error fields so they re-enter automatic batches.
pub fn retry(db: &Database, target: &RecoveryTarget, reset_errors: bool) -> Result<RecoveryReport> {
    let episodes = resolve(db, target, true)?;
    let mut report = RecoveryReport {
        affected: Vec::with_capacity(episodes.len()),
    };

    for episode in &episodes {
        db.retry_episode(episode.id, reset_errors)?;
        log::info!(
            "Episode {} ({}) reset to downloaded{}",
            episode.id,
            episode.title,
            if reset_errors { ", errors cleared" } else { "" }
        );
        report.affected.push(affected(episode));
    }

    if report.affected.is_empty() {
        log::info!("retry: nothing matched {}", target);
    }
    Ok(report)
}
