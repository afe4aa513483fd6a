pub mod digest;
pub mod download;
pub mod recovery;
pub mod report;
pub mod transcribe;


use crate::database::{Artifact, Database, Episode, EpisodeStatus};
use crate::error::{AppError, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::Instrument;

pub const DEFAULT_MAX_RETRIES: i64 = 3;
pub const DEFAULT_STAGE_TIMEOUT: Duration = Duration::from_secs(3600);

/// A per-episode pipeline phase driven by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Transcribe,
    Digest,
}

impl Stage {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Transcribe => "transcribe",
            Self::Digest => "digest",
        }
    }

    /// Status an episode must be in to be picked up by this stage.
    pub fn precondition(&self) -> EpisodeStatus {
        match self {
            Self::Transcribe => EpisodeStatus::Downloaded,
            Self::Digest => EpisodeStatus::Transcribed,
        }
    }

    pub fn next_status(&self) -> EpisodeStatus {
        match self {
            Self::Transcribe => EpisodeStatus::Transcribed,
            Self::Digest => EpisodeStatus::Processed,
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Work performed for one stage on one episode.
///
/// Implementations receive their static configuration at construction and
/// must not write to the store: the controller records every outcome. A
/// failure is a human-readable reason that ends up in `last_error`.
#[async_trait]
pub trait StageExecutor: Send + Sync {
    fn stage(&self) -> Stage;

    async fn attempt(&self, episode: &Episode) -> std::result::Result<Artifact, String>;
}

/// Selection policy for one stage run.
#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub max_retries: i64,
    /// Only touch episodes with no recorded errors at all.
    pub skip_errors: bool,
    /// Restrict the run to a single episode.
    pub episode_id: Option<i64>,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            skip_errors: false,
            episode_id: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Eligibility {
    Eligible,
    WrongStatus(EpisodeStatus),
    RetryCeiling(i64),
    HasErrors(i64),
}

impl Eligibility {
    pub fn is_eligible(&self) -> bool {
        matches!(self, Self::Eligible)
    }

    fn reason(&self, stage: Stage) -> String {
        match self {
            Self::Eligible => "eligible".to_string(),
            Self::WrongStatus(status) => format!(
                "status is {} (stage {} needs {})",
                status,
                stage,
                stage.precondition()
            ),
            Self::RetryCeiling(count) => format!("retry ceiling reached ({} errors)", count),
            Self::HasErrors(count) => format!("has {} recorded errors and skip_errors is set", count),
        }
    }
}

pub fn check_eligibility(episode: &Episode, stage: Stage, options: &BatchOptions) -> Eligibility {
    if episode.status != stage.precondition() {
        return Eligibility::WrongStatus(episode.status);
    }
    if episode.error_count >= options.max_retries {
        return Eligibility::RetryCeiling(episode.error_count);
    }
    if options.skip_errors && episode.error_count > 0 {
        return Eligibility::HasErrors(episode.error_count);
    }
    Eligibility::Eligible
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EpisodeOutcome {
    Succeeded,
    Failed(String),
    Skipped(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct EpisodeFailure {
    pub episode_id: i64,
    pub title: String,
    pub reason: String,
}

/// Aggregate result of a stage run. Individual failures live here, never in
/// the `Err` side of the controller's return value.
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub stage: Stage,
    pub selected: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub failures: Vec<EpisodeFailure>,
}

impl BatchReport {
    fn new(stage: Stage) -> Self {
        Self {
            stage,
            selected: 0,
            succeeded: 0,
            failed: 0,
            skipped: 0,
            failures: Vec::new(),
        }
    }

    fn record(&mut self, episode: &Episode, outcome: &EpisodeOutcome) {
        match outcome {
            EpisodeOutcome::Succeeded => self.succeeded += 1,
            EpisodeOutcome::Failed(reason) => {
                self.failed += 1;
                self.failures.push(EpisodeFailure {
                    episode_id: episode.id,
                    title: episode.title.clone(),
                    reason: reason.clone(),
                });
            }
            EpisodeOutcome::Skipped(_) => self.skipped += 1,
        }
    }
}

impl std::fmt::Display for BatchReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: {} selected, {} succeeded, {} failed",
            self.stage, self.selected, self.succeeded, self.failed
        )?;
        if self.skipped > 0 {
            write!(f, ", {} skipped", self.skipped)?;
        }
        Ok(())
    }
}

/// Lifecycle controller: selects eligible episodes for a stage, runs the
/// executor on each and records the outcome back into the store.
pub struct StageRunner {
    db: Arc<Database>,
    stage_timeout: Duration,
}

impl StageRunner {
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            db,
            stage_timeout: DEFAULT_STAGE_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.stage_timeout = timeout;
        self
    }

    /// Episodes a batch for `stage` would pick up right now, in store order.
    pub fn eligible_batch(&self, stage: Stage, options: &BatchOptions) -> Result<Vec<Episode>> {
        let candidates = self.db.list_by_status(stage.precondition())?;
        Ok(candidates
            .into_iter()
            .filter(|e| check_eligibility(e, stage, options).is_eligible())
            .collect())
    }

    /// Run one stage over the eligible batch (or the single targeted
    /// episode). Only store faults are returned as errors.
    pub async fn run_batch(
        &self,
        executor: &dyn StageExecutor,
        options: &BatchOptions,
    ) -> Result<BatchReport> {
        let stage = executor.stage();
        let span = tracing::info_span!("stage_batch", stage = stage.name());

        async move {
            let mut report = BatchReport::new(stage);

            let batch = match options.episode_id {
                Some(id) => {
                    let episode = self
                        .db
                        .get_episode(id)?
                        .ok_or_else(|| AppError::NotFound(format!("episode {}", id)))?;
                    vec![episode]
                }
                None => self.eligible_batch(stage, options)?,
            };

            report.selected = batch.len();
            log::info!("{} stage: {} episodes selected", stage, batch.len());

            for episode in &batch {
                let outcome = self.run_episode(executor, episode.id, options).await?;
                match &outcome {
                    EpisodeOutcome::Succeeded => {
                        log::info!("{} succeeded for episode {} ({})", stage, episode.id, episode.title)
                    }
                    EpisodeOutcome::Failed(reason) => {
                        log::warn!("{} failed for episode {}: {}", stage, episode.id, reason)
                    }
                    EpisodeOutcome::Skipped(reason) => {
                        log::info!("Skipping episode {} for {}: {}", episode.id, stage, reason)
                    }
                }
                report.record(episode, &outcome);
            }

            log::info!("{}", report);
            Ok(report)
        }
        .instrument(span)
        .await
    }

    /// Process one episode: re-check eligibility against fresh state, invoke
    /// the executor and record the result.
    pub async fn run_episode(
        &self,
        executor: &dyn StageExecutor,
        episode_id: i64,
        options: &BatchOptions,
    ) -> Result<EpisodeOutcome> {
        let stage = executor.stage();
        let span = tracing::info_span!("stage_attempt", stage = stage.name(), episode_id);

        async move {
            let Some(episode) = self.db.get_episode(episode_id)? else {
                return Ok(EpisodeOutcome::Skipped("episode no longer exists".to_string()));
            };

            let eligibility = check_eligibility(&episode, stage, options);
            if !eligibility.is_eligible() {
                return Ok(EpisodeOutcome::Skipped(eligibility.reason(stage)));
            }

            let attempt = tokio::time::timeout(self.stage_timeout, executor.attempt(&episode)).await;
            let result = match attempt {
                Ok(result) => result,
                Err(_) => Err(format!(
                    "{} timed out after {}s",
                    stage,
                    self.stage_timeout.as_secs()
                )),
            };

            match result {
                Ok(artifact) => {
                    match self.db.record_success(episode.id, stage.next_status(), &artifact) {
                        Ok(()) => Ok(EpisodeOutcome::Succeeded),
                        Err(AppError::InvalidTransition { from, .. }) => {
                            Ok(EpisodeOutcome::Skipped(format!(
                                "status changed to {} during the attempt",
                                from
                            )))
                        }
                        Err(e) => Err(e),
                    }
                }
                Err(reason) => {
                    self.db.record_failure(episode.id, &reason)?;
                    Ok(EpisodeOutcome::Failed(reason))
                }
            }
        }
        .instrument(span)
        .await
    }
}
