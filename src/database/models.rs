use crate::error::AppError;
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Processing status of an episode. Exactly one value at any time.
///
/// `Failed` is reserved for ingestion-level catastrophic failures; ordinary
/// stage failures leave the status untouched and bump the error fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EpisodeStatus {
    Downloaded,
    Transcribed,
    Processed,
    Failed,
}

impl EpisodeStatus {
    pub const ALL: [EpisodeStatus; 4] = [
        Self::Downloaded,
        Self::Transcribed,
        Self::Processed,
        Self::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Downloaded => "downloaded",
            Self::Transcribed => "transcribed",
            Self::Processed => "processed",
            Self::Failed => "failed",
        }
    }

    /// Position along `downloaded -> transcribed -> processed`.
    /// `Failed` sits outside the pipeline order.
    pub fn pipeline_rank(&self) -> Option<u8> {
        match self {
            Self::Downloaded => Some(0),
            Self::Transcribed => Some(1),
            Self::Processed => Some(2),
            Self::Failed => None,
        }
    }

    /// True when `next` is the very next step along the pipeline. Skipping
    /// a stage is never a valid advance.
    pub fn can_advance_to(&self, next: EpisodeStatus) -> bool {
        match (self.pipeline_rank(), next.pipeline_rank()) {
            (Some(from), Some(to)) => to == from + 1,
            _ => false,
        }
    }
}

impl std::fmt::Display for EpisodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EpisodeStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "downloaded" => Ok(Self::Downloaded),
            "transcribed" => Ok(Self::Transcribed),
            "processed" => Ok(Self::Processed),
            "failed" => Ok(Self::Failed),
            other => Err(AppError::InvalidStatus(other.to_string())),
        }
    }
}

impl ToSql for EpisodeStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for EpisodeStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let s = value.as_str()?;
        s.parse()
            .map_err(|e: AppError| FromSqlError::Other(Box::new(e)))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Podcast {
    pub id: i64,
    pub title: String,
    pub rss_url: String,
    pub category: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Episode {
    pub id: i64,
    pub podcast_id: i64,
    pub podcast_title: String,
    pub title: String,
    pub published_date: Option<DateTime<Utc>>,
    pub url: String,
    pub file_path: Option<String>,
    pub duration_seconds: Option<i64>,
    pub status: EpisodeStatus,
    pub error_count: i64,
    pub last_error: Option<String>,
    pub error_timestamp: Option<DateTime<Utc>>,
    /// Informational note left by a manual override; never an error message.
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Episode {
    pub fn has_errors(&self) -> bool {
        self.error_count > 0
    }
}

/// Fields supplied by ingestion when an episode is first recorded.
#[derive(Debug, Clone, Default)]
pub struct NewEpisode {
    pub podcast_id: i64,
    pub title: String,
    pub url: String,
    pub published_date: Option<DateTime<Utc>>,
    pub file_path: Option<String>,
    pub duration_seconds: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptSegment {
    pub speaker: Option<String>,
    pub text: String,
    pub start_time: f64,
    pub end_time: Option<f64>,
    pub confidence: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    pub segments: Vec<TranscriptSegment>,
    pub language: Option<String>,
    pub provider: String,
}

impl Transcript {
    pub fn full_text(&self) -> String {
        self.segments
            .iter()
            .map(|s| s.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Structured summary produced by the digest stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SummaryContent {
    #[serde(default)]
    pub key_topics: Vec<String>,
    #[serde(default)]
    pub themes: Vec<String>,
    #[serde(default)]
    pub quotes: Vec<String>,
    #[serde(default)]
    pub startups: Vec<String>,
    #[serde(default)]
    pub summary: String,
}

/// Output a stage attaches to an episode on success. Opaque to the
/// lifecycle controller; only the store knows where each kind lives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Artifact {
    Transcript(Transcript),
    Summary(SummaryContent),
}

impl Artifact {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Transcript(_) => "transcript",
            Self::Summary(_) => "summary",
        }
    }
}

/// A summary joined with its episode and podcast, as consumed by export
/// and the blog writer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DigestEntry {
    pub id: i64,
    pub episode_id: i64,
    pub episode_title: String,
    pub podcast_title: String,
    pub digest_date: NaiveDate,
    #[serde(flatten)]
    pub content: SummaryContent,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatusCount {
    pub status: EpisodeStatus,
    pub count: i64,
}
