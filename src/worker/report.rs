use crate::database::{Database, EpisodeStatus, StatusCount};
use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

const PODCAST_WIDTH: usize = 30;
const TITLE_WIDTH: usize = 40;
const ERROR_WIDTH: usize = 50;

/// Cut `s` to at most `max` characters, marking the cut with "...".
pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let keep = max.saturating_sub(3);
    let mut out: String = s.chars().take(keep).collect();
    out.push_str("...");
    out
}

fn clip(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub counts: Vec<StatusCount>,
    pub total: i64,
    pub errored: usize,
}

impl StatusReport {
    pub fn generate(db: &Database) -> Result<Self> {
        let counts = db.status_counts()?;
        let total = counts.iter().map(|c| c.count).sum();
        let errored = db.list_errored()?.len();
        Ok(Self {
            counts,
            total,
            errored,
        })
    }

    pub fn count(&self, status: EpisodeStatus) -> i64 {
        self.counts
            .iter()
            .find(|c| c.status == status)
            .map(|c| c.count)
            .unwrap_or(0)
    }
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Episode Processing Status")?;
        writeln!(f, "{:<12} {:>6}", "Status", "Count")?;
        for c in &self.counts {
            writeln!(f, "{:<12} {:>6}", c.status.as_str(), c.count)?;
        }
        write!(f, "{:<12} {:>6}", "total", self.total)?;
        if self.errored > 0 {
            write!(
                f,
                "\n\n{} episodes have errors. Use 'p3 errors' to see details.",
                self.errored
            )?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorRow {
    pub id: i64,
    pub podcast_title: String,
    pub title: String,
    pub status: EpisodeStatus,
    pub error_count: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_timestamp: Option<DateTime<Utc>>,
}

/// Errored episodes, most recent failure first. `verbose` adds the last
/// error and its timestamp.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorReport {
    pub verbose: bool,
    pub episodes: Vec<ErrorRow>,
}

impl ErrorReport {
    pub fn generate(db: &Database, verbose: bool) -> Result<Self> {
        let episodes = db
            .list_errored()?
            .into_iter()
            .map(|e| ErrorRow {
                id: e.id,
                podcast_title: e.podcast_title,
                title: e.title,
                status: e.status,
                error_count: e.error_count,
                last_error: if verbose { e.last_error } else { None },
                error_timestamp: if verbose { e.error_timestamp } else { None },
            })
            .collect();
        Ok(Self { verbose, episodes })
    }

    pub fn is_empty(&self) -> bool {
        self.episodes.is_empty()
    }
}

impl fmt::Display for ErrorReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.episodes.is_empty() {
            return write!(f, "No episodes with errors found");
        }

        writeln!(f, "Episodes with Errors ({} total)", self.episodes.len())?;
        write!(
            f,
            "{:>6}  {:<30}  {:<40}  {:<11}  {:>6}",
            "ID", "Podcast", "Episode", "Status", "Errors"
        )?;
        if self.verbose {
            write!(f, "  {:<50}  {:<19}", "Last Error", "Timestamp")?;
        }

        for row in &self.episodes {
            write!(
                f,
                "\n{:>6}  {:<30}  {:<40}  {:<11}  {:>6}",
                row.id,
                clip(&row.podcast_title, PODCAST_WIDTH),
                clip(&row.title, TITLE_WIDTH),
                row.status.as_str(),
                row.error_count
            )?;
            if self.verbose {
                let message = row.last_error.as_deref().unwrap_or("N/A");
                let timestamp = row
                    .error_timestamp
                    .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                    .unwrap_or_else(|| "N/A".to_string());
                write!(
                    f,
                    "  {:<50}  {:<19}",
                    truncate(message, ERROR_WIDTH),
                    timestamp
                )?;
            }
        }

        if !self.verbose {
            write!(f, "\n\nUse --show-all to see error details")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_marks_cut() {
        assert_eq!(truncate("short", 50), "short");
        let long = "x".repeat(60);
        let cut = truncate(&long, 50);
        assert_eq!(cut.chars().count(), 50);
        assert!(cut.ends_with("..."));
    }

    #[test]
    fn test_truncate_is_char_safe() {
        let s = "é".repeat(10);
        assert_eq!(truncate(&s, 5), "éé...");
    }
}
