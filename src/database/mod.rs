pub mod models;


use crate::error::{AppError, Result};
use chrono::{Local, NaiveDate, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

pub use models::*;

const EPISODE_COLUMNS: &str = "
    SELECT e.id, e.podcast_id, p.title, e.title, e.published_date, e.url, e.file_path,
           e.duration_seconds, e.status, e.error_count, e.last_error, e.error_timestamp,
           e.note, e.created_at
    FROM episodes e
    JOIN podcasts p ON e.podcast_id = p.id";

/// Episode store: the single source of truth for pipeline state.
///
/// Every mutating call runs as one statement or one transaction while the
/// connection mutex is held, so readers never observe a half-written error
/// triple or a status change without its artifact.
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    pub fn new(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(db_path)?;

        // Enable WAL mode for concurrent reads
        conn.execute_batch(
            "
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=NORMAL;
            PRAGMA foreign_keys=ON;
            PRAGMA temp_store=MEMORY;
        ",
        )?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.init_schema()?;

        Ok(db)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| AppError::Database("store connection mutex poisoned".to_string()))
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS podcasts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                title TEXT NOT NULL,
                rss_url TEXT NOT NULL UNIQUE,
                category TEXT,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS episodes (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                podcast_id INTEGER NOT NULL REFERENCES podcasts(id),
                title TEXT NOT NULL,
                published_date TEXT,
                url TEXT NOT NULL UNIQUE,
                file_path TEXT,
                duration_seconds INTEGER,
                status TEXT NOT NULL DEFAULT 'downloaded'
                    CHECK (status IN ('downloaded', 'transcribed', 'processed', 'failed')),
                error_count INTEGER NOT NULL DEFAULT 0 CHECK (error_count >= 0),
                last_error TEXT,
                error_timestamp TEXT,
                note TEXT,
                created_at TEXT NOT NULL,
                CHECK (
                    (error_count = 0 AND last_error IS NULL AND error_timestamp IS NULL)
                    OR (error_count > 0 AND last_error IS NOT NULL AND error_timestamp IS NOT NULL)
                )
            );

            CREATE INDEX IF NOT EXISTS idx_episodes_status ON episodes(status);
            CREATE INDEX IF NOT EXISTS idx_episodes_podcast ON episodes(podcast_id);

            CREATE TABLE IF NOT EXISTS transcripts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                episode_id INTEGER NOT NULL UNIQUE,
                language TEXT,
                provider TEXT NOT NULL,
                created_at TEXT NOT NULL,
                FOREIGN KEY (episode_id) REFERENCES episodes(id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS transcript_segments (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                episode_id INTEGER NOT NULL,
                segment_idx INTEGER NOT NULL,
                speaker TEXT,
                timestamp_start REAL NOT NULL,
                timestamp_end REAL,
                text TEXT NOT NULL,
                confidence REAL,
                FOREIGN KEY (episode_id) REFERENCES episodes(id) ON DELETE CASCADE,
                UNIQUE(episode_id, segment_idx)
            );

            CREATE INDEX IF NOT EXISTS idx_segments_episode ON transcript_segments(episode_id);

            CREATE TABLE IF NOT EXISTS summaries (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                episode_id INTEGER NOT NULL UNIQUE,
                key_topics TEXT NOT NULL,
                themes TEXT NOT NULL,
                quotes TEXT NOT NULL,
                startups TEXT NOT NULL,
                full_summary TEXT NOT NULL,
                digest_date TEXT NOT NULL,
                created_at TEXT NOT NULL,
                FOREIGN KEY (episode_id) REFERENCES episodes(id) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_summaries_date ON summaries(digest_date);
        "#,
        )?;

        // Migrations for stores created before error tracking existed (idempotent)
        let _ = conn.execute(
            "ALTER TABLE episodes ADD COLUMN error_count INTEGER NOT NULL DEFAULT 0",
            [],
        ); // Ignore error if column already exists
        let _ = conn.execute("ALTER TABLE episodes ADD COLUMN last_error TEXT", []);
        let _ = conn.execute("ALTER TABLE episodes ADD COLUMN error_timestamp TEXT", []);
        let _ = conn.execute("ALTER TABLE episodes ADD COLUMN note TEXT", []);

        let normalized = conn.execute(
            "UPDATE episodes SET status = 'downloaded'
             WHERE status IS NULL
                OR status NOT IN ('downloaded', 'transcribed', 'processed', 'failed')",
            [],
        )?;
        if normalized > 0 {
            log::warn!("Normalized {} episodes with unknown status to 'downloaded'", normalized);
        }

        conn.execute(
            "UPDATE episodes SET last_error = NULL, error_timestamp = NULL
             WHERE error_count = 0 AND (last_error IS NOT NULL OR error_timestamp IS NOT NULL)",
            [],
        )?;
        conn.execute(
            "UPDATE episodes SET last_error = COALESCE(last_error, 'unknown error'),
                                 error_timestamp = COALESCE(error_timestamp, ?)
             WHERE error_count > 0 AND (last_error IS NULL OR error_timestamp IS NULL)",
            params![Utc::now()],
        )?;

        Ok(())
    }

    // =========================================================================
    // Podcasts
    // =========================================================================

    /// Return the podcast id for `rss_url`, inserting the podcast if needed.
    pub fn ensure_podcast(&self, title: &str, rss_url: &str, category: Option<&str>) -> Result<i64> {
        let conn = self.conn()?;
        let existing: Option<i64> = conn
            .query_row(
                "SELECT id FROM podcasts WHERE rss_url = ?",
                params![rss_url],
                |row| row.get(0),
            )
            .optional()?;

        if let Some(id) = existing {
            return Ok(id);
        }

        conn.execute(
            "INSERT INTO podcasts (title, rss_url, category, created_at) VALUES (?, ?, ?, ?)",
            params![title, rss_url, category, Utc::now()],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn get_podcast_by_url(&self, rss_url: &str) -> Result<Option<Podcast>> {
        let conn = self.conn()?;
        let podcast = conn
            .query_row(
                "SELECT id, title, rss_url, category, created_at FROM podcasts WHERE rss_url = ?",
                params![rss_url],
                |row| {
                    Ok(Podcast {
                        id: row.get(0)?,
                        title: row.get(1)?,
                        rss_url: row.get(2)?,
                        category: row.get(3)?,
                        created_at: row.get(4)?,
                    })
                },
            )
            .optional()?;
        Ok(podcast)
    }

    // =========================================================================
    // Episode queries
    // =========================================================================

    /// Insert a freshly ingested episode in `downloaded` state with clean
    /// error fields. The source URL is the episode identity.
    pub fn create_episode(&self, new: &NewEpisode) -> Result<i64> {
        let conn = self.conn()?;

        let existing: Option<i64> = conn
            .query_row(
                "SELECT id FROM episodes WHERE url = ?",
                params![new.url],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(id) = existing {
            return Err(AppError::DuplicateEpisode(format!(
                "{} is already recorded as episode {}",
                new.url, id
            )));
        }

        conn.execute(
            "INSERT INTO episodes (podcast_id, title, published_date, url, file_path,
                                   duration_seconds, status, error_count, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, 0, ?)",
            params![
                new.podcast_id,
                new.title,
                new.published_date,
                new.url,
                new.file_path,
                new.duration_seconds,
                EpisodeStatus::Downloaded,
                Utc::now(),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn episode_exists(&self, url: &str) -> Result<bool> {
        let conn = self.conn()?;
        let found: Option<i64> = conn
            .query_row("SELECT 1 FROM episodes WHERE url = ?", params![url], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(found.is_some())
    }

    pub fn get_episode(&self, id: i64) -> Result<Option<Episode>> {
        let conn = self.conn()?;
        let sql = format!("{} WHERE e.id = ?", EPISODE_COLUMNS);
        let episode = conn
            .query_row(&sql, params![id], episode_from_row)
            .optional()?;
        Ok(episode)
    }

    /// Episodes currently in `status`, in insertion order.
    pub fn list_by_status(&self, status: EpisodeStatus) -> Result<Vec<Episode>> {
        let conn = self.conn()?;
        let sql = format!("{} WHERE e.status = ? ORDER BY e.id ASC", EPISODE_COLUMNS);
        let mut stmt = conn.prepare(&sql)?;
        let episodes = stmt
            .query_map(params![status], episode_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(episodes)
    }

    /// Every episode with `error_count > 0`, whatever its status.
    /// Most recent failure first.
    pub fn list_errored(&self) -> Result<Vec<Episode>> {
        let conn = self.conn()?;
        let sql = format!(
            "{} WHERE e.error_count > 0 ORDER BY e.error_timestamp DESC, e.id ASC",
            EPISODE_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let episodes = stmt
            .query_map([], episode_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(episodes)
    }

    pub fn list_all(&self) -> Result<Vec<Episode>> {
        let conn = self.conn()?;
        let sql = format!("{} ORDER BY e.id ASC", EPISODE_COLUMNS);
        let mut stmt = conn.prepare(&sql)?;
        let episodes = stmt
            .query_map([], episode_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(episodes)
    }

    // =========================================================================
    // Stage outcomes
    // =========================================================================

    /// Advance `id` to `new_status` and attach `artifact` in one transaction.
    /// Error fields are left alone. Only forward moves along the pipeline are
    /// accepted.
    pub fn record_success(&self, id: i64, new_status: EpisodeStatus, artifact: &Artifact) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let current: Option<EpisodeStatus> = tx
            .query_row(
                "SELECT status FROM episodes WHERE id = ?",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        let current = current.ok_or_else(|| AppError::NotFound(format!("episode {}", id)))?;

        if !current.can_advance_to(new_status) {
            return Err(AppError::InvalidTransition {
                episode_id: id,
                from: current.to_string(),
                to: new_status.to_string(),
            });
        }

        match artifact {
            Artifact::Transcript(transcript) => write_transcript(&tx, id, transcript)?,
            Artifact::Summary(summary) => {
                write_summary(&tx, id, summary, Local::now().date_naive())?
            }
        }

        tx.execute(
            "UPDATE episodes SET status = ? WHERE id = ?",
            params![new_status, id],
        )?;
        tx.commit()?;

        Ok(())
    }

    /// Count one failed attempt. Status is not touched, so the episode stays
    /// eligible for another attempt while under the retry ceiling.
    pub fn record_failure(&self, id: i64, message: &str) -> Result<()> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE episodes
             SET error_count = error_count + 1,
                 last_error = ?,
                 error_timestamp = ?
             WHERE id = ?",
            params![message, Utc::now(), id],
        )?;
        if updated == 0 {
            return Err(AppError::NotFound(format!("episode {}", id)));
        }
        Ok(())
    }

    // =========================================================================
    // Recovery primitives
    // =========================================================================

    pub fn reset_errors(&self, id: i64) -> Result<()> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE episodes
             SET error_count = 0, last_error = NULL, error_timestamp = NULL
             WHERE id = ?",
            params![id],
        )?;
        if updated == 0 {
            return Err(AppError::NotFound(format!("episode {}", id)));
        }
        Ok(())
    }

    /// Direct status override for recovery flows.
    pub fn set_status(&self, id: i64, status: EpisodeStatus) -> Result<()> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE episodes SET status = ? WHERE id = ?",
            params![status, id],
        )?;
        if updated == 0 {
            return Err(AppError::NotFound(format!("episode {}", id)));
        }
        Ok(())
    }

    /// Force an episode to `processed`, keeping error fields as they are and
    /// storing `note` as an informational remark.
    pub fn mark_processed(&self, id: i64, note: Option<&str>) -> Result<()> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE episodes SET status = ?, note = COALESCE(?, note) WHERE id = ?",
            params![EpisodeStatus::Processed, note, id],
        )?;
        if updated == 0 {
            return Err(AppError::NotFound(format!("episode {}", id)));
        }
        Ok(())
    }

    /// Rewind to the start of the pipeline, optionally clearing the error
    /// triple in the same statement.
    pub fn retry_episode(&self, id: i64, reset_errors: bool) -> Result<()> {
        let conn = self.conn()?;
        let sql = if reset_errors {
            "UPDATE episodes
             SET status = ?, error_count = 0, last_error = NULL, error_timestamp = NULL
             WHERE id = ?"
        } else {
            "UPDATE episodes SET status = ? WHERE id = ?"
        };
        let updated = conn.execute(sql, params![EpisodeStatus::Downloaded, id])?;
        if updated == 0 {
            return Err(AppError::NotFound(format!("episode {}", id)));
        }
        Ok(())
    }

    /// Ingestion-time catastrophic failure: the only path that sets `failed`.
    pub fn mark_ingestion_failed(&self, id: i64, message: &str) -> Result<()> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE episodes
             SET status = ?,
                 error_count = error_count + 1,
                 last_error = ?,
                 error_timestamp = ?
             WHERE id = ?",
            params![EpisodeStatus::Failed, message, Utc::now(), id],
        )?;
        if updated == 0 {
            return Err(AppError::NotFound(format!("episode {}", id)));
        }
        Ok(())
    }

    // =========================================================================
    // Read-side aggregates and artifacts
    // =========================================================================

    /// Count per status, zero-filled for every status value.
    pub fn status_counts(&self) -> Result<Vec<StatusCount>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM episodes GROUP BY status")?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, EpisodeStatus>(0)?, row.get::<_, i64>(1)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(EpisodeStatus::ALL
            .iter()
            .map(|status| StatusCount {
                status: *status,
                count: rows
                    .iter()
                    .find(|(s, _)| s == status)
                    .map(|(_, c)| *c)
                    .unwrap_or(0),
            })
            .collect())
    }

    pub fn get_transcript(&self, episode_id: i64) -> Result<Option<Transcript>> {
        let conn = self.conn()?;
        let meta: Option<(Option<String>, String)> = conn
            .query_row(
                "SELECT language, provider FROM transcripts WHERE episode_id = ?",
                params![episode_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let Some((language, provider)) = meta else {
            return Ok(None);
        };

        let mut stmt = conn.prepare(
            "SELECT speaker, timestamp_start, timestamp_end, text, confidence
             FROM transcript_segments WHERE episode_id = ?
             ORDER BY segment_idx",
        )?;
        let segments = stmt
            .query_map(params![episode_id], |row| {
                Ok(TranscriptSegment {
                    speaker: row.get(0)?,
                    start_time: row.get(1)?,
                    end_time: row.get(2)?,
                    text: row.get(3)?,
                    confidence: row.get(4)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(Some(Transcript {
            segments,
            language,
            provider,
        }))
    }

    /// Summaries produced on `date`, grouped-friendly ordering (podcast, episode).
    pub fn get_summaries_by_date(&self, date: NaiveDate) -> Result<Vec<DigestEntry>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT s.id, s.episode_id, e.title, p.title, s.digest_date,
                    s.key_topics, s.themes, s.quotes, s.startups, s.full_summary, s.created_at
             FROM summaries s
             JOIN episodes e ON s.episode_id = e.id
             JOIN podcasts p ON e.podcast_id = p.id
             WHERE s.digest_date = ?
             ORDER BY p.title, e.title",
        )?;
        let entries = stmt
            .query_map(params![date], |row| {
                Ok(DigestEntry {
                    id: row.get(0)?,
                    episode_id: row.get(1)?,
                    episode_title: row.get(2)?,
                    podcast_title: row.get(3)?,
                    digest_date: row.get(4)?,
                    content: SummaryContent {
                        key_topics: json_list(row, 5)?,
                        themes: json_list(row, 6)?,
                        quotes: json_list(row, 7)?,
                        startups: json_list(row, 8)?,
                        summary: row.get(9)?,
                    },
                    created_at: row.get(10)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(entries)
    }
}

fn episode_from_row(row: &Row<'_>) -> rusqlite::Result<Episode> {
    Ok(Episode {
        id: row.get(0)?,
        podcast_id: row.get(1)?,
        podcast_title: row.get(2)?,
        title: row.get(3)?,
        published_date: row.get(4)?,
        url: row.get(5)?,
        file_path: row.get(6)?,
        duration_seconds: row.get(7)?,
        status: row.get(8)?,
        error_count: row.get(9)?,
        last_error: row.get(10)?,
        error_timestamp: row.get(11)?,
        note: row.get(12)?,
        created_at: row.get(13)?,
    })
}

fn json_list(row: &Row<'_>, idx: usize) -> rusqlite::Result<Vec<String>> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// Replace the transcript of `episode_id`. Caller owns the transaction.
fn write_transcript(conn: &Connection, episode_id: i64, transcript: &Transcript) -> Result<()> {
    conn.execute(
        "DELETE FROM transcript_segments WHERE episode_id = ?",
        params![episode_id],
    )?;
    conn.execute(
        "DELETE FROM transcripts WHERE episode_id = ?",
        params![episode_id],
    )?;
    conn.execute(
        "INSERT INTO transcripts (episode_id, language, provider, created_at) VALUES (?, ?, ?, ?)",
        params![episode_id, transcript.language, transcript.provider, Utc::now()],
    )?;

    let mut stmt = conn.prepare(
        "INSERT INTO transcript_segments
            (episode_id, segment_idx, speaker, timestamp_start, timestamp_end, text, confidence)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )?;
    for (idx, segment) in transcript.segments.iter().enumerate() {
        stmt.execute(params![
            episode_id,
            idx as i64,
            segment.speaker,
            segment.start_time,
            segment.end_time,
            segment.text,
            segment.confidence,
        ])?;
    }
    Ok(())
}

/// Replace the summary of `episode_id`. Caller owns the transaction.
fn write_summary(
    conn: &Connection,
    episode_id: i64,
    summary: &SummaryContent,
    digest_date: NaiveDate,
) -> Result<()> {
    conn.execute(
        "DELETE FROM summaries WHERE episode_id = ?",
        params![episode_id],
    )?;
    conn.execute(
        "INSERT INTO summaries
            (episode_id, key_topics, themes, quotes, startups, full_summary, digest_date, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        params![
            episode_id,
            serde_json::to_string(&summary.key_topics)?,
            serde_json::to_string(&summary.themes)?,
            serde_json::to_string(&summary.quotes)?,
            serde_json::to_string(&summary.startups)?,
            summary.summary,
            digest_date,
            Utc::now(),
        ],
    )?;
    Ok(())
}
