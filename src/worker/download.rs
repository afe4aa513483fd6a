use crate::config::{AudioFormat, FeedConfig, FetchConfig};
use crate::database::{Database, NewEpisode};
use crate::error::AppError;
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Audio entry pulled from a feed.
#[derive(Debug, Clone)]
pub struct FeedEpisode {
    pub title: String,
    pub audio_url: String,
    pub published: Option<DateTime<Utc>>,
    pub duration_seconds: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct FeedResult {
    pub feed: String,
    pub downloaded: usize,
    pub skipped_existing: usize,
    pub download_failed: usize,
    pub ingestion_failed: usize,
    pub error: Option<String>,
}

/// Ingestion: turns configured feeds into `downloaded` episodes.
pub struct FeedFetcher {
    db: Arc<Database>,
    config: FetchConfig,
    client: reqwest::Client,
}

impl FeedFetcher {
    pub fn new(db: Arc<Database>, config: FetchConfig) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(30))
            .timeout(std::time::Duration::from_secs(600))
            .build()
            .map_err(|e| AppError::Config(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { db, config, client })
    }

    /// Process every feed. A broken feed is reported in its result and the
    /// others still run; only store faults abort.
    pub async fn fetch_all(&self, feeds: &[FeedConfig]) -> Result<Vec<FeedResult>, AppError> {
        tokio::fs::create_dir_all(&self.config.audio_dir).await?;

        let mut results = Vec::with_capacity(feeds.len());
        for feed in feeds {
            log::info!("Processing feed: {}", feed.name);
            let result = self.fetch_feed(feed).await?;
            log::info!(
                "{}: {} downloaded, {} already known, {} download failures, {} ingestion failures",
                feed.name,
                result.downloaded,
                result.skipped_existing,
                result.download_failed,
                result.ingestion_failed
            );
            results.push(result);
        }
        Ok(results)
    }

    async fn fetch_feed(&self, feed: &FeedConfig) -> Result<FeedResult, AppError> {
        let mut result = FeedResult {
            feed: feed.name.clone(),
            ..Default::default()
        };

        let podcast_id = self
            .db
            .ensure_podcast(&feed.name, &feed.url, feed.category.as_deref())?;

        let entries = match self.fetch_entries(&feed.url).await {
            Ok(entries) => entries,
            Err(e) => {
                log::error!("Failed to read feed {}: {}", feed.name, e);
                result.error = Some(e);
                return Ok(result);
            }
        };

        for entry in entries {
            if self.db.episode_exists(&entry.audio_url)? {
                result.skipped_existing += 1;
                continue;
            }

            log::info!("Downloading: {}", entry.title);
            let raw_path = self.raw_path(podcast_id, &entry);
            if let Err(e) = download_with_retry(&self.client, &entry.audio_url, &raw_path).await {
                // Nothing recorded: the URL is picked up again on the next fetch
                log::error!("Failed to download {}: {}", entry.title, e);
                result.download_failed += 1;
                continue;
            }

            let (file_path, normalize_error) = match self.config.audio_format {
                AudioFormat::Mp3 => (raw_path.clone(), None),
                AudioFormat::Wav => {
                    let wav_path = raw_path.with_extension(AudioFormat::Wav.extension());
                    match normalize_audio(&raw_path, &wav_path).await {
                        Ok(()) => {
                            let _ = tokio::fs::remove_file(&raw_path).await;
                            (wav_path, None)
                        }
                        Err(e) => (raw_path.clone(), Some(e)),
                    }
                }
            };

            self.record_download(podcast_id, &entry, &file_path, normalize_error, &mut result)
                .await?;
        }

        Ok(result)
    }

    /// Create the episode for a finished download. When the URL was recorded
    /// by someone else since the existence check, the local file is dropped.
    async fn record_download(
        &self,
        podcast_id: i64,
        entry: &FeedEpisode,
        file_path: &Path,
        normalize_error: Option<String>,
        result: &mut FeedResult,
    ) -> Result<(), AppError> {
        let new = NewEpisode {
            podcast_id,
            title: entry.title.clone(),
            url: entry.audio_url.clone(),
            published_date: entry.published,
            file_path: Some(file_path.to_string_lossy().to_string()),
            duration_seconds: entry.duration_seconds,
        };
        let episode_id = match self.db.create_episode(&new) {
            Ok(id) => id,
            Err(AppError::DuplicateEpisode(msg)) => {
                log::warn!("Skipping {}: {}", entry.title, msg);
                if let Err(e) = tokio::fs::remove_file(file_path).await {
                    log::warn!("Failed to remove {}: {}", file_path.display(), e);
                }
                result.skipped_existing += 1;
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        match normalize_error {
            None => result.downloaded += 1,
            Some(e) => {
                log::error!("Audio normalization failed for {}: {}", entry.title, e);
                self.db
                    .mark_ingestion_failed(episode_id, &format!("audio normalization failed: {}", e))?;
                result.ingestion_failed += 1;
            }
        }
        Ok(())
    }

    async fn fetch_entries(&self, rss_url: &str) -> Result<Vec<FeedEpisode>, String> {
        let response = self
            .client
            .get(rss_url)
            .send()
            .await
            .map_err(|e| format!("Failed to fetch RSS: {}", e))?;
        if !response.status().is_success() {
            return Err(format!("RSS fetch failed with status: {}", response.status()));
        }
        let body = response
            .bytes()
            .await
            .map_err(|e| format!("Failed to read RSS body: {}", e))?;

        let episodes = parse_feed(&body)?;
        Ok(episodes
            .into_iter()
            .take(self.config.max_episodes_per_feed)
            .collect())
    }

    fn raw_path(&self, podcast_id: i64, entry: &FeedEpisode) -> PathBuf {
        let ext = if entry.audio_url.to_lowercase().contains(".m4a") {
            "m4a"
        } else {
            "mp3"
        };
        let filename = format!(
            "{}_{}_{}.{}",
            podcast_id,
            safe_filename(&entry.title),
            Utc::now().format("%Y%m%d_%H%M%S"),
            ext
        );
        self.config.audio_dir.join(filename)
    }
}

/// Parse feed XML into audio entries, in feed order. Entries without an
/// audio enclosure are dropped.
pub fn parse_feed(body: &[u8]) -> Result<Vec<FeedEpisode>, String> {
    let feed = feed_rs::parser::parse(body).map_err(|e| format!("Failed to parse RSS: {}", e))?;
    log::info!("Parsed {} entries from RSS feed", feed.entries.len());

    Ok(feed
        .entries
        .into_iter()
        .filter_map(|entry| {
            let audio_url = entry
                .media
                .iter()
                .flat_map(|m| m.content.iter())
                .find(|c| {
                    c.content_type
                        .as_ref()
                        .map(|t| t.to_string().starts_with("audio"))
                        .unwrap_or(true)
                })
                .and_then(|c| c.url.as_ref())
                .map(|u| u.to_string())
                .or_else(|| {
                    entry
                        .links
                        .iter()
                        .find(|l| {
                            l.media_type
                                .as_deref()
                                .map(|t| t.starts_with("audio"))
                                .unwrap_or(false)
                        })
                        .map(|l| l.href.clone())
                })?;

            let duration_seconds = entry
                .media
                .iter()
                .flat_map(|m| m.content.iter())
                .find_map(|c| c.duration)
                .map(|d| d.as_secs() as i64);

            Some(FeedEpisode {
                title: entry
                    .title
                    .map(|t| t.content)
                    .unwrap_or_else(|| "Unknown Title".to_string()),
                audio_url,
                published: entry.published.or(entry.updated),
                duration_seconds,
            })
        })
        .collect())
}

fn safe_filename(title: &str) -> String {
    let safe: String = title
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .take(50)
        .collect();
    safe.trim_end_matches('_').to_string()
}

/// Download with streaming, timeouts, and automatic retry
async fn download_with_retry(client: &reqwest::Client, url: &str, file_path: &Path) -> Result<u64, String> {
    let backoff_delays = [2u64, 8, 30];
    let mut last_error = String::new();

    for attempt in 0..3usize {
        match try_download(client, url, file_path).await {
            Ok(size) => return Ok(size),
            Err(e) => {
                // Clean up partial file
                let _ = tokio::fs::remove_file(file_path).await;

                if attempt < 2 {
                    let delay = backoff_delays[attempt];
                    log::warn!(
                        "Download attempt {} failed, retrying in {}s: {}",
                        attempt + 1,
                        delay,
                        e
                    );
                    tokio::time::sleep(std::time::Duration::from_secs(delay)).await;
                }
                last_error = e;
            }
        }
    }

    Err(format!("Download failed after 3 attempts: {}", last_error))
}

/// Single download attempt with streaming and validation
async fn try_download(client: &reqwest::Client, url: &str, file_path: &Path) -> Result<u64, String> {
    log::info!("Downloading to: {:?}", file_path);

    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| format!("Failed to start download: {}", e))?;

    if !response.status().is_success() {
        return Err(format!("Download failed with status: {}", response.status()));
    }

    let content_length = response.content_length();
    let mut stream = response.bytes_stream();
    let mut file = tokio::fs::File::create(file_path)
        .await
        .map_err(|e| format!("Failed to create file: {}", e))?;
    let mut downloaded: u64 = 0;

    while let Some(chunk_result) = stream.next().await {
        let chunk = chunk_result.map_err(|e| format!("Error reading download stream: {}", e))?;
        file.write_all(&chunk)
            .await
            .map_err(|e| format!("Failed to write chunk: {}", e))?;
        downloaded += chunk.len() as u64;
    }

    file.flush()
        .await
        .map_err(|e| format!("Failed to flush file: {}", e))?;

    // Validate file size against Content-Length
    if let Some(expected) = content_length {
        if downloaded != expected {
            return Err(format!(
                "Download incomplete: got {} bytes, expected {}",
                downloaded, expected
            ));
        }
    }

    log::info!("Download complete: {} bytes", downloaded);
    Ok(downloaded)
}

/// Convert to 16 kHz mono PCM WAV with loudness normalization, falling back
/// to a plain resample when the filter chain fails.
async fn normalize_audio(input: &Path, output: &Path) -> Result<(), String> {
    let primary = run_ffmpeg(&[
        "-ar", "16000", "-ac", "1", "-c:a", "pcm_s16le", "-af", "loudnorm",
    ], input, output)
    .await;

    match primary {
        Ok(()) => Ok(()),
        Err(e) => {
            log::warn!("ffmpeg normalization failed, trying fallback: {}", e);
            run_ffmpeg(&["-ar", "16000", "-ac", "1"], input, output)
                .await
                .map_err(|fallback| format!("{}; fallback: {}", e, fallback))
        }
    }
}

async fn run_ffmpeg(args: &[&str], input: &Path, output: &Path) -> Result<(), String> {
    let result = Command::new("ffmpeg")
        .arg("-y")
        .arg("-i")
        .arg(input)
        .args(args)
        .arg(output)
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| format!("Failed to run ffmpeg: {}", e))?;

    if !result.status.success() {
        let stderr = String::from_utf8_lossy(&result.stderr);
        let tail: String = stderr
            .lines()
            .rev()
            .take(3)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect::<Vec<_>>()
            .join(" | ");
        return Err(format!("ffmpeg failed ({}): {}", result.status, tail));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::EpisodeStatus;
    use tempfile::TempDir;

    const RSS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0" xmlns:itunes="http://www.itunes.com/dtds/podcast-1.0.dtd">
  <channel>
    <title>Example Show</title>
    <link>https://example.com</link>
    <description>Test feed</description>
    <item>
      <title>Episode Two</title>
      <pubDate>Tue, 02 Jan 2024 10:00:00 GMT</pubDate>
      <enclosure url="https://example.com/ep2.mp3" length="1000" type="audio/mpeg"/>
    </item>
    <item>
      <title>Show notes only</title>
      <pubDate>Mon, 01 Jan 2024 10:00:00 GMT</pubDate>
    </item>
    <item>
      <title>Episode One</title>
      <pubDate>Mon, 01 Jan 2024 09:00:00 GMT</pubDate>
      <enclosure url="https://example.com/ep1.mp3" length="1000" type="audio/mpeg"/>
    </item>
  </channel>
</rss>"#;

    #[test]
    fn test_parse_feed_keeps_audio_entries_in_order() {
        let episodes = parse_feed(RSS.as_bytes()).unwrap();
        assert_eq!(episodes.len(), 2);
        assert_eq!(episodes[0].title, "Episode Two");
        assert_eq!(episodes[0].audio_url, "https://example.com/ep2.mp3");
        assert!(episodes[0].published.is_some());
        assert_eq!(episodes[1].audio_url, "https://example.com/ep1.mp3");
    }

    #[test]
    fn test_parse_feed_skips_non_audio_enclosures() {
        let rss = r#"<?xml version="1.0"?>
<rss version="2.0">
  <channel>
    <title>Mixed</title>
    <link>https://example.com</link>
    <description>Mixed media</description>
    <item>
      <title>Video cut</title>
      <enclosure url="https://example.com/ep.mp4" length="1000" type="video/mp4"/>
    </item>
    <item>
      <title>Audio cut</title>
      <enclosure url="https://example.com/ep.m4a" length="1000" type="audio/x-m4a"/>
    </item>
  </channel>
</rss>"#;
        let episodes = parse_feed(rss.as_bytes()).unwrap();
        assert_eq!(episodes.len(), 1);
        assert_eq!(episodes[0].audio_url, "https://example.com/ep.m4a");
    }

    fn setup_fetcher() -> (FeedFetcher, Arc<Database>, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db = Arc::new(Database::new(&temp_dir.path().join("test.db")).unwrap());
        let audio_dir = temp_dir.path().join("audio");
        std::fs::create_dir_all(&audio_dir).unwrap();
        let fetcher = FeedFetcher::new(
            db.clone(),
            FetchConfig {
                audio_dir,
                max_episodes_per_feed: 10,
                audio_format: AudioFormat::Mp3,
            },
        )
        .unwrap();
        (fetcher, db, temp_dir)
    }

    fn feed_episode(url: &str) -> FeedEpisode {
        FeedEpisode {
            title: "Raced".to_string(),
            audio_url: url.to_string(),
            published: None,
            duration_seconds: None,
        }
    }

    #[tokio::test]
    async fn test_record_download_duplicate_removes_file() {
        let (fetcher, db, temp_dir) = setup_fetcher();
        let podcast_id = db.ensure_podcast("Show", "http://example.com/rss", None).unwrap();
        let url = "http://example.com/raced.mp3";
        db.create_episode(&NewEpisode {
            podcast_id,
            title: "Raced".to_string(),
            url: url.to_string(),
            ..Default::default()
        })
        .unwrap();

        let file = temp_dir.path().join("audio").join("raced.mp3");
        std::fs::write(&file, b"audio").unwrap();

        let mut result = FeedResult::default();
        fetcher
            .record_download(podcast_id, &feed_episode(url), &file, None, &mut result)
            .await
            .unwrap();

        assert!(!file.exists());
        assert_eq!(result.skipped_existing, 1);
        assert_eq!(result.downloaded, 0);
        assert_eq!(db.list_all().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_record_download_normalization_failure_marks_failed() {
        let (fetcher, db, temp_dir) = setup_fetcher();
        let podcast_id = db.ensure_podcast("Show", "http://example.com/rss", None).unwrap();
        let file = temp_dir.path().join("audio").join("raw.mp3");
        std::fs::write(&file, b"audio").unwrap();

        let mut result = FeedResult::default();
        fetcher
            .record_download(
                podcast_id,
                &feed_episode("http://example.com/raw.mp3"),
                &file,
                Some("ffmpeg exited 1".to_string()),
                &mut result,
            )
            .await
            .unwrap();

        assert_eq!(result.ingestion_failed, 1);
        let episodes = db.list_all().unwrap();
        assert_eq!(episodes.len(), 1);
        assert_eq!(episodes[0].status, EpisodeStatus::Failed);
        assert_eq!(episodes[0].error_count, 1);
        assert!(episodes[0].last_error.as_deref().unwrap().contains("ffmpeg exited 1"));
        assert!(file.exists());
    }

    #[test]
    fn test_parse_feed_rejects_garbage() {
        assert!(parse_feed(b"not xml at all").is_err());
    }

    #[test]
    fn test_safe_filename() {
        assert_eq!(safe_filename("Ep 12: The Big/Small Show?"), "Ep_12__The_Big_Small_Show");
        assert!(safe_filename(&"a".repeat(80)).len() <= 50);
    }
}
