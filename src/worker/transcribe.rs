use super::{Stage, StageExecutor};
use crate::config::TranscribeConfig;
use crate::database::{Artifact, Episode, Transcript, TranscriptSegment};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;

/// Transcribe stage: runs whisper.cpp's `whisper-cli` on the episode audio
/// and parses its JSON output.
pub struct WhisperTranscriber {
    config: TranscribeConfig,
}

impl WhisperTranscriber {
    pub fn new(config: TranscribeConfig) -> Self {
        Self { config }
    }

    async fn transcribe(&self, audio_path: &Path) -> Result<Transcript, String> {
        if !audio_path.exists() {
            return Err(format!("Audio file not found: {:?}", audio_path));
        }

        let model_path = self.config.model_path();
        if !model_path.exists() {
            return Err(format!("Model not found: {:?}", model_path));
        }

        tokio::fs::create_dir_all(&self.config.output_dir)
            .await
            .map_err(|e| format!("Failed to create transcript dir: {}", e))?;

        // Create output path
        let output_base: PathBuf = self.config.output_dir.join(
            audio_path
                .file_stem()
                .unwrap_or_default()
                .to_string_lossy()
                .to_string(),
        );

        log::info!("Running whisper-cli on {:?} with model {}", audio_path, self.config.model);

        let output = Command::new(&self.config.whisper_cli_path)
            .arg("-m")
            .arg(&model_path)
            .arg("-f")
            .arg(audio_path)
            .arg("-oj")
            .arg("-of")
            .arg(&output_base)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            // A timed-out attempt must not leave whisper writing the output file
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| format!("Failed to spawn whisper-cli: {}", e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let last_line = stderr.lines().last().unwrap_or("").trim().to_string();
            return Err(format!(
                "whisper-cli failed with status {}: {}",
                output.status, last_line
            ));
        }

        let mut json_path = output_base.into_os_string();
        json_path.push(".json");
        let json_path = PathBuf::from(json_path);
        let content = tokio::fs::read_to_string(&json_path)
            .await
            .map_err(|e| format!("Failed to read whisper output {:?}: {}", json_path, e))?;

        let transcript = parse_whisper_json(&content)?;
        log::info!(
            "Transcription produced {} segments ({:?})",
            transcript.segments.len(),
            transcript.language
        );
        Ok(transcript)
    }
}

#[async_trait]
impl StageExecutor for WhisperTranscriber {
    fn stage(&self) -> Stage {
        Stage::Transcribe
    }

    async fn attempt(&self, episode: &Episode) -> Result<Artifact, String> {
        let audio_path = episode
            .file_path
            .as_deref()
            .ok_or_else(|| "Episode has no audio file".to_string())?;
        let transcript = self.transcribe(Path::new(audio_path)).await?;
        Ok(Artifact::Transcript(transcript))
    }
}

/// Parse whisper-cli `-oj` output. Segments come from `transcription[]` with
/// millisecond `offsets`, or `timestamps` strings as a fallback.
pub fn parse_whisper_json(content: &str) -> Result<Transcript, String> {
    let json: serde_json::Value =
        serde_json::from_str(content).map_err(|e| format!("Invalid whisper JSON: {}", e))?;

    let transcription = json
        .get("transcription")
        .and_then(|v| v.as_array())
        .ok_or_else(|| "whisper JSON has no transcription array".to_string())?;

    let segments: Vec<TranscriptSegment> = transcription
        .iter()
        .filter_map(|seg| {
            let text = seg.get("text").and_then(|t| t.as_str())?.trim().to_string();
            if text.is_empty() {
                return None;
            }

            let start_time = seg
                .get("offsets")
                .and_then(|o| o.get("from"))
                .and_then(|v| v.as_f64())
                .map(|ms| ms / 1000.0)
                .or_else(|| {
                    seg.get("timestamps")
                        .and_then(|t| t.get("from"))
                        .and_then(|v| v.as_str())
                        .and_then(parse_timestamp_str)
                })?;
            let end_time = seg
                .get("offsets")
                .and_then(|o| o.get("to"))
                .and_then(|v| v.as_f64())
                .map(|ms| ms / 1000.0)
                .or_else(|| {
                    seg.get("timestamps")
                        .and_then(|t| t.get("to"))
                        .and_then(|v| v.as_str())
                        .and_then(parse_timestamp_str)
                });

            Some(TranscriptSegment {
                speaker: None,
                text,
                start_time,
                end_time,
                confidence: None,
            })
        })
        .collect();

    if segments.is_empty() {
        return Err("whisper produced an empty transcript".to_string());
    }

    let language = json
        .get("result")
        .and_then(|r| r.get("language"))
        .and_then(|l| l.as_str())
        .map(|s| s.to_string());

    Ok(Transcript {
        segments,
        language,
        provider: "whisper".to_string(),
    })
}

/// Parse timestamp string like "00:01:23,456" or "00:01:23.456" to seconds
pub fn parse_timestamp_str(s: &str) -> Option<f64> {
    let normalized = s.trim().replace(',', ".");
    let parts: Vec<&str> = normalized.split(':').collect();
    match parts.len() {
        3 => {
            let hours: f64 = parts[0].parse().ok()?;
            let minutes: f64 = parts[1].parse().ok()?;
            let seconds: f64 = parts[2].parse().ok()?;
            Some(hours * 3600.0 + minutes * 60.0 + seconds)
        }
        2 => {
            let minutes: f64 = parts[0].parse().ok()?;
            let seconds: f64 = parts[1].parse().ok()?;
            Some(minutes * 60.0 + seconds)
        }
        1 => parts[0].parse().ok(),
        _ => None,
    }
}

fn format_srt_time(seconds: f64) -> String {
    let total_ms = (seconds.max(0.0) * 1000.0).round() as u64;
    let hours = total_ms / 3_600_000;
    let minutes = (total_ms % 3_600_000) / 60_000;
    let secs = (total_ms % 60_000) / 1000;
    let ms = total_ms % 1000;
    format!("{:02}:{:02}:{:02},{:03}", hours, minutes, secs, ms)
}

/// Render a transcript as SubRip. Segments without an end time run until
/// the next segment starts.
pub fn to_srt(transcript: &Transcript) -> String {
    let mut out = String::new();
    for (i, seg) in transcript.segments.iter().enumerate() {
        let end = seg
            .end_time
            .or_else(|| transcript.segments.get(i + 1).map(|n| n.start_time))
            .unwrap_or(seg.start_time);
        out.push_str(&format!(
            "{}\n{} --> {}\n{}\n\n",
            i + 1,
            format_srt_time(seg.start_time),
            format_srt_time(end),
            seg.text
        ));
    }
    out
}

pub fn to_text(transcript: &Transcript) -> String {
    transcript
        .segments
        .iter()
        .map(|s| match &s.speaker {
            Some(speaker) => format!("{}: {}", speaker, s.text),
            None => s.text.clone(),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    const WHISPER_JSON: &str = r#"{
        "result": { "language": "en" },
        "transcription": [
            {
                "timestamps": { "from": "00:00:00,000", "to": "00:00:03,500" },
                "offsets": { "from": 0, "to": 3500 },
                "text": " Welcome to the show."
            },
            {
                "timestamps": { "from": "00:00:03,500", "to": "00:00:07,250" },
                "text": " Today we talk about Rust."
            },
            { "offsets": { "from": 7250, "to": 8000 }, "text": "   " }
        ]
    }"#;

    #[test]
    fn test_parse_whisper_json() {
        let transcript = parse_whisper_json(WHISPER_JSON).unwrap();
        assert_eq!(transcript.language.as_deref(), Some("en"));
        assert_eq!(transcript.segments.len(), 2);
        assert_eq!(transcript.segments[0].text, "Welcome to the show.");
        assert_eq!(transcript.segments[0].end_time, Some(3.5));
        assert_eq!(transcript.segments[1].start_time, 3.5);
        assert_eq!(transcript.segments[1].end_time, Some(7.25));
    }

    #[test]
    fn test_parse_whisper_json_empty_is_error() {
        assert!(parse_whisper_json(r#"{"transcription": []}"#).is_err());
        assert!(parse_whisper_json("not json").is_err());
        assert!(parse_whisper_json(r#"{"segments": []}"#).is_err());
    }

    #[test]
    fn test_parse_timestamp_str() {
        assert_eq!(parse_timestamp_str("00:01:23.5"), Some(83.5));
        assert_eq!(parse_timestamp_str("01:00:00,250"), Some(3600.25));
        assert_eq!(parse_timestamp_str("02:03"), Some(123.0));
        assert_eq!(parse_timestamp_str("bad"), None);
    }

    #[test]
    fn test_to_srt() {
        let transcript = parse_whisper_json(WHISPER_JSON).unwrap();
        let srt = to_srt(&transcript);
        assert!(srt.starts_with("1\n00:00:00,000 --> 00:00:03,500\nWelcome to the show.\n\n"));
        assert!(srt.contains("2\n00:00:03,500 --> 00:00:07,250\n"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timed_out_whisper_process_is_killed() {
        use std::os::unix::fs::PermissionsExt;
        use std::time::Duration;

        let dir = tempfile::TempDir::new().unwrap();
        let marker = dir.path().join("finished");
        let script = dir.path().join("slow-whisper");
        std::fs::write(
            &script,
            format!("#!/bin/sh\nsleep 2\ntouch '{}'\n", marker.display()),
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let models_dir = dir.path().join("models");
        std::fs::create_dir_all(&models_dir).unwrap();
        std::fs::write(models_dir.join("ggml-base.bin"), b"model").unwrap();
        let audio = dir.path().join("episode.wav");
        std::fs::write(&audio, b"audio").unwrap();

        let transcriber = WhisperTranscriber::new(TranscribeConfig {
            whisper_cli_path: script,
            models_dir,
            model: "base".to_string(),
            output_dir: dir.path().join("transcripts"),
        });

        let attempt =
            tokio::time::timeout(Duration::from_millis(300), transcriber.transcribe(&audio)).await;
        assert!(attempt.is_err());

        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert!(!marker.exists(), "whisper kept running after the timeout");
    }

    #[test]
    fn test_to_text_with_speakers() {
        let transcript = Transcript {
            segments: vec![TranscriptSegment {
                speaker: Some("HOST".to_string()),
                text: "Hello".to_string(),
                start_time: 0.0,
                end_time: None,
                confidence: None,
            }],
            language: None,
            provider: "whisper".to_string(),
        };
        assert_eq!(to_text(&transcript), "HOST: Hello");
    }
}
