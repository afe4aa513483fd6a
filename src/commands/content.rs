use super::GlobalArgs;
use crate::config::LlmProvider;
use crate::error::{AppError, Result};
use crate::export::{self, ExportFormat};
use crate::llm::LlmClient;
use crate::writer::{save_markdown, BlogWriter};
use chrono::{Local, NaiveDate};
use std::path::Path;

fn digest_date(date: Option<&str>) -> Result<NaiveDate> {
    match date {
        Some(d) => export::parse_date(d),
        None => Ok(Local::now().date_naive()),
    }
}

fn parse_formats(formats: &[String]) -> Result<Vec<ExportFormat>> {
    let mut parsed: Vec<ExportFormat> = Vec::with_capacity(formats.len());
    for raw in formats {
        let format: ExportFormat = raw.parse()?;
        if !parsed.contains(&format) {
            parsed.push(format);
        }
    }
    Ok(parsed)
}

/// Write the digest for one day in every requested format.
pub fn export(global: &GlobalArgs, date: Option<&str>, formats: &[String], output: &Path) -> Result<()> {
    let date = digest_date(date)?;
    let mut formats = parse_formats(formats)?;
    if formats.is_empty() {
        formats = global.load_config()?.settings.export_format;
    }

    let db = global.open_db()?;
    let entries = db.get_summaries_by_date(date)?;
    if entries.is_empty() {
        println!("No summaries found for {}", date);
        return Ok(());
    }

    for path in export::export_digest(&entries, date, &formats, output)? {
        println!("Exported {}", path.display());
    }
    Ok(())
}

/// Draft, grade and save a blog post from the first digest entry of a day,
/// then generate companion social posts.
pub async fn write(
    global: &GlobalArgs,
    topic: &str,
    date: Option<&str>,
    target_grade: Option<f64>,
) -> Result<()> {
    if topic.trim().is_empty() {
        return Err(AppError::InvalidInput("--topic must not be empty".into()));
    }
    let date = digest_date(date)?;
    if let Some(target) = target_grade {
        if !(0.0..=100.0).contains(&target) {
            return Err(AppError::InvalidInput("--target-grade must be between 0 and 100".into()));
        }
    }

    let config = global.load_config()?;
    let llm_config = config.llm_config();
    if llm_config.provider == LlmProvider::Basic {
        return Err(AppError::Config(
            "blog writing needs an LLM provider (ollama or openai)".into(),
        ));
    }
    let mut writer_config = config.writer_config();
    if let Some(target) = target_grade {
        writer_config.target_grade = target;
    }

    let db = global.open_db()?;
    let entries = db.get_summaries_by_date(date)?;
    let Some(entry) = entries.first() else {
        println!("No summaries found for {}", date);
        return Ok(());
    };

    let client = LlmClient::new(&llm_config)
        .map_err(AppError::Config)?
        .with_temperature(0.7);
    let writer = BlogWriter::new(client, writer_config);

    println!("Writing blog post about '{}' from {}", topic, entry.episode_title);
    let post = writer.write_post(topic, entry).await?;
    println!(
        "Final grade: {} ({}/100) after {} iteration(s)",
        post.final_grade.letter,
        post.final_grade.score,
        post.iterations.len()
    );

    let path = writer.output_path(&post, date);
    save_markdown(&path, &post)?;
    println!("Saved blog post to {}", path.display());

    match writer.social_posts(&post).await {
        Ok(social) => {
            println!("\nTwitter posts:");
            for (i, tweet) in social.twitter.iter().enumerate() {
                println!("{}. {}", i + 1, tweet);
            }
            println!("\nLinkedIn posts:");
            for (i, linkedin) in social.linkedin.iter().enumerate() {
                println!("{}. {}", i + 1, crate::worker::report::truncate(linkedin, 100));
            }
        }
        Err(e) => log::warn!("Social post generation failed: {}", e),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_formats_dedupes() {
        let formats = parse_formats(&["md".to_string(), "html".to_string(), "markdown".to_string()])
            .unwrap();
        assert_eq!(formats, vec![ExportFormat::Markdown, ExportFormat::Html]);
        assert!(parse_formats(&["pdf".to_string()]).is_err());
    }

    #[test]
    fn test_digest_date() {
        assert_eq!(
            digest_date(Some("2024-05-01")).unwrap(),
            NaiveDate::from_ymd_opt(2024, 5, 1).unwrap()
        );
        assert!(matches!(digest_date(Some("May 1")), Err(AppError::InvalidInput(_))));
        assert_eq!(digest_date(None).unwrap(), Local::now().date_naive());
    }
}
