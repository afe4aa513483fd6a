//! Daily digest rendering.

use crate::database::DigestEntry;
use crate::error::{AppError, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Markdown,
    Json,
    Html,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Markdown => "md",
            Self::Json => "json",
            Self::Html => "html",
        }
    }

    pub fn default_filename(&self, date: NaiveDate) -> String {
        format!("digest_{}.{}", date.format("%Y-%m-%d"), self.extension())
    }

    pub fn render(&self, entries: &[DigestEntry], date: NaiveDate) -> Result<String> {
        match self {
            Self::Markdown => Ok(render_markdown(entries, date)),
            Self::Json => render_json(entries, date),
            Self::Html => Ok(render_html(entries, date)),
        }
    }
}

impl std::str::FromStr for ExportFormat {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "markdown" | "md" => Ok(Self::Markdown),
            "json" => Ok(Self::Json),
            "html" => Ok(Self::Html),
            other => Err(AppError::InvalidInput(format!("unknown export format '{}'", other))),
        }
    }
}

/// Parse a `YYYY-MM-DD` date.
pub fn parse_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
        .map_err(|_| AppError::InvalidInput(format!("invalid date '{}', expected YYYY-MM-DD", s)))
}

/// Entries grouped by podcast, keeping first-seen podcast order.
fn group_by_podcast(entries: &[DigestEntry]) -> Vec<(&str, Vec<&DigestEntry>)> {
    let mut groups: Vec<(&str, Vec<&DigestEntry>)> = Vec::new();
    for entry in entries {
        match groups.iter_mut().find(|(name, _)| *name == entry.podcast_title) {
            Some((_, list)) => list.push(entry),
            None => groups.push((entry.podcast_title.as_str(), vec![entry])),
        }
    }
    groups
}

fn push_list(out: &mut Vec<String>, heading: &str, items: &[String], prefix: &str) {
    if items.is_empty() {
        return;
    }
    out.push(format!("**{}:**", heading));
    for item in items {
        out.push(format!("{}{}", prefix, item));
    }
    out.push(String::new());
}

pub fn render_markdown(entries: &[DigestEntry], date: NaiveDate) -> String {
    let mut out = vec![format!("# Podcast Digest - {}\n", date)];

    if entries.is_empty() {
        out.push("No summaries available for this date.\n".to_string());
        return out.join("\n");
    }

    for (podcast, episodes) in group_by_podcast(entries) {
        out.push(format!("## {}\n", podcast));
        for episode in episodes {
            let c = &episode.content;
            out.push(format!("### {}\n", episode.episode_title));
            if !c.summary.is_empty() {
                out.push(format!("**Summary:** {}\n", c.summary));
            }
            push_list(&mut out, "Key Topics", &c.key_topics, "- ");
            push_list(&mut out, "Themes", &c.themes, "- ");
            push_list(&mut out, "Notable Quotes", &c.quotes, "> ");
            push_list(&mut out, "Companies/Startups Mentioned", &c.startups, "- ");
            out.push("---\n".to_string());
        }
    }

    out.join("\n")
}

#[derive(Serialize)]
struct JsonDigest<'a> {
    date: NaiveDate,
    total_episodes: usize,
    summaries: &'a [DigestEntry],
}

pub fn render_json(entries: &[DigestEntry], date: NaiveDate) -> Result<String> {
    Ok(serde_json::to_string_pretty(&JsonDigest {
        date,
        total_episodes: entries.len(),
        summaries: entries,
    })?)
}

fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn html_list(out: &mut String, class: &str, heading: &str, items: &[String]) {
    if items.is_empty() {
        return;
    }
    out.push_str(&format!(
        "<div class=\"{}\"><strong>{}:</strong><ul>",
        class, heading
    ));
    for item in items {
        out.push_str(&format!("<li>{}</li>", escape_html(item)));
    }
    out.push_str("</ul></div>");
}

pub fn render_html(entries: &[DigestEntry], date: NaiveDate) -> String {
    let mut out = format!(
        r#"<html>
<head>
<title>Podcast Digest - {date}</title>
<style>
body {{ font-family: Arial, sans-serif; max-width: 800px; margin: 0 auto; }}
h1, h2, h3 {{ color: #333; }}
.podcast {{ margin-bottom: 2em; }}
.episode {{ margin-bottom: 1.5em; padding: 1em; background: #f9f9f9; }}
.summary {{ font-style: italic; margin-bottom: 1em; }}
.quote {{ background: #e8e8e8; padding: 0.5em; margin: 0.5em 0; }}
</style>
</head>
<body>
<h1>Podcast Digest - {date}</h1>
"#
    );

    if entries.is_empty() {
        out.push_str("<p>No summaries available for this date.</p>");
    }

    for (podcast, episodes) in group_by_podcast(entries) {
        out.push_str(&format!("<div class=\"podcast\"><h2>{}</h2>", escape_html(podcast)));
        for episode in episodes {
            let c = &episode.content;
            out.push_str(&format!(
                "<div class=\"episode\"><h3>{}</h3>",
                escape_html(&episode.episode_title)
            ));
            if !c.summary.is_empty() {
                out.push_str(&format!(
                    "<div class=\"summary\"><strong>Summary:</strong> {}</div>",
                    escape_html(&c.summary)
                ));
            }
            html_list(&mut out, "topics", "Key Topics", &c.key_topics);
            html_list(&mut out, "themes", "Themes", &c.themes);
            if !c.quotes.is_empty() {
                out.push_str("<div><strong>Notable Quotes:</strong>");
                for quote in &c.quotes {
                    out.push_str(&format!("<div class=\"quote\">{}</div>", escape_html(quote)));
                }
                out.push_str("</div>");
            }
            html_list(&mut out, "startups", "Companies/Startups", &c.startups);
            out.push_str("</div>");
        }
        out.push_str("</div>");
    }

    out.push_str("\n</body>\n</html>\n");
    out
}

/// Render and write one file per format into `output_dir`.
pub fn export_digest(
    entries: &[DigestEntry],
    date: NaiveDate,
    formats: &[ExportFormat],
    output_dir: &Path,
) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(output_dir)?;
    let mut written = Vec::with_capacity(formats.len());
    for format in formats {
        let path = output_dir.join(format.default_filename(date));
        std::fs::write(&path, format.render(entries, date)?)?;
        log::info!("Exported {} digest to {}", date, path.display());
        written.push(path);
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::SummaryContent;
    use tempfile::TempDir;

    fn entry(id: i64, podcast: &str, title: &str) -> DigestEntry {
        DigestEntry {
            id,
            episode_id: id,
            episode_title: title.to_string(),
            podcast_title: podcast.to_string(),
            digest_date: date(),
            content: SummaryContent {
                key_topics: vec!["rust".to_string(), "async".to_string()],
                themes: vec![],
                quotes: vec!["Ship <small> things".to_string()],
                startups: vec![],
                summary: format!("About {}", title),
            },
            created_at: chrono::Utc::now(),
        }
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 9).unwrap()
    }

    #[test]
    fn test_markdown_groups_by_podcast() {
        let entries = vec![
            entry(1, "Show A", "One"),
            entry(2, "Show B", "Two"),
            entry(3, "Show A", "Three"),
        ];
        let md = render_markdown(&entries, date());

        assert!(md.starts_with("# Podcast Digest - 2024-03-09\n"));
        assert_eq!(md.matches("## Show A").count(), 1);
        let a = md.find("## Show A").unwrap();
        let b = md.find("## Show B").unwrap();
        let three = md.find("### Three").unwrap();
        assert!(a < three && three < b);
        assert!(md.contains("**Key Topics:**\n- rust\n- async\n"));
        assert!(md.contains("> Ship <small> things"));
        assert!(!md.contains("**Themes:**"));
    }

    #[test]
    fn test_markdown_empty() {
        let md = render_markdown(&[], date());
        assert!(md.contains("No summaries available for this date."));
    }

    #[test]
    fn test_json_shape() {
        let json = render_json(&[entry(1, "Show A", "One")], date()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["date"], "2024-03-09");
        assert_eq!(value["total_episodes"], 1);
        assert_eq!(value["summaries"][0]["episode_title"], "One");
        assert_eq!(value["summaries"][0]["summary"], "About One");
    }

    #[test]
    fn test_html_escapes() {
        let html = render_html(&[entry(1, "Show & Tell", "One")], date());
        assert!(html.contains("<h2>Show &amp; Tell</h2>"));
        assert!(html.contains("Ship &lt;small&gt; things"));
    }

    #[test]
    fn test_parse_date_and_format() {
        assert_eq!(parse_date("2024-03-09").unwrap(), date());
        assert!(matches!(parse_date("03/09/2024"), Err(AppError::InvalidInput(_))));
        assert_eq!("MD".parse::<ExportFormat>().unwrap(), ExportFormat::Markdown);
        assert!("pdf".parse::<ExportFormat>().is_err());
    }

    #[test]
    fn test_export_digest_writes_files() {
        let dir = TempDir::new().unwrap();
        let written = export_digest(
            &[entry(1, "Show A", "One")],
            date(),
            &[ExportFormat::Markdown, ExportFormat::Html],
            dir.path(),
        )
        .unwrap();
        assert_eq!(written.len(), 2);
        assert!(written[0].ends_with("digest_2024-03-09.md"));
        assert!(written[1].exists());
    }
}
