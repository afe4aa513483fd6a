//! Blog post generation with an iterative grading loop.
//!
//! A draft is written from one day's digest entry, graded like an essay
//! (letter grade, score, feedback) and rewritten from the feedback until it
//! reaches the target score or runs out of iterations.

use crate::config::WriterConfig;
use crate::database::DigestEntry;
use crate::llm::LlmClient;
use async_trait::async_trait;
use chrono::{DateTime, Local, NaiveDate};
use regex::Regex;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

const WRITER_SYSTEM: &str = "You are an expert blog writer and writing instructor.";
const GRADER_SYSTEM: &str =
    "You are a strict AP English teacher. Grade only; never rewrite the post.";

/// Text generation seam so the grading loop can run without a model.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str, system: Option<&str>) -> Result<String, String>;

    fn model_name(&self) -> String;
}

#[async_trait]
impl TextGenerator for LlmClient {
    async fn generate(&self, prompt: &str, system: Option<&str>) -> Result<String, String> {
        LlmClient::generate(self, prompt, system).await
    }

    fn model_name(&self) -> String {
        self.model().to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Grade {
    pub letter: String,
    pub score: f64,
    pub feedback: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Iteration {
    pub iteration: u32,
    pub post: String,
    pub grade: Grade,
}

#[derive(Debug, Clone, Serialize)]
pub struct BlogPost {
    pub topic: String,
    pub slug: String,
    pub body: String,
    pub final_grade: Grade,
    pub iterations: Vec<Iteration>,
    pub episode_title: String,
    pub podcast_title: String,
    pub model: String,
    pub generated_at: DateTime<Local>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SocialPosts {
    pub twitter: Vec<String>,
    pub linkedin: Vec<String>,
}

fn grade_patterns() -> &'static (Regex, Regex, Regex) {
    static PATTERNS: OnceLock<(Regex, Regex, Regex)> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        (
            Regex::new(r"GRADE:\s*([A-F][+-]?)").expect("valid grade regex"),
            Regex::new(r"SCORE:\s*(\d+(?:\.\d+)?)").expect("valid score regex"),
            Regex::new(r"(?s)FEEDBACK:\s*(.*)").expect("valid feedback regex"),
        )
    })
}

/// Parse a grading response. Missing fields fall back to C / 75 and the
/// whole response as feedback.
pub fn parse_grade(response: &str) -> Grade {
    let (grade_re, score_re, feedback_re) = grade_patterns();

    let letter = grade_re
        .captures(response)
        .map(|c| c[1].to_string())
        .unwrap_or_else(|| "C".to_string());
    let score = score_re
        .captures(response)
        .and_then(|c| c[1].parse::<f64>().ok())
        .unwrap_or(75.0);
    let feedback = feedback_re
        .captures(response)
        .map(|c| c[1].trim().to_string())
        .unwrap_or_else(|| response.trim().to_string());

    Grade {
        letter,
        score,
        feedback,
    }
}

/// URL-friendly slug: lowercase, punctuation dropped, runs of spaces and
/// hyphens collapsed to one hyphen.
pub fn slugify(topic: &str) -> String {
    let kept: String = topic
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-' || c.is_whitespace())
        .collect();
    kept.split(|c: char| c.is_whitespace() || c == '-')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

/// Split `POST n: ...` blocks out of a model response.
pub fn parse_numbered_posts(response: &str) -> Vec<String> {
    static MARKER: OnceLock<Regex> = OnceLock::new();
    let marker = MARKER.get_or_init(|| Regex::new(r"POST \d+:").expect("valid post regex"));

    let starts: Vec<(usize, usize)> = marker.find_iter(response).map(|m| (m.start(), m.end())).collect();
    starts
        .iter()
        .enumerate()
        .map(|(i, &(_, body_start))| {
            let body_end = starts.get(i + 1).map(|&(s, _)| s).unwrap_or(response.len());
            response[body_start..body_end].trim().to_string()
        })
        .filter(|p| !p.is_empty())
        .collect()
}

fn source_context(entry: &DigestEntry) -> String {
    let c = &entry.content;
    format!(
        "Episode: {} from {}\nSummary: {}\nKey Topics: {}\nThemes: {}\nNotable Quotes: {}\nCompanies Mentioned: {}",
        entry.episode_title,
        entry.podcast_title,
        c.summary,
        c.key_topics.join(", "),
        c.themes.join(", "),
        c.quotes
            .iter()
            .map(|q| format!("\"{}\"", q))
            .collect::<Vec<_>>()
            .join("; "),
        c.startups.join(", ")
    )
}

fn writing_prompt(topic: &str, context: &str) -> String {
    format!(
        r#"You are an expert blog writer specializing in technology and business content.

Style guidelines:
- 500 words or less
- No section headers
- Flowing paragraphs that transition smoothly
- At most two long sentences per paragraph
- Strong hook in the first few sentences
- Conclusion that ties back to the opening
- Actionable insights, specific examples and quotes where relevant

Topic: {topic}

Source Material:
{context}

Write a compelling blog post that opens with a strong hook, presents insights from the podcast, gives actionable takeaways, uses quotes to support key points and ends with a statement that ties back to the opening."#
    )
}

fn grading_prompt(post: &str) -> String {
    format!(
        r#"You are an experienced AP English teacher grading a blog post.

Evaluate it on: hook/opening (20), argument clarity (20), evidence and examples (20), paragraph structure (20), conclusion strength (20), plus overall engagement as a bonus or penalty.

Blog Post to Grade:
{post}

Format your response as:
GRADE: [Letter Grade, A+ to F]
SCORE: [Numerical Score 0-100]
FEEDBACK: [Detailed feedback with specific suggestions for improvement]"#
    )
}

fn improvement_prompt(post: &str, feedback: &str) -> String {
    format!(
        r#"You are revising a blog post based on AP English teacher feedback.

Current Blog Post:
{post}

Teacher Feedback:
{feedback}

Rewrite the blog post addressing the feedback while keeping the core message, a concise style (500 words or less), a strong hook and conclusion, smooth transitions and actionable takeaways."#
    )
}

pub struct BlogWriter<G: TextGenerator> {
    generator: G,
    config: WriterConfig,
}

impl<G: TextGenerator> BlogWriter<G> {
    pub fn new(generator: G, config: WriterConfig) -> Self {
        Self { generator, config }
    }

    /// Draft, grade and revise until the score reaches the target or the
    /// iteration budget is spent.
    pub async fn write_post(&self, topic: &str, entry: &DigestEntry) -> Result<BlogPost, String> {
        let context = source_context(entry);
        let mut current = self
            .generator
            .generate(&writing_prompt(topic, &context), Some(WRITER_SYSTEM))
            .await?;

        let max_iterations = self.config.max_iterations.max(1);
        let mut iterations: Vec<Iteration> = Vec::new();

        for i in 0..max_iterations {
            let response = self
                .generator
                .generate(&grading_prompt(&current), Some(GRADER_SYSTEM))
                .await?;
            let grade = parse_grade(&response);
            log::info!(
                "Iteration {}: grade {} ({}/100)",
                i + 1,
                grade.letter,
                grade.score
            );

            let reached = grade.score >= self.config.target_grade;
            let feedback = grade.feedback.clone();
            iterations.push(Iteration {
                iteration: i + 1,
                post: current.clone(),
                grade,
            });

            if reached {
                break;
            }
            if i + 1 < max_iterations {
                current = self
                    .generator
                    .generate(&improvement_prompt(&current, &feedback), Some(WRITER_SYSTEM))
                    .await?;
            }
        }

        let final_grade = iterations
            .last()
            .map(|it| it.grade.clone())
            .ok_or_else(|| "grading loop produced no iterations".to_string())?;

        Ok(BlogPost {
            topic: topic.to_string(),
            slug: slugify(topic),
            body: current,
            final_grade,
            iterations,
            episode_title: entry.episode_title.clone(),
            podcast_title: entry.podcast_title.clone(),
            model: self.generator.model_name(),
            generated_at: Local::now(),
        })
    }

    pub async fn social_posts(&self, post: &BlogPost) -> Result<SocialPosts, String> {
        let twitter_prompt = format!(
            "Generate 3 engaging Twitter posts based on this blog post about {}.\n\nBlog Post:\n{}\n\n\
             Each post under 280 characters with relevant hashtags.\n\nFormat as:\nPOST 1: [content]\nPOST 2: [content]\nPOST 3: [content]",
            post.topic, post.body
        );
        let linkedin_prompt = format!(
            "Generate 2 LinkedIn posts based on this blog post about {}.\n\nBlog Post:\n{}\n\n\
             Professional tone, 100-200 words each, with a call to action.\n\nFormat as:\nPOST 1: [content]\nPOST 2: [content]",
            post.topic, post.body
        );

        let twitter = self.generator.generate(&twitter_prompt, Some(WRITER_SYSTEM)).await?;
        let linkedin = self.generator.generate(&linkedin_prompt, Some(WRITER_SYSTEM)).await?;

        Ok(SocialPosts {
            twitter: parse_numbered_posts(&twitter),
            linkedin: parse_numbered_posts(&linkedin),
        })
    }

    pub fn output_path(&self, post: &BlogPost, date: NaiveDate) -> PathBuf {
        self.config
            .output_dir
            .join(format!("{}-{}.md", date.format("%Y-%m-%d"), post.slug))
    }
}

fn yaml_quote(s: &str) -> String {
    format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Markdown with front matter and the grading history.
pub fn render_markdown(post: &BlogPost) -> String {
    let mut out = String::new();
    out.push_str("---\n");
    out.push_str(&format!("title: {}\n", yaml_quote(&post.topic)));
    out.push_str(&format!("date: {}\n", post.generated_at.to_rfc3339()));
    out.push_str(&format!("source_episode: {}\n", yaml_quote(&post.episode_title)));
    out.push_str(&format!("source_podcast: {}\n", yaml_quote(&post.podcast_title)));
    out.push_str(&format!("final_grade: {}\n", yaml_quote(&post.final_grade.letter)));
    out.push_str(&format!("final_score: {}\n", post.final_grade.score));
    out.push_str(&format!("model: {}\n", yaml_quote(&post.model)));
    out.push_str("---\n\n");

    out.push_str(&format!("# {}\n\n{}\n\n---\n\n", post.topic, post.body.trim()));
    out.push_str("## Generation Notes\n\n");
    out.push_str(&format!(
        "- **Final Grade**: {} ({}/100)\n",
        post.final_grade.letter, post.final_grade.score
    ));
    out.push_str(&format!("- **Iterations**: {}\n", post.iterations.len()));
    out.push_str(&format!(
        "- **Source**: {} from {}\n\n",
        post.episode_title, post.podcast_title
    ));
    out.push_str("### Grading History\n");

    for it in &post.iterations {
        let feedback: String = it.grade.feedback.chars().take(200).collect();
        let ellipsis = if it.grade.feedback.chars().count() > 200 { "..." } else { "" };
        out.push_str(&format!(
            "\n**Iteration {}**: {} ({}/100)\n{}{}\n",
            it.iteration, it.grade.letter, it.grade.score, feedback, ellipsis
        ));
    }
    out
}

pub fn save_markdown(path: &Path, post: &BlogPost) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, render_markdown(post))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::SummaryContent;
    use std::sync::Mutex;

    /// Replays canned responses in order and records every prompt.
    struct Scripted {
        responses: Mutex<Vec<String>>,
        prompts: Mutex<Vec<String>>,
        systems: Mutex<Vec<Option<String>>>,
    }

    impl Scripted {
        fn new(responses: &[&str]) -> Self {
            Self {
                responses: Mutex::new(responses.iter().rev().map(|s| s.to_string()).collect()),
                prompts: Mutex::new(Vec::new()),
                systems: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl TextGenerator for Scripted {
        async fn generate(&self, prompt: &str, system: Option<&str>) -> Result<String, String> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            self.systems.lock().unwrap().push(system.map(str::to_string));
            self.responses
                .lock()
                .unwrap()
                .pop()
                .ok_or_else(|| "script exhausted".to_string())
        }

        fn model_name(&self) -> String {
            "scripted".to_string()
        }
    }

    fn entry() -> DigestEntry {
        DigestEntry {
            id: 1,
            episode_id: 7,
            episode_title: "Scaling Rust".to_string(),
            podcast_title: "Example Show".to_string(),
            digest_date: NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
            content: SummaryContent {
                key_topics: vec!["rust".to_string()],
                summary: "A talk about Rust.".to_string(),
                ..Default::default()
            },
            created_at: chrono::Utc::now(),
        }
    }

    fn config(target: f64) -> WriterConfig {
        WriterConfig {
            target_grade: target,
            max_iterations: 3,
            output_dir: PathBuf::from("blog_posts"),
        }
    }

    #[test]
    fn test_parse_grade() {
        let g = parse_grade("GRADE: A-\nSCORE: 92\nFEEDBACK: Tighten the ending.\nMore notes.");
        assert_eq!(g.letter, "A-");
        assert_eq!(g.score, 92.0);
        assert_eq!(g.feedback, "Tighten the ending.\nMore notes.");
    }

    #[test]
    fn test_parse_grade_defaults() {
        let g = parse_grade("Pretty good overall.");
        assert_eq!(g.letter, "C");
        assert_eq!(g.score, 75.0);
        assert_eq!(g.feedback, "Pretty good overall.");
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("The Future of AI: Agents & Tools!"), "the-future-of-ai-agents-tools");
        assert_eq!(slugify("  --Rust -- in 2024-- "), "rust-in-2024");
    }

    #[test]
    fn test_parse_numbered_posts() {
        let posts = parse_numbered_posts("POST 1: first #rust\nPOST 2: second\n\nPOST 3:   ");
        assert_eq!(posts, vec!["first #rust".to_string(), "second".to_string()]);
    }

    #[tokio::test]
    async fn test_write_post_stops_at_target() {
        let gen = Scripted::new(&["draft one", "GRADE: A\nSCORE: 95\nFEEDBACK: Great."]);
        let writer = BlogWriter::new(gen, config(91.0));

        let post = writer.write_post("Rust at Scale", &entry()).await.unwrap();
        assert_eq!(post.iterations.len(), 1);
        assert_eq!(post.body, "draft one");
        assert_eq!(post.final_grade.letter, "A");
        assert_eq!(post.slug, "rust-at-scale");
        assert_eq!(post.model, "scripted");
    }

    #[tokio::test]
    async fn test_write_post_revises_until_budget() {
        let gen = Scripted::new(&[
            "draft one",
            "GRADE: C\nSCORE: 70\nFEEDBACK: Weak hook.",
            "draft two",
            "GRADE: B\nSCORE: 85\nFEEDBACK: Better.",
            "draft three",
            "GRADE: B+\nSCORE: 88\nFEEDBACK: Close.",
        ]);
        let writer = BlogWriter::new(gen, config(91.0));

        let post = writer.write_post("Rust", &entry()).await.unwrap();
        assert_eq!(post.iterations.len(), 3);
        assert_eq!(post.body, "draft three");
        assert_eq!(post.final_grade.score, 88.0);

        let prompts = writer.generator.prompts.lock().unwrap();
        assert_eq!(prompts.len(), 6);
        assert!(prompts[2].contains("Weak hook."));

        let systems = writer.generator.systems.lock().unwrap();
        assert_eq!(systems[0].as_deref(), Some(WRITER_SYSTEM));
        assert_eq!(systems[1].as_deref(), Some(GRADER_SYSTEM));
        assert_eq!(systems[2].as_deref(), Some(WRITER_SYSTEM));
        assert_eq!(systems[3].as_deref(), Some(GRADER_SYSTEM));
    }

    #[tokio::test]
    async fn test_write_post_propagates_generator_failure() {
        let gen = Scripted::new(&["draft one"]);
        let writer = BlogWriter::new(gen, config(91.0));
        assert!(writer.write_post("Rust", &entry()).await.is_err());
    }

    #[tokio::test]
    async fn test_render_and_save_markdown() {
        let gen = Scripted::new(&["Body text.", "GRADE: A+\nSCORE: 98\nFEEDBACK: Excellent \"work\"."]);
        let writer = BlogWriter::new(gen, config(91.0));
        let post = writer.write_post("Say \"hi\"", &entry()).await.unwrap();

        let md = render_markdown(&post);
        assert!(md.starts_with("---\ntitle: \"Say \\\"hi\\\"\"\n"));
        assert!(md.contains("final_score: 98\n"));
        assert!(md.contains("**Iteration 1**: A+ (98/100)"));

        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("posts").join("out.md");
        save_markdown(&path, &post).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), md);
    }

    #[tokio::test]
    async fn test_output_path_uses_date_and_slug() {
        let gen = Scripted::new(&["x", "SCORE: 99"]);
        let writer = BlogWriter::new(gen, config(91.0));
        let post = writer.write_post("Hello World", &entry()).await.unwrap();
        let path = writer.output_path(&post, NaiveDate::from_ymd_opt(2024, 1, 2).unwrap());
        assert_eq!(path, PathBuf::from("blog_posts/2024-01-02-hello-world.md"));
    }
}
