//! # Work Items
//!
//! A unit of work flowing through the discovery loop: usually a paper
//! harvested from a discovery source or supplied as a seed.

use serde::{Deserialize, Serialize};

/// A candidate unit of work. Identity is `id` only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    /// Stable identifier (DOI when known, otherwise source-prefixed)
    pub id: String,
    /// Human-readable title
    pub title: String,
    /// External identifier such as a DOI or arXiv id
    #[serde(default)]
    pub identifier: Option<String>,
    /// Abstract or other textual content
    #[serde(default)]
    pub content: String,
    /// Topical tags (fields of study)
    #[serde(default)]
    pub tags: Vec<String>,
    /// Popularity signal (citation count or similar)
    #[serde(default)]
    pub popularity: u64,
    /// Publication year
    #[serde(default)]
    pub year: Option<i32>,
    /// Landing page
    #[serde(default)]
    pub url: Option<String>,
    /// Provenance tag ("seed", "semantic_scholar", ...)
    #[serde(default = "default_source")]
    pub source: String,
    /// Candidate score assigned when the item was harvested
    #[serde(default)]
    pub score: Option<f64>,
}

fn default_source() -> String {
    "seed".to_string()
}

impl WorkItem {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            identifier: None,
            content: String::new(),
            tags: Vec::new(),
            popularity: 0,
            year: None,
            url: None,
            source: default_source(),
            score: None,
        }
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = content.into();
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_popularity(mut self, popularity: u64) -> Self {
        self.popularity = popularity;
        self
    }

    pub fn with_year(mut self, year: i32) -> Self {
        self.year = Some(year);
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    /// Title and content joined, for lexical comparisons
    pub fn text(&self) -> String {
        format!("{} {}", self.title, self.content)
    }
}

/// Normalize a DOI into a stable id (`10.x/...`, lowercase, no resolver prefix)
pub fn normalize_doi(doi: &str) -> String {
    let lower = doi.trim().to_ascii_lowercase();
    lower
        .trim_start_matches("https://doi.org/")
        .trim_start_matches("http://doi.org/")
        .trim_start_matches("doi:")
        .to_string()
}

/// Markdown digest of a batch for model prompts. Content is cut at
/// `max_content_chars` characters per item.
pub fn digest(items: &[WorkItem], max_content_chars: usize) -> String {
    items
        .iter()
        .enumerate()
        .map(|(i, item)| {
            let mut entry = format!("### [{}] {}", i + 1, item.title);
            if let Some(year) = item.year {
                entry.push_str(&format!(" ({})", year));
            }
            if !item.tags.is_empty() {
                entry.push_str(&format!("\nFields: {}", item.tags.join(", ")));
            }
            if !item.content.is_empty() {
                let content: String = item.content.chars().take(max_content_chars).collect();
                entry.push('\n');
                entry.push_str(&content);
                if item.content.chars().count() > max_content_chars {
                    entry.push_str("...");
                }
            }
            entry
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seed_defaults() {
        let item: WorkItem = serde_json::from_str(r#"{"id": "a", "title": "A"}"#).unwrap();
        assert_eq!(item.source, "seed");
        assert!(item.tags.is_empty());
        assert_eq!(item.popularity, 0);
    }

    #[test]
    fn test_normalize_doi() {
        assert_eq!(
            normalize_doi("https://doi.org/10.1000/ABC.123"),
            "10.1000/abc.123"
        );
        assert_eq!(normalize_doi("doi:10.1/x"), "10.1/x");
    }

    #[test]
    fn test_digest_truncates_content() {
        let items = vec![WorkItem::new("a", "Graph kernels")
            .with_year(2021)
            .with_tags(["Computer Science"])
            .with_content("é".repeat(20))];
        let text = digest(&items, 5);
        assert!(text.starts_with("### [1] Graph kernels (2021)"));
        assert!(text.contains("Fields: Computer Science"));
        assert!(text.ends_with("ééééé..."));
    }
}
