//! # Discovery Sources
//!
//! External paper search APIs. A source returns an empty list when nothing
//! matches; errors are reserved for failed requests, and rate limiting is
//! reported separately so the fetcher can retry it.

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

use crate::items::{normalize_doi, WorkItem};
use crate::retry::Retryable;

const USER_AGENT: &str = "meridian/0.1 (research discovery)";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

/// Failure of one source request
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("{name} is rate limiting requests")]
    RateLimited { name: String },
    #[error("{name} request failed: {message}")]
    Http { name: String, message: String },
    #[error("{name} returned an unreadable response: {message}")]
    Decode { name: String, message: String },
}

impl Retryable for SourceError {
    fn is_retryable(&self) -> bool {
        matches!(self, SourceError::RateLimited { .. })
    }
}

/// A searchable catalogue of work items
#[async_trait]
pub trait DiscoverySource: Send + Sync {
    /// Provenance tag stamped on returned items
    fn name(&self) -> &str;

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<WorkItem>, SourceError>;
}

fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(REQUEST_TIMEOUT)
        .build()
        .unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Falling back to default HTTP client");
            reqwest::Client::new()
        })
}

async fn fetch_json(name: &str, request: reqwest::RequestBuilder) -> Result<Value, SourceError> {
    let response = request.send().await.map_err(|e| SourceError::Http {
        name: name.to_string(),
        message: e.to_string(),
    })?;

    let status = response.status();
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        return Err(SourceError::RateLimited {
            name: name.to_string(),
        });
    }
    if !status.is_success() {
        return Err(SourceError::Http {
            name: name.to_string(),
            message: format!("HTTP {}", status),
        });
    }

    response.json::<Value>().await.map_err(|e| SourceError::Decode {
        name: name.to_string(),
        message: e.to_string(),
    })
}

fn str_at<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Semantic Scholar Graph API paper search
///
/// Uses `SEMANTIC_SCHOLAR_API_KEY` when set; anonymous access is heavily
/// rate limited.
pub struct SemanticScholarSource {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl SemanticScholarSource {
    pub const NAME: &'static str = "semantic_scholar";

    pub fn new() -> Self {
        Self {
            client: http_client(),
            base_url: "https://api.semanticscholar.org/graph/v1".to_string(),
            api_key: None,
        }
    }

    /// Read the API key from the environment
    pub fn from_env() -> Self {
        let api_key = std::env::var("SEMANTIC_SCHOLAR_API_KEY")
            .ok()
            .filter(|k| !k.trim().is_empty());
        Self {
            api_key,
            ..Self::new()
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }
}

impl Default for SemanticScholarSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DiscoverySource for SemanticScholarSource {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<WorkItem>, SourceError> {
        let url = format!(
            "{}/paper/search?query={}&limit={}&fields=title,abstract,year,citationCount,fieldsOfStudy,externalIds,url",
            self.base_url.trim_end_matches('/'),
            urlencoding::encode(query),
            limit
        );
        let mut request = self.client.get(&url);
        if let Some(key) = &self.api_key {
            request = request.header("x-api-key", key);
        }

        let body = fetch_json(Self::NAME, request).await?;
        Ok(parse_semantic_scholar(&body))
    }
}

/// Map a Semantic Scholar search response to work items
pub fn parse_semantic_scholar(body: &Value) -> Vec<WorkItem> {
    let Some(papers) = body.get("data").and_then(Value::as_array) else {
        return Vec::new();
    };

    papers
        .iter()
        .filter_map(|paper| {
            let title = str_at(paper, "title")?;
            let external = paper.get("externalIds").unwrap_or(&Value::Null);
            let doi = str_at(external, "DOI").map(normalize_doi);
            let id = match (&doi, str_at(paper, "paperId")) {
                (Some(doi), _) => doi.clone(),
                (None, Some(paper_id)) => format!("s2:{}", paper_id),
                (None, None) => return None,
            };

            let mut item = WorkItem::new(id, title)
                .with_content(str_at(paper, "abstract").unwrap_or_default())
                .with_popularity(paper.get("citationCount").and_then(Value::as_u64).unwrap_or(0))
                .with_source(SemanticScholarSource::NAME)
                .with_tags(
                    paper
                        .get("fieldsOfStudy")
                        .and_then(Value::as_array)
                        .into_iter()
                        .flatten()
                        .filter_map(Value::as_str),
                );
            item.identifier = doi.or_else(|| str_at(external, "ArXiv").map(|a| format!("arXiv:{}", a)));
            item.year = paper.get("year").and_then(Value::as_i64).map(|y| y as i32);
            item.url = str_at(paper, "url").map(str::to_string);
            Some(item)
        })
        .collect()
}

/// OpenAlex works search
///
/// Set `OPENALEX_MAILTO` to join the polite pool.
pub struct OpenAlexSource {
    client: reqwest::Client,
    base_url: String,
    mailto: Option<String>,
}

impl OpenAlexSource {
    pub const NAME: &'static str = "openalex";

    pub fn new() -> Self {
        Self {
            client: http_client(),
            base_url: "https://api.openalex.org".to_string(),
            mailto: None,
        }
    }

    pub fn from_env() -> Self {
        let mailto = std::env::var("OPENALEX_MAILTO")
            .ok()
            .filter(|m| !m.trim().is_empty());
        Self {
            mailto,
            ..Self::new()
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }
}

impl Default for OpenAlexSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DiscoverySource for OpenAlexSource {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<WorkItem>, SourceError> {
        let mut url = format!(
            "{}/works?search={}&per-page={}",
            self.base_url.trim_end_matches('/'),
            urlencoding::encode(query),
            limit
        );
        if let Some(mailto) = &self.mailto {
            url.push_str(&format!("&mailto={}", urlencoding::encode(mailto)));
        }

        let body = fetch_json(Self::NAME, self.client.get(&url)).await?;
        Ok(parse_openalex(&body))
    }
}

/// Map an OpenAlex works response to work items
pub fn parse_openalex(body: &Value) -> Vec<WorkItem> {
    let Some(works) = body.get("results").and_then(Value::as_array) else {
        return Vec::new();
    };

    works
        .iter()
        .filter_map(|work| {
            let title = str_at(work, "display_name").or_else(|| str_at(work, "title"))?;
            let doi = str_at(work, "doi").map(normalize_doi);
            let id = match (&doi, str_at(work, "id")) {
                (Some(doi), _) => doi.clone(),
                (None, Some(openalex_id)) => format!(
                    "openalex:{}",
                    openalex_id.trim_start_matches("https://openalex.org/")
                ),
                (None, None) => return None,
            };

            // Only broad concepts (levels 0 and 1) are useful as topics
            let tags = work
                .get("concepts")
                .and_then(Value::as_array)
                .into_iter()
                .flatten()
                .filter(|c| c.get("level").and_then(Value::as_u64).unwrap_or(0) <= 1)
                .filter_map(|c| str_at(c, "display_name"));

            let mut item = WorkItem::new(id, title)
                .with_content(
                    work.get("abstract_inverted_index")
                        .map(rebuild_abstract)
                        .unwrap_or_default(),
                )
                .with_popularity(work.get("cited_by_count").and_then(Value::as_u64).unwrap_or(0))
                .with_source(OpenAlexSource::NAME)
                .with_tags(tags);
            item.url = doi.as_ref().map(|d| format!("https://doi.org/{}", d));
            item.identifier = doi;
            item.year = work
                .get("publication_year")
                .and_then(Value::as_i64)
                .map(|y| y as i32);
            Some(item)
        })
        .collect()
}

/// Reassemble an abstract from OpenAlex's `{word: [positions]}` index
pub fn rebuild_abstract(index: &Value) -> String {
    let Some(map) = index.as_object() else {
        return String::new();
    };

    let mut positioned: Vec<(u64, &str)> = map
        .iter()
        .flat_map(|(word, positions)| {
            positions
                .as_array()
                .into_iter()
                .flatten()
                .filter_map(Value::as_u64)
                .map(move |p| (p, word.as_str()))
        })
        .collect();
    positioned.sort_by_key(|(p, _)| *p);

    positioned
        .into_iter()
        .map(|(_, w)| w)
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_only_rate_limit_is_retryable() {
        let limited = SourceError::RateLimited {
            name: "openalex".into(),
        };
        let http = SourceError::Http {
            name: "openalex".into(),
            message: "HTTP 500".into(),
        };
        assert!(limited.is_retryable());
        assert!(!http.is_retryable());
        assert_eq!(limited.to_string(), "openalex is rate limiting requests");
    }

    #[test]
    fn test_parse_semantic_scholar() {
        let body = json!({
            "total": 3,
            "data": [
                {
                    "paperId": "abc",
                    "title": "Attention Is All You Need",
                    "abstract": "Transformers.",
                    "year": 2017,
                    "citationCount": 90000,
                    "fieldsOfStudy": ["Computer Science"],
                    "externalIds": {"DOI": "10.48550/ARXIV.1706.03762", "ArXiv": "1706.03762"},
                    "url": "https://www.semanticscholar.org/paper/abc"
                },
                {
                    "paperId": "def",
                    "title": "No DOI here",
                    "abstract": null,
                    "year": null,
                    "citationCount": null,
                    "fieldsOfStudy": null,
                    "externalIds": {"ArXiv": "2101.00001"}
                },
                {"paperId": "ghi", "title": null}
            ]
        });

        let items = parse_semantic_scholar(&body);
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].id, "10.48550/arxiv.1706.03762");
        assert_eq!(items[0].tags, vec!["Computer Science"]);
        assert_eq!(items[0].popularity, 90000);
        assert_eq!(items[0].year, Some(2017));
        assert_eq!(items[1].id, "s2:def");
        assert_eq!(items[1].identifier.as_deref(), Some("arXiv:2101.00001"));
        assert_eq!(items[1].source, "semantic_scholar");
    }

    #[test]
    fn test_parse_openalex() {
        let body = json!({
            "results": [{
                "id": "https://openalex.org/W123",
                "doi": null,
                "display_name": "Graph neural networks for materials",
                "publication_year": 2022,
                "cited_by_count": 42,
                "abstract_inverted_index": {"networks": [1], "Graph": [0], "predict": [2]},
                "concepts": [
                    {"display_name": "Materials science", "level": 0},
                    {"display_name": "Graph neural network", "level": 2},
                    {"display_name": "Machine learning", "level": 1}
                ]
            }]
        });

        let items = parse_openalex(&body);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].id, "openalex:W123");
        assert_eq!(items[0].content, "Graph networks predict");
        assert_eq!(items[0].tags, vec!["Materials science", "Machine learning"]);
        assert!(items[0].url.is_none());
    }

    #[test]
    fn test_missing_result_arrays() {
        assert!(parse_openalex(&json!({"error": "bad"})).is_empty());
        assert!(parse_semantic_scholar(&json!({})).is_empty());
        assert_eq!(rebuild_abstract(&Value::Null), "");
    }
}
