//! # Iteration Report
//!
//! A typed view over one pipeline run's outputs. Model replies vary in shape,
//! so parsing is lenient: any successful output may contribute `gaps`,
//! `hypotheses`, `connections`, `experiments` or `directions` arrays, entries
//! may be objects or bare strings, and unknown enum values fall back to a
//! default.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::pipeline::OutputMap;

/// Id of the local task that compiles the iteration summary
pub const COMPILED_REPORT_ID: &str = "report_compiler";

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" | "minor" => Self::Low,
            "high" | "major" => Self::High,
            "critical" | "severe" => Self::Critical,
            _ => Self::Medium,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Impact {
    #[default]
    Incremental,
    Significant,
    Breakthrough,
}

impl Impact {
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "breakthrough" | "transformative" => Self::Breakthrough,
            "significant" | "high" => Self::Significant,
            _ => Self::Incremental,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Potential {
    Low,
    #[default]
    Medium,
    High,
}

impl Potential {
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "high" | "very high" => Self::High,
            "low" => Self::Low,
            _ => Self::Medium,
        }
    }
}

/// An open problem found in the batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Gap {
    pub title: String,
    pub description: String,
    /// Declared field of study
    pub field: String,
    pub severity: Severity,
    #[serde(default)]
    pub resolved: bool,
}

/// A proposed idea
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hypothesis {
    pub title: String,
    pub description: String,
    pub rationale: String,
    pub impact: Impact,
}

impl Hypothesis {
    pub fn text(&self) -> String {
        format!("{} {}", self.title, self.description)
    }
}

/// A claimed link between two fields
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Connection {
    pub source_field: String,
    pub target_field: String,
    pub description: String,
}

/// A designed experiment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Experiment {
    pub title: String,
    pub description: String,
    pub methodology: String,
}

impl Experiment {
    pub fn text(&self) -> String {
        format!("{} {} {}", self.title, self.description, self.methodology)
    }
}

/// An emerging research direction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Direction {
    pub direction: String,
    pub potential: Potential,
    pub rationale: String,
}

/// Everything an iteration's agents reported
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IterationReport {
    pub summary: String,
    pub gaps: Vec<Gap>,
    pub hypotheses: Vec<Hypothesis>,
    pub connections: Vec<Connection>,
    pub experiments: Vec<Experiment>,
    pub directions: Vec<Direction>,
}

impl IterationReport {
    /// Collect report sections from every successful output
    pub fn from_outputs(outputs: &OutputMap) -> Self {
        let mut report = Self::default();
        let mut fallback_summary = None;

        for (id, output) in outputs {
            let Some(value) = output.value() else {
                continue;
            };

            if let Some(summary) = value.get("summary").and_then(Value::as_str) {
                if id == COMPILED_REPORT_ID {
                    report.summary = summary.to_string();
                } else if fallback_summary.is_none() {
                    fallback_summary = Some(summary.to_string());
                }
            }

            report.gaps.extend(entries(value, "gaps").filter_map(parse_gap));
            report
                .hypotheses
                .extend(entries(value, "hypotheses").filter_map(parse_hypothesis));
            report
                .connections
                .extend(entries(value, "connections").filter_map(parse_connection));
            report
                .experiments
                .extend(entries(value, "experiments").filter_map(parse_experiment));
            report
                .directions
                .extend(entries(value, "directions").filter_map(parse_direction));
        }

        if report.summary.is_empty() {
            report.summary = fallback_summary.unwrap_or_default();
        }
        report
    }

    pub fn is_empty(&self) -> bool {
        self.gaps.is_empty()
            && self.hypotheses.is_empty()
            && self.connections.is_empty()
            && self.experiments.is_empty()
            && self.directions.is_empty()
    }

    /// All generated text, for lexical overlap
    pub fn text(&self) -> String {
        let mut parts = vec![self.summary.clone()];
        parts.extend(
            self.gaps
                .iter()
                .map(|g| format!("{} {} {}", g.title, g.description, g.field)),
        );
        parts.extend(self.hypotheses.iter().map(Hypothesis::text));
        parts.extend(
            self.connections
                .iter()
                .map(|c| format!("{} {} {}", c.source_field, c.target_field, c.description)),
        );
        parts.extend(self.experiments.iter().map(Experiment::text));
        parts.extend(self.directions.iter().map(|d| d.direction.clone()));
        parts.retain(|p| !p.trim().is_empty());
        parts.join("\n")
    }
}

fn entries<'a>(value: &'a Value, key: &str) -> impl Iterator<Item = &'a Value> {
    value
        .get(key)
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
}

/// First non-empty string among `keys`
fn text_field(value: &Value, keys: &[&str]) -> String {
    keys.iter()
        .filter_map(|k| value.get(*k).and_then(Value::as_str))
        .map(str::trim)
        .find(|s| !s.is_empty())
        .unwrap_or_default()
        .to_string()
}

fn parse_gap(value: &Value) -> Option<Gap> {
    if let Some(s) = value.as_str() {
        return Some(Gap {
            title: s.to_string(),
            description: s.to_string(),
            field: String::new(),
            severity: Severity::default(),
            resolved: false,
        });
    }
    let title = text_field(value, &["title", "gap", "name"]);
    let description = text_field(value, &["description", "details"]);
    if title.is_empty() && description.is_empty() {
        return None;
    }
    Some(Gap {
        title: if title.is_empty() { description.clone() } else { title },
        description,
        field: text_field(value, &["field", "topic", "domain"]),
        severity: Severity::parse(&text_field(value, &["severity", "priority"])),
        resolved: value
            .get("resolved")
            .and_then(Value::as_bool)
            .unwrap_or(false),
    })
}

fn parse_hypothesis(value: &Value) -> Option<Hypothesis> {
    if let Some(s) = value.as_str() {
        return Some(Hypothesis {
            title: s.to_string(),
            description: String::new(),
            rationale: String::new(),
            impact: Impact::default(),
        });
    }
    let title = text_field(value, &["title", "hypothesis", "statement"]);
    if title.is_empty() {
        return None;
    }
    Some(Hypothesis {
        title,
        description: text_field(value, &["description", "details"]),
        rationale: text_field(value, &["rationale", "reasoning"]),
        impact: Impact::parse(&text_field(value, &["impact", "potential_impact"])),
    })
}

fn parse_connection(value: &Value) -> Option<Connection> {
    let target_field = text_field(value, &["target_field", "target", "to"]);
    if target_field.is_empty() {
        return None;
    }
    Some(Connection {
        source_field: text_field(value, &["source_field", "source", "from"]),
        target_field,
        description: text_field(value, &["description", "insight"]),
    })
}

fn parse_experiment(value: &Value) -> Option<Experiment> {
    if let Some(s) = value.as_str() {
        return Some(Experiment {
            title: s.to_string(),
            description: String::new(),
            methodology: String::new(),
        });
    }
    let title = text_field(value, &["title", "name"]);
    let description = text_field(value, &["description", "design"]);
    if title.is_empty() && description.is_empty() {
        return None;
    }
    Some(Experiment {
        title,
        description,
        methodology: text_field(value, &["methodology", "methods"]),
    })
}

fn parse_direction(value: &Value) -> Option<Direction> {
    if let Some(s) = value.as_str() {
        return Some(Direction {
            direction: s.to_string(),
            potential: Potential::default(),
            rationale: String::new(),
        });
    }
    let direction = text_field(value, &["direction", "title", "trend"]);
    if direction.is_empty() {
        return None;
    }
    Some(Direction {
        direction,
        potential: Potential::parse(&text_field(value, &["potential", "impact"])),
        rationale: text_field(value, &["rationale", "evidence"]),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::AgentOutput;
    use serde_json::json;

    fn outputs() -> OutputMap {
        let mut outputs = OutputMap::new();
        outputs.insert(
            "gap_detector".to_string(),
            AgentOutput::Success(json!({
                "gaps": [
                    {"title": "Long-range contacts", "description": "Folding of long chains", "field": "Biology", "severity": "critical"},
                    "Sparse benchmarks",
                    {"severity": "high"}
                ]
            })),
        );
        outputs.insert(
            "hypothesis_generator".to_string(),
            AgentOutput::Success(json!({
                "hypotheses": [{"title": "Attention learns contacts", "impact": "Breakthrough"}]
            })),
        );
        outputs.insert(
            "paper_analyzer".to_string(),
            AgentOutput::Success(json!({"summary": "analyzer summary"})),
        );
        outputs.insert(
            "trend_forecaster".to_string(),
            AgentOutput::error("timeout"),
        );
        outputs
    }

    #[test]
    fn test_lenient_parsing() {
        let report = IterationReport::from_outputs(&outputs());

        assert_eq!(report.gaps.len(), 2);
        assert_eq!(report.gaps[0].severity, Severity::Critical);
        assert_eq!(report.gaps[1].title, "Sparse benchmarks");
        assert_eq!(report.gaps[1].severity, Severity::Medium);
        assert_eq!(report.hypotheses[0].impact, Impact::Breakthrough);
        assert!(report.directions.is_empty());
    }

    #[test]
    fn test_compiled_summary_preferred() {
        let mut outputs = outputs();
        assert_eq!(IterationReport::from_outputs(&outputs).summary, "analyzer summary");

        outputs.insert(
            COMPILED_REPORT_ID.to_string(),
            AgentOutput::Success(json!({"summary": "compiled"})),
        );
        assert_eq!(IterationReport::from_outputs(&outputs).summary, "compiled");
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::High > Severity::Medium);
        assert!(Severity::Medium > Severity::Low);
        assert_eq!(Severity::parse("unknown"), Severity::Medium);
    }

    #[test]
    fn test_text_skips_empty_parts() {
        let report = IterationReport::from_outputs(&outputs());
        let text = report.text();
        assert!(text.contains("Long-range contacts"));
        assert!(!text.contains("\n\n"));
    }
}
