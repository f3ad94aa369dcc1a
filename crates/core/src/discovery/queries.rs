//! Search query extraction from an iteration report.

use crate::report::{IterationReport, Potential};
use crate::text::loosely_matches;

/// Longest query sent to a source, in words
pub const MAX_QUERY_WORDS: usize = 8;

/// Per-category quota before overflow candidates are considered
const GAP_QUOTA: usize = 2;
const IDEA_QUOTA: usize = 1;
const DIRECTION_QUOTA: usize = 1;
const CONNECTION_QUOTA: usize = 1;

/// Derive up to `max_queries` short search queries.
///
/// Candidates in priority order: the guidance string, the most severe
/// unresolved gaps, proposed idea titles, high-potential directions, and
/// target fields of cross-domain connections. Each category first
/// contributes up to its quota; leftovers only fill remaining slots. A query
/// that contains, or is contained in, an earlier one (ignoring case) is
/// dropped.
pub fn extract_queries(
    report: &IterationReport,
    guidance: Option<&str>,
    max_queries: usize,
) -> Vec<String> {
    let mut gaps: Vec<_> = report.gaps.iter().filter(|g| !g.resolved).collect();
    // Stable: first-seen order within a severity
    gaps.sort_by(|a, b| b.severity.cmp(&a.severity));
    let gaps: Vec<&str> = gaps.iter().map(|g| g.title.as_str()).collect();

    let ideas: Vec<&str> = report.hypotheses.iter().map(|h| h.title.as_str()).collect();
    let directions: Vec<&str> = report
        .directions
        .iter()
        .filter(|d| d.potential == Potential::High)
        .map(|d| d.direction.as_str())
        .collect();
    let connections: Vec<&str> = report
        .connections
        .iter()
        .map(|c| c.target_field.as_str())
        .collect();

    let categories = [
        (gaps.as_slice(), GAP_QUOTA),
        (ideas.as_slice(), IDEA_QUOTA),
        (directions.as_slice(), DIRECTION_QUOTA),
        (connections.as_slice(), CONNECTION_QUOTA),
    ];

    let mut candidates: Vec<&str> = guidance.into_iter().collect();
    for (entries, quota) in &categories {
        candidates.extend(entries.iter().take(*quota));
    }
    for (entries, quota) in &categories {
        candidates.extend(entries.iter().skip(*quota));
    }

    let mut queries: Vec<String> = Vec::new();
    for candidate in candidates {
        if queries.len() >= max_queries {
            break;
        }
        let query = shorten(candidate);
        if query.is_empty() || queries.iter().any(|q| loosely_matches(q, &query)) {
            continue;
        }
        queries.push(query);
    }
    queries
}

/// Trim punctuation and keep at most [`MAX_QUERY_WORDS`] words
pub fn shorten(text: &str) -> String {
    text.split_whitespace()
        .map(|w| w.trim_matches(|c: char| matches!(c, '"' | '\'' | ',' | '.' | ';' | ':')))
        .filter(|w| !w.is_empty())
        .take(MAX_QUERY_WORDS)
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::{Connection, Direction, Gap, Hypothesis, Impact, Severity};

    fn gap(title: &str, severity: Severity) -> Gap {
        Gap {
            title: title.to_string(),
            description: String::new(),
            field: String::new(),
            severity,
            resolved: false,
        }
    }

    fn report() -> IterationReport {
        IterationReport {
            gaps: vec![
                gap("Low priority benchmark drift", Severity::Low),
                gap("Membrane protein folding", Severity::Critical),
                gap("Missing wet-lab validation", Severity::High),
                gap("Another critical question", Severity::Critical),
            ],
            hypotheses: vec![Hypothesis {
                title: "Attention maps encode residue contacts".to_string(),
                description: String::new(),
                rationale: String::new(),
                impact: Impact::Significant,
            }],
            directions: vec![
                Direction {
                    direction: "Diffusion models for protein design".to_string(),
                    potential: Potential::High,
                    rationale: String::new(),
                },
                Direction {
                    direction: "Quantum annealing".to_string(),
                    potential: Potential::Low,
                    rationale: String::new(),
                },
            ],
            connections: vec![Connection {
                source_field: "Biology".to_string(),
                target_field: "Statistical physics".to_string(),
                description: String::new(),
            }],
            ..IterationReport::default()
        }
    }

    #[test]
    fn test_priority_order_and_cap() {
        let queries = extract_queries(&report(), None, 5);
        assert_eq!(
            queries,
            vec![
                "Membrane protein folding",
                "Another critical question",
                "Attention maps encode residue contacts",
                "Diffusion models for protein design",
                "Statistical physics",
            ]
        );
    }

    #[test]
    fn test_guidance_comes_first() {
        let queries = extract_queries(&report(), Some("cryo-EM"), 2);
        assert_eq!(queries, vec!["cryo-EM", "Membrane protein folding"]);
    }

    #[test]
    fn test_near_duplicates_keep_first() {
        let queries = extract_queries(&report(), Some("membrane protein"), 3);
        assert_eq!(queries[0], "membrane protein");
        assert!(!queries.iter().any(|q| q == "Membrane protein folding"));
        assert_eq!(queries.len(), 3);
    }

    #[test]
    fn test_resolved_gaps_skipped() {
        let mut report = report();
        for g in &mut report.gaps {
            g.resolved = true;
        }
        let queries = extract_queries(&report, None, 5);
        assert_eq!(queries[0], "Attention maps encode residue contacts");
    }

    #[test]
    fn test_shorten() {
        assert_eq!(
            shorten("\"one two three four five six seven eight nine ten.\""),
            "one two three four five six seven eight"
        );
        assert_eq!(shorten("  "), "");
    }

    #[test]
    fn test_empty_report_yields_no_queries() {
        assert!(extract_queries(&IterationReport::default(), None, 5).is_empty());
    }
}
