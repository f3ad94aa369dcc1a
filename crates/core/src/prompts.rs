//! Default prompt templates bundled at compile time.
//!
//! One system prompt per research agent plus the plausibility reviewer.

/// Paper Analyzer - per-paper findings, methods and limitations
pub const PAPER_ANALYZER: &str = include_str!("defaults/paper_analyzer.md");

/// Gap Detector - open problems with field and severity
pub const GAP_DETECTOR: &str = include_str!("defaults/gap_detector.md");

/// Hypothesis Generator - testable ideas that close gaps
pub const HYPOTHESIS_GENERATOR: &str = include_str!("defaults/hypothesis_generator.md");

/// Cross-Domain Mapper - transferable techniques from other fields
pub const CROSS_DOMAIN_MAPPER: &str = include_str!("defaults/cross_domain_mapper.md");

/// Experiment Designer - concrete studies for hypotheses
pub const EXPERIMENT_DESIGNER: &str = include_str!("defaults/experiment_designer.md");

/// Trend Forecaster - emerging directions with potential
pub const TREND_FORECASTER: &str = include_str!("defaults/trend_forecaster.md");

/// Plausibility Checker - novelty, evidence and feasibility verdicts
pub const PLAUSIBILITY_CHECKER: &str = include_str!("defaults/plausibility_checker.md");

/// All default prompts with their slugs
pub fn all_defaults() -> Vec<(&'static str, &'static str)> {
    vec![
        ("paper_analyzer", PAPER_ANALYZER),
        ("gap_detector", GAP_DETECTOR),
        ("hypothesis_generator", HYPOTHESIS_GENERATOR),
        ("cross_domain_mapper", CROSS_DOMAIN_MAPPER),
        ("experiment_designer", EXPERIMENT_DESIGNER),
        ("trend_forecaster", TREND_FORECASTER),
        ("plausibility_checker", PLAUSIBILITY_CHECKER),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_prompts_non_empty() {
        for (slug, content) in all_defaults() {
            assert!(!content.is_empty(), "Prompt '{}' should not be empty", slug);
            assert!(content.len() > 50, "Prompt '{}' seems too short", slug);
        }
    }

    #[test]
    fn test_prompts_request_json() {
        for (slug, content) in all_defaults() {
            assert!(content.contains("```json"), "Prompt '{}' should show its JSON shape", slug);
        }
    }

    #[test]
    fn test_prompt_count() {
        assert_eq!(all_defaults().len(), 7, "Should have 7 default prompts");
    }
}
