//! Default research agent set: six model-backed analysts and a local report
//! compiler.
//!
//! ```text
//! paper_analyzer ──▶ gap_detector ──┬──▶ hypothesis_generator ──▶ experiment_designer ──┐
//!        │                          ├──▶ cross_domain_mapper ───────────────────────────┤
//!        └──────────────────────────┴──▶ trend_forecaster ──────────────────────────────┴──▶ report_compiler
//! ```

use anyhow::Result;
use serde_json::json;

use super::{AgentRegistry, AgentTask, TaskContext, TaskKind};
use crate::items::digest;
use crate::llm::{CallOptions, ChatMessage, ModelRequest};
use crate::prompts;
use crate::report::{Impact, IterationReport, Severity, COMPILED_REPORT_ID};

pub const PAPER_ANALYZER: &str = "paper_analyzer";
pub const GAP_DETECTOR: &str = "gap_detector";
pub const HYPOTHESIS_GENERATOR: &str = "hypothesis_generator";
pub const CROSS_DOMAIN_MAPPER: &str = "cross_domain_mapper";
pub const EXPERIMENT_DESIGNER: &str = "experiment_designer";
pub const TREND_FORECASTER: &str = "trend_forecaster";

/// Characters of each paper's content included in prompts
const CONTENT_CHARS: usize = 1500;

/// A remote task driven by a bundled system prompt.
///
/// The user turn carries the batch digest, every available upstream output
/// and the research focus, followed by the task's instruction.
#[derive(Debug, Clone)]
pub struct PromptTask {
    id: String,
    depends_on: Vec<String>,
    system_prompt: &'static str,
    instruction: String,
    options: CallOptions,
}

impl PromptTask {
    pub fn new(id: impl Into<String>, system_prompt: &'static str) -> Self {
        Self {
            id: id.into(),
            depends_on: Vec::new(),
            system_prompt,
            instruction: "Respond with the JSON object described in your instructions.".to_string(),
            options: CallOptions::default(),
        }
    }

    pub fn after(mut self, deps: &[&str]) -> Self {
        self.depends_on = deps.iter().map(|d| d.to_string()).collect();
        self
    }

    pub fn with_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.instruction = instruction.into();
        self
    }

    pub fn with_options(mut self, temperature: f32, max_tokens: u32) -> Self {
        self.options = CallOptions {
            temperature,
            max_tokens,
        };
        self
    }
}

impl AgentTask for PromptTask {
    fn id(&self) -> &str {
        &self.id
    }

    fn depends_on(&self) -> &[String] {
        &self.depends_on
    }

    fn build_request(&self, ctx: &TaskContext<'_>) -> ModelRequest {
        let mut sections = vec![format!("## Papers\n\n{}", digest(ctx.items, CONTENT_CHARS))];

        for dep in &self.depends_on {
            if let Some(value) = ctx.output(dep) {
                let rendered = serde_json::to_string_pretty(value).unwrap_or_default();
                sections.push(format!("## Output of {}\n\n```json\n{}\n```", dep, rendered));
            }
        }

        if let Some(guidance) = ctx.guidance.filter(|g| !g.trim().is_empty()) {
            sections.push(format!("## Research focus\n\n{}", guidance.trim()));
        }

        sections.push(self.instruction.clone());

        ModelRequest {
            system_prompt: self.system_prompt.to_string(),
            messages: vec![ChatMessage::user(sections.join("\n\n"))],
            options: self.options,
        }
    }
}

/// Local task that compiles upstream outputs into the iteration summary
#[derive(Debug, Clone)]
pub struct ReportCompiler {
    depends_on: Vec<String>,
}

impl ReportCompiler {
    pub fn new(deps: &[&str]) -> Self {
        Self {
            depends_on: deps.iter().map(|d| d.to_string()).collect(),
        }
    }
}

impl AgentTask for ReportCompiler {
    fn id(&self) -> &str {
        COMPILED_REPORT_ID
    }

    fn depends_on(&self) -> &[String] {
        &self.depends_on
    }

    fn kind(&self) -> TaskKind {
        TaskKind::Local
    }

    fn synthesize(&self, ctx: &TaskContext<'_>) -> Result<serde_json::Value> {
        let report = IterationReport::from_outputs(ctx.outputs);
        let unavailable: Vec<&str> = self
            .depends_on
            .iter()
            .filter(|d| ctx.output(d).is_none())
            .map(String::as_str)
            .collect();

        let severe_gaps = report
            .gaps
            .iter()
            .filter(|g| g.severity >= Severity::High)
            .count();
        let breakthroughs = report
            .hypotheses
            .iter()
            .filter(|h| h.impact == Impact::Breakthrough)
            .count();

        let mut summary = format!(
            "Analyzed {} papers: {} gaps ({} high or critical), {} hypotheses ({} breakthrough), {} cross-domain connections, {} experiments, {} emerging directions.",
            ctx.items.len(),
            report.gaps.len(),
            severe_gaps,
            report.hypotheses.len(),
            breakthroughs,
            report.connections.len(),
            report.experiments.len(),
            report.directions.len(),
        );
        if !report.summary.is_empty() {
            summary.push(' ');
            summary.push_str(&report.summary);
        }
        if !unavailable.is_empty() {
            summary.push_str(&format!(" Unavailable: {}.", unavailable.join(", ")));
        }

        let top_hypotheses: Vec<&str> = report
            .hypotheses
            .iter()
            .take(3)
            .map(|h| h.title.as_str())
            .collect();

        Ok(json!({
            "summary": summary,
            "counts": {
                "papers": ctx.items.len(),
                "gaps": report.gaps.len(),
                "hypotheses": report.hypotheses.len(),
                "connections": report.connections.len(),
                "experiments": report.experiments.len(),
                "directions": report.directions.len(),
            },
            "top_hypotheses": top_hypotheses,
            "unavailable": unavailable,
        }))
    }
}

/// The default research pipeline
pub fn research_pipeline() -> Result<AgentRegistry> {
    AgentRegistry::new()
        .with(PromptTask::new(PAPER_ANALYZER, prompts::PAPER_ANALYZER).with_options(0.3, 4096))?
        .with(
            PromptTask::new(GAP_DETECTOR, prompts::GAP_DETECTOR)
                .after(&[PAPER_ANALYZER])
                .with_options(0.5, 3072),
        )?
        .with(
            PromptTask::new(HYPOTHESIS_GENERATOR, prompts::HYPOTHESIS_GENERATOR)
                .after(&[PAPER_ANALYZER, GAP_DETECTOR])
                .with_options(0.8, 3072),
        )?
        .with(
            PromptTask::new(CROSS_DOMAIN_MAPPER, prompts::CROSS_DOMAIN_MAPPER)
                .after(&[GAP_DETECTOR])
                .with_options(0.8, 2048),
        )?
        .with(
            PromptTask::new(EXPERIMENT_DESIGNER, prompts::EXPERIMENT_DESIGNER)
                .after(&[HYPOTHESIS_GENERATOR])
                .with_options(0.5, 3072),
        )?
        .with(
            PromptTask::new(TREND_FORECASTER, prompts::TREND_FORECASTER)
                .after(&[PAPER_ANALYZER, GAP_DETECTOR])
                .with_options(0.6, 2048),
        )?
        .with(ReportCompiler::new(&[
            PAPER_ANALYZER,
            GAP_DETECTOR,
            HYPOTHESIS_GENERATOR,
            CROSS_DOMAIN_MAPPER,
            EXPERIMENT_DESIGNER,
            TREND_FORECASTER,
        ]))
}
