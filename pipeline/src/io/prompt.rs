//! Agent prompts rendered from minijinja templates under a byte budget.
//!
//! Templates mark sections with `<!-- section:KEY required|droppable -->`.
//! When the rendered prompt exceeds the budget, droppable sections are removed
//! starting from the end of the document, then the last section is truncated.

use std::sync::LazyLock;

use anyhow::{Context, Result};
use minijinja::Environment;
use regex::Regex;
use serde::Serialize;
use tracing::debug;

static SECTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<!--\s*section:(\w+)\s+(required|droppable)\s*-->")
        .expect("section regex is valid")
});

const TRUNCATION_MARKER: &str = "\n[truncated]";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptTemplate {
    Architect,
    Coder,
    Fixer,
    Delta,
    Explore,
    Report,
}

impl PromptTemplate {
    const ALL: [PromptTemplate; 6] = [
        PromptTemplate::Architect,
        PromptTemplate::Coder,
        PromptTemplate::Fixer,
        PromptTemplate::Delta,
        PromptTemplate::Explore,
        PromptTemplate::Report,
    ];

    pub fn name(self) -> &'static str {
        match self {
            PromptTemplate::Architect => "architect",
            PromptTemplate::Coder => "coder",
            PromptTemplate::Fixer => "fixer",
            PromptTemplate::Delta => "delta",
            PromptTemplate::Explore => "explore",
            PromptTemplate::Report => "report",
        }
    }

    fn source(self) -> &'static str {
        match self {
            PromptTemplate::Architect => include_str!("prompts/architect.md"),
            PromptTemplate::Coder => include_str!("prompts/coder.md"),
            PromptTemplate::Fixer => include_str!("prompts/fixer.md"),
            PromptTemplate::Delta => include_str!("prompts/delta.md"),
            PromptTemplate::Explore => include_str!("prompts/explore.md"),
            PromptTemplate::Report => include_str!("prompts/report.md"),
        }
    }
}

pub struct PromptEngine {
    env: Environment<'static>,
    budget_bytes: usize,
}

impl PromptEngine {
    pub fn new(budget_bytes: usize) -> Result<Self> {
        let mut env = Environment::new();
        for template in PromptTemplate::ALL {
            env.add_template(template.name(), template.source())
                .with_context(|| format!("load prompt template {}", template.name()))?;
        }
        Ok(Self { env, budget_bytes })
    }

    pub fn render<C: Serialize>(&self, template: PromptTemplate, ctx: C) -> Result<String> {
        let rendered = self
            .env
            .get_template(template.name())?
            .render(ctx)
            .with_context(|| format!("render prompt template {}", template.name()))?;
        let mut sections = parse_sections(&rendered);
        apply_budget(&mut sections, self.budget_bytes);
        Ok(join_sections(&sections))
    }
}

#[derive(Debug, Clone)]
struct Section {
    key: String,
    required: bool,
    content: String,
}

fn parse_sections(rendered: &str) -> Vec<Section> {
    let markers: Vec<_> = SECTION_RE.captures_iter(rendered).collect();
    let mut sections = Vec::with_capacity(markers.len());
    for (idx, caps) in markers.iter().enumerate() {
        let (Some(whole), Some(key), Some(kind)) = (caps.get(0), caps.get(1), caps.get(2)) else {
            continue;
        };
        let end = markers
            .get(idx + 1)
            .and_then(|next| next.get(0))
            .map_or(rendered.len(), |m| m.start());
        let content = rendered[whole.end()..end].trim().to_string();
        let required = kind.as_str() == "required";
        if !content.is_empty() || required {
            sections.push(Section {
                key: key.as_str().to_string(),
                required,
                content,
            });
        }
    }
    sections
}

fn total_len(sections: &[Section]) -> usize {
    sections.iter().map(|s| s.content.len()).sum()
}

fn apply_budget(sections: &mut Vec<Section>, budget: usize) {
    while total_len(sections) > budget {
        let Some(idx) = sections.iter().rposition(|s| !s.required) else {
            break;
        };
        let dropped = sections.remove(idx);
        debug!(
            section = %dropped.key,
            bytes_dropped = dropped.content.len(),
            "dropped prompt section for budget"
        );
    }

    let total = total_len(sections);
    let Some(last) = sections.last_mut() else {
        return;
    };
    if total <= budget {
        return;
    }
    let others = total - last.content.len();
    let allowed = budget.saturating_sub(others);
    let keep = floor_char_boundary(
        &last.content,
        allowed.saturating_sub(TRUNCATION_MARKER.len()),
    );
    let before = last.content.len();
    last.content.truncate(keep);
    last.content.push_str(TRUNCATION_MARKER);
    debug!(section = %last.key, before, after = last.content.len(), "truncated prompt section");
}

fn floor_char_boundary(text: &str, mut idx: usize) -> usize {
    idx = idx.min(text.len());
    while !text.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

fn join_sections(sections: &[Section]) -> String {
    sections
        .iter()
        .map(|s| s.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use minijinja::context;

    use crate::core::types::{HuntStage, StageFindings};
    use crate::test_support::subtask;

    fn engine(budget: usize) -> PromptEngine {
        PromptEngine::new(budget).expect("templates load")
    }

    #[test]
    fn coder_prompt_embeds_subtask_context() {
        let mut item = subtask("P1.M1.T1.S1", &[]);
        item.context_scope = "touch src/parser.rs only".to_string();
        let prompt = engine(50_000)
            .render(
                PromptTemplate::Coder,
                context! { subtask => item, dependencies => Vec::<String>::new() },
            )
            .expect("render");

        assert!(prompt.starts_with("### Implementer Contract"));
        assert!(prompt.contains(r#"<subtask id="P1.M1.T1.S1""#));
        assert!(prompt.contains("touch src/parser.rs only"));
        assert!(!prompt.contains("### Completed Dependencies"));
    }

    /// Earlier findings are the first thing dropped under a tight budget.
    #[test]
    fn droppable_sections_go_before_required_ones() {
        let previous = vec![StageFindings {
            stage: HuntStage::ScopeAnalysis,
            findings: "x".repeat(4_000),
        }];
        let prompt = engine(1_500)
            .render(
                PromptTemplate::Explore,
                context! {
                    stage => HuntStage::ScenarioTesting.as_str(),
                    requirements => "# PRD",
                    previous => previous,
                },
            )
            .expect("render");

        assert!(!prompt.contains("### Earlier Findings"));
        assert!(prompt.contains("### Bug Hunt: scenario_testing"));
        assert!(prompt.contains("# PRD"));
    }

    #[test]
    fn oversized_required_section_is_truncated() {
        let prompt = engine(800)
            .render(
                PromptTemplate::Architect,
                context! { requirements => "é".repeat(2_000) },
            )
            .expect("render");
        assert!(prompt.len() <= 800 + "\n\n".len());
        assert!(prompt.ends_with("[truncated]"));
    }

    #[test]
    fn every_template_parses_into_sections() {
        for template in PromptTemplate::ALL {
            let rendered = template.source();
            assert!(
                parse_sections(rendered).iter().any(|s| s.key == "contract"),
                "{} has a contract section",
                template.name()
            );
        }
    }
}
