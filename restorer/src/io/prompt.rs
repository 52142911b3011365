//! Prompt rendering for scheduling requests.

use anyhow::Result;
use minijinja::{Environment, context};

use crate::core::types::Subtask;

const ORDER_RETRIEVAL_TEMPLATE: &str = include_str!("prompts/order_retrieval.md");
const ORDER_INSIGHT_TEMPLATE: &str = include_str!("prompts/order_insight.md");
const ORDER_FINAL_TEMPLATE: &str = include_str!("prompts/order_final.md");

/// Template engine wrapper around minijinja.
pub struct PromptEngine {
    env: Environment<'static>,
}

impl PromptEngine {
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.add_template("order_retrieval", ORDER_RETRIEVAL_TEMPLATE)
            .expect("order_retrieval template should be valid");
        env.add_template("order_insight", ORDER_INSIGHT_TEMPLATE)
            .expect("order_insight template should be valid");
        env.add_template("order_final", ORDER_FINAL_TEMPLATE)
            .expect("order_final template should be valid");
        Self { env }
    }

    /// Ordering prompt seeded with distilled experience from past runs.
    pub fn render_order_retrieval(
        &self,
        agenda: &[Subtask],
        experience: &str,
        avoid_first: &[Subtask],
    ) -> Result<String> {
        let template = self.env.get_template("order_retrieval")?;
        let rendered = template.render(context! {
            degradations => degradation_names(agenda),
            agenda => subtask_names(agenda),
            experience => experience.trim(),
            avoid_first => non_empty(avoid_first),
        })?;
        Ok(rendered)
    }

    /// First half of the no-experience flow: ask for an analysis of task relations.
    pub fn render_order_insight(&self, agenda: &[Subtask]) -> Result<String> {
        let template = self.env.get_template("order_insight")?;
        let rendered = template.render(context! {
            degradations => degradation_names(agenda),
            agenda => subtask_names(agenda),
        })?;
        Ok(rendered)
    }

    /// Second half of the no-experience flow: order based on the insight.
    pub fn render_order_final(
        &self,
        agenda: &[Subtask],
        insight: &str,
        avoid_first: &[Subtask],
    ) -> Result<String> {
        let template = self.env.get_template("order_final")?;
        let rendered = template.render(context! {
            degradations => degradation_names(agenda),
            agenda => subtask_names(agenda),
            insight => insight.trim(),
            avoid_first => non_empty(avoid_first),
        })?;
        Ok(rendered)
    }
}

impl Default for PromptEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn subtask_names(agenda: &[Subtask]) -> Vec<String> {
    agenda.iter().map(|s| s.to_string()).collect()
}

fn degradation_names(agenda: &[Subtask]) -> Vec<&'static str> {
    agenda.iter().map(|s| s.degradation().as_str()).collect()
}

fn non_empty(avoid_first: &[Subtask]) -> Option<Vec<String>> {
    (!avoid_first.is_empty()).then(|| subtask_names(avoid_first))
}
