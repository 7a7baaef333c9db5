//! Expression context - the values visible to `${{ }}` expressions

use crate::core::{
    expression::{Expression, ExpressionError, Resolver},
    matrix::MatrixCombination,
    trigger::Event,
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::OnceLock;

/// Values available while rendering templates and evaluating guards
///
/// Keys are full dotted paths: `github.ref`, `matrix.toolchain`, `env.CARGO_TERM_COLOR`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExpressionContext {
    values: HashMap<String, String>,
}

fn template_regex() -> &'static Regex {
    static TEMPLATE: OnceLock<Regex> = OnceLock::new();
    TEMPLATE.get_or_init(|| Regex::new(r"\$\{\{(.*?)\}\}").expect("template regex is valid"))
}

impl ExpressionContext {
    /// Create a new empty context
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the `github.*` values for a workflow run triggered by `event`
    pub fn for_event(workflow: &str, event: &Event) -> Self {
        let mut ctx = Self::new();
        ctx.set("github.workflow", workflow);
        ctx.set("github.event_name", event.name());
        ctx.set("github.ref", &event.git_ref());
        ctx.set("github.ref_name", &event.ref_name());
        ctx.set("github.ref_type", event.ref_type());
        if let Some(sha) = event.sha() {
            ctx.set("github.sha", sha);
        }
        if let Event::PullRequest {
            action,
            number,
            head_ref,
            base_ref,
            ..
        } = event
        {
            ctx.set("github.head_ref", head_ref);
            ctx.set("github.base_ref", base_ref);
            ctx.set("github.event.action", action);
            ctx.set("github.event.number", &number.to_string());
            ctx.set("github.event.pull_request.number", &number.to_string());
        }
        ctx
    }

    /// Set a value
    pub fn set(&mut self, path: &str, value: &str) {
        self.values.insert(path.to_string(), value.to_string());
    }

    /// Get a value
    pub fn get(&self, path: &str) -> Option<&String> {
        self.values.get(path)
    }

    /// Expose a matrix combination as `matrix.<axis>`
    pub fn with_matrix(mut self, combination: &MatrixCombination) -> Self {
        for (axis, value) in combination {
            self.set(&format!("matrix.{}", axis), value);
        }
        self
    }

    /// Expose environment variables as `env.<NAME>`
    pub fn with_env(mut self, env: &BTreeMap<String, String>) -> Self {
        for (key, value) in env {
            self.set(&format!("env.{}", key), value);
        }
        self
    }

    /// Render every `${{ expr }}` occurrence in a template
    pub fn render(&self, template: &str) -> Result<String, ExpressionError> {
        if !template.contains("${{") {
            return Ok(template.to_string());
        }

        let mut rendered = String::with_capacity(template.len());
        let mut last = 0;
        for capture in template_regex().captures_iter(template) {
            let (Some(whole), Some(inner)) = (capture.get(0), capture.get(1)) else {
                continue;
            };
            rendered.push_str(&template[last..whole.start()]);
            let value = Expression::parse(inner.as_str())?.evaluate(self);
            rendered.push_str(&value.to_string());
            last = whole.end();
        }
        rendered.push_str(&template[last..]);

        Ok(rendered)
    }

    /// Render every value of a map
    pub fn render_map(
        &self,
        map: &BTreeMap<String, String>,
    ) -> Result<BTreeMap<String, String>, ExpressionError> {
        map.iter()
            .map(|(k, v)| Ok((k.clone(), self.render(v)?)))
            .collect()
    }
}

impl Resolver for ExpressionContext {
    fn resolve(&self, path: &str) -> Option<String> {
        self.values.get(path).cloned()
    }
}
