//! System prompt assembly
//!
//! The prompt is built fresh for every turn from the configured base prompt,
//! the theme context configured for the requested model, the caller's design
//! context and any remembered context.

use std::collections::HashMap;

/// Base prompt used when the configuration does not supply one
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant embedded in a personal portfolio. \
Answer concisely. When a tool can answer a question or perform an action, call it instead of guessing, \
and explain the outcome to the user afterwards.";

/// Inputs for one turn's system prompt
#[derive(Debug, Clone, Default)]
pub struct PromptContext<'a> {
    pub model: &'a str,
    pub theme_context: Option<&'a str>,
    pub memory_context: Option<&'a str>,
}

/// Builds system prompts from configured pieces
#[derive(Debug, Clone)]
pub struct SystemPromptBuilder {
    base: String,
    theme_contexts: HashMap<String, String>,
}

impl Default for SystemPromptBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_SYSTEM_PROMPT, HashMap::new())
    }
}

impl SystemPromptBuilder {
    pub fn new(base: impl Into<String>, theme_contexts: HashMap<String, String>) -> Self {
        Self {
            base: base.into(),
            theme_contexts,
        }
    }

    pub fn build(&self, ctx: &PromptContext<'_>) -> String {
        let mut prompt = self.base.clone();

        if let Some(theme) = self.theme_contexts.get(ctx.model) {
            prompt.push_str(theme);
        }

        if let Some(design) = ctx.theme_context.filter(|s| !s.trim().is_empty()) {
            prompt.push_str("\n\n## Current Design Context\n");
            prompt.push_str(design);
        }

        if let Some(memory) = ctx.memory_context.filter(|s| !s.trim().is_empty()) {
            prompt.push_str("\n\n## Memory Context\n");
            prompt.push_str(memory);
        }

        prompt
    }
}
