// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! System prompt assembly.
//!
//! The system prompt is never stored in history; it is rebuilt for every
//! formatting call from the caller's dynamic [`PromptContext`].

use std::collections::BTreeMap;

/// Dynamic values available while building a system prompt.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PromptContext {
    /// Values substituted into `{{name}}` placeholders.
    pub values: BTreeMap<String, String>,
    /// Extra paragraphs appended after the template.
    pub additions: Vec<String>,
}

impl PromptContext {
    /// Create an empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a placeholder value.
    pub fn with_value(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    /// Append a paragraph.
    pub fn with_addition(mut self, text: impl Into<String>) -> Self {
        self.additions.push(text.into());
        self
    }
}

/// Produces the system prompt for one formatting call.
pub trait SystemPromptBuilder: Send + Sync {
    fn build(&self, context: &PromptContext) -> String;
}

impl<F> SystemPromptBuilder for F
where
    F: Fn(&PromptContext) -> String + Send + Sync,
{
    fn build(&self, context: &PromptContext) -> String {
        self(context)
    }
}

/// Template-based prompt builder.
///
/// `{{name}}` placeholders are replaced by context values; unknown placeholders
/// render as empty strings. Context additions follow as separate paragraphs.
#[derive(Debug, Clone)]
pub struct TemplatePromptBuilder {
    template: String,
}

impl TemplatePromptBuilder {
    /// Create a builder from a template.
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
        }
    }

    /// The raw template.
    pub fn template(&self) -> &str {
        &self.template
    }

    fn render(&self, values: &BTreeMap<String, String>) -> String {
        let mut output = String::with_capacity(self.template.len());
        let mut rest = self.template.as_str();

        while let Some(open) = rest.find("{{") {
            output.push_str(&rest[..open]);
            let after_open = &rest[open + 2..];
            match after_open.find("}}") {
                Some(close) => {
                    let key = after_open[..close].trim();
                    if let Some(value) = values.get(key) {
                        output.push_str(value);
                    }
                    rest = &after_open[close + 2..];
                }
                None => {
                    // Unterminated placeholder is literal text
                    output.push_str(&rest[open..]);
                    rest = "";
                }
            }
        }
        output.push_str(rest);
        output
    }
}

impl Default for TemplatePromptBuilder {
    fn default() -> Self {
        Self::new("You are a helpful assistant.")
    }
}

impl SystemPromptBuilder for TemplatePromptBuilder {
    fn build(&self, context: &PromptContext) -> String {
        let mut prompt = self.render(&context.values).trim_end().to_string();
        for addition in &context.additions {
            let addition = addition.trim();
            if addition.is_empty() {
                continue;
            }
            if !prompt.is_empty() {
                prompt.push_str("\n\n");
            }
            prompt.push_str(addition);
        }
        prompt
    }
}
