//! One-line summaries of tool calls for `tool` frames.
//!
//! Each tool name maps to an extractor that pulls the interesting argument out
//! of the call's JSON. Unregistered tools fall back to the compact JSON of
//! their arguments. Every summary is kept on one line.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

/// Pulls a summary out of a tool call's arguments.
pub type SummaryFn = Arc<dyn Fn(&Value) -> Option<String> + Send + Sync>;

/// Fallback summaries are cut to this many characters.
pub const FALLBACK_SUMMARY_CHARS: usize = 200;

/// Registry of per-tool summary extractors
#[derive(Clone)]
pub struct ToolSummaries {
    extractors: HashMap<String, SummaryFn>,
}

impl ToolSummaries {
    /// An empty registry: every tool uses the JSON fallback.
    pub fn empty() -> Self {
        Self {
            extractors: HashMap::new(),
        }
    }

    /// Register a custom extractor, replacing any existing one.
    pub fn register<F>(&mut self, tool: impl Into<String>, extract: F)
    where
        F: Fn(&Value) -> Option<String> + Send + Sync + 'static,
    {
        self.extractors.insert(tool.into(), Arc::new(extract));
    }

    /// Summarize `tool` by one of its arguments.
    pub fn register_field(&mut self, tool: impl Into<String>, field: &'static str) {
        self.register(tool, move |args| field_value(args, field));
    }

    pub fn is_registered(&self, tool: &str) -> bool {
        self.extractors.contains_key(tool)
    }

    /// Single-line summary of a call's arguments.
    pub fn summarize(&self, tool: &str, args: &Value) -> String {
        let summary = self
            .extractors
            .get(tool)
            .and_then(|extract| extract(args))
            .unwrap_or_else(|| fallback_summary(args));
        escape_control(&summary)
    }

    /// Payload of a `tool` frame: `"<tool>: <summary>"`, or just the name
    /// when there is nothing to summarize.
    pub fn describe(&self, tool: &str, args: &Value) -> String {
        let summary = self.summarize(tool, args);
        if summary.is_empty() {
            tool.to_string()
        } else {
            format!("{}: {}", tool, summary)
        }
    }
}

impl Default for ToolSummaries {
    fn default() -> Self {
        let mut registry = Self::empty();
        for tool in ["bash", "posix_shell"] {
            registry.register_field(tool, "command");
        }
        for tool in ["read_file", "write_file", "edit_file", "read", "write", "edit", "list"] {
            registry.register_field(tool, "path");
        }
        for tool in ["glob", "grep"] {
            registry.register_field(tool, "pattern");
        }
        registry.register_field("activate_skill", "name");
        registry
    }
}

impl fmt::Debug for ToolSummaries {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut tools: Vec<&str> = self.extractors.keys().map(String::as_str).collect();
        tools.sort_unstable();
        f.debug_struct("ToolSummaries").field("tools", &tools).finish()
    }
}

fn field_value(args: &Value, field: &str) -> Option<String> {
    match args.get(field)? {
        Value::String(s) => Some(s.clone()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

fn fallback_summary(args: &Value) -> String {
    match args {
        Value::Null => String::new(),
        Value::Object(map) if map.is_empty() => String::new(),
        other => truncate_chars(&other.to_string(), FALLBACK_SUMMARY_CHARS),
    }
}

/// Escape newlines and tabs so the summary renders on one line.
pub fn escape_control(s: &str) -> String {
    if !s.contains(['\n', '\t']) {
        return s.to_string();
    }
    s.replace('\n', "\\n").replace('\t', "\\t")
}

/// Truncate a string to `max` characters, appending "..." if truncated.
/// Operates on Unicode char boundaries, not bytes.
pub fn truncate_chars(s: &str, max: usize) -> String {
    let mut chars = s.chars();
    let truncated: String = chars.by_ref().take(max).collect();
    if chars.next().is_some() {
        format!("{}...", truncated)
    } else {
        truncated
    }
}
