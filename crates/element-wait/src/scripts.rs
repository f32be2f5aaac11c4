//! Browser-side scripts used when native lookups are unavailable.
//!
//! Every script returns either a node reference or `null`. Callers treat a
//! script exception the same as `null`.
//!
//! [`TextFilter`] is the Rust reading of the `:contains(...)` suffix the
//! query scripts understand; the mock session filters with it so tests see
//! the same matches a browser would.

use regex::Regex;
use std::sync::OnceLock;

use crate::translator::{css_unescape, exact_text, static_regex};

/// Read `arguments[0].shadowRoot`
pub const SHADOW_ROOT_SCRIPT: &str = "return arguments[0].shadowRoot;";

/// `querySelector` from `arguments[1]` (or the document) for the CSS in
/// `arguments[0]`.
///
/// A trailing `:contains("text")` filters on text content; `^text$`
/// requires an exact trimmed match. Backslash escapes in the text are
/// undone before matching.
pub const QUERY_SELECTOR_SCRIPT: &str = r#"var selector = arguments[0];
var root = arguments[1] || document;
var match = /^(.*):contains\((["'])(.*)\2\)$/.exec(selector);
var base = match ? (match[1] || '*') : selector;
var needle = match ? match[3].replace(/\\(.)/g, '$1') : '';
var exact = needle.length > 1 && needle.charAt(0) === '^' && needle.charAt(needle.length - 1) === '$';
var nodes = root.querySelectorAll(base);
for (var i = 0; i < nodes.length; i++) {
  if (!match) { return nodes[i]; }
  var text = (nodes[i].textContent || '').trim();
  if (exact ? text === needle.slice(1, -1) : text.indexOf(needle) !== -1) {
    return nodes[i];
  }
}
return null;"#;

/// Same as [`QUERY_SELECTOR_SCRIPT`] but returns every match
pub const QUERY_SELECTOR_ALL_SCRIPT: &str = r#"var selector = arguments[0];
var root = arguments[1] || document;
var match = /^(.*):contains\((["'])(.*)\2\)$/.exec(selector);
var base = match ? (match[1] || '*') : selector;
var needle = match ? match[3].replace(/\\(.)/g, '$1') : '';
var exact = needle.length > 1 && needle.charAt(0) === '^' && needle.charAt(needle.length - 1) === '$';
var nodes = root.querySelectorAll(base);
var found = [];
for (var i = 0; i < nodes.length; i++) {
  if (!match) { found.push(nodes[i]); continue; }
  var text = (nodes[i].textContent || '').trim();
  if (exact ? text === needle.slice(1, -1) : text.indexOf(needle) !== -1) {
    found.push(nodes[i]);
  }
}
return found;"#;

/// `document.readyState`
pub const READY_STATE_SCRIPT: &str = "return document.readyState;";

/// Whether a CSS selector needs the scripted query path
#[must_use]
pub fn needs_scripted_query(css: &str) -> bool {
    css.contains(":contains(")
}

fn contains_suffix() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    static_regex(
        &CELL,
        r#"^(?P<base>.*):contains\((?:"(?P<dq>.*)"|'(?P<sq>.*)')\)$"#,
    )
}

/// A selector split into its CSS part and trailing text filter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextFilter {
    base: String,
    needle: String,
}

impl TextFilter {
    /// Split `selector` the way the query scripts do; `None` when it has no
    /// quoted trailing `:contains(...)`
    #[must_use]
    pub fn parse(selector: &str) -> Option<Self> {
        let caps = contains_suffix().captures(selector)?;
        let raw = caps.name("dq").or_else(|| caps.name("sq"))?.as_str();
        let base = caps.name("base").map_or("", |m| m.as_str());
        Some(Self {
            base: if base.is_empty() { "*" } else { base }.to_string(),
            needle: css_unescape(raw),
        })
    }

    /// CSS handed to `querySelectorAll`
    #[must_use]
    pub fn base(&self) -> &str {
        &self.base
    }

    /// Unescaped text to look for
    #[must_use]
    pub fn needle(&self) -> &str {
        &self.needle
    }

    /// Whether an element with this text content passes the filter
    #[must_use]
    pub fn matches(&self, text_content: &str) -> bool {
        let text = text_content.trim();
        match exact_text(&self.needle) {
            Some(exact) => text == exact,
            None => text.contains(self.needle.as_str()),
        }
    }
}
