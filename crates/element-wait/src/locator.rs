//! Locators: a `(strategy, value)` pair identifying elements.
//!
//! A [`Locator`] is immutable once built. Construction rejects empty or
//! whitespace-only selectors, so every locator that reaches the engine is
//! queryable.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::result::{WaitError, WaitResult};

/// Prefix marking a link-text selector in raw selector strings
pub const LINK_TEXT_PREFIX: &str = "link=";

/// Prefix marking a partial link-text selector in raw selector strings
pub const PARTIAL_LINK_TEXT_PREFIX: &str = "partial_link=";

/// How a locator's value is interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Element `id` attribute
    Id,
    /// CSS selector
    Css,
    /// XPath expression
    XPath,
    /// Exact anchor text
    LinkText,
    /// Substring of anchor text
    PartialLinkText,
    /// Element `name` attribute
    Name,
    /// Tag name
    TagName,
    /// Single class name
    ClassName,
}

impl Strategy {
    /// Wire name used by WebDriver clients (`using` field)
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Id => "id",
            Self::Css => "css selector",
            Self::XPath => "xpath",
            Self::LinkText => "link text",
            Self::PartialLinkText => "partial link text",
            Self::Name => "name",
            Self::TagName => "tag name",
            Self::ClassName => "class name",
        }
    }

    /// Whether a native CSS engine can consume values of this strategy
    /// after [`crate::translator::to_css`]
    #[must_use]
    pub const fn is_css_compatible(&self) -> bool {
        !matches!(self, Self::XPath | Self::LinkText | Self::PartialLinkText)
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A strategy plus selector value
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Locator {
    strategy: Strategy,
    value: String,
}

impl Locator {
    /// Create a locator, rejecting empty selector values
    pub fn new(strategy: Strategy, value: impl Into<String>) -> WaitResult<Self> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(WaitError::InvalidLocator {
                message: format!("empty {strategy} selector"),
            });
        }
        Ok(Self { strategy, value })
    }

    /// CSS selector locator
    pub fn css(value: impl Into<String>) -> WaitResult<Self> {
        Self::new(Strategy::Css, value)
    }

    /// XPath locator
    pub fn xpath(value: impl Into<String>) -> WaitResult<Self> {
        Self::new(Strategy::XPath, value)
    }

    /// `id` attribute locator
    pub fn id(value: impl Into<String>) -> WaitResult<Self> {
        Self::new(Strategy::Id, value)
    }

    /// Exact link text locator
    pub fn link_text(value: impl Into<String>) -> WaitResult<Self> {
        Self::new(Strategy::LinkText, value)
    }

    /// Partial link text locator
    pub fn partial_link_text(value: impl Into<String>) -> WaitResult<Self> {
        Self::new(Strategy::PartialLinkText, value)
    }

    /// Infer the strategy from a raw selector string.
    ///
    /// `/`, `./` and `(` start an XPath expression, `link=` and
    /// `partial_link=` prefixes select link text, anything else is CSS.
    pub fn infer(raw: &str) -> WaitResult<Self> {
        let trimmed = raw.trim();
        if let Some(text) = trimmed.strip_prefix(LINK_TEXT_PREFIX) {
            return Self::new(Strategy::LinkText, text);
        }
        if let Some(text) = trimmed.strip_prefix(PARTIAL_LINK_TEXT_PREFIX) {
            return Self::new(Strategy::PartialLinkText, text);
        }
        if trimmed.starts_with('/') || trimmed.starts_with("./") || trimmed.starts_with('(') {
            return Self::new(Strategy::XPath, trimmed);
        }
        Self::new(Strategy::Css, trimmed)
    }

    /// The locator strategy
    #[must_use]
    pub const fn strategy(&self) -> Strategy {
        self.strategy
    }

    /// The raw selector value
    #[must_use]
    pub fn value(&self) -> &str {
        &self.value
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}=\"{}\"", self.strategy, self.value)
    }
}

/// Escape quotes in `value` unless they are already escaped, so it can be
/// embedded in a quoted script literal.
#[must_use]
pub fn escape_quotes_if_needed(value: &str) -> String {
    let single = value.matches('\'').count();
    let escaped_single = value.matches("\\'").count();
    let double = value.matches('"').count();
    let escaped_double = value.matches("\\\"").count();
    if single == escaped_single && double == escaped_double {
        return value.to_string();
    }
    let mut out = String::with_capacity(value.len() + 4);
    let mut prev = '\0';
    for ch in value.chars() {
        if (ch == '\'' || ch == '"') && prev != '\\' {
            out.push('\\');
        }
        out.push(ch);
        prev = ch;
    }
    out
}
