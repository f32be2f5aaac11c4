//! Selector dialect translation.
//!
//! Pure functions converting locators into CSS for engines that only accept
//! CSS (shadow roots, scripted `querySelector`), plus a best-effort XPath to
//! CSS translator for a documented subset of XPath:
//!
//! - `id('value')`
//! - `/` and `//` navigation with a tag or `*`
//! - `[@attr='value']`, `[@attr]`, `[contains(@attr,'value')]`
//! - `[contains(text(),'value')]`, `[contains(.,'value')]`, `[text()='value']`
//! - `and`-joined combinations of the above, optionally parenthesized
//! - positional predicates `[n]`
//! - outer grouping `(expr)[n]`
//!
//! Navigation is always rendered as descendant spacing: a single `/` step
//! carries too little axis information to justify a `>` combinator.
//! Anything outside the subset is a [`WaitError::Translation`] error rather
//! than a guess.

use regex::{Captures, Regex};
use std::sync::OnceLock;

use crate::locator::{Locator, Strategy};
use crate::result::{WaitError, WaitResult};

// Quoted `[` and `]` are swapped for private-use characters while tokenizing.
const L_BRACKET: char = '\u{E000}';
const R_BRACKET: char = '\u{E001}';

pub(crate) fn static_regex(cell: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
    #[allow(clippy::expect_used)]
    cell.get_or_init(|| Regex::new(pattern).expect("built-in pattern must compile"))
}

/// One XPath location step: id-function, or axis + tag + predicates.
fn node_pattern() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    static_regex(
        &CELL,
        r#"^(?:id\(\s*(?:'(?P<id1>[^']*)'|"(?P<id2>[^"]*)")\s*\)|(?P<nav>\.?//?)?(?P<tag>[A-Za-z][\w-]*|\*)(?P<preds>(?:\[[^\[\]]*\])*))"#,
    )
}

fn predicate_pattern() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    static_regex(&CELL, r"\[([^\[\]]*)\]")
}

fn equals_pattern() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    static_regex(
        &CELL,
        r#"^(?P<target>@[A-Za-z_][\w:.-]*|text\(\)|\.)\s*=\s*(?:'(?P<v1>[^']*)'|"(?P<v2>[^"]*)")$"#,
    )
}

fn contains_pattern() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    static_regex(
        &CELL,
        r#"^contains\(\s*(?P<target>@[A-Za-z_][\w:.-]*|text\(\)|\.)\s*,\s*(?:'(?P<v1>[^']*)'|"(?P<v2>[^"]*)")\s*\)$"#,
    )
}

fn has_attribute_pattern() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    static_regex(&CELL, r"^@(?P<attr>[A-Za-z_][\w:.-]*)$")
}

/// `//tag[@class and contains(concat(' ', normalize-space(@class), ' '), ' cls ') and (contains(., 'text'))]`
fn class_text_pattern() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    static_regex(
        &CELL,
        r"^//(?P<tag>[A-Za-z][\w-]*|\*)\[@class and contains\(concat\(' ', normalize-space\(@class\), ' '\), ' (?P<class>[^' ]+) '\) and \(contains\(\., '(?P<text>[^']*)'\)\)\]$",
    )
}

fn ident_pattern() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    static_regex(&CELL, r"^-?[A-Za-z_][\w-]*$")
}

// =============================================================================
// LOCATOR -> CSS
// =============================================================================

/// Convert any locator into a CSS selector.
///
/// Link text locators become `a:contains("...")`, which only the scripted
/// query path understands; native engines never receive it.
pub fn to_css(locator: &Locator) -> WaitResult<String> {
    let value = locator.value();
    Ok(match locator.strategy() {
        Strategy::Css | Strategy::TagName => value.to_string(),
        Strategy::Id => format!("#{value}"),
        Strategy::ClassName => format!(".{value}"),
        Strategy::Name => format!("[name={}]", css_string(value)),
        Strategy::LinkText | Strategy::PartialLinkText => {
            format!("a:contains({})", css_string(value))
        }
        Strategy::XPath => xpath_to_css(value)?,
    })
}

/// Convert a locator into an XPath expression
pub fn to_xpath(locator: &Locator) -> WaitResult<String> {
    let value = locator.value();
    Ok(match locator.strategy() {
        Strategy::XPath => value.to_string(),
        Strategy::LinkText => format!("//a[normalize-space(.)={}]", xpath_literal(value)),
        Strategy::PartialLinkText => format!("//a[contains(., {})]", xpath_literal(value)),
        _ => css_to_xpath(&to_css(locator)?)?,
    })
}

// =============================================================================
// XPATH -> CSS
// =============================================================================

/// Translate an XPath expression from the supported subset into CSS
pub fn xpath_to_css(xpath: &str) -> WaitResult<String> {
    let original = xpath;
    let xpath = xpath.trim();
    if xpath.is_empty() {
        return Err(WaitError::translation(original, "empty expression"));
    }

    if let Some(css) = fold_class_and_text(xpath) {
        tracing::trace!(xpath, css = %css, "folded class/text compound predicate");
        return Ok(css);
    }

    let mut xpath = protect_quoted_brackets(xpath)?;
    xpath = xpath.replace("/descendant-or-self::*/", "//");

    if xpath.starts_with('(') {
        tracing::trace!(xpath = %xpath, "stripping outer grouping");
        xpath = strip_grouping(&xpath).ok_or_else(|| {
            WaitError::translation(original, "unbalanced grouping parentheses")
        })?;
    }

    let mut fragments: Vec<String> = Vec::new();
    let mut position = 0;
    while position < xpath.len() {
        let rest = &xpath[position..];
        let caps = node_pattern()
            .captures(rest)
            .ok_or_else(|| WaitError::translation(original, format!("unexpected {rest:?}")))?;
        let whole = caps
            .get(0)
            .map_or(0, |m| m.end());
        if whole == 0 {
            return Err(WaitError::translation(original, format!("unexpected {rest:?}")));
        }
        let is_id_function = caps.name("id1").is_some() || caps.name("id2").is_some();
        if position > 0 && (is_id_function || caps.name("nav").is_none()) {
            return Err(WaitError::translation(
                original,
                format!("missing navigation before {rest:?}"),
            ));
        }
        fragments.push(translate_node(&caps, original)?);
        position += whole;
    }

    let css = restore_brackets(&fragments.join(" "));
    tracing::trace!(xpath = original, css = %css, "translated xpath");
    Ok(css)
}

fn translate_node(caps: &Captures<'_>, original: &str) -> WaitResult<String> {
    if let Some(id) = caps.name("id1").or_else(|| caps.name("id2")) {
        return Ok(id_fragment(id.as_str()));
    }

    let tag = caps.name("tag").map_or("*", |m| m.as_str());
    let mut css = String::new();
    if tag != "*" {
        css.push_str(tag);
    }

    let preds = caps.name("preds").map_or("", |m| m.as_str());
    for pred in predicate_pattern().captures_iter(preds) {
        let body = pred.get(1).map_or("", |m| m.as_str()).trim();
        css.push_str(&translate_predicate(body, original)?);
    }

    if css.is_empty() {
        css.push('*');
    }
    Ok(css)
}

fn translate_predicate(body: &str, original: &str) -> WaitResult<String> {
    if !body.is_empty() && body.bytes().all(|b| b.is_ascii_digit()) {
        return Ok(format!(":nth-of-type({body})"));
    }
    let conjuncts = split_and(body);
    if conjuncts.is_empty() {
        return Err(WaitError::translation(original, "empty predicate"));
    }
    let mut css = String::new();
    for conjunct in conjuncts {
        css.push_str(&translate_condition(unwrap_parens(conjunct), original)?);
    }
    Ok(css)
}

fn translate_condition(condition: &str, original: &str) -> WaitResult<String> {
    if let Some(caps) = equals_pattern().captures(condition) {
        let value = quoted_value(&caps);
        return Ok(match caps.name("target").map_or("", |m| m.as_str()) {
            "@id" => id_fragment(value),
            "@class" => class_fragment(value),
            "text()" | "." => format!(":contains({})", css_string(&format!("^{value}$"))),
            attr => format!("[{}={}]", &attr[1..], css_string(value)),
        });
    }
    if let Some(caps) = contains_pattern().captures(condition) {
        let value = quoted_value(&caps);
        return Ok(match caps.name("target").map_or("", |m| m.as_str()) {
            "text()" | "." => format!(":contains({})", css_string(value)),
            attr => format!("[{}*={}]", &attr[1..], css_string(value)),
        });
    }
    if let Some(caps) = has_attribute_pattern().captures(condition) {
        return Ok(format!("[{}]", &caps["attr"]));
    }
    Err(WaitError::translation(
        original,
        format!("unsupported predicate {condition:?}"),
    ))
}

fn quoted_value<'a>(caps: &Captures<'a>) -> &'a str {
    caps.name("v1")
        .or_else(|| caps.name("v2"))
        .map_or("", |m| m.as_str())
}

fn id_fragment(value: &str) -> String {
    if ident_pattern().is_match(value) {
        format!("#{value}")
    } else {
        format!("[id={}]", css_string(value))
    }
}

fn class_fragment(value: &str) -> String {
    let classes: Vec<&str> = value.split_whitespace().collect();
    if !classes.is_empty() && classes.iter().all(|c| ident_pattern().is_match(c)) {
        classes.iter().map(|c| format!(".{c}")).collect()
    } else {
        format!("[class={}]", css_string(value))
    }
}

fn fold_class_and_text(xpath: &str) -> Option<String> {
    let caps = class_text_pattern().captures(xpath)?;
    let tag = match &caps["tag"] {
        "*" => "",
        tag => tag,
    };
    Some(format!(
        "{tag}.{}:contains({})",
        &caps["class"],
        css_string(&caps["text"])
    ))
}

/// Swap brackets inside quoted literals for placeholders.
fn protect_quoted_brackets(xpath: &str) -> WaitResult<String> {
    let mut out = String::with_capacity(xpath.len());
    let mut quote: Option<char> = None;
    for ch in xpath.chars() {
        match (quote, ch) {
            (None, '\'' | '"') => {
                quote = Some(ch);
                out.push(ch);
            }
            (Some(q), c) if c == q => {
                quote = None;
                out.push(ch);
            }
            (Some(_), '[') => out.push(L_BRACKET),
            (Some(_), ']') => out.push(R_BRACKET),
            _ => out.push(ch),
        }
    }
    if quote.is_some() {
        return Err(WaitError::translation(xpath, "unterminated string literal"));
    }
    Ok(out)
}

fn restore_brackets(css: &str) -> String {
    css.replace(L_BRACKET, "[").replace(R_BRACKET, "]")
}

/// `(//button[@type='submit'])[2]` becomes `//button[@type='submit'][2]`
fn strip_grouping(xpath: &str) -> Option<String> {
    let inner = xpath.strip_prefix('(')?;
    let close = inner.rfind(')')?;
    let mut out = String::with_capacity(inner.len());
    out.push_str(&inner[..close]);
    out.push_str(&inner[close + 1..]);
    Some(out)
}

/// Split a predicate body on top-level ` and `, ignoring quoted text and
/// nested parentheses.
fn split_and(body: &str) -> Vec<&str> {
    let bytes = body.as_bytes();
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut quote: Option<u8> = None;
    let mut start = 0;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        match quote {
            Some(q) if b == q => quote = None,
            Some(_) => {}
            None => match b {
                b'\'' | b'"' => quote = Some(b),
                b'(' => depth += 1,
                b')' => depth -= 1,
                b' ' if depth == 0 && body[i..].starts_with(" and ") => {
                    parts.push(body[start..i].trim());
                    i += " and ".len();
                    start = i;
                    continue;
                }
                _ => {}
            },
        }
        i += 1;
    }
    let last = body[start..].trim();
    if !last.is_empty() {
        parts.push(last);
    }
    parts
}

/// Strip parentheses wrapping a whole condition: `(@a='b')` -> `@a='b'`
fn unwrap_parens(condition: &str) -> &str {
    let mut current = condition.trim();
    while current.starts_with('(') && current.ends_with(')') && encloses(current) {
        current = current[1..current.len() - 1].trim();
    }
    current
}

fn encloses(s: &str) -> bool {
    let mut depth = 0i32;
    let mut quote: Option<char> = None;
    let last = s.len() - 1;
    for (i, ch) in s.char_indices() {
        match quote {
            Some(q) if ch == q => quote = None,
            Some(_) => {}
            None => match ch {
                '\'' | '"' => quote = Some(ch),
                '(' => depth += 1,
                ')' => {
                    depth -= 1;
                    if depth == 0 && i != last {
                        return false;
                    }
                }
                _ => {}
            },
        }
    }
    depth == 0
}

// =============================================================================
// CSS -> XPATH
// =============================================================================

fn css_simple_pattern() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    static_regex(
        &CELL,
        r#"^(?:#(?P<id>[\w-]+)|\.(?P<class>[\w-]+)|\[\s*(?P<attr>[A-Za-z_][\w:.-]*)\s*(?:(?P<op>\*?=)\s*(?:"(?P<v1>(?:[^"\\]|\\.)*)"|'(?P<v2>(?:[^'\\]|\\.)*)'|(?P<v3>[^\]\s]+))\s*)?\]|:contains\(\s*(?:"(?P<t1>(?:[^"\\]|\\.)*)"|'(?P<t2>(?:[^'\\]|\\.)*)')\s*\)|:nth-of-type\((?P<nth>\d+)\))"#,
    )
}

fn css_tag_pattern() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    static_regex(&CELL, r"^(?:[A-Za-z][\w-]*|\*)")
}

/// Translate a CSS selector from the supported subset into XPath
pub fn css_to_xpath(css: &str) -> WaitResult<String> {
    let steps = split_css(css).map_err(|reason| WaitError::translation(css, reason))?;
    if steps.is_empty() {
        return Err(WaitError::translation(css, "empty selector"));
    }
    let mut xpath = String::new();
    for (child, compound) in steps {
        xpath.push_str(if child { "/" } else { "//" });
        xpath.push_str(&compound_to_xpath(compound, css)?);
    }
    Ok(xpath)
}

fn compound_to_xpath(compound: &str, css: &str) -> WaitResult<String> {
    let (tag, mut rest) = match css_tag_pattern().find(compound) {
        Some(m) => (m.as_str(), &compound[m.end()..]),
        None => ("*", compound),
    };
    let mut conditions: Vec<String> = Vec::new();
    let mut nth: Option<&str> = None;
    while !rest.is_empty() {
        let caps = css_simple_pattern()
            .captures(rest)
            .ok_or_else(|| WaitError::translation(css, format!("unsupported {rest:?}")))?;
        if let Some(id) = caps.name("id") {
            conditions.push(format!("@id={}", xpath_literal(id.as_str())));
        } else if let Some(class) = caps.name("class") {
            conditions.push(format!(
                "contains(concat(' ', normalize-space(@class), ' '), {})",
                xpath_literal(&format!(" {} ", class.as_str()))
            ));
        } else if let Some(attr) = caps.name("attr") {
            let value = caps
                .name("v1")
                .or_else(|| caps.name("v2"))
                .or_else(|| caps.name("v3"))
                .map(|m| css_unescape(m.as_str()));
            conditions.push(match (caps.name("op").map(|m| m.as_str()), value) {
                (Some("*="), Some(v)) => {
                    format!("contains(@{}, {})", attr.as_str(), xpath_literal(&v))
                }
                (Some(_), Some(v)) => format!("@{}={}", attr.as_str(), xpath_literal(&v)),
                _ => format!("@{}", attr.as_str()),
            });
        } else if let Some(text) = caps.name("t1").or_else(|| caps.name("t2")) {
            let text = css_unescape(text.as_str());
            conditions.push(match exact_text(&text) {
                Some(exact) => format!("normalize-space(.)={}", xpath_literal(exact)),
                None => format!("contains(., {})", xpath_literal(&text)),
            });
        } else if let Some(n) = caps.name("nth") {
            nth = Some(n.as_str());
        }
        let end = caps.get(0).map_or(rest.len(), |m| m.end());
        rest = &rest[end..];
    }

    let mut step = tag.to_string();
    if !conditions.is_empty() {
        step.push('[');
        step.push_str(&conditions.join(" and "));
        step.push(']');
    }
    if let Some(n) = nth {
        step.push_str(&format!("[{n}]"));
    }
    Ok(step)
}

/// Split a CSS selector into `(is_child, compound)` steps.
fn split_css(css: &str) -> Result<Vec<(bool, &str)>, String> {
    let mut steps = Vec::new();
    let mut quote: Option<char> = None;
    let mut depth = 0i32;
    let mut start: Option<usize> = None;
    let mut child = false;
    let mut escaped = false;
    for (i, ch) in css.char_indices() {
        if let Some(q) = quote {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                c if c == q => quote = None,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' | '\'' => quote = Some(ch),
            '[' | '(' => depth += 1,
            ']' | ')' => depth -= 1,
            c if depth == 0 && (c.is_whitespace() || c == '>') => {
                if let Some(s) = start.take() {
                    steps.push((child, &css[s..i]));
                    child = false;
                }
                if c == '>' {
                    if steps.is_empty() || child {
                        return Err("dangling child combinator".to_string());
                    }
                    child = true;
                }
                continue;
            }
            _ => {}
        }
        if start.is_none() {
            start = Some(i);
        }
    }
    if quote.is_some() || depth != 0 {
        return Err("unbalanced quotes or brackets".to_string());
    }
    match start {
        Some(s) => steps.push((child, &css[s..])),
        None if child => return Err("dangling child combinator".to_string()),
        None => {}
    }
    Ok(steps)
}

// =============================================================================
// LITERALS
// =============================================================================

/// Double-quoted CSS string literal
fn css_string(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Undo [`css_string`] escaping: `\x` becomes `x`
pub(crate) fn css_unescape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(ch) = chars.next() {
        match ch {
            '\\' => out.extend(chars.next()),
            other => out.push(other),
        }
    }
    out
}

/// `^text$` asks for an exact trimmed text match
pub(crate) fn exact_text(needle: &str) -> Option<&str> {
    if needle.len() > 1 {
        needle.strip_prefix('^')?.strip_suffix('$')
    } else {
        None
    }
}

/// XPath string literal, falling back to `concat()` when both quote kinds
/// appear in `value`
#[must_use]
pub fn xpath_literal(value: &str) -> String {
    if !value.contains('\'') {
        format!("'{value}'")
    } else if !value.contains('"') {
        format!("\"{value}\"")
    } else {
        let parts: Vec<String> = value
            .split('"')
            .map(|part| format!("\"{part}\""))
            .collect();
        format!("concat({})", parts.join(", '\"', "))
    }
}
