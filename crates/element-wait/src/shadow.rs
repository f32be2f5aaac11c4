//! Shadow DOM piercing.
//!
//! A shadow selector is a chain of selectors joined by `::shadow `:
//! `my-app::shadow settings-panel::shadow #save`. Every segment but the
//! last names a host whose shadow root the next segment is searched in.
//! Segments after the first are always queried as CSS.

use std::fmt;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::condition::{Condition, ConditionEvaluator, ProbeResult, Satisfied, SoftFail};
use crate::context::{format_seconds, WaitContext};
use crate::element::ElementHandle;
use crate::locator::{Locator, Strategy};
use crate::result::{WaitError, WaitResult};
use crate::scripts::SHADOW_ROOT_SCRIPT;
use crate::session::{NodeId, NodeRef, SearchScope, Session, ShadowSupport};
use crate::translator;
use crate::wait::{poll, timeout_diagnostic, Polled};

/// Token separating a host selector from the selector inside its root
pub const SHADOW_DELIMITER: &str = "::shadow ";

const SHADOW_MARKER: &str = "::shadow";

/// Whether `selector` pierces shadow roots
#[must_use]
pub fn is_shadow_selector(selector: &str) -> bool {
    selector.contains(SHADOW_MARKER)
}

// =============================================================================
// SHADOW CHAIN
// =============================================================================

/// One `::shadow `-separated part of a chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainSegment {
    locator: Locator,
    raw: String,
}

impl ChainSegment {
    /// Locator used to query this segment
    #[must_use]
    pub const fn locator(&self) -> &Locator {
        &self.locator
    }

    /// Segment text as written
    #[must_use]
    pub fn raw(&self) -> &str {
        &self.raw
    }
}

/// A validated shadow selector chain with at least two segments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShadowChain {
    locator: Locator,
    segments: Vec<ChainSegment>,
}

impl ShadowChain {
    /// Parse a raw chain, inferring the first segment's strategy
    pub fn parse(raw: &str) -> WaitResult<Self> {
        Self::parse_with(raw, None)
    }

    /// Parse a locator's value; a non-CSS strategy applies to the first
    /// segment
    pub fn from_locator(locator: &Locator) -> WaitResult<Self> {
        let declared = (locator.strategy() != Strategy::Css).then_some(locator.strategy());
        Self::parse_with(locator.value(), declared)
    }

    fn parse_with(raw: &str, first_strategy: Option<Strategy>) -> WaitResult<Self> {
        let trimmed = raw.trim();
        let invalid = |reason: String| WaitError::InvalidShadowSelector {
            selector: raw.to_string(),
            reason,
        };

        if !is_shadow_selector(trimmed) {
            return Err(invalid(format!("no {SHADOW_DELIMITER:?} delimiter")));
        }
        if trimmed.ends_with(SHADOW_MARKER) {
            return Err(invalid(
                "a chain cannot end on a shadow root; add an element selector after the last delimiter"
                    .to_string(),
            ));
        }

        let parts: Vec<&str> = trimmed.split(SHADOW_DELIMITER).map(str::trim).collect();
        if parts.len() < 2 {
            return Err(invalid("expected a host and an inner selector".to_string()));
        }
        if let Some(bad) = parts
            .iter()
            .find(|part| part.is_empty() || part.contains(SHADOW_MARKER))
        {
            return Err(invalid(format!("malformed segment {bad:?}")));
        }

        let mut segments = Vec::with_capacity(parts.len());
        for (index, part) in parts.iter().enumerate() {
            let locator = if index == 0 {
                match first_strategy {
                    Some(strategy) => Locator::new(strategy, *part),
                    None => Locator::infer(part),
                }
            } else {
                Locator::infer(part)
                    .and_then(|inner| translator::to_css(&inner))
                    .and_then(Locator::css)
            }
            .map_err(|error| invalid(format!("segment {part:?}: {error}")))?;
            segments.push(ChainSegment {
                locator,
                raw: (*part).to_string(),
            });
        }

        let locator = Locator::new(segments[0].locator.strategy(), trimmed)?;
        Ok(Self { locator, segments })
    }

    /// The whole chain as a locator (first segment's strategy)
    #[must_use]
    pub const fn locator(&self) -> &Locator {
        &self.locator
    }

    /// All segments, outermost first
    #[must_use]
    pub fn segments(&self) -> &[ChainSegment] {
        &self.segments
    }

    /// Host segments, every one but the last
    #[must_use]
    pub fn hosts(&self) -> &[ChainSegment] {
        &self.segments[..self.segments.len() - 1]
    }

    /// The element the chain resolves to
    #[must_use]
    pub fn target(&self) -> &ChainSegment {
        &self.segments[self.segments.len() - 1]
    }

    /// Number of segments
    #[must_use]
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// Always false; chains have at least two segments
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// The first `count` segments joined with the delimiter
    #[must_use]
    pub fn prefix(&self, count: usize) -> String {
        self.segments
            .iter()
            .take(count)
            .map(ChainSegment::raw)
            .collect::<Vec<_>>()
            .join(SHADOW_DELIMITER)
    }
}

impl fmt::Display for ShadowChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.locator.value())
    }
}

// =============================================================================
// RESOLVER
// =============================================================================

/// Resolves shadow chains on one session
pub struct ShadowResolver<'a> {
    session: &'a dyn Session,
    ctx: &'a WaitContext,
    support: ShadowSupport,
}

impl fmt::Debug for ShadowResolver<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShadowResolver")
            .field("support", &self.support)
            .finish_non_exhaustive()
    }
}

impl<'a> ShadowResolver<'a> {
    /// Resolver for `session`; shadow support is read from its capabilities
    #[must_use]
    pub fn new(session: &'a dyn Session, ctx: &'a WaitContext) -> Self {
        let support = session
            .capabilities()
            .shadow_support(ctx.config().shadow_native_min_version);
        Self {
            session,
            ctx,
            support,
        }
    }

    /// How shadow roots are reached on this session
    #[must_use]
    pub const fn support(&self) -> &ShadowSupport {
        &self.support
    }

    fn ensure_supported(&self) -> WaitResult<()> {
        match &self.support {
            ShadowSupport::Unsupported(message) => Err(WaitError::ShadowUnsupported {
                message: message.clone(),
            }),
            _ => Ok(()),
        }
    }

    fn is_native(&self) -> bool {
        self.support == ShadowSupport::Native
    }

    fn evaluator(&self) -> ConditionEvaluator<'a> {
        ConditionEvaluator::new(self.session, self.ctx.config())
            .with_native_shadow_queries(self.is_native())
    }

    /// Resolve `selector` to its innermost element within `timeout`.
    ///
    /// The chain is validated before any remote call. A host whose root is
    /// not attached yet is read again after the configured back-off, cut
    /// short to whatever is left of `timeout`.
    pub fn resolve(
        &self,
        selector: &str,
        timeout: Duration,
        must_be_visible: bool,
    ) -> WaitResult<ElementHandle> {
        let chain = ShadowChain::parse(selector)?;
        self.resolve_chain(&chain, timeout, must_be_visible)
    }

    /// Resolve a parsed chain.
    ///
    /// Hosts only need to be attached; the target must also be displayed
    /// when `must_be_visible` is set.
    pub fn resolve_chain(
        &self,
        chain: &ShadowChain,
        timeout: Duration,
        must_be_visible: bool,
    ) -> WaitResult<ElementHandle> {
        self.ensure_supported()?;
        let stop = Instant::now() + timeout;
        let single_shot = self.ctx.config().is_single_shot(timeout);
        let target = if must_be_visible {
            Condition::Visible
        } else {
            Condition::Present
        };

        let mut scope = SearchScope::Document;
        let mut resolved = None;
        for (index, segment) in chain.segments().iter().enumerate() {
            let is_target = index + 1 == chain.len();
            let condition = if is_target { target } else { Condition::Present };
            let budget = if single_shot {
                Duration::ZERO
            } else {
                stop.saturating_duration_since(Instant::now())
            };
            let handle = self.wait_segment(chain, &scope, segment, condition, budget, timeout)?;
            if is_target {
                resolved = Some(handle);
                break;
            }
            let root =
                self.acquire_root(handle.node(), &chain.prefix(index + 1), stop, single_shot)?;
            scope = SearchScope::ShadowRoot(root);
        }

        resolved
            .map(|handle| handle.with_locator(chain.locator().clone()))
            .ok_or_else(|| WaitError::InvalidShadowSelector {
                selector: chain.to_string(),
                reason: "chain has no target segment".to_string(),
            })
    }

    /// Poll one segment inside `scope`
    fn wait_segment(
        &self,
        chain: &ShadowChain,
        scope: &SearchScope,
        segment: &ChainSegment,
        condition: Condition,
        budget: Duration,
        timeout: Duration,
    ) -> WaitResult<ElementHandle> {
        let config = self.ctx.config();
        let in_root = matches!(scope, SearchScope::ShadowRoot(_));
        let cadence = if in_root && self.is_native() {
            config.shadow_poll_interval()
        } else {
            config.cadence_for(budget)
        };
        let evaluator = self.evaluator();
        let polled = poll(self.ctx, chain, budget, cadence, || {
            evaluator.probe_in(scope, segment.locator(), condition)
        })?;
        match polled {
            Polled::Satisfied(Satisfied::Element(handle)) => Ok(handle),
            Polled::Satisfied(Satisfied::Holds) => {
                Err(self.timed_out(chain, SoftFail::NotPresent, timeout))
            }
            Polled::Exhausted(reason) => Err(self.timed_out(chain, reason, timeout)),
            Polled::Cancelled(limit) => Err(WaitError::Cancelled { limit }),
        }
    }

    fn timed_out(&self, chain: &ShadowChain, reason: SoftFail, timeout: Duration) -> WaitError {
        WaitError::TimedOut {
            diagnostic: timeout_diagnostic(
                self.session,
                chain.locator().strategy(),
                chain.locator().value(),
                reason,
                timeout,
            ),
        }
    }

    /// Shadow root of `host`, retried once after the back-off unless
    /// single-shot or out of time. The back-off never runs past `stop`.
    fn acquire_root(
        &self,
        host: &NodeId,
        chain_so_far: &str,
        stop: Instant,
        single_shot: bool,
    ) -> WaitResult<NodeId> {
        if let Some(root) = self.read_root(host)? {
            return Ok(root);
        }
        let backoff = self
            .ctx
            .config()
            .shadow_root_backoff()
            .min(stop.saturating_duration_since(Instant::now()));
        if !single_shot && !backoff.is_zero() {
            debug!(
                chain = chain_so_far,
                backoff_ms = backoff.as_millis(),
                "shadow root not attached yet"
            );
            self.ctx.sleep(backoff)?;
            if let Some(root) = self.read_root(host)? {
                return Ok(root);
            }
        }
        Err(WaitError::NoShadowRoot {
            chain: chain_so_far.to_string(),
        })
    }

    /// One read of `host`'s shadow root; transient failures read as absent
    fn read_root(&self, host: &NodeId) -> WaitResult<Option<NodeId>> {
        let read = if self.is_native() {
            self.session.shadow_root(host)
        } else {
            self.session
                .execute_script(SHADOW_ROOT_SCRIPT, &[NodeRef::Element(host.clone()).to_json()])
                .map(|value| NodeRef::from_script_value(&value).map(|node| node.id().clone()))
        };
        match read {
            Ok(root) => Ok(root),
            Err(error) if error.is_session_fatal() => Err(WaitError::Session(error)),
            Err(error) => {
                debug!(host = %host, %error, "shadow root read failed");
                Ok(None)
            }
        }
    }

    /// Walk the hosts once; `Ok(None)` when a host or its root is missing
    fn walk_hosts(&self, chain: &ShadowChain) -> WaitResult<Option<SearchScope>> {
        let evaluator = self.evaluator();
        let mut scope = SearchScope::Document;
        for host in chain.hosts() {
            let Some(node) = evaluator.locate(&scope, host.locator())? else {
                return Ok(None);
            };
            let Some(root) = self.read_root(&node)? else {
                return Ok(None);
            };
            scope = SearchScope::ShadowRoot(root);
        }
        Ok(Some(scope))
    }

    /// One probe of `condition` on the chain's target.
    ///
    /// A missing host or root counts as the target being missing, so the
    /// poll loop keeps going while roots attach.
    pub fn probe(&self, chain: &ShadowChain, condition: Condition) -> ProbeResult {
        if let Err(error) = self.ensure_supported() {
            return ProbeResult::HardFail(error);
        }
        let scope = match self.walk_hosts(chain) {
            Ok(Some(scope)) => scope,
            Ok(None) if condition.holds_when_missing() => {
                return ProbeResult::Satisfied(Satisfied::Holds)
            }
            Ok(None) => return ProbeResult::SoftFail(SoftFail::NotPresent),
            Err(error) => return ProbeResult::HardFail(error),
        };
        match self
            .evaluator()
            .probe_in(&scope, chain.target().locator(), condition)
        {
            ProbeResult::Satisfied(Satisfied::Element(handle)) => ProbeResult::Satisfied(
                Satisfied::Element(handle.with_locator(chain.locator().clone())),
            ),
            other => other,
        }
    }

    /// One probe: is the target displayed with text matching `expected`?
    fn probe_text(&self, chain: &ShadowChain, expected: &str, mode: TextMatch) -> ProbeResult {
        let handle = match self.probe(chain, Condition::Visible) {
            ProbeResult::Satisfied(Satisfied::Element(handle)) => handle,
            ProbeResult::Satisfied(Satisfied::Holds) => {
                return ProbeResult::SoftFail(SoftFail::NotPresent)
            }
            other => return other,
        };
        match self.session.text(handle.node()) {
            Ok(actual) if mode.holds(expected, actual.trim()) => {
                ProbeResult::Satisfied(Satisfied::Element(handle))
            }
            Ok(actual) => {
                debug!(%chain, expected, actual = actual.trim(), "text not there yet");
                ProbeResult::SoftFail(SoftFail::TextMismatch)
            }
            Err(error) => ProbeResult::remote(error, SoftFail::Stale),
        }
    }

    /// Wait until the target is displayed and its trimmed text matches
    /// the trimmed `expected`
    fn wait_for_text(
        &self,
        selector: &str,
        expected: &str,
        mode: TextMatch,
        timeout: Duration,
    ) -> WaitResult<ElementHandle> {
        let chain = ShadowChain::parse(selector)?;
        self.ensure_supported()?;
        let expected = expected.trim();
        let cadence = self.ctx.config().cadence_for(timeout);
        let polled = poll(self.ctx, &chain, timeout, cadence, || {
            self.probe_text(&chain, expected, mode)
        })?;
        match polled {
            Polled::Satisfied(Satisfied::Element(handle)) => Ok(handle),
            Polled::Satisfied(Satisfied::Holds) => {
                Err(self.timed_out(&chain, SoftFail::NotPresent, timeout))
            }
            Polled::Exhausted(SoftFail::TextMismatch) => Err(WaitError::TimedOut {
                diagnostic: format!(
                    "Expected {} {{{expected}}} in element {{{chain}}} was not visible after {}!",
                    mode.describe(),
                    format_seconds(timeout)
                ),
            }),
            Polled::Exhausted(reason) => Err(self.timed_out(&chain, reason, timeout)),
            Polled::Cancelled(limit) => Err(WaitError::Cancelled { limit }),
        }
    }

    /// Every element matching the chain's target right now
    pub fn find_all(&self, chain: &ShadowChain) -> WaitResult<Vec<ElementHandle>> {
        self.ensure_supported()?;
        let Some(scope) = self.walk_hosts(chain)? else {
            return Ok(Vec::new());
        };
        Ok(self
            .evaluator()
            .find_all(&scope, chain.target().locator())?
            .into_iter()
            .map(|handle| handle.with_locator(chain.locator().clone()))
            .collect())
    }
}

// =============================================================================
// CONVENIENCE
// =============================================================================

/// Wait for the chain's target to be attached
pub fn wait_for_shadow_present(
    session: &dyn Session,
    ctx: &WaitContext,
    selector: &str,
    timeout: Duration,
) -> WaitResult<ElementHandle> {
    ShadowResolver::new(session, ctx).resolve(selector, timeout, false)
}

/// Wait for the chain's target to be displayed
pub fn wait_for_shadow_visible(
    session: &dyn Session,
    ctx: &WaitContext,
    selector: &str,
    timeout: Duration,
) -> WaitResult<ElementHandle> {
    ShadowResolver::new(session, ctx).resolve(selector, timeout, true)
}

/// How expected text is compared with an element's text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TextMatch {
    Contains,
    Exact,
}

impl TextMatch {
    fn holds(self, expected: &str, actual: &str) -> bool {
        match self {
            Self::Contains => actual.contains(expected),
            Self::Exact => actual == expected,
        }
    }

    const fn describe(self) -> &'static str {
        match self {
            Self::Contains => "text",
            Self::Exact => "exact text",
        }
    }
}

/// Wait for the chain's target to be displayed with `text` somewhere in
/// its text
pub fn wait_for_shadow_text_visible(
    session: &dyn Session,
    ctx: &WaitContext,
    selector: &str,
    text: &str,
    timeout: Duration,
) -> WaitResult<ElementHandle> {
    ShadowResolver::new(session, ctx).wait_for_text(selector, text, TextMatch::Contains, timeout)
}

/// Wait for the chain's target to be displayed with exactly `text`,
/// ignoring surrounding whitespace
pub fn wait_for_exact_shadow_text_visible(
    session: &dyn Session,
    ctx: &WaitContext,
    selector: &str,
    text: &str,
    timeout: Duration,
) -> WaitResult<ElementHandle> {
    ShadowResolver::new(session, ctx).wait_for_text(selector, text, TextMatch::Exact, timeout)
}

/// Text of the chain's target once it is displayed
pub fn get_shadow_text(
    session: &dyn Session,
    ctx: &WaitContext,
    selector: &str,
    timeout: Duration,
) -> WaitResult<String> {
    let handle = wait_for_shadow_visible(session, ctx, selector, timeout)?;
    Ok(session.text(handle.node())?.trim().to_string())
}

/// Attribute `name` of the chain's target once it is attached
pub fn get_shadow_attribute(
    session: &dyn Session,
    ctx: &WaitContext,
    selector: &str,
    name: &str,
    timeout: Duration,
) -> WaitResult<Option<String>> {
    let handle = wait_for_shadow_present(session, ctx, selector, timeout)?;
    Ok(session.attribute(handle.node(), name)?)
}

fn check_shadow(
    session: &dyn Session,
    ctx: &WaitContext,
    selector: &str,
    condition: Condition,
) -> WaitResult<bool> {
    ctx.check_deadline()?;
    let chain = ShadowChain::parse(selector)?;
    match ShadowResolver::new(session, ctx).probe(&chain, condition) {
        ProbeResult::Satisfied(_) => Ok(true),
        ProbeResult::SoftFail(_) => Ok(false),
        ProbeResult::HardFail(error) => Err(error),
    }
}

/// Single probe: is the chain's target attached?
pub fn is_shadow_element_present(
    session: &dyn Session,
    ctx: &WaitContext,
    selector: &str,
) -> WaitResult<bool> {
    check_shadow(session, ctx, selector, Condition::Present)
}

/// Single probe: is the chain's target displayed?
pub fn is_shadow_element_visible(
    session: &dyn Session,
    ctx: &WaitContext,
    selector: &str,
) -> WaitResult<bool> {
    check_shadow(session, ctx, selector, Condition::Visible)
}

/// Single probe: is the chain's target displayed and enabled?
pub fn is_shadow_element_enabled(
    session: &dyn Session,
    ctx: &WaitContext,
    selector: &str,
) -> WaitResult<bool> {
    check_shadow(session, ctx, selector, Condition::Interactable)
}
