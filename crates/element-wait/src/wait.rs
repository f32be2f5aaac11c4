//! Bounded polling of element conditions.
//!
//! [`PollEngine`] drives [`ConditionEvaluator`] probes until the condition
//! holds, the wait's own timeout runs out, or the test-wide deadline in
//! the [`WaitContext`] expires. Deadline expiry always wins over the local
//! timeout and is reported as a distinct outcome.

use std::fmt;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::condition::{Condition, ConditionEvaluator, ProbeResult, Satisfied, SoftFail};
use crate::context::{format_seconds, WaitContext};
use crate::element::ElementHandle;
use crate::locator::{Locator, Strategy};
use crate::page;
use crate::result::{WaitError, WaitResult};
use crate::session::{SearchScope, Session};
use crate::shadow::{self, ShadowChain, ShadowResolver};

// =============================================================================
// POLL OUTCOME
// =============================================================================

/// Final state of a wait
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// The condition held
    Satisfied(Satisfied),
    /// The wait's own timeout ran out; carries the diagnostic message
    TimedOut(String),
    /// The test-wide deadline expired; carries the human-readable limit
    Cancelled(String),
}

impl PollOutcome {
    /// Whether the condition held
    #[must_use]
    pub const fn is_satisfied(&self) -> bool {
        matches!(self, Self::Satisfied(_))
    }

    /// Turn timeouts and cancellation into errors
    pub fn into_result(self) -> WaitResult<Satisfied> {
        match self {
            Self::Satisfied(satisfied) => Ok(satisfied),
            Self::TimedOut(diagnostic) => Err(WaitError::TimedOut { diagnostic }),
            Self::Cancelled(limit) => Err(WaitError::Cancelled { limit }),
        }
    }
}

// =============================================================================
// POLL LOOP
// =============================================================================

/// How the generic loop ended
#[derive(Debug)]
pub(crate) enum Polled {
    Satisfied(Satisfied),
    /// Timeout exhausted with the most specific reason observed
    Exhausted(SoftFail),
    /// Deadline expired; carries the limit
    Cancelled(String),
}

/// Tracks soft failures so the final message names the most specific one
#[derive(Debug, Default)]
struct FailureTrail {
    last_specific: Option<SoftFail>,
    last: Option<SoftFail>,
}

impl FailureTrail {
    fn record(&mut self, reason: SoftFail) {
        if reason.element_seen() {
            self.last_specific = Some(reason);
        }
        self.last = Some(reason);
    }

    /// `not present` only if the element was never seen
    fn verdict(&self) -> SoftFail {
        self.last_specific
            .or(self.last)
            .unwrap_or(SoftFail::NotPresent)
    }
}

/// Run `probe` until it is satisfied, hard-fails, or time runs out.
///
/// Timeouts at or below the single-shot threshold probe exactly once.
/// Sleeps never overshoot the local stop time or the deadline.
pub(crate) fn poll<F>(
    ctx: &WaitContext,
    what: &dyn fmt::Display,
    timeout: Duration,
    cadence: Duration,
    mut probe: F,
) -> WaitResult<Polled>
where
    F: FnMut() -> ProbeResult,
{
    let stop = Instant::now() + timeout;
    let single_shot = ctx.config().is_single_shot(timeout);
    let mut trail = FailureTrail::default();
    let mut attempt = 0_u32;

    loop {
        match ctx.check_deadline() {
            Ok(()) => {}
            Err(WaitError::Cancelled { limit }) => return Ok(Polled::Cancelled(limit)),
            Err(other) => return Err(other),
        }

        attempt += 1;
        let reason = match probe() {
            ProbeResult::Satisfied(satisfied) => {
                debug!(%what, attempt, "condition satisfied");
                return Ok(Polled::Satisfied(satisfied));
            }
            ProbeResult::HardFail(error) => return Err(error),
            ProbeResult::SoftFail(reason) => reason,
        };
        trail.record(reason);

        let now = Instant::now();
        if single_shot || now >= stop {
            return Ok(Polled::Exhausted(trail.verdict()));
        }
        let remaining = stop - now;
        debug!(
            %what,
            %reason,
            attempt,
            remaining = %humanize(remaining),
            "condition not met, polling again"
        );
        match ctx.sleep(cadence.min(remaining)) {
            Ok(()) => {}
            Err(WaitError::Cancelled { limit }) => return Ok(Polled::Cancelled(limit)),
            Err(other) => return Err(other),
        }
    }
}

/// Render a duration as `1s 400ms`, `2s` or `350ms`
#[must_use]
pub fn humanize(duration: Duration) -> String {
    let secs = duration.as_secs();
    let millis = duration.subsec_millis();
    match (secs, millis) {
        (0, ms) => format!("{ms}ms"),
        (s, 0) => format!("{s}s"),
        (s, ms) => format!("{s}s {ms}ms"),
    }
}

/// `Element <strategy>="<selector>" on <path> was <state> after <n> second(s)!`
pub(crate) fn timeout_diagnostic(
    session: &dyn Session,
    strategy: Strategy,
    selector: &str,
    reason: SoftFail,
    timeout: Duration,
) -> String {
    format!(
        "Element {strategy}=\"{selector}\" on {} was {} after {}!",
        page::page_path(session),
        reason.state(),
        format_seconds(timeout)
    )
}

// =============================================================================
// POLL ENGINE
// =============================================================================

/// Waits for element conditions on one session
#[derive(Clone, Copy)]
pub struct PollEngine<'a> {
    session: &'a dyn Session,
    ctx: &'a WaitContext,
}

impl fmt::Debug for PollEngine<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PollEngine")
            .field("ctx", self.ctx)
            .finish_non_exhaustive()
    }
}

impl<'a> PollEngine<'a> {
    /// Engine over `session` governed by `ctx`
    #[must_use]
    pub const fn new(session: &'a dyn Session, ctx: &'a WaitContext) -> Self {
        Self { session, ctx }
    }

    /// Default timeout from the context's configuration
    #[must_use]
    pub const fn default_timeout(&self) -> Duration {
        self.ctx.config().small_timeout()
    }

    /// Wait up to `timeout` for `condition` on `locator`.
    ///
    /// Locators carrying the shadow delimiter are resolved through
    /// [`ShadowResolver`] on every probe. Malformed shadow chains, session
    /// failures and untranslatable selectors return `Err` without polling.
    pub fn wait_for(
        &self,
        locator: &Locator,
        condition: Condition,
        timeout: Duration,
    ) -> WaitResult<PollOutcome> {
        if shadow::is_shadow_selector(locator.value()) {
            let chain = ShadowChain::from_locator(locator)?;
            let resolver = ShadowResolver::new(self.session, self.ctx);
            return self.run(locator, timeout, || resolver.probe(&chain, condition));
        }
        let evaluator = ConditionEvaluator::new(self.session, self.ctx.config());
        self.run(locator, timeout, || evaluator.probe(locator, condition))
    }

    fn run<F>(&self, locator: &Locator, timeout: Duration, probe: F) -> WaitResult<PollOutcome>
    where
        F: FnMut() -> ProbeResult,
    {
        let cadence = self.ctx.config().cadence_for(timeout);
        Ok(match poll(self.ctx, locator, timeout, cadence, probe)? {
            Polled::Satisfied(satisfied) => PollOutcome::Satisfied(satisfied),
            Polled::Exhausted(reason) => PollOutcome::TimedOut(timeout_diagnostic(
                self.session,
                locator.strategy(),
                locator.value(),
                reason,
                timeout,
            )),
            Polled::Cancelled(limit) => PollOutcome::Cancelled(limit),
        })
    }

    fn wait_for_element(
        &self,
        locator: &Locator,
        condition: Condition,
        timeout: Duration,
    ) -> WaitResult<ElementHandle> {
        match self.wait_for(locator, condition, timeout)?.into_result()? {
            Satisfied::Element(handle) => Ok(handle),
            Satisfied::Holds => Err(WaitError::InvalidLocator {
                message: format!("{condition} wait on {locator} produced no element"),
            }),
        }
    }

    fn check_now(&self, locator: &Locator, condition: Condition) -> WaitResult<bool> {
        match self.wait_for(locator, condition, Duration::ZERO)? {
            PollOutcome::Satisfied(_) => Ok(true),
            PollOutcome::TimedOut(_) => Ok(false),
            PollOutcome::Cancelled(limit) => Err(WaitError::Cancelled { limit }),
        }
    }

    // -------------------------------------------------------------------------
    // Element waits
    // -------------------------------------------------------------------------

    /// Wait until attached to the DOM
    pub fn wait_for_element_present(
        &self,
        locator: &Locator,
        timeout: Duration,
    ) -> WaitResult<ElementHandle> {
        self.wait_for_element(locator, Condition::Present, timeout)
    }

    /// Wait until displayed
    pub fn wait_for_element_visible(
        &self,
        locator: &Locator,
        timeout: Duration,
    ) -> WaitResult<ElementHandle> {
        self.wait_for_element(locator, Condition::Visible, timeout)
    }

    /// Wait until displayed and enabled
    pub fn wait_for_element_interactable(
        &self,
        locator: &Locator,
        timeout: Duration,
    ) -> WaitResult<ElementHandle> {
        self.wait_for_element(locator, Condition::Interactable, timeout)
    }

    /// Wait until displayed and disabled
    pub fn wait_for_element_disabled(
        &self,
        locator: &Locator,
        timeout: Duration,
    ) -> WaitResult<ElementHandle> {
        self.wait_for_element(locator, Condition::Disabled, timeout)
    }

    /// Wait until detached from the DOM
    pub fn wait_for_element_absent(&self, locator: &Locator, timeout: Duration) -> WaitResult<()> {
        self.wait_for(locator, Condition::Absent, timeout)?
            .into_result()
            .map(|_| ())
    }

    /// Wait until hidden or gone
    pub fn wait_for_element_not_visible(
        &self,
        locator: &Locator,
        timeout: Duration,
    ) -> WaitResult<()> {
        self.wait_for(locator, Condition::NotVisible, timeout)?
            .into_result()
            .map(|_| ())
    }

    /// Single probe: attached right now?
    pub fn is_element_present(&self, locator: &Locator) -> WaitResult<bool> {
        self.check_now(locator, Condition::Present)
    }

    /// Single probe: displayed right now?
    pub fn is_element_visible(&self, locator: &Locator) -> WaitResult<bool> {
        self.check_now(locator, Condition::Visible)
    }

    /// Single probe: displayed and enabled right now?
    pub fn is_element_enabled(&self, locator: &Locator) -> WaitResult<bool> {
        self.check_now(locator, Condition::Interactable)
    }

    // -------------------------------------------------------------------------
    // Link text
    // -------------------------------------------------------------------------

    /// Wait for a link with exactly `text` to be attached
    pub fn wait_for_link_text_present(
        &self,
        text: &str,
        timeout: Duration,
    ) -> WaitResult<ElementHandle> {
        self.wait_for_element_present(&Locator::link_text(text)?, timeout)
    }

    /// Wait for a link with exactly `text` to be displayed
    pub fn wait_for_link_text_visible(
        &self,
        text: &str,
        timeout: Duration,
    ) -> WaitResult<ElementHandle> {
        self.wait_for_element_visible(&Locator::link_text(text)?, timeout)
    }

    /// Wait for a link containing `text` to be attached
    pub fn wait_for_partial_link_text_present(
        &self,
        text: &str,
        timeout: Duration,
    ) -> WaitResult<ElementHandle> {
        self.wait_for_element_present(&Locator::partial_link_text(text)?, timeout)
    }

    /// Wait for a link containing `text` to be displayed
    pub fn wait_for_partial_link_text_visible(
        &self,
        text: &str,
        timeout: Duration,
    ) -> WaitResult<ElementHandle> {
        self.wait_for_element_visible(&Locator::partial_link_text(text)?, timeout)
    }

    // -------------------------------------------------------------------------
    // Lists
    // -------------------------------------------------------------------------

    /// Every element currently matching `locator`, without waiting
    pub fn find_elements(&self, locator: &Locator) -> WaitResult<Vec<ElementHandle>> {
        if shadow::is_shadow_selector(locator.value()) {
            let chain = ShadowChain::from_locator(locator)?;
            return ShadowResolver::new(self.session, self.ctx).find_all(&chain);
        }
        ConditionEvaluator::new(self.session, self.ctx.config())
            .find_all(&SearchScope::Document, locator)
    }

    /// Only the displayed matches of `locator`, without waiting
    pub fn find_visible_elements(&self, locator: &Locator) -> WaitResult<Vec<ElementHandle>> {
        let mut visible = Vec::new();
        for handle in self.find_elements(locator)? {
            match self.session.is_displayed(handle.node()) {
                Ok(true) => visible.push(handle),
                Ok(false) => {}
                Err(error) if error.is_session_fatal() => return Err(error.into()),
                Err(_) => {}
            }
        }
        Ok(visible)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::context::Deadline;
    use crate::mock::{MockElement, MockSession};
    use crate::result::RemoteError;

    fn css(value: &str) -> Locator {
        Locator::css(value).unwrap()
    }

    fn fast_ctx() -> WaitContext {
        WaitContext::with_config(EngineConfig::default()).unwrap()
    }

    mod outcome_tests {
        use super::*;

        #[test]
        fn test_into_result() {
            assert!(PollOutcome::Satisfied(Satisfied::Holds).into_result().is_ok());
            let err = PollOutcome::TimedOut("msg".into()).into_result().unwrap_err();
            assert!(err.is_timeout());
            let err = PollOutcome::Cancelled("5 seconds".into())
                .into_result()
                .unwrap_err();
            assert!(err.is_cancelled());
        }

        #[test]
        fn test_humanize() {
            assert_eq!(humanize(Duration::from_millis(1400)), "1s 400ms");
            assert_eq!(humanize(Duration::from_secs(2)), "2s");
            assert_eq!(humanize(Duration::from_millis(350)), "350ms");
        }

        #[test]
        fn test_failure_trail_prefers_specific_reason() {
            let mut trail = FailureTrail::default();
            assert_eq!(trail.verdict(), SoftFail::NotPresent);
            trail.record(SoftFail::NotVisible);
            trail.record(SoftFail::NotPresent);
            assert_eq!(trail.verdict(), SoftFail::NotVisible);
            trail.record(SoftFail::Stale);
            assert_eq!(trail.verdict(), SoftFail::Stale);
        }
    }

    mod engine_tests {
        use super::*;

        #[test]
        fn test_immediate_success_does_not_sleep() {
            let session = MockSession::new();
            session.add_element("#a", MockElement::new("a"));
            let ctx = fast_ctx();
            let engine = PollEngine::new(&session, &ctx);
            let start = Instant::now();
            let outcome = engine
                .wait_for(&css("#a"), Condition::Visible, Duration::from_secs(5))
                .unwrap();
            assert!(outcome.is_satisfied());
            assert!(start.elapsed() < Duration::from_millis(40));
            assert_eq!(session.lookup_count("#a"), 1);
        }

        #[test]
        fn test_zero_timeout_is_single_probe() {
            let session = MockSession::new();
            let ctx = fast_ctx();
            let engine = PollEngine::new(&session, &ctx);
            let outcome = engine
                .wait_for(&css("#a"), Condition::Present, Duration::ZERO)
                .unwrap();
            assert!(matches!(outcome, PollOutcome::TimedOut(_)));
            assert_eq!(session.lookup_count("#a"), 1);
        }

        #[test]
        fn test_timeout_diagnostic_names_most_specific_reason() {
            let session = MockSession::new();
            session.add_element("#a", MockElement::new("a").hidden());
            session.add_missing("#a");
            let ctx = fast_ctx();
            let engine = PollEngine::new(&session, &ctx);
            let outcome = engine
                .wait_for(&css("#a"), Condition::Visible, Duration::from_millis(300))
                .unwrap();
            assert_eq!(
                outcome,
                PollOutcome::TimedOut(
                    "Element css selector=\"#a\" on /dashboard was hidden after 0.3 seconds!"
                        .into()
                )
            );
        }

        #[test]
        fn test_hard_fail_propagates_without_polling() {
            let session = MockSession::new();
            session.add_lookup_error("#a", RemoteError::InvalidSession("gone".into()));
            let ctx = fast_ctx();
            let engine = PollEngine::new(&session, &ctx);
            let err = engine
                .wait_for(&css("#a"), Condition::Visible, Duration::from_secs(5))
                .unwrap_err();
            assert!(matches!(err, WaitError::Session(RemoteError::InvalidSession(_))));
            assert_eq!(session.lookup_count("#a"), 1);
        }

        #[test]
        fn test_expired_deadline_cancels_before_probing() {
            let session = MockSession::new();
            let start = Instant::now() - Duration::from_secs(3);
            let ctx = fast_ctx().with_deadline(Deadline::starting_at(start, Duration::from_secs(1)));
            let engine = PollEngine::new(&session, &ctx);
            let outcome = engine
                .wait_for(&css("#a"), Condition::Visible, Duration::from_secs(5))
                .unwrap();
            assert_eq!(outcome, PollOutcome::Cancelled("1 second".into()));
            assert!(session.is_untouched());
        }

        #[test]
        fn test_is_element_checks_are_single_shot() {
            let session = MockSession::new();
            session.add_element("#a", MockElement::new("a").hidden());
            let ctx = fast_ctx();
            let engine = PollEngine::new(&session, &ctx);
            assert!(engine.is_element_present(&css("#a")).unwrap());
            assert!(!engine.is_element_visible(&css("#a")).unwrap());
            assert!(!engine.is_element_present(&css("#b")).unwrap());
        }

        #[test]
        fn test_absent_and_not_visible_waits() {
            let session = MockSession::new();
            session.add_element("#spinner", MockElement::new("s"));
            session.add_element("#spinner", MockElement::new("s").hidden());
            session.add_missing("#spinner");
            let ctx = fast_ctx();
            let engine = PollEngine::new(&session, &ctx);
            engine
                .wait_for_element_not_visible(&css("#spinner"), Duration::from_secs(2))
                .unwrap();
            engine
                .wait_for_element_absent(&css("#spinner"), Duration::from_secs(2))
                .unwrap();
        }

        #[test]
        fn test_link_text_wait_uses_native_strategy() {
            let session = MockSession::new();
            session.add_element("Sign in", MockElement::new("link").tag("a"));
            let ctx = fast_ctx();
            let engine = PollEngine::new(&session, &ctx);
            let handle = engine
                .wait_for_link_text_visible("Sign in", Duration::from_secs(1))
                .unwrap();
            assert_eq!(handle.locator().strategy(), Strategy::LinkText);
            assert_eq!(session.call_count("find_element:document|Sign in"), 1);
        }

        #[test]
        fn test_find_visible_elements_filters_hidden() {
            let session = MockSession::new();
            session.push_lookup(
                &SearchScope::Document,
                "li",
                crate::mock::MockLookup::FoundAll(vec![
                    MockElement::new("a"),
                    MockElement::new("b").hidden(),
                ]),
            );
            let ctx = fast_ctx();
            let engine = PollEngine::new(&session, &ctx);
            assert_eq!(engine.find_elements(&css("li")).unwrap().len(), 2);
            let visible = engine.find_visible_elements(&css("li")).unwrap();
            assert_eq!(visible.len(), 1);
            assert_eq!(visible[0].node().as_str(), "a");
        }
    }
}
