//! Single-probe condition evaluation.
//!
//! A probe asks the session once whether a condition holds and classifies
//! the answer. It never loops or sleeps; that is the poll engine's job.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::trace;

use crate::config::EngineConfig;
use crate::element::ElementHandle;
use crate::locator::Locator;
use crate::result::{RemoteError, WaitError};
use crate::scripts::{needs_scripted_query, QUERY_SELECTOR_ALL_SCRIPT, QUERY_SELECTOR_SCRIPT};
use crate::session::{NodeId, NodeRef, SearchScope, Session};
use crate::translator;

// =============================================================================
// CONDITIONS AND OUTCOMES
// =============================================================================

/// What a wait is waiting for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    /// Attached to the DOM, visibility irrelevant
    Present,
    /// Not attached to the DOM
    Absent,
    /// Attached and displayed
    Visible,
    /// Hidden, absent or stale
    NotVisible,
    /// Displayed, without a `disabled` attribute, and enabled
    Interactable,
    /// Displayed and either carrying `disabled` or not enabled
    Disabled,
}

impl Condition {
    /// Whether a missing element satisfies the condition
    #[must_use]
    pub const fn holds_when_missing(&self) -> bool {
        matches!(self, Self::Absent | Self::NotVisible)
    }

    /// Whether a satisfied probe yields an element handle
    #[must_use]
    pub const fn yields_element(&self) -> bool {
        !self.holds_when_missing()
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Present => "present",
            Self::Absent => "absent",
            Self::Visible => "visible",
            Self::NotVisible => "not visible",
            Self::Interactable => "interactable",
            Self::Disabled => "disabled",
        };
        f.write_str(name)
    }
}

/// Why a probe did not satisfy its condition this time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SoftFail {
    /// Nothing matched
    NotPresent,
    /// Matched, but the reference went stale mid-probe
    Stale,
    /// Matched but not displayed
    NotVisible,
    /// Matched and displayed but disabled
    Disabled,
    /// Still displayed (negative wait)
    StillVisible,
    /// Still enabled (waiting for disabled)
    StillEnabled,
    /// Still attached (waiting for absence)
    StillPresent,
    /// A page-level condition has not settled yet
    NotReady,
    /// Visible, but its text does not hold the expected text
    TextMismatch,
}

impl SoftFail {
    /// State phrase used in timeout diagnostics
    #[must_use]
    pub const fn state(&self) -> &'static str {
        match self {
            Self::NotPresent => "not present",
            Self::Stale => "not present on DOM (stale)",
            Self::NotVisible => "hidden",
            Self::Disabled => "disabled",
            Self::StillVisible => "still visible",
            Self::StillEnabled => "still enabled",
            Self::StillPresent => "still present",
            Self::NotReady => "not ready",
            Self::TextMismatch => "visible without the expected text",
        }
    }

    /// Whether the element was found at the time of this failure
    #[must_use]
    pub const fn element_seen(&self) -> bool {
        !matches!(self, Self::NotPresent | Self::NotReady)
    }
}

impl fmt::Display for SoftFail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.state())
    }
}

/// A satisfied probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Satisfied {
    /// The matching element
    Element(ElementHandle),
    /// A condition with nothing to hand back (absence, page state)
    Holds,
}

impl Satisfied {
    /// The element, if the condition produced one
    #[must_use]
    pub fn into_element(self) -> Option<ElementHandle> {
        match self {
            Self::Element(handle) => Some(handle),
            Self::Holds => None,
        }
    }
}

/// Classified outcome of one probe
#[derive(Debug)]
pub enum ProbeResult {
    /// Condition holds
    Satisfied(Satisfied),
    /// Condition does not hold yet; keep polling
    SoftFail(SoftFail),
    /// Polling cannot help; abort
    HardFail(WaitError),
}

impl ProbeResult {
    /// Map a remote failure, keeping session-fatal errors hard
    pub(crate) fn remote(error: RemoteError, soft: SoftFail) -> Self {
        if error.is_session_fatal() {
            Self::HardFail(WaitError::Session(error))
        } else {
            Self::SoftFail(soft)
        }
    }
}

// =============================================================================
// EVALUATOR
// =============================================================================

/// Performs single probes against a session
#[derive(Clone, Copy)]
pub struct ConditionEvaluator<'a> {
    session: &'a dyn Session,
    config: &'a EngineConfig,
    native_shadow: bool,
}

impl fmt::Debug for ConditionEvaluator<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConditionEvaluator")
            .field("native_shadow", &self.native_shadow)
            .finish_non_exhaustive()
    }
}

impl<'a> ConditionEvaluator<'a> {
    /// Evaluator over `session`
    #[must_use]
    pub const fn new(session: &'a dyn Session, config: &'a EngineConfig) -> Self {
        Self {
            session,
            config,
            native_shadow: false,
        }
    }

    /// Use native lookups inside shadow roots instead of scripted ones
    #[must_use]
    pub const fn with_native_shadow_queries(mut self, enabled: bool) -> Self {
        self.native_shadow = enabled;
        self
    }

    /// Probe `condition` for `locator` in the document
    pub fn probe(&self, locator: &Locator, condition: Condition) -> ProbeResult {
        self.probe_in(&SearchScope::Document, locator, condition)
    }

    /// Probe `condition` for `locator` within `scope`
    pub fn probe_in(
        &self,
        scope: &SearchScope,
        locator: &Locator,
        condition: Condition,
    ) -> ProbeResult {
        let node = match self.locate(scope, locator) {
            Ok(Some(node)) => node,
            Ok(None) if condition.holds_when_missing() => {
                return ProbeResult::Satisfied(Satisfied::Holds)
            }
            Ok(None) => return ProbeResult::SoftFail(SoftFail::NotPresent),
            Err(error) => return ProbeResult::HardFail(error),
        };
        trace!(%locator, %condition, node = %node, "probe matched");

        match condition {
            Condition::Present => self.satisfied(node, locator),
            Condition::Absent => ProbeResult::SoftFail(SoftFail::StillPresent),
            Condition::Visible => match self.session.is_displayed(&node) {
                Ok(true) => self.satisfied(node, locator),
                Ok(false) => ProbeResult::SoftFail(SoftFail::NotVisible),
                Err(error) => ProbeResult::remote(error, SoftFail::Stale),
            },
            Condition::NotVisible => match self.session.is_displayed(&node) {
                Ok(true) => ProbeResult::SoftFail(SoftFail::StillVisible),
                Ok(false) => ProbeResult::Satisfied(Satisfied::Holds),
                Err(error) if error.is_session_fatal() => {
                    ProbeResult::HardFail(WaitError::Session(error))
                }
                // a node that went away is not visible either
                Err(_) => ProbeResult::Satisfied(Satisfied::Holds),
            },
            Condition::Interactable => match self.visible_and_disabled(&node) {
                Ok(false) => self.satisfied(node, locator),
                Ok(true) => ProbeResult::SoftFail(SoftFail::Disabled),
                Err(result) => result,
            },
            Condition::Disabled => match self.visible_and_disabled(&node) {
                Ok(true) => self.satisfied(node, locator),
                Ok(false) => ProbeResult::SoftFail(SoftFail::StillEnabled),
                Err(result) => result,
            },
        }
    }

    /// Every element matching `locator` within `scope`.
    ///
    /// Not-found is an empty list; only session-fatal errors and
    /// untranslatable selectors fail.
    pub fn find_all(
        &self,
        scope: &SearchScope,
        locator: &Locator,
    ) -> Result<Vec<ElementHandle>, WaitError> {
        let nodes = match self.query_plan(scope, locator)? {
            QueryPlan::Native(query) => self.session.find_elements(scope, &query),
            QueryPlan::Scripted(css) => self
                .session
                .execute_script(QUERY_SELECTOR_ALL_SCRIPT, &[css.into(), scope.to_script_arg()])
                .map(|value| {
                    value
                        .as_array()
                        .map(|items| {
                            items
                                .iter()
                                .filter_map(NodeRef::from_script_value)
                                .map(|node| node.id().clone())
                                .collect()
                        })
                        .unwrap_or_default()
                }),
        };
        match nodes {
            Ok(nodes) => Ok(nodes
                .into_iter()
                .map(|node| self.handle(node, locator))
                .collect()),
            Err(error) if error.is_session_fatal() => Err(WaitError::Session(error)),
            Err(_) => Ok(Vec::new()),
        }
    }

    /// Find the first match, `Ok(None)` when nothing matches.
    ///
    /// Transient remote errors count as not found; session-fatal ones and
    /// untranslatable selectors are returned as errors.
    pub fn locate(
        &self,
        scope: &SearchScope,
        locator: &Locator,
    ) -> Result<Option<NodeId>, WaitError> {
        let found = match self.query_plan(scope, locator)? {
            QueryPlan::Native(query) => self.session.find_element(scope, &query).map(Some),
            QueryPlan::Scripted(css) => self
                .session
                .execute_script(QUERY_SELECTOR_SCRIPT, &[css.into(), scope.to_script_arg()])
                .map(|value| match NodeRef::from_script_value(&value) {
                    Some(NodeRef::Element(node)) => Some(node),
                    _ => None,
                }),
        };
        match found {
            Ok(node) => Ok(node),
            Err(error) if error.is_session_fatal() => Err(WaitError::Session(error)),
            Err(error) => {
                trace!(%locator, %error, "lookup treated as not found");
                Ok(None)
            }
        }
    }

    /// Native lookups for anything the driver understands; scripted
    /// `querySelector` for `:contains` selectors and for shadow roots the
    /// driver cannot search.
    fn query_plan(&self, scope: &SearchScope, locator: &Locator) -> Result<QueryPlan, WaitError> {
        let inside_shadow = matches!(scope, SearchScope::ShadowRoot(_));
        if !inside_shadow && !needs_scripted_query(locator.value()) {
            return Ok(QueryPlan::Native(locator.clone()));
        }
        let css = translator::to_css(locator)?;
        if needs_scripted_query(&css) || (inside_shadow && !self.native_shadow) {
            return Ok(QueryPlan::Scripted(css));
        }
        Ok(QueryPlan::Native(Locator::css(css)?))
    }

    /// `Ok(disabled)` for a displayed element, or the soft/hard failure
    /// that stopped the check. The attribute check short-circuits
    /// `is_enabled`.
    fn visible_and_disabled(&self, node: &NodeId) -> Result<bool, ProbeResult> {
        match self.session.is_displayed(node) {
            Ok(true) => {}
            Ok(false) => return Err(ProbeResult::SoftFail(SoftFail::NotVisible)),
            Err(error) => return Err(ProbeResult::remote(error, SoftFail::Stale)),
        }
        match self.session.has_attribute(node, "disabled") {
            Ok(true) => return Ok(true),
            Ok(false) => {}
            Err(error) => return Err(ProbeResult::remote(error, SoftFail::Stale)),
        }
        self.session
            .is_enabled(node)
            .map(|enabled| !enabled)
            .map_err(|error| ProbeResult::remote(error, SoftFail::Stale))
    }

    fn handle(&self, node: NodeId, locator: &Locator) -> ElementHandle {
        ElementHandle::resolved(self.session, node, locator.clone(), self.config.diagnostics)
    }

    fn satisfied(&self, node: NodeId, locator: &Locator) -> ProbeResult {
        ProbeResult::Satisfied(Satisfied::Element(self.handle(node, locator)))
    }
}

enum QueryPlan {
    Native(Locator),
    Scripted(String),
}
