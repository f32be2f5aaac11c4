//! Resolved element handles.

use serde::{Deserialize, Serialize};

use crate::locator::Locator;
use crate::session::{NodeId, Session};

/// Snapshot of element state captured at resolution time.
///
/// Every field is best effort: a failed remote read leaves it `None`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DebugAttributes {
    /// `id` attribute
    pub id: Option<String>,
    /// Tag name
    pub tag: Option<String>,
    /// Displayed at resolution time
    pub displayed: Option<bool>,
    /// Enabled at resolution time
    pub enabled: Option<bool>,
    /// Locators that led to this element, outermost first
    pub locators: Vec<String>,
}

impl DebugAttributes {
    /// Read the attribute bag for `node`
    #[must_use]
    pub fn collect(session: &dyn Session, node: &NodeId, locators: Vec<String>) -> Self {
        Self {
            id: session.attribute(node, "id").ok().flatten(),
            tag: session.tag_name(node).ok(),
            displayed: session.is_displayed(node).ok(),
            enabled: session.is_enabled(node).ok(),
            locators,
        }
    }
}

/// A remote node plus the locator that produced it.
///
/// Handles are only valid for the probe that created them; the engine
/// re-resolves on every poll attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementHandle {
    node: NodeId,
    locator: Locator,
    debug: Option<DebugAttributes>,
}

impl ElementHandle {
    /// Handle without debug attributes
    #[must_use]
    pub const fn new(node: NodeId, locator: Locator) -> Self {
        Self {
            node,
            locator,
            debug: None,
        }
    }

    /// Resolve a handle, attaching debug attributes when `diagnostics` is on
    #[must_use]
    pub fn resolved(
        session: &dyn Session,
        node: NodeId,
        locator: Locator,
        diagnostics: bool,
    ) -> Self {
        let debug = diagnostics
            .then(|| DebugAttributes::collect(session, &node, vec![locator.to_string()]));
        Self {
            node,
            locator,
            debug,
        }
    }

    /// Replace the producing locator, keeping any debug trail
    #[must_use]
    pub fn with_locator(mut self, locator: Locator) -> Self {
        if let Some(debug) = self.debug.as_mut() {
            debug.locators.insert(0, locator.to_string());
        }
        self.locator = locator;
        self
    }

    /// Remote node id
    #[must_use]
    pub const fn node(&self) -> &NodeId {
        &self.node
    }

    /// Locator that produced the handle
    #[must_use]
    pub const fn locator(&self) -> &Locator {
        &self.locator
    }

    /// Debug attributes, present only with diagnostics enabled
    #[must_use]
    pub const fn debug(&self) -> Option<&DebugAttributes> {
        self.debug.as_ref()
    }
}
