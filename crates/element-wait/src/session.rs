//! Remote session seam.
//!
//! The engine never talks to a browser directly. Everything it needs is
//! expressed through the synchronous [`Session`] trait so that real
//! WebDriver clients and the in-memory [`crate::mock::MockSession`] are
//! interchangeable.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;

use crate::locator::Locator;
use crate::result::RemoteError;

/// W3C web element reference key
pub const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";

/// W3C shadow root reference key
pub const SHADOW_ROOT_KEY: &str = "shadow-6066-11e4-a52e-4f735466cecf";

// =============================================================================
// NODE REFERENCES
// =============================================================================

/// Opaque remote node identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId(String);

impl NodeId {
    /// Wrap a remote identifier
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The raw identifier
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A node reference as it crosses the script boundary
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeRef {
    /// A regular element
    Element(NodeId),
    /// A shadow root
    ShadowRoot(NodeId),
}

impl NodeRef {
    /// Encode as a W3C reference object for script arguments
    #[must_use]
    pub fn to_json(&self) -> Value {
        match self {
            Self::Element(id) => json!({ ELEMENT_KEY: id.as_str() }),
            Self::ShadowRoot(id) => json!({ SHADOW_ROOT_KEY: id.as_str() }),
        }
    }

    /// Decode a script result.
    ///
    /// `null` and anything that is not a W3C reference object decode to
    /// `None`, which callers treat as "not found".
    #[must_use]
    pub fn from_script_value(value: &Value) -> Option<Self> {
        let object = value.as_object()?;
        if let Some(id) = object.get(ELEMENT_KEY).and_then(Value::as_str) {
            return Some(Self::Element(NodeId::new(id)));
        }
        object
            .get(SHADOW_ROOT_KEY)
            .and_then(Value::as_str)
            .map(|id| Self::ShadowRoot(NodeId::new(id)))
    }

    /// The underlying node id
    #[must_use]
    pub const fn id(&self) -> &NodeId {
        match self {
            Self::Element(id) | Self::ShadowRoot(id) => id,
        }
    }
}

/// Where a lookup starts
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SearchScope {
    /// The top-level document
    #[default]
    Document,
    /// Descendants of an element
    Element(NodeId),
    /// Inside a shadow root
    ShadowRoot(NodeId),
}

impl SearchScope {
    /// The scope as a script argument (`null` for the document)
    #[must_use]
    pub fn to_script_arg(&self) -> Value {
        match self {
            Self::Document => Value::Null,
            Self::Element(id) => NodeRef::Element(id.clone()).to_json(),
            Self::ShadowRoot(id) => NodeRef::ShadowRoot(id.clone()).to_json(),
        }
    }
}

// =============================================================================
// CAPABILITIES
// =============================================================================

/// How shadow roots can be reached on a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShadowSupport {
    /// Native shadow-root accessor and native lookups inside roots
    Native,
    /// Scripted `shadowRoot` reads and scripted lookups
    Scripted,
    /// Shadow roots cannot be reached; carries the reason
    Unsupported(String),
}

/// Browser and driver identification reported by the session
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Capabilities {
    /// e.g. `"chrome"`, `"firefox"`, `"msedge"`
    pub browser_name: String,
    /// e.g. `"120.0.6099.71"`
    pub browser_version: String,
    /// Driver version, when the driver reports one
    pub driver_version: Option<String>,
}

impl Capabilities {
    /// Build capabilities from name and versions
    #[must_use]
    pub fn new(
        browser_name: impl Into<String>,
        browser_version: impl Into<String>,
        driver_version: Option<&str>,
    ) -> Self {
        Self {
            browser_name: browser_name.into(),
            browser_version: browser_version.into(),
            driver_version: driver_version.map(str::to_string),
        }
    }

    /// Whether the browser is Chromium-based
    #[must_use]
    pub fn is_chromium(&self) -> bool {
        matches!(
            self.browser_name.to_ascii_lowercase().as_str(),
            "chrome" | "chromium" | "msedge" | "microsoftedge" | "edge" | "opera" | "brave"
        )
    }

    /// Browser major version, if parseable
    #[must_use]
    pub fn browser_major(&self) -> Option<u32> {
        major_version(&self.browser_version)
    }

    /// Driver major version, if reported and parseable
    #[must_use]
    pub fn driver_major(&self) -> Option<u32> {
        self.driver_version.as_deref().and_then(major_version)
    }

    /// Shadow-root access for this session given the first browser major
    /// version with a native accessor.
    ///
    /// A modern Chromium driven by an older driver cannot pierce shadow
    /// roots either way and is reported as unsupported.
    #[must_use]
    pub fn shadow_support(&self, native_min_version: u32) -> ShadowSupport {
        if !self.is_chromium() {
            return ShadowSupport::Scripted;
        }
        match self.browser_major() {
            Some(major) if major >= native_min_version => match self.driver_major() {
                Some(driver) if driver < native_min_version => ShadowSupport::Unsupported(format!(
                    "{} {} requires a driver >= {native_min_version} to access shadow roots, \
                     found driver {driver}; upgrade the driver",
                    self.browser_name, self.browser_version
                )),
                _ => ShadowSupport::Native,
            },
            _ => ShadowSupport::Scripted,
        }
    }
}

fn major_version(version: &str) -> Option<u32> {
    let digits: String = version
        .trim()
        .chars()
        .take_while(char::is_ascii_digit)
        .collect();
    digits.parse().ok()
}

// =============================================================================
// SESSION TRAIT
// =============================================================================

/// Remote browser session primitives.
///
/// Each method is one remote round trip. Implementations report failures
/// with [`RemoteError`] so the engine can tell transient conditions
/// (missing or stale nodes) from a dead session.
pub trait Session {
    /// Find the first element matching `locator` within `scope`
    fn find_element(&self, scope: &SearchScope, locator: &Locator) -> Result<NodeId, RemoteError>;

    /// Find every element matching `locator` within `scope`
    fn find_elements(
        &self,
        scope: &SearchScope,
        locator: &Locator,
    ) -> Result<Vec<NodeId>, RemoteError>;

    /// Whether the element is rendered
    fn is_displayed(&self, node: &NodeId) -> Result<bool, RemoteError>;

    /// Whether the element is enabled
    fn is_enabled(&self, node: &NodeId) -> Result<bool, RemoteError>;

    /// Read an attribute
    fn attribute(&self, node: &NodeId, name: &str) -> Result<Option<String>, RemoteError>;

    /// Whether the element carries `name` at all
    fn has_attribute(&self, node: &NodeId, name: &str) -> Result<bool, RemoteError> {
        Ok(self.attribute(node, name)?.is_some())
    }

    /// Rendered text, trimmed
    fn text(&self, node: &NodeId) -> Result<String, RemoteError>;

    /// Lower-case tag name
    fn tag_name(&self, node: &NodeId) -> Result<String, RemoteError>;

    /// Native shadow-root accessor; `Ok(None)` when no root is attached
    fn shadow_root(&self, node: &NodeId) -> Result<Option<NodeId>, RemoteError>;

    /// Run a synchronous script; W3C references in `args` are resolved by
    /// the remote end
    fn execute_script(&self, script: &str, args: &[Value]) -> Result<Value, RemoteError>;

    /// URL of the current top-level browsing context
    fn current_url(&self) -> Result<String, RemoteError>;

    /// Browser and driver identification
    fn capabilities(&self) -> Capabilities;

    /// Open window handles in creation order
    fn window_handles(&self) -> Result<Vec<String>, RemoteError>;

    /// Make `handle` the current window
    fn switch_to_window(&self, handle: &str) -> Result<(), RemoteError>;
}
