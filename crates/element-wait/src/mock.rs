//! Scriptable in-memory session for tests.
//!
//! [`MockSession`] answers every [`Session`] primitive from queues set up by
//! the test. A lookup queue keeps returning its last entry once drained, so
//! a single `add_element` models a page that stays put while a sequence of
//! pushes models a page that changes between probes.

use serde_json::{json, Value};
use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};

use crate::locator::Locator;
use crate::result::RemoteError;
use crate::scripts::{
    TextFilter, QUERY_SELECTOR_ALL_SCRIPT, QUERY_SELECTOR_SCRIPT, READY_STATE_SCRIPT,
    SHADOW_ROOT_SCRIPT,
};
use crate::session::{Capabilities, NodeId, NodeRef, SearchScope, Session};

// =============================================================================
// MOCK ELEMENT
// =============================================================================

/// State of one mock DOM node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockElement {
    id: String,
    tag: String,
    displayed: bool,
    enabled: bool,
    disabled_attr: bool,
    stale: bool,
    attributes: HashMap<String, String>,
    shadow_root: Option<String>,
    shadow_attach_after: u32,
    text: String,
}

impl MockElement {
    /// A visible, enabled `div`
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            tag: "div".to_string(),
            displayed: true,
            enabled: true,
            disabled_attr: false,
            stale: false,
            attributes: HashMap::new(),
            shadow_root: None,
            shadow_attach_after: 0,
            text: String::new(),
        }
    }

    /// Set the tag name
    #[must_use]
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = tag.into();
        self
    }

    /// Not rendered
    #[must_use]
    pub const fn hidden(mut self) -> Self {
        self.displayed = false;
        self
    }

    /// `is_enabled` reports false
    #[must_use]
    pub const fn not_enabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Carries a `disabled` attribute; `is_enabled` is unaffected
    #[must_use]
    pub const fn disabled_by_attribute(mut self) -> Self {
        self.disabled_attr = true;
        self
    }

    /// Every state read reports a stale reference
    #[must_use]
    pub const fn stale(mut self) -> Self {
        self.stale = true;
        self
    }

    /// Set an attribute
    #[must_use]
    pub fn attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    /// Rendered text content
    #[must_use]
    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    /// Host a shadow root with id `root`
    #[must_use]
    pub fn shadow_root(mut self, root: impl Into<String>) -> Self {
        self.shadow_root = Some(root.into());
        self
    }

    /// The shadow root only appears after `reads` failed reads
    #[must_use]
    pub const fn shadow_attached_after(mut self, reads: u32) -> Self {
        self.shadow_attach_after = reads;
        self
    }

    /// Node id
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }
}

/// One scripted answer to a lookup
#[derive(Debug, Clone, PartialEq)]
pub enum MockLookup {
    /// One matching element
    Found(MockElement),
    /// Several matching elements, first one wins for single lookups
    FoundAll(Vec<MockElement>),
    /// Nothing matches
    Missing,
    /// The lookup fails remotely
    Error(RemoteError),
}

// =============================================================================
// MOCK SESSION
// =============================================================================

#[derive(Debug)]
struct MockState {
    lookups: HashMap<String, VecDeque<MockLookup>>,
    elements: HashMap<String, MockElement>,
    shadow_reads: HashMap<String, u32>,
    scripts: HashMap<String, VecDeque<Result<Value, RemoteError>>>,
    ready_states: VecDeque<String>,
    windows: VecDeque<Vec<String>>,
    windows_scripted: bool,
    last_windows: Vec<String>,
    current_window: Option<String>,
    url: Option<String>,
    capabilities: Capabilities,
    fatal: Option<RemoteError>,
    history: Vec<String>,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            lookups: HashMap::new(),
            elements: HashMap::new(),
            shadow_reads: HashMap::new(),
            scripts: HashMap::new(),
            ready_states: VecDeque::from(vec!["complete".to_string()]),
            windows: VecDeque::from(vec![vec!["main".to_string()]]),
            windows_scripted: false,
            last_windows: vec!["main".to_string()],
            current_window: Some("main".to_string()),
            url: Some("https://example.com/dashboard".to_string()),
            capabilities: Capabilities::new("chrome", "120.0.6099.71", Some("120.0.6099.71")),
            fatal: None,
            history: Vec::new(),
        }
    }
}

/// Deterministic in-memory [`Session`]
#[derive(Debug, Default)]
pub struct MockSession {
    state: RefCell<MockState>,
}

fn scope_key(scope: &SearchScope) -> String {
    match scope {
        SearchScope::Document => "document".to_string(),
        SearchScope::Element(id) => format!("element:{id}"),
        SearchScope::ShadowRoot(id) => format!("shadow:{id}"),
    }
}

fn lookup_key(scope: &SearchScope, selector: &str) -> String {
    format!("{}|{selector}", scope_key(scope))
}

/// Pop the front entry, keeping the last one around forever
fn next_sticky<T: Clone>(queue: &mut VecDeque<T>) -> Option<T> {
    if queue.len() > 1 {
        queue.pop_front()
    } else {
        queue.front().cloned()
    }
}

impl MockSession {
    /// Empty page on a modern Chrome at `https://example.com/dashboard`
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // -------------------------------------------------------------------------
    // Setup
    // -------------------------------------------------------------------------

    /// Queue a lookup answer for `selector` within `scope`
    pub fn push_lookup(&self, scope: &SearchScope, selector: &str, lookup: MockLookup) {
        self.state
            .borrow_mut()
            .lookups
            .entry(lookup_key(scope, selector))
            .or_default()
            .push_back(lookup);
    }

    /// Queue a document-level match for `selector`
    pub fn add_element(&self, selector: &str, element: MockElement) {
        self.push_lookup(&SearchScope::Document, selector, MockLookup::Found(element));
    }

    /// Queue a match for `selector` inside the shadow root `root`
    pub fn add_shadow_element(&self, root: &str, selector: &str, element: MockElement) {
        self.push_lookup(
            &SearchScope::ShadowRoot(NodeId::new(root)),
            selector,
            MockLookup::Found(element),
        );
    }

    /// Queue a document-level miss for `selector`
    pub fn add_missing(&self, selector: &str) {
        self.push_lookup(&SearchScope::Document, selector, MockLookup::Missing);
    }

    /// Queue a document-level remote failure for `selector`
    pub fn add_lookup_error(&self, selector: &str, error: RemoteError) {
        self.push_lookup(&SearchScope::Document, selector, MockLookup::Error(error));
    }

    /// Replace browser capabilities
    pub fn set_capabilities(&self, capabilities: Capabilities) {
        self.state.borrow_mut().capabilities = capabilities;
    }

    /// Set the current URL; `None` models a closed browser
    pub fn set_url(&self, url: Option<&str>) {
        self.state.borrow_mut().url = url.map(str::to_string);
    }

    /// Queue the window handle list returned by the next read
    pub fn push_window_handles(&self, handles: &[&str]) {
        let handles = handles.iter().map(|h| (*h).to_string()).collect();
        let mut state = self.state.borrow_mut();
        if !state.windows_scripted {
            state.windows.clear();
            state.windows_scripted = true;
        }
        state.windows.push_back(handles);
    }

    /// Queue `document.readyState` values
    pub fn set_ready_states(&self, states: &[&str]) {
        self.state.borrow_mut().ready_states = states.iter().map(|s| (*s).to_string()).collect();
    }

    /// Queue a response for an arbitrary script
    pub fn push_script_response(&self, script: &str, response: Result<Value, RemoteError>) {
        self.state
            .borrow_mut()
            .scripts
            .entry(script.to_string())
            .or_default()
            .push_back(response);
    }

    /// Make every subsequent call fail with `error`
    pub fn fail_with(&self, error: RemoteError) {
        self.state.borrow_mut().fatal = Some(error);
    }

    // -------------------------------------------------------------------------
    // Verification
    // -------------------------------------------------------------------------

    /// Every call in order
    #[must_use]
    pub fn history(&self) -> Vec<String> {
        self.state.borrow().history.clone()
    }

    /// Number of calls whose record starts with `prefix`
    #[must_use]
    pub fn call_count(&self, prefix: &str) -> usize {
        self.state
            .borrow()
            .history
            .iter()
            .filter(|call| call.starts_with(prefix))
            .count()
    }

    /// Number of lookups (native or scripted, any scope) for `selector`
    #[must_use]
    pub fn lookup_count(&self, selector: &str) -> usize {
        let suffix = format!("|{selector}");
        self.state
            .borrow()
            .history
            .iter()
            .filter(|call| {
                (call.starts_with("find_element") || call.starts_with("script_query"))
                    && call.ends_with(&suffix)
            })
            .count()
    }

    /// Whether no remote call was made at all
    #[must_use]
    pub fn is_untouched(&self) -> bool {
        self.state.borrow().history.is_empty()
    }

    /// Currently selected window
    #[must_use]
    pub fn current_window(&self) -> Option<String> {
        self.state.borrow().current_window.clone()
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    fn record(&self, call: String) -> Result<(), RemoteError> {
        let mut state = self.state.borrow_mut();
        state.history.push(call);
        match &state.fatal {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }

    fn matching(
        &self,
        scope: &SearchScope,
        selector: &str,
    ) -> Result<Vec<MockElement>, RemoteError> {
        let answer = self
            .state
            .borrow_mut()
            .lookups
            .get_mut(&lookup_key(scope, selector))
            .and_then(next_sticky)
            .unwrap_or(MockLookup::Missing);
        match answer {
            MockLookup::Found(element) => Ok(vec![element]),
            MockLookup::FoundAll(elements) => Ok(elements),
            MockLookup::Missing => Ok(Vec::new()),
            MockLookup::Error(error) => Err(error),
        }
    }

    fn register(&self, found: Vec<MockElement>) -> Vec<NodeId> {
        let mut state = self.state.borrow_mut();
        let ids = found.iter().map(|e| NodeId::new(e.id.clone())).collect();
        for element in found {
            state.elements.insert(element.id.clone(), element);
        }
        ids
    }

    fn lookup(&self, scope: &SearchScope, selector: &str) -> Result<Vec<NodeId>, RemoteError> {
        let found = self.matching(scope, selector)?;
        Ok(self.register(found))
    }

    /// What the query scripts would return: a trailing `:contains(...)` is
    /// split off and applied to the text of the base selector's matches
    fn scripted_lookup(
        &self,
        scope: &SearchScope,
        css: &str,
    ) -> Result<Vec<NodeId>, RemoteError> {
        let Some(filter) = TextFilter::parse(css) else {
            return self.lookup(scope, css);
        };
        let found = self
            .matching(scope, filter.base())?
            .into_iter()
            .filter(|element| filter.matches(&element.text))
            .collect();
        Ok(self.register(found))
    }

    fn element(&self, node: &NodeId) -> Result<MockElement, RemoteError> {
        match self.state.borrow().elements.get(node.as_str()) {
            Some(element) if element.stale => Err(RemoteError::StaleElement(node.to_string())),
            Some(element) => Ok(element.clone()),
            None => Err(RemoteError::StaleElement(node.to_string())),
        }
    }

    fn read_shadow_root(&self, node: &NodeId) -> Result<Option<NodeId>, RemoteError> {
        let element = self.element(node)?;
        let Some(root) = element.shadow_root else {
            return Ok(None);
        };
        let mut state = self.state.borrow_mut();
        let reads = state.shadow_reads.entry(element.id).or_insert(0);
        *reads += 1;
        if *reads > element.shadow_attach_after {
            Ok(Some(NodeId::new(root)))
        } else {
            Ok(None)
        }
    }

    fn script_scope(arg: Option<&Value>) -> SearchScope {
        match arg.and_then(NodeRef::from_script_value) {
            Some(NodeRef::Element(id)) => SearchScope::Element(id),
            Some(NodeRef::ShadowRoot(id)) => SearchScope::ShadowRoot(id),
            None => SearchScope::Document,
        }
    }

    fn run_script(&self, script: &str, args: &[Value]) -> Result<Value, RemoteError> {
        match script {
            SHADOW_ROOT_SCRIPT => {
                let Some(NodeRef::Element(host)) = args.first().and_then(NodeRef::from_script_value)
                else {
                    return Err(RemoteError::Javascript("shadowRoot of non-element".into()));
                };
                Ok(self
                    .read_shadow_root(&host)?
                    .map_or(Value::Null, |root| NodeRef::ShadowRoot(root).to_json()))
            }
            QUERY_SELECTOR_SCRIPT | QUERY_SELECTOR_ALL_SCRIPT => {
                let css = args.first().and_then(Value::as_str).unwrap_or_default();
                let scope = Self::script_scope(args.get(1));
                self.record(format!("script_query:{}", lookup_key(&scope, css)))?;
                let nodes = self.scripted_lookup(&scope, css)?;
                let mut refs = nodes.into_iter().map(|id| NodeRef::Element(id).to_json());
                if script == QUERY_SELECTOR_SCRIPT {
                    Ok(refs.next().unwrap_or(Value::Null))
                } else {
                    Ok(Value::Array(refs.collect()))
                }
            }
            READY_STATE_SCRIPT => {
                let state = next_sticky(&mut self.state.borrow_mut().ready_states)
                    .unwrap_or_else(|| "complete".to_string());
                Ok(json!(state))
            }
            other => self
                .state
                .borrow_mut()
                .scripts
                .get_mut(other)
                .and_then(next_sticky)
                .unwrap_or(Ok(Value::Null)),
        }
    }
}

impl Session for MockSession {
    fn find_element(&self, scope: &SearchScope, locator: &Locator) -> Result<NodeId, RemoteError> {
        self.record(format!("find_element:{}", lookup_key(scope, locator.value())))?;
        self.lookup(scope, locator.value())?
            .into_iter()
            .next()
            .ok_or_else(|| RemoteError::NoSuchElement(locator.to_string()))
    }

    fn find_elements(
        &self,
        scope: &SearchScope,
        locator: &Locator,
    ) -> Result<Vec<NodeId>, RemoteError> {
        self.record(format!("find_elements:{}", lookup_key(scope, locator.value())))?;
        self.lookup(scope, locator.value())
    }

    fn is_displayed(&self, node: &NodeId) -> Result<bool, RemoteError> {
        self.record(format!("is_displayed:{node}"))?;
        Ok(self.element(node)?.displayed)
    }

    fn is_enabled(&self, node: &NodeId) -> Result<bool, RemoteError> {
        self.record(format!("is_enabled:{node}"))?;
        Ok(self.element(node)?.enabled)
    }

    fn attribute(&self, node: &NodeId, name: &str) -> Result<Option<String>, RemoteError> {
        self.record(format!("attribute:{node}:{name}"))?;
        let element = self.element(node)?;
        if name == "disabled" && element.disabled_attr {
            return Ok(Some("true".to_string()));
        }
        Ok(element.attributes.get(name).cloned())
    }

    fn text(&self, node: &NodeId) -> Result<String, RemoteError> {
        self.record(format!("text:{node}"))?;
        Ok(self.element(node)?.text.trim().to_string())
    }

    fn tag_name(&self, node: &NodeId) -> Result<String, RemoteError> {
        self.record(format!("tag_name:{node}"))?;
        Ok(self.element(node)?.tag)
    }

    fn shadow_root(&self, node: &NodeId) -> Result<Option<NodeId>, RemoteError> {
        self.record(format!("shadow_root:{node}"))?;
        match self.read_shadow_root(node)? {
            Some(root) => Ok(Some(root)),
            None => Err(RemoteError::NoSuchShadowRoot(node.to_string())),
        }
    }

    fn execute_script(&self, script: &str, args: &[Value]) -> Result<Value, RemoteError> {
        self.record("execute_script".to_string())?;
        self.run_script(script, args)
    }

    fn current_url(&self) -> Result<String, RemoteError> {
        self.record("current_url".to_string())?;
        self.state
            .borrow()
            .url
            .clone()
            .ok_or_else(|| RemoteError::Other("browser is not open".to_string()))
    }

    fn capabilities(&self) -> Capabilities {
        self.state.borrow().capabilities.clone()
    }

    fn window_handles(&self) -> Result<Vec<String>, RemoteError> {
        self.record("window_handles".to_string())?;
        let mut state = self.state.borrow_mut();
        let handles = next_sticky(&mut state.windows).unwrap_or_default();
        state.last_windows.clone_from(&handles);
        Ok(handles)
    }

    fn switch_to_window(&self, handle: &str) -> Result<(), RemoteError> {
        self.record(format!("switch_to_window:{handle}"))?;
        let mut state = self.state.borrow_mut();
        if !state.last_windows.iter().any(|h| h == handle) {
            return Err(RemoteError::NoSuchWindow(handle.to_string()));
        }
        state.current_window = Some(handle.to_string());
        Ok(())
    }
}
