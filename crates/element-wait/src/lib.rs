//! Element Wait: element resolution and bounded waiting for browser tests
//!
//! Resolves element locators through a remote session and waits, under a
//! bounded time budget, for presence, visibility or interactability before
//! a test acts on an element.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        PollEngine::wait_for                      │
//! │      deadline check ─► probe ─► sleep(cadence) ─► ...            │
//! ├──────────────────────────────┬──────────────────────────────────┤
//! │  ShadowResolver              │  ConditionEvaluator               │
//! │  (`host::shadow inner`)      │  (one remote round trip)          │
//! ├──────────────────────────────┴──────────────────────────────────┤
//! │  translator (XPath <-> CSS)   │  Session trait (find, script ...) │
//! └─────────────────────────────────────────────────────────────────┘
//!            retry::with_retry wraps single remote calls elsewhere
//! ```
//!
//! # Example
//!
//! ```
//! use element_wait::mock::{MockElement, MockSession};
//! use element_wait::{Locator, PollEngine, WaitContext};
//! use std::time::Duration;
//!
//! let session = MockSession::new();
//! session.add_element("#panel", MockElement::new("panel"));
//!
//! let ctx = WaitContext::new();
//! let engine = PollEngine::new(&session, &ctx);
//! let panel = engine
//!     .wait_for_element_visible(&Locator::css("#panel")?, Duration::from_secs(5))?;
//! assert_eq!(panel.node().as_str(), "panel");
//! # Ok::<(), element_wait::WaitError>(())
//! ```

#![warn(missing_docs)]

pub mod condition;
pub mod config;
pub mod context;
pub mod element;
pub mod locator;
pub mod logging;
pub mod mock;
pub mod page;
mod result;
pub mod retry;
pub mod scripts;
pub mod session;
pub mod shadow;
pub mod translator;
pub mod wait;

pub use condition::{Condition, ConditionEvaluator, ProbeResult, Satisfied, SoftFail};
pub use config::EngineConfig;
pub use context::{Deadline, WaitContext};
pub use element::{DebugAttributes, ElementHandle};
pub use locator::{escape_quotes_if_needed, Locator, Strategy};
pub use logging::{init_tracing, LogFormat};
pub use page::{switch_to_window, wait_for_ready_state_complete, WindowTarget};
pub use result::{RemoteError, WaitError, WaitResult};
pub use retry::{retry_call_within, with_retry, Backoff, Jitter, RetryPolicy};
pub use session::{Capabilities, NodeId, NodeRef, SearchScope, Session, ShadowSupport};
pub use scripts::TextFilter;
pub use shadow::{
    get_shadow_attribute, get_shadow_text, is_shadow_element_enabled, is_shadow_element_present,
    is_shadow_element_visible, is_shadow_selector, wait_for_exact_shadow_text_visible,
    wait_for_shadow_present, wait_for_shadow_text_visible, wait_for_shadow_visible, ShadowChain,
    ShadowResolver, SHADOW_DELIMITER,
};
pub use translator::{css_to_xpath, to_css, to_xpath, xpath_to_css};
pub use wait::{PollEngine, PollOutcome};

/// Everything a test usually needs
pub mod prelude {
    pub use super::condition::{Condition, Satisfied};
    pub use super::context::{Deadline, WaitContext};
    pub use super::element::ElementHandle;
    pub use super::locator::{Locator, Strategy};
    pub use super::page::{switch_to_window, wait_for_ready_state_complete, WindowTarget};
    pub use super::result::{WaitError, WaitResult};
    pub use super::retry::{with_retry, RetryPolicy};
    pub use super::session::Session;
    pub use super::shadow::{wait_for_shadow_present, wait_for_shadow_visible};
    pub use super::wait::{PollEngine, PollOutcome};
}
