//! Page-level waits: document ready state and window switching.

use serde_json::Value;
use std::fmt;
use std::time::Duration;
use url::Url;

use crate::condition::{ProbeResult, Satisfied, SoftFail};
use crate::context::{format_seconds, WaitContext};
use crate::result::{RemoteError, WaitError, WaitResult};
use crate::scripts::READY_STATE_SCRIPT;
use crate::session::Session;
use crate::wait::{poll, Polled};

/// Shown in diagnostics when the page location cannot be read
pub const BROWSER_NOT_OPEN: &str = "[WARNING! Browser Not Open!]";

/// Page location for diagnostics: the URL path when it is more than `/`,
/// otherwise the host.
#[must_use]
pub fn page_path(session: &dyn Session) -> String {
    match session.current_url() {
        Ok(url) if url.len() >= 5 => location_of(&url),
        _ => BROWSER_NOT_OPEN.to_string(),
    }
}

fn location_of(raw: &str) -> String {
    let Ok(url) = Url::parse(raw) else {
        return raw.to_string();
    };
    let path = url.path();
    if path.len() > 1 {
        return path.to_string();
    }
    url.host_str().map_or_else(|| raw.to_string(), str::to_string)
}

/// Poll until `document.readyState` is `"complete"`
pub fn wait_for_ready_state_complete(
    session: &dyn Session,
    ctx: &WaitContext,
    timeout: Duration,
) -> WaitResult<()> {
    let cadence = ctx.config().cadence_for(timeout);
    let polled = poll(ctx, &"document.readyState", timeout, cadence, || {
        match session.execute_script(READY_STATE_SCRIPT, &[]) {
            Ok(Value::String(state)) if state == "complete" => {
                ProbeResult::Satisfied(Satisfied::Holds)
            }
            Ok(_) => ProbeResult::SoftFail(SoftFail::NotReady),
            Err(error) if error.is_session_fatal() => ProbeResult::HardFail(error.into()),
            Err(_) => ProbeResult::SoftFail(SoftFail::NotReady),
        }
    })?;
    match polled {
        Polled::Satisfied(_) => Ok(()),
        Polled::Exhausted(_) => Err(WaitError::TimedOut {
            diagnostic: format!(
                "Page {} was not ready after {}!",
                page_path(session),
                format_seconds(timeout)
            ),
        }),
        Polled::Cancelled(limit) => Err(WaitError::Cancelled { limit }),
    }
}

/// Window to switch to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WindowTarget {
    /// Position in creation order
    Index(usize),
    /// Window handle
    Handle(String),
}

impl fmt::Display for WindowTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Index(index) => write!(f, "{index}"),
            Self::Handle(handle) => f.write_str(handle),
        }
    }
}

/// Poll until `target` exists, then switch to it
pub fn switch_to_window(
    session: &dyn Session,
    ctx: &WaitContext,
    target: &WindowTarget,
    timeout: Duration,
) -> WaitResult<()> {
    let cadence = ctx.config().cadence_for(timeout);
    let polled = poll(ctx, target, timeout, cadence, || {
        let handles = match session.window_handles() {
            Ok(handles) => handles,
            Err(error) if error.is_session_fatal() => return ProbeResult::HardFail(error.into()),
            Err(_) => return ProbeResult::SoftFail(SoftFail::NotPresent),
        };
        let handle = match target {
            WindowTarget::Index(index) => handles.get(*index),
            WindowTarget::Handle(wanted) => handles.iter().find(|h| *h == wanted),
        };
        let Some(handle) = handle else {
            return ProbeResult::SoftFail(SoftFail::NotPresent);
        };
        match session.switch_to_window(handle) {
            Ok(()) => ProbeResult::Satisfied(Satisfied::Holds),
            // the window closing between listing and switching is a miss
            Err(RemoteError::NoSuchWindow(_)) => ProbeResult::SoftFail(SoftFail::NotPresent),
            Err(error) if error.is_session_fatal() => ProbeResult::HardFail(error.into()),
            Err(_) => ProbeResult::SoftFail(SoftFail::NotPresent),
        }
    })?;
    match polled {
        Polled::Satisfied(_) => Ok(()),
        Polled::Exhausted(_) => Err(WaitError::TimedOut {
            diagnostic: format!(
                "Window {target} was not present after {}!",
                format_seconds(timeout)
            ),
        }),
        Polled::Cancelled(limit) => Err(WaitError::Cancelled { limit }),
    }
}
