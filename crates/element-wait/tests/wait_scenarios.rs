//! End-to-end wait behavior against the in-memory session.

#![allow(clippy::unwrap_used)]

use element_wait::mock::{MockElement, MockLookup, MockSession};
use element_wait::{
    get_shadow_text, is_shadow_element_present, retry_call_within, wait_for_ready_state_complete,
    wait_for_exact_shadow_text_visible, wait_for_shadow_present, wait_for_shadow_visible,
    with_retry, Condition, Deadline, EngineConfig, Locator, NodeId, PollEngine, PollOutcome,
    RemoteError, RetryPolicy, SearchScope, SoftFail, WaitContext, WaitError,
};
use std::cell::Cell;
use std::time::{Duration, Instant};

fn panel() -> Locator {
    Locator::css("#panel").unwrap()
}

// =============================================================================
// Timing
// =============================================================================

#[test]
fn test_timeout_is_bounded_by_cadence() {
    let session = MockSession::new();
    session.add_element("#panel", MockElement::new("panel").hidden());
    let ctx = WaitContext::new();
    let engine = PollEngine::new(&session, &ctx);

    let timeout = Duration::from_millis(500);
    let cadence = ctx.config().cadence_for(timeout);
    let start = Instant::now();
    let outcome = engine.wait_for(&panel(), Condition::Visible, timeout).unwrap();
    let elapsed = start.elapsed();

    assert!(matches!(outcome, PollOutcome::TimedOut(_)));
    assert!(elapsed >= timeout, "returned early after {elapsed:?}");
    assert!(
        elapsed <= timeout + cadence + Duration::from_millis(250),
        "overslept: {elapsed:?}"
    );
}

#[test]
fn test_immediate_success_does_not_sleep() {
    let session = MockSession::new();
    session.add_element("#panel", MockElement::new("panel"));
    let ctx = WaitContext::new();
    let engine = PollEngine::new(&session, &ctx);

    let start = Instant::now();
    let handle = engine
        .wait_for_element_visible(&panel(), Duration::from_secs(10))
        .unwrap();
    assert_eq!(handle.node().as_str(), "panel");
    assert!(start.elapsed() < Duration::from_millis(200));
    assert_eq!(session.lookup_count("#panel"), 1);
}

#[test]
fn test_zero_timeout_probes_once() {
    let session = MockSession::new();
    session.add_missing("#panel");
    let ctx = WaitContext::new();
    let engine = PollEngine::new(&session, &ctx);

    let outcome = engine
        .wait_for(&panel(), Condition::Present, Duration::ZERO)
        .unwrap();
    assert!(!outcome.is_satisfied());
    assert_eq!(session.lookup_count("#panel"), 1);
}

#[test]
fn test_deadline_beats_local_timeout() {
    let session = MockSession::new();
    session.add_missing("#panel");
    let ctx = WaitContext::new().with_deadline(Deadline::new(Duration::from_millis(300)));
    let engine = PollEngine::new(&session, &ctx);

    let start = Instant::now();
    let outcome = engine
        .wait_for(&panel(), Condition::Visible, Duration::from_secs(5))
        .unwrap();
    assert_eq!(outcome, PollOutcome::Cancelled("0.3 seconds".to_string()));
    assert!(start.elapsed() < Duration::from_secs(1));

    let err = outcome.into_result().unwrap_err();
    assert_eq!(
        err.to_string(),
        "This test has exceeded the time limit of 0.3 seconds!"
    );
}

#[test]
fn test_unusable_config_is_refused_before_waiting() {
    let negative = EngineConfig {
        poll_fraction: -0.5,
        ..EngineConfig::default()
    };
    let inverted = EngineConfig {
        min_poll_interval_ms: 500,
        max_poll_interval_ms: 100,
        ..EngineConfig::default()
    };
    let nan = EngineConfig {
        poll_fraction: f64::NAN,
        ..EngineConfig::default()
    };
    for config in [negative, inverted, nan] {
        let err = WaitContext::with_config(config).unwrap_err();
        assert!(matches!(err, WaitError::Config { .. }), "{err:?}");
    }
}

#[test]
fn test_expired_deadline_makes_no_remote_call() {
    let session = MockSession::new();
    let ctx = WaitContext::new()
        .with_deadline(Deadline::starting_at(Instant::now(), Duration::ZERO));
    std::thread::sleep(Duration::from_millis(5));
    let engine = PollEngine::new(&session, &ctx);

    let err = engine
        .wait_for_element_present(&panel(), Duration::from_secs(5))
        .unwrap_err();
    assert!(err.is_cancelled());
    assert!(session.is_untouched());
}

// =============================================================================
// Classification
// =============================================================================

#[test]
fn test_stale_element_is_looked_up_again() {
    let session = MockSession::new();
    session.add_element("#panel", MockElement::new("panel").stale());
    session.add_element("#panel", MockElement::new("panel"));
    let ctx = WaitContext::new();
    let engine = PollEngine::new(&session, &ctx);

    let handle = engine
        .wait_for_element_visible(&panel(), Duration::from_secs(5))
        .unwrap();
    assert_eq!(handle.node().as_str(), "panel");
    assert_eq!(session.lookup_count("#panel"), 2);
}

#[test]
fn test_disabled_attribute_wins_over_enabled_flag() {
    let session = MockSession::new();
    session.add_element(
        "#save",
        MockElement::new("save").tag("button").disabled_by_attribute(),
    );
    let ctx = WaitContext::new();
    let engine = PollEngine::new(&session, &ctx);
    let save = Locator::css("#save").unwrap();

    assert!(!engine.is_element_enabled(&save).unwrap());
    engine
        .wait_for_element_disabled(&save, Duration::from_millis(200))
        .unwrap();
    assert_eq!(session.call_count("is_enabled"), 0);
}

#[test]
fn test_timeout_message_names_most_specific_reason() {
    let session = MockSession::new();
    session.add_element("#panel", MockElement::new("panel").hidden());
    session.add_missing("#panel");
    let ctx = WaitContext::new();
    let engine = PollEngine::new(&session, &ctx);

    let err = engine
        .wait_for_element_visible(&panel(), Duration::from_millis(300))
        .unwrap_err();
    assert!(err.is_timeout());
    assert_eq!(
        err.to_string(),
        format!(
            "Element css selector=\"#panel\" on /dashboard was {} after 0.3 seconds!",
            SoftFail::NotVisible.state()
        )
    );
}

#[test]
fn test_dead_session_stops_polling() {
    let session = MockSession::new();
    session.add_lookup_error("#panel", RemoteError::InvalidSession("closed".into()));
    let ctx = WaitContext::new();
    let engine = PollEngine::new(&session, &ctx);

    let start = Instant::now();
    let err = engine
        .wait_for_element_present(&panel(), Duration::from_secs(5))
        .unwrap_err();
    assert!(matches!(err, WaitError::Session(RemoteError::InvalidSession(_))));
    assert!(start.elapsed() < Duration::from_secs(1));
    assert_eq!(session.lookup_count("#panel"), 1);
}

#[test]
fn test_absent_wait_satisfied_by_missing_element() {
    let session = MockSession::new();
    session.add_element("#spinner", MockElement::new("spinner"));
    session.add_missing("#spinner");
    let ctx = WaitContext::new();
    let engine = PollEngine::new(&session, &ctx);

    engine
        .wait_for_element_absent(&Locator::css("#spinner").unwrap(), Duration::from_secs(2))
        .unwrap();
    assert_eq!(session.lookup_count("#spinner"), 2);
}

// =============================================================================
// Shadow chains
// =============================================================================

fn shadow_ctx() -> WaitContext {
    WaitContext::with_config(
        EngineConfig::default()
            .with_shadow_root_backoff(20)
            .with_shadow_poll_interval(10),
    )
    .unwrap()
}

#[test]
fn test_malformed_chain_rejected_before_any_call() {
    let session = MockSession::new();
    let ctx = shadow_ctx();
    let engine = PollEngine::new(&session, &ctx);

    for raw in ["my-app::shadow ", "a::shadow ::shadow b", "::shadow #save"] {
        let locator = Locator::css(raw).unwrap();
        let err = engine
            .wait_for(&locator, Condition::Present, Duration::from_secs(2))
            .unwrap_err();
        assert!(
            matches!(err, WaitError::InvalidShadowSelector { .. }),
            "{raw:?} gave {err:?}"
        );
    }
    assert!(session.is_untouched());
}

#[test]
fn test_chain_through_poll_engine() {
    let session = MockSession::new();
    session.add_element("my-app", MockElement::new("app").shadow_root("app-root"));
    session.add_shadow_element("app-root", "#save", MockElement::new("save"));
    let ctx = shadow_ctx();
    let engine = PollEngine::new(&session, &ctx);

    let locator = Locator::css("my-app::shadow #save").unwrap();
    let handle = engine
        .wait_for_element_visible(&locator, Duration::from_secs(2))
        .unwrap();
    assert_eq!(handle.node().as_str(), "save");
    assert_eq!(handle.locator(), &locator);
}

#[test]
fn test_chain_free_functions() {
    let session = MockSession::new();
    session.add_element("my-app", MockElement::new("app").shadow_root("app-root"));
    session.add_shadow_element("app-root", "#save", MockElement::new("save"));
    let ctx = shadow_ctx();

    let handle =
        wait_for_shadow_visible(&session, &ctx, "my-app::shadow #save", Duration::from_secs(2))
            .unwrap();
    assert_eq!(handle.node().as_str(), "save");
    assert!(is_shadow_element_present(&session, &ctx, "my-app::shadow #save").unwrap());
    assert!(!is_shadow_element_present(&session, &ctx, "my-app::shadow #gone").unwrap());
}

#[test]
fn test_missing_root_gives_up_within_timeout() {
    let session = MockSession::new();
    session.add_element("my-app", MockElement::new("app"));
    let ctx = WaitContext::new();

    let start = Instant::now();
    let err = wait_for_shadow_present(&session, &ctx, "my-app::shadow #x", Duration::from_millis(300))
        .unwrap_err();
    assert_eq!(err.to_string(), "Element {my-app} has no shadow root!");
    assert!(start.elapsed() < Duration::from_secs(1), "took {:?}", start.elapsed());
}

#[test]
fn test_shadow_text_waits() {
    let session = MockSession::new();
    session.add_element("my-app", MockElement::new("app").shadow_root("root"));
    session.add_shadow_element("root", "#status", MockElement::new("status").text("Loading"));
    session.add_shadow_element("root", "#status", MockElement::new("status").text(" Ready "));
    let ctx = shadow_ctx();

    let handle = wait_for_exact_shadow_text_visible(
        &session,
        &ctx,
        "my-app::shadow #status",
        "Ready",
        Duration::from_secs(2),
    )
    .unwrap();
    assert_eq!(handle.node().as_str(), "status");
    assert_eq!(
        get_shadow_text(&session, &ctx, "my-app::shadow #status", Duration::from_secs(1)).unwrap(),
        "Ready"
    );
}

// =============================================================================
// Text selectors
// =============================================================================

fn task_list(session: &MockSession, scope: &SearchScope) {
    session.push_lookup(
        scope,
        "span",
        MockLookup::FoundAll(vec![
            MockElement::new("pending").text("Not Done"),
            MockElement::new("done").text("Done"),
            MockElement::new("quoted").text("say \"hi\""),
        ]),
    );
}

#[test]
fn test_xpath_text_equality_inside_shadow_root() {
    let session = MockSession::new();
    session.add_element("todo-list", MockElement::new("list").shadow_root("root"));
    task_list(&session, &SearchScope::ShadowRoot(NodeId::new("root")));
    let ctx = shadow_ctx();

    let handle = wait_for_shadow_visible(
        &session,
        &ctx,
        "todo-list::shadow //span[text()='Done']",
        Duration::from_secs(1),
    )
    .unwrap();
    assert_eq!(handle.node().as_str(), "done");
    assert_eq!(session.lookup_count("span:contains(\"^Done$\")"), 1);
}

#[test]
fn test_link_text_with_quotes_through_script() {
    let session = MockSession::new();
    session.push_lookup(
        &SearchScope::Document,
        "a",
        MockLookup::FoundAll(vec![
            MockElement::new("plain").tag("a").text("say hi"),
            MockElement::new("quoted").tag("a").text("say \"hi\""),
        ]),
    );
    let ctx = WaitContext::new();
    let engine = PollEngine::new(&session, &ctx);

    let link = Locator::link_text("say \"hi\"").unwrap();
    let handle = engine
        .wait_for_element_visible(&link, Duration::from_secs(1))
        .unwrap();
    assert_eq!(handle.node().as_str(), "quoted");
    assert_eq!(session.call_count("script_query:document|a:contains("), 1);
}

#[test]
fn test_text_contains_in_document_scope() {
    let session = MockSession::new();
    task_list(&session, &SearchScope::Document);
    let ctx = WaitContext::new();
    let engine = PollEngine::new(&session, &ctx);

    let locator = Locator::xpath("//span[contains(text(),'Done')]").unwrap();
    let handle = engine
        .wait_for_element_present(&locator, Duration::from_secs(1))
        .unwrap();
    assert_eq!(handle.node().as_str(), "pending");
}

// =============================================================================
// Page and retry
// =============================================================================

#[test]
fn test_ready_state_then_element() {
    let session = MockSession::new();
    session.set_ready_states(&["loading", "complete"]);
    session.add_element("#panel", MockElement::new("panel"));
    let ctx = WaitContext::new();

    wait_for_ready_state_complete(&session, &ctx, Duration::from_secs(2)).unwrap();
    let engine = PollEngine::new(&session, &ctx);
    assert!(engine.is_element_visible(&panel()).unwrap());
}

#[test]
fn test_retry_recovers_from_transient_errors() {
    let policy = RetryPolicy::new()
        .with_tries(5)
        .unwrap()
        .with_delay_secs(0.001)
        .unwrap();
    let calls = Cell::new(0);
    let value = with_retry(
        &policy,
        |error: &RemoteError| error.is_stale(),
        || {
            calls.set(calls.get() + 1);
            if calls.get() < 3 {
                Err(RemoteError::StaleElement("panel".into()))
            } else {
                Ok("clicked")
            }
        },
    )
    .unwrap();
    assert_eq!(value, "clicked");
    assert_eq!(calls.get(), 3);
}

#[test]
fn test_retry_stops_at_deadline() {
    let policy = RetryPolicy::new().with_delay_secs(0.05).unwrap();
    let ctx = WaitContext::new().with_deadline(Deadline::new(Duration::from_millis(150)));
    let start = Instant::now();
    let result: Result<(), WaitError> = retry_call_within(
        &ctx,
        &policy,
        |error: &WaitError| error.is_timeout(),
        || {
            Err(WaitError::TimedOut {
                diagnostic: "not yet".into(),
            })
        },
    );
    assert!(result.unwrap_err().is_cancelled());
    assert!(start.elapsed() < Duration::from_secs(1));
}
