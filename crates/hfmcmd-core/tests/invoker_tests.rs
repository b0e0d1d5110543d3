mod common;

use common::fast_invoker;
use hfmcmd_core::errors::RemoteFailure;
use hfmcmd_core::invoker::{codes, OP_REMOTE_CALL};
use hfmcmd_core::logging_facility::init_test_capture;
use hfmcmd_core::{ErrorKind, HfmError, NormalizedError};
use std::time::Duration;

fn retry_later() -> RemoteFailure {
    RemoteFailure::new("The server is busy").with_code(codes::SERVER_CALL_RETRY_LATER)
}

#[test]
fn test_transient_failures_retried_until_success() {
    let (invoker, slept) = fast_invoker(3);
    let mut calls = 0;

    let value = invoker
        .invoke("Opening application", || {
            calls += 1;
            if calls < 3 {
                Err(retry_later())
            } else {
                Ok("session")
            }
        })
        .unwrap();

    assert_eq!(value, "session");
    assert_eq!(calls, 3);
    assert_eq!(
        *slept.lock().unwrap(),
        vec![Duration::from_millis(10), Duration::from_millis(20)]
    );
}

#[test]
fn test_transient_failure_exhausts_attempts() {
    let (invoker, slept) = fast_invoker(3);
    let mut calls = 0;

    let err = invoker
        .invoke("Loading rules", || -> Result<(), _> {
            calls += 1;
            Err(retry_later())
        })
        .unwrap_err();

    assert_eq!(calls, 3);
    assert_eq!(slept.lock().unwrap().len(), 2);
    match err {
        HfmError::RemoteCall {
            description,
            attempts,
            cause,
        } => {
            assert_eq!(description, "Loading rules");
            assert_eq!(attempts, 3);
            assert_eq!(cause.code(), Some(codes::SERVER_CALL_RETRY_LATER));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn test_fatal_failure_aborts_on_first_attempt() {
    let (invoker, slept) = fast_invoker(5);
    let mut calls = 0;

    let err = invoker
        .invoke("Loading rules", || -> Result<(), _> {
            calls += 1;
            Err(RemoteFailure::new("Invalid rules file").with_code(0x8004_0A01))
        })
        .unwrap_err();

    assert_eq!(calls, 1);
    assert!(slept.lock().unwrap().is_empty());
    assert_eq!(err.kind(), ErrorKind::RemoteFailure);

    let normalized = NormalizedError::from(&err);
    assert_eq!(normalized.op(), Some("Loading rules"));
    assert_eq!(normalized.remote_code(), Some(0x8004_0A01));
}

#[test]
fn test_invocations_are_logged() {
    let capture = init_test_capture();
    let (invoker, _) = fast_invoker(3);
    let mut first = true;

    invoker
        .invoke("Logged call 7f3a", || {
            if std::mem::take(&mut first) {
                Err(retry_later())
            } else {
                Ok(())
            }
        })
        .unwrap();

    let events = capture.events_with_field("description", "Logged call 7f3a");
    let kinds: Vec<_> = events
        .iter()
        .filter(|e| e.op.as_deref() == Some(OP_REMOTE_CALL))
        .filter_map(|e| e.event.clone())
        .collect();
    assert_eq!(kinds, vec!["start", "retry", "end"]);
    let end = events.last().unwrap();
    assert_eq!(end.field("attempt"), Some("2"));
}
