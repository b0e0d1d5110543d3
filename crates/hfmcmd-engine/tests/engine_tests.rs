mod common;

use common::{test_config, ScriptedBackend};
use hfmcmd_core::{CommandStatus, ErrorKind, InvocationRequest, Outcome};
use hfmcmd_engine::remote::LoadFlags;
use hfmcmd_engine::Engine;
use std::fs;
use tempfile::TempDir;

fn rules_fixture(dir: &TempDir) -> String {
    let path = dir.path().join("demo.rle");
    fs::write(&path, "Sub Calculate()\nEnd Sub\n").unwrap();
    path.display().to_string()
}

// ===== CATALOG =====

#[test]
fn test_catalog_lists_full_command_set_in_name_order() {
    let engine = Engine::new(ScriptedBackend::new(), &test_config("Demo")).unwrap();

    let names: Vec<_> = engine.catalog().iter().map(|d| d.name()).collect();
    assert_eq!(
        names,
        vec![
            "ExtractMemberLists",
            "ExtractRules",
            "LoadMemberLists",
            "LoadRules",
            "OpenApplication",
            "RetrieveFile",
        ]
    );
}

#[test]
fn test_context_chain_order() {
    let engine = Engine::new(ScriptedBackend::new(), &test_config("Demo")).unwrap();

    let order: Vec<_> = engine
        .factories()
        .topological_order()
        .iter()
        .map(|k| k.name())
        .collect();
    let pos = |name: &str| order.iter().position(|n| *n == name).unwrap();
    assert!(pos("ConnectionSettings") < pos("Connection"));
    assert!(pos("Connection") < pos("Session"));
    assert!(pos("Session") < pos("RulesLoad"));
    assert!(pos("Session") < pos("FileTransfer"));
}

// ===== RULES LOAD =====

#[test]
fn test_load_rules_builds_chain_once_and_releases_in_reverse() {
    let dir = TempDir::new().unwrap();
    let rules = rules_fixture(&dir);
    let backend = ScriptedBackend::new();
    let engine = Engine::new(backend.clone(), &test_config("Demo")).unwrap();

    let report = engine.orchestrator().run(vec![
        InvocationRequest::new("OpenApplication"),
        InvocationRequest::new("LoadRules").arg("rules_file", rules.as_str()),
        InvocationRequest::new("LoadRules")
            .positional(rules.as_str())
            .arg("scan_only", "yes"),
    ]);

    assert!(!report.has_errors(), "{:?}", report);
    assert_eq!(backend.count("connect"), 1);
    assert_eq!(backend.count("open Demo"), 1);
    assert_eq!(backend.count("load_rules"), 2);
    assert!(backend
        .calls()
        .iter()
        .any(|c| c.ends_with("scan=true integrity=false")));

    let calls = backend.calls();
    let tail: Vec<_> = calls.iter().rev().take(2).rev().cloned().collect();
    assert_eq!(tail, vec!["close session", "close connection"]);
    assert_eq!(backend.count("close"), 2);
    assert!(dir.path().join("demo.log").exists());
}

#[test]
fn test_load_rules_error_flag_fails_command() {
    let dir = TempDir::new().unwrap();
    let rules = rules_fixture(&dir);
    let backend = ScriptedBackend::new();
    *backend.load_flags.lock().unwrap() = LoadFlags {
        errors: true,
        ..LoadFlags::default()
    };
    let engine = Engine::new(backend.clone(), &test_config("Demo")).unwrap();

    let report = engine
        .orchestrator()
        .run(vec![InvocationRequest::new("LoadRules").arg("rules_file", rules.as_str())]);

    let error = report.entries[0].outcome.error().unwrap();
    assert_eq!(error.kind(), ErrorKind::CommandFailed);
    assert!(error
        .message()
        .contains("One or more error(s) were encountered during the rules load"));
}

#[test]
fn test_load_rules_warning_flag_succeeds_with_warnings() {
    let dir = TempDir::new().unwrap();
    let rules = rules_fixture(&dir);
    let backend = ScriptedBackend::new();
    *backend.load_flags.lock().unwrap() = LoadFlags {
        warnings: true,
        ..LoadFlags::default()
    };
    let engine = Engine::new(backend.clone(), &test_config("Demo")).unwrap();

    let report = engine
        .orchestrator()
        .run(vec![InvocationRequest::new("LoadRules").arg("rules_file", rules.as_str())]);

    assert!(matches!(
        report.entries[0].outcome,
        Outcome::Success {
            status: CommandStatus::SuccessWithWarnings,
            ..
        }
    ));
}

#[test]
fn test_missing_rules_file_fails_before_remote_call() {
    let dir = TempDir::new().unwrap();
    let backend = ScriptedBackend::new();
    let engine = Engine::new(backend.clone(), &test_config("Demo")).unwrap();
    let missing = dir.path().join("missing.rle");

    let report = engine.orchestrator().run(vec![InvocationRequest::new("LoadRules")
        .arg("rules_file", missing.display().to_string())]);

    assert_eq!(
        report.entries[0].outcome.error().map(|e| e.kind()),
        Some(ErrorKind::Io)
    );
    assert_eq!(backend.count("load_rules"), 0);
}

#[test]
fn test_extract_rules_passes_canonical_format() {
    let dir = TempDir::new().unwrap();
    let backend = ScriptedBackend::new();
    let engine = Engine::new(backend.clone(), &test_config("Demo")).unwrap();
    let target = dir.path().join("out.xml");

    let report = engine.orchestrator().run(vec![InvocationRequest::new("ExtractRules")
        .arg("rules_file", target.display().to_string())
        .arg("RULES_FORMAT", "calcmanager")]);

    assert!(!report.has_errors(), "{:?}", report);
    assert!(backend
        .calls()
        .iter()
        .any(|c| c.starts_with("extract_rules") && c.ends_with("CalcManager")));
}

// ===== RESILIENCE =====

#[test]
fn test_busy_server_connect_is_retried() {
    let backend = ScriptedBackend::new();
    backend
        .connect_failures
        .store(2, std::sync::atomic::Ordering::SeqCst);
    let engine = Engine::new(backend.clone(), &test_config("Demo")).unwrap();

    let report = engine
        .orchestrator()
        .run(vec![InvocationRequest::new("OpenApplication")]);

    assert!(!report.has_errors(), "{:?}", report);
    assert_eq!(backend.count("connect"), 3);
}

#[test]
fn test_missing_application_fails_session_construction() {
    let backend = ScriptedBackend::new();
    let engine = Engine::new(backend.clone(), &test_config("")).unwrap();

    let report = engine
        .orchestrator()
        .run(vec![InvocationRequest::new("OpenApplication")]);

    let error = report.entries[0].outcome.error().unwrap();
    assert_eq!(error.kind(), ErrorKind::ContextConstruction);
    assert!(error.message().contains("Session"));
    assert_eq!(backend.count("open"), 0);
    assert_eq!(backend.count("close connection"), 1);
}

// ===== FILE TRANSFER =====

#[test]
fn test_retrieve_file_through_scripted_surface() {
    let dir = TempDir::new().unwrap();
    let backend = ScriptedBackend::new();
    let engine = Engine::new(backend.clone(), &test_config("Demo")).unwrap();
    let target = dir.path().join("hello.txt");

    let report = engine.orchestrator().run(vec![InvocationRequest::new("RetrieveFile")
        .arg("server_file", "Reports/hello.txt")
        .arg("target_path", target.display().to_string())]);

    assert!(!report.has_errors(), "{:?}", report);
    assert_eq!(fs::read(&target).unwrap(), b"hello");
    assert_eq!(backend.count("file_size Reports/hello.txt"), 1);
    assert_eq!(backend.count("end_transfer"), 1);
    assert_eq!(backend.count("delete Reports/hello.txt"), 1);
}
