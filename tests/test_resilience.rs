//! Interrupted, cancelled and partially failing runs
//!
//! Covers resume after a write whose outcome was never recorded, cancellation
//! at phase boundaries, compensation under both policies, and verification of
//! items that are slow to become readable.

use anyhow::Result;
use camino::Utf8PathBuf;
use std::collections::HashSet;
use std::fmt::Write as _;
use std::time::Duration;
use tempfile::TempDir;

use brdflow::{Config, GateKind, Orchestrator, RunOutcome, RunStatus};
use brdflow_config::CompensationPolicy;
use brdflow_engine::artifacts;
use brdflow_engine::testing::{SHOP_BRD, confident_parser, open_run, start_run};
use brdflow_gateway::testing::MockToolServer;
use brdflow_gateway::{Operation, codes};
use brdflow_utils::error::{BrdflowError, PhaseError};
use brdflow_utils::exit_codes::ExitCode;
use brdflow_utils::types::{PhaseId, Platform};

#[allow(clippy::expect_used)]
fn temp_home() -> (TempDir, Utf8PathBuf) {
    let dir = TempDir::new().expect("create temp dir");
    let home = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).expect("utf-8 temp path");
    (dir, home)
}

fn unique_titles(mock: &MockToolServer) -> bool {
    let issues = mock.issues();
    let titles: HashSet<_> = issues.iter().map(|i| (i.title.clone(), i.parent.clone())).collect();
    titles.len() == issues.len()
}

/// Twenty functional requirements without detail: one epic, ten features and
/// twenty leaf stories at level 3.
fn wide_brd() -> String {
    let mut brd = String::from("# Warehouse\n\n## Functional Requirements\n");
    for i in 1..=20 {
        let _ = writeln!(brd, "- FR{i}: Capability {i:02}");
    }
    brd
}

async fn approve_gate_b(orchestrator: &mut Orchestrator) -> Result<Result<RunOutcome, BrdflowError>> {
    let outcome = orchestrator.run().await?;
    assert!(matches!(outcome, RunOutcome::AwaitingGate { gate: GateKind::B, .. }));
    Ok(orchestrator.reply("approve").await)
}

#[tokio::test]
async fn test_resume_after_interrupted_write_creates_no_duplicates() -> Result<()> {
    let (_dir, home) = temp_home();
    let config = Config::for_tests();
    let mock = MockToolServer::new(Platform::Jira);
    let mut orchestrator = start_run(&config, &home, "shop-crash", SHOP_BRD, &mock, confident_parser())?;
    orchestrator.run().await?;

    // The fifth write lands on the tracker but its response never arrives
    mock.hang_on_create(5);
    let interrupted = tokio::time::timeout(Duration::from_millis(500), orchestrator.reply("approve")).await;
    assert!(interrupted.is_err(), "reply should still be waiting on the hung write");
    drop(orchestrator);
    assert_eq!(mock.issues().len(), 5);

    let report = Orchestrator::status(&config, &home, "shop-crash")?;
    assert_eq!(report.phase, PhaseId::CreateVerify);
    assert!(report.write_in_flight);
    assert_eq!(report.created, 4);

    let mut resumed = open_run(&config, &home, "shop-crash", &mock, confident_parser())?;
    let outcome = resumed.resume().await?;
    assert_eq!(outcome.exit_code(), ExitCode::SUCCESS);

    let state = resumed.state();
    assert_eq!(mock.issues().len(), 12);
    assert!(unique_titles(&mock));
    assert_eq!(state.created_items.len(), 12);
    assert_eq!(state.created_items.iter().filter(|i| i.adopted).count(), 1);
    assert!(state.in_flight.is_none());
    assert_eq!(mock.call_count(Operation::CreateIssue), 12);
    Ok(())
}

#[tokio::test]
async fn test_resume_of_closed_run_is_refused() -> Result<()> {
    let (_dir, home) = temp_home();
    let config = Config::for_tests();
    let mock = MockToolServer::new(Platform::Jira);
    let mut orchestrator = start_run(&config, &home, "shop-done", SHOP_BRD, &mock, confident_parser())?;
    approve_gate_b(&mut orchestrator).await??;

    let err = orchestrator.resume().await.unwrap_err();
    assert!(matches!(err, BrdflowError::Phase(PhaseError::Finished)));
    assert_eq!(mock.issues().len(), 12);
    Ok(())
}

#[tokio::test]
async fn test_cancel_stops_at_phase_boundary_and_resume_continues() -> Result<()> {
    let (_dir, home) = temp_home();
    let config = Config::for_tests();
    let mock = MockToolServer::new(Platform::Jira);
    let mut orchestrator = start_run(&config, &home, "shop-cancel", SHOP_BRD, &mock, confident_parser())?;

    Orchestrator::request_cancel(&home, "shop-cancel")?;
    let err = orchestrator.run().await.unwrap_err();
    assert!(matches!(err, BrdflowError::Phase(PhaseError::Cancelled { .. })));
    assert_eq!(err.to_exit_code(), ExitCode::CANCELLED);
    assert_eq!(orchestrator.state().status, RunStatus::Cancelled);
    assert!(orchestrator.paths().artifact(artifacts::RECOVERY).exists());

    let outcome = orchestrator.resume().await?;
    assert!(matches!(outcome, RunOutcome::AwaitingGate { gate: GateKind::B, .. }));
    assert!(orchestrator.state().last_error.is_none());
    Ok(())
}

#[tokio::test]
async fn test_cancel_token_stops_before_creation() -> Result<()> {
    let (_dir, home) = temp_home();
    let config = Config::for_tests();
    let mock = MockToolServer::new(Platform::Jira);
    let mut orchestrator = start_run(&config, &home, "shop-token", SHOP_BRD, &mock, confident_parser())?;
    orchestrator.run().await?;

    orchestrator.cancel_token().cancel();
    let err = orchestrator.reply("approve").await.unwrap_err();
    assert!(matches!(err, BrdflowError::Phase(PhaseError::Cancelled { .. })));
    assert_eq!(mock.call_count(Operation::CreateIssue), 0);
    Ok(())
}

#[tokio::test]
async fn test_delete_compensation_removes_level_and_escalates() -> Result<()> {
    let (_dir, home) = temp_home();
    let mut config = Config::for_tests();
    config.creation.compensation_policy = CompensationPolicy::Delete;
    let mock = MockToolServer::new(Platform::Jira);
    for i in [3, 7, 11, 15] {
        mock.fail_create_titled(&format!("Capability {i:02}"), codes::REJECTED);
    }
    let mut orchestrator = start_run(&config, &home, "wh-delete", &wide_brd(), &mock, confident_parser())?;

    let err = approve_gate_b(&mut orchestrator).await?.unwrap_err();
    assert!(matches!(err, BrdflowError::Phase(PhaseError::Escalated { .. })));
    assert_eq!(err.to_exit_code(), ExitCode::ESCALATED);

    let state = orchestrator.state();
    assert_eq!(state.status, RunStatus::Escalated);
    let record = state.compensation.as_ref().expect("compensation recorded");
    assert_eq!((record.depth, record.attempted, record.failed), (3, 20, 4));
    assert_eq!(record.deleted.len(), 16);
    assert_eq!(mock.deleted_keys().len(), 16);
    // Epic and features survive
    assert_eq!(mock.issues().len(), 11);
    assert!(orchestrator.paths().artifact(artifacts::RECOVERY).exists());
    Ok(())
}

#[tokio::test]
async fn test_mark_partial_compensation_labels_level() -> Result<()> {
    let (_dir, home) = temp_home();
    let mut config = Config::for_tests();
    config.creation.compensation_policy = CompensationPolicy::MarkPartial;
    let mock = MockToolServer::new(Platform::Jira);
    for i in [1, 2, 3, 4] {
        mock.fail_create_titled(&format!("Capability {i:02}"), codes::REJECTED);
    }
    let mut orchestrator = start_run(&config, &home, "wh-mark", &wide_brd(), &mock, confident_parser())?;

    let err = approve_gate_b(&mut orchestrator).await?.unwrap_err();
    assert!(matches!(err, BrdflowError::Phase(PhaseError::Escalated { .. })));

    let record = orchestrator.state().compensation.as_ref().expect("compensation recorded");
    assert_eq!(record.marked.len(), 16);
    assert!(mock.deleted_keys().is_empty());
    assert_eq!(mock.payloads(Operation::UpdateIssue).len(), 16);
    assert_eq!(mock.issues().len(), 27);
    Ok(())
}

#[tokio::test]
async fn test_failures_below_threshold_close_partial() -> Result<()> {
    let (_dir, home) = temp_home();
    let config = Config::for_tests();
    let mock = MockToolServer::new(Platform::Jira);
    for i in [5, 6] {
        mock.fail_create_titled(&format!("Capability {i:02}"), codes::REJECTED);
    }
    let mut orchestrator = start_run(&config, &home, "wh-partial", &wide_brd(), &mock, confident_parser())?;

    let outcome = approve_gate_b(&mut orchestrator).await??;
    match &outcome {
        RunOutcome::Completed {
            status,
            created,
            failed,
            ..
        } => {
            assert_eq!(*status, RunStatus::Partial);
            assert_eq!(*created, 29);
            assert_eq!(*failed, 2);
        }
        other => panic!("expected a closed run, got {other:?}"),
    }
    assert_eq!(outcome.exit_code(), ExitCode::PARTIAL);
    assert!(orchestrator.state().compensation.is_none());
    assert!(mock.deleted_keys().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_resume_retries_failed_nodes_without_duplicates() -> Result<()> {
    let (_dir, home) = temp_home();
    let config = Config::for_tests();
    let mock = MockToolServer::new(Platform::Jira);
    mock.fail_next(Operation::CreateIssue, codes::REJECTED, 4);
    let mut orchestrator = start_run(&config, &home, "shop-retry", SHOP_BRD, &mock, confident_parser())?;

    // The epic level fails outright
    let err = approve_gate_b(&mut orchestrator).await?.unwrap_err();
    assert!(matches!(err, BrdflowError::Phase(PhaseError::Escalated { .. })));
    assert!(mock.issues().is_empty());
    drop(orchestrator);

    let mut resumed = open_run(&config, &home, "shop-retry", &mock, confident_parser())?;
    // Three scripted failures remain; the gateway does not retry rejections
    let err = resumed.resume().await.unwrap_err();
    assert!(matches!(err, BrdflowError::Phase(PhaseError::Escalated { .. })));
    resumed.resume().await.unwrap_err();
    resumed.resume().await.unwrap_err();

    let outcome = resumed.resume().await?;
    assert_eq!(outcome.exit_code(), ExitCode::SUCCESS);
    assert_eq!(mock.issues().len(), 12);
    assert!(unique_titles(&mock));
    Ok(())
}

#[tokio::test]
async fn test_item_readable_after_retries_is_verified() -> Result<()> {
    let (_dir, home) = temp_home();
    let config = Config::for_tests();
    let mock = MockToolServer::new(Platform::Jira);
    mock.not_found_reads("Checkout", 2);
    let mut orchestrator = start_run(&config, &home, "shop-slow", SHOP_BRD, &mock, confident_parser())?;

    let outcome = approve_gate_b(&mut orchestrator).await??;
    assert_eq!(outcome.exit_code(), ExitCode::SUCCESS);
    let item = orchestrator
        .state()
        .created_items
        .iter()
        .find(|i| i.title == "Checkout")
        .expect("checkout created");
    assert!(item.verified);
    assert_eq!(item.verify_attempts, 3);
    Ok(())
}

#[tokio::test]
async fn test_item_never_readable_is_unverifiable() -> Result<()> {
    let (_dir, home) = temp_home();
    let config = Config::for_tests();
    let mock = MockToolServer::new(Platform::Jira);
    mock.not_found_reads("Checkout", 3);
    let mut orchestrator = start_run(&config, &home, "shop-lost", SHOP_BRD, &mock, confident_parser())?;

    let outcome = approve_gate_b(&mut orchestrator).await??;
    match &outcome {
        RunOutcome::Completed {
            status,
            verified,
            unverifiable,
            ..
        } => {
            assert_eq!(*status, RunStatus::Partial);
            assert_eq!(*verified, 11);
            assert_eq!(*unverifiable, 1);
        }
        other => panic!("expected a closed run, got {other:?}"),
    }
    assert_eq!(outcome.exit_code(), ExitCode::PARTIAL);

    let item = orchestrator
        .state()
        .created_items
        .iter()
        .find(|i| i.title == "Checkout")
        .expect("checkout created");
    assert!(!item.verified);
    assert!(item.unverifiable.is_some());
    Ok(())
}

#[tokio::test]
async fn test_large_runs_cross_check_with_project_search() -> Result<()> {
    let (_dir, home) = temp_home();
    let mut config = Config::for_tests();
    config.creation.verify_batch_threshold = 5;
    let mock = MockToolServer::new(Platform::Jira);
    let mut orchestrator = start_run(&config, &home, "shop-batch", SHOP_BRD, &mock, confident_parser())?;

    approve_gate_b(&mut orchestrator).await??;
    let check = orchestrator.state().batch_check.expect("batch check recorded");
    assert_eq!(check.expected, 12);
    assert_eq!(check.found, 12);
    assert!(mock.call_count(Operation::SearchIssues) >= 1);
    Ok(())
}

#[tokio::test]
async fn test_rejected_token_is_refreshed_once() -> Result<()> {
    let (_dir, home) = temp_home();
    let config = Config::for_tests();
    let mock = MockToolServer::new(Platform::Jira);
    mock.fail_next(Operation::Authenticate, codes::UNAUTHORIZED, 1);
    let mut orchestrator = start_run(&config, &home, "shop-auth", SHOP_BRD, &mock, confident_parser())?;

    let outcome = orchestrator.run().await?;
    assert!(matches!(outcome, RunOutcome::AwaitingGate { gate: GateKind::B, .. }));
    let auth = mock.payloads(Operation::Authenticate);
    assert_eq!(auth.len(), 2);
    assert!(auth[0].get("force_refresh").is_none());
    assert_eq!(auth[1]["force_refresh"], true);
    Ok(())
}

#[tokio::test]
async fn test_failed_token_refresh_escalates() -> Result<()> {
    let (_dir, home) = temp_home();
    let config = Config::for_tests();
    let mock = MockToolServer::new(Platform::Jira);
    mock.fail_next(Operation::Authenticate, codes::UNAUTHORIZED, 2);
    let mut orchestrator = start_run(&config, &home, "shop-noauth", SHOP_BRD, &mock, confident_parser())?;

    let err = orchestrator.run().await.unwrap_err();
    assert!(
        matches!(err, BrdflowError::Phase(PhaseError::Escalated { phase: PhaseId::Auth, .. })),
        "{err:?}"
    );
    assert_eq!(err.to_exit_code(), ExitCode::ESCALATED);
    assert_eq!(orchestrator.state().status, RunStatus::Escalated);
    assert_eq!(mock.call_count(Operation::Authenticate), 2);
    assert_eq!(mock.call_count(Operation::GetAllProjects), 0);
    Ok(())
}

#[tokio::test]
async fn test_new_project_is_polled_until_ready() -> Result<()> {
    let (_dir, home) = temp_home();
    let config = Config::for_tests();
    let mock = MockToolServer::new(Platform::Ado)
        .with_organizations(&["Contoso"])
        .with_project_ready_after(2);
    let mut orchestrator = start_run(&config, &home, "shop-poll", SHOP_BRD, &mock, confident_parser())?;

    let outcome = orchestrator.run().await?;
    assert!(matches!(outcome, RunOutcome::AwaitingGate { gate: GateKind::B, .. }));
    assert_eq!(mock.project_names(), vec!["Online Store".to_string()]);
    assert_eq!(mock.call_count(Operation::CreateProject), 1);
    // Two not-found answers, then ready
    assert_eq!(mock.call_count(Operation::GetProject), 3);

    let project = orchestrator.state().project.as_ref().expect("project recorded");
    assert!(project.ready);
    assert!(project.created_by_run);
    Ok(())
}

#[tokio::test]
async fn test_project_not_ready_within_bound_escalates() -> Result<()> {
    let (_dir, home) = temp_home();
    let config = Config::for_tests();
    let mock = MockToolServer::new(Platform::Jira).with_project_ready_after(1_000);
    let mut orchestrator = start_run(&config, &home, "shop-slow", SHOP_BRD, &mock, confident_parser())?;

    let err = orchestrator.run().await.unwrap_err();
    assert!(
        matches!(err, BrdflowError::Phase(PhaseError::Escalated { phase: PhaseId::ProjectSetup, .. })),
        "{err:?}"
    );
    let polls = mock.call_count(Operation::GetProject);
    assert!((1..=config.creation.max_poll_attempts as usize).contains(&polls), "{polls} polls");
    assert_eq!(orchestrator.state().status, RunStatus::Escalated);
    assert!(orchestrator.state().project.as_ref().is_some_and(|p| !p.ready));
    assert_eq!(mock.call_count(Operation::CreateIssue), 0);
    Ok(())
}
