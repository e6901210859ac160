// End-to-end tests for the command channel: handle -> command loop -> jobs
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::time::Duration;
use tv_arm_rs::arm_channel::{spawn_command_loop, ArmCommand, ArmHandle, ArmResponse};
use tv_arm_rs::config::Config;
use tv_arm_rs::file_manager::PathStore;
use tv_arm_rs::motion::Axis;
use tv_arm_rs::path::Path;
use tv_arm_rs::path_job::{JobStatus, PathJobManager, PlaybackOutcome};
use tv_arm_rs::SimulatedArm;

struct Harness {
    arm: SimulatedArm,
    manager: PathJobManager,
    handle: ArmHandle,
    _dir: tempfile::TempDir,
}

async fn harness(start_x: f64, start_y: f64) -> Harness {
    let mut config = Config::default();
    config.simulator.start_x = start_x;
    config.simulator.start_y = start_y;
    config.simulator.travel_rate = 25.0;
    let dir = tempfile::tempdir().unwrap();
    let arm = SimulatedArm::new(&config);
    let controller = Arc::new(Mutex::new(arm.controller(&config)));
    let manager = PathJobManager::new(controller, PathStore::new(dir.path()), &config).await;
    let (tx, rx) = mpsc::channel(8);
    spawn_command_loop(manager.clone(), config.presets.clone(), rx);
    Harness {
        arm,
        manager,
        handle: ArmHandle::new(tx),
        _dir: dir,
    }
}

async fn run_job(h: &Harness, command: ArmCommand) -> PlaybackOutcome {
    let job_id = match h.handle.send(command).await.unwrap() {
        ArmResponse::JobStarted { job_id } => job_id,
        other => panic!("expected a job, got {other:?}"),
    };
    h.manager.wait_for_playback(&job_id).await.unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_open_without_stored_path_moves_to_preset() {
    let h = harness(50.0, 50.0).await;

    let outcome = run_job(&h, ArmCommand::Open).await;

    assert!(outcome.is_completed(), "unexpected outcome: {outcome:?}");
    let position = h.arm.position();
    assert!((position.x - 62.3).abs() < 2.0, "x ended at {}", position.x);
    assert!((position.y - 88.7).abs() < 2.0, "y ended at {}", position.y);
    assert!(h.arm.is_stopped());
}

#[tokio::test(start_paused = true)]
async fn test_close_plays_stored_path() {
    let h = harness(62.0, 88.0).await;
    let mut retract = Path::new("retract", Utc::now());
    retract.push(75.0, 60.0, Duration::ZERO);
    retract.push(85.0, 30.0, Duration::from_secs(3));
    h.manager.store().save(&retract).await.unwrap();

    let outcome = run_job(&h, ArmCommand::Close).await;

    match outcome {
        PlaybackOutcome::Completed { name, reached, .. } => {
            assert_eq!(name, "retract");
            assert_eq!(reached, 2);
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    let position = h.arm.position();
    assert!((position.x - 85.0).abs() < 2.0, "x ended at {}", position.x);
    assert!((position.y - 30.0).abs() < 2.0, "y ended at {}", position.y);
}

#[tokio::test(start_paused = true)]
async fn test_single_axis_commands_keep_other_axis() {
    let h = harness(30.0, 70.0).await;

    run_job(&h, ArmCommand::SetX(45.0)).await;

    let position = h.arm.position();
    assert!((position.x - 45.0).abs() < 2.0);
    assert!((position.y - 70.0).abs() < 1.0);
}

#[tokio::test(start_paused = true)]
async fn test_queries_and_errors() {
    let h = harness(30.0, 70.0).await;

    match h.handle.send(ArmCommand::GetPosition).await.unwrap() {
        ArmResponse::Position { position } => {
            assert!((position.x - 30.0).abs() < 0.5);
            assert!((position.y - 70.0).abs() < 0.5);
        }
        other => panic!("unexpected response: {other:?}"),
    }
    assert_eq!(
        h.handle.send(ArmCommand::Status).await.unwrap(),
        ArmResponse::Status {
            status: JobStatus::Idle
        }
    );
    assert_eq!(
        h.handle.send(ArmCommand::ListPaths).await.unwrap(),
        ArmResponse::Paths { paths: Vec::new() }
    );

    let err = h.handle.send(ArmCommand::StopPlayback).await.unwrap_err();
    assert!(err.contains("No playback"), "error was: {err}");
    let err = h
        .handle
        .send(ArmCommand::DeletePath("missing".to_string()))
        .await
        .unwrap_err();
    assert!(err.contains("not found"), "error was: {err}");
}

#[tokio::test(start_paused = true)]
async fn test_stop_interrupts_move() {
    let h = harness(0.0, 0.0).await;

    let response = h
        .handle
        .send(ArmCommand::SetPosition { x: 90.0, y: 90.0 })
        .await
        .unwrap();
    assert!(matches!(response, ArmResponse::JobStarted { .. }));
    tokio::time::sleep(Duration::from_millis(600)).await;

    let response = h.handle.send(ArmCommand::Stop).await.unwrap();
    assert!(matches!(response, ArmResponse::Ack { .. }));
    assert!(h.arm.is_stopped());
    assert!(!h.manager.is_playing().await);
    assert!(h.arm.x.position() < 50.0);
}

#[tokio::test(start_paused = true)]
async fn test_jog_and_readout_commands() {
    let h = harness(30.0, 70.0).await;

    assert_eq!(
        h.handle.send(ArmCommand::SetJogStep(5.0)).await.unwrap(),
        ArmResponse::JogStep { step: 5.0 }
    );
    let outcome = run_job(&h, ArmCommand::Jog { axis: Axis::X, steps: 2 }).await;
    assert!(outcome.is_completed(), "unexpected outcome: {outcome:?}");
    assert!((h.arm.x.position() - 40.0).abs() < 1.5, "x ended at {}", h.arm.x.position());

    match h.handle.send(ArmCommand::Readout).await.unwrap() {
        ArmResponse::Readout { reading } => {
            assert!((reading.x.percent - 40.0).abs() < 1.5);
            assert!((reading.y.percent - 70.0).abs() < 1.0);
        }
        other => panic!("unexpected response: {other:?}"),
    }
}
