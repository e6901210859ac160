// Integration tests for recording and playback jobs on the simulated arm
use chrono::Utc;
use std::sync::Arc;
use tempfile::{tempdir, TempDir};
use tokio::sync::Mutex;
use tokio::time::{sleep, timeout, Duration};
use tv_arm_rs::config::Config;
use tv_arm_rs::file_manager::{PathStore, PathStoreError};
use tv_arm_rs::hardware::ReadQuality;
use tv_arm_rs::motion::Axis;
use tv_arm_rs::path::{Path, PathKind};
use tv_arm_rs::path_job::{
    JobError, JobEvent, JobStatus, PathJobManager, PlaybackOptions, PlaybackOutcome, RecordingOutcome,
};
use tv_arm_rs::SimulatedArm;

async fn setup(start_x: f64, start_y: f64) -> (SimulatedArm, PathJobManager, TempDir) {
    let mut config = Config::default();
    config.simulator.start_x = start_x;
    config.simulator.start_y = start_y;
    config.simulator.travel_rate = 25.0;
    config.motion.waypoint_pause_ms = 100;
    let dir = tempdir().unwrap();
    let arm = SimulatedArm::new(&config);
    let controller = Arc::new(Mutex::new(arm.controller(&config)));
    let store = PathStore::new(dir.path());
    let manager = PathJobManager::new(controller, store, &config).await;
    (arm, manager, dir)
}

fn extend_path(points: &[(f64, f64)]) -> Path {
    let mut path = Path::new("extend", Utc::now());
    for (i, (x, y)) in points.iter().enumerate() {
        path.push(*x, *y, Duration::from_millis(500 * i as u64));
    }
    path
}

#[tokio::test(start_paused = true)]
async fn test_record_hand_guided_motion() {
    let (arm, manager, _dir) = setup(20.0, 30.0).await;

    let name = manager.start_recording(Some("couch".to_string())).await.unwrap();
    assert_eq!(name, "couch");
    assert!(manager.is_recording().await);

    // Drag the arm the way a hand would: small steps, no jumps.
    for i in 1..=20 {
        sleep(Duration::from_millis(50)).await;
        arm.set_position(20.0 + 2.0 * i as f64, 30.0 + i as f64);
    }
    sleep(Duration::from_millis(300)).await;

    let outcome = manager.stop_recording().await.unwrap();
    let summary = match outcome {
        RecordingOutcome::Saved(summary) => summary,
        other => panic!("expected a saved recording, got {other:?}"),
    };
    assert_eq!(summary.name, "couch");
    assert_eq!(summary.kind, PathKind::Unknown);
    assert!(summary.waypoint_count >= 5, "only {} waypoints", summary.waypoint_count);
    assert!(!manager.is_recording().await);
    assert!(arm.is_stopped());

    let path = manager.store().load("couch").await.unwrap();
    let first = &path.waypoints()[0];
    let last = path.last().unwrap();
    assert!((first.x_percent - 20.0).abs() < 1.0);
    assert!((last.x_percent - 60.0).abs() < 3.0);
    assert!((last.y_percent - 50.0).abs() < 3.0);
    let numbers: Vec<u32> = path.waypoints().iter().map(|w| w.sequence_number).collect();
    assert_eq!(numbers, (1..=path.len() as u32).collect::<Vec<_>>());
}

#[tokio::test(start_paused = true)]
async fn test_stationary_recording_keeps_one_waypoint() {
    let (_arm, manager, _dir) = setup(40.0, 40.0).await;

    let name = manager.start_recording(None).await.unwrap();
    assert!(name.starts_with("path_"));
    sleep(Duration::from_millis(550)).await;

    match manager.stop_recording().await.unwrap() {
        RecordingOutcome::Saved(summary) => assert_eq!(summary.waypoint_count, 1),
        other => panic!("expected a saved recording, got {other:?}"),
    }
    assert!(manager.store().exists(&name).await);
}

#[tokio::test(start_paused = true)]
async fn test_invalid_requests_are_rejected() {
    let (_arm, manager, _dir) = setup(50.0, 50.0).await;

    assert!(matches!(manager.stop_recording().await, Err(JobError::NotRecording)));
    assert!(matches!(manager.stop_playback().await, Err(JobError::NotPlaying)));
    assert!(matches!(manager.confirm_step().await, Err(JobError::NotPlaying)));
    assert!(matches!(
        manager.play_path("nowhere", PlaybackOptions::default()).await,
        Err(JobError::Store(PathStoreError::NotFound(_)))
    ));
    assert!(matches!(
        manager.start_recording(Some("../escape".to_string())).await,
        Err(JobError::Store(PathStoreError::InvalidName(_)))
    ));
    assert_eq!(manager.status().await, JobStatus::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_play_stored_path() {
    let (arm, manager, _dir) = setup(10.0, 10.0).await;
    let path = extend_path(&[(20.0, 20.0), (40.0, 35.0), (60.0, 50.0)]);
    manager.store().save(&path).await.unwrap();

    let job_id = manager.play_path("extend", PlaybackOptions::default()).await.unwrap();
    let outcome = manager.wait_for_playback(&job_id).await.unwrap();

    match outcome {
        PlaybackOutcome::Completed {
            name,
            reached,
            skipped,
            ..
        } => {
            assert_eq!(name, "extend");
            assert_eq!(reached, 3);
            assert_eq!(skipped, 0);
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    let position = arm.position();
    assert!((position.x - 60.0).abs() < 2.0, "x ended at {}", position.x);
    assert!((position.y - 50.0).abs() < 2.0, "y ended at {}", position.y);
    assert!(arm.is_stopped());
    assert_eq!(manager.status().await, JobStatus::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_playback_skips_waypoints_already_passed() {
    let (arm, manager, _dir) = setup(70.0, 70.0).await;
    let path = extend_path(&[(10.0, 10.0), (50.0, 50.0), (90.0, 90.0)]);
    manager.store().save(&path).await.unwrap();

    let job_id = manager.play_path("extend", PlaybackOptions::default()).await.unwrap();
    let outcome = manager.wait_for_playback(&job_id).await.unwrap();

    assert!(
        matches!(outcome, PlaybackOutcome::Completed { reached: 1, skipped: 2, .. }),
        "unexpected outcome: {outcome:?}"
    );
    // Never drove back towards the skipped waypoints.
    assert!(arm.x.position() > 85.0);
    assert!(arm.y.position() > 85.0);
}

#[tokio::test(start_paused = true)]
async fn test_busy_manager_rejects_second_job() {
    let (arm, manager, _dir) = setup(0.0, 0.0).await;

    let job_id = manager.move_to(90.0, 90.0).await.unwrap();
    sleep(Duration::from_millis(500)).await;

    assert!(matches!(manager.start_recording(None).await, Err(JobError::Conflict(_))));
    assert!(matches!(manager.move_to(10.0, 10.0).await, Err(JobError::Conflict(_))));
    match manager.status().await {
        JobStatus::Playing { job_id: id, name, total, .. } => {
            assert_eq!(id, job_id);
            assert_eq!(name, "direct_move");
            assert_eq!(total, 1);
        }
        other => panic!("unexpected status: {other:?}"),
    }

    manager.stop_playback().await.unwrap();
    assert!(arm.is_stopped());
    assert!(!manager.is_playing().await);
    let x = arm.x.position();
    assert!(x > 0.0 && x < 50.0, "x ended at {x}");
}

#[tokio::test(start_paused = true)]
async fn test_manual_step_waits_for_confirmation() {
    let (arm, manager, _dir) = setup(10.0, 10.0).await;
    manager
        .store()
        .save(&extend_path(&[(20.0, 20.0), (30.0, 30.0)]))
        .await
        .unwrap();
    let mut events = manager.subscribe();

    let options = PlaybackOptions {
        speed_multiplier: 1.0,
        manual_step: true,
    };
    let job_id = manager.play_path("extend", options).await.unwrap();

    let finished = timeout(Duration::from_secs(60), async {
        loop {
            match events.recv().await.unwrap() {
                JobEvent::AwaitingStep { index, total, .. } => {
                    assert_eq!((index, total), (1, 2));
                    assert!(matches!(
                        manager.status().await,
                        JobStatus::Playing { awaiting_step: true, waypoint: 1, .. }
                    ));
                    // Nothing moves while waiting.
                    sleep(Duration::from_secs(2)).await;
                    assert!(arm.is_stopped());
                    assert!(arm.x.position() < 25.0);
                    manager.confirm_step().await.unwrap();
                }
                JobEvent::PlaybackFinished { job_id: id, outcome } => {
                    assert_eq!(id, job_id);
                    return outcome;
                }
                _ => {}
            }
        }
    })
    .await
    .expect("playback should finish");

    assert!(finished.is_completed(), "unexpected outcome: {finished:?}");
    assert!((arm.x.position() - 30.0).abs() < 2.0);
}

#[tokio::test(start_paused = true)]
async fn test_sensor_failure_fails_playback_and_stops() {
    let (arm, manager, _dir) = setup(10.0, 10.0).await;

    let job_id = manager.move_to(80.0, 80.0).await.unwrap();
    sleep(Duration::from_millis(400)).await;
    arm.x.set_read_failure(true);

    let outcome = manager.wait_for_playback(&job_id).await.unwrap();
    match outcome {
        PlaybackOutcome::Failed { at_waypoint, error, .. } => {
            assert_eq!(at_waypoint, 1);
            assert!(error.contains("X"), "error was: {error}");
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert!(arm.is_stopped());
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_stops_running_job() {
    let (arm, manager, _dir) = setup(0.0, 0.0).await;

    manager.move_to(90.0, 90.0).await.unwrap();
    sleep(Duration::from_millis(300)).await;
    manager.shutdown().await;

    assert!(arm.is_stopped());
    assert_eq!(manager.status().await, JobStatus::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_jog_moves_one_axis_by_step() {
    let (arm, manager, _dir) = setup(40.0, 40.0).await;
    assert_eq!(manager.jog_step().await, 2.0);
    assert_eq!(manager.set_jog_step(5.0).await, 5.0);

    let job_id = manager.jog(Axis::X, 2).await.unwrap();
    match manager.status().await {
        JobStatus::Playing { name, .. } => assert_eq!(name, "jog"),
        other => panic!("unexpected status: {other:?}"),
    }
    assert!(matches!(manager.jog(Axis::Y, 1).await, Err(JobError::Conflict(_))));
    let outcome = manager.wait_for_playback(&job_id).await.unwrap();
    assert!(outcome.is_completed(), "unexpected outcome: {outcome:?}");
    assert!((arm.x.position() - 50.0).abs() < 1.5, "x ended at {}", arm.x.position());
    assert!((arm.y.position() - 40.0).abs() < 1.0, "y ended at {}", arm.y.position());

    let job_id = manager.jog(Axis::Y, -1).await.unwrap();
    manager.wait_for_playback(&job_id).await.unwrap();
    assert!((arm.y.position() - 35.0).abs() < 1.5, "y ended at {}", arm.y.position());
    assert!(arm.is_stopped());
}

#[tokio::test(start_paused = true)]
async fn test_jog_step_stays_in_range() {
    let (_arm, manager, _dir) = setup(50.0, 50.0).await;
    assert_eq!(manager.adjust_jog_step(1).await, 2.5);
    assert_eq!(manager.adjust_jog_step(100).await, 10.0);
    assert_eq!(manager.set_jog_step(0.0).await, 0.5);
    assert_eq!(manager.adjust_jog_step(-1).await, 0.5);
}

#[tokio::test(start_paused = true)]
async fn test_sequence_visits_every_position() {
    let (arm, manager, _dir) = setup(50.0, 50.0).await;
    let mut events = manager.subscribe();

    let job_id = manager.run_test_sequence().await.unwrap();
    let outcome = manager.wait_for_playback(&job_id).await.unwrap();

    match outcome {
        PlaybackOutcome::Completed {
            name,
            reached,
            skipped,
            ..
        } => {
            assert_eq!(name, "test_sequence");
            assert_eq!(reached, 5);
            assert_eq!(skipped, 0);
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    let mut corners = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let JobEvent::WaypointReached { position, .. } = event {
            corners.push(position);
        }
    }
    assert_eq!(corners.len(), 5);
    assert!((corners[1].x - 95.0).abs() < 2.0 && (corners[1].y - 5.0).abs() < 2.0);
    let position = arm.position();
    assert!((position.x - 50.0).abs() < 2.0, "x ended at {}", position.x);
    assert!((position.y - 50.0).abs() < 2.0, "y ended at {}", position.y);
    // Test runs are not saved as paths.
    assert!(manager.list_paths().await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_live_reading_only_when_idle() {
    let (arm, manager, _dir) = setup(30.0, 70.0).await;

    let reading = manager.live_reading().await.unwrap();
    assert!((reading.x.percent - 30.0).abs() < 0.5);
    assert!((reading.y.percent - 70.0).abs() < 0.5);
    assert_eq!(reading.x.quality, ReadQuality::Good);
    assert!(reading.x.voltage < reading.y.voltage);

    manager.move_to(90.0, 90.0).await.unwrap();
    sleep(Duration::from_millis(300)).await;
    assert!(manager.live_reading().await.is_none());
    manager.stop_playback().await.unwrap();
    assert!(arm.is_stopped());
}
