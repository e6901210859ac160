//! Defines the command channel between outer surfaces (console, home automation
//! bridge) and the arm task.

use crate::config::PresetConfig;
use crate::motion::{ArmPosition, Axis, LiveReading};
use crate::path::PathSummary;
use crate::path_job::{JobError, JobStatus, PathJobManager, PlaybackOptions, RecordingOutcome};
use serde::Serialize;
use std::str::FromStr;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// A command for the arm, parsed at the boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum ArmCommand {
    /// Play the configured open path, or move to the open preset.
    Open,
    /// Play the configured close path, or move to the close preset.
    Close,
    /// Stop playback and both motors.
    Stop,
    SetPosition { x: f64, y: f64 },
    SetX(f64),
    SetY(f64),
    GetPosition,
    StartRecording(Option<String>),
    StopRecording,
    PlayPath {
        name: String,
        speed: Option<f64>,
        manual_step: bool,
    },
    StopPlayback,
    ConfirmStep,
    ListPaths,
    DeletePath(String),
    Status,
    /// Move one axis by a number of jog steps; negative steps move back.
    Jog { axis: Axis, steps: i32 },
    SetJogStep(f64),
    /// Grow (positive) or shrink the jog step by whole increments.
    AdjustJogStep(i32),
    TestSequence,
    /// Voltage and percent per axis straight from the sensors.
    Readout,
}

#[derive(Debug, Error, PartialEq)]
pub enum CommandParseError {
    #[error("Empty command")]
    Empty,
    #[error("Unknown command '{0}'")]
    Unknown(String),
    #[error("Missing argument for '{0}'")]
    MissingArgument(String),
    #[error("Invalid number '{0}'")]
    InvalidNumber(String),
}

fn axis(command: &str, token: Option<&str>) -> Result<Axis, CommandParseError> {
    match token.map(str::to_ascii_lowercase).as_deref() {
        Some("x") => Ok(Axis::X),
        Some("y") => Ok(Axis::Y),
        Some(other) => Err(CommandParseError::Unknown(other.to_string())),
        None => Err(CommandParseError::MissingArgument(command.to_string())),
    }
}

fn number(command: &str, token: Option<&str>) -> Result<f64, CommandParseError> {
    let token = token.ok_or_else(|| CommandParseError::MissingArgument(command.to_string()))?;
    token
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| CommandParseError::InvalidNumber(token.to_string()))
}

impl FromStr for ArmCommand {
    type Err = CommandParseError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut tokens = line.split_whitespace();
        let head = tokens.next().ok_or(CommandParseError::Empty)?.to_ascii_lowercase();
        let command = match head.as_str() {
            "open" => ArmCommand::Open,
            "close" => ArmCommand::Close,
            "stop" => ArmCommand::Stop,
            "move" | "set_position" => {
                let x = number(&head, tokens.next())?;
                let y = number(&head, tokens.next())?;
                ArmCommand::SetPosition { x, y }
            }
            "x" | "set_x" => ArmCommand::SetX(number(&head, tokens.next())?),
            "y" | "set_y" => ArmCommand::SetY(number(&head, tokens.next())?),
            "position" | "pos" | "get_position" => ArmCommand::GetPosition,
            "record" | "start_recording" => ArmCommand::StartRecording(tokens.next().map(str::to_string)),
            "save" | "stop_recording" => ArmCommand::StopRecording,
            "play" | "play_path" => {
                let name = tokens
                    .next()
                    .ok_or_else(|| CommandParseError::MissingArgument(head.clone()))?
                    .to_string();
                let mut speed = None;
                let mut manual_step = false;
                for token in tokens.by_ref() {
                    if matches!(token, "step" | "--step" | "manual") {
                        manual_step = true;
                    } else {
                        speed = Some(number(&head, Some(token))?);
                    }
                }
                ArmCommand::PlayPath {
                    name,
                    speed,
                    manual_step,
                }
            }
            "stop_playback" => ArmCommand::StopPlayback,
            "next" | "step" | "confirm" | "confirm_step" => ArmCommand::ConfirmStep,
            "list" | "paths" | "list_paths" => ArmCommand::ListPaths,
            "delete" | "delete_path" => ArmCommand::DeletePath(
                tokens
                    .next()
                    .ok_or_else(|| CommandParseError::MissingArgument(head.clone()))?
                    .to_string(),
            ),
            "status" => ArmCommand::Status,
            "jog" => {
                let axis = axis(&head, tokens.next())?;
                let steps = match tokens.next() {
                    Some(token) => token
                        .parse::<i32>()
                        .map_err(|_| CommandParseError::InvalidNumber(token.to_string()))?,
                    None => 1,
                };
                ArmCommand::Jog { axis, steps }
            }
            "x+" => ArmCommand::Jog { axis: Axis::X, steps: 1 },
            "x-" => ArmCommand::Jog { axis: Axis::X, steps: -1 },
            "y+" => ArmCommand::Jog { axis: Axis::Y, steps: 1 },
            "y-" => ArmCommand::Jog { axis: Axis::Y, steps: -1 },
            "jogstep" | "jog_step" => ArmCommand::SetJogStep(number(&head, tokens.next())?),
            "+" => ArmCommand::AdjustJogStep(1),
            "-" => ArmCommand::AdjustJogStep(-1),
            "test" | "test_sequence" => ArmCommand::TestSequence,
            "readout" | "voltages" => ArmCommand::Readout,
            other => return Err(CommandParseError::Unknown(other.to_string())),
        };
        Ok(command)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "response", rename_all = "snake_case")]
pub enum ArmResponse {
    Ack { message: String },
    Position { position: ArmPosition },
    JobStarted { job_id: String },
    RecordingStarted { name: String },
    Recorded { outcome: RecordingOutcome },
    Paths { paths: Vec<PathSummary> },
    Status { status: JobStatus },
    JogStep { step: f64 },
    Readout { reading: LiveReading },
}

/// A command plus the channel to answer on.
#[derive(Debug)]
pub struct ArmRequest {
    pub command: ArmCommand,
    pub respond_to: oneshot::Sender<Result<ArmResponse, String>>,
}

/// Client side of the command channel.
#[derive(Debug, Clone)]
pub struct ArmHandle {
    tx: mpsc::Sender<ArmRequest>,
}

impl ArmHandle {
    pub fn new(tx: mpsc::Sender<ArmRequest>) -> Self {
        Self { tx }
    }

    pub async fn send(&self, command: ArmCommand) -> Result<ArmResponse, String> {
        let (respond_to, response) = oneshot::channel();
        self.tx
            .send(ArmRequest {
                command,
                respond_to,
            })
            .await
            .map_err(|_| "arm task is not running".to_string())?;
        response
            .await
            .map_err(|_| "arm task dropped the request".to_string())?
    }
}

async fn run_preset(
    manager: &PathJobManager,
    path: Option<&str>,
    position: [f64; 2],
) -> Result<ArmResponse, JobError> {
    if let Some(name) = path {
        if manager.store().exists(name).await {
            let job_id = manager.play_path(name, PlaybackOptions::default()).await?;
            return Ok(ArmResponse::JobStarted { job_id });
        }
        tracing::info!(
            "No stored path '{}', moving to preset X={:.1}%, Y={:.1}%",
            name,
            position[0],
            position[1]
        );
    }
    let job_id = manager.move_to(position[0], position[1]).await?;
    Ok(ArmResponse::JobStarted { job_id })
}

/// Execute one command against the job manager.
pub async fn dispatch(
    manager: &PathJobManager,
    presets: &PresetConfig,
    command: ArmCommand,
) -> Result<ArmResponse, JobError> {
    tracing::debug!("Dispatching {:?}", command);
    match command {
        ArmCommand::Open => run_preset(manager, presets.open_path.as_deref(), presets.open_position).await,
        ArmCommand::Close => {
            run_preset(manager, presets.close_path.as_deref(), presets.close_position).await
        }
        ArmCommand::Stop => {
            if manager.is_playing().await {
                manager.stop_playback().await?;
            }
            manager.controller().lock().await.emergency_stop();
            Ok(ArmResponse::Ack {
                message: "stopped".to_string(),
            })
        }
        ArmCommand::SetPosition { x, y } => {
            let job_id = manager.move_to(x, y).await?;
            Ok(ArmResponse::JobStarted { job_id })
        }
        ArmCommand::SetX(x) => {
            let current = manager.current_position().await;
            let job_id = manager.move_to(x, current.y).await?;
            Ok(ArmResponse::JobStarted { job_id })
        }
        ArmCommand::SetY(y) => {
            let current = manager.current_position().await;
            let job_id = manager.move_to(current.x, y).await?;
            Ok(ArmResponse::JobStarted { job_id })
        }
        ArmCommand::GetPosition => Ok(ArmResponse::Position {
            position: manager.current_position().await,
        }),
        ArmCommand::StartRecording(name) => {
            let name = manager.start_recording(name).await?;
            Ok(ArmResponse::RecordingStarted { name })
        }
        ArmCommand::StopRecording => Ok(ArmResponse::Recorded {
            outcome: manager.stop_recording().await?,
        }),
        ArmCommand::PlayPath {
            name,
            speed,
            manual_step,
        } => {
            let options = PlaybackOptions {
                speed_multiplier: speed.unwrap_or(1.0),
                manual_step,
            };
            let job_id = manager.play_path(&name, options).await?;
            Ok(ArmResponse::JobStarted { job_id })
        }
        ArmCommand::StopPlayback => {
            manager.stop_playback().await?;
            Ok(ArmResponse::Ack {
                message: "playback stopped".to_string(),
            })
        }
        ArmCommand::ConfirmStep => {
            manager.confirm_step().await?;
            Ok(ArmResponse::Ack {
                message: "step confirmed".to_string(),
            })
        }
        ArmCommand::ListPaths => Ok(ArmResponse::Paths {
            paths: manager.list_paths().await?,
        }),
        ArmCommand::DeletePath(name) => {
            manager.delete_path(&name).await?;
            Ok(ArmResponse::Ack {
                message: format!("deleted '{}'", name),
            })
        }
        ArmCommand::Status => Ok(ArmResponse::Status {
            status: manager.status().await,
        }),
        ArmCommand::Jog { axis, steps } => {
            let job_id = manager.jog(axis, steps).await?;
            Ok(ArmResponse::JobStarted { job_id })
        }
        ArmCommand::SetJogStep(step) => Ok(ArmResponse::JogStep {
            step: manager.set_jog_step(step).await,
        }),
        ArmCommand::AdjustJogStep(increments) => Ok(ArmResponse::JogStep {
            step: manager.adjust_jog_step(increments).await,
        }),
        ArmCommand::TestSequence => {
            let job_id = manager.run_test_sequence().await?;
            Ok(ArmResponse::JobStarted { job_id })
        }
        ArmCommand::Readout => match manager.live_reading().await {
            Some(reading) => Ok(ArmResponse::Readout { reading }),
            None => Err(JobError::Conflict("arm is busy".to_string())),
        },
    }
}

/// Serve requests until every `ArmHandle` is dropped.
pub fn spawn_command_loop(
    manager: PathJobManager,
    presets: PresetConfig,
    mut requests: mpsc::Receiver<ArmRequest>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(request) = requests.recv().await {
            let result = dispatch(&manager, &presets, request.command)
                .await
                .map_err(|e| {
                    tracing::warn!("Command failed: {}", e);
                    e.to_string()
                });
            let _ = request.respond_to.send(result);
        }
        tracing::debug!("Command loop finished");
    })
}
