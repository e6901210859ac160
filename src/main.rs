// src/main.rs - Arm service and maintenance commands
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, Mutex};
use tv_arm_rs::arm_channel::{
    dispatch, spawn_command_loop, ArmCommand, ArmHandle, ArmRequest, ArmResponse,
};
use tv_arm_rs::config::{self, Config};
use tv_arm_rs::file_manager::PathStore;
use tv_arm_rs::motion::StopSignal;
use tv_arm_rs::path_job::{JobEvent, PathJobManager, PlaybackOptions};
use tv_arm_rs::simulator::SimulatedArm;
use tv_arm_rs::telemetry::{spawn_event_forwarder, spawn_heartbeat, LogTelemetry, TelemetrySink};

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

const DEFAULT_CONFIG: &str = "tv_arm.toml";

#[derive(Parser, Debug)]
#[command(name = "tv-arm", version, about = "Motorized TV arm controller with teach-and-replay")]
struct Cli {
    /// Configuration file (TOML)
    #[arg(short, long)]
    config: Option<String>,
    /// Log at debug level regardless of the config
    #[arg(short, long)]
    verbose: bool,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the arm service with a line-oriented command console on stdin
    Serve,
    /// Move to a position and exit
    Move { x: f64, y: f64 },
    /// Record a path while the arm is moved by hand; Enter or Ctrl-C stops
    Record {
        name: Option<String>,
        /// Stop automatically after this many seconds
        #[arg(long)]
        seconds: Option<f64>,
    },
    /// Play a stored path
    Play {
        name: String,
        #[arg(long)]
        speed: Option<f64>,
        /// Wait for Enter after every waypoint
        #[arg(long)]
        step: bool,
    },
    /// List stored paths, newest first
    List,
    /// Delete a stored path
    Delete { name: String },
    /// Remove backtracking and optionally thin out a stored path
    Clean {
        name: String,
        /// Save under a new name instead of overwriting
        #[arg(long)]
        output: Option<String>,
        #[arg(long, default_value_t = 1)]
        keep_every: usize,
    },
    /// Build a reversed copy of a stored path (e.g. retract from extend)
    Reverse { name: String, output: String },
    /// Sweep both axes to their stops and print the measured voltages
    Calibrate {
        #[arg(long)]
        drive_secs: Option<f64>,
    },
    /// Interactive jogging: x+ x- y+ y- move one step, + and - change the step
    Jog,
    /// Drive through the configured test positions and report each one
    Test,
    /// Print live sensor voltages and positions until Ctrl-C
    Monitor {
        #[arg(long)]
        interval_ms: Option<u64>,
        /// Stop after this many readings
        #[arg(long)]
        count: Option<u64>,
    },
}

fn load(cli: &Cli) -> Result<Config, BoxError> {
    let path = match &cli.config {
        Some(path) => path.clone(),
        None if std::path::Path::new(DEFAULT_CONFIG).exists() => DEFAULT_CONFIG.to_string(),
        None => {
            tracing::warn!("No configuration file given and no {} found; using defaults", DEFAULT_CONFIG);
            let config = Config::default();
            config.validate()?;
            return Ok(config);
        }
    };
    tracing::info!("Loading configuration from: {}", path);
    config::load_config(&path).map_err(|e| {
        tracing::error!("Failed to load config from '{}': {}", path, e);
        Box::new(e) as BoxError
    })
}

struct Service {
    config: Config,
    arm: SimulatedArm,
    manager: PathJobManager,
}

impl Service {
    async fn start(config: Config) -> Self {
        let arm = SimulatedArm::new(&config);
        tracing::info!(
            "Simulated arm at {} (travel {:.0}%/s)",
            arm.position(),
            config.simulator.travel_rate
        );
        let controller = Arc::new(Mutex::new(arm.controller(&config)));
        let store = PathStore::new(config.recording.paths_directory.clone());
        let manager = PathJobManager::new(controller, store, &config).await;
        Self {
            config,
            arm,
            manager,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let cli = Cli::parse();

    // Logging comes up before the config so load errors are visible; the
    // configured level applies from the first line only with --verbose.
    let bootstrap = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    let config = {
        let _guard = tracing::subscriber::set_default(
            tracing_subscriber::fmt().with_max_level(bootstrap).finish(),
        );
        load(&cli)?
    };
    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        config.system.tracing_level()
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    tracing::info!("Starting tv-arm {}", env!("CARGO_PKG_VERSION"));
    let service = Service::start(config).await;
    service.manager.store().ensure_directory().await?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(service).await,
        Command::Move { x, y } => {
            let job_id = service.manager.move_to(x, y).await?;
            let outcome = service.manager.wait_for_playback(&job_id).await;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
            println!("Final position: {}", service.arm.position());
            Ok(())
        }
        Command::Record { name, seconds } => record(&service, name, seconds).await,
        Command::Play { name, speed, step } => play(&service, &name, speed, step).await,
        Command::List => {
            let paths = service.manager.list_paths().await?;
            if paths.is_empty() {
                println!("No recorded paths in {}", service.manager.store().directory().display());
            }
            for p in paths {
                println!(
                    "{:<24} {:<8} {:>4} waypoints {:>7.1}s  {}",
                    p.name,
                    format!("{:?}", p.kind).to_lowercase(),
                    p.waypoint_count,
                    p.total_duration,
                    p.recorded_at.format("%Y-%m-%d %H:%M:%S")
                );
            }
            Ok(())
        }
        Command::Delete { name } => {
            service.manager.delete_path(&name).await?;
            println!("Deleted '{}'", name);
            Ok(())
        }
        Command::Clean {
            name,
            output,
            keep_every,
        } => {
            let store = service.manager.store();
            let original = store.load(&name).await?;
            let mut cleaned = original.make_unidirectional().decimate(keep_every);
            cleaned.name = output.unwrap_or(name);
            store.save(&cleaned).await?;
            println!(
                "'{}': {} -> {} waypoints, saved as '{}'",
                original.name,
                original.len(),
                cleaned.len(),
                cleaned.name
            );
            Ok(())
        }
        Command::Reverse { name, output } => {
            let store = service.manager.store();
            let original = store.load(&name).await?;
            let reversed = original.reversed(output);
            store.save(&reversed).await?;
            println!(
                "'{}' reversed into '{}' ({:?}, {} waypoints)",
                original.name,
                reversed.name,
                reversed.kind,
                reversed.len()
            );
            Ok(())
        }
        Command::Calibrate { drive_secs } => {
            let controller = service.manager.controller();
            let mut controller = controller.lock().await;
            let drive = drive_secs
                .map(|s| std::time::Duration::from_secs_f64(s.max(0.1)))
                .unwrap_or_else(|| controller.settings().calibration_drive());
            let report = controller.calibrate(drive).await?;
            println!("# Measured extremes, paste into the [*_axis.calibration] sections");
            println!("{}", toml::to_string(&report)?);
            Ok(())
        }
        Command::Jog => jog(&service).await,
        Command::Test => {
            let mut events = service.manager.subscribe();
            let job_id = service.manager.run_test_sequence().await?;
            let reporter = tokio::spawn(async move {
                while let Ok(event) = events.recv().await {
                    if let JobEvent::WaypointReached { index, total, position, .. } = event {
                        println!("{}/{} reached {}", index, total, position);
                    }
                }
            });
            let outcome = tokio::select! {
                outcome = service.manager.wait_for_playback(&job_id) => outcome,
                _ = tokio::signal::ctrl_c() => {
                    service.manager.stop_playback().await?;
                    None
                }
            };
            reporter.abort();
            match outcome {
                Some(outcome) => println!("{}", serde_json::to_string_pretty(&outcome)?),
                None => println!("Test sequence stopped"),
            }
            Ok(())
        }
        Command::Monitor { interval_ms, count } => {
            let interval = interval_ms
                .map(std::time::Duration::from_millis)
                .unwrap_or_else(|| service.config.manual.monitor_interval());
            monitor(&service, interval, count).await
        }
    }
}

async fn serve(service: Service) -> Result<(), BoxError> {
    let Service {
        config,
        arm: _arm,
        manager,
    } = service;
    let sink: Arc<dyn TelemetrySink> = Arc::new(LogTelemetry);
    let (shutdown_tx, shutdown) = StopSignal::channel();

    let heartbeat = spawn_heartbeat(
        manager.controller(),
        config.system.position_update_interval(),
        sink.clone(),
        shutdown.clone(),
    );
    let forwarder = spawn_event_forwarder(manager.subscribe(), sink, shutdown);

    let (request_tx, request_rx) = mpsc::channel::<ArmRequest>(16);
    let command_loop = spawn_command_loop(manager.clone(), config.presets.clone(), request_rx);
    let handle = ArmHandle::new(request_tx);

    if config.system.restore_position_on_startup {
        let (x, y) = (config.system.default_x_position, config.system.default_y_position);
        tracing::info!("Restoring default position X={:.1}%, Y={:.1}%", x, y);
        if let Err(e) = handle.send(ArmCommand::SetPosition { x, y }).await {
            tracing::warn!("Startup restore failed: {}", e);
        }
    }

    tracing::info!("Ready. Commands: open, close, stop, move X Y, x N, y N, position, record [name], save, play NAME [speed] [step], next, list, delete NAME, status, jog X|Y [N], jogstep N, test, readout, quit");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted");
                break;
            }
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                if matches!(line, "quit" | "exit") {
                    break;
                }
                match line.parse::<ArmCommand>() {
                    Ok(command) => match handle.send(command).await {
                        Ok(response) => println!("{}", serde_json::to_string(&response)?),
                        Err(e) => println!("error: {}", e),
                    },
                    Err(e) => println!("error: {}", e),
                }
            }
        }
    }

    tracing::info!("Shutting down");
    drop(handle);
    manager.shutdown().await;
    let _ = shutdown_tx.send(true);
    let _ = tokio::join!(heartbeat, forwarder, command_loop);
    Ok(())
}

async fn jog(service: &Service) -> Result<(), BoxError> {
    let manager = &service.manager;
    println!(
        "Jog step {:.1}%. Commands: x+ x- y+ y- (or jog X N), + -, jogstep N, position, readout, stop, quit",
        manager.jog_step().await
    );
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else { break };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if matches!(line, "q" | "quit" | "exit") {
            break;
        }
        let command = match line.parse::<ArmCommand>() {
            Ok(command) => command,
            Err(e) => {
                println!("error: {}", e);
                continue;
            }
        };
        match dispatch(manager, &service.config.presets, command).await {
            Ok(ArmResponse::JobStarted { job_id }) => {
                if let Some(outcome) = manager.wait_for_playback(&job_id).await {
                    if !outcome.is_completed() {
                        println!("{}", serde_json::to_string(&outcome)?);
                    }
                }
                println!("Position: {}", manager.current_position().await);
            }
            Ok(response) => println!("{}", serde_json::to_string(&response)?),
            Err(e) => println!("error: {}", e),
        }
    }
    manager.controller().lock().await.emergency_stop();
    Ok(())
}

async fn monitor(service: &Service, interval: std::time::Duration, count: Option<u64>) -> Result<(), BoxError> {
    let mut ticker = tokio::time::interval(interval);
    let mut taken = 0u64;
    println!("{:>8} {:>7} {:>10}   {:>8} {:>7} {:>10}", "X volts", "X %", "X quality", "Y volts", "Y %", "Y quality");
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = tokio::signal::ctrl_c() => break,
        }
        match service.manager.live_reading().await {
            Some(reading) => println!(
                "{:>8.3} {:>7.1} {:>10}   {:>8.3} {:>7.1} {:>10}",
                reading.x.voltage,
                reading.x.percent,
                format!("{:?}", reading.x.quality),
                reading.y.voltage,
                reading.y.percent,
                format!("{:?}", reading.y.quality)
            ),
            None => println!("(arm busy)"),
        }
        taken += 1;
        if count.is_some_and(|limit| taken >= limit) {
            break;
        }
    }
    Ok(())
}

async fn record(service: &Service, name: Option<String>, seconds: Option<f64>) -> Result<(), BoxError> {
    let name = service.manager.start_recording(name).await?;
    println!("Recording '{}'. Move the arm by hand, then press Enter to save.", name);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let limit = async {
        match seconds {
            Some(s) => tokio::time::sleep(std::time::Duration::from_secs_f64(s.max(0.0))).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::select! {
        _ = lines.next_line() => {}
        _ = tokio::signal::ctrl_c() => {}
        _ = limit => {}
    }
    let outcome = service.manager.stop_recording().await?;
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}

async fn play(service: &Service, name: &str, speed: Option<f64>, step: bool) -> Result<(), BoxError> {
    let options = PlaybackOptions {
        speed_multiplier: speed.unwrap_or(1.0),
        manual_step: step,
    };
    let job_id = service.manager.play_path(name, options).await?;
    if step {
        println!("Manual step mode: press Enter after each waypoint.");
    }

    let manager = service.manager.clone();
    let stepper = tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(_)) = lines.next_line().await {
            if manager.confirm_step().await.is_err() {
                break;
            }
        }
    });

    let outcome = tokio::select! {
        outcome = service.manager.wait_for_playback(&job_id) => outcome,
        _ = tokio::signal::ctrl_c() => {
            service.manager.stop_playback().await?;
            None
        }
    };
    stepper.abort();
    match outcome {
        Some(outcome) => println!("{}", serde_json::to_string_pretty(&outcome)?),
        None => println!("Playback stopped"),
    }
    println!("Final position: {}", service.arm.position());
    Ok(())
}
