//! `pointreach` – pixel-to-base-frame reaching service.
//!
//! This binary:
//!
//! 1. Loads `~/.pointreach/config.toml`, writing defaults on first run.
//! 2. Starts the driver WebSocket bridge and waits for the depth camera to
//!    announce its calibration (fatal if it never does).
//! 3. Runs the transform pipeline and the request intake on Tokio tasks,
//!    and the idle manager on its own thread.
//! 4. Serves the operator console until `/quit` or **Ctrl-C**, then stops
//!    everything and reports the pipeline statistics.

mod config;
mod orchestrator;
mod repl;

use colored::Colorize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use pointreach_kernel::{IdleManager, IdleMotions};
use pointreach_middleware::{BusSensor, BusTransformSource, DriverBridge, EventBus, Topic};
use pointreach_runtime::{PipelineHandle, RequestIntake, RequestSlot, TransformPipeline};
use pointreach_types::{Event, EventPayload, ReachError};

use crate::config::Config;
use crate::orchestrator::HttpOrchestrator;

/// Async services owned by the runtime.
struct Services {
    pipeline: PipelineHandle,
    intake: JoinHandle<()>,
    bridge: JoinHandle<()>,
}

fn main() {
    let _telemetry = pointreach_runtime::init_tracing("pointreach");

    print_banner();

    let cfg = load_config();

    // ── Shared shutdown flag ──────────────────────────────────────────────
    let shutdown = Arc::new(AtomicBool::new(false));
    let bus = EventBus::default();

    let ctrlc_shutdown = Arc::clone(&shutdown);
    let ctrlc_bus = bus.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Interrupt received – shutting down …".yellow().bold());
        ctrlc_bus.publish_to(
            Topic::SystemAlerts,
            Event::new(
                "pointreach-cli",
                EventPayload::Fault {
                    component: "cli".to_string(),
                    message: "operator interrupt".to_string(),
                },
            ),
        );
        ctrlc_shutdown.store(true, Ordering::SeqCst);
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; use /quit to exit");
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => fatal(&ReachError::Startup(format!("failed to start Tokio runtime: {e}"))),
    };

    let services = match runtime.block_on(start_services(&cfg, &bus)) {
        Ok(s) => s,
        Err(e) => fatal(&e),
    };

    // ── Idle manager ──────────────────────────────────────────────────────
    let orchestrator = match HttpOrchestrator::new(&cfg.orchestrator_url, cfg.orchestrator_timeout()) {
        Ok(o) => o,
        Err(e) => fatal(&e),
    };
    let idle = Arc::new(IdleManager::new(
        IdleMotions::new(cfg.idle_motions.clone(), bus.clone()),
        Box::new(orchestrator),
        cfg.idle_period(),
    )
    .with_motion_every(cfg.motion_every));
    let idle_thread = match Arc::clone(&idle).spawn_polling(Arc::clone(&shutdown)) {
        Ok(handle) => handle,
        Err(e) => fatal(&e),
    };

    println!();
    println!("  Type {} for the console commands.\n", "/help".bold().cyan());

    // ── Operator console ──────────────────────────────────────────────────
    // The console blocks on stdin, so it gets its own thread and main
    // waits on the shutdown flag instead.
    let console = repl::Console {
        idle: Arc::clone(&idle),
        cfg: cfg.clone(),
        bus: bus.clone(),
    };
    let console_shutdown = Arc::clone(&shutdown);
    if let Err(e) = std::thread::Builder::new()
        .name("console".to_string())
        .spawn(move || repl::run(console, console_shutdown))
    {
        warn!(error = %e, "console unavailable; running until interrupted");
    }

    while !shutdown.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(100));
    }

    // ── Graceful shutdown ─────────────────────────────────────────────────
    services.intake.abort();
    services.bridge.abort();
    match runtime.block_on(services.pipeline.stop()) {
        Ok(pipeline) => {
            let stats = pipeline.stats();
            println!(
                "  {} {} published, {} dropped, {} sensor stalls",
                "✓ Pipeline stopped:".green(),
                stats.published,
                stats.dropped,
                stats.stalls
            );
        }
        Err(e) => warn!(error = %e, "pipeline did not stop cleanly"),
    }
    if idle_thread.join().is_err() {
        warn!("idle manager thread panicked");
    }
    runtime.shutdown_timeout(Duration::from_secs(1));
    println!("{}", "  ✓ Exiting pointreach.".green());
}

/// Bind the bridge, wait for the camera, and start the pipeline tasks.
async fn start_services(cfg: &Config, bus: &EventBus) -> Result<Services, ReachError> {
    let addr = cfg.bridge_socket_addr().map_err(ReachError::Startup)?;
    let server = DriverBridge::new(bus.clone(), cfg.topics.clone()).bind(addr).await?;
    println!("  Driver bridge listening on {}", format!("ws://{}", server.local_addr()).bold());
    let bridge = tokio::spawn(server.run());

    let sensor = BusSensor::spawn(cfg.camera_frame.clone(), bus);
    let transforms = BusTransformSource::spawn(bus);

    println!(
        "  Waiting up to {}s for camera calibration on {} …",
        cfg.intrinsics_timeout_secs,
        cfg.topics.camera_info.dimmed()
    );
    let intrinsics = sensor.wait_for_intrinsics(cfg.intrinsics_timeout()).await?;
    println!(
        "  Camera {}x{} (fx {:.1}, fy {:.1})",
        intrinsics.width(),
        intrinsics.height(),
        intrinsics.fx(),
        intrinsics.fy()
    );

    let slot = RequestSlot::new();
    let intake = RequestIntake::new(slot.clone()).spawn_listener(bus);
    let pipeline = TransformPipeline::new(
        cfg.pipeline_config(),
        Box::new(sensor),
        Box::new(transforms),
        slot,
        bus.clone(),
    )?;
    info!(
        camera_frame = %cfg.camera_frame,
        base_frame = %cfg.base_frame,
        period_ms = cfg.period_ms,
        "pipeline starting"
    );

    Ok(Services {
        pipeline: PipelineHandle::spawn(pipeline),
        intake,
        bridge,
    })
}

/// A malformed file is fatal; a missing one is created with defaults.
fn load_config() -> Config {
    match config::load() {
        Ok(Some(cfg)) => {
            println!(
                "  Config loaded from {}",
                config::config_path().display().to_string().bold()
            );
            cfg
        }
        Ok(None) => {
            let mut cfg = Config::default();
            match config::save(&cfg) {
                Ok(()) => println!(
                    "  {} Default config written to {}",
                    "✓".green().bold(),
                    config::config_path().display().to_string().bold()
                ),
                Err(e) => println!("{}: {}", "Error saving config".red(), e),
            }
            config::apply_env_overrides(&mut cfg);
            cfg
        }
        Err(e) => fatal(&ReachError::Startup(e)),
    }
}

fn fatal(e: &ReachError) -> ! {
    eprintln!("{} {}", "✗ Startup failed:".red().bold(), e);
    std::process::exit(1);
}

fn print_banner() {
    println!();
    println!("{}", r#"                 _       __                      __  "#.bold().cyan());
    println!("{}", r#"    ____  ____  (_)___  / /_________  ____ ______/ /_ "#.bold().cyan());
    println!("{}", r#"   / __ \/ __ \/ / __ \/ __/ ___/ _ \/ __ `/ ___/ __ \"#.bold().cyan());
    println!("{}", r#"  / /_/ / /_/ / / / / / /_/ /  /  __/ /_/ / /__/ / / /"#.bold().cyan());
    println!("{}", r#" / .___/\____/_/_/ /_/\__/_/   \___/\__,_/\___/_/ /_/ "#.bold().cyan());
    println!("{}", r#"/_/                                                   "#.bold().cyan());
    println!();
    println!(
        "  {} {}",
        "pointreach".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Pixel-to-base-frame reaching service");
    println!();
}
