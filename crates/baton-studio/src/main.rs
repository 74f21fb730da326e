mod events;
mod producers;
mod studio;

use std::time::{Duration, Instant};

use anyhow::Result;
use baton_core::HandoffConfig;
use baton_engine::device::GpuInit;
use baton_engine::logging::{init_logging, LoggingConfig};
use baton_engine::window::{Runtime, RuntimeConfig};

use studio::{Studio, StudioOptions};

fn main() -> Result<()> {
    let debug = env_flag("BATON_DEBUG");
    init_logging(LoggingConfig {
        debug_logging: debug,
        ..Default::default()
    });

    println!();
    println!("  baton studio");
    println!("  S  stall / resume the scene     H  hide    V  show");
    println!("  R  reset recovery               D  dump diagnostics");
    println!("  Esc  quit");
    println!();

    let defaults = StudioOptions::default();
    let options = StudioOptions {
        config: HandoffConfig::default().with_debug_logging(debug),
        scene_ready_after: env_ms("BATON_SCENE_READY_MS").unwrap_or(defaults.scene_ready_after),
        stall_after: env_ms("BATON_SIMULATE_STALL"),
    };
    let studio = Studio::new(options, Instant::now())?;

    let runtime = RuntimeConfig {
        title: "baton studio".to_string(),
        frame_interval: env_ms("BATON_FRAME_INTERVAL_MS"),
        ..Default::default()
    };

    Runtime::run(runtime, GpuInit::default(), studio)
}

fn env_flag(name: &str) -> bool {
    std::env::var(name).is_ok_and(|v| !matches!(v.as_str(), "" | "0" | "false"))
}

/// Milliseconds from the environment. Unparseable values are ignored with a warning.
fn env_ms(name: &str) -> Option<Duration> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse::<u64>() {
        Ok(ms) => Some(Duration::from_millis(ms)),
        Err(_) => {
            log::warn!("{name}={raw:?} is not a number of milliseconds; ignored");
            None
        }
    }
}
