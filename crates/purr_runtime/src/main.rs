//! Purr Engine Runtime
//!
//! Boots the script bridge, loads the scripts named in the settings file
//! and drives a fixed number of frames.
//!
//! Usage: `purr [settings.json]`

mod behaviours;
mod settings;

use anyhow::{Context, Result};
use purr_core::ecs::{Entity, World};
use purr_core::time::SimulationTime;
use purr_script::{register_builtins, CallTable, JsModule, ScriptHost};
use settings::RuntimeSettings;
use std::path::PathBuf;

const DEMO_SCRIPT: &str = include_str!("../scripts/player.js");

fn main() -> Result<()> {
    let settings = match std::env::args_os().nth(1) {
        Some(path) => RuntimeSettings::load(&PathBuf::from(path))?,
        None => RuntimeSettings::default(),
    };

    tracing_subscriber::fmt().with_max_level(settings.level()).init();
    tracing::info!("Purr Engine v{}", purr_core::VERSION);

    // Registration must finish before any script runs.
    let mut builder = CallTable::builder();
    register_builtins(&mut builder).context("registering internal calls")?;
    let mut host = ScriptHost::new(builder.seal(), World::new());

    host.load_module(Box::new(behaviours::module()))?;
    let mut scripts = match &settings.script_path {
        Some(path) => JsModule::from_file(path)?,
        None => JsModule::from_source("player", DEMO_SCRIPT)?,
    };
    if let Some(bytes) = settings.memory_limit_bytes {
        scripts = scripts.with_memory_limit(bytes);
    }
    host.load_module(Box::new(scripts))?;
    tracing::info!(modules = ?host.module_names().collect::<Vec<_>>(), "script modules ready");

    for entry in &settings.entities {
        let entity = host.spawn(entry.name.as_str(), entry.position);
        for class in &entry.scripts {
            if let Err(err) = host.attach(entity, class) {
                tracing::warn!(%entity, class, error = %err, "could not attach script");
            }
        }
    }

    let mut time = SimulationTime::with_tick_rate(settings.tick_rate_hz);
    let mut failures = 0;
    for _ in 0..settings.frames {
        let report = host.update(time.delta_seconds());
        failures += report.failures;
        time.advance_tick();
    }
    tracing::info!(
        frames = time.tick_count(),
        simulated = ?time.total_time(),
        failures,
        "simulation finished"
    );

    let entities: Vec<Entity> = host.world().iter().map(|(entity, _)| entity).collect();
    for entity in entities {
        if let Some(data) = host.world().get(entity) {
            tracing::info!(%entity, name = %data.name, position = ?data.position, "final state");
        }
        host.despawn(entity);
    }
    host.shutdown();

    Ok(())
}
