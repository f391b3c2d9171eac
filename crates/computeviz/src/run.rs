use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use diagramconfig::DiagramConfig;
use histogram::ComputeDiagram;
use tracing_subscriber::EnvFilter;

use crate::cli::RunArgs;
use crate::paths::AppPaths;
use crate::report::Report;

pub const DEFAULT_DIAGRAM: &str = "noRace";

/// Where the active diagram configuration came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    Flag(PathBuf),
    ConfigDir(PathBuf),
    Builtin,
}

impl fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigSource::Flag(path) | ConfigSource::ConfigDir(path) => {
                write!(f, "{}", path.display())
            }
            ConfigSource::Builtin => f.write_str("built-in diagrams"),
        }
    }
}

pub fn resolve_config_source(flag: Option<&Path>, paths: &AppPaths) -> ConfigSource {
    if let Some(path) = flag {
        return ConfigSource::Flag(path.to_path_buf());
    }
    let candidate = paths.config_file();
    if candidate.is_file() {
        ConfigSource::ConfigDir(candidate)
    } else {
        ConfigSource::Builtin
    }
}

pub fn load_config(source: &ConfigSource) -> Result<DiagramConfig> {
    match source {
        ConfigSource::Flag(path) | ConfigSource::ConfigDir(path) => DiagramConfig::load(path)
            .with_context(|| format!("failed to load diagram config from {}", path.display())),
        ConfigSource::Builtin => Ok(DiagramConfig::builtin()),
    }
}

pub fn run(args: RunArgs) -> Result<()> {
    let paths = AppPaths::discover()?;
    let source = resolve_config_source(args.config.as_deref(), &paths);
    let mut config = load_config(&source)?;
    if let Some(speed) = args.speed {
        config.playback.speed = speed;
    }

    let name = args.diagram.as_deref().unwrap_or(DEFAULT_DIAGRAM);
    let mut diagram = ComputeDiagram::from_config(&config, name)
        .with_context(|| format!("failed to build diagram '{name}'"))?;
    tracing::info!(
        diagram = name,
        kernel = %diagram.kernel(),
        config = %source,
        "playing diagram"
    );

    let frames = match args.seek {
        Some(step) => diagram
            .seek(step, args.max_frames)
            .with_context(|| format!("failed to seek diagram '{name}' to step {step}"))?,
        None => {
            let dt = frame_delta(args.fps, config.playback.frame_interval);
            tracing::debug!(dt_ms = dt.as_secs_f64() * 1000.0, "simulated frame delta");
            diagram
                .run_to_completion(dt, args.max_frames)
                .with_context(|| format!("diagram '{name}' did not finish"))?
        }
    };

    if diagram.is_complete() {
        tracing::info!(frames, steps = diagram.step_count(), "diagram complete");
    } else {
        tracing::info!(frames, steps = diagram.step_count(), "diagram paused");
    }

    let report = Report::new(&diagram, frames, args.events);
    if args.json {
        let json = serde_json::to_string_pretty(&report).context("failed to encode report")?;
        println!("{json}");
    } else {
        print!("{report}");
    }
    Ok(())
}

fn frame_delta(fps: Option<f32>, frame_interval: Duration) -> Duration {
    match fps {
        Some(fps) => Duration::from_secs_f32(1.0 / fps),
        None => frame_interval,
    }
}

pub fn initialise_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
