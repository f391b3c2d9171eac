use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "computeviz",
    author,
    version,
    about = "Step through compute shader histogram diagrams",
    arg_required_else_help = false
)]
pub struct Cli {
    #[command(flatten)]
    pub run: RunArgs,
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Diagram to play (see `computeviz list`); defaults to `noRace`.
    #[arg(value_name = "DIAGRAM")]
    pub diagram: Option<String>,

    /// Diagram configuration TOML file; overrides the config directory lookup.
    #[arg(long, value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    /// Playback speed multiplier applied to every tween.
    #[arg(long, value_name = "MULTIPLIER", value_parser = parse_speed)]
    pub speed: Option<f32>,

    /// Simulated frame rate; defaults to the configured frame interval.
    #[arg(long, value_name = "FPS", value_parser = parse_fps)]
    pub fps: Option<f32>,

    /// Give up after this many frames.
    #[arg(long, value_name = "FRAMES", default_value_t = 1_000_000)]
    pub max_frames: usize,

    /// Fast-forward until the step counter passes STEP instead of playing to the end.
    #[arg(long, value_name = "STEP")]
    pub seek: Option<u64>,

    /// Print every recorded diagram event.
    #[arg(long)]
    pub events: bool,

    /// Print the report as JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List the available diagrams and their kernels.
    List,
    /// Print the resolved configuration paths.
    Where,
}

pub fn parse() -> Cli {
    Cli::parse()
}

pub fn parse_speed(value: &str) -> Result<f32, String> {
    let speed: f32 = value
        .trim()
        .parse()
        .map_err(|_| format!("invalid speed '{value}'; expected a number such as 0.5 or 2"))?;
    if !speed.is_finite() || speed <= 0.0 {
        return Err(format!("speed must be positive, got {speed}"));
    }
    Ok(speed)
}

pub fn parse_fps(value: &str) -> Result<f32, String> {
    let fps: f32 = value
        .trim()
        .parse()
        .map_err(|_| format!("invalid frame rate '{value}'"))?;
    if !fps.is_finite() || fps <= 0.0 {
        return Err(format!("frame rate must be positive, got {fps}"));
    }
    Ok(fps)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_speed_and_fps() {
        assert_eq!(parse_speed("2").unwrap(), 2.0);
        assert_eq!(parse_speed(" 0.25 ").unwrap(), 0.25);
        assert!(parse_speed("0").is_err());
        assert!(parse_speed("fast").is_err());
        assert_eq!(parse_fps("60").unwrap(), 60.0);
        assert!(parse_fps("-1").is_err());
    }

    #[test]
    fn subcommands_win_over_the_diagram_argument() {
        let cli = Cli::try_parse_from(["computeviz", "list"]).unwrap();
        assert!(matches!(cli.command, Some(Command::List)));

        let cli = Cli::try_parse_from(["computeviz", "race", "--json", "--seek", "12"]).unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.run.diagram.as_deref(), Some("race"));
        assert_eq!(cli.run.seek, Some(12));
        assert!(cli.run.json);
    }
}
