use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use lumiere_renderer::{FillMode, Stage};

#[derive(Parser, Debug)]
#[command(
    name = "lumiere",
    author,
    version,
    about = "Shader uniform introspection and streamed texture uploads"
)]
pub struct Cli {
    /// Configuration file (defaults to `lumiere.toml` in the config directory).
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Compile a shader stage and list the uniforms it declares.
    Uniforms(UniformsArgs),
    /// Stream an image through a double-buffered texture and report counters.
    Stream(StreamArgs),
}

#[derive(Args, Debug)]
pub struct UniformsArgs {
    /// GLSL source file.
    #[arg(value_name = "FILE")]
    pub file: PathBuf,

    /// Stage the file is compiled as.
    #[arg(long, value_name = "STAGE", value_parser = parse_stage, default_value = "fragment")]
    pub stage: Stage,

    /// Built-in fill mode providing the other stages (overrides the config).
    #[arg(long, value_name = "MODE", value_parser = parse_fill)]
    pub fill: Option<FillMode>,

    /// Print the uniforms as JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct StreamArgs {
    /// Image to stream; a generated gradient is used when omitted.
    #[arg(long, value_name = "PATH")]
    pub image: Option<PathBuf>,

    /// Size of the generated gradient (e.g. `640x360`).
    #[arg(long, value_name = "WIDTHxHEIGHT", value_parser = parse_size, default_value = "256x256")]
    pub size: (u32, u32),

    /// Number of frames to push through the stream.
    #[arg(long, value_name = "N", default_value_t = 8)]
    pub frames: u32,

    /// Worker threads for background copies (overrides the config).
    #[arg(long, value_name = "N")]
    pub workers: Option<usize>,

    /// Sample the texture with nearest filtering.
    #[arg(long)]
    pub no_filtering: bool,

    /// Print the counters as JSON.
    #[arg(long)]
    pub json: bool,
}

pub fn parse() -> Cli {
    Cli::parse()
}

pub fn parse_stage(value: &str) -> Result<Stage, String> {
    value
        .trim()
        .to_ascii_lowercase()
        .parse::<Stage>()
        .map_err(|err| format!("{err}; expected vertex, geometry or fragment"))
}

pub fn parse_fill(value: &str) -> Result<FillMode, String> {
    value
        .trim()
        .to_ascii_lowercase()
        .parse::<FillMode>()
        .map_err(|err| format!("{err}; expected texture, color, uv, wireframe or window"))
}

pub fn parse_size(value: &str) -> Result<(u32, u32), String> {
    let (w, h) = value
        .split_once(['x', 'X'])
        .ok_or_else(|| "expected WIDTHxHEIGHT".to_string())?;
    let width = w
        .trim()
        .parse::<u32>()
        .map_err(|_| format!("invalid width '{}'", w.trim()))?;
    let height = h
        .trim()
        .parse::<u32>()
        .map_err(|_| format!("invalid height '{}'", h.trim()))?;
    if width == 0 || height == 0 {
        return Err("size must be greater than zero".into());
    }
    Ok((width, height))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_sizes() {
        assert_eq!(parse_size("640x360").unwrap(), (640, 360));
        assert_eq!(parse_size(" 2 X 3").unwrap(), (2, 3));
        assert!(parse_size("0x10").is_err());
        assert!(parse_size("640").is_err());
    }

    #[test]
    fn parses_stage_and_fill_names() {
        assert_eq!(parse_stage("Geometry").unwrap(), Stage::Geometry);
        assert_eq!(parse_fill("wireframe").unwrap(), FillMode::Wireframe);
        assert!(parse_fill("plasma").is_err());
    }

    #[test]
    fn global_config_flag_follows_subcommand() {
        let cli = Cli::try_parse_from([
            "lumiere",
            "stream",
            "--frames",
            "3",
            "--config",
            "custom.toml",
        ])
        .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("custom.toml")));
        match cli.command {
            Command::Stream(args) => {
                assert_eq!(args.frames, 3);
                assert_eq!(args.size, (256, 256));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
