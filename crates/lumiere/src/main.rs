mod bindings;
mod cli;
mod paths;
mod run;

use anyhow::Result;
use cli::Command;

fn main() -> Result<()> {
    let cli = cli::parse();
    run::initialise_tracing();
    let config = run::load_config(cli.config.as_deref())?;

    match cli.command {
        Command::Uniforms(args) => run::run_uniforms(&config, args),
        Command::Stream(args) => run::run_stream(&config, args),
    }
}
