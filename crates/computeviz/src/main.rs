mod cli;
mod paths;
mod report;
mod run;

use anyhow::Result;
use cli::Command;
use paths::AppPaths;

fn main() -> Result<()> {
    let cli = cli::parse();
    run::initialise_tracing();

    match cli.command {
        Some(Command::List) => run_list(&cli.run),
        Some(Command::Where) => run_where(&cli.run),
        None => run::run(cli.run),
    }
}

fn run_list(args: &cli::RunArgs) -> Result<()> {
    let paths = AppPaths::discover()?;
    let source = run::resolve_config_source(args.config.as_deref(), &paths);
    let config = run::load_config(&source)?;

    println!("Diagrams from {source}:");
    for name in config.names() {
        let Some(spec) = config.diagram(name) else {
            continue;
        };
        let marker = if name == run::DEFAULT_DIAGRAM { "*" } else { " " };
        println!(
            "{marker} {name:<12} {:<10} workgroups={} wave={} chunks={}",
            spec.kernel.as_str(),
            spec.workgroups,
            spec.wave_size,
            spec.num_chunks()
        );
    }
    Ok(())
}

fn run_where(args: &cli::RunArgs) -> Result<()> {
    let paths = AppPaths::discover()?;
    let config_file = paths.config_file();
    let state = if config_file.is_file() {
        "present"
    } else {
        "missing"
    };
    let source = run::resolve_config_source(args.config.as_deref(), &paths);

    println!("Configuration:");
    println!("  config dir:  {}", paths.config_dir().display());
    println!("  config file: {} ({state})", config_file.display());
    println!("  active:      {source}");
    Ok(())
}
