use std::{
    fs,
    io::{self, Write},
    path::PathBuf,
};

use anyhow::{Context, Result};
use clap::Parser;
use cleave::{Compilation, Config, manifest::GraphManifest};
use env_logger::Env;
use log::{debug, info};

/// Split a built module graph into chunks
#[derive(Parser, Debug)]
#[command(name = "cleave", version, about)]
struct Cli {
    /// Module graph manifest (TOML)
    #[arg(short, long)]
    graph: PathBuf,

    /// Configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Write the report here instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Increase verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(level)).init();

    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    debug!("Using configuration: {config:?}");

    let graph = GraphManifest::load(&cli.graph)?
        .into_module_graph()
        .context("Failed to assemble module graph")?;
    info!("Loaded {} modules from {}", graph.len(), cli.graph.display());

    let output = Compilation::new(config)?
        .run(&graph)
        .context("Build failed")?;
    let report = output.report(&graph).to_toml()?;

    match &cli.output {
        Some(path) => fs::write(path, report)
            .with_context(|| format!("Failed to write report: {}", path.display()))?,
        None => io::stdout()
            .lock()
            .write_all(report.as_bytes())
            .context("Failed to write report to stdout")?,
    }
    Ok(())
}
