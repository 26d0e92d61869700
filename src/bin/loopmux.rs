use std::path::PathBuf;

use anyhow::Context as _;
use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "loopmux", version)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Render one output per audio file (requires `ffmpeg` on PATH).
    Render(RenderArgs),
    /// Print the reconciled duration plan and timeline as JSON.
    Plan(PlanArgs),
}

#[derive(Parser, Debug)]
struct RenderArgs {
    /// Profile TOML.
    #[arg(long)]
    config: PathBuf,

    /// Restrict the run to these audio files (stem or file name, repeatable).
    #[arg(long)]
    only: Vec<String>,

    /// Regenerate backgrounds even when the cached fingerprint matches.
    #[arg(long)]
    force: bool,

    /// Re-encode finished outputs at the configured quality settings.
    #[arg(long)]
    compress: bool,

    /// Worker cap (defaults to the number of cores).
    #[arg(long)]
    jobs: Option<usize>,

    /// Fix the background shuffle for reproducible assignment.
    #[arg(long)]
    seed: Option<u64>,

    /// Log each file's computed timeline as JSON.
    #[arg(long)]
    dump_timeline: bool,
}

#[derive(Parser, Debug)]
struct PlanArgs {
    /// Profile TOML.
    #[arg(long)]
    config: PathBuf,

    /// Base clip duration to plan against, in seconds.
    #[arg(long)]
    base_duration: f64,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.cmd {
        Command::Render(args) => cmd_render(args),
        Command::Plan(args) => cmd_plan(args),
    }
}

fn cmd_render(args: RenderArgs) -> anyhow::Result<()> {
    let profile = loopmux::Profile::load(&args.config)
        .with_context(|| format!("load profile '{}'", args.config.display()))?;

    let engine = loopmux::FfmpegEngine::new()?;
    let options = loopmux::RenderOptions {
        force: args.force,
        compress: args.compress,
        jobs: args.jobs,
        seed: args.seed,
        only: args.only,
        dump_timeline: args.dump_timeline,
    };

    let summary = loopmux::pipeline::run(&profile, &engine, &options)?;
    println!(
        "completed {} (backgrounds reused {}), skipped {}, failed {}",
        summary.completed,
        summary.reused_backgrounds,
        summary.skipped,
        summary.failures.len()
    );
    for failure in &summary.failures {
        eprintln!("  {}: {}", failure.audio, failure.error);
    }

    if summary.all_ok() {
        Ok(())
    } else {
        std::process::exit(1);
    }
}

fn cmd_plan(args: PlanArgs) -> anyhow::Result<()> {
    let profile = loopmux::Profile::load(&args.config)
        .with_context(|| format!("load profile '{}'", args.config.display()))?;
    let json = loopmux::pipeline::plan_json(&profile, args.base_duration)?;
    println!("{json}");
    Ok(())
}
