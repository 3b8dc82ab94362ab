use std::{
    fs::File,
    io::BufReader,
    path::{Path, PathBuf},
};

use anyhow::Context as _;
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "explicate", version)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Align narration clips with an already rendered video (requires `ffmpeg` on PATH).
    Sync(SyncArgs),
    /// Run the whole prompt-to-video pipeline from saved model responses.
    Run(RunArgs),
}

#[derive(Parser, Debug)]
struct SyncArgs {
    /// Rendered video.
    #[arg(long)]
    video: PathBuf,

    /// JSON array of `{"path": ..., "duration_seconds": ...}`, one entry per narration segment.
    #[arg(long)]
    segments: PathBuf,

    /// Output video path.
    #[arg(long)]
    out: PathBuf,

    /// How narration is attached (overrides the config file).
    #[arg(long, value_enum)]
    strategy: Option<StrategyChoice>,

    /// Pipeline config JSON.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Delete the narration files once the run is over.
    #[arg(long)]
    consume_audio: bool,
}

#[derive(Parser, Debug)]
struct RunArgs {
    /// What the video should explain.
    #[arg(long)]
    prompt: String,

    /// Saved script response (JSON, optionally inside a ```json fence).
    #[arg(long)]
    script: PathBuf,

    /// Saved animation program response.
    #[arg(long)]
    program: PathBuf,

    /// Output video path.
    #[arg(long)]
    out: PathBuf,

    /// How narration is attached (overrides the config file).
    #[arg(long, value_enum)]
    strategy: Option<StrategyChoice>,

    /// Pipeline config JSON.
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum StrategyChoice {
    PerSegment,
    WholeTrack,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.cmd {
        Command::Sync(args) => cmd_sync(args),
        Command::Run(args) => cmd_run(args),
    }
}

fn load_config(
    path: Option<&Path>,
    strategy: Option<StrategyChoice>,
) -> anyhow::Result<explicate::PipelineConfig> {
    let mut cfg = match path {
        Some(p) => explicate::PipelineConfig::load_json(p)?,
        None => explicate::PipelineConfig::default(),
    };
    if let Some(choice) = strategy {
        cfg.sync.strategy = match choice {
            StrategyChoice::PerSegment => explicate::ComposeStrategy::PerSegment,
            StrategyChoice::WholeTrack => explicate::ComposeStrategy::WholeTrack,
        };
    }
    cfg.validate()?;
    Ok(cfg)
}

fn read_segments_json(path: &Path) -> anyhow::Result<Vec<explicate::AudioSegment>> {
    let f = File::open(path).with_context(|| format!("open segments '{}'", path.display()))?;
    let r = BufReader::new(f);
    let segments: Vec<explicate::AudioSegment> =
        serde_json::from_reader(r).with_context(|| "parse segments JSON")?;
    Ok(segments)
}

fn deliver(artifact: &Path, out: &Path) -> anyhow::Result<()> {
    if let Some(parent) = out.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create output dir '{}'", parent.display()))?;
    }
    if std::fs::rename(artifact, out).is_err() {
        std::fs::copy(artifact, out)
            .with_context(|| format!("write output '{}'", out.display()))?;
        explicate::cleanup_paths([artifact]);
    }
    Ok(())
}

fn report(degradations: &[explicate::Degradation]) {
    for d in degradations {
        eprintln!("degraded: {d}");
    }
}

fn cmd_sync(args: SyncArgs) -> anyhow::Result<()> {
    let mut cfg = load_config(args.config.as_deref(), args.strategy)?;
    cfg.sync.consume_audio_sources = args.consume_audio;
    let segments = read_segments_json(&args.segments)?;

    let synchronizer = explicate::Synchronizer::new(cfg.sync);
    let (artifact, degradations) = synchronizer
        .synchronize(&args.video, &segments)
        .into_result()?;

    deliver(&artifact.path, &args.out)?;
    report(&degradations);
    eprintln!("wrote {}", args.out.display());
    Ok(())
}

fn cmd_run(args: RunArgs) -> anyhow::Result<()> {
    let cfg = load_config(args.config.as_deref(), args.strategy)?;
    let pipeline = explicate::Pipeline::new(
        cfg.clone(),
        Box::new(explicate::ScriptFile::new(&args.script)),
        Box::new(explicate::ProgramFile::new(&args.program)),
        Box::new(explicate::CommandVoice::new(cfg.voice.clone())),
        Box::new(explicate::CommandRenderer::new(cfg.render.clone())),
    );

    let output = pipeline.run(&args.prompt, &mut explicate::LogProgress)?;
    deliver(&output.video, &args.out)?;
    report(&output.degradations);
    eprintln!(
        "wrote {} (suggested name: {})",
        args.out.display(),
        output.download_name()
    );
    Ok(())
}
