use std::{path::PathBuf, time::Duration};

use anyhow::Context as _;
use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser, Debug)]
#[command(name = "slime", version)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run full-screen on a framebuffer until interrupted.
    Run(RunArgs),
    /// Run headless and save the last frame as a PNG.
    Snapshot(SnapshotArgs),
    /// Print the default simulation parameters as JSON.
    PrintConfig,
}

#[derive(Parser, Debug)]
struct SimArgs {
    /// Engine to simulate with.
    #[arg(long, value_enum, default_value_t = EngineChoice::Cpu)]
    engine: EngineChoice,

    /// Simulation parameters JSON; missing fields take their defaults.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the number of agents.
    #[arg(long)]
    agents: Option<usize>,

    /// RNG seed. Random when omitted.
    #[arg(long)]
    seed: Option<u64>,

    /// Upper bound for one GPU completion wait, in milliseconds.
    #[arg(long, default_value_t = 5000)]
    fence_timeout_ms: u64,
}

#[derive(Parser, Debug)]
struct RunArgs {
    /// Output index: 0 picks the first usable framebuffer, N >= 1 picks /dev/fb(N-1).
    #[arg(long, default_value_t = 0)]
    output: usize,

    #[command(flatten)]
    sim: SimArgs,

    /// Stop after this many frames instead of running until SIGINT/SIGTERM.
    #[arg(long)]
    frames: Option<u64>,

    /// Upper bound for one vblank wait, in milliseconds.
    #[arg(long, default_value_t = 250)]
    vsync_timeout_ms: u64,

    /// Do not print the per-frame timing line.
    #[arg(long)]
    no_timing: bool,
}

#[derive(Parser, Debug)]
struct SnapshotArgs {
    /// Output PNG path.
    #[arg(long)]
    out: PathBuf,

    #[arg(long, default_value_t = 320)]
    width: u32,

    #[arg(long, default_value_t = 240)]
    height: u32,

    /// Frames to simulate before saving.
    #[arg(long, default_value_t = 120)]
    frames: u64,

    /// Also save every N-th presented frame into this directory.
    #[arg(long)]
    frames_dir: Option<PathBuf>,

    #[arg(long, default_value_t = 10, requires = "frames_dir")]
    every: u64,

    #[command(flatten)]
    sim: SimArgs,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum EngineChoice {
    Cpu,
    #[cfg(feature = "gpu")]
    Gpu,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.cmd {
        Command::Run(args) => cmd_run(args),
        Command::Snapshot(args) => cmd_snapshot(args),
        Command::PrintConfig => {
            println!("{}", slime::SimulationParams::default().to_json_pretty()?);
            Ok(())
        }
    }
}

fn load_params(sim: &SimArgs) -> anyhow::Result<slime::SimulationParams> {
    let mut params = match &sim.config {
        Some(path) => slime::SimulationParams::from_json_path(path)
            .with_context(|| format!("load config '{}'", path.display()))?,
        None => slime::SimulationParams::default(),
    };
    if let Some(n) = sim.agents {
        params.agent_count = n;
    }
    Ok(params)
}

fn make_engine(
    sim: &SimArgs,
    size: slime::GridSize,
) -> anyhow::Result<Box<dyn slime::SimulationEngine>> {
    let kind = match sim.engine {
        EngineChoice::Cpu => slime::EngineKind::Cpu,
        #[cfg(feature = "gpu")]
        EngineChoice::Gpu => slime::EngineKind::Gpu,
    };
    let seed = sim.seed.unwrap_or_else(rand::random);
    let mut settings = slime::EngineSettings::new(size, load_params(sim)?, seed);
    settings.fence_timeout = Duration::from_millis(sim.fence_timeout_ms);
    Ok(slime::create_engine(kind, &settings)?)
}

#[cfg(target_os = "linux")]
fn cmd_run(args: RunArgs) -> anyhow::Result<()> {
    let opts = slime::PresentOpts {
        vsync_timeout: Duration::from_millis(args.vsync_timeout_ms),
    };
    let shutdown = slime::ShutdownSignal::install()?;

    let display = slime::acquire_display(args.output)?;
    let size = display.size;
    tracing::info!(width = size.width, height = size.height, "chosen mode");
    let presenter = slime::FbdevPresenter::new(display, opts)?;
    let engine = make_engine(&args.sim, size)?;
    let mut driver = slime::FrameDriver::new(engine, Box::new(presenter), opts)?;

    let stats = driver.run(&shutdown, args.frames, |t| {
        if !args.no_timing {
            println!("{} microseconds this frame", t.compose.as_micros());
        }
    })?;
    tracing::info!(
        frames = stats.frames,
        mean_compose_us = stats.mean_compose().as_micros() as u64,
        max_compose_us = stats.max_compose.as_micros() as u64,
        "run finished"
    );
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn cmd_run(_args: RunArgs) -> anyhow::Result<()> {
    anyhow::bail!("full-screen output needs a Linux framebuffer; use `slime snapshot` instead")
}

fn cmd_snapshot(args: SnapshotArgs) -> anyhow::Result<()> {
    let size = slime::GridSize::new(args.width, args.height)?;
    let engine = make_engine(&args.sim, size)?;
    let presenter: Box<dyn slime::PresentationBackend> = match &args.frames_dir {
        Some(dir) => Box::new(slime::PngPresenter::new(size, dir, args.every)?),
        None => Box::new(slime::HeadlessPresenter::new(size)),
    };
    let mut driver = slime::FrameDriver::new(engine, presenter, slime::PresentOpts::default())?;

    for _ in 0..args.frames {
        driver.run_frame()?;
    }

    if let Some(parent) = args.out.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create output dir '{}'", parent.display()))?;
    }
    {
        let surfaces = driver.presenter_mut().surfaces();
        slime::write_png(&args.out, &surfaces.front)
            .with_context(|| format!("write png '{}'", args.out.display()))?;
    }
    driver.teardown()?;

    eprintln!("wrote {}", args.out.display());
    Ok(())
}
