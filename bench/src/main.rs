use std::time::{Duration, Instant};

use anyhow::Context as _;
use serde_json::json;

#[derive(Clone, Debug)]
struct BenchArgs {
    width: u32,
    height: u32,
    agents: usize,
    frames: u64,
    warmup: u64,
    repeats: u32,
    seed: u64,
    engine: Engine,
    json: bool,
}

#[derive(Clone, Copy, Debug)]
enum Engine {
    Cpu,
    #[cfg(feature = "gpu")]
    Gpu,
}

#[derive(Clone, Debug, Default)]
struct RunMetrics {
    setup: Duration,
    diffuse_mean: Duration,
    agents_mean: Duration,
    publish_mean: Duration,
    compose_mean: Duration,
    compose_max: Duration,
    wall_total: Duration,
}

fn main() {
    if let Err(err) = try_main() {
        eprintln!("{err:#}");
        std::process::exit(1);
    }
}

fn try_main() -> anyhow::Result<()> {
    let args = parse_args()?;

    if args.width < 2 || args.height < 2 {
        anyhow::bail!("--width/--height must be >= 2");
    }
    if args.agents == 0 || args.frames == 0 || args.repeats == 0 {
        anyhow::bail!("--agents, --frames and --repeats must be > 0");
    }

    eprintln!(
        "bench: {repeats} run(s) ({profile} build), {frames} frames/run at {w}x{h}, {agents} agents, engine={engine:?}",
        repeats = args.repeats,
        profile = if cfg!(debug_assertions) {
            "debug"
        } else {
            "release"
        },
        frames = args.frames,
        w = args.width,
        h = args.height,
        agents = args.agents,
        engine = args.engine,
    );

    let mut runs = Vec::<RunMetrics>::with_capacity(args.repeats as usize);
    for i in 0..args.repeats {
        runs.push(run_once(&args, args.seed.wrapping_add(u64::from(i)))?);
    }

    report_percentiles(&runs);
    if args.json {
        println!("{}", summary_json(&args, &runs));
    }
    Ok(())
}

fn parse_args() -> anyhow::Result<BenchArgs> {
    let mut args = std::env::args().skip(1);

    let mut out = BenchArgs {
        width: 640,
        height: 360,
        agents: 10_000,
        frames: 300,
        warmup: 10,
        repeats: 10,
        seed: 1,
        engine: Engine::Cpu,
        json: false,
    };

    while let Some(a) = args.next() {
        match a.as_str() {
            "--width" => out.width = parse_num(args.next(), "--width")?,
            "--height" => out.height = parse_num(args.next(), "--height")?,
            "--agents" => out.agents = parse_num(args.next(), "--agents")?,
            "--frames" => out.frames = parse_num(args.next(), "--frames")?,
            "--warmup" => out.warmup = parse_num(args.next(), "--warmup")?,
            "--repeats" => out.repeats = parse_num(args.next(), "--repeats")?,
            "--seed" => out.seed = parse_num(args.next(), "--seed")?,
            "--engine" => {
                let v = args
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("missing value for --engine (cpu|gpu)"))?;
                out.engine = match v.as_str() {
                    "cpu" => Engine::Cpu,
                    #[cfg(feature = "gpu")]
                    "gpu" => Engine::Gpu,
                    _ => anyhow::bail!("unknown --engine '{v}' (expected cpu or gpu)"),
                };
            }
            "--json" => out.json = true,
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            _ => anyhow::bail!("unknown arg '{a}' (try --help)"),
        }
    }

    Ok(out)
}

fn print_help() {
    eprintln!(
        r#"slime-bench

Runs the headless simulation repeatedly and reports p50/p90/p99 for each stage.

Usage:
  cargo run -q --release
  cargo run -q --release -- --agents 100000 --frames 600
  cargo run -q --release --features gpu -- --engine gpu

Args:
  --width N      (default 640)
  --height N     (default 360)
  --agents N     (default 10000)
  --frames N     (default 300)
  --warmup N     frames run before timing starts (default 10)
  --repeats N    (default 10)
  --seed N       seed of the first run; later runs add their index (default 1)
  --engine cpu|gpu (default cpu; gpu needs the `gpu` feature)
  --json         print a JSON summary on stdout
"#
    );
}

fn parse_num<T>(v: Option<String>, flag: &str) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let v = v.ok_or_else(|| anyhow::anyhow!("missing value for {flag}"))?;
    v.parse::<T>()
        .with_context(|| format!("parse {flag} value '{v}'"))
}

fn run_once(args: &BenchArgs, seed: u64) -> anyhow::Result<RunMetrics> {
    let wall = Instant::now();
    let size = slime::GridSize::new(args.width, args.height)?;
    let params = slime::SimulationParams {
        agent_count: args.agents,
        ..slime::SimulationParams::default()
    };
    let kind = match args.engine {
        Engine::Cpu => slime::EngineKind::Cpu,
        #[cfg(feature = "gpu")]
        Engine::Gpu => slime::EngineKind::Gpu,
    };
    let mut engine =
        slime::create_engine(kind, &slime::EngineSettings::new(size, params, seed))?;
    let mut presenter = slime::HeadlessPresenter::new(size);
    let setup = wall.elapsed();

    for _ in 0..args.warmup {
        step(engine.as_mut(), &mut presenter)?;
    }

    let mut totals = [Duration::ZERO; 3];
    let mut compose_max = Duration::ZERO;
    for _ in 0..args.frames {
        let stages = step(engine.as_mut(), &mut presenter)?;
        for (t, s) in totals.iter_mut().zip(stages) {
            *t += s;
        }
        compose_max = compose_max.max(stages.iter().sum());
    }
    engine.teardown()?;

    let n = args.frames as u32;
    Ok(RunMetrics {
        setup,
        diffuse_mean: totals[0] / n,
        agents_mean: totals[1] / n,
        publish_mean: totals[2] / n,
        compose_mean: totals.iter().sum::<Duration>() / n,
        compose_max,
        wall_total: wall.elapsed(),
    })
}

/// One frame through the same steps the frame driver runs, timed per stage.
fn step(
    engine: &mut dyn slime::SimulationEngine,
    presenter: &mut slime::HeadlessPresenter,
) -> anyhow::Result<[Duration; 3]> {
    use slime::PresentationBackend as _;

    engine.swap_buffers();
    let t0 = Instant::now();
    engine.diffuse()?;
    let t1 = Instant::now();
    engine.move_agents()?;
    let t2 = Instant::now();
    engine.publish(&mut presenter.surfaces().back)?;
    let t3 = Instant::now();
    presenter.present_and_flip()?;
    Ok([t1 - t0, t2 - t1, t3 - t2])
}

type Getter = fn(&RunMetrics) -> Duration;

const FIELDS: &[(&str, Getter)] = &[
    ("setup", |m| m.setup),
    ("diffuse_mean", |m| m.diffuse_mean),
    ("agents_mean", |m| m.agents_mean),
    ("publish_mean", |m| m.publish_mean),
    ("compose_mean", |m| m.compose_mean),
    ("compose_max", |m| m.compose_max),
    ("wall_total", |m| m.wall_total),
];

fn collect(runs: &[RunMetrics], f: Getter) -> Vec<Duration> {
    let mut v = runs.iter().map(f).collect::<Vec<_>>();
    v.sort_by_key(|d| d.as_nanos());
    v
}

fn p(v: &[Duration], p: f64) -> Duration {
    if v.is_empty() {
        return Duration::ZERO;
    }
    let n = v.len();
    let rank = (p * (n as f64)).ceil().clamp(1.0, n as f64) as usize;
    v[rank - 1]
}

fn fmt_ms(d: Duration) -> String {
    format!("{:.3}ms", d.as_secs_f64() * 1000.0)
}

fn report_percentiles(runs: &[RunMetrics]) {
    eprintln!("\npercentiles across runs (p50/p90/p99):");
    for (name, getter) in FIELDS {
        let v = collect(runs, *getter);
        eprintln!(
            "  {name:14} p50={p50:>10}  p90={p90:>10}  p99={p99:>10}",
            name = *name,
            p50 = fmt_ms(p(&v, 0.50)),
            p90 = fmt_ms(p(&v, 0.90)),
            p99 = fmt_ms(p(&v, 0.99))
        );
    }
}

fn summary_json(args: &BenchArgs, runs: &[RunMetrics]) -> serde_json::Value {
    let stages: serde_json::Map<String, serde_json::Value> = FIELDS
        .iter()
        .map(|(name, getter)| {
            let v = collect(runs, *getter);
            let micros = |d: Duration| d.as_micros() as u64;
            (
                (*name).to_string(),
                json!({
                    "p50_us": micros(p(&v, 0.50)),
                    "p90_us": micros(p(&v, 0.90)),
                    "p99_us": micros(p(&v, 0.99)),
                }),
            )
        })
        .collect();
    json!({
        "engine": format!("{:?}", args.engine),
        "width": args.width,
        "height": args.height,
        "agents": args.agents,
        "frames": args.frames,
        "repeats": args.repeats,
        "stages": stages,
    })
}
