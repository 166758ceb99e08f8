use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use frameforge::{
    ChartRenderer, FaultPlan, PoolOptions, ProcessBackend, ProgressInfo, RenderConfig, RenderPool,
    RunOutcome, ThreadBackend, Timeline, TimelineSpecGenerator, VideoCodec, VideoSettings,
    assemble_video, run_worker,
};

#[derive(Parser, Debug)]
#[command(name = "frameforge", version)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Render a timeline into per-frame PNGs (and optionally an MP4).
    Render(RenderArgs),
    /// Generate a synthetic timeline JSON for smoke-testing.
    TimelineStub(StubArgs),
    /// Internal worker mode: NDJSON task loop over stdin/stdout.
    #[command(hide = true)]
    Worker,
}

#[derive(Parser, Debug)]
struct RenderArgs {
    /// Input timeline JSON.
    #[arg(long)]
    timeline: PathBuf,

    /// Directory frame PNGs are written into.
    #[arg(long)]
    out_dir: PathBuf,

    #[arg(long, default_value_t = 1280)]
    width: u32,

    #[arg(long, default_value_t = 720)]
    height: u32,

    /// Trusted root for thumbnail assets referenced by the timeline.
    #[arg(long)]
    art_root: Option<PathBuf>,

    /// Worker process count. Defaults to available parallelism.
    #[arg(long)]
    workers: Option<usize>,

    /// In-flight cap multiplier (cap = workers * multiplier).
    #[arg(long, default_value_t = 2)]
    backpressure: usize,

    /// Total attempts allowed for a transiently failing frame.
    #[arg(long, default_value_t = 3)]
    max_retries: u32,

    /// Worker failures within the breaker window that abort the run.
    #[arg(long, default_value_t = 3)]
    breaker_threshold: u32,

    /// Circuit breaker sliding window, in seconds.
    #[arg(long, default_value_t = 60)]
    breaker_window: u64,

    /// Retire each worker after this many tasks.
    #[arg(long, default_value_t = 1000)]
    max_tasks_per_worker: u32,

    /// Grace period (seconds) for in-flight work on cancellation or abort.
    #[arg(long, default_value_t = 5)]
    grace: u64,

    /// Treat this many seconds without a completion as stalled workers.
    #[arg(long, default_value_t = 120)]
    stall_timeout: u64,

    /// Assemble completed frames into an MP4 at this path (requires `ffmpeg`
    /// on PATH).
    #[arg(long)]
    mp4: Option<PathBuf>,

    /// Output video frame rate.
    #[arg(long, default_value_t = 30)]
    fps: u32,

    /// Constant-quality factor for the video encoder.
    #[arg(long, default_value_t = 20)]
    crf: u32,

    #[arg(long, value_enum, default_value_t = CodecChoice::H264)]
    codec: CodecChoice,

    /// Write the full run report (per-frame records + stats) as JSON.
    #[arg(long)]
    report: Option<PathBuf>,

    /// Run workers as in-process threads instead of child processes.
    /// Crash containment requires process workers; this mode is for
    /// debugging and constrained environments.
    #[arg(long)]
    serial: bool,

    /// Scripted fault plan JSON forwarded to every worker.
    #[arg(long, hide = true)]
    fault_plan: Option<PathBuf>,
}

#[derive(Parser, Debug)]
struct StubArgs {
    #[arg(long, default_value_t = 12)]
    steps: usize,

    #[arg(long, default_value_t = 8)]
    entities: usize,

    /// Interpolated frames per timeline step.
    #[arg(long, default_value_t = 10)]
    frames_per_step: u32,

    /// Output timeline JSON path.
    #[arg(short, long)]
    out: PathBuf,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum CodecChoice {
    H264,
    Vp9,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Worker processes skip subscriber setup chatter: their stderr is relayed
    // line-by-line into the parent's log stream.
    let filter = EnvFilter::try_from_env("FRAMEFORGE_LOG")
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.cmd {
        Command::Render(args) => cmd_render(args),
        Command::TimelineStub(args) => cmd_timeline_stub(args),
        Command::Worker => {
            let stdin = std::io::stdin().lock();
            let stdout = std::io::stdout().lock();
            run_worker(stdin, stdout)?;
            Ok(())
        }
    }
}

fn cmd_render(args: RenderArgs) -> anyhow::Result<()> {
    let timeline = Timeline::load(&args.timeline)
        .with_context(|| format!("load timeline '{}'", args.timeline.display()))?;

    let mut config = RenderConfig::new(&args.out_dir, args.width, args.height);
    if let Some(art_root) = &args.art_root {
        config = config.with_art_root(art_root);
    }
    config.validate()?;

    let mut source = TimelineSpecGenerator::new(timeline, config.max_bars)?;

    let mut opts = PoolOptions::default();
    if let Some(workers) = args.workers {
        opts.workers = workers;
    }
    opts.backpressure_multiplier = args.backpressure;
    opts.max_retries_transient = args.max_retries;
    opts.circuit_breaker_threshold = args.breaker_threshold;
    opts.breaker_window = Duration::from_secs(args.breaker_window);
    opts.max_tasks_per_worker = args.max_tasks_per_worker;
    opts.shutdown_grace = Duration::from_secs(args.grace);
    opts.stall_timeout = Duration::from_secs(args.stall_timeout);

    let fault_plan = args
        .fault_plan
        .as_deref()
        .map(load_fault_plan)
        .transpose()?;

    let mut pool = if args.serial {
        let renderer: Arc<dyn frameforge::FrameRenderer> = match fault_plan {
            Some(plan) => Arc::new(frameforge::ScriptedRenderer::new(
                Arc::new(ChartRenderer::new()),
                plan,
            )),
            None => Arc::new(ChartRenderer::new()),
        };
        RenderPool::new(Box::new(ThreadBackend::new(renderer, config)), opts)?
    } else {
        let mut backend = ProcessBackend::new(config);
        if let Some(plan) = fault_plan {
            backend = backend.with_fault_plan(plan);
        }
        RenderPool::new(Box::new(backend), opts)?
    };

    let cancel = pool.cancel_token();
    ctrlc::set_handler(move || {
        // Signal-handler context: only flip the flag, the run loop drains.
        cancel.cancel();
    })
    .context("install signal handler")?;

    pool = pool.with_progress(Box::new(progress_line));

    let report = pool.run(&mut source)?;
    eprintln!();

    if let Some(path) = &args.report {
        write_report(&report, path)?;
    }

    match &report.outcome {
        RunOutcome::Completed { rendered, skipped } => {
            println!("rendered {rendered} frames ({skipped} skipped)");
            if let Some(mp4) = &args.mp4 {
                let mut settings = VideoSettings::new(mp4, args.fps);
                settings.crf = args.crf;
                settings.codec = match args.codec {
                    CodecChoice::H264 => VideoCodec::H264,
                    CodecChoice::Vp9 => VideoCodec::Vp9,
                };
                let out = assemble_video(&report, &settings)?;
                println!("wrote {}", out.display());
            }
            Ok(())
        }
        RunOutcome::AbortedWorkerFatal {
            failures,
            threshold,
        } => anyhow::bail!(
            "run aborted: {failures} worker failures within the window (threshold {threshold})"
        ),
        RunOutcome::Cancelled {
            completed,
            in_flight,
        } => anyhow::bail!("run cancelled: {completed} completed, {in_flight} unfinished"),
    }
}

fn cmd_timeline_stub(args: StubArgs) -> anyhow::Result<()> {
    let timeline = Timeline::synthetic(args.steps, args.entities, args.frames_per_step);
    timeline.validate()?;
    if let Some(parent) = args.out.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create output dir '{}'", parent.display()))?;
    }
    let file = std::fs::File::create(&args.out)
        .with_context(|| format!("create '{}'", args.out.display()))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, &timeline).context("serialize timeline")?;
    writer.flush()?;
    println!(
        "wrote {} ({} frames)",
        args.out.display(),
        timeline.total_frames()
    );
    Ok(())
}

fn load_fault_plan(path: &Path) -> anyhow::Result<FaultPlan> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("read fault plan '{}'", path.display()))?;
    serde_json::from_str(&text).with_context(|| "parse fault plan JSON")
}

fn write_report(report: &frameforge::RunReport, path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create report dir '{}'", parent.display()))?;
    }
    let file = std::fs::File::create(path)
        .with_context(|| format!("create report '{}'", path.display()))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, report).context("serialize report")?;
    writer.flush()?;
    Ok(())
}

fn progress_line(info: ProgressInfo) {
    let fps = info
        .fps
        .map(|f| format!("{f:.1} fps"))
        .unwrap_or_else(|| "-- fps".to_string());
    let eta = info
        .eta
        .map(|d| format!("eta {}s", d.as_secs()))
        .unwrap_or_else(|| "eta --".to_string());
    eprint!(
        "\r{}/{} done, {} skipped, {} in flight, {fps}, {eta}    ",
        info.completed, info.total, info.skipped, info.in_flight
    );
    let _ = std::io::stderr().flush();
}
