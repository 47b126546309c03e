//! lockstep CLI
//!
//! Replays a recorded segment through a process until two runs disagree.

#![warn(missing_docs)]
#![warn(clippy::all)]

use clap::{Args, Parser, Subcommand};
use color_eyre::Result;
use indexmap::IndexMap;
use lockstep_core::CoreResult;
use lockstep_log::{
    DEFAULT_BASE_URL, DirFrameSource, DirLogSource, LogSource, MessageKind, SegmentRef, Subset,
};
use lockstep_replay::{
    Harness, HarnessConfig, HarnessEnv, ProcessRegistry, SEGMENT, StopReason, StopToken,
    SubprocessEngine, TEST_ROUTE,
};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "lockstep")]
#[command(about = "lockstep - replay-determinism harness", long_about = None)]
struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a segment until two runs disagree
    Fuzz(FuzzArgs),
    /// Build the replay subset and summarize it
    Subset(SegmentArgs),
    /// Print the download URL of a segment artifact
    Url {
        /// Route name, `dongle|timestamp`
        #[arg(long, default_value = TEST_ROUTE)]
        route: String,
        /// Segment number
        #[arg(long, default_value_t = SEGMENT)]
        segment: u32,
        /// Artifact type, e.g. `rlog` or `fcamera`
        #[arg(long)]
        log_type: String,
        /// Base URL
        #[arg(long, default_value = DEFAULT_BASE_URL)]
        base: String,
    },
}

#[derive(Args, Debug, Clone)]
struct SegmentArgs {
    /// Route name, `dongle|timestamp`
    #[arg(long)]
    route: Option<String>,
    /// Segment number
    #[arg(long)]
    segment: Option<u32>,
    /// Local segment store
    #[arg(long, env = "LOCKSTEP_DATA_DIR", default_value = ".")]
    data_dir: PathBuf,
    /// Registered process to replay
    #[arg(long)]
    process: Option<String>,
    /// Frame pairs per replay
    #[arg(long)]
    max_frames: Option<usize>,
    /// Harness configuration file (JSON)
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
struct FuzzArgs {
    #[command(flatten)]
    segment: SegmentArgs,
    /// Stop cleanly after this many replays
    #[arg(long)]
    max_iterations: Option<u64>,
    /// Replay even if the subset has fewer pairs than requested
    #[arg(long)]
    allow_underfilled: bool,
}

impl SegmentArgs {
    /// Config file or defaults, then flags, then the environment
    fn harness_config(&self, env: HarnessEnv) -> CoreResult<HarnessConfig> {
        let mut config = match &self.config {
            Some(path) => HarnessConfig::from_json_file(path)?,
            None => HarnessConfig::default(),
        };
        if let Some(route) = &self.route {
            config.segment.route = route.clone();
        }
        if let Some(segment) = self.segment {
            config.segment.segment = segment;
        }
        if let Some(process) = &self.process {
            config.process = process.clone();
        }
        if let Some(max_frames) = self.max_frames {
            config.max_frames = max_frames;
        }
        Ok(config.with_env(env))
    }
}

impl FuzzArgs {
    fn harness_config(&self, env: HarnessEnv) -> CoreResult<HarnessConfig> {
        let mut config = self.segment.harness_config(env)?;
        if let Some(max) = self.max_iterations {
            config.looping.max_iterations = Some(max);
        }
        config.allow_underfilled |= self.allow_underfilled;
        Ok(config)
    }
}

fn init_tracing(json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("lockstep=info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    init_tracing(cli.json);

    match cli.command {
        Commands::Fuzz(args) => fuzz(args).await,
        Commands::Subset(args) => {
            let harness = Harness::new(
                args.harness_config(HarnessEnv::from_env())?,
                &ProcessRegistry::builtin(),
            )?;
            let segment = DirLogSource::new(&args.data_dir).load(&harness.config().segment)?;
            let subset = lockstep_log::build_subset(&segment, &harness.config().subset_config())?;
            print!("{}", summarize(&subset));
            Ok(())
        }
        Commands::Url {
            route,
            segment,
            log_type,
            base,
        } => {
            println!("{}", SegmentRef::new(route, segment).url(&base, &log_type));
            Ok(())
        }
    }
}

async fn fuzz(args: FuzzArgs) -> Result<()> {
    let config = args.harness_config(HarnessEnv::from_env())?;
    let harness = Harness::new(config, &ProcessRegistry::builtin())?;
    let data_dir = args.segment.data_dir;

    let segment = DirLogSource::new(&data_dir).load(&harness.config().segment)?;
    let frames = harness.open_frames(&DirFrameSource::new(&data_dir))?;

    let token = StopToken::new();
    let on_interrupt = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupted, stopping after the current replay");
            on_interrupt.stop();
        }
    });

    let outcome = tokio::task::spawn_blocking(move || {
        let mut engine = SubprocessEngine::new().with_workdir(&data_dir);
        harness.run(&segment, &frames, &mut engine, token)
    })
    .await??;

    let reason = match outcome.stop_reason {
        StopReason::IterationLimit => "iteration limit",
        StopReason::Cancelled => "cancelled",
    };
    println!(
        "{} identical replays ({}), {} values per replay",
        outcome.iterations,
        reason,
        outcome.baseline.map_or(0, |b| b.len())
    );
    Ok(())
}

fn summarize(subset: &Subset) -> String {
    let mut counts: IndexMap<&MessageKind, usize> = IndexMap::new();
    for msg in subset.messages() {
        *counts.entry(msg.which()).or_default() += 1;
    }

    let mut out = format!(
        "messages: {} ({} scanned, {} appended)\n",
        subset.len(),
        subset.scanned().len(),
        subset.appended().len()
    );
    let fill = subset.fill();
    out.push_str(&format!(
        "fill: {}/{}{}\n",
        fill.cycles(),
        fill.required,
        if fill.is_complete() { "" } else { " (underfilled)" }
    ));
    if let (Some(first), Some(last)) = (subset.scanned().first(), subset.scanned().last()) {
        out.push_str(&format!(
            "span: {} .. {}\n",
            first.log_mono_time(),
            last.log_mono_time()
        ));
    }
    for (kind, count) in counts {
        out.push_str(&format!("  {}: {}\n", kind, count));
    }
    out
}
