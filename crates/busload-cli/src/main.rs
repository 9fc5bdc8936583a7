//! `busload-cli` – load runs against the script module from a terminal.
//!
//! `busload run` initialises a [`ScriptModule`] over the in-process bus
//! described by a connector profile file and drives it in waves of virtual
//! users, exactly as a load script would (`writeByRate` on the writer side,
//! `readFragmented` on the reader side).  Ctrl-C stops the run before the
//! next wave.
//!
//! `busload init-plan` writes the default run plan to
//! `~/.busload/config.toml` (or `--plan PATH`).

mod config;
mod swarm;

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use busload_connector::SimConnectorFactory;
use busload_core::CohortSizes;
use busload_module::{ScriptModule, telemetry};
use busload_types::DeliveryPolicy;
use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing::warn;

use config::RunPlan;
use swarm::{LatencySummary, ReaderOutcome, WaveReport};

/// Drive a publish/subscribe bus through the load-script bridge.
#[derive(Parser, Debug)]
#[command(name = "busload")]
#[command(about = "Load runs against the pub/sub script bridge")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run waves of virtual users against a connector profile.
    Run {
        /// Connector profile file (TOML).
        #[arg(short, long)]
        config: PathBuf,

        /// Profile name inside the file.
        #[arg(short, long)]
        profile: String,

        /// Run plan file; defaults to ~/.busload/config.toml.
        #[arg(long)]
        plan: Option<PathBuf>,

        /// Override the plan's virtual users per wave.
        #[arg(long)]
        vus: Option<usize>,

        /// Override the plan's number of waves.
        #[arg(long)]
        waves: Option<usize>,
    },
    /// Write the default run plan.
    InitPlan {
        #[arg(long)]
        plan: Option<PathBuf>,

        /// Overwrite an existing plan.
        #[arg(long)]
        force: bool,
    },
}

fn main() {
    let args = Args::parse();
    let _guard = telemetry::init_tracing("busload");

    let code = match args.command {
        Command::Run {
            config,
            profile,
            plan,
            vus,
            waves,
        } => run(config, &profile, plan, vus, waves),
        Command::InitPlan { plan, force } => init_plan(plan, force),
    };
    std::process::exit(code);
}

// ─────────────────────────────────────────────────────────────────────────────
// Commands
// ─────────────────────────────────────────────────────────────────────────────

fn run(
    config: PathBuf,
    profile: &str,
    plan_path: Option<PathBuf>,
    vus: Option<usize>,
    waves: Option<usize>,
) -> i32 {
    let plan_path = plan_path.unwrap_or_else(config::plan_path);
    let mut plan = match config::load_from(&plan_path) {
        Ok(Some(plan)) => {
            println!("  Plan loaded from {}", plan_path.display().to_string().bold());
            plan
        }
        Ok(None) => {
            let mut plan = RunPlan::default();
            config::apply_env_overrides(&mut plan);
            println!("  No plan at {}; using defaults.", plan_path.display().to_string().dimmed());
            plan
        }
        Err(e) => {
            println!("{}: {}", "Plan error".red(), e);
            return 2;
        }
    };
    if let Some(n) = vus {
        plan.vus = n;
    }
    if let Some(n) = waves {
        plan.waves = n;
    }
    if let Err(e) = plan.validate() {
        println!("{}: {}", "Plan error".red(), e);
        return 2;
    }
    if plan.policy == DeliveryPolicy::LatestOnly {
        warn!("latest_only drops fragments; wave readers will likely stall until the timeout");
    }

    let stop = Arc::new(AtomicBool::new(false));
    let stop_flag = Arc::clone(&stop);
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – stopping after this wave …".yellow().bold());
        stop_flag.store(true, Ordering::SeqCst);
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; the run can only be stopped by killing it");
    }

    let module = Arc::new(ScriptModule::new(SimConnectorFactory));
    module.init_or_exit(
        &config.to_string_lossy(),
        profile,
        CohortSizes::new(plan.vus, 1),
    );

    print_plan(&plan);

    let mut reports = Vec::with_capacity(plan.waves);
    for wave in 0..plan.waves {
        if stop.load(Ordering::SeqCst) {
            break;
        }
        let report = swarm::run_wave(&module, &plan, wave);
        print_wave(&report, plan.vus);
        let stalled = report.reader == ReaderOutcome::Stalled;
        reports.push(report);
        if stalled {
            println!("{}", "  Reader stalled; abandoning the run.".red().bold());
            break;
        }
    }

    print_summary(&reports, &plan);
    if reports.iter().all(|r| r.is_clean(plan.vus)) && reports.len() == plan.waves {
        0
    } else {
        1
    }
}

fn init_plan(plan_path: Option<PathBuf>, force: bool) -> i32 {
    let path = plan_path.unwrap_or_else(config::plan_path);
    if path.exists() && !force {
        println!(
            "  Plan already exists at {} (use {} to overwrite).",
            path.display().to_string().bold(),
            "--force".bold()
        );
        return 1;
    }
    match config::save_to(&RunPlan::default(), &path) {
        Ok(()) => {
            println!(
                "  {} Plan saved to {}",
                "✓".green().bold(),
                path.display().to_string().bold()
            );
            0
        }
        Err(e) => {
            println!("{}: {}", "Error saving plan".red(), e);
            1
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Output
// ─────────────────────────────────────────────────────────────────────────────

fn print_plan(plan: &RunPlan) {
    println!();
    println!(
        "  {} {} vus × {} waves, {} B payloads, rate {} / chunk {}, {}",
        "▶".cyan().bold(),
        plan.vus,
        plan.waves,
        plan.payload_bytes,
        plan.rate,
        plan.chunk_size,
        plan.policy
    );
}

fn print_wave(report: &WaveReport, vus: usize) {
    let writers = report
        .writers()
        .map(format_latency)
        .unwrap_or_else(|| "no successful writes".to_string());
    let reader = match &report.reader {
        ReaderOutcome::Completed { latency, intact } => {
            let line = format!("{intact}/{vus} intact in {}", format_duration(*latency));
            if *intact == vus { line.green() } else { line.yellow() }
        }
        ReaderOutcome::Failed { message, .. } => message.red(),
        ReaderOutcome::Stalled => "stalled".red(),
    };
    let mark = if report.is_clean(vus) { "✓".green() } else { "✗".red() };
    println!("  {} wave {:>3}  writers {}  reader {}", mark, report.wave, writers, reader);
    for failure in &report.writer_failures {
        println!("      {}", failure.red());
    }
}

fn print_summary(reports: &[WaveReport], plan: &RunPlan) {
    let writer_samples: Vec<Duration> = reports
        .iter()
        .flat_map(|r| r.writer_latencies.iter().copied())
        .collect();
    let reader_samples: Vec<Duration> = reports
        .iter()
        .filter_map(|r| match r.reader {
            ReaderOutcome::Completed { latency, .. } => Some(latency),
            _ => None,
        })
        .collect();
    let clean = reports.iter().filter(|r| r.is_clean(plan.vus)).count();

    println!();
    println!("  {}", "Summary".bold());
    println!("    waves   {}/{} clean", clean, plan.waves);
    println!(
        "    writer  {}",
        LatencySummary::from_samples(&writer_samples)
            .map(format_latency)
            .unwrap_or_else(|| "-".to_string())
    );
    println!(
        "    reader  {}",
        LatencySummary::from_samples(&reader_samples)
            .map(format_latency)
            .unwrap_or_else(|| "-".to_string())
    );
}

fn format_latency(s: LatencySummary) -> String {
    format!(
        "min {} avg {} max {}",
        format_duration(s.min),
        format_duration(s.avg),
        format_duration(s.max)
    )
}

fn format_duration(d: Duration) -> String {
    if d >= Duration::from_secs(1) {
        format!("{:.2}s", d.as_secs_f64())
    } else {
        format!("{:.1}ms", d.as_secs_f64() * 1000.0)
    }
}
