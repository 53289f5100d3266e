// SPDX-FileCopyrightText: Copyright (c) 2024 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0
//! setmask: statistical SET masking analysis for gate-level netlists.
//!
//! Usage:
//!   setmask annotate <netlist.vg> [--sdf file.sdf] [--liberty cells.lib]
//!   setmask sample <netlist.vg> --clock-period-ns 5 --num-faults 5000 --out build
//!   setmask analyze <netlist.vg> --clock-period-ns 5 --num-faults 5000

use std::error::Error;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use setmask::annotate::AnnotationReport;
use setmask::bridge::{CampaignArtifacts, ExternalSimulator};
use setmask::config::{ConfigError, SetmaskConfig};
use setmask::delay_model::DelayModel;
use setmask::fault::{self, AnalysisError, FaultCampaign, FaultConfig};
use setmask::liberty::TimingLibrary;
use setmask::netlist::Netlist;
use setmask::sdf::{SdfCorner, SdfFile};
use setmask::timing::TimingInfo;
use setmask::verilog;

#[derive(Parser)]
#[command(name = "setmask", about = "Statistical single-event-transient masking analysis")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to project configuration file.
    ///
    /// If not specified, setmask searches for `setmask.toml` in the current
    /// directory and parent directories. CLI arguments override config file values.
    #[clap(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Annotate every wire with its gate distance and delay to the outputs.
    Annotate(AnnotateArgs),

    /// Sample and classify faults and write the simulator artifacts.
    ///
    /// Writes the fault records, net table, testbench and a JSON summary
    /// without running any simulator.
    Sample(SampleArgs),

    /// Sample, classify, simulate and report the fault mask ratio.
    ///
    /// Needs a `[simulator]` section in setmask.toml.
    Analyze(AnalyzeArgs),
}

#[derive(Args, Debug)]
struct DesignArgs {
    /// Gate-level Verilog netlist.
    netlist_verilog: Option<PathBuf>,

    /// Module to analyze. Inferred from the file if omitted.
    #[clap(long)]
    top_module: Option<String>,

    /// SDF file with per-instance delays.
    #[clap(long)]
    sdf: Option<PathBuf>,

    /// SDF corner: min, typ or max.
    #[clap(long)]
    sdf_corner: Option<SdfCorner>,

    /// Liberty library with per-cell delays.
    #[clap(long)]
    liberty: Option<PathBuf>,

    /// Delay of gates no annotation covers, ps.
    #[clap(long)]
    default_delay_ps: Option<u64>,
}

#[derive(Args, Debug)]
struct TimingArgs {
    /// Clock period in ns.
    #[clap(long)]
    clock_period_ns: Option<f64>,

    /// Register setup time in ns. Taken from SDF or Liberty if omitted.
    #[clap(long)]
    setup_ns: Option<f64>,

    /// Register hold time in ns. Taken from SDF or Liberty if omitted.
    #[clap(long)]
    hold_ns: Option<f64>,
}

#[derive(Args, Debug)]
struct FaultArgs {
    /// Number of faults to sample.
    #[clap(short, long)]
    num_faults: Option<usize>,

    /// Random seed. Chosen randomly and logged if omitted.
    #[clap(long)]
    seed: Option<u64>,

    /// Mean pulse width, ps.
    #[clap(long)]
    pulse_mean_ps: Option<f64>,

    /// Pulse width standard deviation, ps.
    #[clap(long)]
    pulse_std_dev_ps: Option<f64>,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Parser, Debug)]
struct AnnotateArgs {
    #[command(flatten)]
    design: DesignArgs,

    /// Number of critical wires to report.
    #[clap(long, default_value = "10")]
    num_wires: usize,

    #[clap(long, value_enum, default_value = "text")]
    format: OutputFormat,
}

#[derive(Parser, Debug)]
struct SampleArgs {
    #[command(flatten)]
    design: DesignArgs,

    #[command(flatten)]
    timing: TimingArgs,

    #[command(flatten)]
    faults: FaultArgs,

    /// Artifact directory. Defaults to `[simulator] work_dir`, then `build`.
    #[clap(long)]
    out: Option<PathBuf>,

    #[clap(long, value_enum, default_value = "text")]
    format: OutputFormat,
}

#[derive(Parser, Debug)]
struct AnalyzeArgs {
    #[command(flatten)]
    design: DesignArgs,

    #[command(flatten)]
    timing: TimingArgs,

    #[command(flatten)]
    faults: FaultArgs,

    #[clap(long, value_enum, default_value = "text")]
    format: OutputFormat,
}

/// A loaded, delay-assigned and annotated design.
struct Design {
    netlist: Netlist,
    netlist_path: PathBuf,
    delays: DelayModel,
    report: AnnotationReport,
}

fn load_config(config_path: Option<&PathBuf>) -> Result<SetmaskConfig, ConfigError> {
    if let Some(path) = config_path {
        let config = SetmaskConfig::load(path)?;
        clilog::info!("loaded config from {}", path.display());
        Ok(config)
    } else {
        Ok(SetmaskConfig::discover()
            .map(|(config, path)| {
                clilog::info!("auto-discovered config: {}", path.display());
                config
            })
            .unwrap_or_default())
    }
}

fn load_design(args: &DesignArgs, config: &SetmaskConfig) -> Result<Design, Box<dyn Error>> {
    let netlist_path = args
        .netlist_verilog
        .clone()
        .or_else(|| config.design.netlist.clone())
        .ok_or_else(|| {
            ConfigError(
                "netlist is required (positional arg or design.netlist in setmask.toml)".into(),
            )
        })?;
    let top_module = args.top_module.as_deref().or(config.design.top_module.as_deref());

    let mut netlist = verilog::load_file(&netlist_path, top_module, &config.output_ports())?;

    let default_ps = args
        .default_delay_ps
        .or(config.delays.default_ps)
        .unwrap_or(setmask::delay_model::DEFAULT_GATE_DELAY_PS);
    let cell_delays = config.delays.cells.iter().map(|(k, v)| (k.as_str(), *v));
    let mut delays = DelayModel::new(default_ps).with_cell_delays(cell_delays);
    if let Some(path) = args.sdf.as_ref().or(config.design.sdf.as_ref()) {
        let corner = args.sdf_corner.or(config.design.sdf_corner).unwrap_or_default();
        let sdf = SdfFile::parse_file(path, corner)?;
        clilog::info!("{}", sdf.summary());
        delays = delays.with_sdf(sdf);
    }
    if let Some(path) = args.liberty.as_ref().or(config.design.liberty.as_ref()) {
        let lib = TimingLibrary::from_file(path)?;
        clilog::info!("{}", lib.summary());
        delays = delays.with_liberty(lib);
    }

    let report = fault::prepare(&mut netlist, &delays)?;
    Ok(Design { netlist, netlist_path, delays, report })
}

fn fault_config(args: &FaultArgs, config: &SetmaskConfig) -> Result<FaultConfig, Box<dyn Error>> {
    let num_faults = args
        .num_faults
        .or(config.faults.num_faults)
        .ok_or_else(|| {
            ConfigError("number of faults is required (--num-faults or faults.num_faults)".into())
        })?;
    if num_faults == 0 {
        return Err(AnalysisError::ZeroFaults.into());
    }
    let mut pulse = config.pulse_model();
    if let Some(mean) = args.pulse_mean_ps {
        pulse.mean_ps = mean;
    }
    if let Some(sd) = args.pulse_std_dev_ps {
        pulse.std_dev_ps = sd;
    }
    let mut fault_config = FaultConfig::new(num_faults).with_pulse(pulse);
    fault_config.seed = args.seed.or(config.faults.seed);
    Ok(fault_config)
}

/// Explicit setup/hold win over the annotation files; both default to 0.
fn timing_info(
    args: &TimingArgs,
    config: &SetmaskConfig,
    delays: &DelayModel,
) -> Result<TimingInfo, Box<dyn Error>> {
    let period_ns = args
        .clock_period_ns
        .or(config.timing.clock_period_ns)
        .ok_or_else(|| {
            ConfigError(
                "clock period is required (--clock-period-ns or timing.clock_period_ns)".into(),
            )
        })?;
    let constraint = |what: &str, explicit: Option<f64>, annotated: Option<u64>| {
        explicit.unwrap_or_else(|| match annotated {
            Some(ps) => {
                clilog::info!("{} time {} ps from annotation files", what, ps);
                ps as f64 / 1000.0
            }
            None => {
                clilog::warn!("no {} time given or annotated, using 0", what);
                0.0
            }
        })
    };
    let setup_ns =
        constraint("setup", args.setup_ns.or(config.timing.setup_time_ns), delays.setup_ps());
    let hold_ns =
        constraint("hold", args.hold_ns.or(config.timing.hold_time_ns), delays.hold_ps());
    let timing = TimingInfo::from_ns(period_ns, setup_ns, hold_ns).map_err(AnalysisError::from)?;
    clilog::info!("timing: {}", timing);
    Ok(timing)
}

fn print_json(value: &serde_json::Value) -> Result<(), Box<dyn Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn cmd_annotate(args: AnnotateArgs, config: &SetmaskConfig) -> Result<(), Box<dyn Error>> {
    let design = load_design(&args.design, config)?;
    let nl = &design.netlist;
    let critical = nl.critical_wires(args.num_wires);
    match args.format {
        OutputFormat::Text => {
            println!("{}", design.report);
            println!("=== Critical Wires (Top {}) ===", critical.len());
            for (id, delay) in &critical {
                let w = nl.wire(*id);
                println!("  {:<24} {:>8} ps  {:>4} gates", w.name, delay, w.output_distance);
            }
        }
        OutputFormat::Json => {
            let wires: Vec<_> = critical
                .iter()
                .map(|(id, delay)| {
                    let w = nl.wire(*id);
                    serde_json::json!({
                        "name": w.name,
                        "output_delay_ps": delay,
                        "output_distance": w.output_distance,
                    })
                })
                .collect();
            print_json(&serde_json::json!({
                "module": nl.name,
                "report": design.report,
                "critical_wires": wires,
            }))?;
        }
    }
    Ok(())
}

fn cmd_sample(args: SampleArgs, config: &SetmaskConfig) -> Result<(), Box<dyn Error>> {
    let fault_config = fault_config(&args.faults, config)?;
    let design = load_design(&args.design, config)?;
    let timing = timing_info(&args.timing, config, &design.delays)?;
    let campaign = FaultCampaign::sample(&design.netlist, &timing, &fault_config)?;

    let out = args
        .out
        .or_else(|| config.simulator.work_dir.clone())
        .unwrap_or_else(|| PathBuf::from("build"));
    let result = config
        .simulator
        .result_file
        .clone()
        .unwrap_or_else(|| out.join("tb_output.txt"));
    let artifacts = CampaignArtifacts::in_dir(&out, result);
    artifacts.write(&design.netlist, &campaign)?;

    let counts = campaign.counts();
    match args.format {
        OutputFormat::Text => {
            println!("=== Fault Campaign ===");
            println!("Module: {}", design.netlist.name);
            println!("Seed: {}", campaign.seed);
            println!("Injection sites: {}", campaign.sites.len());
            println!("Faults requested: {}", counts.requested);
            println!("Timing-masked: {}", counts.timing_masked);
            println!("Metastability risk: {}", counts.metastable);
            println!("Needs simulation: {}", counts.needs_simulation);
            if counts.dropped > 0 {
                println!("Dropped (unknown net): {}", counts.dropped);
            }
            println!("Artifacts: {}", out.display());
        }
        OutputFormat::Json => print_json(&serde_json::json!({
            "module": design.netlist.name,
            "seed": campaign.seed,
            "timing": timing,
            "num_sites": campaign.sites.len(),
            "counts": counts,
            "faults": artifacts.faults,
            "nets": artifacts.nets,
            "testbench": artifacts.testbench,
        }))?,
    }
    Ok(())
}

fn cmd_analyze(args: AnalyzeArgs, config: &SetmaskConfig) -> Result<(), Box<dyn Error>> {
    let fault_config = fault_config(&args.faults, config)?;
    let sim_config = config.simulator_config()?;
    let design = load_design(&args.design, config)?;
    let timing = timing_info(&args.timing, config, &design.delays)?;

    let mut simulator = ExternalSimulator::new(sim_config, design.netlist_path.clone());
    let report = fault::analyze(&design.netlist, &timing, &fault_config, &mut simulator)?;
    match args.format {
        OutputFormat::Text => print!("{}", report),
        OutputFormat::Json => print_json(&serde_json::json!({
            "module": design.netlist.name,
            "timing": timing,
            "report": report,
            "fault_mask_ratio": report.fault_mask_ratio(),
        }))?,
    }
    Ok(())
}

fn run(cli: Cli) -> Result<(), Box<dyn Error>> {
    let config = load_config(cli.config.as_ref())?;
    match cli.command {
        Commands::Annotate(args) => cmd_annotate(args, &config),
        Commands::Sample(args) => cmd_sample(args, &config),
        Commands::Analyze(args) => cmd_analyze(args, &config),
    }
}

fn main() {
    clilog::init_stderr_color_debug();
    clilog::enable_timer("setmask");
    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        clilog::error!("{}", e);
        std::process::exit(1);
    }
}
