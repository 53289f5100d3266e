// SPDX-FileCopyrightText: Copyright (c) 2024 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0
//! Hand-off of needs-simulation faults to an external logic simulator.
//!
//! The campaign is exported into one directory: the fault-record file (one
//! `"{site:x} {timing_masked} {metastable}"` line per classified fault, in
//! sampling order), the net table (one bus-notation wire name per site
//! index), the generated testbench and the C source of its DPI helper. A
//! JSON summary of the counts is written next to them. The simulator
//! answers with the number of logic-masked faults.

use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use crate::fault::{FaultCampaign, FaultCounts, InjectionSites};
use crate::netlist::Netlist;
use crate::testbench::{self, TestbenchOptions};
use crate::timing::TimingInfo;

/// Blocking call into a logic simulator.
pub trait SimulationBridge {
    /// Number of needs-simulation faults in `campaign` whose bit flip did
    /// not reach any primary output.
    fn run(
        &mut self,
        netlist: &Netlist,
        timing: &TimingInfo,
        campaign: &FaultCampaign,
    ) -> Result<usize, BridgeError>;
}

/// One line of the fault-record file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FaultRecord {
    /// Index into the campaign's injection-site table.
    pub site: usize,
    pub timing_masked: bool,
    pub metastable: bool,
}

impl FaultRecord {
    pub fn needs_simulation(&self) -> bool {
        !self.timing_masked && !self.metastable
    }
}

impl std::fmt::Display for FaultRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:x} {} {}", self.site, self.timing_masked as u8, self.metastable as u8)
    }
}

impl std::str::FromStr for FaultRecord {
    type Err = String;

    fn from_str(line: &str) -> Result<Self, String> {
        let bit = |s: Option<&str>| match s {
            Some("0") => Ok(false),
            Some("1") => Ok(true),
            other => Err(format!("bad flag {:?} in fault record {:?}", other, line)),
        };
        let mut fields = line.split_whitespace();
        let site = fields
            .next()
            .and_then(|s| usize::from_str_radix(s, 16).ok())
            .ok_or_else(|| format!("bad site index in fault record {:?}", line))?;
        let timing_masked = bit(fields.next())?;
        let metastable = bit(fields.next())?;
        if fields.next().is_some() {
            return Err(format!("trailing fields in fault record {:?}", line));
        }
        Ok(Self { site, timing_masked, metastable })
    }
}

#[derive(Debug)]
pub enum BridgeError {
    Io(std::io::Error),
    /// A simulator stage exited unsuccessfully. `status` is `None` when it
    /// was killed by a signal.
    SimulatorFailed { stage: &'static str, status: Option<i32> },
    /// The simulator finished without writing its result.
    MissingResult(PathBuf),
    MalformedResult { path: PathBuf, content: String },
    /// Line `line` (1-based) of a fault-record file does not parse.
    MalformedRecord { path: PathBuf, line: usize, reason: String },
    /// The fault-record file on disk disagrees with the campaign.
    StaleRecords { path: PathBuf, on_disk: usize, expected: usize },
    InconsistentResult { reported: usize, simulated: usize },
}

impl std::fmt::Display for BridgeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BridgeError::Io(e) => write!(f, "IO error: {}", e),
            BridgeError::SimulatorFailed { stage, status: Some(code) } => {
                write!(f, "simulator {} stage exited with status {}", stage, code)
            }
            BridgeError::SimulatorFailed { stage, status: None } => {
                write!(f, "simulator {} stage was terminated by a signal", stage)
            }
            BridgeError::MissingResult(path) => {
                write!(f, "simulator produced no result file at {}", path.display())
            }
            BridgeError::MalformedResult { path, content } => {
                write!(f, "result file {} does not hold a count: {:?}", path.display(), content)
            }
            BridgeError::MalformedRecord { path, line, reason } => {
                write!(f, "{}:{}: {}", path.display(), line, reason)
            }
            BridgeError::StaleRecords { path, on_disk, expected } => write!(
                f,
                "{} holds {} faults to simulate, expected {}",
                path.display(),
                on_disk,
                expected
            ),
            BridgeError::InconsistentResult { reported, simulated } => write!(
                f,
                "simulator reported {} logic-masked faults but only {} needed simulation",
                reported, simulated
            ),
        }
    }
}

impl std::error::Error for BridgeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BridgeError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for BridgeError {
    fn from(e: std::io::Error) -> Self {
        BridgeError::Io(e)
    }
}

/// Write one record per classified fault. Returns the number of lines.
pub fn write_fault_records(path: &Path, campaign: &FaultCampaign) -> std::io::Result<usize> {
    let mut w = BufWriter::new(fs::File::create(path)?);
    let mut n = 0;
    for record in campaign.records() {
        writeln!(w, "{}", record)?;
        n += 1;
    }
    w.flush()?;
    Ok(n)
}

/// Read back a fault-record file.
pub fn read_fault_records(path: &Path) -> Result<Vec<FaultRecord>, BridgeError> {
    let content = fs::read_to_string(path)?;
    content
        .lines()
        .enumerate()
        .filter(|(_, l)| !l.trim().is_empty())
        .map(|(i, l)| {
            l.parse().map_err(|reason| BridgeError::MalformedRecord {
                path: path.to_owned(),
                line: i + 1,
                reason,
            })
        })
        .collect()
}

/// Write the net table: line `i` is the bus-notation name of site `i`.
pub fn write_net_table(path: &Path, sites: &InjectionSites) -> std::io::Result<()> {
    let mut w = BufWriter::new(fs::File::create(path)?);
    for name in sites.iter_bus_names() {
        writeln!(w, "{}", name)?;
    }
    w.flush()
}

/// JSON summary written beside the artifacts.
#[derive(Debug, serde::Serialize)]
struct CampaignSummary<'a> {
    module: &'a str,
    seed: u64,
    timing: &'a TimingInfo,
    num_sites: usize,
    #[serde(flatten)]
    counts: FaultCounts,
}

/// Artifact paths of one campaign.
#[derive(Debug, Clone, PartialEq)]
pub struct CampaignArtifacts {
    pub faults: PathBuf,
    pub nets: PathBuf,
    pub testbench: PathBuf,
    /// C source of the DPI net-access helper.
    pub dpi: PathBuf,
    pub summary: PathBuf,
    pub result: PathBuf,
}

impl CampaignArtifacts {
    /// Standard file names under `dir`, with the simulator result at `result`.
    pub fn in_dir(dir: &Path, result: PathBuf) -> Self {
        Self {
            faults: dir.join("faults.txt"),
            nets: dir.join("nets.txt"),
            testbench: dir.join(format!("{}.sv", testbench::TB_MODULE)),
            dpi: dir.join(testbench::DPI_HELPER_FILE),
            summary: dir.join("summary.json"),
            result,
        }
    }

    /// Write every artifact. Parent directories are created.
    pub fn write(&self, netlist: &Netlist, campaign: &FaultCampaign) -> Result<(), BridgeError> {
        for p in [&self.faults, &self.nets, &self.testbench, &self.dpi, &self.summary] {
            if let Some(dir) = p.parent().filter(|d| !d.as_os_str().is_empty()) {
                fs::create_dir_all(dir)?;
            }
        }
        let lines = write_fault_records(&self.faults, campaign)?;
        write_net_table(&self.nets, &campaign.sites)?;
        let options = TestbenchOptions {
            faults_file: self.faults.clone(),
            nets_file: self.nets.clone(),
            result_file: self.result.clone(),
            settle_ps: campaign.timing.clock_period_ps,
            num_sites: campaign.sites.len(),
        };
        fs::write(&self.testbench, testbench::generate(netlist, &options))?;
        fs::write(&self.dpi, testbench::DPI_HELPER)?;
        let summary = CampaignSummary {
            module: &netlist.name,
            seed: campaign.seed,
            timing: &campaign.timing,
            num_sites: campaign.sites.len(),
            counts: campaign.counts(),
        };
        let json = serde_json::to_string_pretty(&summary).map_err(std::io::Error::from)?;
        fs::write(&self.summary, json + "\n")?;
        clilog::info!(
            "wrote {} fault records, {} nets and testbench to {}",
            lines,
            campaign.sites.len(),
            self.faults.parent().unwrap_or(Path::new(".")).display()
        );
        Ok(())
    }
}

/// How to compile and run the external simulator.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulatorConfig {
    pub work_dir: PathBuf,
    /// Command line of the compile stage. Empty to skip.
    pub compile: Vec<String>,
    /// Command line of the run stage.
    pub run: Vec<String>,
    pub result_file: PathBuf,
}

/// Runs a batch simulator on the exported campaign.
///
/// Placeholders `{testbench}`, `{dpi}`, `{netlist}`, `{faults}`, `{nets}`,
/// `{result}` and `{work_dir}` in the command lines are replaced by paths.
#[derive(Debug, Clone)]
pub struct ExternalSimulator {
    pub config: SimulatorConfig,
    /// Netlist source handed to the compile stage as `{netlist}`.
    pub netlist_path: PathBuf,
}

impl ExternalSimulator {
    pub fn new(config: SimulatorConfig, netlist_path: PathBuf) -> Self {
        Self { config, netlist_path }
    }

    pub fn artifacts(&self) -> CampaignArtifacts {
        CampaignArtifacts::in_dir(&self.config.work_dir, self.config.result_file.clone())
    }

    fn substitute(&self, arg: &str, artifacts: &CampaignArtifacts) -> String {
        let path = |p: &Path| p.display().to_string();
        arg.replace("{testbench}", &path(&artifacts.testbench))
            .replace("{dpi}", &path(&artifacts.dpi))
            .replace("{netlist}", &path(&self.netlist_path))
            .replace("{faults}", &path(&artifacts.faults))
            .replace("{nets}", &path(&artifacts.nets))
            .replace("{result}", &path(&artifacts.result))
            .replace("{work_dir}", &path(&self.config.work_dir))
    }

    fn run_stage(
        &self,
        stage: &'static str,
        argv: &[String],
        artifacts: &CampaignArtifacts,
    ) -> Result<(), BridgeError> {
        let Some((program, args)) = argv.split_first() else {
            clilog::debug!("no {} command configured, skipping", stage);
            return Ok(());
        };
        let program = self.substitute(program, artifacts);
        let args: Vec<String> = args.iter().map(|a| self.substitute(a, artifacts)).collect();
        clilog::info!("simulator {}: {} {}", stage, program, args.join(" "));
        let timer = clilog::stimer!("simulator");
        // simulator chatter goes to stderr so stdout stays clean for results
        let status = Command::new(&program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::from(std::io::stderr()))
            .status()?;
        clilog::finish!(timer);
        if !status.success() {
            return Err(BridgeError::SimulatorFailed { stage, status: status.code() });
        }
        Ok(())
    }

    fn read_result(path: &Path) -> Result<usize, BridgeError> {
        let content = match fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(BridgeError::MissingResult(path.to_owned()));
            }
            Err(e) => return Err(e.into()),
        };
        content.trim().parse().map_err(|_| BridgeError::MalformedResult {
            path: path.to_owned(),
            content: content.clone(),
        })
    }
}

impl SimulationBridge for ExternalSimulator {
    fn run(
        &mut self,
        netlist: &Netlist,
        _timing: &TimingInfo,
        campaign: &FaultCampaign,
    ) -> Result<usize, BridgeError> {
        let artifacts = self.artifacts();
        fs::create_dir_all(&self.config.work_dir)?;
        match fs::remove_file(&artifacts.result) {
            Ok(()) => clilog::debug!("removed stale result {}", artifacts.result.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        artifacts.write(netlist, campaign)?;
        // the bench reads the file, so the file is what gets checked
        let simulated = read_fault_records(&artifacts.faults)?
            .iter()
            .filter(|r| r.needs_simulation())
            .count();
        let expected = campaign.needs_simulation().count();
        if simulated != expected {
            return Err(BridgeError::StaleRecords {
                path: artifacts.faults.clone(),
                on_disk: simulated,
                expected,
            });
        }

        self.run_stage("compile", &self.config.compile, &artifacts)?;
        self.run_stage("run", &self.config.run, &artifacts)?;

        let logic_masked = Self::read_result(&artifacts.result)?;
        if logic_masked > simulated {
            return Err(BridgeError::InconsistentResult { reported: logic_masked, simulated });
        }
        Ok(logic_masked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delay_model::DelayModel;
    use crate::fault::{self, Pulse};
    use crate::netlist::OutputPorts;
    use crate::verilog;

    fn full_adder() -> Netlist {
        let src = include_str!("../tests/fixtures/full_adder.vg");
        let mut nl = verilog::load_str(src, None, &OutputPorts::default()).unwrap();
        fault::prepare(&mut nl, &DelayModel::default()).unwrap();
        nl
    }

    /// Site `n3` (index 5, output delay 1): masked, then two at the safe-start
    /// boundary. Site `a` starts inside hold and is metastable.
    fn campaign(nl: &Netlist) -> FaultCampaign {
        let timing = TimingInfo::from_ns(5.0, 0.1, 0.1).unwrap();
        let sites = InjectionSites::from_netlist(nl);
        assert_eq!(sites.name(5), "n3");
        assert_eq!(nl.wires["n3"].output_delay, 1);
        let draws = vec![
            (5, Pulse { start_ps: 2000, width_ps: 50 }),
            (0, Pulse { start_ps: 0, width_ps: 50 }),
            (5, Pulse { start_ps: 99, width_ps: 50 }),
            (5, Pulse { start_ps: 99, width_ps: 60 }),
        ];
        FaultCampaign::from_draws(nl, timing, 17, sites, draws)
    }

    fn sh(script: &str) -> Vec<String> {
        vec!["sh".to_string(), "-c".to_string(), script.to_string()]
    }

    fn simulator(dir: &Path, run: Vec<String>) -> ExternalSimulator {
        ExternalSimulator::new(
            SimulatorConfig {
                work_dir: dir.join("build"),
                compile: vec![],
                run,
                result_file: dir.join("build/tb_output.txt"),
            },
            dir.join("full_adder.vg"),
        )
    }

    #[test]
    fn test_record_format() {
        let r = FaultRecord { site: 26, timing_masked: true, metastable: false };
        assert_eq!(r.to_string(), "1a 1 0");
        assert_eq!("1a 1 0".parse::<FaultRecord>(), Ok(r));
        assert!("1a 2 0".parse::<FaultRecord>().is_err());
        assert!("zz 0 0".parse::<FaultRecord>().is_err());
        assert!("1 0 0 0".parse::<FaultRecord>().is_err());
        let clear = FaultRecord { site: 0, timing_masked: false, metastable: false };
        assert!(clear.needs_simulation());
    }

    #[test]
    fn test_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let nl = full_adder();
        let campaign = campaign(&nl);
        let out = dir.path().join("out");
        let artifacts = CampaignArtifacts::in_dir(&out, out.join("result.txt"));
        artifacts.write(&nl, &campaign).unwrap();

        assert_eq!(fs::read_to_string(&artifacts.faults).unwrap(), "5 1 0\n0 0 1\n5 0 0\n5 0 0\n");
        let records = read_fault_records(&artifacts.faults).unwrap();
        assert_eq!(records.iter().filter(|r| r.needs_simulation()).count(), 2);
        assert_eq!(fs::read_to_string(&artifacts.nets).unwrap(), "a\nb\ncin\nn1\nn2\nn3\n");
        let tb = fs::read_to_string(&artifacts.testbench).unwrap();
        assert!(tb.contains("full_adder dut ("));
        assert!(tb.contains("localparam int NUM_SITES = 6;"));
        assert_eq!(fs::read_to_string(&artifacts.dpi).unwrap(), testbench::DPI_HELPER);

        let summary: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&artifacts.summary).unwrap()).unwrap();
        assert_eq!(summary["module"], "full_adder");
        assert_eq!(summary["seed"], 17);
        assert_eq!(summary["requested"], 4);
        assert_eq!(summary["needs_simulation"], 2);
        assert_eq!(summary["timing"]["clock_period_ps"], 5000);
    }

    #[cfg(unix)]
    #[test]
    fn test_external_simulator_result() {
        let dir = tempfile::tempdir().unwrap();
        let nl = full_adder();
        let campaign = campaign(&nl);
        let script = "test -f {faults} && test -f {nets} && echo 2 > {result}";
        let mut sim = simulator(dir.path(), sh(script));
        assert_eq!(sim.run(&nl, &campaign.timing, &campaign).unwrap(), 2);
        // a reported zero is a result, not a failure
        let mut sim = simulator(dir.path(), sh("echo 0 > {result}"));
        assert_eq!(sim.run(&nl, &campaign.timing, &campaign).unwrap(), 0);
    }

    #[cfg(unix)]
    #[test]
    fn test_missing_result_after_stale_removal() {
        let dir = tempfile::tempdir().unwrap();
        let nl = full_adder();
        let campaign = campaign(&nl);
        fs::create_dir_all(dir.path().join("build")).unwrap();
        fs::write(dir.path().join("build/tb_output.txt"), "1\n").unwrap();
        let mut sim = simulator(dir.path(), sh("true"));
        let err = sim.run(&nl, &campaign.timing, &campaign).unwrap_err();
        assert!(matches!(err, BridgeError::MissingResult(_)), "{}", err);
    }

    #[cfg(unix)]
    #[test]
    fn test_simulator_failures() {
        let dir = tempfile::tempdir().unwrap();
        let nl = full_adder();
        let campaign = campaign(&nl);

        let mut sim = simulator(dir.path(), sh("exit 3"));
        let err = sim.run(&nl, &campaign.timing, &campaign).unwrap_err();
        assert!(
            matches!(err, BridgeError::SimulatorFailed { stage: "run", status: Some(3) }),
            "{}",
            err
        );

        let mut sim = simulator(dir.path(), sh("echo 1"));
        sim.config.compile = sh("exit 1");
        let err = sim.run(&nl, &campaign.timing, &campaign).unwrap_err();
        assert!(matches!(err, BridgeError::SimulatorFailed { stage: "compile", .. }), "{}", err);

        let mut sim = simulator(dir.path(), sh("echo lots > {result}"));
        let err = sim.run(&nl, &campaign.timing, &campaign).unwrap_err();
        assert!(matches!(err, BridgeError::MalformedResult { .. }), "{}", err);

        let mut sim = simulator(dir.path(), sh("echo 3 > {result}"));
        let err = sim.run(&nl, &campaign.timing, &campaign).unwrap_err();
        assert!(
            matches!(err, BridgeError::InconsistentResult { reported: 3, simulated: 2 }),
            "{}",
            err
        );
    }

    #[test]
    fn test_placeholders() {
        let sim = ExternalSimulator::new(
            SimulatorConfig {
                work_dir: "build".into(),
                compile: vec![],
                run: vec![],
                result_file: "build/out.txt".into(),
            },
            "design.vg".into(),
        );
        let artifacts = sim.artifacts();
        assert_eq!(
            sim.substitute("{testbench} {netlist} {faults} {nets} {result} {work_dir}", &artifacts),
            "build/setmask_tb.sv design.vg build/faults.txt build/nets.txt build/out.txt build"
        );
        assert_eq!(sim.substitute("{dpi}", &artifacts), "build/setmask_dpi.c");
    }

    #[test]
    fn test_malformed_record_names_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("faults.txt");
        fs::write(&path, "5 1 0\n\n0 0 2\n").unwrap();
        match read_fault_records(&path) {
            Err(BridgeError::MalformedRecord { line, reason, .. }) => {
                assert_eq!(line, 3);
                assert!(reason.contains("bad flag"), "{}", reason);
            }
            other => panic!("expected a malformed record, got {:?}", other),
        }
        fs::write(&path, "5 1 0\n").unwrap();
        assert_eq!(
            read_fault_records(&path).unwrap(),
            vec![FaultRecord { site: 5, timing_masked: true, metastable: false }]
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_simulator_gets_dpi_helper() {
        let dir = tempfile::tempdir().unwrap();
        let nl = full_adder();
        let campaign = campaign(&nl);
        let script = "grep -q force_net_by_name_dpi {dpi} && echo 1 > {result}";
        let mut sim = simulator(dir.path(), sh(script));
        assert_eq!(sim.run(&nl, &campaign.timing, &campaign).unwrap(), 1);
    }
}
