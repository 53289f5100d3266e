// SPDX-FileCopyrightText: Copyright (c) 2024 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0
//! Statistical single-event-transient sampling and triage.
//!
//! A campaign draws `num_faults` independent trials. Each trial picks an
//! injection site uniformly among the non-output wires, a start time
//! uniformly in `[0, period)` and a pulse width from a normal distribution,
//! then classifies the pulse against the register safe window using the
//! site's annotated `output_delay`. Only the faults that are neither
//! timing-masked nor metastable go to the [`SimulationBridge`].
//!
//! Trials are drawn in fixed-size chunks in parallel. Each chunk has its
//! own generator seeded from the campaign seed and the chunk index, so a
//! campaign is a pure function of its seed regardless of thread count.

use compact_str::CompactString;
use rand::prelude::*;
use rand_distr::Normal;
use rayon::prelude::*;

use crate::annotate::{self, AnnotateError, AnnotationReport};
use crate::bridge::{BridgeError, FaultRecord, SimulationBridge};
use crate::delay_model::DelayModel;
use crate::netlist::{bus_notation, Netlist};
use crate::timing::{FaultClass, TimingError, TimingInfo};

/// Trials per generator.
const CHUNK_SIZE: usize = 4096;

/// Normal pulse-width distribution in picoseconds.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PulseModel {
    pub mean_ps: f64,
    pub std_dev_ps: f64,
}

impl Default for PulseModel {
    fn default() -> Self {
        Self { mean_ps: 55.0, std_dev_ps: 15.0 }
    }
}

impl PulseModel {
    fn distribution(&self) -> Result<Normal<f64>, AnalysisError> {
        if !self.mean_ps.is_finite() {
            return Err(AnalysisError::InvalidPulseModel(format!("mean {}", self.mean_ps)));
        }
        // `Normal::new` only rejects non-finite deviations
        if self.std_dev_ps.is_nan() || self.std_dev_ps < 0.0 {
            return Err(AnalysisError::InvalidPulseModel(format!("std dev {}", self.std_dev_ps)));
        }
        Normal::new(self.mean_ps, self.std_dev_ps).map_err(|e| {
            AnalysisError::InvalidPulseModel(format!("std dev {}: {}", self.std_dev_ps, e))
        })
    }
}

/// Sampling parameters of one campaign.
#[derive(Debug, Clone, PartialEq)]
pub struct FaultConfig {
    pub num_faults: usize,
    pub pulse: PulseModel,
    /// Random when `None`; the chosen seed is logged and kept on the campaign.
    pub seed: Option<u64>,
}

impl FaultConfig {
    pub fn new(num_faults: usize) -> Self {
        Self { num_faults, pulse: PulseModel::default(), seed: None }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_pulse(mut self, pulse: PulseModel) -> Self {
        self.pulse = pulse;
        self
    }
}

/// The injectable wire population, indexed by position.
///
/// Built once per campaign. Fault records refer to sites by index, so the
/// table must be the same one used for sampling and artifact writing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InjectionSites {
    sites: Vec<(CompactString, usize)>,
}

impl InjectionSites {
    /// All non-output wires in wire order, with their declaration widths.
    pub fn from_netlist(netlist: &Netlist) -> Self {
        Self { sites: netlist.non_output_wires().map(|(_, w)| (w.name.clone(), w.width)).collect() }
    }

    /// A site table from explicit `(wire name, width)` pairs.
    pub fn from_names<S: Into<CompactString>>(sites: impl IntoIterator<Item = (S, usize)>) -> Self {
        Self { sites: sites.into_iter().map(|(n, w)| (n.into(), w)).collect() }
    }

    pub fn len(&self) -> usize {
        self.sites.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sites.is_empty()
    }

    /// Flat wire name of site `index`.
    pub fn name(&self, index: usize) -> &str {
        &self.sites[index].0
    }

    /// Site name in bus-bit notation (`base[i]`) for multi-bit wires.
    pub fn bus_name(&self, index: usize) -> String {
        let (name, width) = &self.sites[index];
        bus_notation(name, *width)
    }

    pub fn iter_bus_names(&self) -> impl Iterator<Item = String> + '_ {
        (0..self.len()).map(|i| self.bus_name(i))
    }
}

/// A transient pulse: `[start, start + width]` in ps within one period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct Pulse {
    pub start_ps: u64,
    pub width_ps: u64,
}

impl Pulse {
    pub fn end_ps(&self) -> u64 {
        self.start_ps + self.width_ps
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct SampledFault {
    /// Index into the campaign's [`InjectionSites`].
    pub site: usize,
    pub pulse: Pulse,
    /// `None` when the site is not a wire of the netlist; the fault is
    /// dropped but still counts as requested.
    pub class: Option<FaultClass>,
}

/// Outcome counts of a classified campaign.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct FaultCounts {
    pub requested: usize,
    pub timing_masked: usize,
    pub metastable: usize,
    pub needs_simulation: usize,
    pub dropped: usize,
}

impl FaultCounts {
    /// Faults that received a classification.
    pub fn classified(&self) -> usize {
        self.timing_masked + self.metastable + self.needs_simulation
    }
}

/// A sampled and classified set of faults.
#[derive(Debug, Clone)]
pub struct FaultCampaign {
    pub timing: TimingInfo,
    pub seed: u64,
    pub sites: InjectionSites,
    pub faults: Vec<SampledFault>,
}

impl FaultCampaign {
    /// Draw and classify `config.num_faults` trials over the netlist's
    /// non-output wires. The netlist must be annotated.
    pub fn sample(
        netlist: &Netlist,
        timing: &TimingInfo,
        config: &FaultConfig,
    ) -> Result<Self, AnalysisError> {
        if config.num_faults == 0 {
            return Err(AnalysisError::ZeroFaults);
        }
        let sites = InjectionSites::from_netlist(netlist);
        if sites.is_empty() {
            return Err(AnalysisError::NoInjectionSites);
        }
        let width = config.pulse.distribution()?;
        let seed = config.seed.unwrap_or_else(|| {
            let seed = rand::random();
            clilog::info!("no seed given, sampling with seed {}", seed);
            seed
        });

        let timer = clilog::stimer!("fault sampling");
        let num_sites = sites.len();
        let period = timing.clock_period_ps;
        let num_chunks = config.num_faults.div_ceil(CHUNK_SIZE);
        let draws: Vec<(usize, Pulse)> = (0..num_chunks)
            .into_par_iter()
            .map(|chunk| {
                let mut rng = chunk_rng(seed, chunk);
                let n = CHUNK_SIZE.min(config.num_faults - chunk * CHUNK_SIZE);
                (0..n)
                    .map(|_| {
                        let site = rng.gen_range(0..num_sites);
                        let start_ps = rng.gen_range(0..period);
                        let width_ps = width.sample(&mut rng).round().max(0.0) as u64;
                        (site, Pulse { start_ps, width_ps })
                    })
                    .collect::<Vec<_>>()
            })
            .collect::<Vec<_>>()
            .concat();
        clilog::finish!(timer);

        Ok(Self::from_draws(netlist, *timing, seed, sites, draws))
    }

    /// Classify explicit draws. Used to replay a recorded campaign.
    pub fn from_draws(
        netlist: &Netlist,
        timing: TimingInfo,
        seed: u64,
        sites: InjectionSites,
        draws: Vec<(usize, Pulse)>,
    ) -> Self {
        let faults: Vec<SampledFault> = draws
            .into_par_iter()
            .map(|(site, pulse)| {
                let class = match netlist.wire_id(sites.name(site)) {
                    Some(w) => {
                        let delay = netlist.wire(w).output_delay;
                        Some(timing.classify(pulse.start_ps, pulse.end_ps(), delay))
                    }
                    None => {
                        clilog::warn!(
                            "fault site {} is not a wire of {}, dropping",
                            sites.name(site),
                            netlist.name
                        );
                        None
                    }
                };
                SampledFault { site, pulse, class }
            })
            .collect();
        let campaign = Self { timing, seed, sites, faults };
        let c = campaign.counts();
        clilog::info!(
            "{} faults: {} timing-masked, {} metastable, {} need simulation, {} dropped",
            c.requested,
            c.timing_masked,
            c.metastable,
            c.needs_simulation,
            c.dropped
        );
        campaign
    }

    pub fn counts(&self) -> FaultCounts {
        let mut counts = FaultCounts { requested: self.faults.len(), ..Default::default() };
        for f in &self.faults {
            match f.class {
                Some(FaultClass::TimingMasked) => counts.timing_masked += 1,
                Some(FaultClass::Metastable) => counts.metastable += 1,
                Some(FaultClass::NeedsSimulation) => counts.needs_simulation += 1,
                None => counts.dropped += 1,
            }
        }
        counts
    }

    pub fn needs_simulation(&self) -> impl Iterator<Item = &SampledFault> + '_ {
        self.faults.iter().filter(|f| f.class == Some(FaultClass::NeedsSimulation))
    }

    /// One record per classified fault, in sampling order. Dropped faults
    /// have no record.
    pub fn records(&self) -> impl Iterator<Item = FaultRecord> + '_ {
        self.faults.iter().filter_map(|f| {
            let class = f.class?;
            Some(FaultRecord {
                site: f.site,
                timing_masked: class == FaultClass::TimingMasked,
                metastable: class == FaultClass::Metastable,
            })
        })
    }
}

fn chunk_rng(seed: u64, chunk: usize) -> StdRng {
    StdRng::seed_from_u64(seed ^ (chunk as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15))
}

/// Final result of an analysis run.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct FaultReport {
    #[serde(flatten)]
    pub counts: FaultCounts,
    /// Needs-simulation faults whose flip never reached an output.
    pub logic_masked: usize,
    pub seed: u64,
}

impl FaultReport {
    pub fn new(counts: FaultCounts, logic_masked: usize, seed: u64) -> Self {
        Self { counts, logic_masked, seed }
    }

    /// Logic-masked faults over all requested faults. Timing-masked,
    /// metastable and dropped faults stay in the denominator, so this is a
    /// lower bound on the pure logic-masking probability.
    pub fn fault_mask_ratio(&self) -> f64 {
        if self.counts.requested == 0 {
            return 0.0;
        }
        self.logic_masked as f64 / self.counts.requested as f64
    }
}

impl std::fmt::Display for FaultReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let c = &self.counts;
        writeln!(f, "=== Fault Masking Report ===")?;
        writeln!(f, "Faults requested: {}", c.requested)?;
        writeln!(f, "Timing-masked: {}", c.timing_masked)?;
        writeln!(f, "Metastability risk: {}", c.metastable)?;
        writeln!(f, "Needs simulation: {}", c.needs_simulation)?;
        if c.dropped > 0 {
            writeln!(f, "Dropped (unknown net): {}", c.dropped)?;
        }
        writeln!(f, "Logic-masked: {}", self.logic_masked)?;
        writeln!(f, "Seed: {}", self.seed)?;
        writeln!(f, "Fault mask ratio: {:.6}", self.fault_mask_ratio())?;
        Ok(())
    }
}

#[derive(Debug)]
pub enum AnalysisError {
    ZeroFaults,
    NoInjectionSites,
    InvalidPulseModel(String),
    Annotate(AnnotateError),
    Timing(TimingError),
    Bridge(BridgeError),
}

impl std::fmt::Display for AnalysisError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AnalysisError::ZeroFaults => write!(f, "number of faults must be positive"),
            AnalysisError::NoInjectionSites => {
                write!(f, "netlist has no non-output wires to inject faults into")
            }
            AnalysisError::InvalidPulseModel(msg) => {
                write!(f, "invalid pulse width model: {}", msg)
            }
            AnalysisError::Annotate(e) => write!(f, "{}", e),
            AnalysisError::Timing(e) => write!(f, "{}", e),
            AnalysisError::Bridge(e) => write!(f, "simulation bridge: {}", e),
        }
    }
}

impl std::error::Error for AnalysisError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AnalysisError::Annotate(e) => Some(e),
            AnalysisError::Timing(e) => Some(e),
            AnalysisError::Bridge(e) => Some(e),
            _ => None,
        }
    }
}

impl From<AnnotateError> for AnalysisError {
    fn from(e: AnnotateError) -> Self {
        AnalysisError::Annotate(e)
    }
}

impl From<TimingError> for AnalysisError {
    fn from(e: TimingError) -> Self {
        AnalysisError::Timing(e)
    }
}

impl From<BridgeError> for AnalysisError {
    fn from(e: BridgeError) -> Self {
        AnalysisError::Bridge(e)
    }
}

/// Assign gate delays and annotate the netlist.
pub fn prepare(
    netlist: &mut Netlist,
    delays: &DelayModel,
) -> Result<AnnotationReport, AnalysisError> {
    delays.apply(netlist);
    Ok(annotate::annotate(netlist)?)
}

/// Hand a classified campaign to the bridge and compute the report.
pub fn evaluate(
    netlist: &Netlist,
    campaign: &FaultCampaign,
    bridge: &mut dyn SimulationBridge,
) -> Result<FaultReport, AnalysisError> {
    let counts = campaign.counts();
    let logic_masked = bridge.run(netlist, &campaign.timing, campaign)?;
    if logic_masked > counts.needs_simulation {
        return Err(BridgeError::InconsistentResult {
            reported: logic_masked,
            simulated: counts.needs_simulation,
        }
        .into());
    }
    let report = FaultReport::new(counts, logic_masked, campaign.seed);
    clilog::info!(
        "{} of {} simulated faults logic-masked, fault mask ratio {:.6}",
        logic_masked,
        counts.needs_simulation,
        report.fault_mask_ratio()
    );
    Ok(report)
}

/// Sample, classify and simulate faults on an annotated netlist.
pub fn analyze(
    netlist: &Netlist,
    timing: &TimingInfo,
    config: &FaultConfig,
    bridge: &mut dyn SimulationBridge,
) -> Result<FaultReport, AnalysisError> {
    let campaign = FaultCampaign::sample(netlist, timing, config)?;
    evaluate(netlist, &campaign, bridge)
}
