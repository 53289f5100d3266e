// SPDX-FileCopyrightText: Copyright (c) 2024 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0
//! Per-gate intrinsic delay resolution.
//!
//! First match wins:
//! 1. instance override written in the netlist (`CELL #N inst (...)`)
//! 2. SDF per-instance worst IOPATH
//! 3. cell-type table: configured delays, then Liberty worst arc
//! 4. the default unit delay

use compact_str::CompactString;
use indexmap::IndexMap;

use crate::liberty::TimingLibrary;
use crate::netlist::{Gate, Netlist};
use crate::sdf::SdfFile;

/// Delay of a gate whose cell is unknown to every source.
pub const DEFAULT_GATE_DELAY_PS: u64 = 1;

/// Where a gate's delay came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DelaySource {
    Default,
    CellType,
    Annotation,
    Instance,
}

/// How many gates took their delay from each source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct DelayStats {
    pub instance: usize,
    pub annotation: usize,
    pub cell_type: usize,
    pub default: usize,
}

impl DelayStats {
    fn count(&mut self, source: DelaySource) {
        match source {
            DelaySource::Instance => self.instance += 1,
            DelaySource::Annotation => self.annotation += 1,
            DelaySource::CellType => self.cell_type += 1,
            DelaySource::Default => self.default += 1,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DelayModel {
    pub default_ps: u64,
    cell_delays: IndexMap<CompactString, u64>,
    sdf: Option<SdfFile>,
    liberty: Option<TimingLibrary>,
}

impl Default for DelayModel {
    fn default() -> Self {
        Self::new(DEFAULT_GATE_DELAY_PS)
    }
}

impl DelayModel {
    pub fn new(default_ps: u64) -> Self {
        Self { default_ps, cell_delays: IndexMap::new(), sdf: None, liberty: None }
    }

    pub fn with_cell_delays<K: Into<CompactString>>(
        mut self,
        delays: impl IntoIterator<Item = (K, u64)>,
    ) -> Self {
        self.cell_delays.extend(delays.into_iter().map(|(k, v)| (k.into(), v)));
        self
    }

    pub fn with_sdf(mut self, sdf: SdfFile) -> Self {
        self.sdf = Some(sdf);
        self
    }

    pub fn with_liberty(mut self, liberty: TimingLibrary) -> Self {
        self.liberty = Some(liberty);
        self
    }

    /// Delay and its source for one gate. An instance override already on
    /// the gate is returned unchanged.
    pub fn resolve(&self, gate: &Gate) -> (u64, DelaySource) {
        if gate.delay_source == DelaySource::Instance {
            return (gate.delay, DelaySource::Instance);
        }
        if let Some(d) = self.sdf.as_ref().and_then(|s| s.instance_delay(&gate.name)) {
            return (d, DelaySource::Annotation);
        }
        if let Some(&d) = self.cell_delays.get(gate.cell_type.as_str()) {
            return (d, DelaySource::CellType);
        }
        if let Some(d) = self.liberty.as_ref().and_then(|l| l.cell_delay(&gate.cell_type)) {
            return (d, DelaySource::CellType);
        }
        (self.default_ps, DelaySource::Default)
    }

    /// Assign every gate's delay. Must run before annotation.
    pub fn apply(&self, netlist: &mut Netlist) -> DelayStats {
        let mut stats = DelayStats::default();
        for gate in netlist.gates.values_mut() {
            let (delay, source) = self.resolve(gate);
            gate.delay = delay;
            gate.delay_source = source;
            stats.count(source);
        }
        clilog::info!(
            "gate delays: {} instance, {} annotated, {} by cell type, {} default ({} ps)",
            stats.instance,
            stats.annotation,
            stats.cell_type,
            stats.default,
            self.default_ps
        );
        if stats.default > 0 && (self.sdf.is_some() || self.liberty.is_some()) {
            clilog::warn!(
                "{} gates have no delay annotation, using {} ps",
                stats.default,
                self.default_ps
            );
        }
        stats
    }

    /// Setup check from the loaded annotation files: SDF first, then Liberty.
    pub fn setup_ps(&self) -> Option<u64> {
        self.sdf
            .as_ref()
            .and_then(SdfFile::worst_setup_ps)
            .or_else(|| self.liberty.as_ref().and_then(TimingLibrary::worst_setup_ps))
    }

    /// Hold check from the loaded annotation files: SDF first, then Liberty.
    pub fn hold_ps(&self) -> Option<u64> {
        self.sdf
            .as_ref()
            .and_then(SdfFile::worst_hold_ps)
            .or_else(|| self.liberty.as_ref().and_then(TimingLibrary::worst_hold_ps))
    }
}
