// SPDX-FileCopyrightText: Copyright (c) 2024 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0
//! Bit-level wire/gate graph of one combinational module.
//!
//! Wires and gates are stored in two `IndexMap` arenas keyed by name.
//! [`WireId`] and [`GateId`] are positions in those maps; nothing is ever
//! removed, so a handle stays valid for the lifetime of the netlist.
//! `driver`, `loads`, `inputs` and `output` hold handles, never references.
//!
//! Construction is forgiving: duplicate names, multiply driven wires,
//! driven primary inputs, undriven wires and gates without an output are
//! recorded as [`StructuralWarning`]s, logged, and skipped so one malformed
//! instance does not abort analysis.

use compact_str::{format_compact, CompactString};
use indexmap::{IndexMap, IndexSet};
use smallvec::SmallVec;

use crate::delay_model::{DelaySource, DEFAULT_GATE_DELAY_PS};
use netlistdb::{Direction, NetlistDB};

/// Handle of a wire: its position in [`Netlist::wires`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WireId(pub usize);

/// Handle of a gate: its position in [`Netlist::gates`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GateId(pub usize);

/// Module boundary role of a wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireKind {
    Input,
    Output,
    Internal,
}

/// A single-bit signal.
#[derive(Debug, Clone)]
pub struct Wire {
    pub name: CompactString,
    /// Width of the declaration this bit was split from.
    pub width: usize,
    pub kind: WireKind,
    /// The gate producing this wire; `None` for primary inputs.
    pub driver: Option<GateId>,
    /// Gates consuming this wire, each at most once.
    pub loads: SmallVec<[GateId; 4]>,
    /// Max gate traversals to a primary output.
    pub output_distance: u32,
    /// Max cumulative propagation delay to a primary output, in ps.
    pub output_delay: u64,
    /// Whether any path reaches a primary output.
    pub observable: bool,
}

impl Wire {
    pub fn new(name: impl Into<CompactString>, kind: WireKind, width: usize) -> Self {
        Self {
            name: name.into(),
            width,
            kind,
            driver: None,
            loads: SmallVec::new(),
            output_distance: 0,
            output_delay: 0,
            observable: false,
        }
    }

    pub fn is_input(&self) -> bool {
        self.kind == WireKind::Input
    }

    pub fn is_output(&self) -> bool {
        self.kind == WireKind::Output
    }

    /// Set the driver. A wire is driven at most once: the existing driver
    /// is kept and returned as the error.
    pub fn add_driver(&mut self, gate: GateId) -> Result<(), GateId> {
        match self.driver {
            Some(existing) => Err(existing),
            None => {
                self.driver = Some(gate);
                Ok(())
            }
        }
    }

    /// Add a load. Returns false if the gate was already a load.
    pub fn add_load(&mut self, gate: GateId) -> bool {
        if self.loads.contains(&gate) {
            return false;
        }
        self.loads.push(gate);
        true
    }
}

/// A combinational cell instance.
#[derive(Debug, Clone)]
pub struct Gate {
    pub name: CompactString,
    pub cell_type: CompactString,
    /// Intrinsic propagation delay in ps.
    pub delay: u64,
    pub delay_source: DelaySource,
    /// Consumed wires in port order. A wire bound to two ports appears twice.
    pub inputs: SmallVec<[WireId; 4]>,
    pub output: Option<WireId>,
    pub output_distance: u32,
    pub output_delay: u64,
    pub observable: bool,
}

impl Gate {
    pub fn new(
        name: impl Into<CompactString>,
        cell_type: impl Into<CompactString>,
        inputs: impl IntoIterator<Item = WireId>,
        output: Option<WireId>,
    ) -> Self {
        Self {
            name: name.into(),
            cell_type: cell_type.into(),
            delay: DEFAULT_GATE_DELAY_PS,
            delay_source: DelaySource::Default,
            inputs: inputs.into_iter().collect(),
            output,
            output_distance: 0,
            output_delay: 0,
            observable: false,
        }
    }

    /// Builder-style delay assignment with [`DelaySource::Instance`].
    pub fn with_delay(mut self, delay: u64) -> Self {
        self.delay = delay;
        self.delay_source = DelaySource::Instance;
        self
    }
}

/// A recoverable construction anomaly. The offending entity is skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StructuralWarning {
    DuplicateWire(CompactString),
    DuplicateGate(CompactString),
    MissingOutput { gate: CompactString },
    MultipleOutputs { gate: CompactString, port: CompactString },
    MultipleDrivers { wire: CompactString, driver: CompactString, rejected: CompactString },
    /// A gate output bound to a primary input. The input keeps no driver.
    DrivenInput { wire: CompactString, rejected: CompactString },
    /// A wire other than a primary input with no driver.
    MissingDriver(CompactString),
}

impl std::fmt::Display for StructuralWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use StructuralWarning::*;
        match self {
            DuplicateWire(w) => write!(f, "wire {} already exists, skipping", w),
            DuplicateGate(g) => write!(f, "gate {} already exists, skipping", g),
            MissingOutput { gate } => write!(f, "gate {} has no output wire", gate),
            MultipleOutputs { gate, port } => {
                write!(f, "gate {} has a second output port {}, ignored", gate, port)
            }
            MultipleDrivers { wire, driver, rejected } => write!(
                f,
                "wire {} already driven by {}, rejecting driver {}",
                wire, driver, rejected
            ),
            DrivenInput { wire, rejected } => {
                write!(f, "primary input {} cannot be driven, rejecting driver {}", wire, rejected)
            }
            MissingDriver(w) => write!(f, "wire {} has no driver", w),
        }
    }
}

/// Port names that designate a cell's output in named bindings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputPorts(IndexSet<CompactString>);

impl Default for OutputPorts {
    fn default() -> Self {
        Self::new(["Q", "Y", "X", "Z", "ZN", "O"])
    }
}

impl OutputPorts {
    pub fn new<S: Into<CompactString>>(names: impl IntoIterator<Item = S>) -> Self {
        Self(names.into_iter().map(Into::into).collect())
    }

    pub fn contains(&self, port: &str) -> bool {
        self.0.contains(port)
    }
}

/// Name of bit `bit` of bus `base` as a flat wire.
pub fn bit_wire_name(base: &str, bit: i64) -> CompactString {
    format_compact!("{}_{}", base, bit)
}

/// Dotted hierarchical path from scope names given leaf first.
fn hier_path<'a>(scopes: impl Iterator<Item = &'a str>) -> String {
    let mut parts: Vec<&str> = scopes.collect();
    parts.reverse();
    parts.join(".")
}

/// Reverse [`bit_wire_name`] into bus-bit notation (`base[idx]`) when the
/// wire came from a multi-bit declaration. Single-bit names pass through.
pub fn bus_notation(name: &str, width: usize) -> String {
    if width > 1 {
        if let Some((base, idx)) = name.rsplit_once('_') {
            return format!("{}[{}]", base, idx);
        }
    }
    name.to_string()
}

/// The wire/gate graph of one module.
#[derive(Debug, Clone, Default)]
pub struct Netlist {
    pub name: CompactString,
    /// Primary inputs as declared: (name, width).
    pub inputs: Vec<(CompactString, usize)>,
    /// Primary outputs as declared: (name, width).
    pub outputs: Vec<(CompactString, usize)>,
    pub wires: IndexMap<CompactString, Wire>,
    pub gates: IndexMap<CompactString, Gate>,
    warnings: Vec<StructuralWarning>,
}

impl Netlist {
    pub fn new(name: impl Into<CompactString>) -> Self {
        Self { name: name.into(), ..Default::default() }
    }

    /// Build the graph from a flattened `netlistdb` database.
    ///
    /// Every net with at least one pin becomes a wire. Wires are ordered
    /// primary inputs first (port order), then internal nets by name, then
    /// primary outputs (port order), so the injection-site table does not
    /// depend on how the database numbers its nets. A net on an output
    /// port is an output even when it also reaches an input port.
    pub fn from_netlistdb(db: &NetlistDB, delays: &IndexMap<CompactString, u64>) -> Self {
        let mut netlist = Netlist::new(db.name.clone());

        // Top-level port pins sit on cell 0. An input port drives its net
        // from outside, so its pin is an output pin.
        let mut net_kind = vec![WireKind::Internal; db.num_nets];
        let mut ports: IndexMap<CompactString, (bool, usize)> = IndexMap::new();
        let mut port_nets: IndexSet<usize> = IndexSet::new();
        for pin in db.cell2pin.iter_set(0) {
            let is_input = db.pindirect[pin] == Direction::O;
            ports.entry(db.pinnames[pin].1.clone()).or_insert((is_input, 0)).1 += 1;
            let net = db.pin2net[pin];
            port_nets.insert(net);
            net_kind[net] = match (net_kind[net], is_input) {
                (_, false) => WireKind::Output,
                (WireKind::Output, true) => WireKind::Output,
                (_, true) => WireKind::Input,
            };
        }
        for (name, (is_input, width)) in &ports {
            if *is_input {
                netlist.inputs.push((name.clone(), *width));
            } else {
                netlist.outputs.push((name.clone(), *width));
            }
        }

        // `top.mid.` prefix of every net, empty at the top level
        let net_scope: Vec<String> = db
            .netnames
            .iter()
            .map(|(hier, _, _)| {
                let path = hier_path(hier.iter().map(|s| s.as_str()));
                if path.is_empty() {
                    path
                } else {
                    path + "."
                }
            })
            .collect();
        // bits per (scope, base name), the width of the declaration
        let mut bus_widths: IndexMap<(&str, &str), usize> = IndexMap::new();
        for (net, (_, name, bit)) in db.netnames.iter().enumerate() {
            if bit.is_some() {
                *bus_widths.entry((net_scope[net].as_str(), name.as_str())).or_default() += 1;
            }
        }

        let mut internal: Vec<(&str, &str, Option<isize>, usize)> = Vec::new();
        for net in 0..db.num_nets {
            if net_kind[net] != WireKind::Internal {
                continue;
            }
            if db.net2pin.iter_set(net).next().is_none() {
                clilog::debug!("{}: net {} has no pins, skipped", netlist.name, net);
                continue;
            }
            let (_, name, bit) = &db.netnames[net];
            internal.push((net_scope[net].as_str(), name.as_str(), *bit, net));
        }
        internal.sort();

        let order: IndexSet<usize> = port_nets
            .iter()
            .copied()
            .filter(|&n| net_kind[n] == WireKind::Input)
            .chain(internal.iter().map(|e| e.3))
            .chain(port_nets.iter().copied().filter(|&n| net_kind[n] == WireKind::Output))
            .collect();
        let mut wire_of_net: Vec<Option<WireId>> = vec![None; db.num_nets];
        for net in order {
            let (_, name, bit) = &db.netnames[net];
            let scope = net_scope[net].as_str();
            let (full, width) = match bit {
                Some(b) => (
                    format_compact!("{}{}", scope, bit_wire_name(name, *b as i64)),
                    bus_widths.get(&(scope, name.as_str())).copied().unwrap_or(1),
                ),
                None => (format_compact!("{}{}", scope, name), 1),
            };
            wire_of_net[net] = netlist.add_wire(Wire::new(full, net_kind[net], width));
        }

        for cell in 1..db.num_cells {
            let name = hier_path(db.cellnames[cell].iter().map(|s| s.as_str()));
            let mut inputs: SmallVec<[WireId; 4]> = SmallVec::new();
            let mut output = None;
            for pin in db.cell2pin.iter_set(cell) {
                let Some(wire) = wire_of_net[db.pin2net[pin]] else { continue };
                if db.pindirect[pin] != Direction::O {
                    inputs.push(wire);
                } else if output.is_some() {
                    netlist.warn(StructuralWarning::MultipleOutputs {
                        gate: name.as_str().into(),
                        port: db.pinnames[pin].1.clone(),
                    });
                } else {
                    output = Some(wire);
                }
            }
            let mut gate = Gate::new(name.as_str(), db.celltypes[cell].clone(), inputs, output);
            if let Some(&delay) = delays.get(name.as_str()) {
                gate = gate.with_delay(delay);
            }
            if let Some(id) = netlist.add_gate(gate) {
                netlist.connect(id);
            }
        }

        netlist.check_drivers();
        clilog::info!("{}", netlist.summary());
        netlist
    }

    fn warn(&mut self, warning: StructuralWarning) {
        clilog::warn!("{}: {}", self.name, warning);
        self.warnings.push(warning);
    }

    /// All structural warnings recorded so far, in order.
    pub fn warnings(&self) -> &[StructuralWarning] {
        &self.warnings
    }

    pub fn num_wires(&self) -> usize {
        self.wires.len()
    }

    pub fn num_gates(&self) -> usize {
        self.gates.len()
    }

    pub fn wire(&self, id: WireId) -> &Wire {
        &self.wires[id.0]
    }

    pub fn wire_mut(&mut self, id: WireId) -> &mut Wire {
        &mut self.wires[id.0]
    }

    pub fn gate(&self, id: GateId) -> &Gate {
        &self.gates[id.0]
    }

    pub fn gate_mut(&mut self, id: GateId) -> &mut Gate {
        &mut self.gates[id.0]
    }

    pub fn wire_id(&self, name: &str) -> Option<WireId> {
        self.wires.get_index_of(name).map(WireId)
    }

    pub fn gate_id(&self, name: &str) -> Option<GateId> {
        self.gates.get_index_of(name).map(GateId)
    }

    pub fn wire_ids(&self) -> impl Iterator<Item = WireId> {
        (0..self.wires.len()).map(WireId)
    }

    pub fn gate_ids(&self) -> impl Iterator<Item = GateId> {
        (0..self.gates.len()).map(GateId)
    }

    pub fn primary_outputs(&self) -> impl Iterator<Item = WireId> + '_ {
        self.wires
            .values()
            .enumerate()
            .filter(|(_, w)| w.is_output())
            .map(|(i, _)| WireId(i))
    }

    /// Register a wire. A duplicate name is reported and the new wire dropped.
    pub fn add_wire(&mut self, wire: Wire) -> Option<WireId> {
        if self.wires.contains_key(&wire.name) {
            self.warn(StructuralWarning::DuplicateWire(wire.name));
            return None;
        }
        let (idx, _) = self.wires.insert_full(wire.name.clone(), wire);
        Some(WireId(idx))
    }

    /// Register a gate without connecting it. Same duplicate policy as
    /// [`Netlist::add_wire`].
    pub fn add_gate(&mut self, gate: Gate) -> Option<GateId> {
        if self.gates.contains_key(&gate.name) {
            self.warn(StructuralWarning::DuplicateGate(gate.name));
            return None;
        }
        let (idx, _) = self.gates.insert_full(gate.name.clone(), gate);
        Some(GateId(idx))
    }

    /// Attach a registered gate to its wires: load of every input, driver of
    /// its output.
    pub fn connect(&mut self, id: GateId) {
        let gate = &self.gates[id.0];
        let gate_name = gate.name.clone();
        let inputs = gate.inputs.clone();
        let output = gate.output;

        for wire_id in inputs {
            let wire = &mut self.wires[wire_id.0];
            if !wire.add_load(id) {
                clilog::debug!("gate {} consumes {} more than once", gate_name, wire.name);
            }
        }
        let Some(out) = output else {
            self.warn(StructuralWarning::MissingOutput { gate: gate_name });
            return;
        };
        if self.wires[out.0].is_input() {
            let warning = StructuralWarning::DrivenInput {
                wire: self.wires[out.0].name.clone(),
                rejected: gate_name,
            };
            self.warn(warning);
            return;
        }
        if let Err(existing) = self.wires[out.0].add_driver(id) {
            let warning = StructuralWarning::MultipleDrivers {
                wire: self.wires[out.0].name.clone(),
                driver: self.gates[existing.0].name.clone(),
                rejected: gate_name,
            };
            self.warn(warning);
        }
    }

    /// Warn about every wire other than a primary input that has no driver.
    pub fn check_drivers(&mut self) {
        let undriven: Vec<CompactString> = self
            .wires
            .values()
            .filter(|w| !w.is_input() && w.driver.is_none())
            .map(|w| w.name.clone())
            .collect();
        for wire in undriven {
            self.warn(StructuralWarning::MissingDriver(wire));
        }
    }

    /// Wires that are not primary outputs, in wire order. These are the
    /// fault-injection candidates.
    pub fn non_output_wires(&self) -> impl Iterator<Item = (WireId, &Wire)> + '_ {
        self.wires
            .values()
            .enumerate()
            .filter(|(_, w)| !w.is_output())
            .map(|(i, w)| (WireId(i), w))
    }

    /// One-line size summary for logs.
    pub fn summary(&self) -> String {
        let num_inputs = self.wires.values().filter(|w| w.is_input()).count();
        let num_outputs = self.wires.values().filter(|w| w.is_output()).count();
        format!(
            "netlist {}: {} wires ({} PI bits, {} PO bits), {} gates, {} warnings",
            self.name,
            self.wires.len(),
            num_inputs,
            num_outputs,
            self.gates.len(),
            self.warnings.len()
        )
    }
}
