// SPDX-FileCopyrightText: Copyright (c) 2024 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0
//! Backward longest-path annotation from primary outputs.
//!
//! Every wire and gate receives `output_distance` (gate hops to an output)
//! and `output_delay` (cumulative gate delay to an output, ps), each the
//! maximum over all paths. A wire takes the maximum over its observable
//! loads; a gate takes its output wire's values plus its own delay.
//! Primary outputs are capture points and are pinned at zero.
//!
//! [`annotate`] levelizes the gates with Kahn's algorithm (sinks first) and
//! relaxes each node exactly once. [`relax_worklist`] is the plain stack
//! relaxation the levelized pass replaces; it produces identical values
//! but may revisit nodes exponentially often on reconvergent logic, so it
//! is kept for cross-checking and benchmarking only.

use std::collections::VecDeque;

use compact_str::CompactString;
use smallvec::SmallVec;

use crate::netlist::{GateId, Netlist, WireId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnnotateError {
    /// The combinational graph is not acyclic. Lists gates left unordered.
    CombinationalCycle { gates: Vec<CompactString> },
}

impl std::fmt::Display for AnnotateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AnnotateError::CombinationalCycle { gates } => {
                write!(f, "combinational cycle through {} gates: ", gates.len())?;
                for (i, g) in gates.iter().take(8).enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", g)?;
                }
                if gates.len() > 8 {
                    write!(f, ", ...")?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for AnnotateError {}

/// The wire a gate actually drives, i.e. not one that rejected it as a
/// second driver.
fn effective_output(netlist: &Netlist, g: GateId) -> Option<WireId> {
    let out = netlist.gate(g).output?;
    (netlist.wire(out).driver == Some(g)).then_some(out)
}

/// Order gates so that every gate comes after all gates loading its output.
pub fn levelize(netlist: &Netlist) -> Result<Vec<GateId>, AnnotateError> {
    let mut pending: Vec<usize> = netlist
        .gate_ids()
        .map(|g| match effective_output(netlist, g) {
            Some(w) if !netlist.wire(w).is_output() => netlist.wire(w).loads.len(),
            _ => 0,
        })
        .collect();
    let mut queue: VecDeque<GateId> = netlist.gate_ids().filter(|g| pending[g.0] == 0).collect();
    let mut order = Vec::with_capacity(netlist.num_gates());

    while let Some(g) = queue.pop_front() {
        order.push(g);
        let mut seen: SmallVec<[WireId; 4]> = SmallVec::new();
        for &w in &netlist.gate(g).inputs {
            if seen.contains(&w) {
                continue;
            }
            seen.push(w);
            let wire = netlist.wire(w);
            if wire.is_output() {
                continue;
            }
            if let Some(d) = wire.driver {
                pending[d.0] -= 1;
                if pending[d.0] == 0 {
                    queue.push_back(d);
                }
            }
        }
    }

    if order.len() < netlist.num_gates() {
        let gates = netlist
            .gate_ids()
            .filter(|g| pending[g.0] > 0)
            .map(|g| netlist.gate(g).name.clone())
            .collect();
        return Err(AnnotateError::CombinationalCycle { gates });
    }
    Ok(order)
}

/// (distance, delay, observable) of a wire from its loads' current values.
fn wire_value(netlist: &Netlist, w: WireId) -> (u32, u64, bool) {
    let wire = netlist.wire(w);
    if wire.is_output() {
        return (0, 0, true);
    }
    let mut value = (0, 0, false);
    for &l in &wire.loads {
        let load = netlist.gate(l);
        if load.observable {
            value.0 = value.0.max(load.output_distance + 1);
            value.1 = value.1.max(load.output_delay);
            value.2 = true;
        }
    }
    value
}

fn reset(netlist: &mut Netlist) {
    for wire in netlist.wires.values_mut() {
        wire.output_distance = 0;
        wire.output_delay = 0;
        wire.observable = false;
    }
    for gate in netlist.gates.values_mut() {
        gate.output_distance = 0;
        gate.output_delay = 0;
        gate.observable = false;
    }
}

/// Annotate every wire and gate. Gate delays must already be assigned.
///
/// Recomputes from scratch, so running it twice gives the same values.
pub fn annotate(netlist: &mut Netlist) -> Result<AnnotationReport, AnnotateError> {
    let timer = clilog::stimer!("delay annotation");
    let order = levelize(netlist)?;
    reset(netlist);

    for g in order {
        let Some(out) = effective_output(netlist, g) else { continue };
        let (distance, delay, observable) = wire_value(netlist, out);
        if observable {
            let gate = netlist.gate_mut(g);
            gate.output_distance = distance;
            gate.output_delay = delay + gate.delay;
            gate.observable = true;
        }
    }
    for w in netlist.wire_ids() {
        let (distance, delay, observable) = wire_value(netlist, w);
        let wire = netlist.wire_mut(w);
        wire.output_distance = distance;
        wire.output_delay = delay;
        wire.observable = observable;
    }
    clilog::finish!(timer);

    let report = AnnotationReport::from_netlist(netlist);
    clilog::info!(
        "annotated {}: logic depth {}, worst output delay {} ps",
        netlist.name,
        report.logic_depth,
        report.worst_delay_ps
    );
    if report.unobservable_wires > 0 {
        clilog::warn!("{} wires have no path to a primary output", report.unobservable_wires);
    }
    Ok(report)
}

/// Stack-based relaxation seeded from the primary outputs. Returns the
/// number of worklist pops. Checks acyclicity first, since the stack would
/// never drain on a cycle.
pub fn relax_worklist(netlist: &mut Netlist) -> Result<usize, AnnotateError> {
    levelize(netlist)?;
    reset(netlist);

    let mut stack: Vec<(WireId, Option<GateId>)> =
        netlist.primary_outputs().map(|w| (w, None)).collect();
    let mut pops = 0;
    while let Some((w, load)) = stack.pop() {
        pops += 1;
        if let Some(l) = load {
            let (load_distance, load_delay) = {
                let g = netlist.gate(l);
                (g.output_distance, g.output_delay)
            };
            let wire = netlist.wire_mut(w);
            if !wire.is_output() {
                wire.output_distance = wire.output_distance.max(load_distance + 1);
                wire.output_delay = wire.output_delay.max(load_delay);
            }
        }
        let wire = netlist.wire_mut(w);
        wire.observable = true;
        let (distance, delay, driver) = (wire.output_distance, wire.output_delay, wire.driver);
        let Some(d) = driver else { continue };

        let gate = netlist.gate_mut(d);
        gate.output_distance = gate.output_distance.max(distance);
        gate.output_delay = gate.output_delay.max(delay + gate.delay);
        gate.observable = true;
        stack.extend(gate.inputs.iter().map(|&i| (i, Some(d))));
    }
    Ok(pops)
}

/// Summary of an annotated netlist.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct AnnotationReport {
    pub num_wires: usize,
    pub num_gates: usize,
    /// Maximum `output_distance` over all wires.
    pub logic_depth: u32,
    /// Maximum `output_delay` over all wires, ps.
    pub worst_delay_ps: u64,
    /// Wires with no path to any primary output.
    pub unobservable_wires: usize,
    pub unobservable_gates: usize,
}

impl AnnotationReport {
    pub fn from_netlist(netlist: &Netlist) -> Self {
        let wires = netlist.wires.values();
        Self {
            num_wires: netlist.num_wires(),
            num_gates: netlist.num_gates(),
            logic_depth: wires.clone().map(|w| w.output_distance).max().unwrap_or(0),
            worst_delay_ps: wires.clone().map(|w| w.output_delay).max().unwrap_or(0),
            unobservable_wires: wires.filter(|w| !w.observable).count(),
            unobservable_gates: netlist.gates.values().filter(|g| !g.observable).count(),
        }
    }
}

impl std::fmt::Display for AnnotationReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== Annotation Report ===")?;
        writeln!(f, "Wires: {}", self.num_wires)?;
        writeln!(f, "Gates: {}", self.num_gates)?;
        writeln!(f, "Logic depth: {}", self.logic_depth)?;
        writeln!(f, "Worst output delay: {} ps", self.worst_delay_ps)?;
        writeln!(f, "Unobservable wires: {}", self.unobservable_wires)?;
        writeln!(f, "Unobservable gates: {}", self.unobservable_gates)?;
        Ok(())
    }
}

impl Netlist {
    /// Wires with the largest `output_delay`, descending, ties in wire order.
    pub fn critical_wires(&self, limit: usize) -> Vec<(WireId, u64)> {
        let mut wires: Vec<(WireId, u64)> =
            self.wires.values().enumerate().map(|(i, w)| (WireId(i), w.output_delay)).collect();
        wires.sort_by(|a, b| b.1.cmp(&a.1));
        wires.truncate(limit);
        wires
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delay_model::DelayModel;
    use crate::netlist::{Gate, OutputPorts, Wire, WireKind};
    use crate::verilog;

    fn load(src: &str) -> Netlist {
        verilog::load_str(src, None, &OutputPorts::default()).unwrap()
    }

    fn values(nl: &Netlist) -> (Vec<(u32, u64, bool)>, Vec<(u32, u64, bool)>) {
        (
            nl.wires.values().map(|w| (w.output_distance, w.output_delay, w.observable)).collect(),
            nl.gates.values().map(|g| (g.output_distance, g.output_delay, g.observable)).collect(),
        )
    }

    fn assert_annotators_agree(nl: &Netlist) {
        let mut a = nl.clone();
        let mut b = nl.clone();
        annotate(&mut a).unwrap();
        relax_worklist(&mut b).unwrap();
        assert_eq!(values(&a), values(&b));
    }

    /// in -> g1(d1) -> mid -> g2(d2) -> out
    fn chain(d1: u64, d2: u64) -> Netlist {
        let mut nl = Netlist::new("chain");
        let i = nl.add_wire(Wire::new("in", WireKind::Input, 1)).unwrap();
        let m = nl.add_wire(Wire::new("mid", WireKind::Internal, 1)).unwrap();
        let o = nl.add_wire(Wire::new("out", WireKind::Output, 1)).unwrap();
        let g1 = nl.add_gate(Gate::new("g1", "buf", [i], Some(m)).with_delay(d1)).unwrap();
        let g2 = nl.add_gate(Gate::new("g2", "buf", [m], Some(o)).with_delay(d2)).unwrap();
        nl.connect(g1);
        nl.connect(g2);
        nl
    }

    /// `n` stages of two parallel gates reconverging on every stage.
    fn ladder(n: usize) -> Netlist {
        let mut nl = Netlist::new("ladder");
        let mut prev = nl.add_wire(Wire::new("in", WireKind::Input, 1)).unwrap();
        for s in 0..n {
            let kind = if s + 1 == n { WireKind::Output } else { WireKind::Internal };
            let a = nl.add_wire(Wire::new(format!("a{}", s), WireKind::Internal, 1)).unwrap();
            let b = nl.add_wire(Wire::new(format!("b{}", s), WireKind::Internal, 1)).unwrap();
            let y = nl.add_wire(Wire::new(format!("y{}", s), kind, 1)).unwrap();
            let ga = Gate::new(format!("ga{}", s), "inv", [prev], Some(a)).with_delay(2);
            let gb = Gate::new(format!("gb{}", s), "buf", [prev], Some(b)).with_delay(3);
            let gy = Gate::new(format!("gy{}", s), "nand", [a, b], Some(y)).with_delay(5);
            let ga = nl.add_gate(ga).unwrap();
            let gb = nl.add_gate(gb).unwrap();
            let gy = nl.add_gate(gy).unwrap();
            for g in [ga, gb, gy] {
                nl.connect(g);
            }
            prev = y;
        }
        nl
    }

    #[test]
    fn test_two_gate_chain() {
        let mut nl = chain(7, 11);
        annotate(&mut nl).unwrap();
        let input = &nl.wires["in"];
        assert_eq!(input.output_delay, 18);
        assert_eq!(input.output_distance, 2);
        assert_eq!(nl.wires["mid"].output_delay, 11);
        assert_eq!(nl.wires["mid"].output_distance, 1);
        assert_eq!(nl.gates["g1"].output_delay, 18);
        assert_eq!(nl.gates["g1"].output_distance, 1);
        assert_eq!(nl.wires["out"].output_distance, 0);
        assert_eq!(nl.wires["out"].output_delay, 0);
        assert_annotators_agree(&chain(7, 11));
    }

    #[test]
    fn test_idempotent() {
        let mut nl = ladder(4);
        annotate(&mut nl).unwrap();
        let first = values(&nl);
        let report = annotate(&mut nl).unwrap();
        assert_eq!(values(&nl), first);
        assert_eq!(report.logic_depth, 8);
    }

    #[test]
    fn test_ladder_longest_path() {
        let mut nl = ladder(3);
        let report = annotate(&mut nl).unwrap();
        // each stage contributes max(2, 3) + 5
        assert_eq!(nl.wires["in"].output_delay, 24);
        assert_eq!(nl.wires["in"].output_distance, 6);
        assert_eq!(report.worst_delay_ps, 24);
        assert_eq!(report.unobservable_wires, 0);
        assert_annotators_agree(&ladder(3));
        assert_annotators_agree(&ladder(8));
    }

    #[test]
    fn test_worklist_revisits_reconvergent_logic() {
        let mut nl = ladder(6);
        let pops = relax_worklist(&mut nl).unwrap();
        // 3 gates per stage but every path is re-walked
        assert!(pops > 2 * (nl.num_wires() + nl.num_gates()), "pops = {}", pops);
    }

    #[test]
    fn test_full_adder() {
        let mut nl = load(include_str!("../tests/fixtures/full_adder.vg"));
        DelayModel::new(1)
            .with_cell_delays([("xor2s1", 10u64), ("and2s1", 6), ("or2s1", 4)])
            .apply(&mut nl);
        assert_annotators_agree(&nl);

        let report = annotate(&mut nl).unwrap();
        // a -> U1 -> n1 -> U4 -> n3 -> U5 -> cout
        assert_eq!(nl.wires["a"].output_delay, 20);
        assert_eq!(nl.wires["a"].output_distance, 3);
        // cin -> U2 -> sum and cin -> U4 -> U5 -> cout both take 10 ps
        assert_eq!(nl.wires["cin"].output_delay, 10);
        assert_eq!(nl.wires["cin"].output_distance, 2);
        assert_eq!(nl.wires["n2"].output_delay, 4);
        assert_eq!(report.logic_depth, 3);

        let critical: Vec<_> = nl
            .critical_wires(3)
            .into_iter()
            .map(|(w, d)| (nl.wire(w).name.as_str(), d))
            .collect();
        assert_eq!(critical, vec![("a", 20), ("b", 20), ("cin", 10)]);
    }

    #[test]
    fn test_primary_outputs_are_pinned() {
        // y feeds z: y is still a capture point
        let mut nl = load(
            r#"module t (a, y, z);
                 input a; output y, z;
                 inv g1 ( .A(a), .Y(y) );
                 inv g2 ( .A(y), .Y(z) );
               endmodule"#,
        );
        DelayModel::new(5).apply(&mut nl);
        annotate(&mut nl).unwrap();
        assert_eq!(nl.wires["y"].output_distance, 0);
        assert_eq!(nl.wires["y"].output_delay, 0);
        assert_eq!(nl.wires["a"].output_delay, 5);
        assert_eq!(nl.gates["g2"].output_delay, 5);
        assert_annotators_agree(&nl);
    }

    #[test]
    fn test_unobservable_logic() {
        let mut nl = load(
            r#"module t (a, y);
                 input a; output y;
                 wire dead, floating, dead2;
                 inv g1 ( .A(a), .Y(y) );
                 inv g2 ( .A(a), .Y(dead) );
                 nand2 g3 ( .A(dead), .B(floating), .Y(dead2) );
               endmodule"#,
        );
        let report = annotate(&mut nl).unwrap();
        assert!(!nl.wires["dead"].observable);
        assert!(!nl.wires["dead2"].observable);
        assert!(!nl.gates["g2"].observable);
        assert!(nl.wires["a"].observable);
        assert_eq!(nl.wires["a"].output_distance, 1);
        assert_eq!(report.unobservable_wires, 3);
        assert_eq!(report.unobservable_gates, 2);
        assert_annotators_agree(&nl);
    }

    #[test]
    fn test_combinational_cycle() {
        let mut nl = load(
            r#"module t (a, y);
                 input a; output y;
                 wire p, q;
                 nand2 g1 ( .A(a), .B(q), .Y(p) );
                 inv g2 ( .A(p), .Y(q) );
                 inv g3 ( .A(p), .Y(y) );
               endmodule"#,
        );
        let err = annotate(&mut nl).unwrap_err();
        assert_eq!(
            err,
            AnnotateError::CombinationalCycle { gates: vec!["g1".into(), "g2".into()] }
        );
        assert!(err.to_string().contains("g1, g2"));
        assert!(relax_worklist(&mut nl).is_err());
    }

    #[test]
    fn test_report_display() {
        let mut nl = chain(1, 2);
        let report = annotate(&mut nl).unwrap();
        let text = report.to_string();
        assert!(text.contains("Logic depth: 2"));
        assert!(text.contains("Worst output delay: 3 ps"));
    }
}
