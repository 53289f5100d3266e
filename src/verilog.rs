// SPDX-FileCopyrightText: Copyright (c) 2024 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0
//! Gate-level Verilog loading.
//!
//! The netlist is read and flattened by [`netlistdb`]. Leaf cell pin
//! directions come from the configured output-port names ([`CellPins`]),
//! so any synthesized library works without a cell database.
//!
//! `netlistdb` has no notion of delay overrides, so a light pre-pass
//! ([`strip_delay_overrides`]) lifts `CELL #N name (...)` delays out of the
//! source and blanks them (and `#(...)` parameter lists) before parsing.

use std::path::Path;

use compact_str::CompactString;
use indexmap::IndexMap;
use netlistdb::{Direction, LeafPinProvider, NetlistDB};
use sverilogparse::SVerilogRange;

use crate::netlist::{Netlist, OutputPorts};

/// Pin directions of leaf cells: a pin is an output iff its name is in the
/// output-port set. All pins are single-bit.
pub struct CellPins<'a>(pub &'a OutputPorts);

impl LeafPinProvider for CellPins<'_> {
    fn direction_of(
        &self,
        _macro_name: &CompactString,
        pin_name: &CompactString,
        _pin_idx: Option<isize>,
    ) -> Direction {
        if self.0.contains(pin_name.as_str()) {
            Direction::O
        } else {
            Direction::I
        }
    }

    fn width_of(
        &self,
        _macro_name: &CompactString,
        _pin_name: &CompactString,
    ) -> Option<SVerilogRange> {
        None
    }
}

#[derive(Debug)]
pub enum VerilogError {
    Io(String),
    /// `netlistdb` refused the source or could not find the top module.
    /// The cause has already been logged.
    Rejected { top: Option<String> },
}

impl std::fmt::Display for VerilogError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VerilogError::Io(msg) => write!(f, "Verilog I/O error: {}", msg),
            VerilogError::Rejected { top: Some(top) } => {
                write!(f, "cannot build netlist for module {} (see errors above)", top)
            }
            VerilogError::Rejected { top: None } => {
                write!(f, "cannot build netlist (see errors above)")
            }
        }
    }
}

impl std::error::Error for VerilogError {}

/// Source text with delay overrides lifted out.
#[derive(Debug, Clone, Default)]
pub struct Preprocessed {
    /// The source with every `#N` and `#(...)` replaced by blanks. Newlines
    /// are kept so parser line numbers still match the file.
    pub source: String,
    /// Instance name to override delay in ps.
    pub delays: IndexMap<CompactString, u64>,
}

/// Lift `CELL #N name (...)` and `CELL #(N) name (...)` delay overrides out
/// of the source. Any other `#(...)` is a parameter list and is dropped.
pub fn strip_delay_overrides(input: &str) -> Preprocessed {
    let bytes = input.as_bytes();
    let mut out = bytes.to_vec();
    let mut delays = IndexMap::new();
    let mut pos = 0;

    while pos < bytes.len() {
        match bytes[pos] {
            b'/' if bytes.get(pos + 1) == Some(&b'/') => pos = skip_to_eol(bytes, pos),
            b'/' if bytes.get(pos + 1) == Some(&b'*') => {
                pos = match input[pos + 2..].find("*/") {
                    Some(end) => pos + 2 + end + 2,
                    None => bytes.len(),
                };
            }
            b'`' => pos = skip_to_eol(bytes, pos),
            b'\\' => pos = skip_escaped(bytes, pos),
            b'#' => {
                let start = pos;
                let (end, delay) = read_delay(input, pos + 1);
                if end == pos + 1 {
                    pos += 1;
                    continue;
                }
                for b in &mut out[start..end] {
                    if *b != b'\n' {
                        *b = b' ';
                    }
                }
                if let Some(delay) = delay {
                    let name_start = skip_space(bytes, end);
                    let name_end = if bytes.get(name_start) == Some(&b'\\') {
                        skip_escaped(bytes, name_start)
                    } else {
                        skip_ident(bytes, name_start)
                    };
                    if name_end > name_start {
                        let name = input[name_start..name_end].trim_start_matches('\\');
                        delays.insert(CompactString::from(name), delay);
                    }
                }
                pos = end;
            }
            _ => pos += 1,
        }
    }

    // only ASCII bytes outside comments were rewritten to ASCII blanks
    let source = String::from_utf8(out).unwrap_or_else(|_| input.to_string());
    Preprocessed { source, delays }
}

fn skip_to_eol(bytes: &[u8], mut pos: usize) -> usize {
    while pos < bytes.len() && bytes[pos] != b'\n' {
        pos += 1;
    }
    pos
}

fn skip_space(bytes: &[u8], mut pos: usize) -> usize {
    while pos < bytes.len() && bytes[pos].is_ascii_whitespace() {
        pos += 1;
    }
    pos
}

/// Escaped identifiers run from `\` to the next whitespace.
fn skip_escaped(bytes: &[u8], mut pos: usize) -> usize {
    while pos < bytes.len() && !bytes[pos].is_ascii_whitespace() {
        pos += 1;
    }
    pos
}

fn skip_ident(bytes: &[u8], mut pos: usize) -> usize {
    while pos < bytes.len()
        && (bytes[pos].is_ascii_alphanumeric() || matches!(bytes[pos], b'_' | b'$'))
    {
        pos += 1;
    }
    pos
}

/// Parse what follows a `#`. Returns the end of the construct (`pos` itself
/// when it is neither a number nor a parenthesized list) and the delay when
/// it is one.
fn read_delay(input: &str, pos: usize) -> (usize, Option<u64>) {
    let bytes = input.as_bytes();
    let start = skip_space(bytes, pos);
    match bytes.get(start) {
        Some(b'(') => {
            let mut depth = 0;
            let mut end = start;
            while end < bytes.len() {
                match bytes[end] {
                    b'(' => depth += 1,
                    b')' => {
                        depth -= 1;
                        if depth == 0 {
                            end += 1;
                            break;
                        }
                    }
                    _ => {}
                }
                end += 1;
            }
            let inner = input[start + 1..end.saturating_sub(1).max(start + 1)].trim();
            (end, parse_delay_literal(inner))
        }
        Some(b) if b.is_ascii_digit() => {
            let mut end = start;
            while end < bytes.len()
                && (bytes[end].is_ascii_digit() || matches!(bytes[end], b'.' | b'_'))
            {
                end += 1;
            }
            (end, parse_delay_literal(&input[start..end]))
        }
        _ => (pos, None),
    }
}

/// Delay literals are integers in picoseconds; fractional values round to
/// the nearest picosecond.
fn parse_delay_literal(s: &str) -> Option<u64> {
    let v: f64 = s.replace('_', "").parse().ok()?;
    if v.is_finite() && v >= 0.0 {
        Some(v.round() as u64)
    } else {
        None
    }
}

/// Build the wire/gate graph of `top` (or the inferred top module).
pub fn load_str(
    source: &str,
    top: Option<&str>,
    output_ports: &OutputPorts,
) -> Result<Netlist, VerilogError> {
    let pre = strip_delay_overrides(source);
    if !pre.delays.is_empty() {
        clilog::info!("{} instance delay overrides in netlist", pre.delays.len());
    }
    let netlistdb = NetlistDB::from_sverilog_source(&pre.source, top, &CellPins(output_ports))
        .ok_or_else(|| VerilogError::Rejected { top: top.map(str::to_string) })?;
    Ok(Netlist::from_netlistdb(&netlistdb, &pre.delays))
}

pub fn load_file(
    path: &Path,
    top: Option<&str>,
    output_ports: &OutputPorts,
) -> Result<Netlist, VerilogError> {
    let source = std::fs::read_to_string(path)
        .map_err(|e| VerilogError::Io(format!("{}: {}", path.display(), e)))?;
    clilog::info!("reading netlist {}", path.display());
    load_str(&source, top, output_ports)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::netlist::WireKind;

    #[test]
    fn test_delay_overrides_are_lifted() {
        let src = "module t (a, y);\n  input a; output y;\n  wire n1;\n  \
                   inv #7 g1 ( .A(a), .Y(n1) );\n  buf #(12) g2 ( .A(n1), .Y(y) );\nendmodule\n";
        let pre = strip_delay_overrides(src);
        let delays: Vec<_> = pre.delays.iter().map(|(k, v)| (k.as_str(), *v)).collect();
        assert_eq!(delays, vec![("g1", 7), ("g2", 12)]);
        assert!(!pre.source.contains('#'));
        assert_eq!(pre.source.len(), src.len());
        assert_eq!(pre.source.lines().count(), src.lines().count());
        assert!(pre.source.contains("inv    g1 ( .A(a), .Y(n1) );"));
    }

    #[test]
    fn test_parameters_are_dropped_without_delay() {
        let src = "dff #(.INIT(1'b0), .W(2)) r0 ( .D(d), .Q(q) );";
        let pre = strip_delay_overrides(src);
        assert!(pre.delays.is_empty());
        assert!(pre.source.starts_with("dff "));
        assert!(pre.source.trim_start_matches("dff").trim_start().starts_with("r0 ("));
    }

    #[test]
    fn test_comments_and_escaped_names() {
        let src = "// #5 in a comment\n/* #(3) */ inv #2.6 \\g[0]#x ( .A(a), .Y(y) );\n";
        let pre = strip_delay_overrides(src);
        assert!(pre.source.starts_with("// #5 in a comment\n/* #(3) */"));
        let delays: Vec<_> = pre.delays.iter().map(|(k, v)| (k.as_str(), *v)).collect();
        assert_eq!(delays, vec![("g[0]#x", 3)]);
        assert!(pre.source.contains("\\g[0]#x"));
    }

    #[test]
    fn test_output_ports_give_pin_directions() {
        let ports = OutputPorts::default();
        let pins = CellPins(&ports);
        let cell = CompactString::from("nand2");
        assert_eq!(pins.direction_of(&cell, &"Y".into(), None), Direction::O);
        assert_eq!(pins.direction_of(&cell, &"A".into(), None), Direction::I);
        assert!(pins.width_of(&cell, &"A".into()).is_none());
    }

    #[test]
    fn test_load_full_adder() {
        let nl = load_str(
            include_str!("../tests/fixtures/full_adder.vg"),
            None,
            &OutputPorts::default(),
        )
        .unwrap();
        assert_eq!(nl.name, "full_adder");
        assert_eq!(nl.num_wires(), 8);
        assert_eq!(nl.num_gates(), 5);
        assert_eq!(nl.wires["cin"].kind, WireKind::Input);
        assert_eq!(nl.wires["sum"].kind, WireKind::Output);
        assert_eq!(nl.wires["n3"].kind, WireKind::Internal);
    }

    #[test]
    fn test_missing_file_and_unknown_top() {
        let err = load_file(Path::new("no/such/netlist.vg"), None, &OutputPorts::default());
        assert!(matches!(err, Err(VerilogError::Io(_))));
        let err = load_str(
            include_str!("../tests/fixtures/full_adder.vg"),
            Some("half_adder"),
            &OutputPorts::default(),
        );
        assert!(matches!(err, Err(VerilogError::Rejected { top: Some(_) })));
    }
}
